//! XML formatting utilities for S3 responses

use bucketshim_core::ObjectStat;

/// Generate request ID (simplified)
fn request_id() -> String {
    uuid::Uuid::new_v4()
        .to_string()
        .replace('-', "")
        .to_uppercase()
}

/// Format an S3 error response as XML
pub fn format_error(code: &str, message: &str, resource: &str) -> String {
    let resource_line = if !resource.is_empty() {
        format!("  <Resource>{}</Resource>\n", xml_escape(resource))
    } else {
        String::new()
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
  <Code>{}</Code>
  <Message>{}</Message>
{}  <RequestId>{}</RequestId>
</Error>"#,
        code,
        xml_escape(message),
        resource_line,
        request_id()
    )
}

/// Format ListBuckets response
pub fn format_list_buckets(buckets: &[String]) -> String {
    let bucket_entries: String = buckets
        .iter()
        .map(|name| {
            format!(
                r#"    <Bucket>
      <Name>{}</Name>
      <CreationDate>2024-01-01T00:00:00.000Z</CreationDate>
    </Bucket>"#,
                xml_escape(name)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Owner>
    <ID>000000000000</ID>
    <DisplayName>bucketshim</DisplayName>
  </Owner>
  <Buckets>
{}
  </Buckets>
</ListAllMyBucketsResult>"#,
        bucket_entries
    )
}

/// Format a ListObjectsV2 response from a merged listing.
///
/// The backend does not report modification times, so entries carry the
/// render time, as the original emulator did.
pub fn format_list_objects(bucket: &str, prefix: &str, entries: &[ObjectStat]) -> String {
    let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S.000Z");
    let contents: String = entries
        .iter()
        .map(|stat| {
            format!(
                r#"  <Contents>
    <Key>{}</Key>
    <LastModified>{}</LastModified>
    <ETag>{}</ETag>
    <Size>{}</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>"#,
                xml_escape(&stat.name),
                now,
                xml_escape(&stat.etag),
                stat.size
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let prefix_element = if prefix.is_empty() {
        "  <Prefix/>".to_string()
    } else {
        format!("  <Prefix>{}</Prefix>", xml_escape(prefix))
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>{}</Name>
{}
  <KeyCount>{}</KeyCount>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>false</IsTruncated>
{}
</ListBucketResult>"#,
        xml_escape(bucket),
        prefix_element,
        entries.len(),
        contents
    )
}

/// XML escape special characters
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error() {
        let xml = format_error("NoSuchBucket", "The bucket does not exist", "my-bucket");
        assert!(xml.contains("<Code>NoSuchBucket</Code>"));
        assert!(xml.contains("<Resource>my-bucket</Resource>"));
    }

    #[test]
    fn test_format_list_buckets() {
        let buckets = vec!["bucket1".to_string(), "bucket2".to_string()];
        let xml = format_list_buckets(&buckets);
        assert!(xml.contains("<Name>bucket1</Name>"));
        assert!(xml.contains("<Name>bucket2</Name>"));
    }

    #[test]
    fn test_format_list_objects() {
        let entries = vec![
            ObjectStat::new("a.txt", 5).with_etag("\"abc\""),
            ObjectStat::new("dir/b.txt", 10),
        ];
        let xml = format_list_objects("backups", "", &entries);
        assert!(xml.contains("<Key>a.txt</Key>"));
        assert!(xml.contains("<Key>dir/b.txt</Key>"));
        assert!(xml.contains("<KeyCount>2</KeyCount>"));
        assert!(xml.contains("<ETag>&quot;abc&quot;</ETag>"));
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("test&value"), "test&amp;value");
        assert_eq!(xml_escape("<tag>"), "&lt;tag&gt;");
    }
}
