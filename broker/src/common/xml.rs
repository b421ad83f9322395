use roxmltree::{Document, Node};

/// Text of the first direct child element named `tag`, trimmed
pub(crate) fn child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|child| child.is_element() && child.has_tag_name(tag))
        .and_then(|child| child.text())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Text of the first element named `tag` anywhere in the document
pub(crate) fn descendant_text(doc: &Document<'_>, tag: &str) -> Option<String> {
    doc.descendants()
        .find(|node| node.is_element() && node.has_tag_name(tag))
        .and_then(|node| node.text())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Structured error body returned by STS (`ErrorResponse`) and S3 (`Error`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

impl ServiceError {
    /// Parses an XML or JSON error body; `None` when it carries no error code
    pub fn parse(body: &str) -> Option<Self> {
        let trimmed = body.trim_start();
        if trimmed.starts_with('{') {
            Self::parse_json(trimmed)
        } else if trimmed.starts_with('<') {
            Self::parse_xml(trimmed)
        } else {
            None
        }
    }

    fn parse_xml(body: &str) -> Option<Self> {
        let doc = Document::parse(body).ok()?;
        let code = descendant_text(&doc, "Code")?;
        Some(Self {
            code,
            message: descendant_text(&doc, "Message").unwrap_or_default(),
            request_id: descendant_text(&doc, "RequestId"),
        })
    }

    fn parse_json(body: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        let error = value
            .get("ErrorResponse")
            .and_then(|inner| inner.get("Error"))
            .or_else(|| value.get("Error"))
            .unwrap_or(&value);
        let code = error.get("Code")?.as_str()?.to_string();
        let message = error
            .get("Message")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string();
        let request_id = value
            .get("RequestId")
            .or_else(|| error.get("RequestId"))
            .and_then(|r| r.as_str())
            .map(str::to_string);
        Some(Self {
            code,
            message,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sts_error_response() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<ErrorResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <Error>
    <Type></Type>
    <Code>AccessDenied</Code>
    <Message>Access denied: Invalid Token</Message>
  </Error>
  <RequestId>17A3C5F9E1D2B4A0</RequestId>
</ErrorResponse>"#;

        let error = ServiceError::parse(body).unwrap();
        assert_eq!(error.code, "AccessDenied");
        assert_eq!(error.message, "Access denied: Invalid Token");
        assert_eq!(error.request_id.as_deref(), Some("17A3C5F9E1D2B4A0"));
    }

    #[test]
    fn test_parse_s3_error() {
        let body = "<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message><BucketName>data</BucketName></Error>";
        let error = ServiceError::parse(body).unwrap();
        assert_eq!(error.code, "NoSuchBucket");
        assert_eq!(error.request_id, None);
    }

    #[test]
    fn test_parse_json_error() {
        let body = r#"{"Error":{"Code":"InvalidIdentityToken","Message":"bad token"},"RequestId":"abc"}"#;
        let error = ServiceError::parse(body).unwrap();
        assert_eq!(error.code, "InvalidIdentityToken");
        assert_eq!(error.message, "bad token");
        assert_eq!(error.request_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_parse_without_code() {
        assert_eq!(ServiceError::parse(""), None);
        assert_eq!(ServiceError::parse("upstream connect error"), None);
        assert_eq!(ServiceError::parse("<html><body>Bad Gateway</body></html>"), None);
    }

    #[test]
    fn test_child_text_ignores_empty_elements() {
        let doc = Document::parse("<Root><A> value </A><B></B></Root>").unwrap();
        let root = doc.root_element();
        assert_eq!(child_text(root, "A").as_deref(), Some("value"));
        assert_eq!(child_text(root, "B"), None);
        assert_eq!(child_text(root, "C"), None);
    }
}
