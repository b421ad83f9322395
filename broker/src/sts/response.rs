use chrono::{DateTime, TimeZone, Utc};
use roxmltree::Document;
use serde_json::Value;

use crate::common::xml::child_text;
use crate::common::{BrokerError, BrokerResult, Credential};

/// Extracts the issued credentials from a 2xx STS body, XML or JSON
pub(crate) fn parse_credentials(endpoint: &str, body: &str) -> BrokerResult<Credential> {
    let trimmed = body.trim_start();
    let fields = if trimmed.starts_with('{') {
        parse_json(trimmed)
    } else {
        parse_xml(trimmed)
    }
    .map_err(|message| BrokerError::malformed_response(endpoint, message))?;

    let expiration = parse_expiration(&fields.expiration)
        .ok_or_else(|| {
            BrokerError::malformed_response(
                endpoint,
                format!("unparseable Expiration '{}'", fields.expiration),
            )
        })?;

    Credential::new(
        fields.access_key_id,
        fields.secret_access_key,
        fields.session_token,
        expiration,
    )
    .map_err(|e| BrokerError::malformed_response(endpoint, e.to_string()))
}

struct RawCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: String,
}

fn parse_xml(body: &str) -> Result<RawCredentials, String> {
    let doc = Document::parse(body).map_err(|e| format!("invalid XML: {}", e))?;
    let credentials = doc
        .descendants()
        .find(|node| node.is_element() && node.has_tag_name("Credentials"))
        .ok_or_else(|| "no Credentials element".to_string())?;

    let field = |tag: &'static str| {
        child_text(credentials, tag).ok_or_else(|| format!("missing {}", tag))
    };

    Ok(RawCredentials {
        access_key_id: field("AccessKeyId")?,
        secret_access_key: field("SecretAccessKey")?,
        session_token: field("SessionToken")?,
        expiration: field("Expiration")?,
    })
}

fn parse_json(body: &str) -> Result<RawCredentials, String> {
    let value: Value = serde_json::from_str(body).map_err(|e| format!("invalid JSON: {}", e))?;
    let credentials =
        find_credentials(&value).ok_or_else(|| "no object carrying AccessKeyId".to_string())?;

    let field = |key: &'static str| -> Result<String, String> {
        match credentials.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Some(Value::Number(n)) if key == "Expiration" => Ok(n.to_string()),
            _ => Err(format!("missing {}", key)),
        }
    };

    Ok(RawCredentials {
        access_key_id: field("AccessKeyId")?,
        secret_access_key: field("SecretAccessKey")?,
        session_token: field("SessionToken")?,
        expiration: field("Expiration")?,
    })
}

/// Depth-first search for the object holding `AccessKeyId`, which covers both
/// the wrapped response layout and a flat object
fn find_credentials(value: &Value) -> Option<&serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) if map.contains_key("AccessKeyId") => Some(map),
        Value::Object(map) => map.values().find_map(find_credentials),
        _ => None,
    }
}

/// RFC 3339 timestamp or seconds since the epoch
fn parse_expiration(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }
    let seconds = raw
        .parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(|s| s as i64))?;
    Utc.timestamp_opt(seconds, 0).single()
}
