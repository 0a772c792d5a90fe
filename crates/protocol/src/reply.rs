//! JSON reply returned by the endpoint for both chunk posts and offset queries.

use serde::{Deserialize, Deserializer, Serialize};

/// Reply body of the reference endpoint.
///
/// `offset` is only meaningful on offset queries. Some endpoints emit it as
/// a string, so both forms are accepted on the way in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_offset",
        skip_serializing_if = "Option::is_none"
    )]
    pub offset: Option<u64>,
}

impl EndpointReply {
    /// A successful reply with a human-readable message.
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            success: true,
            msg: Some(msg.into()),
            offset: None,
        }
    }

    /// A failed reply; the message is surfaced to the user as-is.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            msg: Some(msg.into()),
            offset: None,
        }
    }

    /// A successful offset-query reply. `None` means nothing is stored yet.
    pub fn offset(offset: Option<u64>) -> Self {
        Self {
            success: true,
            msg: None,
            offset,
        }
    }

    /// Parses a reply body, returning `None` for anything that is not a
    /// reply object.
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body.trim()).ok()
    }
}

fn deserialize_offset<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_offset() {
        let reply = EndpointReply::parse(r#"{"success":true,"offset":12500}"#).unwrap();
        assert!(reply.success);
        assert_eq!(reply.offset, Some(12_500));
    }

    #[test]
    fn parses_string_offset() {
        let reply = EndpointReply::parse(r#"{"success":true,"offset":"4096"}"#).unwrap();
        assert_eq!(reply.offset, Some(4096));
    }

    #[test]
    fn garbage_offset_is_ignored() {
        let reply = EndpointReply::parse(r#"{"success":true,"offset":"abc"}"#).unwrap();
        assert_eq!(reply.offset, None);

        let reply = EndpointReply::parse(r#"{"success":true,"offset":-5}"#).unwrap();
        assert_eq!(reply.offset, None);
    }

    #[test]
    fn missing_fields_default() {
        let reply = EndpointReply::parse(r#"{"success":false}"#).unwrap();
        assert!(!reply.success);
        assert!(reply.msg.is_none());
        assert!(reply.offset.is_none());
    }

    #[test]
    fn non_json_is_none() {
        assert!(EndpointReply::parse("<html>502 Bad Gateway</html>").is_none());
        assert!(EndpointReply::parse("").is_none());
    }

    #[test]
    fn serialization_skips_empty_fields() {
        let json = serde_json::to_string(&EndpointReply::offset(None)).unwrap();
        assert_eq!(json, r#"{"success":true}"#);

        let json = serde_json::to_string(&EndpointReply::failed("nope")).unwrap();
        assert!(json.contains(r#""msg":"nope""#));
        assert!(!json.contains("offset"));
    }
}
