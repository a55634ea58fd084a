//! Request body decoding.
//!
//! A delivery is normalized to a list of records:
//!
//! 1. a JSON array of objects is used as is
//! 2. an object with the configured data field yields that field's array
//! 3. otherwise the first conventional field ([`CONVENTIONAL_FIELDS`]) that
//!    holds an array of objects is used
//! 4. otherwise the object itself is the single record
//!
//! ```rust
//! use sluice_webhook::payload::decode;
//!
//! let records = decode(br#"{"data":[{"id":1},{"id":2}]}"#, None).unwrap();
//! assert_eq!(records.len(), 2);
//!
//! let records = decode(br#"{"id":1}"#, None).unwrap();
//! assert_eq!(records[0]["id"], 1);
//! ```

use serde_json::Value;

use crate::error::PayloadError;
use crate::Record;

/// Object fields probed, in order, when no data field is configured.
pub const CONVENTIONAL_FIELDS: [&str; 4] = ["data", "items", "results", "records"];

/// Decodes a raw body into records.
pub fn decode(body: &[u8], data_field: Option<&str>) -> Result<Vec<Record>, PayloadError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| PayloadError::InvalidJson(e.to_string()))?;

    match value {
        Value::Array(items) => into_records(items),
        Value::Object(object) => decode_object(object, data_field),
        other => Err(PayloadError::InvalidJson(format!(
            "expected array or object, got {}",
            json_type(&other)
        ))),
    }
}

fn decode_object(mut object: Record, data_field: Option<&str>) -> Result<Vec<Record>, PayloadError> {
    if let Some(field) = data_field {
        return match object.remove(field) {
            Some(Value::Array(items)) => into_records(items),
            Some(other) => Err(PayloadError::NotAnArray {
                field: field.to_string(),
                found: json_type(&other),
            }),
            None => Err(PayloadError::FieldNotFound(field.to_string())),
        };
    }

    let conventional = CONVENTIONAL_FIELDS.iter().copied().find(|field| {
        matches!(object.get(*field), Some(Value::Array(items)) if items.iter().all(Value::is_object))
    });

    match conventional {
        Some(field) => match object.remove(field) {
            Some(Value::Array(items)) => into_records(items),
            _ => Ok(vec![object]),
        },
        None => Ok(vec![object]),
    }
}

fn into_records(items: Vec<Value>) -> Result<Vec<Record>, PayloadError> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(record) => Ok(record),
            _ => Err(PayloadError::NonObjectElement),
        })
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_array() {
        let records = decode(br#"[{"id":1}]"#, None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], json!(1));
    }

    #[test]
    fn test_decode_empty_array() {
        assert!(decode(b"[]", None).unwrap().is_empty());
    }

    #[test]
    fn test_decode_array_with_non_object() {
        assert_eq!(
            decode(br#"[{"id":1}, 2]"#, None),
            Err(PayloadError::NonObjectElement)
        );
    }

    #[test]
    fn test_decode_conventional_field() {
        let records = decode(br#"{"data":[{"id":1},{"id":2}]}"#, None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["id"], json!(2));
    }

    #[test]
    fn test_conventional_fields_probe_order() {
        let body = br#"{"records":[{"r":1}],"items":[{"i":1},{"i":2}]}"#;
        let records = decode(body, None).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].contains_key("i"));
    }

    #[test]
    fn test_conventional_field_skipped_when_not_records() {
        let body = br#"{"data":"not-a-list","results":[{"id":7}]}"#;
        let records = decode(body, None).unwrap();
        assert_eq!(records, vec![json!({"id": 7}).as_object().unwrap().clone()]);

        let body = br#"{"data":[1,2],"status":"ok"}"#;
        let records = decode(body, None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["status"], json!("ok"));
    }

    #[test]
    fn test_decode_single_object() {
        let records = decode(br#"{"id":1,"nested":{"a":[1,2]}}"#, None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], json!(1));
        assert_eq!(records[0]["nested"]["a"], json!([1, 2]));
    }

    #[test]
    fn test_decode_preserves_field_order() {
        let records = decode(br#"{"z":1,"a":2,"m":3}"#, None).unwrap();
        let keys: Vec<&str> = records[0].keys().map(String::as_str).collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn test_data_field() {
        let body = br#"{"events":[{"id":1},{"id":2},{"id":3}],"data":[{"ignored":true}]}"#;
        let records = decode(body, Some("events")).unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_data_field_missing() {
        assert_eq!(
            decode(br#"{"data":[{"id":1}]}"#, Some("events")),
            Err(PayloadError::FieldNotFound("events".to_string()))
        );
    }

    #[test]
    fn test_data_field_not_an_array() {
        assert_eq!(
            decode(br#"{"events":{"id":1}}"#, Some("events")),
            Err(PayloadError::NotAnArray {
                field: "events".to_string(),
                found: "object",
            })
        );
    }

    #[test]
    fn test_data_field_with_non_object() {
        assert_eq!(
            decode(br#"{"events":[{"id":1},"x"]}"#, Some("events")),
            Err(PayloadError::NonObjectElement)
        );
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            decode(b"{not json", None),
            Err(PayloadError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_scalars_rejected() {
        for body in [&b"null"[..], b"42", b"\"text\"", b"true"] {
            assert!(
                matches!(decode(body, None), Err(PayloadError::InvalidJson(_))),
                "body {:?} should be rejected",
                std::str::from_utf8(body).unwrap()
            );
        }
    }
}
