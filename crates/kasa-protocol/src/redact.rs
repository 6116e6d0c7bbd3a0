//! Masking of identifying fields before discovery payloads are logged.
//!
//! A [`Redactor`] is a table of field name → masking function applied
//! recursively to a JSON value. Redaction returns a copy; the input is never
//! modified.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Masks one field value.
pub type RedactFn = fn(&Value) -> Value;

/// Placeholder for fields listed without a masking function.
pub const REDACTED: &str = "**REDACTED**";

/// Field → masking table.
///
/// # Example
///
/// ```
/// use kasa_protocol::redact::Redactor;
/// use serde_json::json;
///
/// let redacted = Redactor::discovery().redact(&json!({
///     "mac": "AA:BB:CC:DD:EE:FF",
///     "device_model": "P110(EU)",
/// }));
/// assert_eq!(redacted["mac"], "AA:BB:CC:00:00:00");
/// assert_eq!(redacted["device_model"], "P110(EU)");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    rules: BTreeMap<&'static str, Option<RedactFn>>,
}

fn redact_id(value: &Value) -> Value {
    match value.as_str() {
        Some(id) => Value::String(format!("REDACTED_{}", id.get(9..).unwrap_or(""))),
        None => Value::String(REDACTED.into()),
    }
}

fn mask_name(value: &Value) -> Value {
    match value.as_str() {
        Some("") => Value::String(String::new()),
        _ => Value::String("#MASKED_NAME#".into()),
    }
}

fn mask_ssid(value: &Value) -> Value {
    match value.as_str() {
        Some("") => Value::String(String::new()),
        _ => Value::String("#MASKED_SSID#".into()),
    }
}

/// Keeps the vendor prefix of a MAC address and zeroes the rest.
fn mask_mac(value: &Value) -> Value {
    let Some(mac) = value.as_str() else {
        return Value::String(REDACTED.into());
    };
    let delimiter = if mac.contains(':') { ':' } else { '-' };
    let prefix = mac.get(..8).unwrap_or(mac);
    Value::String(format!("{prefix}{delimiter}00{delimiter}00{delimiter}00"))
}

fn clear_key_material(value: &Value) -> Value {
    let mut info = value.clone();
    if let Some(fields) = info.as_object_mut() {
        for field in ["key", "data"] {
            if fields.contains_key(field) {
                fields.insert(field.into(), Value::String(String::new()));
            }
        }
    }
    info
}

fn redact_decrypted(value: &Value) -> Value {
    Redactor::decrypted_data().redact(value)
}

const DISCOVERY_RULES: &[(&str, Option<RedactFn>)] = &[
    ("device_id", Some(redact_id)),
    ("deviceId", Some(redact_id)),
    ("owner", Some(redact_id)),
    ("master_device_id", Some(redact_id)),
    ("group_id", Some(redact_id)),
    ("oemId", Some(redact_id)),
    ("hwId", Some(redact_id)),
    ("mac", Some(mask_mac)),
    ("mic_mac", Some(mask_mac)),
    ("alias", Some(mask_name)),
    ("device_name", Some(mask_name)),
    ("group_name", Some(mask_name)),
    ("latitude", None),
    ("longitude", None),
    ("latitude_i", None),
    ("longitude_i", None),
    ("encrypt_info", Some(clear_key_material)),
    ("decrypted_data", Some(redact_decrypted)),
];

const DECRYPTED_DATA_RULES: &[(&str, Option<RedactFn>)] = &[
    ("connect_ssid", Some(mask_ssid)),
    ("device_id", Some(redact_id)),
];

impl Redactor {
    /// Creates a redactor from explicit rules. A `None` function replaces
    /// the field with [`REDACTED`].
    pub fn new(rules: impl IntoIterator<Item = (&'static str, Option<RedactFn>)>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    /// Rules for discovery results: ids, owner, MAC, names and key material.
    pub fn discovery() -> Self {
        Self::new(DISCOVERY_RULES.iter().copied())
    }

    /// Rules for the decrypted `encrypt_info` payload.
    fn decrypted_data() -> Self {
        Self::new(DECRYPTED_DATA_RULES.iter().copied())
    }

    /// Returns a redacted copy of `value`.
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, field)| (key.clone(), self.redact_field(key, field)))
                    .collect::<Map<_, _>>(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.redact(item)).collect()),
            other => other.clone(),
        }
    }

    fn redact_field(&self, key: &str, value: &Value) -> Value {
        let empty = match value {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        };
        if empty {
            return value.clone();
        }
        match self.rules.get(key) {
            Some(Some(mask)) => mask(value),
            Some(None) => Value::String(REDACTED.into()),
            None => self.redact(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_discovery_redaction() {
        let input = json!({
            "device_id": "0123456789ABCDEF",
            "owner": "",
            "mac": "AA-BB-CC-DD-EE-FF",
            "ip": "192.168.1.10",
            "encrypt_info": {"sym_schm": "AES", "key": "abc", "data": "def"},
            "decrypted_data": {"connect_ssid": "home", "nested": [{"device_id": "0123456789XYZ"}]},
        });

        let redacted = Redactor::discovery().redact(&input);

        assert_eq!(
            redacted,
            json!({
                "device_id": "REDACTED_9ABCDEF",
                "owner": "",
                "mac": "AA-BB-CC-00-00-00",
                "ip": "192.168.1.10",
                "encrypt_info": {"sym_schm": "AES", "key": "", "data": ""},
                "decrypted_data": {
                    "connect_ssid": "#MASKED_SSID#",
                    "nested": [{"device_id": "REDACTED_9XYZ"}],
                },
            })
        );
        assert_eq!(input["device_id"], "0123456789ABCDEF");
    }

    #[test]
    fn test_rule_without_function() {
        let redactor = Redactor::new([("secret", None)]);
        assert_eq!(
            redactor.redact(&json!({"secret": 42, "list": [{"secret": "x"}]})),
            json!({"secret": REDACTED, "list": [{"secret": REDACTED}]})
        );
    }

    #[test]
    fn test_short_id() {
        assert_eq!(redact_id(&json!("abc")), json!("REDACTED_"));
    }
}
