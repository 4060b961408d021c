//! Helpers shared by the channel transports.

use serde_json::Value;

/// Longest provider response kept in a delivery log's `last_error`.
pub const MAX_ERROR_LENGTH: usize = 500;

/// Truncates on a char boundary at or below `max_len` bytes.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

/// Replaces secret values in a channel configuration with `"***"`.
///
/// Matches keys containing password, token, secret, api_key or credentials,
/// at any depth.
pub fn redact_sensitive_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let redacted = map
                .iter()
                .map(|(key, val)| {
                    let val = if is_sensitive_key(key) {
                        Value::String("***".to_string())
                    } else {
                        redact_sensitive_json(val)
                    };
                    (key.clone(), val)
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_json).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    ["password", "passwd", "token", "secret", "api_key", "apikey", "credentials"]
        .iter()
        .any(|needle| key.contains(needle))
}

/// Masks all but the last four characters of an address for logging.
pub fn mask_recipient(recipient: &str) -> String {
    let count = recipient.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = recipient.chars().skip(count - 4).collect();
    format!("{}{tail}", "*".repeat(count - 4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello world", 5), "hello... [truncated]");
        assert_eq!(truncate_string("héllo", 2), "h... [truncated]");
    }

    #[test]
    fn test_redact_sensitive_json() {
        let json = serde_json::json!({
            "smtp_username": "alerts",
            "smtp_password": "secret123",
            "api_key": "abc123",
            "smtp_host": "smtp.example.com",
            "nested": {
                "access_token": "xyz789",
                "public_value": "visible"
            }
        });

        let redacted = redact_sensitive_json(&json);
        assert_eq!(redacted["smtp_username"], "alerts");
        assert_eq!(redacted["smtp_password"], "***");
        assert_eq!(redacted["api_key"], "***");
        assert_eq!(redacted["smtp_host"], "smtp.example.com");
        assert_eq!(redacted["nested"]["access_token"], "***");
        assert_eq!(redacted["nested"]["public_value"], "visible");
    }

    #[test]
    fn test_mask_recipient() {
        assert_eq!(mask_recipient("+15550001234"), "********1234");
        assert_eq!(mask_recipient("abc"), "***");
    }
}
