//! 渠道公共工具：字符串截断与配置脱敏。

use serde_json::Value;

/// 入库的请求/响应正文最大长度
pub const MAX_BODY_LENGTH: usize = 4000;

/// 键名中出现以下子串即视为敏感字段
const SENSITIVE_KEY_PARTS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "token",
    "secret",
    "routing_key",
    "api_key",
    "apikey",
    "credentials",
];

/// 截断到 `max_len` 字节以内，回退到字符边界避免切断多字节字符。
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

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEY_PARTS.iter().any(|part| lower.contains(part))
}

/// 递归脱敏 JSON 配置：敏感字段的值替换为 `"***"`，其余原样保留。
pub fn redact_sensitive_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    let redacted = if is_sensitive_key(key) {
                        Value::String("***".to_string())
                    } else if val.is_object() || val.is_array() {
                        redact_sensitive_json(val)
                    } else {
                        val.clone()
                    };
                    (key.clone(), redacted)
                })
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.iter().map(redact_sensitive_json).collect()),
        _ => value.clone(),
    }
}

/// 对 JSON 字符串脱敏；解析失败时原样返回。
pub fn redact_json_string(json_str: &str) -> String {
    match serde_json::from_str::<Value>(json_str) {
        Ok(value) => serde_json::to_string(&redact_sensitive_json(&value))
            .unwrap_or_else(|_| json_str.to_string()),
        Err(_) => json_str.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello world", 5), "hello... [truncated]");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "延迟过高延迟过高";
        let truncated = truncate_string(s, 4);
        assert!(truncated.ends_with("... [truncated]"));
        assert!(truncated.starts_with('延'));
    }

    #[test]
    fn test_redact_sensitive_json() {
        let json = serde_json::json!({
            "webhook_url": "https://hooks.slack.com/services/T0/B0/x",
            "smtp_password": "secret123",
            "routing_key": "pd-key-123",
            "smtp_host": "smtp.example.com",
            "nested": {
                "access_token": "xyz789",
                "public_value": "visible"
            }
        });

        let redacted = redact_sensitive_json(&json);
        assert_eq!(redacted["webhook_url"], "https://hooks.slack.com/services/T0/B0/x");
        assert_eq!(redacted["smtp_password"], "***");
        assert_eq!(redacted["routing_key"], "***");
        assert_eq!(redacted["smtp_host"], "smtp.example.com");
        assert_eq!(redacted["nested"]["access_token"], "***");
        assert_eq!(redacted["nested"]["public_value"], "visible");
    }

    #[test]
    fn test_redact_json_string() {
        let json_str = r#"{"from":"ops@example.com","smtp_password":"secret"}"#;
        let redacted = redact_json_string(json_str);
        assert!(redacted.contains("ops@example.com"));
        assert!(redacted.contains("***"));
        assert!(!redacted.contains("secret"));
    }
}
