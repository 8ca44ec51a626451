use eyre::Context as _;
use serde_json::{Map, Value};
use std::{fs::OpenOptions, io::Write as _, path::Path};

// Standardize audit log shape. Fields may be null depending on the event type.
// Request params and key material are never logged.
const REQUIRED_KEYS: [&str; 6] = ["ts", "intent", "app_origin", "email", "result", "error_code"];

pub fn utc_now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn normalize_entry(v: Value) -> Value {
    let mut obj = match v {
        Value::Object(m) => m,
        other @ (Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Array(_)) => {
            let mut m = Map::new();
            m.insert("raw".to_owned(), other);
            m
        }
    };

    if !obj.contains_key("ts") {
        obj.insert("ts".to_owned(), Value::String(utc_now_iso()));
    }

    // Ensure required keys exist (null if unknown for the event).
    for k in REQUIRED_KEYS {
        if !obj.contains_key(k) {
            obj.insert(k.to_owned(), Value::Null);
        }
    }

    Value::Object(obj)
}

pub fn append_entry(path: &Path, entry: &Value) -> eyre::Result<()> {
    let entry = normalize_entry(entry.clone());
    if let Some(parent) = path.parent() {
        crate::fsutil::ensure_private_dir(parent)?;
    }
    let mut f = {
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            OpenOptions::new()
                .create(true)
                .append(true)
                .mode(0o600)
                .open(path)
                .context("open audit log")?
        }
        #[cfg(not(unix))]
        {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context("open audit log")?
        }
    };
    writeln!(f, "{entry}").context("write audit log")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_missing_fields_to_null() {
        let v = normalize_entry(serde_json::json!({"intent": "sign_msg", "result": "confirmed"}));
        assert_eq!(v.get("intent").and_then(Value::as_str), Some("sign_msg"));
        assert_eq!(v.get("app_origin"), Some(&Value::Null));
        assert_eq!(v.get("error_code"), Some(&Value::Null));
        assert!(v.get("ts").and_then(Value::as_str).is_some());
    }

    #[test]
    fn wraps_non_object_entries() {
        let v = normalize_entry(Value::String("oops".into()));
        assert_eq!(v.get("raw").and_then(Value::as_str), Some("oops"));
    }
}
