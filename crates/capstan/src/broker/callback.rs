//! Request/response encoding contracts: percent-encoded query strings, the
//! single-parameter `encoded=` link wrapper, and the HTTP form-post callback.

use crate::errors::CapstanError;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;
use url::form_urlencoded;

const URL_SCHEMA: &str = "url:";

/// Percent-encode `key=value` pairs joined by `&`.
pub fn serialize_params<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut ser = form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        ser.append_pair(k, v);
    }
    ser.finish()
}

pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Wrap a full request query string as one opaque `encoded=` parameter, for
/// clients that prefer handing around a single link value.
pub fn encode_intent_link(query: &str) -> String {
    serialize_params([("encoded", query)])
}

fn form_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other @ (Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::Array(_)
        | Value::Object(_)) => other.to_string(),
    }
}

/// POST the response fields to the caller-supplied callback endpoint as an
/// HTML-form-compatible body. This path never notifies the opener: the
/// caller's server receives the result instead. Fire-and-forget by design —
/// a non-2xx status from the endpoint is the caller's problem, not ours.
pub async fn post_callback(
    http: &reqwest::Client,
    callback: &str,
    fields: &BTreeMap<String, Value>,
) -> Result<(), CapstanError> {
    let Some(endpoint) = callback.strip_prefix(URL_SCHEMA) else {
        return Err(CapstanError::UnsupportedCallbackSchema(callback.to_owned()));
    };

    let form: Vec<(String, String)> = fields
        .iter()
        .map(|(k, v)| (k.clone(), form_value(v)))
        .collect();

    debug!(endpoint, "posting intent response to callback");
    http.post(endpoint)
        .form(&form)
        .send()
        .await
        .map_err(|_e| CapstanError::NetworkError)?;
    Ok(())
}
