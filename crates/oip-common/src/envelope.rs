//! CloudEvents envelope for REST bodies, in binary mode (`ce-*` headers plus
//! a raw body) and structured mode (a single JSON document).

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{InferError, InferResult};

pub const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";
pub const SPEC_VERSION: &str = "1.0";
pub const DEFAULT_EVENT_TYPE: &str = "io.kserve.inference.response";
pub const DEFAULT_SOURCE_PREFIX: &str = "io.kserve.inference.";

const HEADER_PREFIX: &str = "ce-";
const REQUIRED: [&str; 4] = ["id", "source", "type", "specversion"];

pub type Attributes = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeMode {
    Binary,
    Structured,
}

/// Outcome of unwrapping a request body. `mode` is `None` when the body was
/// not enveloped, in which case `payload` is the body untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEnvelope {
    pub mode: Option<EnvelopeMode>,
    pub payload: Bytes,
    pub payload_content_type: Option<String>,
    pub attributes: Attributes,
}

/// Response envelope overrides, fixed at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeConfig {
    pub source: Option<String>,
    pub event_type: Option<String>,
    /// Copy the request's attributes into the response before the response
    /// fields are applied.
    pub merge: bool,
}

impl EnvelopeConfig {
    /// Reads `CE_SOURCE`, `CE_TYPE` and `CE_MERGE`.
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            source: non_empty("CE_SOURCE"),
            event_type: non_empty("CE_TYPE"),
            merge: non_empty("CE_MERGE").is_some_and(|v| parse_flag(&v)),
        }
    }
}

pub fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == JSON_CONTENT_TYPE || essence.ends_with("+json")
}

/// True when every required attribute header is present.
pub fn has_binary_headers(headers: &HeaderMap) -> bool {
    REQUIRED
        .iter()
        .all(|attr| headers.contains_key(format!("{HEADER_PREFIX}{attr}").as_str()))
}

pub fn is_structured(headers: &HeaderMap) -> bool {
    header_str(headers, CONTENT_TYPE.as_str())
        .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with(STRUCTURED_CONTENT_TYPE))
}

pub fn decode(headers: &HeaderMap, body: Bytes) -> InferResult<DecodedEnvelope> {
    if is_structured(headers) {
        return decode_structured(body);
    }
    if has_binary_headers(headers) {
        return decode_binary(headers, body);
    }
    Ok(DecodedEnvelope {
        mode: None,
        payload: body,
        payload_content_type: header_str(headers, CONTENT_TYPE.as_str()).map(str::to_string),
        attributes: Attributes::new(),
    })
}

fn decode_binary(headers: &HeaderMap, body: Bytes) -> InferResult<DecodedEnvelope> {
    let mut attributes = Attributes::new();
    for (name, value) in headers {
        let Some(attr) = name.as_str().strip_prefix(HEADER_PREFIX) else {
            continue;
        };
        let value = value.to_str().map_err(|_| {
            InferError::invalid(format!("cloudevent header '{name}' is not valid text"))
        })?;
        attributes.insert(attr.to_string(), Value::String(value.to_string()));
    }

    let content_type = header_str(headers, CONTENT_TYPE.as_str()).map(str::to_string);
    if content_type.as_deref().is_some_and(is_json_content_type) {
        serde_json::from_slice::<Value>(&body).map_err(|e| {
            InferError::invalid(format!("Failed to decode or parse binary json cloudevent: {e}"))
        })?;
    }

    Ok(DecodedEnvelope {
        mode: Some(EnvelopeMode::Binary),
        payload: body,
        payload_content_type: content_type,
        attributes,
    })
}

fn decode_structured(body: Bytes) -> InferResult<DecodedEnvelope> {
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| InferError::invalid(format!("malformed structured cloudevent: {e}")))?;
    let Value::Object(mut attributes) = value else {
        return Err(InferError::invalid("structured cloudevent must be a JSON object"));
    };
    for attr in REQUIRED {
        if !matches!(attributes.get(attr), Some(Value::String(_))) {
            return Err(InferError::invalid(format!(
                "cloudevent is missing required attribute '{attr}'"
            )));
        }
    }

    let payload = match attributes.remove("data") {
        Some(data) => serde_json::to_vec(&data)
            .map_err(|e| InferError::invalid(format!("invalid cloudevent data: {e}")))?,
        None => Vec::new(),
    };
    let payload_content_type = match attributes.get("datacontenttype") {
        Some(Value::String(ct)) => ct.clone(),
        _ => JSON_CONTENT_TYPE.to_string(),
    };

    Ok(DecodedEnvelope {
        mode: Some(EnvelopeMode::Structured),
        payload: Bytes::from(payload),
        payload_content_type: Some(payload_content_type),
        attributes,
    })
}

/// Build the response envelope. Response-side attributes always win over
/// merged request attributes.
pub fn encode(
    config: &EnvelopeConfig,
    model_name: &str,
    mode: EnvelopeMode,
    request_attributes: &Attributes,
    payload: Bytes,
    payload_content_type: &str,
) -> InferResult<(HeaderMap, Bytes)> {
    let mut attributes = if config.merge {
        request_attributes.clone()
    } else {
        Attributes::new()
    };
    let source = config
        .source
        .clone()
        .unwrap_or_else(|| format!("{DEFAULT_SOURCE_PREFIX}{model_name}"));
    let event_type = config
        .event_type
        .clone()
        .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());

    attributes.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
    attributes.insert("specversion".into(), Value::String(SPEC_VERSION.into()));
    attributes.insert(
        "time".into(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    attributes.insert("source".into(), Value::String(source));
    attributes.insert("type".into(), Value::String(event_type));

    match mode {
        EnvelopeMode::Binary => encode_binary(attributes, payload, payload_content_type),
        EnvelopeMode::Structured => encode_structured(attributes, payload, payload_content_type),
    }
}

fn encode_binary(
    attributes: Attributes,
    payload: Bytes,
    payload_content_type: &str,
) -> InferResult<(HeaderMap, Bytes)> {
    let mut headers = HeaderMap::new();
    for (attr, value) in attributes {
        if attr == "datacontenttype" {
            continue;
        }
        let text = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let name = HeaderName::try_from(format!("{HEADER_PREFIX}{attr}"))
            .map_err(|_| InferError::invalid(format!("invalid cloudevent attribute '{attr}'")))?;
        let value = HeaderValue::try_from(text).map_err(|_| {
            InferError::invalid(format!("cloudevent attribute '{attr}' is not header-safe"))
        })?;
        headers.insert(name, value);
    }
    let content_type = HeaderValue::try_from(payload_content_type)
        .map_err(|_| InferError::invalid("invalid payload content type"))?;
    headers.insert(CONTENT_TYPE, content_type);
    Ok((headers, payload))
}

fn encode_structured(
    mut attributes: Attributes,
    payload: Bytes,
    payload_content_type: &str,
) -> InferResult<(HeaderMap, Bytes)> {
    if !is_json_content_type(payload_content_type) {
        return Err(InferError::invalid(
            "a structured cloudevent cannot carry binary tensor data",
        ));
    }
    let data: Value = serde_json::from_slice(&payload)
        .map_err(|e| InferError::invalid(format!("response payload is not JSON: {e}")))?;
    attributes.insert(
        "datacontenttype".into(),
        Value::String(payload_content_type.to_string()),
    );
    attributes.insert("data".into(), data);

    let body = serde_json::to_vec(&Value::Object(attributes))
        .map_err(|e| InferError::invalid(format!("failed to serialize cloudevent: {e}")))?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(STRUCTURED_CONTENT_TYPE));
    Ok((headers, Bytes::from(body)))
}
