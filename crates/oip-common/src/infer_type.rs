use std::collections::BTreeMap;

use bytes::Bytes;
use half::f16;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datatype::DataType;
use crate::error::{InferError, InferResult};

/// Size of a tensor's slice in the appended binary segment.
pub const BINARY_DATA_SIZE: &str = "binary_data_size";
/// Per-tensor / per-output request for binary encoding.
pub const BINARY_DATA: &str = "binary_data";
/// Request-level default for binary encoding of every output.
pub const BINARY_DATA_OUTPUT: &str = "binary_data_output";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InferParameter {
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
}

impl InferParameter {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            InferParameter::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            InferParameter::Int64(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for InferParameter {
    fn from(v: bool) -> Self {
        InferParameter::Bool(v)
    }
}

impl From<i64> for InferParameter {
    fn from(v: i64) -> Self {
        InferParameter::Int64(v)
    }
}

impl From<&str> for InferParameter {
    fn from(v: &str) -> Self {
        InferParameter::String(v.to_string())
    }
}

pub type Parameters = BTreeMap<String, InferParameter>;

/// Flat, row-major tensor values. `Json` only carries the instances of the
/// legacy v1 form and never travels as a v2 binary tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Bool(Vec<bool>),
    Uint8(Vec<u8>),
    Uint16(Vec<u16>),
    Uint32(Vec<u32>),
    Uint64(Vec<u64>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Fp16(Vec<f16>),
    Fp32(Vec<f32>),
    Fp64(Vec<f64>),
    Bytes(Vec<Vec<u8>>),
    Json(Vec<Value>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Bool(v) => v.len(),
            TensorData::Uint8(v) => v.len(),
            TensorData::Uint16(v) => v.len(),
            TensorData::Uint32(v) => v.len(),
            TensorData::Uint64(v) => v.len(),
            TensorData::Int8(v) => v.len(),
            TensorData::Int16(v) => v.len(),
            TensorData::Int32(v) => v.len(),
            TensorData::Int64(v) => v.len(),
            TensorData::Fp16(v) => v.len(),
            TensorData::Fp32(v) => v.len(),
            TensorData::Fp64(v) => v.len(),
            TensorData::Bytes(v) => v.len(),
            TensorData::Json(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn datatype(&self) -> DataType {
        match self {
            TensorData::Bool(_) => DataType::Bool,
            TensorData::Uint8(_) => DataType::Uint8,
            TensorData::Uint16(_) => DataType::Uint16,
            TensorData::Uint32(_) => DataType::Uint32,
            TensorData::Uint64(_) => DataType::Uint64,
            TensorData::Int8(_) => DataType::Int8,
            TensorData::Int16(_) => DataType::Int16,
            TensorData::Int32(_) => DataType::Int32,
            TensorData::Int64(_) => DataType::Int64,
            TensorData::Fp16(_) => DataType::Fp16,
            TensorData::Fp32(_) => DataType::Fp32,
            TensorData::Fp64(_) => DataType::Fp64,
            TensorData::Bytes(_) | TensorData::Json(_) => DataType::Bytes,
        }
    }

    /// Render the values as JSON. BYTES elements must be valid UTF-8 since
    /// JSON has no byte-string type.
    pub fn to_json_values(&self) -> InferResult<Vec<Value>> {
        fn collect<T: Copy + Into<Value>>(v: &[T]) -> Vec<Value> {
            v.iter().map(|x| (*x).into()).collect()
        }
        Ok(match self {
            TensorData::Bool(v) => collect(v),
            TensorData::Uint8(v) => collect(v),
            TensorData::Uint16(v) => collect(v),
            TensorData::Uint32(v) => collect(v),
            TensorData::Uint64(v) => collect(v),
            TensorData::Int8(v) => collect(v),
            TensorData::Int16(v) => collect(v),
            TensorData::Int32(v) => collect(v),
            TensorData::Int64(v) => collect(v),
            TensorData::Fp16(v) => v.iter().map(|x| Value::from(x.to_f32())).collect(),
            TensorData::Fp32(v) => collect(v),
            TensorData::Fp64(v) => collect(v),
            TensorData::Bytes(v) => v
                .iter()
                .map(|b| {
                    std::str::from_utf8(b)
                        .map(|s| Value::String(s.to_string()))
                        .map_err(|_| {
                            InferError::invalid(
                                "BYTES element is not valid UTF-8; request binary_data to send it",
                            )
                        })
                })
                .collect::<InferResult<Vec<_>>>()?,
            TensorData::Json(v) => v.clone(),
        })
    }
}

/// Tensor payload: typed values, or a raw little-endian buffer. A raw buffer
/// is what a binary-encoded tensor decodes to.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorPayload {
    Data(TensorData),
    Raw(Bytes),
}

/// A named, typed, shaped tensor. Inputs and outputs share the layout.
///
/// Equality compares element values, so a raw buffer equals the typed data
/// it encodes.
#[derive(Debug, Clone)]
pub struct InferTensor {
    pub name: String,
    pub datatype: DataType,
    pub shape: Vec<i64>,
    pub parameters: Parameters,
    pub payload: TensorPayload,
}

impl PartialEq for InferTensor {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name
            || self.datatype != other.datatype
            || self.shape != other.shape
            || self.parameters != other.parameters
        {
            return false;
        }
        match (&self.payload, &other.payload) {
            (TensorPayload::Data(a), TensorPayload::Data(b)) => a == b,
            (TensorPayload::Raw(a), TensorPayload::Raw(b)) => a == b,
            _ => match (self.data(), other.data()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
        }
    }
}

pub type InferInput = InferTensor;
pub type InferOutput = InferTensor;

impl InferTensor {
    pub fn new(name: impl Into<String>, shape: Vec<i64>, data: TensorData) -> Self {
        Self {
            name: name.into(),
            datatype: data.datatype(),
            shape,
            parameters: Parameters::new(),
            payload: TensorPayload::Data(data),
        }
    }

    pub fn from_raw(
        name: impl Into<String>,
        datatype: DataType,
        shape: Vec<i64>,
        raw: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            datatype,
            shape,
            parameters: Parameters::new(),
            payload: TensorPayload::Raw(raw.into()),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<InferParameter>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// Number of elements implied by `shape`.
    pub fn element_count(&self) -> InferResult<usize> {
        element_count(&self.name, &self.shape)
    }

    pub fn is_raw(&self) -> bool {
        matches!(self.payload, TensorPayload::Raw(_))
    }

    /// Explicit `binary_data` request carried on the tensor itself.
    pub fn binary_data_flag(&self) -> Option<bool> {
        self.parameters.get(BINARY_DATA).and_then(InferParameter::as_bool)
    }

    /// Typed view of the payload, decoding a raw buffer when necessary.
    pub fn data(&self) -> InferResult<TensorData> {
        match &self.payload {
            TensorPayload::Data(d) => Ok(d.clone()),
            TensorPayload::Raw(raw) => {
                crate::codec::raw::decode_raw(self.datatype, raw, self.element_count()?)
            }
        }
    }
}

pub fn element_count(name: &str, shape: &[i64]) -> InferResult<usize> {
    shape.iter().try_fold(1usize, |acc, &d| {
        if d < 0 {
            return Err(InferError::invalid(format!(
                "shape of '{name}' contains negative dimension {d}"
            )));
        }
        acc.checked_mul(d as usize).ok_or_else(|| {
            InferError::invalid(format!("element count of '{name}' overflows"))
        })
    })
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestedOutput {
    pub name: String,
    pub parameters: Parameters,
}

impl RequestedOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn binary(name: impl Into<String>, binary: bool) -> Self {
        let mut out = Self::new(name);
        out.parameters
            .insert(BINARY_DATA.to_string(), InferParameter::Bool(binary));
        out
    }

    pub fn binary_data_flag(&self) -> Option<bool> {
        self.parameters.get(BINARY_DATA).and_then(InferParameter::as_bool)
    }
}

/// Protocol-neutral inference request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InferRequest {
    pub model_name: String,
    pub model_version: Option<String>,
    pub id: Option<String>,
    pub parameters: Parameters,
    pub inputs: Vec<InferInput>,
    pub request_outputs: Vec<RequestedOutput>,
}

impl InferRequest {
    pub fn new(model_name: impl Into<String>, inputs: Vec<InferInput>) -> Self {
        Self {
            model_name: model_name.into(),
            inputs,
            ..Default::default()
        }
    }

    /// Request-level default asking for every output in binary form.
    pub fn binary_data_output(&self) -> bool {
        self.parameters
            .get(BINARY_DATA_OUTPUT)
            .and_then(InferParameter::as_bool)
            .unwrap_or(false)
    }
}

/// Protocol-neutral inference response.
///
/// `request_outputs` and `use_binary_outputs` are encoding hints copied from
/// the request; they are never serialized.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InferResponse {
    pub model_name: String,
    pub model_version: Option<String>,
    pub id: String,
    pub parameters: Parameters,
    pub outputs: Vec<InferOutput>,
    pub request_outputs: Vec<RequestedOutput>,
    pub use_binary_outputs: bool,
}

impl InferResponse {
    pub fn new(
        model_name: impl Into<String>,
        id: impl Into<String>,
        outputs: Vec<InferOutput>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            id: id.into(),
            outputs,
            ..Default::default()
        }
    }

    pub fn requested_output(&self, name: &str) -> Option<&RequestedOutput> {
        self.request_outputs.iter().find(|o| o.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorMetadata {
    pub name: String,
    pub datatype: String,
    /// Variable-size dimensions are -1.
    pub shape: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub inputs: Vec<TensorMetadata>,
    #[serde(default)]
    pub outputs: Vec<TensorMetadata>,
}

impl ModelMetadata {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: Vec::new(),
            platform: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub name: String,
    pub version: String,
    pub extensions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_untagged() {
        let p: Parameters = serde_json::from_str(
            r#"{"binary_data": true, "best_of": 3, "temperature": 0.5, "tag": "x"}"#,
        )
        .unwrap();
        assert_eq!(p["binary_data"], InferParameter::Bool(true));
        assert_eq!(p["best_of"], InferParameter::Int64(3));
        assert_eq!(p["temperature"], InferParameter::Double(0.5));
        assert_eq!(p["tag"], InferParameter::String("x".into()));
    }

    #[test]
    fn test_element_count() {
        assert_eq!(element_count("t", &[2, 3, 4]).unwrap(), 24);
        assert_eq!(element_count("t", &[]).unwrap(), 1);
        assert_eq!(element_count("t", &[4, 0]).unwrap(), 0);
        assert!(element_count("t", &[2, -1]).is_err());
        assert!(element_count("t", &[i64::MAX, i64::MAX]).is_err());
    }

    #[test]
    fn test_bytes_to_json_requires_utf8() {
        let ok = TensorData::Bytes(vec![b"cat".to_vec()]);
        assert_eq!(ok.to_json_values().unwrap(), vec![Value::from("cat")]);

        let bad = TensorData::Bytes(vec![vec![0xff, 0xfe]]);
        assert!(matches!(bad.to_json_values(), Err(InferError::InvalidInput(_))));
    }

    #[test]
    fn test_raw_equals_its_typed_data() {
        let typed = InferTensor::new("x", vec![2], TensorData::Int32(vec![7, -1]));
        let raw = crate::codec::raw::encode_raw(&TensorData::Int32(vec![7, -1])).unwrap();
        let from_raw = InferTensor::from_raw("x", DataType::Int32, vec![2], raw);
        assert_eq!(typed, from_raw);

        let other = InferTensor::new("x", vec![2], TensorData::Int32(vec![7, 1]));
        assert_ne!(other, from_raw);

        let short = InferTensor::from_raw("x", DataType::Int32, vec![2], vec![0u8; 3]);
        assert_ne!(typed, short);
    }

    #[test]
    fn test_binary_output_default() {
        let mut req = InferRequest::new("m", vec![]);
        assert!(!req.binary_data_output());
        req.parameters
            .insert(BINARY_DATA_OUTPUT.to_string(), InferParameter::Bool(true));
        assert!(req.binary_data_output());
    }
}
