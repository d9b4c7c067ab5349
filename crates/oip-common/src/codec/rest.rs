//! REST v2 body: a JSON header optionally followed by a binary segment that
//! holds the raw bytes of every tensor flagged with `binary_data_size`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decide_binary, raw};
use crate::datatype::DataType;
use crate::error::{InferError, InferResult};
use crate::infer_type::{
    element_count, InferParameter, InferRequest, InferResponse, InferTensor, Parameters,
    RequestedOutput, TensorData, TensorPayload, BINARY_DATA_SIZE,
};

/// Length of the JSON header when a binary segment follows it.
pub const INFERENCE_HEADER_CONTENT_LENGTH: &str = "inference-header-content-length";

#[derive(Debug, Serialize, Deserialize)]
struct WireTensor {
    name: String,
    datatype: String,
    shape: Vec<i64>,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireRequestedOutput {
    name: String,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    parameters: Parameters,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    parameters: Parameters,
    inputs: Vec<WireTensor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<WireRequestedOutput>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireResponse {
    model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_version: Option<String>,
    #[serde(default)]
    id: String,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    parameters: Parameters,
    outputs: Vec<WireTensor>,
}

/// Cursor over the binary segment. Slices are consumed in tensor order.
struct Segment {
    data: Bytes,
    offset: usize,
}

impl Segment {
    fn take(&mut self, name: &str, len: usize) -> InferResult<Bytes> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                InferError::invalid(format!(
                    "binary_data_size of '{name}' runs past the end of the binary segment"
                ))
            })?;
        let slice = self.data.slice(self.offset..end);
        self.offset = end;
        Ok(slice)
    }

    fn finish(self) -> InferResult<()> {
        let left = self.data.len() - self.offset;
        if left != 0 {
            return Err(InferError::invalid(format!(
                "{left} unconsumed bytes after the last binary tensor"
            )));
        }
        Ok(())
    }
}

fn split_body(body: Bytes, json_header_length: Option<usize>) -> InferResult<(Bytes, Segment)> {
    let header_len = match json_header_length {
        None | Some(0) => body.len(),
        Some(n) if n > body.len() => {
            return Err(InferError::invalid(format!(
                "inference header length {n} exceeds body length {}",
                body.len()
            )))
        }
        Some(n) => n,
    };
    let json = body.slice(..header_len);
    let data = body.slice(header_len..);
    Ok((json, Segment { data, offset: 0 }))
}

fn parse_json<'a, T: Deserialize<'a>>(json: &'a [u8]) -> InferResult<T> {
    serde_json::from_slice(json)
        .map_err(|e| InferError::invalid(format!("unrecognized request format: {e}")))
}

fn flatten<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| flatten(v, out)),
        other => out.push(other),
    }
}

fn convert<T>(
    name: &str,
    datatype: DataType,
    values: &[&Value],
    f: impl Fn(&Value) -> Option<T>,
) -> InferResult<Vec<T>> {
    values
        .iter()
        .map(|v| {
            f(v).ok_or_else(|| {
                InferError::invalid(format!("value {v} of '{name}' is not a valid {datatype}"))
            })
        })
        .collect()
}

fn int<T: TryFrom<i64>>(v: &Value) -> Option<T> {
    v.as_i64().and_then(|x| T::try_from(x).ok())
}

fn uint<T: TryFrom<u64>>(v: &Value) -> Option<T> {
    v.as_u64().and_then(|x| T::try_from(x).ok())
}

/// Convert textual JSON data into typed values of the declared datatype.
pub(crate) fn data_from_json(
    name: &str,
    datatype: DataType,
    data: &Value,
    count: usize,
) -> InferResult<TensorData> {
    let mut flat = Vec::with_capacity(count);
    flatten(data, &mut flat);
    if flat.len() != count {
        return Err(InferError::invalid(format!(
            "'{name}' has {} elements but its shape implies {count}",
            flat.len()
        )));
    }

    let values = &flat[..];
    Ok(match datatype {
        DataType::Fp16 => {
            return Err(InferError::invalid(format!(
                "FP16 tensor '{name}' must be sent as binary data"
            )))
        }
        DataType::Bool => TensorData::Bool(convert(name, datatype, values, Value::as_bool)?),
        DataType::Uint8 => TensorData::Uint8(convert(name, datatype, values, uint)?),
        DataType::Uint16 => TensorData::Uint16(convert(name, datatype, values, uint)?),
        DataType::Uint32 => TensorData::Uint32(convert(name, datatype, values, uint)?),
        DataType::Uint64 => TensorData::Uint64(convert(name, datatype, values, Value::as_u64)?),
        DataType::Int8 => TensorData::Int8(convert(name, datatype, values, int)?),
        DataType::Int16 => TensorData::Int16(convert(name, datatype, values, int)?),
        DataType::Int32 => TensorData::Int32(convert(name, datatype, values, int)?),
        DataType::Int64 => TensorData::Int64(convert(name, datatype, values, Value::as_i64)?),
        DataType::Fp32 => TensorData::Fp32(convert(name, datatype, values, |v| {
            v.as_f64().map(|x| x as f32)
        })?),
        DataType::Fp64 => TensorData::Fp64(convert(name, datatype, values, Value::as_f64)?),
        DataType::Bytes => TensorData::Bytes(convert(name, datatype, values, |v| {
            v.as_str().map(|s| s.as_bytes().to_vec())
        })?),
    })
}

fn decode_tensor(wire: WireTensor, segment: &mut Segment) -> InferResult<InferTensor> {
    let WireTensor {
        name,
        datatype,
        shape,
        mut parameters,
        data,
    } = wire;
    let datatype: DataType = datatype.parse()?;
    let count = element_count(&name, &shape)?;

    let payload = match parameters.remove(BINARY_DATA_SIZE) {
        Some(size) => {
            let size = size
                .as_i64()
                .and_then(|s| usize::try_from(s).ok())
                .ok_or_else(|| {
                    InferError::invalid(format!(
                        "binary_data_size of '{name}' must be a non-negative integer"
                    ))
                })?;
            let slice = segment.take(&name, size)?;
            // validate layout now so malformed bytes never reach a model
            raw::decode_raw(datatype, &slice, count)?;
            TensorPayload::Raw(slice)
        }
        None => {
            let data = data.ok_or_else(|| {
                InferError::invalid(format!(
                    "tensor '{name}' has neither data nor binary_data_size"
                ))
            })?;
            TensorPayload::Data(data_from_json(&name, datatype, &data, count)?)
        }
    };

    Ok(InferTensor {
        name,
        datatype,
        shape,
        parameters,
        payload,
    })
}

/// Accumulates the binary segment while tensors are encoded.
#[derive(Default)]
struct SegmentWriter {
    buf: Vec<u8>,
    used: bool,
}

impl SegmentWriter {
    fn encode_tensor(&mut self, tensor: &InferTensor, binary: bool) -> InferResult<WireTensor> {
        let mut parameters = tensor.parameters.clone();
        parameters.remove(BINARY_DATA_SIZE);

        let data = if binary {
            let bytes = match &tensor.payload {
                TensorPayload::Raw(raw) => raw.clone(),
                TensorPayload::Data(d) => raw::encode_raw(d)?,
            };
            parameters.insert(
                BINARY_DATA_SIZE.to_string(),
                InferParameter::Int64(bytes.len() as i64),
            );
            self.buf.extend_from_slice(&bytes);
            self.used = true;
            None
        } else {
            Some(Value::Array(tensor.data()?.to_json_values()?))
        };

        Ok(WireTensor {
            name: tensor.name.clone(),
            datatype: tensor.datatype.to_string(),
            shape: tensor.shape.clone(),
            parameters,
            data,
        })
    }

    fn finish<T: Serialize>(self, header: &T) -> InferResult<(Vec<u8>, Option<usize>)> {
        let mut json = serde_json::to_vec(header)
            .map_err(|e| InferError::invalid(format!("failed to serialize header: {e}")))?;
        if !self.used {
            return Ok((json, None));
        }
        let header_len = json.len();
        json.extend_from_slice(&self.buf);
        Ok((json, Some(header_len)))
    }
}

pub fn decode_request(body: Bytes, json_header_length: Option<usize>) -> InferResult<InferRequest> {
    let (json, mut segment) = split_body(body, json_header_length)?;
    let wire: WireRequest = parse_json(&json)?;

    let inputs = wire
        .inputs
        .into_iter()
        .map(|t| decode_tensor(t, &mut segment))
        .collect::<InferResult<Vec<_>>>()?;
    segment.finish()?;

    Ok(InferRequest {
        model_name: String::new(),
        model_version: None,
        id: wire.id,
        parameters: wire.parameters,
        inputs,
        request_outputs: wire
            .outputs
            .into_iter()
            .map(|o| RequestedOutput {
                name: o.name,
                parameters: o.parameters,
            })
            .collect(),
    })
}

pub fn decode_response(
    body: Bytes,
    json_header_length: Option<usize>,
) -> InferResult<InferResponse> {
    let (json, mut segment) = split_body(body, json_header_length)?;
    let wire: WireResponse = parse_json(&json)?;

    let outputs = wire
        .outputs
        .into_iter()
        .map(|t| decode_tensor(t, &mut segment))
        .collect::<InferResult<Vec<_>>>()?;
    segment.finish()?;

    Ok(InferResponse {
        model_name: wire.model_name,
        model_version: wire.model_version,
        id: wire.id,
        parameters: wire.parameters,
        outputs,
        request_outputs: Vec::new(),
        use_binary_outputs: false,
    })
}

/// Returns the body and, when a binary segment was appended, the length of
/// the JSON header that precedes it.
pub fn encode_request(request: &InferRequest) -> InferResult<(Vec<u8>, Option<usize>)> {
    let mut writer = SegmentWriter::default();
    let inputs = request
        .inputs
        .iter()
        .map(|t| {
            let binary = decide_binary(t, None, false)?;
            writer.encode_tensor(t, binary)
        })
        .collect::<InferResult<Vec<_>>>()?;

    let wire = WireRequest {
        id: request.id.clone(),
        parameters: request.parameters.clone(),
        inputs,
        outputs: request
            .request_outputs
            .iter()
            .map(|o| WireRequestedOutput {
                name: o.name.clone(),
                parameters: o.parameters.clone(),
            })
            .collect(),
    };
    writer.finish(&wire)
}

pub fn encode_response(response: &InferResponse) -> InferResult<(Vec<u8>, Option<usize>)> {
    let mut writer = SegmentWriter::default();
    let outputs = response
        .outputs
        .iter()
        .map(|t| {
            let requested = response.requested_output(&t.name);
            let binary = decide_binary(t, requested, response.use_binary_outputs)?;
            writer.encode_tensor(t, binary)
        })
        .collect::<InferResult<Vec<_>>>()?;

    let wire = WireResponse {
        model_name: response.model_name.clone(),
        model_version: response.model_version.clone(),
        id: response.id.clone(),
        parameters: response.parameters.clone(),
        outputs,
    };
    writer.finish(&wire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer_type::{InferParameter, BINARY_DATA, BINARY_DATA_OUTPUT};
    use half::f16;
    use serde_json::json;

    fn body_with_segment(header: Value, segment: &[u8]) -> (Bytes, usize) {
        let mut body = serde_json::to_vec(&header).unwrap();
        let len = body.len();
        body.extend_from_slice(segment);
        (Bytes::from(body), len)
    }

    #[test]
    fn test_decode_textual_nested_data() {
        let body = json!({
            "id": "req-1",
            "inputs": [{"name": "x", "datatype": "INT32", "shape": [2, 2], "data": [[1, 2], [3, 4]]}]
        });
        let req = decode_request(Bytes::from(body.to_string()), None).unwrap();
        assert_eq!(req.id.as_deref(), Some("req-1"));
        assert_eq!(
            req.inputs[0].payload,
            TensorPayload::Data(TensorData::Int32(vec![1, 2, 3, 4]))
        );
    }

    #[test]
    fn test_decode_binary_slices_in_order() {
        let a = raw::encode_raw(&TensorData::Fp32(vec![1.0, 2.0])).unwrap();
        let b = raw::encode_raw(&TensorData::Bytes(vec![b"hi".to_vec()])).unwrap();
        let mut segment = a.to_vec();
        segment.extend_from_slice(&b);
        let (body, len) = body_with_segment(
            json!({"inputs": [
                {"name": "a", "datatype": "FP32", "shape": [2], "parameters": {"binary_data_size": 8}},
                {"name": "t", "datatype": "INT64", "shape": [1], "data": [7]},
                {"name": "b", "datatype": "BYTES", "shape": [1], "parameters": {"binary_data_size": 6}}
            ]}),
            &segment,
        );

        let req = decode_request(body, Some(len)).unwrap();
        assert_eq!(req.inputs[0].payload, TensorPayload::Raw(a));
        assert!(req.inputs[0].parameters.get(BINARY_DATA_SIZE).is_none());
        assert_eq!(
            req.inputs[1].payload,
            TensorPayload::Data(TensorData::Int64(vec![7]))
        );
        assert_eq!(
            req.inputs[2].data().unwrap(),
            TensorData::Bytes(vec![b"hi".to_vec()])
        );
    }

    #[test]
    fn test_decode_byte_accounting() {
        let header = json!({"inputs": [
            {"name": "a", "datatype": "INT8", "shape": [2], "parameters": {"binary_data_size": 2}}
        ]});

        // trailing byte
        let (body, len) = body_with_segment(header.clone(), &[1, 2, 3]);
        assert!(matches!(decode_request(body, Some(len)), Err(InferError::InvalidInput(_))));

        // slice past the end
        let (body, len) = body_with_segment(header.clone(), &[1]);
        assert!(matches!(decode_request(body, Some(len)), Err(InferError::InvalidInput(_))));

        // header length longer than body
        let (body, len) = body_with_segment(header, &[1, 2]);
        assert!(decode_request(body, Some(len + 10)).is_err());
    }

    #[test]
    fn test_decode_rejects_textual_fp16() {
        let body = json!({"inputs": [{"name": "h", "datatype": "FP16", "shape": [1], "data": [1.0]}]});
        let err = decode_request(Bytes::from(body.to_string()), None).unwrap_err();
        assert!(matches!(err, InferError::InvalidInput(_)));
    }

    #[test]
    fn test_decode_validates_values() {
        let out_of_range =
            json!({"inputs": [{"name": "u", "datatype": "UINT8", "shape": [1], "data": [300]}]});
        assert!(decode_request(Bytes::from(out_of_range.to_string()), None).is_err());

        let wrong_count =
            json!({"inputs": [{"name": "u", "datatype": "INT32", "shape": [3], "data": [1, 2]}]});
        assert!(decode_request(Bytes::from(wrong_count.to_string()), None).is_err());

        let no_data = json!({"inputs": [{"name": "u", "datatype": "INT32", "shape": [1]}]});
        assert!(decode_request(Bytes::from(no_data.to_string()), None).is_err());

        let bad_type = json!({"inputs": [{"name": "u", "datatype": "INT3", "shape": [1], "data": [1]}]});
        assert!(decode_request(Bytes::from(bad_type.to_string()), None).is_err());

        assert!(decode_request(Bytes::from_static(b"{not json"), None).is_err());
    }

    #[test]
    fn test_round_trip_mixed_tensors() {
        let halfs = vec![f16::from_f32(0.5), f16::from_f32(2.0)];
        let request = InferRequest {
            model_name: String::new(),
            id: Some("r".into()),
            inputs: vec![
                InferTensor::from_raw(
                    "fp16",
                    DataType::Fp16,
                    vec![2],
                    raw::encode_raw(&TensorData::Fp16(halfs)).unwrap(),
                ),
                InferTensor::new("text", vec![2], TensorData::Bytes(vec![b"a".to_vec(), b"bc".to_vec()])),
                InferTensor::from_raw(
                    "blob",
                    DataType::Bytes,
                    vec![1],
                    raw::encode_raw(&TensorData::Bytes(vec![vec![0, 159, 146]])).unwrap(),
                )
                .with_parameter(BINARY_DATA, true),
                InferTensor::new("ints", vec![1, 3], TensorData::Int64(vec![1, -2, 3])),
                InferTensor::new("half", vec![1], TensorData::Fp16(vec![f16::from_f32(-1.5)])),
                InferTensor::new("flagged", vec![2], TensorData::Int32(vec![9, 10]))
                    .with_parameter(BINARY_DATA, true),
            ],
            ..Default::default()
        };

        let (body, header_len) = encode_request(&request).unwrap();
        assert!(header_len.is_some());
        let decoded = decode_request(Bytes::from(body), header_len).unwrap();
        assert!(decoded.inputs[5].is_raw());
        assert!(!decoded.inputs[3].is_raw());
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_unflagged_raw_output_goes_out_as_json() {
        let raw = raw::encode_raw(&TensorData::Int32(vec![3, 4])).unwrap();
        let response = InferResponse::new(
            "m",
            "1",
            vec![InferTensor::from_raw("y", DataType::Int32, vec![2], raw)],
        );
        let (body, header_len) = encode_response(&response).unwrap();
        assert_eq!(header_len, None);
        let header: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(header["outputs"][0]["data"], json!([3, 4]));
        assert!(header["outputs"][0].get("parameters").is_none());
    }

    #[test]
    fn test_encode_binary_precedence() {
        let out = |name: &str| InferTensor::new(name, vec![1], TensorData::Int32(vec![5]));
        let mut response = InferResponse::new(
            "m",
            "1",
            vec![
                out("requested_text"),
                out("tensor_flag").with_parameter(BINARY_DATA, true),
                out("default"),
            ],
        );
        response.request_outputs = vec![RequestedOutput::binary("requested_text", false)];
        response.use_binary_outputs = true;
        // the requested output wins over the tensor's own flag
        response.outputs[0]
            .parameters
            .insert(BINARY_DATA.into(), InferParameter::Bool(true));

        let (body, header_len) = encode_response(&response).unwrap();
        let header_len = header_len.unwrap();
        let header: Value = serde_json::from_slice(&body[..header_len]).unwrap();
        let outputs = header["outputs"].as_array().unwrap();
        assert_eq!(outputs[0]["data"], json!([5]));
        assert_eq!(outputs[1]["parameters"][BINARY_DATA_SIZE], json!(4));
        assert_eq!(outputs[2]["parameters"][BINARY_DATA_SIZE], json!(4));
        assert_eq!(body.len(), header_len + 8);
    }

    #[test]
    fn test_encode_textual_only_has_no_segment() {
        let response = InferResponse::new(
            "m",
            "1",
            vec![InferTensor::new("y", vec![2], TensorData::Fp64(vec![0.5, 1.5]))],
        );
        let (body, header_len) = encode_response(&response).unwrap();
        assert_eq!(header_len, None);
        let header: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(header["outputs"][0]["data"], json!([0.5, 1.5]));
        assert_eq!(header["model_name"], json!("m"));
    }

    #[test]
    fn test_encode_fp16_forced_binary() {
        let fp16 = InferTensor::new("h", vec![1], TensorData::Fp16(vec![f16::from_f32(1.0)]));
        let response = InferResponse::new("m", "1", vec![fp16.clone()]);
        let (_, header_len) = encode_response(&response).unwrap();
        assert!(header_len.is_some());

        let mut explicit_text = InferResponse::new("m", "1", vec![fp16]);
        explicit_text.request_outputs = vec![RequestedOutput::binary("h", false)];
        assert!(matches!(
            encode_response(&explicit_text),
            Err(InferError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_decode_keeps_request_default() {
        let body = json!({
            "parameters": {BINARY_DATA_OUTPUT: true},
            "inputs": [{"name": "x", "datatype": "BOOL", "shape": [1], "data": [true]}],
            "outputs": [{"name": "y", "parameters": {"binary_data": false}}]
        });
        let req = decode_request(Bytes::from(body.to_string()), None).unwrap();
        assert!(req.binary_data_output());
        assert_eq!(req.request_outputs[0].binary_data_flag(), Some(false));
    }
}
