//! Conversions between the protocol-neutral types and the RPC messages.
//!
//! `raw_*_contents` are index-aligned with the tensor list, so once any
//! tensor needs binary form every tensor is emitted raw.

use std::collections::HashMap;

use bytes::Bytes;

use super::{decide_binary, raw};
use crate::datatype::DataType;
use crate::error::{InferError, InferResult};
use crate::infer_type::{
    element_count, InferParameter, InferRequest, InferResponse, InferTensor, Parameters,
    RequestedOutput, TensorData, TensorPayload,
};
use crate::proto::{
    self, infer_parameter::ParameterChoice, model_infer_request, model_infer_response,
    InferTensorContents,
};

impl From<&InferParameter> for proto::InferParameter {
    fn from(p: &InferParameter) -> Self {
        let choice = match p {
            InferParameter::Bool(v) => ParameterChoice::BoolParam(*v),
            InferParameter::Int64(v) => ParameterChoice::Int64Param(*v),
            InferParameter::Double(v) => ParameterChoice::DoubleParam(*v),
            InferParameter::String(v) => ParameterChoice::StringParam(v.clone()),
        };
        proto::InferParameter {
            parameter_choice: Some(choice),
        }
    }
}

fn params_from_rpc(map: HashMap<String, proto::InferParameter>) -> InferResult<Parameters> {
    map.into_iter()
        .map(|(key, p)| {
            let value = match p.parameter_choice {
                Some(ParameterChoice::BoolParam(v)) => InferParameter::Bool(v),
                Some(ParameterChoice::Int64Param(v)) => InferParameter::Int64(v),
                Some(ParameterChoice::DoubleParam(v)) => InferParameter::Double(v),
                Some(ParameterChoice::StringParam(v)) => InferParameter::String(v),
                Some(ParameterChoice::Uint64Param(v)) => {
                    InferParameter::Int64(i64::try_from(v).map_err(|_| {
                        InferError::invalid(format!("parameter '{key}' does not fit in int64"))
                    })?)
                }
                None => {
                    return Err(InferError::invalid(format!("parameter '{key}' has no value")))
                }
            };
            Ok((key, value))
        })
        .collect()
}

fn params_to_rpc(params: &Parameters) -> HashMap<String, proto::InferParameter> {
    params.iter().map(|(k, v)| (k.clone(), v.into())).collect()
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

fn narrow<S: Copy + std::fmt::Display, T: TryFrom<S>>(
    name: &str,
    datatype: DataType,
    values: Vec<S>,
) -> InferResult<Vec<T>> {
    values
        .into_iter()
        .map(|v| {
            T::try_from(v).map_err(|_| {
                InferError::invalid(format!("value {v} of '{name}' is not a valid {datatype}"))
            })
        })
        .collect()
}

fn data_from_contents(
    name: &str,
    datatype: DataType,
    contents: InferTensorContents,
) -> InferResult<TensorData> {
    let c = contents;
    Ok(match datatype {
        DataType::Fp16 => {
            return Err(InferError::invalid(format!(
                "FP16 tensor '{name}' must be sent in raw contents"
            )))
        }
        DataType::Bool => TensorData::Bool(c.bool_contents),
        DataType::Uint8 => TensorData::Uint8(narrow(name, datatype, c.uint_contents)?),
        DataType::Uint16 => TensorData::Uint16(narrow(name, datatype, c.uint_contents)?),
        DataType::Uint32 => TensorData::Uint32(c.uint_contents),
        DataType::Uint64 => TensorData::Uint64(c.uint64_contents),
        DataType::Int8 => TensorData::Int8(narrow(name, datatype, c.int_contents)?),
        DataType::Int16 => TensorData::Int16(narrow(name, datatype, c.int_contents)?),
        DataType::Int32 => TensorData::Int32(c.int_contents),
        DataType::Int64 => TensorData::Int64(c.int64_contents),
        DataType::Fp32 => TensorData::Fp32(c.fp32_contents),
        DataType::Fp64 => TensorData::Fp64(c.fp64_contents),
        DataType::Bytes => TensorData::Bytes(c.bytes_contents),
    })
}

fn contents_is_empty(c: &InferTensorContents) -> bool {
    c.bool_contents.is_empty()
        && c.int_contents.is_empty()
        && c.int64_contents.is_empty()
        && c.uint_contents.is_empty()
        && c.uint64_contents.is_empty()
        && c.fp32_contents.is_empty()
        && c.fp64_contents.is_empty()
        && c.bytes_contents.is_empty()
}

fn decode_tensor(
    name: String,
    datatype: String,
    shape: Vec<i64>,
    parameters: HashMap<String, proto::InferParameter>,
    contents: Option<InferTensorContents>,
    raw_contents: Option<Vec<u8>>,
) -> InferResult<InferTensor> {
    let datatype: DataType = datatype.parse()?;
    let count = element_count(&name, &shape)?;
    let parameters = params_from_rpc(parameters)?;

    let payload = match raw_contents {
        Some(bytes) => {
            if contents.as_ref().is_some_and(|c| !contents_is_empty(c)) {
                return Err(InferError::invalid(format!(
                    "tensor '{name}' carries both contents and raw contents"
                )));
            }
            raw::decode_raw(datatype, &bytes, count)?;
            TensorPayload::Raw(Bytes::from(bytes))
        }
        None => {
            let data = data_from_contents(&name, datatype, contents.unwrap_or_default())?;
            if data.len() != count {
                return Err(InferError::invalid(format!(
                    "'{name}' has {} elements but its shape implies {count}",
                    data.len()
                )));
            }
            TensorPayload::Data(data)
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

fn align_raw(raw: Vec<Vec<u8>>, tensors: usize) -> InferResult<Vec<Option<Vec<u8>>>> {
    if raw.is_empty() {
        return Ok(vec![None; tensors]);
    }
    if raw.len() != tensors {
        return Err(InferError::invalid(format!(
            "expected {tensors} raw contents entries, got {}",
            raw.len()
        )));
    }
    Ok(raw.into_iter().map(Some).collect())
}

impl TryFrom<proto::ModelInferRequest> for InferRequest {
    type Error = InferError;

    fn try_from(req: proto::ModelInferRequest) -> InferResult<Self> {
        let raw = align_raw(req.raw_input_contents, req.inputs.len())?;
        let inputs = req
            .inputs
            .into_iter()
            .zip(raw)
            .map(|(t, raw)| {
                decode_tensor(t.name, t.datatype, t.shape, t.parameters, t.contents, raw)
            })
            .collect::<InferResult<Vec<_>>>()?;

        let request_outputs = req
            .outputs
            .into_iter()
            .map(|o| {
                Ok(RequestedOutput {
                    name: o.name,
                    parameters: params_from_rpc(o.parameters)?,
                })
            })
            .collect::<InferResult<Vec<_>>>()?;

        Ok(InferRequest {
            model_name: req.model_name,
            model_version: non_empty(req.model_version),
            id: non_empty(req.id),
            parameters: params_from_rpc(req.parameters)?,
            inputs,
            request_outputs,
        })
    }
}

impl TryFrom<proto::ModelInferResponse> for InferResponse {
    type Error = InferError;

    fn try_from(resp: proto::ModelInferResponse) -> InferResult<Self> {
        let raw = align_raw(resp.raw_output_contents, resp.outputs.len())?;
        let outputs = resp
            .outputs
            .into_iter()
            .zip(raw)
            .map(|(t, raw)| {
                decode_tensor(t.name, t.datatype, t.shape, t.parameters, t.contents, raw)
            })
            .collect::<InferResult<Vec<_>>>()?;

        Ok(InferResponse {
            model_name: resp.model_name,
            model_version: non_empty(resp.model_version),
            id: resp.id,
            parameters: params_from_rpc(resp.parameters)?,
            outputs,
            request_outputs: Vec::new(),
            use_binary_outputs: false,
        })
    }
}

/// JSON instances travel over RPC as BYTES elements holding JSON text.
fn rpc_data(tensor: &InferTensor) -> InferResult<TensorData> {
    Ok(match tensor.data()? {
        TensorData::Json(values) => TensorData::Bytes(
            values
                .iter()
                .map(|v| {
                    serde_json::to_vec(v).map_err(|e| {
                        InferError::invalid(format!(
                            "instance of '{}' is not serializable: {e}",
                            tensor.name
                        ))
                    })
                })
                .collect::<InferResult<Vec<_>>>()?,
        ),
        other => other,
    })
}

fn contents_from_data(name: &str, data: TensorData) -> InferResult<InferTensorContents> {
    let mut c = InferTensorContents::default();
    match data {
        TensorData::Bool(v) => c.bool_contents = v,
        TensorData::Uint8(v) => c.uint_contents = v.into_iter().map(u32::from).collect(),
        TensorData::Uint16(v) => c.uint_contents = v.into_iter().map(u32::from).collect(),
        TensorData::Uint32(v) => c.uint_contents = v,
        TensorData::Uint64(v) => c.uint64_contents = v,
        TensorData::Int8(v) => c.int_contents = v.into_iter().map(i32::from).collect(),
        TensorData::Int16(v) => c.int_contents = v.into_iter().map(i32::from).collect(),
        TensorData::Int32(v) => c.int_contents = v,
        TensorData::Int64(v) => c.int64_contents = v,
        TensorData::Fp32(v) => c.fp32_contents = v,
        TensorData::Fp64(v) => c.fp64_contents = v,
        TensorData::Bytes(v) => c.bytes_contents = v,
        TensorData::Fp16(_) | TensorData::Json(_) => {
            return Err(InferError::invalid(format!(
                "tensor '{name}' has no typed contents form"
            )))
        }
    }
    Ok(c)
}

struct EncodedTensors {
    contents: Vec<Option<InferTensorContents>>,
    raw: Vec<Vec<u8>>,
}

fn encode_tensors<'a>(
    tensors: &[InferTensor],
    requested: impl Fn(&str) -> Option<&'a RequestedOutput>,
    default_binary: bool,
) -> InferResult<EncodedTensors> {
    let mut any_binary = false;
    for t in tensors {
        any_binary |= decide_binary(t, requested(&t.name), default_binary)?;
    }

    if any_binary {
        let raw = tensors
            .iter()
            .map(|t| match &t.payload {
                TensorPayload::Raw(bytes) => Ok(bytes.to_vec()),
                TensorPayload::Data(_) => Ok(raw::encode_raw(&rpc_data(t)?)?.to_vec()),
            })
            .collect::<InferResult<Vec<_>>>()?;
        return Ok(EncodedTensors {
            contents: vec![None; tensors.len()],
            raw,
        });
    }

    let contents = tensors
        .iter()
        .map(|t| contents_from_data(&t.name, rpc_data(t)?).map(Some))
        .collect::<InferResult<Vec<_>>>()?;
    Ok(EncodedTensors {
        contents,
        raw: Vec::new(),
    })
}

pub fn to_rpc_request(request: &InferRequest) -> InferResult<proto::ModelInferRequest> {
    let encoded = encode_tensors(&request.inputs, |_| None, false)?;
    let inputs = request
        .inputs
        .iter()
        .zip(encoded.contents)
        .map(|(t, contents)| model_infer_request::InferInputTensor {
            name: t.name.clone(),
            datatype: t.datatype.to_string(),
            shape: t.shape.clone(),
            parameters: params_to_rpc(&t.parameters),
            contents,
        })
        .collect();

    Ok(proto::ModelInferRequest {
        model_name: request.model_name.clone(),
        model_version: request.model_version.clone().unwrap_or_default(),
        id: request.id.clone().unwrap_or_default(),
        parameters: params_to_rpc(&request.parameters),
        inputs,
        outputs: request
            .request_outputs
            .iter()
            .map(|o| model_infer_request::InferRequestedOutputTensor {
                name: o.name.clone(),
                parameters: params_to_rpc(&o.parameters),
            })
            .collect(),
        raw_input_contents: encoded.raw,
    })
}

pub fn to_rpc_response(response: &InferResponse) -> InferResult<proto::ModelInferResponse> {
    let encoded = encode_tensors(
        &response.outputs,
        |name| response.requested_output(name),
        response.use_binary_outputs,
    )?;
    let outputs = response
        .outputs
        .iter()
        .zip(encoded.contents)
        .map(|(t, contents)| model_infer_response::InferOutputTensor {
            name: t.name.clone(),
            datatype: t.datatype.to_string(),
            shape: t.shape.clone(),
            parameters: params_to_rpc(&t.parameters),
            contents,
        })
        .collect();

    Ok(proto::ModelInferResponse {
        model_name: response.model_name.clone(),
        model_version: response.model_version.clone().unwrap_or_default(),
        id: response.id.clone(),
        parameters: params_to_rpc(&response.parameters),
        outputs,
        raw_output_contents: encoded.raw,
    })
}
