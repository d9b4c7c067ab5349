//! v1 form: `{"instances": [...]}` in, `{"predictions": [...]}` out.

use serde_json::{Map, Value};

use crate::error::{InferError, InferResult};
use crate::infer_type::{InferRequest, InferResponse, InferTensor, TensorData};

pub const INSTANCES: &str = "instances";
pub const PREDICTIONS: &str = "predictions";

/// Wrap the instances into a single unnamed BYTES tensor. A string `id`
/// field is kept as the request id.
pub fn decode_request(model_name: &str, body: &[u8]) -> InferResult<InferRequest> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| InferError::invalid(format!("unrecognized request format: {e}")))?;
    let Value::Object(mut fields) = value else {
        return Err(InferError::invalid("v1 request body must be a JSON object"));
    };

    let instances = match fields.remove(INSTANCES) {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(InferError::invalid("\"instances\" must be a list")),
        None => return Err(InferError::invalid("expected \"instances\" in request body")),
    };

    let mut request = InferRequest::new(
        model_name,
        vec![InferTensor::new(
            "",
            vec![instances.len() as i64],
            TensorData::Json(instances),
        )],
    );
    if let Some(Value::String(id)) = fields.remove("id") {
        request.id = Some(id);
    }
    Ok(request)
}

fn nest(values: &mut impl Iterator<Item = Value>, dims: &[usize]) -> Value {
    match dims.split_first() {
        None => values.next().unwrap_or(Value::Null),
        Some((&len, rest)) => Value::Array((0..len).map(|_| nest(values, rest)).collect()),
    }
}

/// Element values of `tensor` nested row-major by its shape. Rank 0 and 1
/// tensors, and instance lists that were never typed, stay flat.
fn shaped_values(tensor: &InferTensor) -> InferResult<Vec<Value>> {
    let data = tensor.data()?;
    let values = data.to_json_values()?;
    if matches!(data, TensorData::Json(_)) || tensor.shape.len() < 2 {
        return Ok(values);
    }
    let count = tensor.element_count()?;
    if values.len() != count {
        return Err(InferError::invalid(format!(
            "'{}' has {} elements but its shape implies {count}",
            tensor.name,
            values.len()
        )));
    }
    let dims: Vec<usize> = tensor.shape.iter().map(|&d| d as usize).collect();
    let mut values = values.into_iter();
    Ok((0..dims[0]).map(|_| nest(&mut values, &dims[1..])).collect())
}

/// Render the first output as the `predictions` list. A response with no
/// outputs renders an empty list.
pub fn encode_response(response: &InferResponse) -> InferResult<Vec<u8>> {
    let predictions = match response.outputs.first() {
        Some(output) => shaped_values(output)?,
        None => Vec::new(),
    };
    let mut body = Map::new();
    body.insert(PREDICTIONS.to_string(), Value::Array(predictions));
    serde_json::to_vec(&Value::Object(body))
        .map_err(|e| InferError::invalid(format!("failed to serialize predictions: {e}")))
}

/// Read the `predictions` of an upstream v1 answer back into one output.
pub fn decode_response(model_name: &str, id: &str, body: &[u8]) -> InferResult<InferResponse> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| InferError::invalid(format!("malformed v1 response: {e}")))?;
    let predictions = match value {
        Value::Object(mut fields) => match fields.remove(PREDICTIONS) {
            Some(Value::Array(items)) => items,
            _ => return Err(InferError::invalid("v1 response has no \"predictions\" list")),
        },
        _ => return Err(InferError::invalid("v1 response must be a JSON object")),
    };
    Ok(InferResponse::new(
        model_name,
        id,
        vec![InferTensor::new(
            "",
            vec![predictions.len() as i64],
            TensorData::Json(predictions),
        )],
    ))
}

/// Body sent to an upstream v1 predictor.
pub fn encode_request(request: &InferRequest) -> InferResult<Vec<u8>> {
    let instances = match request.inputs.first() {
        Some(input) => shaped_values(input)?,
        None => Vec::new(),
    };
    let mut body = Map::new();
    body.insert(INSTANCES.to_string(), Value::Array(instances));
    serde_json::to_vec(&Value::Object(body))
        .map_err(|e| InferError::invalid(format!("failed to serialize instances: {e}")))
}
