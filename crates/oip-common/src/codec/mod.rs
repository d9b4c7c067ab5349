//! Wire codecs for tensor requests and responses.
//!
//! `rest` handles the Open Inference Protocol JSON + binary body, `rpc`
//! converts to and from the protobuf messages, and `legacy` covers the v1
//! `instances` / `predictions` form. All three share the raw layout in `raw`
//! and the binary-encoding decision below.

pub mod legacy;
pub mod raw;
pub mod rest;
pub mod rpc;

use crate::datatype::DataType;
use crate::error::{InferError, InferResult};
use crate::infer_type::{InferTensor, RequestedOutput};

/// Whether `tensor` goes out in binary form. First match wins:
/// FP16, the requested output's `binary_data`, the tensor's own
/// `binary_data`, then the request-level default. A raw payload with
/// no flag set goes out as JSON.
pub fn decide_binary(
    tensor: &InferTensor,
    requested: Option<&RequestedOutput>,
    default_binary: bool,
) -> InferResult<bool> {
    let requested_flag = requested.and_then(RequestedOutput::binary_data_flag);
    let tensor_flag = tensor.binary_data_flag();

    if tensor.datatype == DataType::Fp16 {
        if requested_flag == Some(false) || tensor_flag == Some(false) {
            return Err(InferError::invalid(format!(
                "FP16 tensor '{}' cannot be encoded as JSON; it must use binary_data",
                tensor.name
            )));
        }
        return Ok(true);
    }

    if let Some(flag) = requested_flag.or(tensor_flag) {
        return Ok(flag);
    }
    Ok(default_binary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer_type::{TensorData, BINARY_DATA};

    #[test]
    fn test_precedence() {
        let t = InferTensor::new("y", vec![1], TensorData::Int8(vec![1]));
        assert!(!decide_binary(&t, None, false).unwrap());
        assert!(decide_binary(&t, None, true).unwrap());

        let flagged = t.clone().with_parameter(BINARY_DATA, false);
        assert!(!decide_binary(&flagged, None, true).unwrap());

        let req = RequestedOutput::binary("y", true);
        assert!(decide_binary(&flagged, Some(&req), false).unwrap());

        let raw = InferTensor::from_raw("y", DataType::Int8, vec![1], vec![1u8]);
        assert!(!decide_binary(&raw, None, false).unwrap());
        assert!(decide_binary(&raw, None, true).unwrap());
        assert!(!decide_binary(&raw, Some(&RequestedOutput::binary("y", false)), false).unwrap());
    }

    #[test]
    fn test_fp16_always_binary() {
        let h = InferTensor::from_raw("h", DataType::Fp16, vec![1], vec![0u8, 60]);
        assert!(decide_binary(&h, Some(&RequestedOutput::new("h")), false).unwrap());
        let text = h.with_parameter(BINARY_DATA, false);
        assert!(decide_binary(&text, None, false).is_err());
    }
}
