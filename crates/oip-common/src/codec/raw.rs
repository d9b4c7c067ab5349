//! Little-endian raw tensor layout shared by the REST binary extension and
//! the RPC `raw_*_contents` fields.

use bytes::{BufMut, Bytes, BytesMut};
use half::f16;

use crate::datatype::DataType;
use crate::error::{InferError, InferResult};
use crate::infer_type::TensorData;

macro_rules! put_le {
    ($buf:expr, $values:expr, $width:expr) => {{
        $buf.reserve($values.len() * $width);
        for v in $values.iter() {
            $buf.put_slice(&v.to_le_bytes());
        }
    }};
}

/// Serialize typed values into the raw layout. BYTES elements carry a 4-byte
/// little-endian length prefix.
pub fn encode_raw(data: &TensorData) -> InferResult<Bytes> {
    let mut buf = BytesMut::new();
    match data {
        TensorData::Bool(v) => {
            buf.reserve(v.len());
            for b in v {
                buf.put_u8(u8::from(*b));
            }
        }
        TensorData::Uint8(v) => buf.put_slice(v),
        TensorData::Int8(v) => {
            buf.reserve(v.len());
            for x in v {
                buf.put_i8(*x);
            }
        }
        TensorData::Uint16(v) => put_le!(buf, v, 2),
        TensorData::Uint32(v) => put_le!(buf, v, 4),
        TensorData::Uint64(v) => put_le!(buf, v, 8),
        TensorData::Int16(v) => put_le!(buf, v, 2),
        TensorData::Int32(v) => put_le!(buf, v, 4),
        TensorData::Int64(v) => put_le!(buf, v, 8),
        TensorData::Fp16(v) => put_le!(buf, v, 2),
        TensorData::Fp32(v) => put_le!(buf, v, 4),
        TensorData::Fp64(v) => put_le!(buf, v, 8),
        TensorData::Bytes(v) => {
            for elem in v {
                let len = u32::try_from(elem.len()).map_err(|_| {
                    InferError::invalid("BYTES element longer than 4 GiB cannot be encoded")
                })?;
                buf.put_u32_le(len);
                buf.put_slice(elem);
            }
        }
        TensorData::Json(_) => {
            return Err(InferError::invalid(
                "instances of the v1 form have no raw encoding",
            ))
        }
    }
    Ok(buf.freeze())
}

fn chunks<const N: usize>(raw: &[u8]) -> impl Iterator<Item = [u8; N]> + '_ {
    raw.chunks_exact(N).map(|c| {
        let mut a = [0u8; N];
        a.copy_from_slice(c);
        a
    })
}

/// Parse a raw buffer holding exactly `count` elements of `datatype`.
pub fn decode_raw(datatype: DataType, raw: &[u8], count: usize) -> InferResult<TensorData> {
    let Some(width) = datatype.element_size() else {
        return decode_bytes(raw, count);
    };

    let expected = count
        .checked_mul(width)
        .ok_or_else(|| InferError::invalid("raw tensor size overflows"))?;
    if raw.len() != expected {
        return Err(InferError::invalid(format!(
            "expected {expected} bytes for {count} {datatype} elements, got {}",
            raw.len()
        )));
    }

    Ok(match datatype {
        DataType::Bool => TensorData::Bool(raw.iter().map(|b| *b != 0).collect()),
        DataType::Uint8 => TensorData::Uint8(raw.to_vec()),
        DataType::Int8 => TensorData::Int8(raw.iter().map(|b| *b as i8).collect()),
        DataType::Uint16 => TensorData::Uint16(chunks(raw).map(u16::from_le_bytes).collect()),
        DataType::Uint32 => TensorData::Uint32(chunks(raw).map(u32::from_le_bytes).collect()),
        DataType::Uint64 => TensorData::Uint64(chunks(raw).map(u64::from_le_bytes).collect()),
        DataType::Int16 => TensorData::Int16(chunks(raw).map(i16::from_le_bytes).collect()),
        DataType::Int32 => TensorData::Int32(chunks(raw).map(i32::from_le_bytes).collect()),
        DataType::Int64 => TensorData::Int64(chunks(raw).map(i64::from_le_bytes).collect()),
        DataType::Fp16 => TensorData::Fp16(chunks(raw).map(f16::from_le_bytes).collect()),
        DataType::Fp32 => TensorData::Fp32(chunks(raw).map(f32::from_le_bytes).collect()),
        DataType::Fp64 => TensorData::Fp64(chunks(raw).map(f64::from_le_bytes).collect()),
        DataType::Bytes => return decode_bytes(raw, count),
    })
}

fn decode_bytes(raw: &[u8], count: usize) -> InferResult<TensorData> {
    let mut out = Vec::with_capacity(count.min(raw.len() / 4 + 1));
    let mut rest = raw;
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(InferError::invalid("truncated BYTES length prefix"));
        }
        let (prefix, tail) = rest.split_at(4);
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if tail.len() < len {
            return Err(InferError::invalid(format!(
                "BYTES element of {len} bytes exceeds remaining {} bytes",
                tail.len()
            )));
        }
        let (elem, tail) = tail.split_at(len);
        out.push(elem.to_vec());
        rest = tail;
    }
    if out.len() != count {
        return Err(InferError::invalid(format!(
            "expected {count} BYTES elements, got {}",
            out.len()
        )));
    }
    Ok(TensorData::Bytes(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fp32_layout() {
        let raw = encode_raw(&TensorData::Fp32(vec![1.0, -2.5])).unwrap();
        assert_eq!(&raw[..], &[0, 0, 128, 63, 0, 0, 32, 192]);
        let back = decode_raw(DataType::Fp32, &raw, 2).unwrap();
        assert_eq!(back, TensorData::Fp32(vec![1.0, -2.5]));
    }

    #[test]
    fn test_bytes_length_prefix() {
        let raw = encode_raw(&TensorData::Bytes(vec![b"ab".to_vec(), vec![]])).unwrap();
        assert_eq!(&raw[..], &[2, 0, 0, 0, b'a', b'b', 0, 0, 0, 0]);
        assert_eq!(
            decode_raw(DataType::Bytes, &raw, 2).unwrap(),
            TensorData::Bytes(vec![b"ab".to_vec(), vec![]])
        );
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let err = decode_raw(DataType::Int32, &[0, 0, 0], 1).unwrap_err();
        assert!(matches!(err, InferError::InvalidInput(_)));

        // element count disagrees with shape
        let raw = encode_raw(&TensorData::Bytes(vec![b"x".to_vec()])).unwrap();
        assert!(decode_raw(DataType::Bytes, &raw, 2).is_err());

        // prefix promises more than the buffer holds
        assert!(decode_raw(DataType::Bytes, &[9, 0, 0, 0, 1], 1).is_err());
    }

    #[test]
    fn test_fp16_and_bool() {
        let halfs = vec![f16::from_f32(1.5), f16::from_f32(-0.25)];
        let raw = encode_raw(&TensorData::Fp16(halfs.clone())).unwrap();
        assert_eq!(raw.len(), 4);
        assert_eq!(decode_raw(DataType::Fp16, &raw, 2).unwrap(), TensorData::Fp16(halfs));

        let raw = encode_raw(&TensorData::Bool(vec![true, false])).unwrap();
        assert_eq!(&raw[..], &[1, 0]);
    }

    #[test]
    fn test_json_has_no_raw_form() {
        assert!(encode_raw(&TensorData::Json(vec![serde_json::json!(1)])).is_err());
    }
}
