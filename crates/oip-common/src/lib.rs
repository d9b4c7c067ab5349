pub mod codec;
pub mod datatype;
pub mod envelope;
pub mod error;
pub mod infer_type;
pub mod proto;
pub mod telemetry;

pub use datatype::DataType;
pub use envelope::{DecodedEnvelope, EnvelopeConfig, EnvelopeMode};
pub use error::{InferError, InferResult};
pub use infer_type::*;
