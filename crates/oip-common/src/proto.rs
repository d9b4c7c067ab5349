//! `inference.GRPCInferenceService` messages, client and server, generated
//! from `proto/grpc_predict_v2.proto` at build time.

#![allow(clippy::derive_partial_eq_without_eq)]

tonic::include_proto!("inference");
