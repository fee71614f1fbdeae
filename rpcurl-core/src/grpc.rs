//! # Generic gRPC Transport
//!
//! This module contains the low-level building blocks for performing gRPC calls using
//! dynamic message types.
//!
//! Unlike standard `tonic` clients which are strongly typed (e.g., `HelloRequest`),
//! the components here work with `prost_reflect::DynamicMessage`s whose descriptors were
//! discovered at runtime, transcoding them to Protobuf binary format on the fly.
pub mod client;
pub mod codec;
