//! # protobus-codegen
//!
//! Binding generator for [protobus]: given protobuf service definitions,
//! it emits the bus client, handler trait and server adapter for each
//! service, plus optional gRPC and HTTP/JSON gateway fronts. It ships as
//! a protoc plugin (`protoc-gen-protobus`); the library surface exists so
//! build scripts and tests can drive generation directly.
//!
//! [protobus]: https://docs.rs/protobus
//!
//! ```text
//! protoc --protobus_out=paths=source_relative,grpc,rest:src/generated orders.proto
//! ```

pub mod descriptor;
pub mod error;
pub mod gateway;
pub mod generate;
pub mod native;
pub mod plugin;
pub mod rest;

pub use error::{Error, Result};
pub use generate::{generate_file, GeneratedFile, Options, PathMode};
