//! # protobus
//!
//! RPC for protobuf services over a publish/subscribe message bus.
//!
//! Method subjects are derived deterministically from the proto package
//! and method name, replies travel as status-prefixed envelopes, and
//! streaming calls are emulated as sessions of correlated frames, so the
//! bus itself only needs plain publish/subscribe with reply subjects and
//! queue groups. Bindings are produced by the companion
//! `protobus-codegen` crate; the hand-written surface below is what those
//! bindings call into.
//!
//! ```no_run
//! use protobus::{BusConnection, Config, HealthCheckInfo, ServiceDispatcher};
//!
//! #[tokio::main]
//! async fn main() -> protobus::Result<()> {
//!     let conn = BusConnection::connect(Config::new("mem://demo"))?;
//!
//!     let mut svc = ServiceDispatcher::new(conn.clone(), "demo", "Echo");
//!     svc.unary("Ping", |_ctx, input: HealthCheckInfo| async move { Ok(input) })?;
//!     let _bound = svc.bind().await?;
//!
//!     let input = HealthCheckInfo { data: "hi".to_string() };
//!     let pong: HealthCheckInfo = conn.call("demo/Ping", &input).await?;
//!     assert_eq!(pong.data, "hi");
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod error;
pub mod registry;
pub mod rest;
pub mod streaming;
pub mod transport;
pub mod wire;


pub use connection::{BusConnection, Config, DEFAULT_REQUEST_TIMEOUT};
pub use error::{Error, Result};
pub use registry::{BoundService, CallContext, ServiceDispatcher};
pub use streaming::{ClientStream, InboundFrames, ServerStream, StreamSink};
pub use transport::{BusMessage, MemoryTransport, Subscription, Transport};
pub use wire::{Empty, ErrorMessage, HealthCheckInfo};

// Re-exported for generated bindings.
pub use async_trait::async_trait;
pub use prost;
