//! Bus connection: request/reply calls over the pub/sub transport
//!
//! A [`BusConnection`] owns one transport attach and layers the unary
//! call pattern on top of it: publish the encoded input with a fresh
//! reply inbox, wait for exactly one reply envelope, decode it. There
//! are no retries; a missed reply surfaces as a timeout.

use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use uuid::Uuid;

use crate::transport::{BusMessage, MemoryTransport, Subscription, Transport};
use crate::wire::{self, ErrorMessage};
use crate::{Error, Result};

/// Default bound on a single request/reply exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Dispatch-context identifier used when the caller supplies none.
const DEFAULT_BUS_ID: &str = "BUS";

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker endpoint URL, e.g. `mem://orders`
    pub url: String,
    /// Identifier stamped into outbound error messages and handler
    /// contexts; empty means the default id
    pub bus_id: String,
    /// Upper bound on any single request/reply wait
    pub request_timeout: Duration,
}

impl Config {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bus_id: String::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn bus_id(mut self, bus_id: impl Into<String>) -> Self {
        self.bus_id = bus_id.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// A handle onto the bus. Cheap to clone; every clone shares the same
/// transport attach, so closing one closes them all.
#[derive(Clone)]
pub struct BusConnection {
    transport: Arc<dyn Transport>,
    bus_id: Arc<str>,
    request_timeout: Duration,
}

impl std::fmt::Debug for BusConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConnection")
            .field("bus_id", &self.bus_id)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl BusConnection {
    /// Attach to the broker named by `config.url`.
    pub fn connect(config: Config) -> Result<Self> {
        let transport = MemoryTransport::connect(&config.url)?;
        let bus_id = if config.bus_id.is_empty() {
            DEFAULT_BUS_ID.to_string()
        } else {
            config.bus_id
        };
        tracing::info!(url = %config.url, bus_id = %bus_id, "connected to bus");
        Ok(Self {
            transport: Arc::new(transport),
            bus_id: bus_id.into(),
            request_timeout: config.request_timeout,
        })
    }

    /// The identifier this connection stamps into error messages and
    /// handler contexts.
    pub fn bus_id(&self) -> &str {
        &self.bus_id
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Fresh single-use reply subject.
    pub(crate) fn new_inbox() -> String {
        format!("_INBOX.{}", Uuid::new_v4())
    }

    /// Publish raw bytes to a subject.
    pub async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.transport
            .publish(BusMessage::new(subject, payload))
            .await
    }

    /// Publish raw bytes with an explicit reply subject.
    pub async fn publish_with_reply(
        &self,
        subject: &str,
        reply: &str,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.transport
            .publish(BusMessage::new(subject, payload).with_reply(reply))
            .await
    }

    /// Subscribe to a subject, optionally as a queue-group member.
    pub async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<Subscription> {
        self.transport.subscribe(subject, queue_group).await
    }

    /// Publish `payload` to `subject` and wait for exactly one reply,
    /// bounded by the request timeout.
    pub async fn request(&self, subject: &str, payload: Vec<u8>) -> Result<BusMessage> {
        let inbox = Self::new_inbox();
        // Subscribe before publishing so the reply cannot race the inbox.
        let mut sub = self.transport.subscribe(&inbox, None).await?;
        self.publish_with_reply(subject, &inbox, payload).await?;
        self.await_reply(&mut sub, subject).await
    }

    /// Wait for one message on an already-open reply subscription.
    pub(crate) async fn await_reply(
        &self,
        sub: &mut Subscription,
        operation: &str,
    ) -> Result<BusMessage> {
        match tokio::time::timeout(self.request_timeout, sub.next()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(Error::cancelled(operation)),
            Err(_) => Err(Error::timeout(
                operation,
                self.request_timeout.as_millis() as u64,
            )),
        }
    }

    /// Unary call: encode the input, exchange it for one reply envelope,
    /// decode the output or surface the remote error.
    pub async fn call<I, O>(&self, subject: &str, input: &I) -> Result<O>
    where
        I: Message,
        O: Message + Default,
    {
        let reply = self.request(subject, input.encode_to_vec()).await?;
        wire::decode_reply(&reply.payload)
    }

    /// Publish a status-1 envelope for `err` to `reply`; a missing or
    /// empty reply subject makes this a no-op.
    pub async fn handle_error(&self, reply: Option<&str>, err: &Error) -> Result<()> {
        let reply = match reply {
            Some(r) if !r.is_empty() => r,
            _ => return Ok(()),
        };
        tracing::warn!(reply, category = err.category(), %err, "replying with error");
        let msg = ErrorMessage::now(err, &self.bus_id);
        self.publish(reply, wire::encode_error(&msg)).await
    }

    /// Detach from the bus. Idempotent; every subscription created
    /// through this connection ends, so in-flight calls observe
    /// cancellation instead of hanging.
    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{encode_ok, HealthCheckInfo};

    fn unique_url(tag: &str) -> String {
        format!("mem://{tag}-{}", Uuid::new_v4())
    }

    #[test]
    fn connect_fails_on_bad_endpoint() {
        let err = BusConnection::connect(Config::new("tcp://nowhere")).unwrap_err();
        assert_eq!(err.category(), "connection");
    }

    #[test]
    fn bus_id_defaults_when_empty() {
        let conn = BusConnection::connect(Config::new(unique_url("busid"))).unwrap();
        assert_eq!(conn.bus_id(), "BUS");

        let conn =
            BusConnection::connect(Config::new(unique_url("busid")).bus_id("worker-1")).unwrap();
        assert_eq!(conn.bus_id(), "worker-1");
    }

    #[tokio::test]
    async fn call_roundtrip_through_a_responder() {
        let url = unique_url("call");
        let server = BusConnection::connect(Config::new(url.as_str())).unwrap();
        let client = BusConnection::connect(Config::new(url.as_str())).unwrap();

        let mut sub = server.subscribe("svc/Ping", None).await.unwrap();
        let responder = server.clone();
        tokio::spawn(async move {
            let msg = sub.next().await.unwrap();
            let reply = msg.reply.unwrap();
            let out = HealthCheckInfo {
                data: "pong".to_string(),
            };
            responder.publish(&reply, encode_ok(&out)).await.unwrap();
        });

        let out: HealthCheckInfo = client
            .call("svc/Ping", &HealthCheckInfo::default())
            .await
            .unwrap();
        assert_eq!(out.data, "pong");
    }

    #[tokio::test]
    async fn call_surfaces_handler_error_text_verbatim() {
        let url = unique_url("callerr");
        let server = BusConnection::connect(Config::new(url.as_str())).unwrap();
        let client = BusConnection::connect(Config::new(url.as_str())).unwrap();

        let mut sub = server.subscribe("svc/Fail", None).await.unwrap();
        let responder = server.clone();
        tokio::spawn(async move {
            let msg = sub.next().await.unwrap();
            responder
                .handle_error(msg.reply.as_deref(), &Error::app("test-error-1"))
                .await
                .unwrap();
        });

        let err = client
            .call::<_, HealthCheckInfo>("svc/Fail", &HealthCheckInfo::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "test-error-1");
        assert_eq!(err.category(), "application");
    }

    #[tokio::test]
    async fn call_times_out_without_a_responder() {
        let url = unique_url("timeout");
        let client = BusConnection::connect(
            Config::new(url.as_str()).request_timeout(Duration::from_millis(50)),
        )
        .unwrap();

        let err = client
            .call::<_, HealthCheckInfo>("svc/Nobody", &HealthCheckInfo::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "timeout");
    }

    #[tokio::test]
    async fn close_cancels_in_flight_calls_and_is_idempotent() {
        let url = unique_url("close");
        let client = BusConnection::connect(Config::new(url.as_str())).unwrap();

        let caller = client.clone();
        let pending = tokio::spawn(async move {
            caller
                .call::<_, HealthCheckInfo>("svc/Never", &HealthCheckInfo::default())
                .await
        });

        // Let the call register its inbox before tearing down.
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.close().await.unwrap();
        client.close().await.unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.category(), "cancelled");
    }

    #[tokio::test]
    async fn handle_error_without_reply_subject_is_a_noop() {
        let url = unique_url("noreply");
        let conn = BusConnection::connect(Config::new(url.as_str())).unwrap();
        conn.handle_error(None, &Error::app("ignored")).await.unwrap();
        conn.handle_error(Some(""), &Error::app("ignored"))
            .await
            .unwrap();
    }
}
