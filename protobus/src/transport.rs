//! Transport layer: pub/sub trait and the in-process broker
//!
//! The broker itself is an external collaborator; the runtime only needs a
//! correlated publish/subscribe primitive. [`Transport`] seals that
//! boundary, and [`MemoryTransport`] implements it with an in-process
//! broker shared through a global registry keyed by endpoint URL, so
//! multiple connections in one process exchange messages the way they
//! would through a real broker.
//!
//! Delivery uses one bounded channel per subscription; `publish` awaits
//! channel capacity, so a slow consumer applies backpressure to its
//! publisher instead of growing an unbounded buffer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{Error, Result};

/// Per-subscription delivery buffer, in messages.
const SUBSCRIPTION_CAPACITY: usize = 1024;

/// One message on the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Topic the message was published to
    pub subject: String,
    /// Subject the receiver should reply to, when the sender expects one
    pub reply: Option<String>,
    /// Opaque payload bytes; `Bytes` keeps fan-out clones cheap
    pub payload: Bytes,
}

impl BusMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            payload: payload.into(),
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }
}

/// A live subscription; dropping it unsubscribes.
pub struct Subscription {
    receiver: mpsc::Receiver<BusMessage>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Receive the next message, or `None` once the subscription is torn
    /// down (unsubscribe or transport close).
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.on_drop.take() {
            unsubscribe();
        }
    }
}

/// Transport trait abstracting the pub/sub broker
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publish a message; fire-and-forget.
    async fn publish(&self, msg: BusMessage) -> Result<()>;

    /// Subscribe to a subject. Subscriptions sharing `(subject, group)`
    /// form a queue group: each message goes to exactly one member.
    /// Ungrouped subscriptions each receive a copy.
    async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<Subscription>;

    /// Release the transport handle. Idempotent; tears down every
    /// subscription created through this transport.
    async fn close(&self) -> Result<()>;
}

/// In-process brokers, keyed by endpoint URL.
static BROKERS: Lazy<DashMap<String, Arc<Broker>>> = Lazy::new(DashMap::new);

struct SubEntry {
    id: Uuid,
    sender: mpsc::Sender<BusMessage>,
}

#[derive(Default)]
struct SubjectSubs {
    plain: Vec<SubEntry>,
    groups: HashMap<String, QueueGroup>,
}

#[derive(Default)]
struct QueueGroup {
    members: Vec<SubEntry>,
    next: usize,
}

struct Broker {
    subjects: DashMap<String, SubjectSubs>,
}

impl Broker {
    fn new() -> Self {
        Self {
            subjects: DashMap::new(),
        }
    }

    fn add(
        &self,
        subject: &str,
        group: Option<&str>,
        id: Uuid,
        sender: mpsc::Sender<BusMessage>,
    ) {
        let mut entry = self.subjects.entry(subject.to_string()).or_default();
        let sub = SubEntry { id, sender };
        match group {
            Some(group) => entry
                .groups
                .entry(group.to_string())
                .or_default()
                .members
                .push(sub),
            None => entry.plain.push(sub),
        }
    }

    fn remove(&self, subject: &str, id: Uuid) {
        if let Some(mut entry) = self.subjects.get_mut(subject) {
            entry.plain.retain(|s| s.id != id);
            for group in entry.groups.values_mut() {
                group.members.retain(|s| s.id != id);
            }
            entry.groups.retain(|_, g| !g.members.is_empty());
        }
        self.subjects
            .remove_if(subject, |_, e| e.plain.is_empty() && e.groups.is_empty());
    }

    /// Pick delivery targets: every plain subscription plus one member per
    /// queue group, rotated round-robin. Senders are cloned so no shard
    /// lock is held across the bounded send.
    fn targets(&self, subject: &str) -> Vec<mpsc::Sender<BusMessage>> {
        let mut targets = Vec::new();
        if let Some(mut entry) = self.subjects.get_mut(subject) {
            for sub in &entry.plain {
                targets.push(sub.sender.clone());
            }
            for group in entry.groups.values_mut() {
                if group.members.is_empty() {
                    continue;
                }
                let pick = group.next % group.members.len();
                group.next = group.next.wrapping_add(1);
                targets.push(group.members[pick].sender.clone());
            }
        }
        targets
    }

    async fn deliver(&self, msg: BusMessage) {
        for sender in self.targets(&msg.subject) {
            // A closed receiver just means the subscriber went away between
            // target selection and delivery.
            let _ = sender.send(msg.clone()).await;
        }
    }
}

/// Transport backed by a shared in-process broker.
pub struct MemoryTransport {
    broker: Arc<Broker>,
    /// Subjects of the subscriptions created through this transport,
    /// so `close` can tear them down.
    subs: Arc<DashMap<Uuid, String>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Attach to the broker at `url`. URLs use the `mem://<name>` scheme;
    /// anything else is a connection error.
    pub fn connect(url: &str) -> Result<Self> {
        let name = url
            .strip_prefix("mem://")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                Error::connection_msg(format!("unreachable bus endpoint: {url:?}"))
            })?;

        let broker = BROKERS
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Broker::new()))
            .clone();
        tracing::debug!(endpoint = url, "attached to in-process broker");

        Ok(Self {
            broker,
            subs: Arc::new(DashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::connection_msg("transport is closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, msg: BusMessage) -> Result<()> {
        self.ensure_open()?;
        self.broker.deliver(msg).await;
        Ok(())
    }

    async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<Subscription> {
        self.ensure_open()?;
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        self.broker.add(subject, queue_group, id, sender);
        self.subs.insert(id, subject.to_string());

        let broker = self.broker.clone();
        let subs = self.subs.clone();
        let subject = subject.to_string();
        Ok(Subscription {
            receiver,
            on_drop: Some(Box::new(move || {
                broker.remove(&subject, id);
                subs.remove(&id);
            })),
        })
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Dropping the broker-side senders ends every receiver, so
        // in-flight waits observe cancellation instead of hanging.
        for entry in self.subs.iter() {
            self.broker.remove(entry.value(), *entry.key());
        }
        self.subs.clear();
        tracing::debug!("memory transport closed");
        Ok(())
    }
}
