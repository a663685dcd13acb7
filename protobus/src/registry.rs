//! Service registry and dispatcher
//!
//! Generated servers register one typed handler per method and then bind.
//! Registration is where the call shape is fixed: `unary`, `client_stream`
//! and `server_stream` each take a handler of the matching signature, so a
//! shape mismatch is a compile error rather than a runtime surprise.
//!
//! Binding takes one queue-group subscription per method subject, with the
//! service name as the group, so every running instance of a service
//! shares its inbound load. Each inbound message is dispatched on its own
//! task; handler faults stay local to their call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use prost::Message;
use tokio::sync::{mpsc, oneshot};

use crate::connection::BusConnection;
use crate::streaming::{session_subject, InboundFrames, StreamSink};
use crate::transport::BusMessage;
use crate::wire::{self, Frame};
use crate::{Error, Result};

/// Buffered frames per in-flight client-streaming call.
const FRAME_BUFFER: usize = 64;

/// Per-call context handed to every handler.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Identifier of the connection dispatching this call
    pub bus_id: String,
}

type DispatchFn = Arc<dyn Fn(CallContext, BusMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Collects typed method handlers for one service before binding.
pub struct ServiceDispatcher {
    conn: BusConnection,
    namespace: String,
    service: String,
    methods: HashMap<String, DispatchFn>,
}

impl ServiceDispatcher {
    pub fn new(
        conn: BusConnection,
        namespace: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
            service: service.into(),
            methods: HashMap::new(),
        }
    }

    fn insert(&mut self, method: &str, dispatch: DispatchFn) -> Result<()> {
        if self.methods.contains_key(method) {
            return Err(Error::dispatch(format!(
                "method {method} registered twice on service {}",
                self.service
            )));
        }
        self.methods.insert(method.to_string(), dispatch);
        Ok(())
    }

    /// Register a unary method.
    pub fn unary<I, O, F, Fut>(&mut self, method: &str, handler: F) -> Result<()>
    where
        I: Message + Default + 'static,
        O: Message + 'static,
        F: Fn(CallContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let conn = self.conn.clone();
        let handler = Arc::new(handler);
        self.insert(
            method,
            Arc::new(move |ctx, msg| {
                let conn = conn.clone();
                let handler = handler.clone();
                Box::pin(async move {
                    let input = match I::decode(&msg.payload[..]) {
                        Ok(input) => input,
                        Err(err) => {
                            // The handler never sees malformed input.
                            let _ = conn.handle_error(msg.reply.as_deref(), &err.into()).await;
                            return;
                        }
                    };
                    match handler(ctx, input).await {
                        Ok(output) => {
                            let Some(reply) = msg.reply.as_deref().filter(|r| !r.is_empty())
                            else {
                                return;
                            };
                            if let Err(err) = conn.publish(reply, wire::encode_ok(&output)).await
                            {
                                tracing::warn!(reply, %err, "failed to publish reply");
                            }
                        }
                        Err(err) => {
                            let _ = conn.handle_error(msg.reply.as_deref(), &err).await;
                        }
                    }
                })
            }),
        )
    }

    /// Register a client-streaming method. The handler consumes inbound
    /// items and returns the single aggregated reply.
    pub fn client_stream<I, O, F, Fut>(&mut self, method: &str, handler: F) -> Result<()>
    where
        I: Message + Default + 'static,
        O: Message + 'static,
        F: Fn(CallContext, InboundFrames<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let conn = self.conn.clone();
        let handler = Arc::new(handler);
        self.insert(
            method,
            Arc::new(move |ctx, msg| {
                let conn = conn.clone();
                let handler = handler.clone();
                Box::pin(async move {
                    // The opening call must carry a reply inbox; without
                    // one there is no session to correlate.
                    let Some(open_reply) = msg.reply.as_deref().filter(|r| !r.is_empty()) else {
                        tracing::warn!(subject = %msg.subject, "stream open without reply inbox");
                        return;
                    };
                    let session = session_subject(open_reply);
                    let mut frames_sub = match conn.subscribe(&session, None).await {
                        Ok(sub) => sub,
                        Err(err) => {
                            let _ = conn.handle_error(Some(open_reply), &err).await;
                            return;
                        }
                    };
                    // Ack only after the session subscription exists, so
                    // the first data frame cannot outrun it.
                    if let Err(err) = conn
                        .publish(open_reply, wire::encode_ok(&wire::Empty {}))
                        .await
                    {
                        tracing::warn!(%err, "failed to ack stream open");
                        return;
                    }

                    let (tx, rx) = mpsc::channel::<Result<I>>(FRAME_BUFFER);
                    // Resolves with the Done frame's reply inbox, or None
                    // when the session ended without one (abort, teardown).
                    let (done_tx, done_rx) = oneshot::channel::<Option<String>>();

                    tokio::spawn(async move {
                        let mut done_tx = Some(done_tx);
                        loop {
                            let Some(frame_msg) = frames_sub.next().await else {
                                let _ = tx.send(Err(Error::cancelled("stream session"))).await;
                                break;
                            };
                            match wire::decode_frame(&frame_msg.payload) {
                                Ok(Frame::Data(payload)) => {
                                    let item = I::decode(payload.as_slice())
                                        .map_err(Error::from);
                                    // A dropped receiver means the handler
                                    // already returned; keep draining until
                                    // the terminal so its reply inbox is
                                    // still captured.
                                    let _ = tx.send(item).await;
                                }
                                Ok(Frame::Done) => {
                                    drop(tx);
                                    if let Some(done) = done_tx.take() {
                                        let _ = done.send(frame_msg.reply);
                                    }
                                    break;
                                }
                                Ok(Frame::Error(err)) => {
                                    let _ =
                                        tx.send(Err(Error::app(err.error_message))).await;
                                    break;
                                }
                                Err(err) => {
                                    let _ = tx.send(Err(err)).await;
                                    break;
                                }
                            }
                        }
                    });

                    let result = handler(ctx, InboundFrames::new(rx)).await;
                    // Reply only to a normal close; an aborted session has
                    // nowhere (and no right) to deliver a success.
                    match done_rx.await {
                        Ok(Some(reply)) => match result {
                            Ok(output) => {
                                if let Err(err) =
                                    conn.publish(&reply, wire::encode_ok(&output)).await
                                {
                                    tracing::warn!(reply, %err, "failed to publish stream reply");
                                }
                            }
                            Err(err) => {
                                let _ = conn.handle_error(Some(&reply), &err).await;
                            }
                        },
                        Ok(None) | Err(_) => {
                            if let Err(err) = result {
                                tracing::debug!(%err, "stream handler failed after abort");
                            }
                        }
                    }
                })
            }),
        )
    }

    /// Register a server-streaming method. The handler pushes items into
    /// the sink; the dispatcher emits the terminal frame when it returns.
    pub fn server_stream<I, O, F, Fut>(&mut self, method: &str, handler: F) -> Result<()>
    where
        I: Message + Default + 'static,
        O: Message + 'static,
        F: Fn(CallContext, I, StreamSink<O>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let conn = self.conn.clone();
        let handler = Arc::new(handler);
        self.insert(
            method,
            Arc::new(move |ctx, msg| {
                let conn = conn.clone();
                let handler = handler.clone();
                Box::pin(async move {
                    let Some(session) = msg.reply.as_deref().filter(|r| !r.is_empty()) else {
                        tracing::warn!(subject = %msg.subject, "stream request without session subject");
                        return;
                    };
                    let input = match I::decode(&msg.payload[..]) {
                        Ok(input) => input,
                        Err(err) => {
                            let _ = conn.handle_error(Some(session), &err.into()).await;
                            return;
                        }
                    };
                    let sink = StreamSink::new(conn.clone(), session.to_string());
                    match handler(ctx, input, sink).await {
                        Ok(()) => {
                            if let Err(err) = conn.publish(session, wire::encode_done()).await {
                                tracing::warn!(session, %err, "failed to publish stream terminal");
                            }
                        }
                        Err(err) => {
                            let _ = conn.handle_error(Some(session), &err).await;
                        }
                    }
                })
            }),
        )
    }

    /// Subscribe every registered method and start dispatching. Consumes
    /// the dispatcher; the returned handle keeps the service live.
    pub async fn bind(self) -> Result<BoundService> {
        let mut shutdown = Vec::with_capacity(self.methods.len());
        for (method, dispatch) in self.methods {
            let subject = wire::subject(&self.namespace, &method);
            let mut sub = self.conn.subscribe(&subject, Some(&self.service)).await?;
            let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
            shutdown.push(stop_tx);

            let bus_id = self.conn.bus_id().to_string();
            tracing::debug!(subject = %subject, group = %self.service, "method bound");
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        msg = sub.next() => {
                            let Some(msg) = msg else { break };
                            let ctx = CallContext { bus_id: bus_id.clone() };
                            tokio::spawn(dispatch(ctx, msg));
                        }
                    }
                }
            });
        }
        tracing::info!(service = %self.service, namespace = %self.namespace, "service bound");
        Ok(BoundService {
            service: self.service,
            shutdown,
        })
    }
}

/// Keeps a bound service's dispatch loops alive; dropping it (or calling
/// [`unbind`](Self::unbind)) unsubscribes every method.
pub struct BoundService {
    service: String,
    shutdown: Vec<oneshot::Sender<()>>,
}

impl BoundService {
    /// Stop dispatching. Calls already in flight run to completion;
    /// subsequent requests find no subscriber and time out at the caller.
    pub fn unbind(mut self) {
        for stop in self.shutdown.drain(..) {
            let _ = stop.send(());
        }
        tracing::info!(service = %self.service, "service unbound");
    }
}

impl Drop for BoundService {
    fn drop(&mut self) {
        for stop in self.shutdown.drain(..) {
            let _ = stop.send(());
        }
    }
}
