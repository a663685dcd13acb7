//! Streaming emulation over the pub/sub bus
//!
//! Streams are not a transport feature here; they are sessions of
//! correlated frames on a per-call session subject. Every frame reuses
//! the envelope grammar: status 0 carries one encoded item, status 1
//! aborts the session with an error, status 2 ends it normally.
//! Termination is always an explicit terminal frame; a vanished peer is
//! a timeout, never a silent end-of-stream.
//!
//! Client-streaming opens with a request/reply handshake: the opening
//! call's reply inbox doubles as the correlation root, and both sides
//! derive the session subject as `<inbox>.stream`. The server subscribes
//! to it before acking, so no data frame can outrun the subscription.

use std::marker::PhantomData;

use prost::Message;
use tokio::sync::mpsc;

use crate::connection::BusConnection;
use crate::transport::Subscription;
use crate::wire::{self, ErrorMessage, Frame};
use crate::{Error, Result};

/// Session subject derived from an opening call's reply inbox.
pub fn session_subject(reply_inbox: &str) -> String {
    format!("{reply_inbox}.stream")
}

impl BusConnection {
    /// Open a client-streaming session on `subject`.
    ///
    /// Blocks until the server has subscribed to the session subject and
    /// acked, bounded by the request timeout.
    pub async fn open_client_stream<I, O>(&self, subject: &str) -> Result<ClientStream<I, O>>
    where
        I: Message,
        O: Message + Default,
    {
        let inbox = Self::new_inbox();
        let mut ack = self.subscribe(&inbox, None).await?;
        self.publish_with_reply(subject, &inbox, wire::encode_ok(&wire::Empty {}))
            .await?;
        let reply = self.await_reply(&mut ack, subject).await?;
        let _: wire::Empty = wire::decode_reply(&reply.payload)?;

        Ok(ClientStream {
            conn: self.clone(),
            session: session_subject(&inbox),
            subject: subject.to_string(),
            _input: PhantomData,
            _output: PhantomData,
        })
    }

    /// Open a server-streaming session: subscribe a fresh session subject,
    /// then publish the request with that subject as the reply.
    pub async fn open_server_stream<I, O>(&self, subject: &str, input: &I) -> Result<ServerStream<O>>
    where
        I: Message,
        O: Message + Default,
    {
        let session = Self::new_inbox();
        let sub = self.subscribe(&session, None).await?;
        self.publish_with_reply(subject, &session, input.encode_to_vec())
            .await?;
        Ok(ServerStream {
            conn: self.clone(),
            sub,
            subject: subject.to_string(),
            finished: false,
            _output: PhantomData,
        })
    }
}

/// Client half of a client-streaming call.
pub struct ClientStream<I, O> {
    conn: BusConnection,
    session: String,
    subject: String,
    _input: PhantomData<I>,
    _output: PhantomData<O>,
}

impl<I, O> ClientStream<I, O>
where
    I: Message,
    O: Message + Default,
{
    /// Publish one item; does not wait for the server to consume it
    /// beyond transport backpressure.
    pub async fn send(&self, input: &I) -> Result<()> {
        self.conn
            .publish(&self.session, wire::encode_ok(input))
            .await
    }

    /// End the stream normally and wait for the single aggregated reply,
    /// exactly like a unary call.
    pub async fn done(self) -> Result<O> {
        let inbox = BusConnection::new_inbox();
        let mut reply_sub = self.conn.subscribe(&inbox, None).await?;
        self.conn
            .publish_with_reply(&self.session, &inbox, wire::encode_done())
            .await?;
        let reply = self.conn.await_reply(&mut reply_sub, &self.subject).await?;
        wire::decode_reply(&reply.payload)
    }

    /// Abort the session; the server sees the error instead of a close
    /// and must not produce a success reply.
    pub async fn abort(self, message: impl Into<String>) -> Result<()> {
        let err = ErrorMessage::now(&Error::app(message.into()), self.conn.bus_id());
        self.conn
            .publish(&self.session, wire::encode_error(&err))
            .await
    }
}

/// Client half of a server-streaming call.
pub struct ServerStream<O> {
    conn: BusConnection,
    sub: Subscription,
    subject: String,
    finished: bool,
    _output: PhantomData<O>,
}

impl<O> ServerStream<O>
where
    O: Message + Default,
{
    /// Receive the next item. `Ok(None)` marks the explicit end-of-stream
    /// terminal; a server-side fault surfaces as `Err` carrying the
    /// handler's message, never as silent truncation.
    pub async fn receive(&mut self) -> Result<Option<O>> {
        if self.finished {
            return Ok(None);
        }
        let msg = self.conn.await_reply(&mut self.sub, &self.subject).await?;
        match wire::decode_frame(&msg.payload)? {
            Frame::Data(payload) => Ok(Some(O::decode(payload.as_slice())?)),
            Frame::Done => {
                self.finished = true;
                Ok(None)
            }
            Frame::Error(err) => {
                self.finished = true;
                Err(Error::app(err.error_message))
            }
        }
    }
}

/// Inbound items of a client-streaming call, as seen by the handler.
pub struct InboundFrames<I> {
    receiver: mpsc::Receiver<Result<I>>,
}

impl<I> InboundFrames<I> {
    pub(crate) fn new(receiver: mpsc::Receiver<Result<I>>) -> Self {
        Self { receiver }
    }

    /// Next item: `Ok(Some)` for a data frame, `Ok(None)` for the normal
    /// close, `Err` when the client aborted the session.
    pub async fn recv(&mut self) -> Result<Option<I>> {
        match self.receiver.recv().await {
            Some(Ok(item)) => Ok(Some(item)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

/// Outbound side of a server-streaming call, handed to the handler.
pub struct StreamSink<O> {
    conn: BusConnection,
    session: String,
    _output: PhantomData<O>,
}

impl<O> StreamSink<O>
where
    O: Message,
{
    pub(crate) fn new(conn: BusConnection, session: String) -> Self {
        Self {
            conn,
            session,
            _output: PhantomData,
        }
    }

    /// Publish one item frame to the session.
    pub async fn send(&self, item: &O) -> Result<()> {
        self.conn
            .publish(&self.session, wire::encode_ok(item))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Config;
    use crate::wire::HealthCheckInfo;
    use uuid::Uuid;

    fn connect(tag: &str) -> (BusConnection, BusConnection) {
        let url = format!("mem://{tag}-{}", Uuid::new_v4());
        let server = BusConnection::connect(Config::new(url.as_str())).unwrap();
        let client = BusConnection::connect(Config::new(url.as_str())).unwrap();
        (server, client)
    }

    /// Minimal hand-rolled server side of the open handshake: derive the
    /// session subject, subscribe, ack, and return the session subscription.
    async fn accept_client_stream(server: &BusConnection, open: &mut Subscription) -> Subscription {
        let msg = open.next().await.unwrap();
        let reply = msg.reply.unwrap();
        let session = server
            .subscribe(&session_subject(&reply), None)
            .await
            .unwrap();
        server
            .publish(&reply, wire::encode_ok(&wire::Empty {}))
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn client_stream_frames_arrive_in_send_order() {
        let (server, client) = connect("cs-order");
        let mut open = server.subscribe("svc/Upload", None).await.unwrap();

        let srv = server.clone();
        let echo = tokio::spawn(async move {
            let mut session = accept_client_stream(&srv, &mut open).await;
            let mut seen = Vec::new();
            loop {
                let msg = session.next().await.unwrap();
                match wire::decode_frame(&msg.payload).unwrap() {
                    Frame::Data(payload) => {
                        seen.push(HealthCheckInfo::decode(payload.as_slice()).unwrap().data)
                    }
                    Frame::Done => {
                        let out = HealthCheckInfo {
                            data: seen.join(","),
                        };
                        srv.publish(&msg.reply.unwrap(), wire::encode_ok(&out))
                            .await
                            .unwrap();
                        return;
                    }
                    Frame::Error(_) => panic!("unexpected abort"),
                }
            }
        });

        let stream = client
            .open_client_stream::<HealthCheckInfo, HealthCheckInfo>("svc/Upload")
            .await
            .unwrap();
        for data in ["a", "b", "c"] {
            stream
                .send(&HealthCheckInfo {
                    data: data.to_string(),
                })
                .await
                .unwrap();
        }
        let out = stream.done().await.unwrap();
        assert_eq!(out.data, "a,b,c");
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn client_stream_abort_reaches_the_server_as_an_error_frame() {
        let (server, client) = connect("cs-abort");
        let mut open = server.subscribe("svc/Upload", None).await.unwrap();

        let srv = server.clone();
        let observer = tokio::spawn(async move {
            let mut session = accept_client_stream(&srv, &mut open).await;
            let msg = session.next().await.unwrap();
            match wire::decode_frame(&msg.payload).unwrap() {
                Frame::Error(err) => err.error_message,
                other => panic!("expected error frame, got {other:?}"),
            }
        });

        let stream = client
            .open_client_stream::<HealthCheckInfo, HealthCheckInfo>("svc/Upload")
            .await
            .unwrap();
        stream.abort("client gave up").await.unwrap();
        assert_eq!(observer.await.unwrap(), "client gave up");
    }

    #[tokio::test]
    async fn server_stream_yields_items_until_the_done_terminal() {
        let (server, client) = connect("ss-done");
        let mut inbound = server.subscribe("svc/List", None).await.unwrap();

        let srv = server.clone();
        tokio::spawn(async move {
            let msg = inbound.next().await.unwrap();
            let session = msg.reply.unwrap();
            for data in ["x", "y"] {
                let item = HealthCheckInfo {
                    data: data.to_string(),
                };
                srv.publish(&session, wire::encode_ok(&item)).await.unwrap();
            }
            srv.publish(&session, wire::encode_done()).await.unwrap();
        });

        let mut stream = client
            .open_server_stream::<HealthCheckInfo, HealthCheckInfo>(
                "svc/List",
                &HealthCheckInfo::default(),
            )
            .await
            .unwrap();
        assert_eq!(stream.receive().await.unwrap().unwrap().data, "x");
        assert_eq!(stream.receive().await.unwrap().unwrap().data, "y");
        assert!(stream.receive().await.unwrap().is_none());
        // Receiving past the terminal stays at end-of-stream.
        assert!(stream.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_stream_error_terminal_surfaces_as_a_call_error() {
        let (server, client) = connect("ss-err");
        let mut inbound = server.subscribe("svc/List", None).await.unwrap();

        let srv = server.clone();
        tokio::spawn(async move {
            let msg = inbound.next().await.unwrap();
            let session = msg.reply.unwrap();
            let err = ErrorMessage::now(&Error::app("storage offline"), srv.bus_id());
            srv.publish(&session, wire::encode_error(&err)).await.unwrap();
        });

        let mut stream = client
            .open_server_stream::<HealthCheckInfo, HealthCheckInfo>(
                "svc/List",
                &HealthCheckInfo::default(),
            )
            .await
            .unwrap();
        let err = stream.receive().await.unwrap_err();
        assert_eq!(err.to_string(), "storage offline");
    }

    #[tokio::test]
    async fn inbound_frames_distinguish_close_from_abort() {
        let (tx, rx) = mpsc::channel(4);
        let mut frames = InboundFrames::<u32>::new(rx);
        tx.send(Ok(1)).await.unwrap();
        tx.send(Err(Error::app("aborted"))).await.unwrap();
        drop(tx);

        assert_eq!(frames.recv().await.unwrap(), Some(1));
        assert!(frames.recv().await.is_err());
        assert_eq!(frames.recv().await.unwrap(), None);
    }
}
