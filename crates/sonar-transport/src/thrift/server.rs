//! Thrift server.
//!
//! One task per connection, serving calls one after another. Shutdown is
//! observed between messages: a call already read is answered before the
//! connection closes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sonar_core::{CallContext, PingRequest, PING_METHOD};
use sonar_middleware::EndpointSet;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use super::protocol::{
    MessageHeader, MessageStream, MessageType, ProtocolResult, DEFAULT_BUFFER_SIZE,
};
use super::{
    encode_exception, encode_reply, encode_response, exception, ApplicationException,
    TransportMode,
};
use crate::error::ServeError;
use crate::shutdown::{ConnectionTracker, ShutdownSignal, DEFAULT_SHUTDOWN_TIMEOUT};

/// Serves an [`EndpointSet`] as a Thrift service.
#[derive(Debug, Clone)]
pub struct ThriftServer {
    endpoints: EndpointSet,
    mode: TransportMode,
    buffer_size: usize,
    shutdown_timeout: Duration,
}

impl ThriftServer {
    /// Creates a server for `endpoints`.
    #[must_use]
    pub fn new(endpoints: EndpointSet, mode: TransportMode) -> Self {
        Self {
            endpoints,
            mode,
            buffer_size: DEFAULT_BUFFER_SIZE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Sets the per-connection buffer size; zero disables buffering.
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets how long shutdown waits for open connections.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Accepts connections on `listener` until `shutdown` triggers, then
    /// waits for open connections up to the shutdown timeout.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), ServeError> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, mode = ?self.mode, "Thrift server listening");

        let server = Arc::new(self);
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, remote_addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!(%remote_addr, error = %e, "failed to set TCP_NODELAY");
                        }
                        let server = Arc::clone(&server);
                        let token = tracker.acquire();
                        let shutdown = shutdown.clone();

                        tokio::spawn(async move {
                            server.handle_connection(stream, remote_addr, shutdown).await;
                            drop(token);
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "failed to accept Thrift connection"),
                },
                () = shutdown.recv() => break,
            }
        }

        tracker.drain("thrift", server.shutdown_timeout).await;
        tracing::info!(%addr, "Thrift server stopped");
        Ok(())
    }

    async fn handle_connection<S>(&self, io: S, remote_addr: SocketAddr, shutdown: ShutdownSignal)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut conn = MessageStream::new(io, self.mode, self.buffer_size);

        loop {
            let header = tokio::select! {
                result = read_call(&mut conn) => match result {
                    Ok(header) => header,
                    Err(e) if e.is_eof() => return,
                    Err(e) => {
                        tracing::debug!(%remote_addr, error = %e, "Thrift protocol error");
                        return;
                    }
                },
                () = shutdown.recv() => return,
            };

            let Some(reply) = self.dispatch(&header).await else {
                continue;
            };
            if let Err(e) = conn.write_message(&reply).await {
                tracing::debug!(%remote_addr, error = %e, "failed to write Thrift reply");
                return;
            }
        }
    }

    /// Answers one call. Oneway messages get no reply.
    async fn dispatch(&self, header: &MessageHeader) -> Option<Bytes> {
        match header.kind {
            MessageType::Call if header.name == PING_METHOD => Some(self.ping(header.seq_id).await),
            MessageType::Call => {
                let unknown = ApplicationException::new(
                    exception::UNKNOWN_METHOD,
                    format!("unknown method {}", header.name),
                );
                Some(encode_exception(&header.name, header.seq_id, &unknown))
            }
            MessageType::Oneway => {
                tracing::debug!(method = %header.name, "ignoring oneway Thrift message");
                None
            }
            MessageType::Reply | MessageType::Exception => {
                let invalid = ApplicationException::new(
                    exception::INVALID_MESSAGE_TYPE,
                    format!("unexpected message type {:?}", header.kind),
                );
                Some(encode_exception(&header.name, header.seq_id, &invalid))
            }
        }
    }

    async fn ping(&self, seq_id: i32) -> Bytes {
        let ctx = CallContext::new();
        match self.endpoints.ping.call(&ctx, PingRequest::default()).await {
            Ok(response) => encode_reply(seq_id, &encode_response(&response)),
            Err(err) => {
                tracing::debug!(error = %err, "Thrift ping failed");
                encode_exception(PING_METHOD, seq_id, &ApplicationException::internal(&err))
            }
        }
    }
}

/// Reads the next call header and discards its arguments.
async fn read_call<S>(conn: &mut MessageStream<S>) -> ProtocolResult<MessageHeader>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut reader = conn.reader().await?;
    let header = reader.read_message_begin().await?;
    reader.skip_struct().await?;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thrift::protocol::{BinaryReader, MessageWriter};
    use crate::thrift::{read_exception, read_ping_result};
    use sonar_core::BasicService;
    use sonar_middleware::{LogSink, SetOptions};
    use std::io::Cursor;

    fn server(failure_rate: f64, options: &SetOptions) -> ThriftServer {
        ThriftServer::new(
            EndpointSet::server(BasicService::seeded(failure_rate, 9).unwrap(), options),
            TransportMode::Buffered,
        )
    }

    fn quiet() -> SetOptions {
        SetOptions::new().logger(LogSink::discard())
    }

    fn header(name: &str, kind: MessageType, seq_id: i32) -> MessageHeader {
        MessageHeader {
            name: name.to_string(),
            kind,
            seq_id,
        }
    }

    fn reader(message: &Bytes) -> BinaryReader<Cursor<Vec<u8>>> {
        BinaryReader::new(Cursor::new(message.to_vec()))
    }

    #[tokio::test]
    async fn test_ping_reply() {
        let reply = server(0.0, &quiet())
            .dispatch(&header("Ping", MessageType::Call, 3))
            .await
            .unwrap();

        let mut reader = reader(&reply);
        let header = reader.read_message_begin().await.unwrap();
        assert_eq!(header.kind, MessageType::Reply);
        assert_eq!(header.seq_id, 3);
        let result = read_ping_result(&mut reader).await.unwrap().unwrap();
        assert_eq!(result.value, "pong");
        assert_eq!(result.err, "");
    }

    #[tokio::test]
    async fn test_domain_failure_in_reply() {
        let reply = server(1.0, &quiet())
            .dispatch(&header("Ping", MessageType::Call, 1))
            .await
            .unwrap();

        let mut reader = reader(&reply);
        reader.read_message_begin().await.unwrap();
        let result = read_ping_result(&mut reader).await.unwrap().unwrap();
        assert_eq!(result.value, "");
        assert_eq!(result.err, "probe failed");
    }

    #[tokio::test]
    async fn test_endpoint_error_is_internal_exception() {
        let limited = server(0.0, &quiet().rate_limit(0.0, 1));
        limited.dispatch(&header("Ping", MessageType::Call, 1)).await.unwrap();
        let rejected = limited
            .dispatch(&header("Ping", MessageType::Call, 2))
            .await
            .unwrap();

        let mut reader = reader(&rejected);
        assert_eq!(reader.read_message_begin().await.unwrap().kind, MessageType::Exception);
        let received = read_exception(&mut reader).await.unwrap();
        assert_eq!(received.kind, exception::INTERNAL_ERROR);
        assert_eq!(received.message, "rate limit exceeded");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let reply = server(0.0, &quiet())
            .dispatch(&header("Pong", MessageType::Call, 8))
            .await
            .unwrap();

        let mut reader = reader(&reply);
        let header = reader.read_message_begin().await.unwrap();
        assert_eq!(header.name, "Pong");
        assert_eq!(header.seq_id, 8);
        let received = read_exception(&mut reader).await.unwrap();
        assert_eq!(received.kind, exception::UNKNOWN_METHOD);
    }

    #[tokio::test]
    async fn test_oneway_gets_no_reply() {
        let reply = server(0.0, &quiet())
            .dispatch(&header("Ping", MessageType::Oneway, 1))
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_connection_serves_calls_in_sequence() {
        let (client, server_io) = tokio::io::duplex(4096);
        let server = server(0.0, &quiet());
        let shutdown = ShutdownSignal::new();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { server.handle_connection(server_io, addr, shutdown).await }
        });

        let mut client = MessageStream::new(client, TransportMode::Buffered, 0);
        for seq_id in 1..=3 {
            let mut call = MessageWriter::begin("Ping", MessageType::Call, seq_id);
            call.write_field_stop();
            client.write_message(&call.finish()).await.unwrap();

            let mut reader = client.reader().await.unwrap();
            assert_eq!(reader.read_message_begin().await.unwrap().seq_id, seq_id);
            let result = read_ping_result(&mut reader).await.unwrap().unwrap();
            assert_eq!(result.value, "pong");
        }

        drop(client);
        task.await.unwrap();
    }
}
