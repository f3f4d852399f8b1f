//! Thrift client.
//!
//! Holds one connection, opened on first use. Calls on a client are
//! serialized. A connection that fails mid-call, or whose call is
//! cancelled, is dropped and the next call reconnects.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sonar_core::{
    BoxFuture, CallContext, Endpoint, PingRequest, PingResponse, SonarError, SonarResult,
    PING_METHOD,
};
use sonar_middleware::{EndpointSet, SetOptions};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::protocol::{MessageStream, MessageType, ProtocolResult};
use super::{
    decode_response, encode_call, exception, read_exception, read_ping_result,
    ApplicationException, TransportMode,
};

type Connection = MessageStream<TcpStream>;

/// Raw Thrift endpoint for the ping method.
#[derive(Debug)]
pub struct ThriftClient {
    addr: String,
    mode: TransportMode,
    buffer_size: usize,
    connect_timeout: Option<Duration>,
    conn: Mutex<Option<Connection>>,
    seq_id: AtomicI32,
}

impl ThriftClient {
    /// Creates a client for the server at `addr` (`host:port`).
    pub fn new(addr: &str, mode: TransportMode) -> SonarResult<Self> {
        let valid = addr
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid {
            return Err(SonarError::config(format!(
                "invalid Thrift address '{addr}': expected host:port"
            )));
        }

        Ok(Self {
            addr: addr.to_string(),
            mode,
            buffer_size: 0,
            connect_timeout: None,
            conn: Mutex::new(None),
            seq_id: AtomicI32::new(0),
        })
    }

    /// Sets the connection buffer size; zero (the default) is unbuffered.
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Bounds how long opening the connection may take.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn connect(&self) -> SonarResult<Connection> {
        let connect = TcpStream::connect(self.addr.as_str());
        let stream = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| SonarError::transport(format!("connect to {} timed out", self.addr)))?,
            None => connect.await,
        }
        .map_err(|e| SonarError::transport(format!("connect to {}: {e}", self.addr)))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(addr = %self.addr, error = %e, "failed to set TCP_NODELAY");
        }

        tracing::debug!(addr = %self.addr, mode = ?self.mode, "Thrift connection opened");
        Ok(MessageStream::new(stream, self.mode, self.buffer_size))
    }

    async fn ping(&self, ctx: &CallContext, _request: PingRequest) -> SonarResult<PingResponse> {
        ctx.guard(async {
            let mut slot = self.conn.lock().await;
            let mut conn = match slot.take() {
                Some(conn) => conn,
                None => self.connect().await?,
            };

            let seq_id = self.seq_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            conn.write_message(&encode_call(seq_id)).await?;
            let outcome = read_reply(&mut conn, seq_id).await?;

            // only a connection that finished the exchange is reused
            *slot = Some(conn);
            outcome
        })
        .await
    }
}

/// Reads the reply to call `seq_id`. The outer error means the connection
/// is no longer usable.
async fn read_reply(
    conn: &mut Connection,
    seq_id: i32,
) -> ProtocolResult<SonarResult<PingResponse>> {
    let mut reader = conn.reader().await?;
    let header = reader.read_message_begin().await?;

    let outcome: SonarResult<PingResponse> = match header.kind {
        MessageType::Exception => Err(read_exception(&mut reader).await?.into()),
        MessageType::Reply => match read_ping_result(&mut reader).await? {
            Some(reply) => Ok(decode_response(reply)),
            None => Err(ApplicationException::new(
                exception::MISSING_RESULT,
                "Ping failed: unknown result",
            )
            .into()),
        },
        MessageType::Call | MessageType::Oneway => {
            reader.skip_struct().await?;
            Err(ApplicationException::new(
                exception::INVALID_MESSAGE_TYPE,
                format!("unexpected message type {:?}", header.kind),
            )
            .into())
        }
    };

    if header.name != PING_METHOD {
        return Ok(Err(ApplicationException::new(
            exception::WRONG_METHOD_NAME,
            format!("reply for {} to a Ping call", header.name),
        )
        .into()));
    }
    if header.seq_id != seq_id {
        return Ok(Err(ApplicationException::new(
            exception::BAD_SEQUENCE_ID,
            format!("reply {} to call {seq_id}", header.seq_id),
        )
        .into()));
    }
    Ok(outcome)
}

impl Endpoint<PingRequest, PingResponse> for ThriftClient {
    fn call<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: PingRequest,
    ) -> BoxFuture<'a, SonarResult<PingResponse>> {
        Box::pin(self.ping(ctx, request))
    }
}

/// Builds a client-side [`EndpointSet`] talking Thrift to `addr`.
pub fn new_client(
    addr: &str,
    mode: TransportMode,
    buffer_size: usize,
    connect_timeout: Option<Duration>,
    options: &SetOptions,
) -> SonarResult<EndpointSet> {
    let raw = ThriftClient::new(addr, mode)?
        .buffer_size(buffer_size)
        .connect_timeout(connect_timeout);
    Ok(EndpointSet::client(Arc::new(raw), options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownSignal;
    use crate::thrift::ThriftServer;
    use sonar_core::BasicService;
    use sonar_middleware::LogSink;
    use tokio::net::TcpListener;

    async fn start(mode: TransportMode, options: &SetOptions) -> (String, ShutdownSignal) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let shutdown = ShutdownSignal::new();
        let server = ThriftServer::new(
            EndpointSet::server(BasicService::seeded(0.0, 1).unwrap(), options),
            mode,
        );
        tokio::spawn(server.serve(listener, shutdown.clone()));
        (addr, shutdown)
    }

    fn quiet() -> SetOptions {
        SetOptions::new().logger(LogSink::discard())
    }

    #[test]
    fn test_invalid_address() {
        for addr in ["localhost", ":9000", "host:port"] {
            let err = ThriftClient::new(addr, TransportMode::Buffered).unwrap_err();
            assert!(matches!(err, SonarError::Config(_)), "{addr}");
        }
    }

    #[tokio::test]
    async fn test_reuses_connection_across_calls() {
        for mode in [TransportMode::Buffered, TransportMode::Framed] {
            let (addr, shutdown) = start(mode, &quiet()).await;
            let client = ThriftClient::new(&addr, mode).unwrap();
            let ctx = CallContext::new();

            for _ in 0..3 {
                let response = client.call(&ctx, PingRequest::default()).await.unwrap();
                assert_eq!(response, PingResponse::ok("pong"));
            }
            assert_eq!(client.seq_id.load(Ordering::Relaxed), 3);
            assert!(client.conn.lock().await.is_some());
            shutdown.trigger();
        }
    }

    #[tokio::test]
    async fn test_exception_maps_to_status() {
        let (addr, shutdown) = start(TransportMode::Buffered, &quiet().rate_limit(0.0, 1)).await;
        let client = ThriftClient::new(&addr, TransportMode::Buffered).unwrap();
        let ctx = CallContext::new();

        assert!(client.call(&ctx, PingRequest::default()).await.is_ok());
        let err = client.call(&ctx, PingRequest::default()).await.unwrap_err();
        assert_eq!(
            err,
            SonarError::status(exception::INTERNAL_ERROR as u16, "rate limit exceeded")
        );
        // an exception is a complete reply; the connection stays open
        assert!(client.conn.lock().await.is_some());
        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = ThriftClient::new(&addr, TransportMode::Buffered)
            .unwrap()
            .connect_timeout(Some(Duration::from_secs(1)));
        let err = client
            .call(&CallContext::new(), PingRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SonarError::Transport(_)));
    }

    #[tokio::test]
    async fn test_cancelled_call_never_connects() {
        let (addr, shutdown) = start(TransportMode::Framed, &quiet()).await;
        let client = ThriftClient::new(&addr, TransportMode::Framed).unwrap();

        let ctx = CallContext::new();
        ctx.cancel();
        assert_eq!(
            client.call(&ctx, PingRequest::default()).await,
            Err(SonarError::Cancelled)
        );
        assert!(client.conn.lock().await.is_none());

        assert!(client.call(&CallContext::new(), PingRequest::default()).await.is_ok());
        shutdown.trigger();
    }
}
