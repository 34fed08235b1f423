// rpc.rs — request/response transport over TCP.
//
// Framing: one JSON object per line.
//   request   {"id": 7, "method": "Worker.Count", "params": {}}
//   response  {"id": 7, "result": {...}}   or   {"id": 7, "error": "..."}
// Calls are matched to replies by id, so a long-held call (Run) can share a
// connection with short ones (Count, Command). The server runs every request
// on its own task and writes replies in completion order.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::{GolError, GolResult};

#[derive(Debug, Serialize, Deserialize)]
struct RequestFrame {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResponseFrame {
    id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Server-side dispatch for one service.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, method: &str, params: Value) -> GolResult<Value>;
}

/// Decode typed params, run `f`, encode the reply.
pub async fn dispatch<P, R, F, Fut>(params: Value, f: F) -> GolResult<Value>
where
    P: DeserializeOwned,
    R: Serialize,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = GolResult<R>>,
{
    let params: P = serde_json::from_value(params)?;
    let reply = f(params).await?;
    Ok(serde_json::to_value(reply)?)
}

async fn write_frame<T: Serialize>(
    writer: &tokio::sync::Mutex<OwnedWriteHalf>,
    frame: &T,
) -> GolResult<()> {
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    let mut writer = writer.lock().await;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub struct RpcServer {
    listener: TcpListener,
    service: &'static str,
}

impl RpcServer {
    pub async fn bind(addr: &str, service: &'static str) -> GolResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GolError::Connection(format!("listen on {}: {}", addr, e)))?;
        Ok(RpcServer { listener, service })
    }

    pub fn local_addr(&self) -> GolResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` turns true (or its sender goes
    /// away), then wait for the open connections to be closed by their peers.
    pub async fn serve(
        self,
        handler: Arc<dyn Handler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> GolResult<()> {
        let addr = self.local_addr()?;
        info!("📡 [{}] Listening on {}", self.service, addr);

        let mut connections = JoinSet::new();
        while !*shutdown.borrow() {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    stream.set_nodelay(true)?;
                    info!("[{}] Connection from {}", self.service, peer);
                    connections.spawn(serve_connection(stream, handler.clone(), self.service));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(self.listener);
        info!(
            "[{}] Stopped accepting, {} connection(s) still open",
            self.service,
            connections.len()
        );
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

async fn serve_connection(stream: TcpStream, handler: Arc<dyn Handler>, service: &'static str) {
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(tokio::sync::Mutex::new(write_half));
    let mut lines = BufReader::new(read_half).lines();
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let frame = match serde_json::from_str::<RequestFrame>(trimmed) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("[{}] Dropping malformed request: {}", service, e);
                            continue;
                        }
                    };
                    let handler = handler.clone();
                    let writer = writer.clone();
                    in_flight.spawn(async move {
                        debug!("[{}] -> {} #{}", service, frame.method, frame.id);
                        let reply = match handler.handle(&frame.method, frame.params).await {
                            Ok(value) => ResponseFrame { id: frame.id, result: Some(value), error: None },
                            Err(e) => ResponseFrame { id: frame.id, result: None, error: Some(e.to_string()) },
                        };
                        if let Err(e) = write_frame(&writer, &reply).await {
                            warn!("[{}] Reply to {} #{} lost: {}", service, frame.method, frame.id, e);
                        }
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("[{}] Read failed: {}", service, e);
                    break;
                }
            },
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
    }

    // Peer hung up: whatever is still running has nobody to answer.
    debug!("[{}] Connection closed, abandoning {} call(s)", service, in_flight.len());
}

#[derive(Default)]
struct PendingCalls {
    calls: HashMap<u64, oneshot::Sender<ResponseFrame>>,
    closed: bool,
}

/// Client end of a link. Safe to share; calls may overlap.
pub struct RpcClient {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Arc<Mutex<PendingCalls>>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl RpcClient {
    pub async fn dial(addr: &str) -> GolResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| GolError::Connection(format!("dial {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let pending = Arc::new(Mutex::new(PendingCalls::default()));
        let reader = tokio::spawn(read_replies(read_half, pending.clone()));

        info!("🔗 [RpcClient] Connected to {}", addr);
        Ok(RpcClient {
            writer: tokio::sync::Mutex::new(write_half),
            pending,
            next_id: AtomicU64::new(1),
            reader,
        })
    }

    pub async fn call<P, R>(&self, method: &str, params: &P) -> GolResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(GolError::call(method, "connection closed"));
            }
            pending.calls.insert(id, tx);
        }

        let frame = RequestFrame {
            id,
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };
        if let Err(e) = write_frame(&self.writer, &frame).await {
            self.pending.lock().calls.remove(&id);
            return Err(GolError::call(method, e.to_string()));
        }

        let reply = rx
            .await
            .map_err(|_| GolError::call(method, "connection closed before reply"))?;
        match (reply.result, reply.error) {
            (_, Some(error)) => Err(GolError::call(method, error)),
            (Some(value), None) => serde_json::from_value(value)
                .map_err(|e| GolError::call(method, format!("malformed reply: {}", e))),
            (None, None) => Err(GolError::call(method, "empty reply")),
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_replies(read_half: OwnedReadHalf, pending: Arc<Mutex<PendingCalls>>) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<ResponseFrame>(line.trim()) {
                Ok(frame) => {
                    let waiter = pending.lock().calls.remove(&frame.id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(frame);
                        }
                        None => debug!("[RpcClient] Reply #{} for an abandoned call", frame.id),
                    }
                }
                Err(e) => warn!("[RpcClient] Dropping malformed reply: {}", e),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("[RpcClient] Read failed: {}", e);
                break;
            }
        }
    }

    // Dropping the senders wakes every waiting call with an error.
    let mut pending = pending.lock();
    pending.closed = true;
    pending.calls.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct EchoService;

    #[derive(Serialize, Deserialize)]
    struct Echo {
        text: String,
        delay_ms: u64,
    }

    #[async_trait]
    impl Handler for EchoService {
        async fn handle(&self, method: &str, params: Value) -> GolResult<Value> {
            match method {
                "Echo.Say" => {
                    dispatch(params, |req: Echo| async move {
                        tokio::time::sleep(Duration::from_millis(req.delay_ms)).await;
                        Ok(req.text)
                    })
                    .await
                }
                other => Err(GolError::UnknownMethod(other.to_string())),
            }
        }
    }

    async fn start() -> (SocketAddr, watch::Sender<bool>, JoinHandle<GolResult<()>>) {
        let server = RpcServer::bind("127.0.0.1:0", "Echo").await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(server.serve(Arc::new(EchoService), stop_rx));
        (addr, stop_tx, handle)
    }

    fn say(text: &str, delay_ms: u64) -> Echo {
        Echo { text: text.to_string(), delay_ms }
    }

    #[tokio::test]
    async fn call_round_trip() {
        let (addr, _stop, _server) = start().await;
        let client = RpcClient::dial(&addr.to_string()).await.unwrap();
        let reply: String = client.call("Echo.Say", &say("hello", 0)).await.unwrap();
        assert_eq!(reply, "hello");
    }

    #[tokio::test]
    async fn overlapping_calls_are_matched_by_id() {
        let (addr, _stop, _server) = start().await;
        let client = Arc::new(RpcClient::dial(&addr.to_string()).await.unwrap());

        let slow = {
            let client = client.clone();
            tokio::spawn(async move { client.call::<_, String>("Echo.Say", &say("slow", 150)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Answered while the slow call is still outstanding.
        let fast: String = client.call("Echo.Say", &say("fast", 0)).await.unwrap();
        assert_eq!(fast, "fast");
        assert!(!slow.is_finished());
        assert_eq!(slow.await.unwrap().unwrap(), "slow");
    }

    #[tokio::test]
    async fn unknown_method_is_a_call_error() {
        let (addr, _stop, _server) = start().await;
        let client = RpcClient::dial(&addr.to_string()).await.unwrap();
        let err = client.call::<_, String>("Echo.Shout", &say("x", 0)).await.unwrap_err();
        match err {
            GolError::Call { method, message } => {
                assert_eq!(method, "Echo.Shout");
                assert!(message.contains("unknown method"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn dial_without_listener_is_a_connection_error() {
        let server = RpcServer::bind("127.0.0.1:0", "Echo").await.unwrap();
        let addr = server.local_addr().unwrap();
        drop(server);
        let err = RpcClient::dial(&addr.to_string()).await.err().unwrap();
        assert!(matches!(err, GolError::Connection(_)));
    }

    #[tokio::test]
    async fn shutdown_stops_accepting_and_drains() {
        let (addr, stop, server) = start().await;
        let client = RpcClient::dial(&addr.to_string()).await.unwrap();
        let _: String = client.call("Echo.Say", &say("before", 0)).await.unwrap();

        stop.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(RpcClient::dial(&addr.to_string()).await.is_err());

        // The server is waiting on the open connection; closing it lets it finish.
        assert!(!server.is_finished());
        drop(client);
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("server did not drain")
            .unwrap()
            .unwrap();
    }
}
