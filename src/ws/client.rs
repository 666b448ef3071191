//! Client side of the peer link: dial the host with retry, then pump frames

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::game::{MatchCommand, MatchHandle};

use super::protocol::PeerMsg;
use super::transport::{HostLink, PEER_QUEUE_CAPACITY};
use super::NetError;

pub type HostStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bounded exponential backoff for reaching the host
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub attempt_timeout: Duration,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            attempt_timeout: Duration::from_millis(4500),
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `n` (1-based): base * 2^(n-1)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Opens one connection to a url
pub trait Dialer: Send + Sync {
    type Conn: Send;

    fn dial<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Self::Conn, NetError>>;
}

pub struct TungsteniteDialer;

impl Dialer for TungsteniteDialer {
    type Conn = HostStream;

    fn dial<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Self::Conn, NetError>> {
        Box::pin(async move {
            let (stream, _response) = connect_async(url)
                .await
                .map_err(|e| NetError::Transport(e.to_string()))?;
            Ok(stream)
        })
    }
}

/// `<host>/peer/<room peer id>?player_id=<id>`
pub fn peer_url(host_url: &str, room_peer_id: &str, player_id: &str) -> String {
    format!(
        "{}/peer/{}?player_id={}",
        host_url.trim_end_matches('/'),
        room_peer_id,
        player_id
    )
}

/// Try up to `policy.attempts` times, each bounded by `attempt_timeout`
pub async fn connect_with_retry<D: Dialer>(
    dialer: &D,
    url: &str,
    policy: &RetryPolicy,
    mut on_status: impl FnMut(&str),
) -> Result<D::Conn, NetError> {
    for attempt in 1..=policy.attempts {
        on_status(&format!("connecting (attempt {attempt}/{})", policy.attempts));

        match timeout(policy.attempt_timeout, dialer.dial(url)).await {
            Ok(Ok(conn)) => {
                info!(url = %url, attempt, "Connected to host");
                return Ok(conn);
            }
            Ok(Err(e)) => warn!(url = %url, attempt, error = %e, "Connection attempt failed"),
            Err(_) => warn!(
                url = %url,
                error = %NetError::ConnectTimeout { attempt },
                "Connection attempt failed"
            ),
        }

        if attempt < policy.attempts {
            sleep(policy.backoff(attempt)).await;
        }
    }

    Err(NetError::RetriesExhausted {
        attempts: policy.attempts,
    })
}

/// Dial the host, then shuttle frames between the socket and the match task
pub async fn run_client_link(
    url: String,
    link: Arc<HostLink>,
    handle: MatchHandle,
    policy: RetryPolicy,
) {
    let stream = match connect_with_retry(&TungsteniteDialer, &url, &policy, |s| {
        handle.connection_status(s)
    })
    .await
    {
        Ok(stream) => stream,
        Err(e) => {
            error!(url = %url, error = %e, "Could not reach host");
            handle.connection_status("connection failed");
            return;
        }
    };
    handle.connection_status("connected");

    let host_id = link.host_peer_id();
    let (mut ws_sink, mut ws_stream) = stream.split();
    let (tx, mut rx) = mpsc::channel::<String>(PEER_QUEUE_CAPACITY);
    link.attach(tx);

    if handle
        .commands
        .send(MatchCommand::PeerJoined {
            peer_id: host_id.clone(),
        })
        .await
        .is_err()
    {
        link.detach();
        return;
    }

    // Writer task: match outbox -> socket
    let writer_host = host_id.clone();
    let writer_handle = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = ws_sink.send(Message::Text(text)).await {
                debug!(peer_id = %writer_host, error = %e, "Host send failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // Reader loop: socket -> match task
    while let Some(frame) = ws_stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                link.touch();
                match PeerMsg::decode(&text) {
                    Ok(msg) => {
                        let cmd = MatchCommand::Message {
                            from: host_id.clone(),
                            msg,
                        };
                        if handle.commands.send(cmd).await.is_err() {
                            debug!("Match task gone, closing host link");
                            break;
                        }
                    }
                    Err(e) => debug!(peer_id = %host_id, error = %e, "Malformed frame from host"),
                }
            }
            Ok(Message::Close(_)) => {
                debug!(peer_id = %host_id, "Host closed the link");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(peer_id = %host_id, error = %e, "Host link error");
                break;
            }
        }
    }

    link.detach();
    writer_handle.abort();
    let _ = handle
        .commands
        .send(MatchCommand::PeerLeft {
            peer_id: host_id.clone(),
        })
        .await;
    handle.connection_status("host disconnected");
    info!(peer_id = %host_id, "Host link closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Never answers, like an unreachable host behind a silent firewall
    #[derive(Default)]
    struct BlackHole {
        attempts: AtomicU32,
    }

    impl Dialer for BlackHole {
        type Conn = ();

        fn dial<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<(), NetError>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(futures::future::pending())
        }
    }

    /// Fails until the given attempt, then connects
    struct FlakyHost {
        succeed_on: u32,
        attempts: AtomicU32,
    }

    impl Dialer for FlakyHost {
        type Conn = u32;

        fn dial<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<u32, NetError>> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let succeed_on = self.succeed_on;
            Box::pin(async move {
                if n >= succeed_on {
                    Ok(n)
                } else {
                    Err(NetError::Transport("refused".into()))
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_host_gives_up_after_five_attempts() {
        let dialer = BlackHole::default();
        let mut statuses = Vec::new();
        let started = tokio::time::Instant::now();

        let result = connect_with_retry(&dialer, "ws://nowhere", &RetryPolicy::default(), |s| {
            statuses.push(s.to_string())
        })
        .await;

        assert!(matches!(result, Err(NetError::RetriesExhausted { attempts: 5 })));
        assert_eq!(dialer.attempts.load(Ordering::SeqCst), 5);
        assert_eq!(statuses.len(), 5);
        assert_eq!(statuses[4], "connecting (attempt 5/5)");
        // 5 timeouts plus 500 + 1000 + 2000 + 4000 ms of backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(5 * 4500 + 7500));
        assert!(elapsed < Duration::from_millis(5 * 4500 + 7500 + 100));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_at_first_success() {
        let dialer = FlakyHost {
            succeed_on: 3,
            attempts: AtomicU32::new(0),
        };
        let conn = tokio_test::assert_ok!(
            connect_with_retry(&dialer, "ws://host", &RetryPolicy::default(), |_| {}).await
        );
        assert_eq!(conn, 3);
        assert_eq!(dialer.attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(4), Duration::from_millis(4000));
    }

    #[test]
    fn peer_url_shape() {
        assert_eq!(
            peer_url("ws://10.0.0.2:8080/", "arena-xk42", "p-1"),
            "ws://10.0.0.2:8080/peer/arena-xk42?player_id=p-1"
        );
    }
}
