//! Test helpers for integration tests
//!
//! A scriptable event socket server plus small utilities shared by the
//! connection, manager and pipeline tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fsagent::config::InstanceConfig;
use fsagent::connection::{Backoff, ConnectionSettings};
use fsagent::types::{Port, QueueCapacity};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};

/// Something pushed to every subscribed client
#[derive(Debug, Clone)]
enum Push {
    Frame(Vec<u8>),
    Disconnect,
}

#[derive(Debug, Clone)]
struct Behavior {
    password: String,
    answer_keepalive: bool,
    initial_events: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Observed {
    accepted: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

/// Builder for [`MockEslServer`]
#[derive(Debug, Clone)]
pub struct MockEslBuilder {
    behavior: Behavior,
}

impl MockEslBuilder {
    /// Leave `api status` unanswered
    pub fn silent_keepalive(mut self) -> Self {
        self.behavior.answer_keepalive = false;
        self
    }

    /// Frames written right after every successful subscription
    pub fn with_initial_events(mut self, frames: Vec<Vec<u8>>) -> Self {
        self.behavior.initial_events = frames;
        self
    }

    pub async fn start(self) -> MockEslServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (push, _) = broadcast::channel(1024);
        let observed = Arc::new(Observed::default());

        let behavior = Arc::new(self.behavior);
        let task = {
            let push = push.clone();
            let observed = Arc::clone(&observed);
            tokio::spawn(async move {
                // Dropping the set with the accept task aborts every client
                let mut clients = JoinSet::new();
                while let Ok((stream, _)) = listener.accept().await {
                    observed.accepted.fetch_add(1, Ordering::SeqCst);
                    clients.spawn(serve_client(
                        stream,
                        Arc::clone(&behavior),
                        Arc::clone(&observed),
                        push.clone(),
                    ));
                }
            })
        };

        MockEslServer {
            addr,
            push,
            observed,
            task,
        }
    }
}

/// In-process event socket server
///
/// Greets with `auth/request`, checks the password, acknowledges `event
/// plain`, answers `api status` and records every command it receives.
pub struct MockEslServer {
    addr: SocketAddr,
    push: broadcast::Sender<Push>,
    observed: Arc<Observed>,
    task: JoinHandle<()>,
}

impl MockEslServer {
    pub fn builder(password: &str) -> MockEslBuilder {
        MockEslBuilder {
            behavior: Behavior {
                password: password.to_string(),
                answer_keepalive: true,
                initial_events: Vec::new(),
            },
        }
    }

    pub async fn start(password: &str) -> Self {
        Self::builder(password).start().await
    }

    pub fn port(&self) -> Port {
        Port::new(self.addr.port()).unwrap()
    }

    /// Instance pointing at this server with the given password
    pub fn instance(&self, name: &str, password: &str) -> InstanceConfig {
        InstanceConfig::new(name, "127.0.0.1")
            .unwrap()
            .with_port(self.port())
            .with_password(password)
    }

    /// Send an event to every subscribed client
    pub fn push_event(&self, pairs: &[(&str, &str)]) {
        let _ = self.push.send(Push::Frame(event_frame(pairs)));
    }

    /// Send raw bytes to every subscribed client
    pub fn push_raw(&self, bytes: &[u8]) {
        let _ = self.push.send(Push::Frame(bytes.to_vec()));
    }

    /// Send a disconnect notice and close every subscribed client
    pub fn disconnect_all(&self) {
        let _ = self.push.send(Push::Disconnect);
    }

    /// TCP connections accepted so far
    pub fn accepted(&self) -> usize {
        self.observed.accepted.load(Ordering::SeqCst)
    }

    /// Every command received so far, without its terminating blank line
    pub fn commands(&self) -> Vec<String> {
        self.observed.commands.lock().clone()
    }

    pub fn count_commands(&self, prefix: &str) -> usize {
        self.observed
            .commands
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

impl Drop for MockEslServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_client(
    stream: tokio::net::TcpStream,
    behavior: Arc<Behavior>,
    observed: Arc<Observed>,
    push: broadcast::Sender<Push>,
) {
    let (read_half, mut writer) = stream.into_split();
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(16);
    let reader = tokio::spawn(read_commands(read_half, cmd_tx));

    if writer
        .write_all(b"Content-Type: auth/request\n\n")
        .await
        .is_err()
    {
        reader.abort();
        return;
    }

    let mut subscribed: Option<broadcast::Receiver<Push>> = None;
    loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                let Some(command) = command else { break };
                observed.commands.lock().push(command.clone());

                if let Some(password) = command.strip_prefix("auth ") {
                    let reply = if password == behavior.password {
                        "+OK accepted"
                    } else {
                        "-ERR invalid"
                    };
                    let _ = writer.write_all(command_reply(reply).as_bytes()).await;
                } else if command.starts_with("event plain") {
                    subscribed = Some(push.subscribe());
                    let _ = writer
                        .write_all(command_reply("+OK event listener enabled plain").as_bytes())
                        .await;
                    for frame in &behavior.initial_events {
                        if writer.write_all(frame).await.is_err() {
                            break;
                        }
                    }
                } else if command == "api status" {
                    if behavior.answer_keepalive {
                        let _ = writer.write_all(&api_response("UP 0 years, 0 days")).await;
                    }
                } else if command == "exit" {
                    let _ = writer.write_all(command_reply("+OK bye").as_bytes()).await;
                    break;
                } else {
                    let _ = writer
                        .write_all(command_reply("-ERR command not found").as_bytes())
                        .await;
                }
            }
            pushed = next_push(&mut subscribed) => match pushed {
                Push::Frame(bytes) => {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Push::Disconnect => {
                    let _ = writer.write_all(&disconnect_notice()).await;
                    break;
                }
            },
        }
    }

    reader.abort();
    let _ = writer.shutdown().await;
}

async fn next_push(rx: &mut Option<broadcast::Receiver<Push>>) -> Push {
    let Some(receiver) = rx.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match receiver.recv().await {
            Ok(push) => return push,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return std::future::pending().await,
        }
    }
}

/// Collect lines up to the blank line that ends each command
async fn read_commands(read_half: OwnedReadHalf, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(read_half).lines();
    let mut current: Option<String> = None;
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end_matches('\r').to_string();
        if line.is_empty() {
            if let Some(command) = current.take()
                && tx.send(command).await.is_err()
            {
                return;
            }
        } else if current.is_none() {
            current = Some(line);
        }
    }
}

pub fn command_reply(text: &str) -> String {
    format!("Content-Type: command/reply\nReply-Text: {}\n\n", text)
}

pub fn api_response(body: &str) -> Vec<u8> {
    format!(
        "Content-Type: api/response\nContent-Length: {}\n\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

pub fn disconnect_notice() -> Vec<u8> {
    let body = "Disconnected, goodbye.\nSee you at ClueCon! http://www.cluecon.com/\n";
    format!(
        "Content-Type: text/disconnect-notice\nContent-Length: {}\n\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

/// Encode an event the way the server does: percent-encoded header block
/// inside a `text/event-plain` frame
pub fn event_frame(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut body = String::new();
    for (name, value) in pairs {
        body.push_str(name);
        body.push_str(": ");
        body.push_str(&urlencoding::encode(value));
        body.push('\n');
    }
    body.push('\n');
    format!(
        "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

/// Settings with short timeouts and a fast, jitter-free backoff
pub fn fast_settings() -> ConnectionSettings {
    ConnectionSettings {
        dial_timeout: Duration::from_secs(1),
        auth_timeout: Duration::from_secs(1),
        keepalive_interval: Duration::from_secs(30),
        keepalive_timeout: Duration::from_secs(10),
        backoff: Backoff::new(Duration::from_millis(20), Duration::from_millis(100), 0.0),
        queue_capacity: QueueCapacity::CONNECTION,
        startup_window: Duration::from_secs(2),
        stop_timeout: Duration::from_secs(2),
        stable_after: Duration::ZERO,
    }
}

/// A local port with nothing listening on it
pub async fn closed_port() -> Port {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Port::new(port).unwrap()
}

/// Poll `condition` every 10ms until it holds or `within` elapses
pub async fn wait_until(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_mock_server_greets_and_authenticates() {
        let server = MockEslServer::start("ClueCon").await;
        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", server.port().get()))
            .await
            .unwrap();

        let mut buffer = [0; 256];
        let n = stream.read(&mut buffer).await.unwrap();
        assert!(String::from_utf8_lossy(&buffer[..n]).contains("auth/request"));

        stream.write_all(b"auth ClueCon\n\n").await.unwrap();
        let n = stream.read(&mut buffer).await.unwrap();
        assert!(String::from_utf8_lossy(&buffer[..n]).contains("+OK accepted"));
        assert_eq!(server.commands(), vec!["auth ClueCon"]);
    }

    #[test]
    fn test_event_frame_length_matches_body() {
        let frame = String::from_utf8(event_frame(&[("Event-Name", "CHANNEL_CREATE")])).unwrap();
        let (head, body) = frame.split_once("\n\n").unwrap();
        assert!(head.contains(&format!("Content-Length: {}", body.len())));
        assert_eq!(body, "Event-Name: CHANNEL_CREATE\n\n");
    }
}
