//! One resilient event socket session
//!
//! State machine: `Disconnected -> Connecting -> Authenticating -> Subscribing
//! -> Connected`, back to `Disconnected` on any error and through `Closing` on
//! stop. A single task runs the whole cycle; while connected a reader task
//! parses frames and the session task drives keepalives.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Notify, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::status::{ConnectionStatus, SessionState, StatusCell};
use super::{ConnectionSettings, StopError, log_at_level};
use crate::config::InstanceConfig;
use crate::connection_error::ConnectionError;
use crate::constants::buffer::READER_CAPACITY;
use crate::metrics::{DropStage, stats};
use crate::protocol::{ContentType, Event, EventKind, Frame, FrameError, FrameReader, commands};
use crate::runtime::deadline_after;

type Reader = FrameReader<BufReader<OwnedReadHalf>>;

/// State shared between the session task, its reader and the handle
struct Shared {
    instance: InstanceConfig,
    name: Arc<str>,
    settings: ConnectionSettings,
    subscribe_command: String,
    outbound: mpsc::Sender<Event>,
    status: Arc<StatusCell>,
    connected: Arc<Notify>,
}

/// Handle to a session with one FreeSWITCH instance
pub struct ProtocolConnection {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ProtocolConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolConnection")
            .field("instance", &self.shared.name)
            .field("state", &self.shared.status.state())
            .finish_non_exhaustive()
    }
}

impl ProtocolConnection {
    /// Create a session; nothing happens until [`start`](Self::start)
    ///
    /// `cancel` should be a child of the process root token so that a global
    /// shutdown reaches the session.
    pub fn new(
        instance: InstanceConfig,
        settings: ConnectionSettings,
        events: &[EventKind],
        outbound: mpsc::Sender<Event>,
        connected: Arc<Notify>,
        cancel: CancellationToken,
    ) -> Self {
        let name: Arc<str> = Arc::from(instance.name.as_str());
        Self {
            shared: Arc::new(Shared {
                instance,
                name,
                settings,
                subscribe_command: commands::event_plain(events),
                outbound,
                status: Arc::new(StatusCell::default()),
                connected,
            }),
            cancel,
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Spawn the session task; calling it again while running is a no-op
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(run(shared, cancel)));
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.snapshot()
    }

    /// Cancel the session and wait for its task to exit
    ///
    /// The socket is closed and the reader task joined before the session
    /// task finishes, so nothing of this session outlives a successful return.
    pub async fn stop(&self, timeout: Duration) -> Result<(), StopError> {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        let Some(mut handle) = handle else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StopError::TaskFailed {
                instance: self.name().to_string(),
                reason: e.to_string(),
            }),
            Err(_) => {
                handle.abort();
                Err(StopError::Timeout {
                    instance: self.name().to_string(),
                    after: timeout,
                })
            }
        }
    }
}

/// Connect, serve, back off, repeat until cancelled
async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    let name = Arc::clone(&shared.name);
    let mut failures: u32 = 0;

    loop {
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            attempt = establish(&shared) => attempt,
        };

        match attempt {
            Ok((reader, writer)) => {
                let connected_at = Instant::now();
                shared.status.mark_connected();
                stats().set_connected(&name, true);
                shared.connected.notify_waiters();
                info!(
                    instance = %name,
                    host = %shared.instance.host,
                    port = shared.instance.port.get(),
                    "Connected and subscribed"
                );

                let ended = serve(&shared, reader, writer, &cancel).await;
                stats().set_connected(&name, false);
                match ended {
                    None => break,
                    Some(e) => {
                        let uptime = connected_at.elapsed();
                        log_at_level!(
                            e.log_level(),
                            instance = %name,
                            error = %e,
                            ?uptime,
                            "Session ended"
                        );
                        failures = next_streak(failures, uptime, shared.settings.stable_after);
                        if failures == 0 {
                            shared.status.record_error(&e);
                        } else {
                            shared.status.record_failure(&e, failures);
                        }
                    }
                }
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                log_at_level!(
                    e.log_level(),
                    instance = %name,
                    error = %e,
                    attempt = failures,
                    "Connection attempt failed"
                );
                shared.status.record_failure(&e, failures);
            }
        }

        if cancel.is_cancelled() {
            break;
        }
        let delay = shared.settings.backoff.delay(failures);
        stats().reconnect_scheduled(&name);
        debug!(instance = %name, ?delay, failures, "Reconnect scheduled");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.status.set_state(SessionState::Disconnected);
    debug!(instance = %name, "Session task exited");
}

/// Consecutive failures after a session that stayed up for `uptime`
///
/// Only a session that outlived `stable_after` ends the streak; one dropped
/// sooner counts as another failed attempt.
fn next_streak(failures: u32, uptime: Duration, stable_after: Duration) -> u32 {
    if uptime >= stable_after {
        0
    } else {
        failures.saturating_add(1)
    }
}

/// Dial, authenticate and subscribe
async fn establish(shared: &Shared) -> Result<(Reader, OwnedWriteHalf), ConnectionError> {
    let instance = &shared.instance;
    let name = shared.name.to_string();
    let settings = &shared.settings;

    shared.status.set_state(SessionState::Connecting);
    let addr = (instance.host.as_str(), instance.port.get());
    let stream = tokio::time::timeout(settings.dial_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ConnectionError::Timeout {
            instance: name.clone(),
            stage: "dial",
            after: settings.dial_timeout,
        })?
        .map_err(|source| ConnectionError::TcpConnect {
            host: instance.host.to_string(),
            port: instance.port.get(),
            source,
        })?;
    if let Err(e) = stream.set_nodelay(true) {
        trace!(instance = %name, error = %e, "Failed to set TCP_NODELAY");
    }

    let (read_half, mut writer) = stream.into_split();
    let mut reader = FrameReader::new(BufReader::with_capacity(READER_CAPACITY, read_half));

    shared.status.set_state(SessionState::Authenticating);
    with_deadline(&name, "authentication", settings.auth_timeout, async {
        let greeting = next_frame(&mut reader, &name).await?;
        if greeting.content_type() != ContentType::AuthRequest {
            return Err(ConnectionError::UnexpectedGreeting {
                instance: name.clone(),
                content_type: format!("{:?}", greeting.content_type()),
            });
        }
        writer
            .write_all(commands::auth(&instance.password).as_bytes())
            .await?;
        let reply = next_reply(&mut reader, &name).await?;
        if !reply.is_ok_reply() {
            return Err(ConnectionError::AuthenticationFailed {
                instance: name.clone(),
                reply: reply.reply_text().to_string(),
            });
        }
        Ok(())
    })
    .await?;

    shared.status.set_state(SessionState::Subscribing);
    with_deadline(&name, "subscription", settings.auth_timeout, async {
        writer
            .write_all(shared.subscribe_command.as_bytes())
            .await?;
        let reply = next_reply(&mut reader, &name).await?;
        if !reply.is_ok_reply() {
            return Err(ConnectionError::SubscriptionFailed {
                instance: name.clone(),
                reply: reply.reply_text().to_string(),
            });
        }
        Ok(())
    })
    .await?;

    Ok((reader, writer))
}

async fn with_deadline<F>(
    name: &str,
    stage: &'static str,
    after: Duration,
    fut: F,
) -> Result<(), ConnectionError>
where
    F: Future<Output = Result<(), ConnectionError>>,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| ConnectionError::Timeout {
            instance: name.to_string(),
            stage,
            after,
        })?
}

async fn next_frame(reader: &mut Reader, name: &str) -> Result<Frame, ConnectionError> {
    match reader.read_frame().await {
        Ok(Some(frame)) => Ok(frame),
        Ok(None) => Err(ConnectionError::Disconnected {
            instance: name.to_string(),
        }),
        Err(e) => Err(frame_error(name, e)),
    }
}

/// Next `command/reply`, skipping anything else the server interleaves
async fn next_reply(reader: &mut Reader, name: &str) -> Result<Frame, ConnectionError> {
    loop {
        let frame = next_frame(reader, name).await?;
        match frame.content_type() {
            ContentType::CommandReply => return Ok(frame),
            ContentType::DisconnectNotice => {
                return Err(ConnectionError::Disconnected {
                    instance: name.to_string(),
                });
            }
            other => trace!(instance = name, content_type = ?other, "Skipping frame while awaiting reply"),
        }
    }
}

fn frame_error(name: &str, e: FrameError) -> ConnectionError {
    match e {
        FrameError::Io(io) => ConnectionError::IoError(io),
        FrameError::UnexpectedEof => ConnectionError::Disconnected {
            instance: name.to_string(),
        },
        other => ConnectionError::Framing {
            instance: name.to_string(),
            source: other,
        },
    }
}

/// Run a connected session until it fails (`Some`) or is cancelled (`None`)
async fn serve(
    shared: &Arc<Shared>,
    reader: Reader,
    mut writer: OwnedWriteHalf,
    cancel: &CancellationToken,
) -> Option<ConnectionError> {
    let name = &shared.name;
    let settings = &shared.settings;

    let (reply_tx, mut reply_rx) = mpsc::channel::<Frame>(8);
    let mut reader_task = tokio::spawn(read_loop(reader, Arc::clone(shared), reply_tx));
    let mut reader_done = false;

    let mut ticker = tokio::time::interval_at(
        deadline_after(Instant::now(), settings.keepalive_interval),
        settings.keepalive_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut probe_deadline: Option<Instant> = None;

    let outcome = loop {
        let deadline = probe_deadline.unwrap_or_else(Instant::now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            joined = &mut reader_task => {
                reader_done = true;
                break Some(match joined {
                    Ok(e) => e,
                    Err(join) => ConnectionError::IoError(std::io::Error::other(join.to_string())),
                });
            }
            Some(_reply) = reply_rx.recv() => {
                trace!(instance = %name, "Keepalive answered");
                probe_deadline = None;
            }
            _ = tokio::time::sleep_until(deadline), if probe_deadline.is_some() => {
                break Some(ConnectionError::KeepaliveTimeout {
                    instance: name.to_string(),
                    after: settings.keepalive_timeout,
                });
            }
            _ = ticker.tick() => {
                if probe_deadline.is_some() {
                    continue;
                }
                let sent = tokio::time::timeout(
                    settings.keepalive_timeout,
                    writer.write_all(commands::API_STATUS),
                )
                .await;
                match sent {
                    Ok(Ok(())) => {
                        probe_deadline =
                            Some(deadline_after(Instant::now(), settings.keepalive_timeout));
                    }
                    Ok(Err(e)) => break Some(ConnectionError::IoError(e)),
                    Err(_) => break Some(ConnectionError::KeepaliveTimeout {
                        instance: name.to_string(),
                        after: settings.keepalive_timeout,
                    }),
                }
            }
        }
    };

    if !reader_done {
        reader_task.abort();
        let _ = reader_task.await;
    }

    if outcome.is_none() {
        shared.status.set_state(SessionState::Closing);
        let _ = tokio::time::timeout(Duration::from_millis(250), writer.write_all(commands::EXIT)).await;
    }
    let _ = writer.shutdown().await;
    outcome
}

/// Parse frames and hand events downstream without ever waiting on it
async fn read_loop(
    mut reader: Reader,
    shared: Arc<Shared>,
    replies: mpsc::Sender<Frame>,
) -> ConnectionError {
    let name = &shared.name;
    loop {
        let frame = match reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                return ConnectionError::Disconnected {
                    instance: name.to_string(),
                };
            }
            Err(e) => return frame_error(name, e),
        };

        match frame.content_type() {
            ContentType::EventPlain => forward_event(&shared, &frame),
            ContentType::ApiResponse | ContentType::CommandReply => {
                // Only keepalive replies are expected here; extras are harmless
                let _ = replies.try_send(frame);
            }
            ContentType::DisconnectNotice => {
                info!(instance = %name, "Server sent disconnect notice");
                return ConnectionError::Disconnected {
                    instance: name.to_string(),
                };
            }
            other => trace!(instance = %name, content_type = ?other, "Ignoring frame"),
        }
    }
}

fn forward_event(shared: &Shared, frame: &Frame) {
    let name = &shared.name;
    if frame.malformed_lines > 0 {
        stats().malformed_frame(name);
    }

    let event = match Event::from_frame(frame, Arc::clone(name)) {
        Ok(event) => event,
        Err(e) => {
            stats().malformed_frame(name);
            debug!(instance = %name, error = %e, "Dropping malformed event frame");
            return;
        }
    };

    shared.status.touch(event.received_at());
    stats().event_received(name, event.name());

    match shared.outbound.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event) | TrySendError::Closed(event)) => {
            shared.status.record_drop();
            stats().event_dropped(DropStage::Connection, name);
            trace!(instance = %name, event = event.name(), "Outbound queue full, event dropped");
        }
    }
}

impl Drop for ProtocolConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            if !task.is_finished() {
                warn!(instance = %self.shared.name, "Connection dropped without stop, aborting session");
                self.cancel.cancel();
                task.abort();
            }
        }
    }
}
