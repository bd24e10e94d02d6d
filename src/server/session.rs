//! One viewer connection replaying one recorded session
//!
//! Two tasks run per session. The playback task owns the playback state and
//! the write half of the connection; the input task owns the read half and
//! only forwards decoded commands over a bounded channel. Both stop when the
//! server-wide shutdown signal fires or when the other side tears the
//! connection down.

use crate::core::Command;
use crate::error::SessionError;
use crate::input::SessionLogReader;
use crate::playback::{Clock, PlaybackState, Scheduler, SystemClock, Tick};
use crate::protocol::{dispatch, Dispatch, ExpandedKey, FrameReader, IncomingPacket, OutgoingPacket};
use crate::server::ShutdownSignal;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const GRACE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Timing knobs for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sleep between scheduler ticks
    pub poll_interval: Duration,
    pub status_interval: Duration,
    /// Upper bound on a single inbound read before re-checking cancellation
    pub read_timeout: Duration,
    /// Wait after the last packet before closing
    pub grace_period: Duration,
    pub command_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            status_interval: Duration::from_millis(100),
            read_timeout: Duration::from_secs(10),
            grace_period: Duration::from_secs(5),
            command_queue: 32,
        }
    }
}

impl From<&crate::config::Config> for SessionConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            status_interval: config.status_interval(),
            read_timeout: config.read_timeout(),
            grace_period: config.grace_period(),
            command_queue: config.command_queue.max(1),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The whole recording was played
    Finished,
    /// The viewer asked to stop
    Stopped,
    Logout,
    /// Server-wide shutdown
    Shutdown,
    /// The connection was closed or failed
    Disconnected,
}

/// How the input task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputEnd {
    Logout,
    Cancelled,
    Disconnected,
}

/// A replay session bound to one connection
pub struct Session<R, W> {
    id: String,
    reader: R,
    writer: W,
    key: ExpandedKey,
    scheduler: Scheduler,
    config: SessionConfig,
    shutdown: ShutdownSignal,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        id: impl Into<String>,
        reader: R,
        writer: W,
        key: ExpandedKey,
        log: SessionLogReader,
        config: SessionConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        let id = id.into();
        let welcome = format!(
            "Replaying {}. Say /pause, /resume or /stop; use the speed keys to change speed.",
            log.path()
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| id.clone())
        );
        let scheduler = Scheduler::new(log, config.status_interval).with_welcome(welcome);

        Self {
            id,
            reader,
            writer,
            key,
            scheduler,
            config,
            shutdown,
        }
    }

    /// Run both tasks until the session ends, then close the connection
    pub async fn run(self) -> Result<SessionEnd, SessionError> {
        let Session {
            id,
            reader,
            mut writer,
            key,
            mut scheduler,
            config,
            shutdown,
        } = self;

        let clock = SystemClock;
        let last = tokio::task::spawn_blocking(scheduler.duration_scan()).await?;
        scheduler.start(clock.now(), last)?;

        let teardown = ShutdownSignal::new();
        let (command_tx, command_rx) = mpsc::channel(config.command_queue);

        let input = tokio::spawn(input_loop(
            id.clone(),
            FrameReader::new(reader),
            key.clone(),
            command_tx,
            config.read_timeout,
            shutdown.clone(),
            teardown.clone(),
        ));

        let mut playback = PlaybackLoop {
            id: &id,
            writer: &mut writer,
            key: &key,
            scheduler: &mut scheduler,
            commands: command_rx,
            config: &config,
            shutdown: &shutdown,
            teardown: &teardown,
            clock: &clock,
        };
        let result = playback.run().await;
        drop(playback);

        teardown.trigger();
        scheduler.close();
        if let Err(e) = writer.shutdown().await {
            debug!("[{}] Error closing connection: {}", id, e);
        }

        let input_end = match input.await {
            Ok(end) => end,
            Err(e) => {
                warn!("[{}] Input task failed: {}", id, e);
                InputEnd::Disconnected
            }
        };

        let end = match (result, input_end) {
            (Ok(SessionEnd::Disconnected), InputEnd::Logout) => Ok(SessionEnd::Logout),
            (result, _) => result,
        };

        match &end {
            Ok(reason) => info!(
                "[{}] Session ended: {:?} after {} packets",
                id,
                reason,
                scheduler.packets_sent()
            ),
            Err(e) => warn!("[{}] Session failed: {}", id, e),
        }
        end
    }
}

struct PlaybackLoop<'a, W> {
    id: &'a str,
    writer: &'a mut W,
    key: &'a ExpandedKey,
    scheduler: &'a mut Scheduler,
    commands: mpsc::Receiver<Command>,
    config: &'a SessionConfig,
    shutdown: &'a ShutdownSignal,
    teardown: &'a ShutdownSignal,
    clock: &'a dyn Clock,
}

impl<W: AsyncWrite + Unpin> PlaybackLoop<'_, W> {
    async fn run(&mut self) -> Result<SessionEnd, SessionError> {
        let mut state = PlaybackState::new();

        loop {
            if let Some(end) = self.cancelled() {
                return Ok(end);
            }

            while let Ok(command) = self.commands.try_recv() {
                match command {
                    Command::Stop => return Ok(SessionEnd::Stopped),
                    Command::Logout => return Ok(SessionEnd::Logout),
                    command => {
                        state.apply(command);
                        debug!("[{}] {:?} -> {}", self.id, command, state.format());
                    }
                }
            }

            let now = self.clock.now();
            for packet in self.scheduler.status(&state, now)? {
                self.send(&packet).await?;
            }

            let tick = if !state.is_paused() && self.scheduler.is_due(now) {
                read_blocking(|| self.scheduler.tick(&mut state, now))?
            } else {
                self.scheduler.tick(&mut state, now)?
            };

            match tick {
                Tick::Packet(payload) => {
                    match OutgoingPacket::from_bytes(&payload).seal(self.key) {
                        Ok(frame) => self.writer.write_all(&frame).await?,
                        Err(e) => warn!(
                            "[{}] Skipping recorded packet of {} bytes: {}",
                            self.id,
                            payload.len(),
                            e
                        ),
                    }
                    // packets recorded together go out back to back
                    tokio::task::yield_now().await;
                    continue;
                }
                Tick::Finished => {
                    info!(
                        "[{}] Recording finished, closing in {:?}",
                        self.id, self.config.grace_period
                    );
                    return Ok(self.grace().await);
                }
                Tick::Idle | Tick::Paused | Tick::Waiting | Tick::Skipped => {}
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    fn cancelled(&self) -> Option<SessionEnd> {
        if self.shutdown.is_triggered() {
            Some(SessionEnd::Shutdown)
        } else if self.teardown.is_triggered() {
            Some(SessionEnd::Disconnected)
        } else {
            None
        }
    }

    /// Wait out the grace period, still honoring cancellation
    async fn grace(&self) -> SessionEnd {
        let deadline = tokio::time::Instant::now() + self.config.grace_period;
        loop {
            if let Some(end) = self.cancelled() {
                return end;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return SessionEnd::Finished;
            }
            tokio::time::sleep((deadline - now).min(GRACE_CHECK_INTERVAL)).await;
        }
    }

    async fn send(&mut self, packet: &OutgoingPacket) -> Result<(), SessionError> {
        let frame = packet.seal(self.key)?;
        self.writer.write_all(&frame).await?;
        Ok(())
    }
}

/// Run log reads without stalling other tasks on this worker
fn read_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

async fn input_loop<R: AsyncRead + Unpin>(
    id: String,
    mut frames: FrameReader<R>,
    key: ExpandedKey,
    commands: mpsc::Sender<Command>,
    read_timeout: Duration,
    shutdown: ShutdownSignal,
    teardown: ShutdownSignal,
) -> InputEnd {
    loop {
        if shutdown.is_triggered() || teardown.is_triggered() {
            return InputEnd::Cancelled;
        }

        let read = tokio::select! {
            _ = shutdown.wait() => return InputEnd::Cancelled,
            _ = teardown.wait() => return InputEnd::Cancelled,
            read = tokio::time::timeout(read_timeout, frames.next_frame()) => read,
        };

        let body = match read {
            Err(_) => continue,
            Ok(Ok(Some(body))) => body,
            Ok(Ok(None)) => {
                debug!("[{}] Viewer closed the connection", id);
                teardown.trigger();
                return InputEnd::Disconnected;
            }
            Ok(Err(e)) => {
                debug!("[{}] Read error: {}", id, e);
                teardown.trigger();
                return InputEnd::Disconnected;
            }
        };

        let mut packet = match IncomingPacket::open(body, &key) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("[{}] Dropping inbound frame: {}", id, e);
                continue;
            }
        };

        let command = match dispatch(&mut packet) {
            Ok(Dispatch::Command(command)) => command,
            Ok(Dispatch::Ignored(reason)) => {
                debug!("[{}] Ignored client packet: {:?}", id, reason);
                continue;
            }
            Err(e) => {
                debug!("[{}] Malformed client packet: {}", id, e);
                continue;
            }
        };

        if commands.send(command).await.is_err() {
            return InputEnd::Cancelled;
        }

        if command == Command::Logout {
            info!("[{}] Viewer logged out", id);
            teardown.trigger();
            return InputEnd::Logout;
        }
    }
}
