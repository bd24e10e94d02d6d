//! Real-time pacing of recorded packets
//!
//! The scheduler is polled: each call to [`Scheduler::tick`] either does
//! nothing (paused, or the next packet is not due yet) or releases exactly
//! one packet. After releasing a packet it looks ahead to the next replayable
//! record and sets the due time from the recorded gap divided by the current
//! speed. A speed change while a due time is pending only affects the gaps
//! computed after it.

use crate::core::PacketRecord;
use crate::error::{CodecError, LogError};
use crate::input::SessionLogReader;
use crate::playback::PlaybackState;
use crate::protocol::{text_message, MessageChannel, OutgoingPacket};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle of a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Streaming,
    Finished,
}

/// Outcome of one scheduling tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Not started yet
    Idle,
    Paused,
    /// Next packet is not due yet
    Waiting,
    /// A malformed line was skipped; playback time did not advance
    Skipped,
    /// Payload to send now
    Packet(Vec<u8>),
    /// The log is exhausted
    Finished,
}

enum Pulled {
    Record(PacketRecord),
    Malformed,
    Exhausted,
}

/// Drives one playback from a session log
pub struct Scheduler {
    reader: SessionLogReader,
    state: SchedulerState,
    due: Option<Instant>,
    lookahead: Option<PacketRecord>,
    first_timestamp: Option<i64>,
    last_timestamp: Option<i64>,
    status_interval: Duration,
    next_status: Option<Instant>,
    welcome: String,
    packets_sent: u64,
}

impl Scheduler {
    pub fn new(reader: SessionLogReader, status_interval: Duration) -> Self {
        Self {
            reader,
            state: SchedulerState::Idle,
            due: None,
            lookahead: None,
            first_timestamp: None,
            last_timestamp: None,
            status_interval,
            next_status: None,
            welcome: "Welcome to the replay. Say /pause, /resume or /stop to control playback."
                .to_string(),
            packets_sent: 0,
        }
    }

    /// Replace the one-time notice sent with the first status frame
    pub fn with_welcome(mut self, welcome: impl Into<String>) -> Self {
        self.welcome = welcome.into();
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Blocking job computing the final record's timestamp for [`Scheduler::start`]
    pub fn duration_scan(&self) -> impl FnOnce() -> Result<Option<i64>, LogError> + Send + 'static {
        self.reader.last_record_scan()
    }

    /// Begin streaming; the first packet is due immediately
    ///
    /// `last` is the result of [`Scheduler::duration_scan`] and only feeds the
    /// duration shown in the status line. A malformed final line only loses
    /// the duration.
    pub fn start(&mut self, now: Instant, last: Result<Option<i64>, LogError>) -> Result<(), LogError> {
        if self.state != SchedulerState::Idle {
            return Ok(());
        }

        self.last_timestamp = match last {
            Ok(ts) => ts,
            Err(e) if e.is_recoverable() => {
                warn!("Cannot determine duration of {}: {}", self.reader.path().display(), e);
                None
            }
            Err(e) => return Err(e),
        };

        self.state = SchedulerState::Streaming;
        self.due = Some(now);
        info!("Streaming {}", self.reader.path().display());
        Ok(())
    }

    /// Whether the next tick would read from the log
    pub fn is_due(&self, now: Instant) -> bool {
        self.state == SchedulerState::Streaming && self.due.map_or(true, |due| now >= due)
    }

    /// Run one scheduling step
    pub fn tick(&mut self, playback: &mut PlaybackState, now: Instant) -> Result<Tick, LogError> {
        match self.state {
            SchedulerState::Idle => return Ok(Tick::Idle),
            SchedulerState::Finished => return Ok(Tick::Finished),
            SchedulerState::Streaming => {}
        }

        if playback.is_paused() {
            return Ok(Tick::Paused);
        }

        if self.due.is_some_and(|due| now < due) {
            return Ok(Tick::Waiting);
        }

        let record = match self.lookahead.take() {
            Some(record) => record,
            None => match self.pull()? {
                Pulled::Record(record) => record,
                Pulled::Malformed => return Ok(Tick::Skipped),
                Pulled::Exhausted => {
                    self.finish();
                    return Ok(Tick::Finished);
                }
            },
        };

        self.advance_time(&record, playback);

        self.due = Some(now);
        loop {
            match self.pull()? {
                Pulled::Record(next) => {
                    let gap_ms = next.timestamp_millis.saturating_sub(record.timestamp_millis).max(0);
                    let delay = Duration::from_secs_f64(gap_ms as f64 / 1000.0 / playback.speed());
                    self.due = Some(now + delay);
                    self.lookahead = Some(next);
                    break;
                }
                Pulled::Malformed => continue,
                Pulled::Exhausted => break,
            }
        }

        self.packets_sent += 1;
        Ok(Tick::Packet(record.payload))
    }

    /// Status frames due at `now`; the first call also yields the welcome notice
    pub fn status(&mut self, playback: &PlaybackState, now: Instant) -> Result<Vec<OutgoingPacket>, CodecError> {
        let mut packets = Vec::new();

        match self.next_status {
            Some(at) if now < at => return Ok(packets),
            Some(_) => {}
            None => packets.push(text_message(MessageChannel::Advance, &self.welcome)?),
        }

        packets.push(text_message(MessageChannel::Status, &playback.format())?);
        self.next_status = Some(now + self.status_interval);
        Ok(packets)
    }

    /// Release the session log
    pub fn close(&mut self) {
        self.reader.close();
        self.lookahead = None;
    }

    fn finish(&mut self) {
        info!(
            "Finished playing {} ({} packets)",
            self.reader.path().display(),
            self.packets_sent
        );
        self.state = SchedulerState::Finished;
        self.reader.close();
    }

    fn advance_time(&mut self, record: &PacketRecord, playback: &mut PlaybackState) {
        let first = match self.first_timestamp {
            Some(first) => first,
            None => {
                if let Some(last) = self.last_timestamp {
                    playback.duration_sec = (last - record.timestamp_millis).max(0) as f64 / 1000.0;
                }
                self.first_timestamp = Some(record.timestamp_millis);
                record.timestamp_millis
            }
        };
        playback.current_time_sec = (record.timestamp_millis - first).max(0) as f64 / 1000.0;
    }

    /// Next replayable record, skipping client traffic
    fn pull(&mut self) -> Result<Pulled, LogError> {
        loop {
            match self.reader.next_record() {
                Ok(Some(record)) if record.is_replayable() => return Ok(Pulled::Record(record)),
                Ok(Some(_)) => continue,
                Ok(None) => return Ok(Pulled::Exhausted),
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping record in {}: {}", self.reader.path().display(), e);
                    return Ok(Pulled::Malformed);
                }
                Err(e) => {
                    debug!("Read failure at line {}", self.reader.line_number());
                    return Err(e);
                }
            }
        }
    }
}
