pub mod clock;
pub mod scheduler;

#[cfg(test)]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use scheduler::{Scheduler, Tick};

use crate::core::Command;

/// Slowest selectable playback speed
pub const MIN_SPEED: f64 = 0.25;
/// Fastest selectable playback speed
pub const MAX_SPEED: f64 = 64.0;

/// Live playback state of one session
///
/// Only the playback task mutates this; the input task sends commands.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    /// Seconds since the first replayed record
    pub current_time_sec: f64,
    /// Seconds between the first and the last record
    pub duration_sec: f64,
    /// Speed multiplier, `0` while paused
    speed: f64,
    /// Speed restored by `Resume`
    resume_speed: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_time_sec: 0.0,
            duration_sec: 0.0,
            speed: 1.0,
            resume_speed: 1.0,
        }
    }
}

impl PlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_paused(&self) -> bool {
        self.speed == 0.0
    }

    /// Double the speed, capped at `MAX_SPEED`
    ///
    /// While paused this doubles the remembered speed and resumes with it.
    pub fn increase_speed(&mut self) {
        let base = if self.is_paused() { self.resume_speed } else { self.speed };
        self.speed = (base * 2.0).min(MAX_SPEED);
    }

    /// Halve the speed, floored at `MIN_SPEED`
    ///
    /// While paused this lowers the speed playback resumes at.
    pub fn decrease_speed(&mut self) {
        if self.is_paused() {
            self.resume_speed = (self.resume_speed / 2.0).max(MIN_SPEED);
        } else {
            self.speed = (self.speed / 2.0).max(MIN_SPEED);
        }
    }

    pub fn pause(&mut self) {
        if !self.is_paused() {
            self.resume_speed = self.speed;
            self.speed = 0.0;
        }
    }

    pub fn resume(&mut self) {
        if self.is_paused() {
            self.speed = if self.resume_speed > 0.0 {
                self.resume_speed
            } else {
                1.0
            };
        }
    }

    /// Apply a playback command; `Stop` and `Logout` leave the state as is
    pub fn apply(&mut self, command: Command) {
        match command {
            Command::SpeedUp => self.increase_speed(),
            Command::SpeedDown => self.decrease_speed(),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Stop | Command::Logout => {}
        }
    }

    /// Status line shown to the viewer
    pub fn format(&self) -> String {
        if self.is_paused() {
            format!("{:.1}/{:.1} | Paused", self.current_time_sec, self.duration_sec)
        } else {
            format!(
                "{:.1}/{:.1} | Speed: {:.2}x",
                self.current_time_sec, self.duration_sec, self.speed
            )
        }
    }
}
