//! Named wall-clock timers for profiling one contraction run.

use std::fmt;
use std::time::{Duration, Instant};

use itertools::Itertools;
use log::info;

#[derive(Debug, Default, Clone)]
struct Timer {
    elapsed: Duration,
    running: Option<Instant>,
}

/// A registry of named, accumulating timers.
///
/// Timers are created on first use. Starting a running timer or stopping a
/// stopped one has no effect.
#[derive(Debug, Default, Clone)]
pub struct Timers {
    timers: Vec<(String, Timer)>,
}

impl Timers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn timer_mut(&mut self, name: &str) -> &mut Timer {
        let position = match self.timers.iter().position(|(n, _)| n == name) {
            Some(position) => position,
            None => {
                self.timers.push((name.to_string(), Timer::default()));
                self.timers.len() - 1
            }
        };
        &mut self.timers[position].1
    }

    pub fn start(&mut self, name: &str) {
        let timer = self.timer_mut(name);
        if timer.running.is_none() {
            timer.running = Some(Instant::now());
        }
    }

    /// Stops the timer and returns its accumulated time.
    pub fn stop(&mut self, name: &str) -> Duration {
        let timer = self.timer_mut(name);
        if let Some(start) = timer.running.take() {
            timer.elapsed += start.elapsed();
        }
        timer.elapsed
    }

    /// Accumulated time of `name`, including the current interval if running.
    /// Unknown timers read as zero.
    pub fn elapsed(&self, name: &str) -> Duration {
        self.timers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, timer)| {
                timer.elapsed + timer.running.map_or(Duration::ZERO, |start| start.elapsed())
            })
            .unwrap_or_default()
    }

    /// Runs `f` while the timer `name` is running.
    pub fn time<T>(&mut self, name: &str, f: impl FnOnce() -> T) -> T {
        self.start(name);
        let result = f();
        self.stop(name);
        result
    }

    /// All timers in order of creation.
    pub fn timings(&self) -> Vec<(&str, Duration)> {
        self.timers
            .iter()
            .map(|(name, _)| (name.as_str(), self.elapsed(name)))
            .collect()
    }

    /// Logs every timer relative to the timer `total`, longest first.
    pub fn log_profile(&self, total: &str) {
        let total_time = self.elapsed(total).as_secs_f64();
        for (name, time) in self
            .timings()
            .into_iter()
            .sorted_by(|a, b| b.1.cmp(&a.1))
        {
            let share = if total_time > 0.0 {
                100.0 * time.as_secs_f64() / total_time
            } else {
                0.0
            };
            info!(timer = name, seconds = time.as_secs_f64(), share; "{name:>24}: {} ({share:5.1}%)", Sec(time));
        }
    }
}

/// Formats a duration in seconds.
pub struct Sec(pub Duration);

impl fmt::Display for Sec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:10.6} sec", self.0.as_secs_f64())
    }
}

/// Formats a transfer rate.
pub struct Bytes(pub f64, pub Duration);

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.1.as_secs_f64();
        let rate = if seconds > 0.0 {
            self.0 / seconds / 1024.0 / 1024.0 / 1024.0
        } else {
            0.0
        };
        write!(f, "{rate:10.3} GB/s")
    }
}

/// Formats a floating point throughput.
pub struct Flops(pub f64, pub Duration);

impl fmt::Display for Flops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.1.as_secs_f64();
        let rate = if seconds > 0.0 {
            self.0 / seconds / 1.0e9
        } else {
            0.0
        };
        write!(f, "{rate:10.3} GFlop/s")
    }
}
