//! Throughput and ETA reporting.
//!
//! [`Monitor::tick`] is a pure computation over a [`ProgressSample`]; the job
//! controller calls it from a dedicated ticker thread and logs the message.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

const UNKNOWN_ETA: &str = "--:--:--";

/// Counters observed at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    /// When the sample was taken.
    pub at: Instant,
    /// Identifiers processed so far, successful or not.
    pub completed: u64,
    /// Identifiers that failed.
    pub failed: u64,
    /// Identifiers expected in total.
    pub total: u64,
    /// Whether the job is paused.
    pub paused: bool,
    /// Units running right now.
    pub active_threads: u64,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    /// Completed identifiers per second since the start.
    pub average_tps: f64,
    /// Completed identifiers per second since the previous tick.
    pub current_tps: f64,
    /// Estimated time to completion, if it can be estimated.
    pub eta: Option<Duration>,
    /// Human readable progress line.
    pub message: String,
}

/// Stateful rate calculator.
#[derive(Debug, Clone)]
pub struct Monitor {
    started: Instant,
    previous: Option<(Instant, u64)>,
    recent_rates: VecDeque<f64>,
    window: usize,
}

impl Monitor {
    /// Monitor for a job started at `started`, smoothing the ETA over the
    /// last `window` current-rate samples.
    #[must_use]
    pub fn new(started: Instant, window: usize) -> Self {
        let window = window.max(1);
        Self {
            started,
            previous: None,
            recent_rates: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Compute rates and ETA for `sample`.
    #[must_use]
    pub fn tick(&mut self, sample: &ProgressSample) -> ProgressReport {
        let average_tps = rate(sample.completed, sample.at.saturating_duration_since(self.started));

        let (prev_at, prev_completed) = self.previous.unwrap_or((self.started, 0));
        let current_tps = rate(
            sample.completed.saturating_sub(prev_completed),
            sample.at.saturating_duration_since(prev_at),
        );
        self.previous = Some((sample.at, sample.completed));

        if sample.paused && current_tps == 0.0 {
            self.recent_rates.clear();
        } else {
            if self.recent_rates.len() == self.window {
                self.recent_rates.pop_front();
            }
            self.recent_rates.push_back(current_tps);
        }

        let remaining = sample.total.saturating_sub(sample.completed);
        let eta = estimate(remaining, &self.recent_rates);
        let message = progress_message(sample, average_tps, current_tps, eta);

        ProgressReport {
            average_tps,
            current_tps,
            eta,
            message,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn rate(count: u64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

#[allow(clippy::cast_precision_loss)]
fn estimate(remaining: u64, rates: &VecDeque<f64>) -> Option<Duration> {
    if remaining == 0 {
        return Some(Duration::ZERO);
    }
    if rates.is_empty() {
        return None;
    }
    let mean = rates.iter().sum::<f64>() / rates.len() as f64;
    if mean > 0.0 {
        Duration::try_from_secs_f64(remaining as f64 / mean).ok()
    } else {
        None
    }
}

fn progress_message(sample: &ProgressSample, average_tps: f64, current_tps: f64, eta: Option<Duration>) -> String {
    let failed = if sample.failed > 0 {
        format!("{} tasks failed, ", sample.failed)
    } else {
        String::new()
    };
    format!(
        "{}/{}, {failed}{} tps(avg), {} tps(cur), ETC {}, {} active threads.",
        sample.completed,
        sample.total,
        format_transactions_per_second(average_tps),
        format_transactions_per_second(current_tps),
        format_eta(eta, sample.paused),
        sample.active_threads,
    )
}

/// Format a rate for progress output.
///
/// Below 1 the value keeps at most two decimals, rounded half up with
/// trailing zeros dropped. From 1 upwards only the integer part is kept, with
/// `,` thousands separators.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_transactions_per_second(tps: f64) -> String {
    if !tps.is_finite() || tps <= 0.0 {
        return "0".to_string();
    }
    if tps < 1.0 {
        let rounded = (tps * 100.0).round() / 100.0;
        let text = format!("{rounded:.2}");
        return text.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    group_thousands(tps.trunc() as u64)
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Format an ETA as `HH:MM:SS`, with ` (paused)` appended when paused.
#[must_use]
pub fn format_eta(eta: Option<Duration>, paused: bool) -> String {
    let mut text = eta.map_or_else(
        || UNKNOWN_ETA.to_string(),
        |eta| {
            let secs = eta.as_secs();
            format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
        },
    );
    if paused {
        text.push_str(" (paused)");
    }
    text
}
