//! Per-connection round-trip estimation and server-time offset. Median
//! filtering over the last 10 samples absorbs jitter without extrapolating,
//! unlike a one-sided EMA.

use std::collections::VecDeque;

const SAMPLE_CAPACITY: usize = 10;

pub const DEFAULT_INTERPOLATION_DELAY_MS: f64 = 100.0;
pub const MIN_INTERPOLATION_DELAY_MS: f64 = 50.0;
pub const MAX_INTERPOLATION_DELAY_MS: f64 = 500.0;

/// Maps local wall-clock time onto the server's clock from observed
/// PING/PONG round trips. Instance-scoped per connection — no singleton.
pub struct NetworkClock {
    offset_samples: VecDeque<f64>,
    rtt_samples: VecDeque<f64>,
    min_rtt_ms: Option<f64>,
    interpolation_delay_ms: f64,
}

impl NetworkClock {
    pub fn new() -> Self {
        NetworkClock {
            offset_samples: VecDeque::with_capacity(SAMPLE_CAPACITY),
            rtt_samples: VecDeque::with_capacity(SAMPLE_CAPACITY),
            min_rtt_ms: None,
            interpolation_delay_ms: DEFAULT_INTERPOLATION_DELAY_MS,
        }
    }

    /// Clamped to `[50, 500]` ms per spec; default 100 ms.
    pub fn set_interpolation_delay_ms(&mut self, delay_ms: f64) {
        self.interpolation_delay_ms =
            delay_ms.clamp(MIN_INTERPOLATION_DELAY_MS, MAX_INTERPOLATION_DELAY_MS);
    }

    pub fn interpolation_delay_ms(&self) -> f64 {
        self.interpolation_delay_ms
    }

    /// Folds in one PONG observation. `client_send_ms`/`server_send_ms` are
    /// the timestamps the PONG carries; `now_ms` is local time at receipt.
    pub fn on_pong(&mut self, client_send_ms: f64, server_send_ms: f64, now_ms: f64) {
        let rtt = now_ms - client_send_ms;
        let offset = server_send_ms + rtt / 2.0 - now_ms;

        push_capped(&mut self.rtt_samples, rtt);
        push_capped(&mut self.offset_samples, offset);
        self.min_rtt_ms = Some(self.min_rtt_ms.map_or(rtt, |min| min.min(rtt)));
    }

    pub fn offset_ms(&self) -> f64 {
        median(&self.offset_samples)
    }

    pub fn rtt_ms(&self) -> f64 {
        median(&self.rtt_samples)
    }

    pub fn min_rtt_ms(&self) -> Option<f64> {
        self.min_rtt_ms
    }

    pub fn server_time_ms(&self, local_time_ms: f64) -> f64 {
        local_time_ms + self.offset_ms()
    }

    pub fn render_time_ms(&self, local_time_ms: f64) -> f64 {
        self.server_time_ms(local_time_ms) - self.interpolation_delay_ms
    }
}

impl Default for NetworkClock {
    fn default() -> Self {
        Self::new()
    }
}

fn push_capped(ring: &mut VecDeque<f64>, value: f64) {
    if ring.len() == SAMPLE_CAPACITY {
        ring.pop_front();
    }
    ring.push_back(value);
}

fn median(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
