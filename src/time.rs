//! Timekeeper (C1) – estimates the server's wall clock from HTTP `Date`
//! header samples and exposes a monotonic-biased `now_ms()`.
//!
//! A small owned struct, cheap to tick, logged-and-swallowed on failure so a
//! flaky network never takes the simulator down.

use chrono::DateTime;
use log::warn;
use parking_lot::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Smoothing factor applied to each new offset sample.
const SMOOTHING_ALPHA: f64 = 0.2;
/// Half of the `Date` header's one-second granularity, added to compensate
/// for the server having truncated its own clock before sending it.
const HEADER_MIDPOINT_MS: f64 = 500.0;
/// Interval between background refreshes once primed.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Number of back-to-back samples taken when priming.
pub const PRIME_SAMPLE_COUNT: usize = 3;

struct ClockState {
    offset_avg_ms: Option<f64>,
    last_returned_ms: f64,
}

/// Estimates `server_time - local_time` by sampling a remote `Date` header.
pub struct Timekeeper {
    client: reqwest::Client,
    base_url: String,
    state: Mutex<ClockState>,
}

impl Timekeeper {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            state: Mutex::new(ClockState {
                offset_avg_ms: None,
                last_returned_ms: 0.0,
            }),
        }
    }

    /// Take three back-to-back samples to seed the running offset.
    pub async fn prime(&self) {
        for _ in 0..PRIME_SAMPLE_COUNT {
            self.sample_once().await;
        }
    }

    /// Take a single sample and fold it into the running offset. Failures
    /// are logged and swallowed — the previous offset (or none) is kept.
    pub async fn sample_once(&self) {
        let client_sent = wall_clock_ms();
        let resp = match self.client.head(&self.base_url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("timekeeper: HEAD {} failed: {}", self.base_url, e);
                return;
            }
        };
        let client_received = wall_clock_ms();

        let Some(date_header) = resp.headers().get(reqwest::header::DATE) else {
            warn!("timekeeper: response from {} had no Date header", self.base_url);
            return;
        };
        let Ok(date_str) = date_header.to_str() else {
            warn!("timekeeper: Date header was not valid ASCII");
            return;
        };
        let Ok(parsed) = DateTime::parse_from_rfc2822(date_str) else {
            warn!("timekeeper: could not parse Date header {:?}", date_str);
            return;
        };

        let server_received = parsed.timestamp_millis() as f64 + HEADER_MIDPOINT_MS;
        let server_time = server_received + (client_received - client_sent) / 2.0;
        let offset = server_time - client_received;

        let mut state = self.state.lock();
        state.offset_avg_ms = Some(match state.offset_avg_ms {
            None => offset,
            Some(prev) => prev + SMOOTHING_ALPHA * (offset - prev),
        });
    }

    /// Current best estimate of server time, never moving backward across
    /// calls. Falls back to the raw wall clock if the estimate is somehow
    /// non-finite (e.g. before the first successful sample, or on overflow).
    pub fn now_ms(&self) -> f64 {
        let wall = wall_clock_ms();
        let mut state = self.state.lock();

        let candidate = match state.offset_avg_ms {
            Some(offset) => {
                let v = wall + offset;
                if v.is_finite() {
                    v
                } else {
                    wall
                }
            }
            None => wall,
        };

        let next = candidate.max(state.last_returned_ms);
        state.last_returned_ms = next;
        next
    }
}

fn wall_clock_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}
