use crate::error::Result;
use crate::speedtest::server::SpeedTestServer;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, warn};

pub const PING_WINDOW: usize = 10;

/// Rolling latency history in milliseconds. Holds the most recent
/// [`PING_WINDOW`] samples; the oldest is evicted first.
#[derive(Debug, Clone)]
pub struct PingWindow {
    samples: VecDeque<f64>,
    average: f64,
}

impl PingWindow {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(PING_WINDOW + 1),
            average: -1.0,
        }
    }

    pub fn record(&mut self, sample_ms: f64) {
        self.samples.push_back(sample_ms);
        if self.samples.len() > PING_WINDOW {
            self.samples.pop_front();
        }
        self.average = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
    }

    /// Mean of the window, or `-1` before the first sample.
    pub fn average(&self) -> f64 {
        self.average
    }

    /// Sample standard deviation of the window; 0 with fewer than two samples.
    pub fn jitter(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let variance: f64 = self
            .samples
            .iter()
            .map(|&x| (x - self.average).powi(2))
            .sum::<f64>()
            / (self.samples.len() - 1) as f64;
        variance.sqrt()
    }

    pub fn samples(&self) -> impl ExactSizeIterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for PingWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeedTestServer {
    /// Records one latency sample.
    ///
    /// Latency is the time until the response headers arrive; the body is
    /// never read and the request is dropped as soon as the headers are in.
    /// Fails only when no response is observed at all.
    pub async fn measure_ping(&mut self) -> Result<f64> {
        let request = self.client().get(self.endpoint("ping"));

        let start = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(server = %self.name(), op = "ping", error = %e, "Ping failed");
                return Err(e.into());
            }
        };
        let sample_ms = start.elapsed().as_secs_f64() * 1000.0;
        drop(response);

        self.ping_mut().record(sample_ms);
        debug!(
            server = %self.name(),
            sample_ms,
            average_ms = self.ping().average(),
            "Recorded ping sample"
        );
        Ok(sample_ms)
    }
}
