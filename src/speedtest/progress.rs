use tokio::time::Instant;

/// Pacing ceiling for the progress bar. Independent of any server-declared
/// time limit; crossing it ends the transfer client-side.
pub const MAX_TEST_TIME_MS: u64 = 10_000;

const UNITS: [(f64, &str, usize); 4] = [
    (1_000_000_000_000.0, "tbps", 1),
    (1_000_000_000.0, "gbps", 1),
    (1_000_000.0, "mbps", 1),
    (1_000.0, "kbps", 0),
];

/// Snapshot emitted to the progress callback during a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub elapsed_ms: u64,
    pub speed_bps: f64,
    pub speed_label: String,
    /// Fraction of `MAX_TEST_TIME_MS` elapsed, clamped to `[0, 1]`.
    pub progress: f64,
    pub bytes_transferred: u64,
}

/// Converts raw transfer counters into a report.
///
/// The returned flag is set when the pacing ceiling has been exceeded and the
/// in-flight transfer should be aborted. A transfer whose byte count matches
/// the expected total is reported as complete and never asks for an abort.
pub fn compute_progress(
    elapsed_ms: u64,
    bytes_transferred: u64,
    bytes_expected: Option<u64>,
) -> (TestResult, bool) {
    let mut speed_bps = (bytes_transferred as f64 * 8.0) / (elapsed_ms as f64 / 1000.0);
    if !speed_bps.is_finite() {
        speed_bps = 0.0;
    }

    let mut progress = elapsed_ms as f64 / MAX_TEST_TIME_MS as f64;
    let mut abort = false;

    if bytes_expected == Some(bytes_transferred) {
        progress = 1.0;
    } else if progress > 1.0 {
        progress = 1.0;
        abort = true;
    }

    let result = TestResult {
        elapsed_ms,
        speed_bps,
        speed_label: format_speed(speed_bps),
        progress,
        bytes_transferred,
    };
    (result, abort)
}

/// Human-readable speed, e.g. `"12.3mbps"`. Speeds in `(0, 1]` are too small
/// to display and yield an empty string.
pub fn format_speed(speed_bps: f64) -> String {
    if speed_bps == 0.0 {
        return "0bps".to_string();
    }
    if speed_bps <= 1.0 {
        return String::new();
    }

    let label = UNITS
        .iter()
        .find(|(threshold, _, _)| speed_bps >= *threshold)
        .map(|&(threshold, unit, decimals)| {
            format!("{}{}", fixed(speed_bps / threshold, decimals), unit)
        })
        .unwrap_or_else(|| format!("{}bps", fixed(speed_bps, 0)));

    label.replacen(".0", "", 1)
}

// Rounds half away from zero; `format!` alone rounds ties to even.
fn fixed(value: f64, decimals: usize) -> String {
    let scale = 10f64.powi(decimals as i32);
    format!("{:.*}", decimals, (value * scale).round() / scale)
}

/// Tracks a single transfer: start instant and whether the abort signal has
/// already been raised.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    start: Instant,
    abort_signalled: bool,
}

impl ProgressTracker {
    pub fn start() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            start,
            abort_signalled: false,
        }
    }

    pub fn report(&mut self, bytes_transferred: u64, bytes_expected: Option<u64>) -> (TestResult, bool) {
        self.report_at(Instant::now(), bytes_transferred, bytes_expected)
    }

    /// Like [`report`](Self::report) with an explicit clock reading. The abort
    /// flag is returned at most once per tracker.
    pub fn report_at(
        &mut self,
        now: Instant,
        bytes_transferred: u64,
        bytes_expected: Option<u64>,
    ) -> (TestResult, bool) {
        let elapsed_ms = now.saturating_duration_since(self.start).as_millis() as u64;
        let (result, abort) = compute_progress(elapsed_ms, bytes_transferred, bytes_expected);

        let abort = abort && !self.abort_signalled;
        if abort {
            self.abort_signalled = true;
        }
        (result, abort)
    }

    pub fn abort_signalled(&self) -> bool {
        self.abort_signalled
    }
}
