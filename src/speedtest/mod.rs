pub mod download;
pub mod ping;
pub mod progress;
pub mod server;
pub mod upload;

#[derive(Debug, Clone, Default)]
pub struct SpeedTestResult {
    pub server: String,
    pub download_bps: f64,
    pub upload_bps: f64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Probe,
    Ping,
    Download,
    Upload,
    Complete,
}

/// Why a transfer stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEnd {
    Complete,
    TimeLimit,
    ProgressCeiling,
}
