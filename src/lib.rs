pub mod app;
pub mod error;
pub mod logging;
pub mod settings;
pub mod speedtest;

pub use error::{Result, SpeedTestError};
pub use speedtest::{
    download::DownloadOptions,
    ping::PingWindow,
    progress::{compute_progress, format_speed, ProgressTracker, TestResult, MAX_TEST_TIME_MS},
    server::{ServiceData, SpeedTestServer},
    upload::UploadOptions,
};
