use crate::error::{Result, SpeedTestError};
use crate::speedtest::download::DownloadOptions;
use crate::speedtest::upload::UploadOptions;
use clap::Parser;
use std::time::Duration;
use tracing::debug;

#[derive(Parser, Debug, Clone)]
#[command(name = "speedprobe")]
#[command(about = "Measure latency and throughput against self-hosted speed-test servers")]
pub struct Config {
    /// Servers to test, as `URL` or `NAME=URL`
    #[arg(required = true)]
    pub servers: Vec<String>,

    /// Ping samples to take per server
    #[arg(long, default_value_t = 10)]
    pub ping_count: usize,

    /// Pause between ping samples in milliseconds
    #[arg(long, default_value_t = 200)]
    pub ping_interval_ms: u64,

    /// Bytes to request for the download test (defaults to the server's recommendation)
    #[arg(long)]
    pub download_size: Option<u64>,

    /// Size of each upload chunk in bytes (defaults to the server's recommendation)
    #[arg(long)]
    pub upload_chunk_size: Option<usize>,

    /// Skip the download test
    #[arg(long)]
    pub skip_download: bool,

    /// Skip the upload test
    #[arg(long)]
    pub skip_upload: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        debug!("Validating configuration");
        if self.servers.is_empty() {
            return Err(SpeedTestError::Config("at least one server is required".into()));
        }
        if self.ping_count == 0 {
            return Err(SpeedTestError::Config("ping-count must be > 0".into()));
        }
        if self.upload_chunk_size == Some(0) {
            return Err(SpeedTestError::Config("upload-chunk-size must be > 0".into()));
        }
        if self.download_size == Some(0) {
            return Err(SpeedTestError::Config("download-size must be > 0".into()));
        }
        Ok(())
    }

    /// `(name, address)` pairs for every server argument.
    pub fn server_specs(&self) -> Vec<(String, String)> {
        self.servers.iter().map(|spec| parse_server_spec(spec)).collect()
    }

    pub fn settings(&self) -> Settings {
        Settings {
            ping_count: self.ping_count,
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            download: DownloadOptions {
                size: self.download_size,
            },
            upload: UploadOptions {
                chunk_size: self.upload_chunk_size,
            },
            run_download: !self.skip_download,
            run_upload: !self.skip_upload,
        }
    }
}

// `NAME=URL`, or a bare URL that doubles as its own name. An `=` after the
// scheme separator belongs to the URL.
fn parse_server_spec(spec: &str) -> (String, String) {
    match spec.split_once('=') {
        Some((name, address)) if !name.is_empty() && !name.contains("://") => {
            (name.to_string(), address.to_string())
        }
        _ => (spec.to_string(), spec.to_string()),
    }
}

/// What the runner does, independent of how it was configured.
#[derive(Debug, Clone)]
pub struct Settings {
    pub ping_count: usize,
    pub ping_interval: Duration,
    pub download: DownloadOptions,
    pub upload: UploadOptions,
    pub run_download: bool,
    pub run_upload: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ping_count: 10,
            ping_interval: Duration::from_millis(200),
            download: DownloadOptions::default(),
            upload: UploadOptions::default(),
            run_download: true,
            run_upload: true,
        }
    }
}
