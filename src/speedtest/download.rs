use crate::error::Result;
use crate::speedtest::progress::{ProgressTracker, TestResult, MAX_TEST_TIME_MS};
use crate::speedtest::server::SpeedTestServer;
use crate::speedtest::TransferEnd;
use futures::StreamExt;
use reqwest::RequestBuilder;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Bytes to request. Falls back to the server's recommended download
    /// size, then to whatever the server sends by default. Never more than
    /// the server's published `max`.
    pub size: Option<u64>,
}

impl SpeedTestServer {
    /// Runs a timed download, passing a report to `on_progress` for every
    /// body chunk received.
    ///
    /// The timer starts when the response headers arrive and the transfer is
    /// cut off after the server's `time_limit`, or earlier if the progress
    /// ceiling is crossed. Transfer errors are logged, not returned; the only
    /// error is calling this before a successful [`probe`](Self::probe).
    /// Returns the last report emitted.
    pub async fn measure_download<F>(
        &mut self,
        options: &DownloadOptions,
        mut on_progress: F,
    ) -> Result<Option<TestResult>>
    where
        F: FnMut(&TestResult),
    {
        let service_data = self.require_service_data()?;
        let time_limit = match service_data.time_limit() {
            Some(limit) => limit,
            None => {
                warn!(
                    server = %self.name(),
                    op = "download",
                    "Server did not publish a time limit, using {}ms",
                    MAX_TEST_TIME_MS
                );
                Duration::from_millis(MAX_TEST_TIME_MS)
            }
        };

        let mut request = self.client().patch(self.endpoint("download"));
        let size = options
            .size
            .or_else(|| service_data.recommended_download())
            .map(|size| self.clamp_to_max("download", size));
        if let Some(size) = size {
            request = request.query(&[("size", size)]);
        }

        info!(server = %self.name(), op = "download", ?time_limit, "Starting...");

        let mut last = None;
        match drain(request, time_limit, &mut on_progress, &mut last).await {
            Ok(end) => info!(
                server = %self.name(),
                op = "download",
                ?end,
                bytes = last.as_ref().map_or(0, |r: &TestResult| r.bytes_transferred),
                "Done!"
            ),
            Err(e) => {
                error!(server = %self.name(), op = "download", error = %e, "Download failed");
                info!(server = %self.name(), op = "download", "Done!");
            }
        }
        Ok(last)
    }
}

async fn drain<F>(
    request: RequestBuilder,
    time_limit: Duration,
    on_progress: &mut F,
    last: &mut Option<TestResult>,
) -> reqwest::Result<TransferEnd>
where
    F: FnMut(&TestResult),
{
    let response = request.send().await?.error_for_status()?;

    let mut tracker = ProgressTracker::start();
    let expected = response.content_length();
    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;

    let deadline = tokio::time::sleep(time_limit);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return Ok(TransferEnd::TimeLimit),
            chunk = stream.next() => {
                let Some(chunk) = chunk else {
                    return Ok(TransferEnd::Complete);
                };
                received += chunk?.len() as u64;

                let (result, abort) = tracker.report(received, expected);
                on_progress(&result);
                *last = Some(result);

                if abort {
                    return Ok(TransferEnd::ProgressCeiling);
                }
            }
        }
    }
}
