use crate::speedtest::progress::{ProgressTracker, TestResult};
use crate::speedtest::server::SpeedTestServer;
use crate::speedtest::TransferEnd;
use bytes::Bytes;
use futures::{stream, Stream};
use rand::{Rng, SeedableRng};
use reqwest::Body;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 10_000_000;

// Granularity of upload progress events within one chunk.
const PIECE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Bytes per request. Falls back to the server's recommended upload
    /// size, then to [`DEFAULT_CHUNK_SIZE`]. Never more than the server's
    /// published `max`.
    pub chunk_size: Option<usize>,
}

impl SpeedTestServer {
    /// Uploads the same random chunk over and over, reporting cumulative
    /// bytes since the start of the test.
    ///
    /// There is no time limit of its own: the loop stops on the first chunk
    /// that fails or when the progress ceiling aborts the chunk in flight.
    /// Errors are logged, never returned. Returns the last report emitted.
    pub async fn measure_upload<F>(
        &mut self,
        options: &UploadOptions,
        mut on_progress: F,
    ) -> Option<TestResult>
    where
        F: FnMut(&TestResult),
    {
        let chunk_size = self.upload_chunk_size(options);
        info!(server = %self.name(), op = "upload", chunk_size, "Starting...");

        let payload = random_payload(chunk_size);
        let chunk_size = payload.len() as u64;

        let mut tracker = ProgressTracker::start();
        let mut last = None;
        let mut completed: u64 = 0;

        loop {
            let offset = completed * chunk_size;
            match self
                .send_chunk(payload.clone(), offset, &mut tracker, &mut on_progress, &mut last)
                .await
            {
                Ok(TransferEnd::Complete) => {
                    completed += 1;
                    debug!(server = %self.name(), chunks = completed, "Chunk uploaded");
                }
                Ok(end) => {
                    debug!(server = %self.name(), ?end, "Upload cut off");
                    break;
                }
                Err(e) => {
                    warn!(server = %self.name(), op = "upload", error = %e, "Chunk failed");
                    break;
                }
            }
        }

        info!(
            server = %self.name(),
            op = "upload",
            chunks = completed,
            bytes = last.as_ref().map_or(0, |r: &TestResult| r.bytes_transferred),
            "Done!"
        );
        last
    }

    fn upload_chunk_size(&self, options: &UploadOptions) -> usize {
        let requested = options
            .chunk_size
            .map(|size| size as u64)
            .or_else(|| self.service_data().and_then(|data| data.recommended_upload()))
            .unwrap_or(DEFAULT_CHUNK_SIZE as u64);
        self.clamp_to_max("upload", requested).max(1) as usize
    }

    async fn send_chunk<F>(
        &self,
        payload: Bytes,
        offset: u64,
        tracker: &mut ProgressTracker,
        on_progress: &mut F,
        last: &mut Option<TestResult>,
    ) -> reqwest::Result<TransferEnd>
    where
        F: FnMut(&TestResult),
    {
        let (loaded_tx, mut loaded_rx) = mpsc::unbounded_channel::<u64>();
        let body = Body::wrap_stream(progress_stream(payload, loaded_tx));

        let send = self.client().patch(self.endpoint("upload")).body(body).send();
        tokio::pin!(send);

        let mut emit = |loaded: u64| {
            let (result, abort) = tracker.report(offset + loaded, None);
            on_progress(&result);
            *last = Some(result);
            abort
        };

        loop {
            tokio::select! {
                biased;
                Some(loaded) = loaded_rx.recv() => {
                    if emit(loaded) {
                        return Ok(TransferEnd::ProgressCeiling);
                    }
                }
                response = &mut send => {
                    while let Ok(loaded) = loaded_rx.try_recv() {
                        if emit(loaded) {
                            return Ok(TransferEnd::ProgressCeiling);
                        }
                    }
                    response?.error_for_status()?;
                    return Ok(TransferEnd::Complete);
                }
            }
        }
    }
}

/// Splits `payload` into pieces and reports the running byte count as each
/// piece is handed to the transport.
fn progress_stream(
    payload: Bytes,
    loaded_tx: mpsc::UnboundedSender<u64>,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static {
    let len = payload.len();
    stream::iter((0..len).step_by(PIECE_SIZE).map(move |start| {
        let end = (start + PIECE_SIZE).min(len);
        let _ = loaded_tx.send(end as u64);
        Ok(payload.slice(start..end))
    }))
}

fn random_payload(len: usize) -> Bytes {
    let mut rng = rand::rngs::StdRng::from_entropy();
    let mut data = vec![0u8; len];
    rng.fill(&mut data[..]);
    Bytes::from(data)
}
