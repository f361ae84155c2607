use crate::settings::Settings;
use crate::speedtest::{
    progress::TestResult, server::SpeedTestServer, SpeedTestResult, TestPhase,
};
use anyhow::{bail, Result};
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum TestUpdate {
    Phase(TestPhase),
    Probed { server: String, alive: bool },
    PingProgress { server: String, sample_ms: f64, average_ms: f64 },
    PingComplete { server: String, average_ms: f64, jitter_ms: f64 },
    ServerSelected { server: String },
    DownloadProgress(TestResult),
    DownloadComplete { speed_bps: f64 },
    UploadProgress(TestResult),
    UploadComplete { speed_bps: f64 },
}

/// Probes every server, pings the live ones, then runs the transfer tests
/// against the one with the lowest average latency.
///
/// Progress reports are forwarded with `try_send`: a slow consumer loses
/// intermediate frames but never stalls a transfer.
pub async fn run_speed_test(
    servers: &mut [SpeedTestServer],
    settings: &Settings,
    update_tx: mpsc::Sender<TestUpdate>,
) -> Result<SpeedTestResult> {
    let _ = update_tx.send(TestUpdate::Phase(TestPhase::Probe)).await;
    let alive = join_all(servers.iter_mut().map(|server| server.probe())).await;
    for (server, alive) in servers.iter().zip(alive) {
        let _ = update_tx
            .send(TestUpdate::Probed {
                server: server.name().to_string(),
                alive,
            })
            .await;
    }
    if !servers.iter().any(SpeedTestServer::is_alive) {
        bail!("No speed-test server responded to the probe");
    }

    // Ping test
    let _ = update_tx.send(TestUpdate::Phase(TestPhase::Ping)).await;
    for server in servers.iter_mut().filter(|s| s.is_alive()) {
        for i in 0..settings.ping_count {
            if i > 0 {
                tokio::time::sleep(settings.ping_interval).await;
            }
            match server.measure_ping().await {
                Ok(sample_ms) => {
                    let _ = update_tx
                        .send(TestUpdate::PingProgress {
                            server: server.name().to_string(),
                            sample_ms,
                            average_ms: server.ping().average(),
                        })
                        .await;
                }
                Err(e) => warn!(server = %server.name(), error = %e, "Skipping ping sample"),
            }
        }
        let _ = update_tx
            .send(TestUpdate::PingComplete {
                server: server.name().to_string(),
                average_ms: server.ping().average(),
                jitter_ms: server.ping().jitter(),
            })
            .await;
    }

    let best = select_server(servers);
    let server = &mut servers[best];
    info!(server = %server.name(), average_ms = server.ping().average(), "Selected server");
    let _ = update_tx
        .send(TestUpdate::ServerSelected {
            server: server.name().to_string(),
        })
        .await;

    let mut result = SpeedTestResult {
        server: server.name().to_string(),
        ping_ms: server.ping().average(),
        jitter_ms: server.ping().jitter(),
        ..SpeedTestResult::default()
    };

    // Download test
    if settings.run_download {
        let _ = update_tx.send(TestUpdate::Phase(TestPhase::Download)).await;
        let last = server
            .measure_download(&settings.download, |report| {
                let _ = update_tx.try_send(TestUpdate::DownloadProgress(report.clone()));
            })
            .await?;
        result.download_bps = last.map_or(0.0, |r| r.speed_bps);
        let _ = update_tx
            .send(TestUpdate::DownloadComplete {
                speed_bps: result.download_bps,
            })
            .await;
    }

    // Upload test
    if settings.run_upload {
        let _ = update_tx.send(TestUpdate::Phase(TestPhase::Upload)).await;
        let last = server
            .measure_upload(&settings.upload, |report| {
                let _ = update_tx.try_send(TestUpdate::UploadProgress(report.clone()));
            })
            .await;
        result.upload_bps = last.map_or(0.0, |r| r.speed_bps);
        let _ = update_tx
            .send(TestUpdate::UploadComplete {
                speed_bps: result.upload_bps,
            })
            .await;
    }

    let _ = update_tx.send(TestUpdate::Phase(TestPhase::Complete)).await;
    Ok(result)
}

/// Index of the live server with the lowest average ping. Servers that never
/// answered a ping rank after every server that did.
fn select_server(servers: &[SpeedTestServer]) -> usize {
    servers
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_alive())
        .min_by(|(_, a), (_, b)| rank(a).total_cmp(&rank(b)))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn rank(server: &SpeedTestServer) -> f64 {
    if server.ping().is_empty() {
        f64::INFINITY
    } else {
        server.ping().average()
    }
}
