use anyhow::Result;
use clap::Parser;
use speedprobe::app::{run_speed_test, TestUpdate};
use speedprobe::logging::init_logging;
use speedprobe::settings::Config;
use speedprobe::speedtest::server::http_client;
use speedprobe::speedtest::{SpeedTestResult, TestPhase};
use speedprobe::{format_speed, SpeedTestServer, TestResult};
use std::io::Write;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(&config.log_level);
    config.validate()?;

    let client = http_client()?;
    let mut servers = config
        .server_specs()
        .into_iter()
        .map(|(name, address)| SpeedTestServer::with_client(client.clone(), address, name))
        .collect::<speedprobe::Result<Vec<_>>>()?;
    let settings = config.settings();

    let (tx, mut rx) = mpsc::channel(32);
    let handle = tokio::spawn(async move { run_speed_test(&mut servers, &settings, tx).await });

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Some(update) => render(update),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                handle.abort();
                println!("\nCancelled");
                return Ok(());
            }
        }
    }

    let result = handle.await??;
    print_summary(&result);
    Ok(())
}

fn render(update: TestUpdate) {
    match update {
        TestUpdate::Phase(TestPhase::Probe) => println!("Probing servers..."),
        TestUpdate::Phase(TestPhase::Ping) => println!("Measuring latency..."),
        TestUpdate::Phase(_) => {}
        TestUpdate::Probed { server, alive } => {
            println!("  {:<24} {}", server, if alive { "alive" } else { "unreachable" });
        }
        TestUpdate::PingProgress {
            server,
            sample_ms,
            average_ms,
        } => {
            print!("\r  {:<24} {:>7.1}ms (avg {:.1}ms)   ", server, sample_ms, average_ms);
            let _ = std::io::stdout().flush();
        }
        TestUpdate::PingComplete {
            server,
            average_ms,
            jitter_ms,
        } => {
            println!("\r  {:<24} avg {:.1}ms, jitter {:.1}ms          ", server, average_ms, jitter_ms);
        }
        TestUpdate::ServerSelected { server } => println!("Testing against {}", server),
        TestUpdate::DownloadProgress(report) => render_progress("Download", &report),
        TestUpdate::UploadProgress(report) => render_progress("Upload", &report),
        TestUpdate::DownloadComplete { speed_bps } => println!("\r  Download {:<40}", format_speed(speed_bps)),
        TestUpdate::UploadComplete { speed_bps } => println!("\r  Upload   {:<40}", format_speed(speed_bps)),
    }
}

fn render_progress(label: &str, report: &TestResult) {
    const WIDTH: usize = 30;
    let filled = (report.progress * WIDTH as f64).round() as usize;
    print!(
        "\r  {:<8} [{}{}] {:>10}",
        label,
        "#".repeat(filled),
        "-".repeat(WIDTH - filled),
        report.speed_label
    );
    let _ = std::io::stdout().flush();
}

fn print_summary(result: &SpeedTestResult) {
    println!();
    println!("Server:   {}", result.server);
    println!("Ping:     {:.1}ms (jitter {:.1}ms)", result.ping_ms, result.jitter_ms);
    println!("Download: {}", format_speed(result.download_bps));
    println!("Upload:   {}", format_speed(result.upload_bps));
}
