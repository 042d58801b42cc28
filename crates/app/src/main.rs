use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use voxline_app::runtime::{start, AppOptions};

/// Console duplex voice client: push-to-talk microphone streaming with
/// live audio playback of the agent's response.
#[derive(Parser, Debug)]
#[command(name = "voxline", version)]
struct Cli {
    /// Connect through the regional Vertex endpoint (bearer token) instead
    /// of the API-key developer endpoint.
    #[arg(long)]
    vertex: bool,

    /// Input device name; the host default is used when omitted.
    #[arg(long, env = "VOXLINE_INPUT_DEVICE")]
    device: Option<String>,
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "voxline.log");
    let (non_blocking_file, _guard) = tracing_appender::non_blocking(file_appender);
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();
    std::mem::forget(_guard);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging().map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    let cli = Cli::parse();
    tracing::info!(
        "Starting voxline ({} mode)",
        if cli.vertex { "vertex" } else { "api-key" }
    );

    let app = start(AppOptions {
        vertex: cli.vertex,
        device: cli.device,
    })
    .await?;

    println!("Space: start/stop talking. q or Ctrl-C: quit.");
    app.run().await
}
