use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::controller::TurnController;
use crate::keyboard::{spawn_keyboard_listener, KeyCommand};
use voxline_audio::{PlaybackBuffer, PlaybackEngine, PLAYBACK_CAPACITY_SAMPLES};
use voxline_foundation::{ShutdownHandler, ShutdownToken, TurnTracker};
use voxline_session::{connect, spawn_egress, spawn_ingress, LiveSession, SessionConfig};
use voxline_telemetry::PipelineMetrics;

const OUTBOUND_QUEUE_CAPACITY: usize = 256;
const KEY_QUEUE_CAPACITY: usize = 16;
const PLAYBACK_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Use the regional Vertex endpoint instead of the API-key endpoint.
    pub vertex: bool,
    /// Input device override; host default when `None`.
    pub device: Option<String>,
}

/// The assembled pipeline. `run` drives the main loop until cancellation,
/// then unwinds every flow in a fixed order.
pub struct App {
    metrics: Arc<PipelineMetrics>,
    turns: Arc<TurnTracker>,
    shutdown: ShutdownToken,
    controller: TurnController,
    session: Arc<dyn LiveSession>,
    playback: Arc<PlaybackBuffer>,
    engine: PlaybackEngine,
    egress: JoinHandle<()>,
    ingress: JoinHandle<()>,
    keyboard: JoinHandle<()>,
    key_rx: mpsc::Receiver<KeyCommand>,
}

/// Wire the whole pipeline together. Configuration and device errors
/// surface here, before any flow starts.
pub async fn start(opts: AppOptions) -> anyhow::Result<App> {
    let metrics = Arc::new(PipelineMetrics::default());
    let shutdown = ShutdownHandler::new().install();
    let turns = Arc::new(TurnTracker::new());

    let config = SessionConfig::from_env(opts.vertex)?;
    let session: Arc<dyn LiveSession> = Arc::new(connect(&config).await?);

    let (playback, tap) = PlaybackBuffer::new(PLAYBACK_CAPACITY_SAMPLES, metrics.clone());
    let engine = PlaybackEngine::spawn(tap, shutdown.clone())?;

    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let egress = spawn_egress(out_rx, session.clone(), shutdown.clone(), metrics.clone());
    let ingress = spawn_ingress(
        session.clone(),
        playback.clone(),
        turns.clone(),
        shutdown.clone(),
        metrics.clone(),
    );

    let (key_tx, key_rx) = mpsc::channel(KEY_QUEUE_CAPACITY);
    let keyboard = spawn_keyboard_listener(key_tx, shutdown.clone());

    let controller = TurnController::new(
        turns.clone(),
        out_tx,
        shutdown.clone(),
        metrics.clone(),
        opts.device,
    );

    info!("Pipeline started");
    Ok(App {
        metrics,
        turns,
        shutdown,
        controller,
        session,
        playback,
        engine,
        egress,
        ingress,
        keyboard,
        key_rx,
    })
}

impl App {
    pub async fn run(self) -> anyhow::Result<()> {
        let App {
            metrics,
            turns,
            shutdown,
            mut controller,
            session,
            playback,
            engine,
            egress,
            ingress,
            keyboard,
            mut key_rx,
        } = self;

        let mut stats = tokio::time::interval(STATS_INTERVAL);
        stats.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        stats.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                cmd = key_rx.recv() => match cmd {
                    Some(KeyCommand::ToggleTalk) => controller.toggle().await,
                    Some(KeyCommand::Quit) | None => shutdown.request(),
                },
                _ = stats.tick() => {
                    info!(
                        state = ?turns.current(),
                        chunks_sent = metrics.chunks_sent.load(Ordering::Relaxed),
                        send_failures = metrics.send_failures.load(Ordering::Relaxed),
                        events_received = metrics.events_received.load(Ordering::Relaxed),
                        playback_dropped = metrics.playback_dropped_chunks.load(Ordering::Relaxed),
                        "Pipeline status"
                    );
                }
            }
        }

        // Ordered teardown: microphone, playback writes, remote session,
        // then the flows. Requesting shutdown again is a no-op, so both the
        // cancellation path and the natural-quit path converge here once.
        info!("Beginning graceful shutdown");
        shutdown.request();

        // 1. Quiesce the source and release the input device.
        controller.halt().await;

        // 2. No more playback writes.
        playback.close();

        // 3. Remote session, best effort.
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "Session close failed");
        }

        // 4. Join the flows; each honors the cancellation token.
        let _ = egress.await;
        let _ = ingress.await;
        let _ = keyboard.await;

        // Output device last: bounded drain of the closed queue.
        engine.stop(PLAYBACK_DRAIN_TIMEOUT);
        info!("Shutdown complete");
        Ok(())
    }
}
