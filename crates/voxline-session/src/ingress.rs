use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::client::LiveSession;
use crate::types::ServerEvent;
use voxline_audio::{AudioChunk, PlaybackBuffer};
use voxline_foundation::{ShutdownToken, TurnEvent, TurnTracker};
use voxline_telemetry::PipelineMetrics;

/// Receive inbound events until cancellation, end-of-stream, or a fatal
/// read error. Audio payloads go to the playback buffer in payload order;
/// turn signals go to the tracker. A dead receive path means the
/// conversation cannot make progress, so read errors and end-of-stream
/// request shutdown rather than leaving the other flows running blind.
pub fn spawn_ingress(
    session: Arc<dyn LiveSession>,
    playback: Arc<PlaybackBuffer>,
    turns: Arc<TurnTracker>,
    shutdown: ShutdownToken,
    metrics: Arc<PipelineMetrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                result = session.receive() => match result {
                    Ok(Some(event)) => {
                        metrics.increment_events_received();
                        handle_event(event, &playback, &turns);
                    }
                    Ok(None) => {
                        tracing::info!("Session stream ended");
                        shutdown.request();
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Session receive failed");
                        shutdown.request();
                        break;
                    }
                },
            }
        }
        tracing::debug!("Ingress pump stopped");
    })
}

fn handle_event(event: ServerEvent, playback: &PlaybackBuffer, turns: &TurnTracker) {
    if event.interrupted {
        // The user cut the agent off: whatever is queued but unplayed is
        // stale. Treat it as the end of the agent's turn.
        tracing::info!("Agent response interrupted, flushing pending playback");
        playback.clear();
        turns.apply(TurnEvent::TurnComplete);
        return;
    }

    let mut saw_audio = false;
    for payload in &event.audio {
        if !payload.is_pcm_audio() {
            continue;
        }
        saw_audio = true;
        playback.write(&AudioChunk {
            data: payload.data.clone(),
        });
    }
    if saw_audio {
        turns.apply(TurnEvent::AgentAudio);
    }

    if event.turn_complete {
        turns.apply(TurnEvent::TurnComplete);
    }
}
