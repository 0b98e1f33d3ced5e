//! Line-oriented host loop
//!
//! Input, one item per line:
//! - a recognized image as JSON, `{"id": "lobby", "pose": {...}}`
//! - a bare image id, recognized at the identity pose
//! - `{"animation_finished": true}` when the scene graph ends playback
//!
//! Output is one JSON [`SceneEvent`] per line.

use anyhow::Result;
use arbio_core::Pose;
use arbio_tracking::{Outcome, RecognizedEntity, SceneEvent};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Poll interval while draining after input ends
const DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HostInput {
    Recognized(RecognizedEntity),
    AnimationFinished { animation_finished: bool },
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostSummary {
    pub recognitions: usize,
    pub skipped: usize,
    pub placed: usize,
    pub animations: usize,
    pub failed: usize,
}

/// Run until `reader` is exhausted, then keep forwarding events until no
/// entity is waiting or the drain timeout passes
pub async fn run<R, W>(state: Arc<AppState>, reader: R, mut writer: W) -> Result<HostSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut events = state.coordinator.subscribe();
    let mut lines = reader.lines();
    let mut summary = HostSummary::default();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => handle_line(&state, &line, &mut summary),
                None => break,
            },
            Some(event) = events.recv() => forward(&mut writer, &event, &mut summary).await?,
        }
    }

    debug!("Input closed, draining");
    let deadline = Instant::now() + state.config.host.drain_timeout();
    let mut poll = tokio::time::interval(DRAIN_POLL);
    loop {
        tokio::select! {
            Some(event) = events.recv() => forward(&mut writer, &event, &mut summary).await?,
            _ = poll.tick() => {
                let waiting = state.coordinator.waiting();
                if waiting.is_empty() {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(entities = ?waiting, "Drain timeout, entities still waiting");
                    break;
                }
            }
        }
    }

    while let Ok(event) = events.try_recv() {
        forward(&mut writer, &event, &mut summary).await?;
    }
    writer.flush().await?;

    info!(
        recognitions = summary.recognitions,
        placed = summary.placed,
        failed = summary.failed,
        "Host loop finished"
    );
    Ok(summary)
}

fn handle_line(state: &Arc<AppState>, line: &str, summary: &mut HostSummary) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let input = if line.starts_with('{') {
        match serde_json::from_str::<HostInput>(line) {
            Ok(input) => input,
            Err(e) => {
                warn!(line = %line, error = %e, "Ignoring unreadable input");
                return;
            }
        }
    } else {
        HostInput::Recognized(RecognizedEntity::new(line, Pose::IDENTITY))
    };

    match input {
        HostInput::Recognized(entity) => {
            summary.recognitions += 1;
            state.retry_manifest();

            let id = entity.id.clone();
            match state.coordinator.on_recognized(entity) {
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Ok(outcome) => debug!(entity = %id, outcome = ?outcome, "Recognition handled"),
                Err(e) => debug!(entity = %id, error = %e, "Recognition not placeable"),
            }
        }
        HostInput::AnimationFinished { animation_finished } => {
            if animation_finished {
                state.coordinator.gate().finish();
            }
        }
    }
}

async fn forward<W>(
    writer: &mut W,
    event: &SceneEvent,
    summary: &mut HostSummary,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match event {
        SceneEvent::Placed(_) => summary.placed += 1,
        SceneEvent::AnimationStarted(_) => summary.animations += 1,
        SceneEvent::PlacementFailed { .. } => summary.failed += 1,
    }

    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
