//! Animation gate: at most one animation session on the shared animator

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// When a new animation session may start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    /// The first session is the only one for the lifetime of the gate
    #[default]
    OncePerProcess,
    /// A new session may start once the previous one has finished
    RestartWhenIdle,
}

/// Gate state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateState {
    /// A session is currently playing
    pub running: bool,
    /// Clip index the next session will play
    pub next_index: usize,
    /// A session has been started at some point
    pub started: bool,
}

/// Guards the single shared animation-playback resource
#[derive(Debug, Default)]
pub struct AnimationGate {
    policy: GatePolicy,
    state: Mutex<GateState>,
}

impl AnimationGate {
    pub fn new(policy: GatePolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(GateState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Try to claim the animator for a model with `clip_count` clips.
    ///
    /// Returns the clip index to play for the one caller that wins; the state
    /// is marked started before the caller begins playback.
    pub fn try_start(&self, clip_count: usize) -> Option<usize> {
        if clip_count == 0 {
            debug!("Animatable asset has no clips, not starting a session");
            return None;
        }

        let mut state = self.lock();
        let blocked = match self.policy {
            GatePolicy::OncePerProcess => state.started || state.running,
            GatePolicy::RestartWhenIdle => state.running,
        };
        if blocked {
            debug!(started = state.started, running = state.running, "Animation gate closed");
            return None;
        }

        let clip_index = state.next_index % clip_count;
        state.next_index = (clip_index + 1) % clip_count;
        state.started = true;
        state.running = true;

        info!(clip = clip_index, clips = clip_count, "Animation session started");
        Some(clip_index)
    }

    /// Mark the running session finished
    pub fn finish(&self) {
        let mut state = self.lock();
        if state.running {
            state.running = false;
            debug!(policy = ?self.policy, "Animation session finished");
        }
    }

    pub fn snapshot(&self) -> GateState {
        *self.lock()
    }
}
