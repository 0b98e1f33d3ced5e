//! Readiness coordinator: places an entity's content once its assets are loaded
//!
//! Each recognized entity moves through `Waiting -> Placing -> Done` (or
//! `Failed`). While waiting, a single continuation task waits for any
//! outstanding load to settle and then re-checks the whole entity. Repeated
//! recognitions during that time only refresh the anchor pose.
//!
//! Scene events go to every subscriber over unbounded channels, so a slow
//! consumer never loses a placement.

use futures_util::future::select_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::gate::AnimationGate;
use crate::handle::LoadHandle;
use crate::registry::{AssetRegistry, Readiness, ReadinessError, ReadyAsset};
use crate::scene::{AnchorId, AnimationRequest, PlacementInstruction, RecognizedEntity, SceneEvent};

/// Phase of an entity's current invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Waiting,
    Placing,
    Done,
    Failed,
}

/// Result of one readiness check
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Assets still loading; a continuation will re-check
    Waiting,
    /// Content placed under a new anchor
    Placed {
        anchor: AnchorId,
        assets: usize,
        /// Clip index if this pass started the animation session
        animation: Option<usize>,
    },
    /// Entity has no manifest entry
    Skipped,
}

struct Invocation {
    entity: RecognizedEntity,
    phase: Phase,
}

enum Wake {
    Populated,
    AnyOf(Vec<LoadHandle>),
}

/// Decides when recognized entities can be placed
pub struct ReadinessCoordinator {
    registry: Arc<AssetRegistry>,
    gate: AnimationGate,
    invocations: Mutex<HashMap<String, Invocation>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SceneEvent>>>,
}

impl ReadinessCoordinator {
    pub fn new(registry: Arc<AssetRegistry>, gate: AnimationGate) -> Arc<Self> {
        Arc::new(Self {
            registry,
            gate,
            invocations: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to scene events emitted from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SceneEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Deliver to every live subscriber, dropping closed ones
    fn emit(&self, event: SceneEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        if subscribers.is_empty() {
            trace!("No scene event subscribers");
        }
    }

    pub fn registry(&self) -> &Arc<AssetRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &AnimationGate {
        &self.gate
    }

    /// Phase of the entity's latest invocation
    pub fn phase(&self, entity_id: &str) -> Option<Phase> {
        self.lock().get(entity_id).map(|inv| inv.phase)
    }

    /// Entities currently waiting on loads or the manifest
    pub fn waiting(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, inv)| inv.phase == Phase::Waiting)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Invocation>> {
        self.invocations.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle a recognition of `entity`.
    ///
    /// Must be called from within a tokio runtime; waiting registers a task.
    pub fn on_recognized(self: &Arc<Self>, entity: RecognizedEntity) -> Result<Outcome, ReadinessError> {
        let mut invocations = self.lock();

        if let Some(invocation) = invocations.get_mut(&entity.id) {
            if invocation.phase == Phase::Waiting {
                trace!(entity = %entity.id, "Already waiting, refreshing anchor pose");
                invocation.entity = entity;
                return Ok(Outcome::Waiting);
            }
        }

        self.evaluate(&mut invocations, entity)
    }

    /// Continuation entry: re-check an entity that is still waiting
    fn resume(self: &Arc<Self>, entity_id: &str) {
        let mut invocations = self.lock();

        let entity = match invocations.get(entity_id) {
            Some(invocation) if invocation.phase == Phase::Waiting => invocation.entity.clone(),
            _ => {
                debug!(entity = %entity_id, "Entity no longer waiting, dropping continuation");
                return;
            }
        };

        match self.evaluate(&mut invocations, entity) {
            Ok(outcome) => debug!(entity = %entity_id, outcome = ?outcome, "Re-checked entity"),
            Err(e) => warn!(entity = %entity_id, error = %e, "Entity failed after waiting"),
        }
    }

    fn evaluate(
        self: &Arc<Self>,
        invocations: &mut HashMap<String, Invocation>,
        entity: RecognizedEntity,
    ) -> Result<Outcome, ReadinessError> {
        match self.registry.readiness(&entity.id) {
            Readiness::Unpopulated => {
                debug!(entity = %entity.id, "Manifest not loaded yet, waiting");
                self.wait(invocations, entity, Wake::Populated);
                Ok(Outcome::Waiting)
            }
            Readiness::NotInManifest => {
                debug!(entity = %entity.id, "Entity not in manifest, skipping");
                invocations.remove(&entity.id);
                Ok(Outcome::Skipped)
            }
            Readiness::Pending(handles) => {
                debug!(entity = %entity.id, pending = handles.len(), "Assets still loading, waiting");
                self.wait(invocations, entity, Wake::AnyOf(handles));
                Ok(Outcome::Waiting)
            }
            Readiness::Failed(failures) => {
                let previous = invocations
                    .insert(
                        entity.id.clone(),
                        Invocation {
                            entity: entity.clone(),
                            phase: Phase::Failed,
                        },
                    )
                    .map(|inv| inv.phase);

                if previous != Some(Phase::Failed) {
                    let reasons: Vec<String> = failures
                        .iter()
                        .map(|f| format!("{}: {}", f.asset_key, f.error))
                        .collect();
                    warn!(entity = %entity.id, reasons = ?reasons, "Entity cannot be placed");
                    self.emit(SceneEvent::PlacementFailed {
                        entity_id: entity.id.clone(),
                        reasons,
                    });
                }

                Err(ReadinessError::PartialFailure {
                    entity_id: entity.id,
                    failures,
                })
            }
            Readiness::Ready(assets) => {
                invocations.insert(
                    entity.id.clone(),
                    Invocation {
                        entity: entity.clone(),
                        phase: Phase::Placing,
                    },
                );
                let outcome = self.place(&entity, &assets);
                if let Some(invocation) = invocations.get_mut(&entity.id) {
                    invocation.phase = Phase::Done;
                }
                Ok(outcome)
            }
        }
    }

    /// Record the entity as waiting and spawn its continuation
    fn wait(self: &Arc<Self>, invocations: &mut HashMap<String, Invocation>, entity: RecognizedEntity, wake: Wake) {
        let entity_id = entity.id.clone();
        invocations.insert(
            entity_id.clone(),
            Invocation {
                entity,
                phase: Phase::Waiting,
            },
        );

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            match wake {
                Wake::Populated => coordinator.registry.wait_populated().await,
                Wake::AnyOf(handles) if !handles.is_empty() => {
                    let settles = handles.iter().map(|h| Box::pin(h.settled()));
                    let _ = select_all(settles).await;
                }
                Wake::AnyOf(_) => {}
            }
            coordinator.resume(&entity_id);
        });
    }

    fn place(&self, entity: &RecognizedEntity, assets: &[ReadyAsset]) -> Outcome {
        let anchor = AnchorId::new();
        let mut animation = None;

        for ready in assets {
            let descriptor = &ready.descriptor;
            let local = descriptor.local_pose();
            self.emit(SceneEvent::Placed(PlacementInstruction {
                anchor,
                anchor_pose: entity.pose,
                anchor_extent: entity.extent,
                entity_id: entity.id.clone(),
                asset_key: ready.asset_key.clone(),
                kind: descriptor.kind,
                local_position: local.translation,
                local_rotation: local.rotation,
                local_scale: descriptor.local_scale(),
                world_pose: entity.pose.compose(&local),
                renderable: ready.asset.renderable,
            }));

            if descriptor.is_animatable() {
                if let Some(clip_index) = self.gate.try_start(ready.asset.clip_count) {
                    animation = Some(clip_index);
                    self.emit(SceneEvent::AnimationStarted(AnimationRequest {
                        anchor,
                        entity_id: entity.id.clone(),
                        asset_key: ready.asset_key.clone(),
                        renderable: ready.asset.renderable,
                        clip_index,
                    }));
                }
            }
        }

        info!(
            entity = %entity.id,
            anchor = %anchor,
            assets = assets.len(),
            animation = ?animation,
            "Placed entity content"
        );

        Outcome::Placed {
            anchor,
            assets: assets.len(),
            animation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GatePolicy;
    use crate::loader::testing::{as_loader, ManualLoader};
    use arbio_core::{Manifest, Pose, Quat, Vec3};
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;

    async fn setup(json: &str) -> (Arc<ManualLoader>, Arc<ReadinessCoordinator>) {
        let manual = ManualLoader::new();
        let registry = Arc::new(AssetRegistry::new(as_loader(&manual)));
        registry.ensure_loaded(Manifest::parse(json).unwrap()).await;
        let coordinator = ReadinessCoordinator::new(registry, AnimationGate::new(GatePolicy::OncePerProcess));
        (manual, coordinator)
    }

    fn entity(id: &str) -> RecognizedEntity {
        RecognizedEntity::new(id, Pose::new(Vec3::new(0.0, 0.0, -0.5), Quat::IDENTITY))
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<SceneEvent>) -> SceneEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for scene event")
            .expect("event channel closed")
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SceneEvent>) -> Vec<SceneEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Let spawned continuations run, then assert nothing else was emitted
    async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<SceneEvent>) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_places_once_after_load() {
        let (manual, coordinator) = setup(r#"{"assets":{"img1":{"a":{"url":"model.sfb"}}}}"#).await;
        let mut rx = coordinator.subscribe();

        for _ in 0..5 {
            assert_eq!(coordinator.on_recognized(entity("img1")), Ok(Outcome::Waiting));
        }
        assert_quiet(&mut rx).await;
        assert_eq!(coordinator.phase("img1"), Some(Phase::Waiting));
        assert_eq!(manual.calls().len(), 1);

        manual.complete("model.sfb", 2);

        match next_event(&mut rx).await {
            SceneEvent::Placed(p) => {
                assert_eq!(p.entity_id, "img1");
                assert_eq!(p.asset_key, "a");
                assert_eq!(p.local_position, Vec3::ZERO);
                assert_eq!(p.local_scale, Vec3::ONE);
                assert_eq!(p.local_rotation, Quat::IDENTITY);
                assert_eq!(p.anchor_pose.translation, Vec3::new(0.0, 0.0, -0.5));
                assert_eq!(p.world_pose.translation, Vec3::new(0.0, 0.0, -0.5));
            }
            other => panic!("expected Placed, got {:?}", other),
        }
        match next_event(&mut rx).await {
            SceneEvent::AnimationStarted(req) => assert_eq!(req.clip_index, 0),
            other => panic!("expected AnimationStarted, got {:?}", other),
        }
        assert_quiet(&mut rx).await;
        assert_eq!(coordinator.phase("img1"), Some(Phase::Done));
    }

    #[tokio::test]
    async fn test_rechecks_all_assets_after_each_load() {
        let (manual, coordinator) = setup(
            r#"{"assets":{"img1":{
                "cell":{"url":"cell.gltf","position":[0.1,0,0]},
                "brain":{"url":"brain.gltf","scale":0.5}
            }}}"#,
        )
        .await;
        let mut rx = coordinator.subscribe();

        assert_eq!(coordinator.on_recognized(entity("img1")), Ok(Outcome::Waiting));

        manual.complete("brain.gltf", 0);
        assert_quiet(&mut rx).await;
        assert_eq!(coordinator.phase("img1"), Some(Phase::Waiting));

        manual.complete("cell.gltf", 0);
        let mut placed = Vec::new();
        for _ in 0..2 {
            match next_event(&mut rx).await {
                SceneEvent::Placed(p) => placed.push(p),
                other => panic!("expected Placed, got {:?}", other),
            }
        }
        assert_quiet(&mut rx).await;

        assert_eq!(placed[0].asset_key, "brain");
        assert_eq!(placed[0].local_scale, Vec3::splat(0.5));
        assert_eq!(placed[1].asset_key, "cell");
        assert_eq!(placed[1].local_position, Vec3::new(0.1, 0.0, 0.0));
        assert!(placed[1]
            .world_pose
            .translation
            .abs_diff_eq(Vec3::new(0.1, 0.0, -0.5), 1e-6));
        assert_eq!(placed[0].anchor, placed[1].anchor);
    }

    #[tokio::test]
    async fn test_failed_asset_places_nothing() {
        let (manual, coordinator) = setup(
            r#"{"assets":{"img1":{"ok":{"url":"ok.gltf"},"bad":{"url":"bad.gltf"}}}}"#,
        )
        .await;
        let mut rx = coordinator.subscribe();

        coordinator.on_recognized(entity("img1")).unwrap();
        manual.complete("ok.gltf", 0);
        manual.fail("bad.gltf", "HTTP 404");

        match next_event(&mut rx).await {
            SceneEvent::PlacementFailed { entity_id, reasons } => {
                assert_eq!(entity_id, "img1");
                assert_eq!(reasons.len(), 1);
                assert!(reasons[0].starts_with("bad:"));
            }
            other => panic!("expected PlacementFailed, got {:?}", other),
        }
        assert_eq!(coordinator.phase("img1"), Some(Phase::Failed));

        // Re-recognition reports the failure without retrying or re-emitting
        let err = coordinator.on_recognized(entity("img1")).unwrap_err();
        assert!(matches!(err, ReadinessError::PartialFailure { .. }));
        assert_quiet(&mut rx).await;
        assert_eq!(manual.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_skipped() {
        let (_manual, coordinator) = setup(r#"{"assets":{"img1":{"a":{"url":"a.gltf"}}}}"#).await;
        let mut rx = coordinator.subscribe();
        assert_eq!(coordinator.on_recognized(entity("poster")), Ok(Outcome::Skipped));
        assert_eq!(coordinator.phase("poster"), None);
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn test_rerecognition_after_done_uses_cached_loads() {
        let (manual, coordinator) = setup(r#"{"assets":{"img1":{"a":{"url":"a.gltf"}}}}"#).await;
        let mut rx = coordinator.subscribe();

        coordinator.on_recognized(entity("img1")).unwrap();
        manual.complete("a.gltf", 0);
        let first = match next_event(&mut rx).await {
            SceneEvent::Placed(p) => p,
            other => panic!("expected Placed, got {:?}", other),
        };

        match coordinator.on_recognized(entity("img1")).unwrap() {
            Outcome::Placed { anchor, assets, .. } => {
                assert_ne!(anchor, first.anchor);
                assert_eq!(assets, 1);
            }
            other => panic!("expected Placed, got {:?}", other),
        }
        assert_eq!(manual.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_animation_starts_once_across_entities() {
        let (manual, coordinator) = setup(
            r#"{"assets":{
                "img1":{"bird":{"url":"macaw.sfb"}},
                "img2":{"man":{"url":"cesium-man.sfb"}}
            }}"#,
        )
        .await;

        manual.complete("macaw.sfb", 3);
        manual.complete("cesium-man.sfb", 1);
        for key in ["img1", "img2"] {
            for (_, slot) in coordinator.registry().slots(key).unwrap() {
                slot.handle.settled().await;
            }
        }

        let first = coordinator.on_recognized(entity("img1")).unwrap();
        assert!(matches!(first, Outcome::Placed { animation: Some(0), .. }));

        let second = coordinator.on_recognized(entity("img2")).unwrap();
        assert!(matches!(second, Outcome::Placed { animation: None, .. }));

        let state = coordinator.gate().snapshot();
        assert!(state.started);
        assert_eq!(state.next_index, 1);
    }

    #[tokio::test]
    async fn test_waits_for_manifest() {
        let manual = ManualLoader::new();
        let registry = Arc::new(AssetRegistry::new(as_loader(&manual)));
        let coordinator = ReadinessCoordinator::new(registry.clone(), AnimationGate::default());
        let mut rx = coordinator.subscribe();

        assert_eq!(coordinator.on_recognized(entity("img1")), Ok(Outcome::Waiting));

        registry
            .ensure_loaded(Manifest::parse(r#"{"assets":{"img1":{"a":{"url":"a.glb"}}}}"#).unwrap())
            .await;
        // Continuation re-checks, finds the load pending, and keeps waiting
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(coordinator.phase("img1"), Some(Phase::Waiting));

        manual.complete("a.glb", 0);
        assert!(matches!(next_event(&mut rx).await, SceneEvent::Placed(_)));
    }
    #[tokio::test]
    async fn test_placement_carries_extent_and_world_pose() {
        let (manual, coordinator) = setup(
            r#"{"assets":{"img1":{"a":{"url":"a.gltf","position":[1,0,0]}}}}"#,
        )
        .await;
        manual.complete("a.gltf", 0);
        for handle in coordinator.registry().handles() {
            handle.settled().await;
        }
        let mut rx = coordinator.subscribe();

        let mut recognized = entity("img1");
        recognized.extent = [0.25, 0.4];
        recognized.pose.rotation = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        coordinator.on_recognized(recognized).unwrap();

        match next_event(&mut rx).await {
            SceneEvent::Placed(p) => {
                assert_eq!(p.anchor_extent, [0.25, 0.4]);
                assert!(p
                    .world_pose
                    .translation
                    .abs_diff_eq(Vec3::new(0.0, 0.0, -1.5), 1e-5));
            }
            other => panic!("expected Placed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_large_entity_delivers_every_placement() {
        let assets: Vec<String> = (0..300)
            .map(|i| format!(r#""a{:03}":{{"url":"m{:03}.gltf"}}"#, i, i))
            .collect();
        let json = format!(r#"{{"assets":{{"img1":{{{}}}}}}}"#, assets.join(","));
        let (manual, coordinator) = setup(&json).await;
        for i in 0..300 {
            manual.complete(&format!("m{:03}.gltf", i), 0);
        }
        for handle in coordinator.registry().handles() {
            handle.settled().await;
        }

        let mut rx = coordinator.subscribe();
        match coordinator.on_recognized(entity("img1")).unwrap() {
            Outcome::Placed { assets, .. } => assert_eq!(assets, 300),
            other => panic!("expected Placed, got {:?}", other),
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), 300);
        assert!(events.iter().all(|e| matches!(e, SceneEvent::Placed(_))));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_block_others() {
        let (manual, coordinator) = setup(r#"{"assets":{"img1":{"a":{"url":"a.gltf"}}}}"#).await;
        let dropped = coordinator.subscribe();
        let mut rx = coordinator.subscribe();
        drop(dropped);

        manual.complete("a.gltf", 0);
        for handle in coordinator.registry().handles() {
            handle.settled().await;
        }
        coordinator.on_recognized(entity("img1")).unwrap();
        assert!(matches!(next_event(&mut rx).await, SceneEvent::Placed(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_recognitions_place_one_batch_per_episode() {
        let (manual, coordinator) = setup(
            r#"{"assets":{"img1":{
                "bird":{"url":"macaw.sfb"},
                "perch":{"url":"perch.gltf"}
            }}}"#,
        )
        .await;
        let mut rx = coordinator.subscribe();

        let recognizers: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    let mut placed_anchors = Vec::new();
                    for _ in 0..200 {
                        if let Ok(Outcome::Placed { anchor, .. }) = coordinator.on_recognized(entity("img1")) {
                            placed_anchors.push(anchor);
                        }
                        tokio::task::yield_now().await;
                    }
                    placed_anchors
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(2)).await;
        let completer = {
            let manual = manual.clone();
            tokio::spawn(async move {
                manual.complete("perch.gltf", 0);
                tokio::task::yield_now().await;
                manual.complete("macaw.sfb", 2);
            })
        };
        completer.await.unwrap();

        let mut returned = HashSet::new();
        for recognizer in recognizers {
            returned.extend(recognizer.await.unwrap());
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while coordinator.phase("img1") != Some(Phase::Done) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("entity never placed");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let events = drain(&mut rx);
        let mut batches: HashMap<AnchorId, usize> = HashMap::new();
        let mut animations = 0;
        for event in &events {
            match event {
                SceneEvent::Placed(p) => *batches.entry(p.anchor).or_default() += 1,
                SceneEvent::AnimationStarted(_) => animations += 1,
                SceneEvent::PlacementFailed { .. } => panic!("unexpected failure"),
            }
        }

        // Every batch is complete and never interleaved with a duplicate
        assert!(!batches.is_empty());
        assert!(batches.values().all(|count| *count == 2));
        // Batches not returned to a caller come from the waiting episode: at most one
        let from_waiting = batches.keys().filter(|a| !returned.contains(*a)).count();
        assert!(from_waiting <= 1);
        assert_eq!(batches.len(), returned.len() + from_waiting);
        assert_eq!(animations, 1);
        assert_eq!(manual.calls().len(), 2);
    }
}
