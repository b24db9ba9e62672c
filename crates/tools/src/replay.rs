use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use foundation::ids::FeatureId;
use foundation::time::Time;
use layers::{VectorLayer, VectorSource};
use scene::{RepaintNotifier, Scene};
use serde::Serialize;
use tracing::{debug, info};
use vector_sync::{FeatureConverter, SyncConfig, SyncError, VectorSynchronizer};

use crate::scenario::{Scenario, Step};

/// What the registry holds once a replay finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub layer: u64,
    pub primitives: usize,
    pub features: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub render_requests: u64,
}

struct Replay {
    layer: Rc<RefCell<VectorLayer>>,
    source: Rc<RefCell<VectorSource>>,
    scene: Rc<Scene>,
    sync: VectorSynchronizer,
    now: Time,
    frame_ms: u64,
}

/// Runs `scenario` step by step, then `frames` extra frames of
/// `config.retry.delay_ms` each.
pub fn run(scenario: &Scenario, config: SyncConfig, frames: u32) -> Result<Summary, SyncError> {
    let mut replay = Replay::new(scenario, config);
    replay.sync.synchronize()?;
    info!(
        "replaying {} steps over {} features",
        scenario.steps.len(),
        scenario.features.len()
    );
    for (index, step) in scenario.steps.iter().enumerate() {
        debug!("step {index}: {step:?}");
        replay.apply(step)?;
        replay.sync.process_events()?;
    }
    let frame_ms = replay.frame_ms;
    replay.advance(frames, frame_ms)?;
    Ok(replay.summary())
}

impl Replay {
    fn new(scenario: &Scenario, config: SyncConfig) -> Self {
        let spec = &scenario.layer;
        let mut layer = VectorLayer::new(spec.id, spec.title.clone());
        layer.set_visible(spec.visible);
        layer.set_opacity(spec.opacity);
        layer.set_labels_visible(spec.labels_visible);
        let layer = Rc::new(RefCell::new(layer));

        let mut source = VectorSource::new();
        source.add_features(scenario.features.iter().map(|f| f.to_feature()).collect());
        let source = Rc::new(RefCell::new(source));

        let scene = Rc::new(Scene::with_upload_latency(scenario.upload_latency_frames));
        let repaint: Rc<dyn RepaintNotifier> = scene.clone();
        let frame_ms = config.retry.delay_ms;
        let sync = VectorSynchronizer::new(
            Rc::clone(&layer),
            Rc::clone(&source),
            Rc::clone(&scene),
            repaint,
            FeatureConverter::new(),
            config,
        );
        Self {
            layer,
            source,
            scene,
            sync,
            now: Time::ZERO,
            frame_ms,
        }
    }

    fn apply(&mut self, step: &Step) -> Result<(), SyncError> {
        let ids = |ids: &[u64]| ids.iter().copied().map(FeatureId).collect::<Vec<_>>();
        match step {
            Step::Add { features } => {
                let features = features.iter().map(|f| f.to_feature()).collect();
                self.source.borrow_mut().add_features(features);
            }
            Step::Remove { ids: removed } => {
                self.source.borrow_mut().remove_features(&ids(removed));
            }
            Step::Update { feature } => {
                let updated = feature.to_feature();
                let mut source = self.source.borrow_mut();
                if let Some(existing) = source.feature(updated.id()) {
                    existing.set_style(updated.style());
                    let shape = updated.geometry().shape().clone();
                    source.set_feature_shape(updated.id(), shape);
                }
            }
            Step::Clear => self.source.borrow_mut().clear(),
            Step::Visibility { ids: changed, shown } => {
                self.source
                    .borrow_mut()
                    .set_feature_visibility(&ids(changed), *shown);
            }
            Step::Animate { enabled } => self.source.borrow_mut().set_animating(*enabled),
            Step::Frame { shown } => {
                let delta = shown
                    .iter()
                    .filter_map(|(id, shown)| id.parse().ok().map(|id| (FeatureId(id), *shown)))
                    .collect();
                self.source.borrow_mut().apply_animation_frame(delta);
            }
            Step::Altitude { mode } => self.source.borrow_mut().set_altitude_mode((*mode).into()),
            Step::Shape { shape } => self.source.borrow_mut().set_geometry_shape((*shape).into()),
            Step::CenterShape { shape } => {
                self.source.borrow_mut().set_center_shape((*shape).into());
            }
            Step::Highlight { ids: highlighted } => {
                self.source.borrow_mut().set_highlighted(&ids(highlighted));
            }
            Step::Select { ids: selected } => {
                self.source.borrow_mut().set_selection(&ids(selected));
            }
            Step::LayerVisible { visible } => self.layer.borrow_mut().set_visible(*visible),
            Step::Opacity { value } => self.layer.borrow_mut().set_opacity(*value),
            Step::Labels { visible } => self.layer.borrow_mut().set_labels_visible(*visible),
            Step::Camera { distance_m } => {
                self.sync.update_camera(*distance_m)?;
            }
            Step::IconLoaded { src } => {
                self.sync.converter_mut().icons_mut().complete(src);
            }
            Step::IconFailed { src } => {
                self.sync.converter_mut().icons_mut().fail(src);
            }
            Step::Advance { frames, ms } => self.advance(*frames, *ms)?,
        }
        Ok(())
    }

    fn advance(&mut self, frames: u32, ms: u64) -> Result<(), SyncError> {
        for _ in 0..frames {
            self.scene.render_frame();
            self.now = self.now.after_millis(ms);
            self.sync.tick(self.now)?;
        }
        Ok(())
    }

    fn summary(&self) -> Summary {
        let layer = self.sync.layer_id().0;
        let render_requests = self.scene.render_requests();
        let Some(ctx) = self.sync.context() else {
            return Summary {
                layer,
                primitives: 0,
                features: 0,
                by_kind: BTreeMap::new(),
                render_requests,
            };
        };
        let mut by_kind = BTreeMap::new();
        for feature in ctx.tracked_features() {
            for id in ctx.primitives_for_feature(feature) {
                if let Some(meta) = ctx.metadata(id) {
                    *by_kind.entry(meta.kind.as_str().to_string()).or_insert(0) += 1;
                }
            }
        }
        Summary {
            layer,
            primitives: ctx.primitive_count(),
            features: ctx.tracked_features().len(),
            by_kind,
            render_requests,
        }
    }
}
