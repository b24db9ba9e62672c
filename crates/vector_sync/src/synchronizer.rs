use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use foundation::ids::{FeatureId, LayerId};
use foundation::time::Time;
use layers::{
    FeatureRef, GeometryShape, Layer, LayerEvent, LayerProperty, SourceChange, SourceEvent, Style,
    VectorLayer, VectorSource,
};
use runtime::event_bus::Subscription;
use scene::{RepaintNotifier, Scene};
use tracing::{debug, trace};

use crate::config::SyncConfig;
use crate::context::VectorContext;
use crate::convert::{ConvertOptions, Converter, FeatureConverter};
use crate::error::SyncError;
use crate::update::run_due_updates;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    Synchronized,
    Disposed,
}

#[derive(Debug)]
enum QueuedEvent {
    Layer(LayerEvent),
    Source(SourceEvent),
}

/// Mirrors one vector layer and its source into a scene.
///
/// Events are pulled: [`Self::process_events`] drains the layer's and the
/// source's queues and turns every event into registry operations. Retries
/// and camera-driven offsets are driven by [`Self::tick`] and
/// [`Self::update_camera`].
pub struct VectorSynchronizer<C: Converter = FeatureConverter> {
    layer: Rc<RefCell<VectorLayer>>,
    source: Rc<RefCell<VectorSource>>,
    scene: Rc<Scene>,
    repaint: Rc<dyn RepaintNotifier>,
    converter: C,
    config: SyncConfig,
    context: Option<VectorContext>,
    state: SyncState,
    layer_sub: Option<Subscription>,
    source_sub: Option<Subscription>,
}

impl<C: Converter> VectorSynchronizer<C> {
    pub fn new(
        layer: Rc<RefCell<VectorLayer>>,
        source: Rc<RefCell<VectorSource>>,
        scene: Rc<Scene>,
        repaint: Rc<dyn RepaintNotifier>,
        converter: C,
        config: SyncConfig,
    ) -> Self {
        Self {
            layer,
            source,
            scene,
            repaint,
            converter,
            config,
            context: None,
            state: SyncState::Uninitialized,
            layer_sub: None,
            source_sub: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn layer_id(&self) -> LayerId {
        self.layer.borrow().id()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn context(&self) -> Option<&VectorContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut VectorContext> {
        self.context.as_mut()
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    pub fn converter_mut(&mut self) -> &mut C {
        &mut self.converter
    }

    /// Builds a fresh registry, converts every feature of the source and
    /// starts listening to the layer and the source.
    pub fn synchronize(&mut self) -> Result<(), SyncError> {
        self.ensure_not_disposed()?;
        self.unsubscribe();
        if let Some(mut previous) = self.context.take() {
            previous.dispose();
        }

        let layer_id = self.layer_id();
        let mut context =
            self.converter
                .create_context(layer_id, Rc::clone(&self.scene), &self.config);
        context.set_visibility(self.layer.borrow().is_visible());
        context.attach()?;
        self.context = Some(context);

        self.layer_sub = Some(self.layer.borrow_mut().subscribe());
        self.source_sub = Some(self.source.borrow_mut().subscribe());
        self.state = SyncState::Synchronized;

        let features = self.source.borrow().features();
        debug!("synchronizing {layer_id}: {} features", features.len());
        for feature in &features {
            self.add_feature(feature)?;
        }
        self.repaint.request_repaint();
        Ok(())
    }

    /// Rebuilds the drawables of every feature on the source, keeping the
    /// registry and the recorded shown-state.
    pub fn reset(&mut self) -> Result<(), SyncError> {
        self.ensure_not_disposed()?;
        if self.state != SyncState::Synchronized {
            return Ok(());
        }
        let features = self.source.borrow().features();
        debug!("resetting {}: {} features", self.layer_id(), features.len());
        for feature in &features {
            self.reset_feature(feature)?;
        }
        self.repaint.request_repaint();
        Ok(())
    }

    /// Stops listening and disposes the registry. Calling it again does nothing.
    pub fn dispose(&mut self) {
        if self.state == SyncState::Disposed {
            return;
        }
        self.unsubscribe();
        if let Some(context) = self.context.as_mut() {
            context.dispose();
        }
        self.state = SyncState::Disposed;
        debug!("disposed synchronizer for {}", self.layer_id());
        self.repaint.request_repaint();
    }

    /// Handles every queued layer and source event in the order they were
    /// emitted, then creates drawables whose icons finished loading.
    ///
    /// Returns the number of events handled.
    pub fn process_events(&mut self) -> Result<usize, SyncError> {
        self.ensure_not_disposed()?;
        if self.state != SyncState::Synchronized {
            return Ok(0);
        }

        let events = self.drain_in_order();
        let handled = events.len();
        for event in events {
            match event {
                QueuedEvent::Layer(event) => self.handle_layer_event(event)?,
                QueuedEvent::Source(event) => self.handle_source_event(event)?,
            }
        }
        self.flush_loaded()?;
        Ok(handled)
    }

    /// Advances time and runs the retries that became due.
    pub fn tick(&mut self, now: Time) -> Result<usize, SyncError> {
        self.ensure_not_disposed()?;
        let Some(context) = self.context.as_mut() else {
            return Ok(0);
        };
        context.set_now(now);
        let attempts = run_due_updates(context);
        if attempts > 0 {
            self.repaint.request_repaint();
        }
        Ok(attempts)
    }

    /// Derives billboard and label eye offsets from the camera distance.
    ///
    /// Returns `true` if either offset changed.
    pub fn update_camera(&mut self, distance_m: f64) -> Result<bool, SyncError> {
        self.ensure_not_disposed()?;
        let Some(context) = self.context.as_mut() else {
            return Ok(false);
        };
        let offsets = &self.config.eye_offset;
        let billboards = context.set_eye_offset(offsets.billboard_offset(distance_m));
        let labels = context.set_label_eye_offset(offsets.label_offset(distance_m));
        let changed = billboards || labels;
        if changed {
            self.repaint.request_repaint();
        }
        Ok(changed)
    }

    /// Re-converts one feature if it is still on the source.
    ///
    /// Unless the source is animating, the recorded shown-state is written
    /// again afterwards. Returns `false` when the feature was already gone.
    pub fn update_feature(&mut self, feature: &FeatureRef) -> Result<bool, SyncError> {
        self.ensure_not_disposed()?;
        let (present, animating) = {
            let source = self.source.borrow();
            (source.has_feature(feature.id()), source.is_animating())
        };
        if !present || feature.is_disposed() {
            trace!("skipping update of {}: no longer on the source", feature.id());
            return Ok(false);
        }
        if let Some(context) = self.context.as_mut() {
            context.remove_dirty(feature.id());
        }
        self.convert_feature(feature)?;
        if !animating && let Some(context) = self.context.as_mut() {
            context.apply_feature_shown(feature.id());
        }
        Ok(true)
    }

    /// Both queues merged by emission stamp.
    fn drain_in_order(&mut self) -> Vec<QueuedEvent> {
        let mut stamped: Vec<(u64, QueuedEvent)> = Vec::new();
        if let Some(sub) = self.layer_sub {
            let events = self.layer.borrow_mut().drain_sequenced_events(sub);
            stamped.extend(events.into_iter().map(|s| (s.seq, QueuedEvent::Layer(s.event))));
        }
        if let Some(sub) = self.source_sub {
            let events = self.source.borrow_mut().drain_sequenced_events(sub);
            stamped.extend(events.into_iter().map(|s| (s.seq, QueuedEvent::Source(s.event))));
        }
        stamped.sort_by_key(|(seq, _)| *seq);
        stamped.into_iter().map(|(_, event)| event).collect()
    }

    fn handle_layer_event(&mut self, event: LayerEvent) -> Result<(), SyncError> {
        trace!("{}: layer event {event:?}", self.layer_id());
        match event {
            LayerEvent::Visibility(visible) => {
                if let Some(context) = self.context.as_mut() {
                    context.set_visibility(visible);
                }
                self.repaint.request_repaint();
            }
            LayerEvent::Opacity(_) => self.refresh_styles(None)?,
            LayerEvent::PropertyChange {
                property: LayerProperty::Style | LayerProperty::LabelVisibility,
                features,
            } => self.refresh_styles(features)?,
            LayerEvent::PropertyChange {
                property: LayerProperty::Title,
                ..
            } => {}
        }
        Ok(())
    }

    fn handle_source_event(&mut self, event: SourceEvent) -> Result<(), SyncError> {
        match event {
            SourceEvent::FeatureAdded(feature) => {
                trace!("{} added", feature.id());
                self.add_feature(&feature)?;
            }
            SourceEvent::FeatureRemoved(feature) => {
                trace!("{} removed", feature.id());
                self.remove_feature(feature.id());
            }
            SourceEvent::FeatureChanged(feature) => {
                trace!("{} changed", feature.id());
                self.update_feature(&feature)?;
                self.repaint.request_repaint();
            }
            SourceEvent::Change(change) => self.handle_change(change)?,
        }
        Ok(())
    }

    fn handle_change(&mut self, change: SourceChange) -> Result<(), SyncError> {
        match change {
            SourceChange::Cleared => {
                let tracked = self
                    .context
                    .as_ref()
                    .map(VectorContext::tracked_features)
                    .unwrap_or_default();
                for id in tracked {
                    self.remove_feature(id);
                }
                self.converter.forget_all();
                if let Some(context) = self.context.as_mut() {
                    context.prune_maps();
                }
            }
            SourceChange::FeatureVisibility(ids) => {
                for id in ids {
                    let shown = self.source.borrow().is_feature_shown(id);
                    self.apply_shown(id, shown);
                }
                self.repaint.request_repaint();
            }
            SourceChange::AnimationFrame(delta) => {
                for (id, shown) in delta {
                    self.apply_shown(id, shown);
                }
                // An empty frame still repaints.
                self.repaint.request_repaint();
            }
            SourceChange::AnimationEnabled(enabled) => {
                if !enabled {
                    let shown: Vec<(FeatureId, bool)> = {
                        let source = self.source.borrow();
                        source
                            .features()
                            .iter()
                            .map(|f| (f.id(), source.is_feature_shown(f.id())))
                            .collect()
                    };
                    for (id, shown) in shown {
                        self.apply_shown(id, shown);
                    }
                    self.repaint.request_repaint();
                }
            }
            SourceChange::Altitude(_) => self.reset()?,
            SourceChange::Features { added, removed } => {
                for feature in &removed {
                    self.remove_feature(feature.id());
                }
                for feature in &added {
                    self.add_feature(feature)?;
                }
                if !removed.is_empty()
                    && let Some(context) = self.context.as_mut()
                {
                    context.prune_maps();
                }
            }
            SourceChange::HighlightedItems(ids) => self.refresh_styles(Some(ids))?,
            SourceChange::GeometryShape { previous, current } => {
                if GeometryShape::crosses_rebuild_boundary(previous, current) {
                    self.reset()?;
                } else {
                    self.refresh_styles(None)?;
                }
            }
            SourceChange::GeometryCenterShape(_) => {
                if self.source.borrow().geometry_shape().draws_center() {
                    self.reset()?;
                }
            }
            SourceChange::SelectionAdded(ids) | SourceChange::SelectionRemoved(ids) => {
                self.selection_changed(ids)?;
            }
            SourceChange::SelectionChanged { added, removed } => {
                let ids: BTreeSet<FeatureId> = added.into_iter().chain(removed).collect();
                self.selection_changed(ids.into_iter().collect())?;
            }
        }
        Ok(())
    }

    fn selection_changed(&mut self, ids: Vec<FeatureId>) -> Result<(), SyncError> {
        if !self.source.borrow().geometry_shape().is_selected_variant() {
            return self.refresh_styles(Some(ids));
        }
        for feature in self.source_features(Some(ids)) {
            self.reset_feature(&feature)?;
        }
        self.repaint.request_repaint();
        Ok(())
    }

    fn add_feature(&mut self, feature: &FeatureRef) -> Result<(), SyncError> {
        let shown = self.source.borrow().is_feature_shown(feature.id());
        if let Some(context) = self.context.as_mut() {
            context.set_feature_shown(feature.id(), shown);
        }
        self.convert_feature(feature)?;
        if let Some(context) = self.context.as_mut() {
            context.apply_feature_shown(feature.id());
        }
        self.repaint.request_repaint();
        Ok(())
    }

    fn remove_feature(&mut self, id: FeatureId) {
        if let Some(context) = self.context.as_mut() {
            context.cleanup(id);
        }
        self.converter.forget(id);
        self.repaint.request_repaint();
    }

    fn reset_feature(&mut self, feature: &FeatureRef) -> Result<(), SyncError> {
        if let Some(context) = self.context.as_mut() {
            context.mark_dirty(feature.id());
        }
        self.update_feature(feature)?;
        Ok(())
    }

    fn refresh_styles(&mut self, ids: Option<Vec<FeatureId>>) -> Result<(), SyncError> {
        for feature in self.source_features(ids) {
            self.update_feature(&feature)?;
        }
        self.repaint.request_repaint();
        Ok(())
    }

    fn apply_shown(&mut self, id: FeatureId, shown: bool) {
        if let Some(context) = self.context.as_mut() {
            context.set_feature_shown(id, shown);
            context.apply_feature_shown(id);
        }
    }

    fn flush_loaded(&mut self) -> Result<(), SyncError> {
        let Some(context) = self.context.as_mut() else {
            return Ok(());
        };
        let features = self.converter.flush_loaded(context)?;
        if features.is_empty() {
            return Ok(());
        }
        for id in &features {
            context.apply_feature_shown(*id);
        }
        trace!("{} features gained deferred drawables", features.len());
        self.repaint.request_repaint();
        Ok(())
    }

    fn convert_feature(&mut self, feature: &FeatureRef) -> Result<(), SyncError> {
        let geometry = feature.geometry().clone();
        let style = self.resolve_style(feature);
        let options = self.convert_options(feature.id());
        let Some(context) = self.context.as_mut() else {
            return Ok(());
        };
        self.converter
            .convert(feature, &geometry, &style, &options, context)?;
        Ok(())
    }

    /// Features of the source in id order, restricted to `ids` when given.
    fn source_features(&self, ids: Option<Vec<FeatureId>>) -> Vec<FeatureRef> {
        let source = self.source.borrow();
        match ids {
            Some(ids) => ids.into_iter().filter_map(|id| source.feature(id)).collect(),
            None => source.features(),
        }
    }

    fn resolve_style(&self, feature: &FeatureRef) -> Style {
        let layer = self.layer.borrow();
        let base = feature
            .style()
            .unwrap_or_else(|| layer.default_style().clone());
        let mut options = layer.style_options();
        if self.source.borrow().is_highlighted(feature.id()) {
            options.highlight = Some(self.config.highlight());
        }
        base.resolve(&options)
    }

    fn convert_options(&self, id: FeatureId) -> ConvertOptions {
        let source = self.source.borrow();
        ConvertOptions {
            altitude_mode: source.altitude_mode(),
            shape: source.geometry_shape(),
            center_shape: source.center_shape(),
            selected: source.is_selected(id),
        }
    }

    fn unsubscribe(&mut self) {
        if let Some(sub) = self.layer_sub.take() {
            self.layer.borrow_mut().unsubscribe(sub);
        }
        if let Some(sub) = self.source_sub.take() {
            self.source.borrow_mut().unsubscribe(sub);
        }
    }

    fn ensure_not_disposed(&self) -> Result<(), SyncError> {
        if self.state == SyncState::Disposed {
            return Err(SyncError::Disposed {
                layer: self.layer_id(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{QueuedEvent, SyncState, VectorSynchronizer};
    use crate::config::SyncConfig;
    use crate::convert::FeatureConverter;
    use crate::error::SyncError;
    use crate::metadata::PrimitiveId;
    use foundation::color::Color;
    use foundation::ids::{FeatureId, GeometryId, LayerId};
    use layers::{
        AltitudeMode, CenterShape, Feature, FeatureRef, Geometry, GeometryShape, PropertyValue,
        Shape, Style, Text, VectorLayer, VectorSource, keys,
    };
    use scene::{CollectionKind, Drawable, PrimitiveKind, RepaintNotifier, Scene, SceneGroup};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Fixture {
        layer: Rc<RefCell<VectorLayer>>,
        source: Rc<RefCell<VectorSource>>,
        scene: Rc<Scene>,
        sync: VectorSynchronizer,
    }

    fn fixture() -> Fixture {
        let layer = Rc::new(RefCell::new(VectorLayer::new(7, "test")));
        let source = Rc::new(RefCell::new(VectorSource::new()));
        let scene = Rc::new(Scene::new());
        let repaint: Rc<dyn RepaintNotifier> = scene.clone();
        let sync = VectorSynchronizer::new(
            Rc::clone(&layer),
            Rc::clone(&source),
            Rc::clone(&scene),
            repaint,
            FeatureConverter::new(),
            SyncConfig::default(),
        );
        Fixture {
            layer,
            source,
            scene,
            sync,
        }
    }

    fn square(id: u64) -> FeatureRef {
        Feature::new(
            FeatureId(id),
            Geometry::new(
                GeometryId(id),
                Shape::Polygon(vec![vec![
                    [0.0, 0.0, 0.0],
                    [0.01, 0.0, 0.0],
                    [0.01, 0.01, 0.0],
                    [0.0, 0.01, 0.0],
                ]]),
            ),
        )
    }

    /// A point carrying ellipse and bearing properties, so every geometry
    /// shape has something to draw.
    fn marker(id: u64) -> FeatureRef {
        let f = Feature::new(
            FeatureId(id),
            Geometry::new(GeometryId(id), Shape::Point([0.0, 0.0, 0.0])),
        );
        f.set_property(keys::SEMI_MAJOR, PropertyValue::Number(500.0));
        f.set_property(keys::SEMI_MINOR, PropertyValue::Number(200.0));
        f.set_property(keys::BEARING, PropertyValue::Number(45.0));
        f
    }

    fn ids(fx: &Fixture, feature: u64) -> Vec<PrimitiveId> {
        fx.sync
            .context()
            .expect("context")
            .primitives_for_feature(FeatureId(feature))
    }

    fn kinds(fx: &Fixture, feature: u64) -> Vec<PrimitiveKind> {
        let ctx = fx.sync.context().expect("context");
        ids(fx, feature)
            .into_iter()
            .filter_map(|id| ctx.metadata(id).map(|m| m.kind))
            .collect()
    }

    fn shown(fx: &Fixture, feature: u64) -> Vec<bool> {
        let ctx = fx.sync.context().expect("context");
        ids(fx, feature)
            .into_iter()
            .filter_map(|id| ctx.with_drawable(id, Drawable::show))
            .collect()
    }

    fn fill_color(fx: &Fixture, id: PrimitiveId) -> Option<Color> {
        fx.sync
            .context()
            .expect("context")
            .with_drawable(id, |d| match d {
                Drawable::Primitive(p) => p.instances.first().and_then(|i| i.color()),
                _ => None,
            })
            .flatten()
    }

    #[test]
    fn synchronize_converts_existing_features_and_attaches() {
        let mut fx = fixture();
        fx.source.borrow_mut().add_features(vec![square(1), square(2)]);
        fx.sync.synchronize().expect("synchronize");

        assert_eq!(fx.sync.state(), SyncState::Synchronized);
        let ctx = fx.sync.context().expect("context");
        assert_eq!(ctx.tracked_features(), vec![FeatureId(1), FeatureId(2)]);
        assert_eq!(fx.scene.collection_count(SceneGroup::Primitives), 4);
        assert_eq!(fx.source.borrow().subscriber_count(), 1);
        assert_eq!(fx.layer.borrow().subscriber_count(), 1);
    }

    #[test]
    fn resynchronize_replaces_the_registry() {
        let mut fx = fixture();
        fx.source.borrow_mut().add_feature(square(1));
        fx.sync.synchronize().expect("first");
        fx.sync.synchronize().expect("second");

        assert_eq!(fx.scene.collection_count(SceneGroup::Primitives), 4);
        assert_eq!(fx.scene.collection_count(SceneGroup::Ground), 1);
        assert_eq!(fx.source.borrow().subscriber_count(), 1);
        assert_eq!(fx.sync.context().expect("context").primitive_count(), 1);
    }

    #[test]
    fn layer_visibility_toggles_the_registry() {
        let mut fx = fixture();
        fx.sync.synchronize().expect("synchronize");
        fx.layer.borrow_mut().set_visible(false);
        assert_eq!(fx.sync.process_events(), Ok(1));
        assert!(!fx.sync.context().expect("context").is_visible());
    }

    #[test]
    fn source_add_change_remove_flow() {
        let mut fx = fixture();
        fx.sync.synchronize().expect("synchronize");

        let f = square(1);
        fx.source.borrow_mut().add_feature(Rc::clone(&f));
        fx.sync.process_events().expect("add");
        let ids = fx.sync.context().expect("context").primitives_for_feature(FeatureId(1));
        assert_eq!(ids.len(), 1);

        f.set_style(Some(Style {
            fill: Some(Color::new(1.0, 0.0, 0.0, 1.0)),
            ..Style::default()
        }));
        fx.source.borrow_mut().notify_changed(FeatureId(1));
        fx.sync.process_events().expect("change");
        assert_eq!(
            fx.sync.context().expect("context").primitives_for_feature(FeatureId(1)),
            ids
        );

        fx.source.borrow_mut().remove_feature(FeatureId(1));
        fx.sync.process_events().expect("remove");
        let ctx = fx.sync.context().expect("context");
        assert!(ctx.primitives_for_feature(FeatureId(1)).is_empty());
        assert_eq!(ctx.primitive_count(), 0);
    }

    #[test]
    fn altitude_change_moves_polygons_to_ground() {
        let mut fx = fixture();
        fx.source.borrow_mut().add_feature(square(1));
        fx.sync.synchronize().expect("synchronize");

        fx.source
            .borrow_mut()
            .set_altitude_mode(AltitudeMode::ClampToGround);
        fx.sync.process_events().expect("altitude");
        let ctx = fx.sync.context().expect("context");
        assert_eq!(ctx.collection_len(CollectionKind::Primitives), 0);
        assert_eq!(ctx.collection_len(CollectionKind::GroundPrimitives), 1);
    }

    #[test]
    fn visibility_event_hides_feature() {
        let mut fx = fixture();
        fx.source.borrow_mut().add_features(vec![square(1), square(2)]);
        fx.sync.synchronize().expect("synchronize");

        fx.source
            .borrow_mut()
            .set_feature_visibility(&[FeatureId(2)], false);
        fx.sync.process_events().expect("visibility");

        let ctx = fx.sync.context().expect("context");
        let shown = |id| {
            ctx.primitives_for_feature(id)
                .into_iter()
                .filter_map(|p| ctx.with_drawable(p, Drawable::show))
                .collect::<Vec<_>>()
        };
        assert_eq!(shown(FeatureId(1)), vec![true]);
        assert_eq!(shown(FeatureId(2)), vec![false]);
    }

    #[test]
    fn dispose_is_idempotent_and_blocks_further_work() {
        let mut fx = fixture();
        fx.source.borrow_mut().add_feature(square(1));
        fx.sync.synchronize().expect("synchronize");

        fx.sync.dispose();
        fx.sync.dispose();
        assert_eq!(fx.sync.state(), SyncState::Disposed);
        assert_eq!(fx.source.borrow().subscriber_count(), 0);
        assert_eq!(fx.layer.borrow().subscriber_count(), 0);
        assert_eq!(fx.scene.collection_count(SceneGroup::Primitives), 0);
        assert_eq!(
            fx.sync.process_events(),
            Err(SyncError::Disposed { layer: LayerId(7) })
        );
        assert!(fx.sync.synchronize().is_err());
    }

    #[test]
    fn camera_updates_only_repaint_on_change() {
        let mut fx = fixture();
        fx.sync.synchronize().expect("synchronize");
        assert_eq!(fx.sync.update_camera(1_000_000.0), Ok(true));
        let requests = fx.scene.render_requests();
        assert_eq!(fx.sync.update_camera(1_001_000.0), Ok(false));
        assert_eq!(fx.scene.render_requests(), requests);
    }

    #[test]
    fn selection_under_a_selected_shape_rebuilds() {
        let mut fx = fixture();
        fx.source.borrow_mut().add_feature(marker(1));
        fx.source
            .borrow_mut()
            .set_geometry_shape(GeometryShape::SelectedEllipse);
        fx.sync.synchronize().expect("synchronize");
        assert_eq!(kinds(&fx, 1), vec![PrimitiveKind::Billboard]);
        let before = ids(&fx, 1);

        fx.source.borrow_mut().select(&[FeatureId(1)]);
        fx.sync.process_events().expect("select");
        assert_eq!(kinds(&fx, 1), vec![PrimitiveKind::Primitive]);
        assert_ne!(ids(&fx, 1), before);

        fx.source.borrow_mut().deselect(&[FeatureId(1)]);
        fx.sync.process_events().expect("deselect");
        assert_eq!(kinds(&fx, 1), vec![PrimitiveKind::Billboard]);
    }

    #[test]
    fn selection_under_a_plain_shape_only_restyles() {
        let mut fx = fixture();
        fx.source.borrow_mut().add_feature(square(1));
        fx.sync.synchronize().expect("synchronize");
        let before = ids(&fx, 1);

        fx.source.borrow_mut().set_selection(&[FeatureId(1)]);
        fx.sync.process_events().expect("select");
        assert_eq!(ids(&fx, 1), before);
        let ctx = fx.sync.context().expect("context");
        assert!(!ctx.metadata(before[0]).expect("meta").dirty);
    }

    #[test]
    fn highlight_recolors_in_place() {
        let mut fx = fixture();
        let f = square(1);
        f.set_style(Some(Style {
            fill: Some(Color::WHITE),
            stroke: None,
            ..Style::default()
        }));
        fx.source.borrow_mut().add_features(vec![f, square(2)]);
        fx.sync.synchronize().expect("synchronize");
        let id = ids(&fx, 1)[0];
        let other = ids(&fx, 2);
        assert_eq!(fill_color(&fx, id), Some(Color::WHITE));

        fx.source.borrow_mut().set_highlighted(&[FeatureId(1)]);
        fx.sync.process_events().expect("highlight");
        let highlight = fx.sync.config().highlight().with_alpha(1.0);
        assert_eq!(ids(&fx, 1), vec![id]);
        assert_eq!(fill_color(&fx, id), Some(highlight));
        assert_eq!(ids(&fx, 2), other);

        fx.source.borrow_mut().set_highlighted(&[]);
        fx.sync.process_events().expect("clear highlight");
        assert_eq!(fill_color(&fx, id), Some(Color::WHITE));
    }

    #[test]
    fn geometry_shape_rebuilds_only_across_the_boundary() {
        let mut fx = fixture();
        fx.source.borrow_mut().add_feature(marker(1));
        fx.sync.synchronize().expect("synchronize");
        let billboard = ids(&fx, 1);
        assert_eq!(kinds(&fx, 1), vec![PrimitiveKind::Billboard]);

        fx.source.borrow_mut().set_geometry_shape(GeometryShape::Point);
        fx.sync.process_events().expect("point");
        assert_eq!(ids(&fx, 1), billboard);

        fx.source
            .borrow_mut()
            .set_geometry_shape(GeometryShape::LineOfBearing);
        fx.sync.process_events().expect("line of bearing");
        assert_eq!(kinds(&fx, 1), vec![PrimitiveKind::Polyline]);

        fx.source.borrow_mut().set_geometry_shape(GeometryShape::Ellipse);
        fx.sync.process_events().expect("ellipse");
        assert_eq!(kinds(&fx, 1), vec![PrimitiveKind::Primitive]);
    }

    #[test]
    fn center_shape_rebuilds_only_when_centers_are_drawn() {
        let mut fx = fixture();
        fx.source.borrow_mut().add_feature(marker(1));
        fx.sync.synchronize().expect("synchronize");
        let plain = ids(&fx, 1);
        fx.source.borrow_mut().set_center_shape(CenterShape::Square);
        fx.sync.process_events().expect("square, no centers");
        assert_eq!(ids(&fx, 1), plain);

        fx.source
            .borrow_mut()
            .set_geometry_shape(GeometryShape::EllipseCenter);
        fx.sync.process_events().expect("ellipse center");
        assert_eq!(kinds(&fx, 1), vec![PrimitiveKind::PrimitiveCollection]);
        let centered = ids(&fx, 1);

        fx.source.borrow_mut().set_center_shape(CenterShape::Circle);
        fx.sync.process_events().expect("circle");
        assert_eq!(kinds(&fx, 1), vec![PrimitiveKind::PrimitiveCollection]);
        assert_ne!(ids(&fx, 1), centered);
    }

    #[test]
    fn hiding_labels_drops_them_and_showing_restores_them() {
        let mut fx = fixture();
        let f = marker(1);
        f.set_style(Some(Style::default().with_text(Text::new("alpha"))));
        fx.source.borrow_mut().add_feature(f);
        fx.sync.synchronize().expect("synchronize");
        assert_eq!(
            kinds(&fx, 1),
            vec![PrimitiveKind::Billboard, PrimitiveKind::Label]
        );

        fx.layer.borrow_mut().set_labels_visible(false);
        fx.sync.process_events().expect("hide labels");
        assert_eq!(kinds(&fx, 1), vec![PrimitiveKind::Billboard]);
        assert!(
            fx.sync
                .context()
                .expect("context")
                .get_label_for_geometry(GeometryId(1))
                .is_none()
        );

        fx.layer.borrow_mut().set_labels_visible(true);
        fx.sync.process_events().expect("show labels");
        assert_eq!(
            kinds(&fx, 1),
            vec![PrimitiveKind::Billboard, PrimitiveKind::Label]
        );
    }

    #[test]
    fn stopping_animation_restores_source_visibility() {
        let mut fx = fixture();
        fx.source.borrow_mut().add_features(vec![square(1), square(2)]);
        fx.source
            .borrow_mut()
            .set_feature_visibility(&[FeatureId(2)], false);
        fx.source.borrow_mut().set_animating(true);
        fx.sync.synchronize().expect("synchronize");

        let ctx = fx.sync.context_mut().expect("context");
        ctx.set_feature_shown(FeatureId(1), false);
        ctx.apply_feature_shown(FeatureId(1));
        ctx.set_feature_shown(FeatureId(2), true);
        ctx.apply_feature_shown(FeatureId(2));
        assert_eq!(shown(&fx, 1), vec![false]);
        assert_eq!(shown(&fx, 2), vec![true]);

        fx.source.borrow_mut().set_animating(false);
        fx.sync.process_events().expect("stop animation");
        assert_eq!(shown(&fx, 1), vec![true]);
        assert_eq!(shown(&fx, 2), vec![false]);
    }

    #[test]
    fn layer_and_source_events_keep_emission_order() {
        let mut fx = fixture();
        fx.sync.synchronize().expect("synchronize");
        fx.layer.borrow_mut().set_visible(false);
        fx.source.borrow_mut().add_feature(square(1));
        fx.layer.borrow_mut().set_opacity(0.5);
        fx.source.borrow_mut().remove_feature(FeatureId(1));

        let order: Vec<&str> = fx
            .sync
            .drain_in_order()
            .iter()
            .map(|e| match e {
                QueuedEvent::Layer(_) => "layer",
                QueuedEvent::Source(_) => "source",
            })
            .collect();
        assert_eq!(order, vec!["layer", "source", "layer", "source"]);
    }
}
