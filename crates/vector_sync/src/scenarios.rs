//! End-to-end runs of a synchronizer over a real layer, source and scene.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use foundation::ids::{FeatureId, GeometryId};
use foundation::math::Vec3;
use foundation::time::Time;
use layers::{
    AltitudeMode, Feature, FeatureRef, Geometry, Shape, Style, VectorLayer, VectorSource,
};
use pretty_assertions::assert_eq;
use scene::{Billboard, Drawable, RepaintNotifier, Scene};

use crate::{
    Converter, FeatureConverter, PrimitiveId, SyncConfig, VectorContext, VectorSynchronizer,
};

const REMOTE_ICON: &str = "https://icons.example/marker.png";

struct Harness {
    layer: Rc<RefCell<VectorLayer>>,
    source: Rc<RefCell<VectorSource>>,
    scene: Rc<Scene>,
    sync: VectorSynchronizer,
}

impl Harness {
    fn new(scene: Scene) -> Self {
        Self::with_scene(Rc::new(scene), 1)
    }

    fn with_scene(scene: Rc<Scene>, layer_id: u64) -> Self {
        let layer = Rc::new(RefCell::new(VectorLayer::new(layer_id, "scenario")));
        let source = Rc::new(RefCell::new(VectorSource::new()));
        let repaint: Rc<dyn RepaintNotifier> = scene.clone();
        let mut sync = VectorSynchronizer::new(
            Rc::clone(&layer),
            Rc::clone(&source),
            Rc::clone(&scene),
            repaint,
            FeatureConverter::new(),
            SyncConfig::default(),
        );
        sync.synchronize().expect("synchronize");
        Self {
            layer,
            source,
            scene,
            sync,
        }
    }

    fn ctx(&self) -> &VectorContext {
        self.sync.context().expect("context")
    }

    fn process(&mut self) {
        self.sync.process_events().expect("process events");
    }

    fn shown(&self, feature: u64) -> Vec<bool> {
        let ctx = self.ctx();
        ctx.primitives_for_feature(FeatureId(feature))
            .into_iter()
            .filter_map(|id| ctx.with_drawable(id, Drawable::show))
            .collect()
    }
}

fn point(id: u64) -> FeatureRef {
    Feature::new(
        FeatureId(id),
        Geometry::new(GeometryId(id), Shape::Point([id as f64, 0.0, 0.0])),
    )
}

fn remote_point(id: u64) -> FeatureRef {
    let feature = point(id);
    feature.set_style(Some(Style::default().with_icon(REMOTE_ICON)));
    feature
}

fn area(id: u64) -> FeatureRef {
    let x = id as f64 * 0.1;
    Feature::new(
        FeatureId(id),
        Geometry::new(
            GeometryId(id),
            Shape::Polygon(vec![vec![
                [x, 0.0, 0.0],
                [x + 0.05, 0.0, 0.0],
                [x + 0.05, 0.05, 0.0],
                [x, 0.05, 0.0],
            ]]),
        ),
    )
}

/// Every id indexed for a feature resolves to a drawable that is still in its
/// collection.
fn assert_index_consistent(ctx: &VectorContext) {
    for feature in ctx.tracked_features() {
        for id in ctx.primitives_for_feature(feature) {
            assert!(ctx.collection_contains(id), "{id} of {feature} is dangling");
            assert_eq!(ctx.metadata(id).map(|m| m.feature), Some(feature));
        }
    }
}

#[test]
fn indices_stay_consistent_through_add_update_remove() {
    let mut h = Harness::new(Scene::new());
    h.source
        .borrow_mut()
        .add_features((1..=6).map(area).collect());
    h.process();
    assert_index_consistent(h.ctx());

    h.source
        .borrow_mut()
        .set_feature_shape(FeatureId(2), Shape::LineString(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]));
    h.source.borrow_mut().remove_features(&[FeatureId(3), FeatureId(5)]);
    h.process();
    assert_index_consistent(h.ctx());
    assert_eq!(
        h.ctx().tracked_features(),
        vec![FeatureId(1), FeatureId(2), FeatureId(4), FeatureId(6)]
    );
}

#[test]
fn removing_a_primitive_twice_is_harmless() {
    let mut h = Harness::new(Scene::new());
    h.source.borrow_mut().add_feature(point(1));
    h.process();

    let id = h.ctx().primitives_for_feature(FeatureId(1))[0];
    let ctx = h.sync.context_mut().expect("context");
    assert!(ctx.remove_primitive(id));
    assert!(!ctx.remove_primitive(id));
    assert!(ctx.primitives_for_feature(FeatureId(1)).is_empty());
    assert_eq!(ctx.primitive_count(), 0);
}

#[test]
fn a_geometry_maps_to_one_primitive_after_repeated_resets() {
    let mut h = Harness::new(Scene::new());
    h.source.borrow_mut().add_feature(area(1));
    h.process();

    for _ in 0..3 {
        h.sync.reset().expect("reset");
    }
    let ctx = h.ctx();
    let id = ctx.get_primitive_for_geometry(GeometryId(1)).expect("primitive");
    assert_eq!(ctx.primitives_for_feature(FeatureId(1)), vec![id]);
    assert_eq!(ctx.primitive_count(), 1);
}

#[test]
fn hidden_feature_stays_hidden_when_its_billboard_arrives_late() {
    let mut h = Harness::new(Scene::new());
    h.source.borrow_mut().add_feature(remote_point(1));
    h.process();
    assert!(h.shown(1).is_empty());

    h.source
        .borrow_mut()
        .set_feature_visibility(&[FeatureId(1)], false);
    h.process();
    assert!(!h.ctx().is_feature_shown(FeatureId(1)));

    h.sync.converter_mut().icons_mut().complete(REMOTE_ICON);
    h.process();
    assert_eq!(h.shown(1), vec![false]);
}

#[test]
fn unchanged_eye_offset_keeps_the_shared_value() {
    let mut h = Harness::new(Scene::new());
    h.source.borrow_mut().add_features(vec![point(1), point(2)]);
    h.process();
    assert!(h.sync.update_camera(500_000.0).expect("camera"));

    let before = Rc::clone(h.ctx().eye_offset());
    assert!(!h.sync.update_camera(500_001.0).expect("camera"));
    let ctx = h.sync.context_mut().expect("context");
    assert!(!ctx.set_eye_offset(*before));
    assert!(Rc::ptr_eq(ctx.eye_offset(), &before));

    let id = ctx.primitives_for_feature(FeatureId(1))[0];
    let shared = ctx
        .with_drawable(id, |d| d.eye_offset().map(|o| Rc::ptr_eq(o, &before)))
        .flatten();
    assert_eq!(shared, Some(true));
}

#[test]
fn style_updates_on_a_never_ready_primitive_stop_after_twenty_attempts() {
    let mut h = Harness::new(Scene::with_upload_latency(u32::MAX));
    h.source.borrow_mut().add_feature(area(1));
    h.process();
    let id = h.ctx().primitives_for_feature(FeatureId(1))[0];

    h.layer.borrow_mut().set_opacity(0.5);
    h.process();
    assert_eq!(h.ctx().pending_retries(), 1);

    let mut retries = 0;
    for step in 1..=40 {
        retries += h.sync.tick(Time::from_millis(step * 100)).expect("tick");
    }
    assert_eq!(retries, 19);
    let ctx = h.ctx();
    assert_eq!(ctx.pending_retries(), 0);
    let meta = ctx.metadata(id).expect("still registered");
    assert_eq!(meta.update_retries, 20);
    assert!(meta.dirty);
}

#[test]
fn feature_removed_before_its_icon_loads_never_gets_a_billboard() {
    let mut h = Harness::new(Scene::new());
    h.source.borrow_mut().add_feature(remote_point(1));
    h.process();
    assert!(h.sync.converter().has_pending(FeatureId(1)));

    h.source.borrow_mut().remove_feature(FeatureId(1));
    h.process();
    assert_eq!(h.sync.converter().deferred_count(), 0);

    h.sync.converter_mut().icons_mut().complete(REMOTE_ICON);
    h.process();
    assert_eq!(h.ctx().primitive_count(), 0);
    assert!(h.ctx().tracked_features().is_empty());
}

#[test]
fn animation_frame_only_touches_the_toggled_feature() {
    let mut h = Harness::new(Scene::new());
    h.source
        .borrow_mut()
        .add_features((1..=5).map(point).collect());
    h.source.borrow_mut().set_animating(true);
    h.process();

    let requests = h.scene.render_requests();
    h.source
        .borrow_mut()
        .apply_animation_frame(BTreeMap::from([(FeatureId(3), false)]));
    h.process();

    for feature in 1..=5 {
        assert_eq!(h.shown(feature), vec![feature != 3], "feature {feature}");
    }
    assert!(h.scene.render_requests() > requests);
}

#[test]
fn empty_animation_frame_still_repaints() {
    let mut h = Harness::new(Scene::new());
    h.source.borrow_mut().set_animating(true);
    h.process();
    let requests = h.scene.render_requests();
    h.source.borrow_mut().apply_animation_frame(BTreeMap::new());
    h.process();
    assert!(h.scene.render_requests() > requests);
}

#[test]
fn opacity_change_restyles_in_place() {
    let mut h = Harness::new(Scene::new());
    h.source
        .borrow_mut()
        .add_features((1..=10).map(area).collect());
    h.process();
    let before: Vec<Vec<PrimitiveId>> = (1..=10)
        .map(|f| h.ctx().primitives_for_feature(FeatureId(f)))
        .collect();

    h.layer.borrow_mut().set_opacity(0.25);
    h.process();

    let after: Vec<Vec<PrimitiveId>> = (1..=10)
        .map(|f| h.ctx().primitives_for_feature(FeatureId(f)))
        .collect();
    assert_eq!(after, before);
    for ids in &after {
        for id in ids {
            assert!(h.ctx().collection_contains(*id));
            assert!(!h.ctx().metadata(*id).expect("meta").dirty);
        }
    }
}

#[test]
fn disposed_registry_tolerates_removal_and_rejects_additions() {
    let mut h = Harness::new(Scene::new());
    h.source
        .borrow_mut()
        .add_features(vec![point(1), area(2)]);
    h.process();
    let ids: Vec<PrimitiveId> = [1, 2]
        .into_iter()
        .flat_map(|f| h.ctx().primitives_for_feature(FeatureId(f)))
        .collect();
    assert_eq!(ids.len(), 2);

    h.sync.dispose();
    assert_eq!(h.scene.live_pick_ids(), 0);

    let ctx = h.sync.context_mut().expect("context");
    for id in ids {
        assert!(!ctx.remove_primitive(id));
    }
    let feature = point(3);
    let geometry = feature.geometry().clone();
    assert!(
        ctx.add_billboard(Billboard::new(Vec3::ZERO, "builtin:circle"), &feature, &geometry)
            .is_err()
    );
}

#[test]
fn pruning_leaves_pick_ids_of_other_layers_alone() {
    let scene = Rc::new(Scene::new());
    let mut first = Harness::with_scene(Rc::clone(&scene), 1);
    let mut second = Harness::with_scene(Rc::clone(&scene), 2);
    first.source.borrow_mut().add_feature(area(1));
    second.source.borrow_mut().add_feature(area(1));
    first.process();
    second.process();
    let per_layer = scene.live_pick_ids() / 2;
    assert!(per_layer > 0);

    first.source.borrow_mut().remove_features(&[FeatureId(1)]);
    first.process();
    assert_eq!(scene.live_pick_ids(), per_layer);

    let ctx = second.ctx();
    let id = ctx.primitives_for_feature(FeatureId(1))[0];
    let pick_ids = ctx.metadata(id).expect("meta").pick_ids.clone();
    assert!(pick_ids.iter().all(|p| scene.is_pick_id_allocated(*p)));
}

#[test]
fn clearing_the_source_removes_everything() {
    let mut h = Harness::new(Scene::new());
    h.source
        .borrow_mut()
        .add_features(vec![point(1), area(2), remote_point(3)]);
    h.process();
    h.source.borrow_mut().clear();
    h.process();

    assert_eq!(h.ctx().primitive_count(), 0);
    assert_eq!(h.sync.converter().deferred_count(), 0);
    assert_eq!(h.scene.live_pick_ids(), 0);
}

#[test]
fn reshaping_a_point_into_a_collection_drops_its_billboard() {
    let mut h = Harness::new(Scene::new());
    h.source.borrow_mut().add_feature(point(1));
    h.process();
    assert!(h.ctx().get_primitive_for_geometry(GeometryId(1)).is_some());

    h.source.borrow_mut().set_feature_shape(
        FeatureId(1),
        Shape::Collection(vec![Geometry::new(
            GeometryId(10),
            Shape::LineString(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]),
        )]),
    );
    h.process();

    let ctx = h.ctx();
    assert!(ctx.get_primitive_for_geometry(GeometryId(1)).is_none());
    let line = ctx.get_primitive_for_geometry(GeometryId(10)).expect("polyline");
    assert_eq!(ctx.primitives_for_feature(FeatureId(1)), vec![line]);
    assert_eq!(ctx.primitive_count(), 1);
    assert_index_consistent(ctx);
}

#[test]
fn dropping_a_collection_child_removes_its_drawable() {
    let mut h = Harness::new(Scene::new());
    let child = |id: u64, x: f64| Geometry::new(GeometryId(id), Shape::Point([x, 0.0, 0.0]));
    let feature = Feature::new(
        FeatureId(1),
        Geometry::new(GeometryId(1), Shape::Collection(vec![child(10, 0.0), child(11, 1.0)])),
    );
    h.source.borrow_mut().add_feature(feature);
    h.process();
    assert_eq!(h.ctx().primitive_count(), 2);

    h.source
        .borrow_mut()
        .set_feature_shape(FeatureId(1), Shape::Collection(vec![child(10, 0.0)]));
    h.process();

    let ctx = h.ctx();
    assert!(ctx.get_primitive_for_geometry(GeometryId(11)).is_none());
    assert!(ctx.get_primitive_for_geometry(GeometryId(10)).is_some());
    assert_eq!(ctx.primitive_count(), 1);
    assert_index_consistent(ctx);
}

#[test]
fn late_icon_does_not_replace_the_edited_geometry() {
    let mut h = Harness::new(Scene::new());
    h.source.borrow_mut().add_feature(remote_point(1));
    h.process();
    assert!(h.sync.converter().has_pending(FeatureId(1)));

    h.source.borrow_mut().set_feature_shape(
        FeatureId(1),
        Shape::Polygon(vec![vec![
            [0.0, 0.0, 0.0],
            [0.05, 0.0, 0.0],
            [0.05, 0.05, 0.0],
            [0.0, 0.05, 0.0],
        ]]),
    );
    h.process();
    let area = h.ctx().get_primitive_for_geometry(GeometryId(1)).expect("area");

    h.sync.converter_mut().icons_mut().complete(REMOTE_ICON);
    h.process();
    let ctx = h.ctx();
    assert_eq!(ctx.get_primitive_for_geometry(GeometryId(1)), Some(area));
    assert_eq!(ctx.primitives_for_feature(FeatureId(1)), vec![area]);
    assert_eq!(h.sync.converter().deferred_count(), 0);
}

#[test]
fn pick_ids_return_to_baseline_after_rebuilds_and_removals() {
    let mut h = Harness::new(Scene::new());
    h.source.borrow_mut().add_feature(area(1));
    h.process();
    let baseline = h.scene.live_pick_ids();
    assert!(baseline > 0);

    for flip in 0..50 {
        let mode = if flip % 2 == 0 {
            AltitudeMode::ClampToGround
        } else {
            AltitudeMode::Absolute
        };
        h.source.borrow_mut().set_altitude_mode(mode);
        h.process();
    }
    for _ in 0..50 {
        h.source.borrow_mut().add_feature(area(2));
        h.process();
        h.source.borrow_mut().remove_feature(FeatureId(2));
        h.process();
    }

    assert_eq!(h.scene.live_pick_ids(), baseline);
    assert_eq!(h.ctx().primitive_count(), 1);
}
