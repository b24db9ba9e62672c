//! In-place mutation of drawables the registry already holds.
//!
//! Generic primitives only accept attribute writes once their upload finished.
//! Until then an update is parked on the context's retry queue and attempted
//! again every `delay_ms`, at most `max_attempts` times in total.

use layers::Geometry;
use scene::{InstanceAttribute, PrimitiveKind};
use tracing::{trace, warn};

use crate::context::VectorContext;
use crate::metadata::PrimitiveId;

/// Per-instance attributes for each generic primitive of a drawable, in the
/// order [`scene::Drawable::geometry_primitives_mut`] yields them. Each list is
/// written to every instance of its primitive.
pub type AttributeSet = Vec<Vec<InstanceAttribute>>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Attributes written; the drawable is clean again.
    Applied,
    /// Not ready yet; another attempt is scheduled.
    Deferred,
    /// Not ready after the last allowed attempt; left as it is.
    Abandoned,
    /// The drawable is no longer in the registry.
    Missing,
}

/// Whether `id` can be updated in place for `geometry` as a `kind` drawable
/// that is (or is not) clamped to the ground.
///
/// `false` means the caller must remove the drawable and add a new one: it is
/// gone or destroyed, it was built from another geometry revision, or the
/// update would change its kind or its ground/non-ground class.
pub fn should_update_primitive(
    context: &VectorContext,
    id: PrimitiveId,
    geometry: &Geometry,
    kind: PrimitiveKind,
    clamp_to_ground: bool,
) -> bool {
    let Some(meta) = context.metadata(id) else {
        return false;
    };
    if meta.kind != kind || meta.is_stale(geometry.id(), geometry.revision()) {
        return false;
    }
    context
        .with_drawable(id, |d| {
            !d.is_destroyed() && d.clamp_to_ground() == clamp_to_ground
        })
        .unwrap_or(false)
}

/// Writes `attributes` into the drawable, or schedules a retry if it is not
/// ready yet.
///
/// A failing attribute is skipped; the remaining ones are still written.
pub fn update_primitive(
    context: &mut VectorContext,
    id: PrimitiveId,
    attributes: AttributeSet,
) -> UpdateOutcome {
    let max_attempts = context.retry_policy().max_attempts;
    let Some(ready) = context.with_drawable(id, |d| d.is_ready() && !d.is_destroyed()) else {
        return UpdateOutcome::Missing;
    };
    let Some(meta) = context.metadata_mut(id) else {
        return UpdateOutcome::Missing;
    };
    meta.dirty = true;

    if !ready {
        meta.update_retries += 1;
        let attempts = meta.update_retries;
        if attempts >= max_attempts {
            context.cancel_retry(id);
            warn!("giving up on {id} after {attempts} attempts; primitive never became ready");
            return UpdateOutcome::Abandoned;
        }
        context.schedule_retry(id, attributes);
        trace!("{id} not ready (attempt {attempts}); retry scheduled");
        return UpdateOutcome::Deferred;
    }

    meta.dirty = false;
    meta.update_retries = 0;
    context.cancel_retry(id);
    context.with_drawable_mut(id, |drawable| {
        for (primitive, attrs) in drawable.geometry_primitives_mut().iter_mut().zip(&attributes) {
            for index in 0..primitive.instances.len() {
                for attr in attrs {
                    if let Err(err) = primitive.set_instance_attribute(index, *attr) {
                        trace!("{id}: skipping {} on instance {index}: {err}", attr.name());
                    }
                }
            }
        }
    });
    UpdateOutcome::Applied
}

/// Runs every retry that is due at the context's current time.
///
/// Retries for drawables removed in the meantime are dropped. Returns the
/// number of attempts made.
pub fn run_due_updates(context: &mut VectorContext) -> usize {
    let mut attempts = 0;
    for (id, attributes) in context.take_due_retries() {
        if !context.contains(id) {
            continue;
        }
        update_primitive(context, id, attributes);
        attempts += 1;
    }
    attempts
}

#[cfg(test)]
mod tests {
    use super::{UpdateOutcome, run_due_updates, should_update_primitive, update_primitive};
    use crate::config::RetryPolicy;
    use crate::context::VectorContext;
    use crate::metadata::PrimitiveId;
    use foundation::color::Color;
    use foundation::ids::{FeatureId, GeometryId, LayerId};
    use foundation::math::Vec3;
    use foundation::time::Time;
    use layers::{Feature, FeatureRef, Geometry, Shape};
    use scene::{
        Billboard, Drawable, GeometryInstance, GeometryPrimitive, InstanceAttribute, PrimitiveKind,
        Scene,
    };
    use std::rc::Rc;

    fn setup(latency: u32, max_attempts: u32) -> (VectorContext, FeatureRef) {
        let scene = Rc::new(Scene::with_upload_latency(latency));
        let mut ctx = VectorContext::new(
            LayerId(1),
            scene,
            RetryPolicy {
                delay_ms: 100,
                max_attempts,
            },
        );
        ctx.attach().expect("live");
        let feature = Feature::new(
            FeatureId(1),
            Geometry::new(GeometryId(1), Shape::Point([0.0, 0.0, 0.0])),
        );
        (ctx, feature)
    }

    fn add_fill(ctx: &mut VectorContext, feature: &FeatureRef) -> PrimitiveId {
        let primitive = GeometryPrimitive::new(
            vec![
                GeometryInstance::new(vec![Vec3::ZERO; 3], vec![0, 1, 2])
                    .with_color(Color::WHITE),
            ],
            false,
        );
        ctx.add_primitive(Drawable::Primitive(primitive), feature, &feature.geometry())
            .expect("live")
            .expect("added")
    }

    fn instance_color(ctx: &VectorContext, id: PrimitiveId) -> Option<Color> {
        ctx.with_drawable(id, |d| match d {
            Drawable::Primitive(p) => p.instances[0].color(),
            _ => None,
        })
        .flatten()
    }

    #[test]
    fn ready_primitive_is_updated_immediately() {
        let (mut ctx, feature) = setup(0, 20);
        let id = add_fill(&mut ctx, &feature);
        let red = Color::new(1.0, 0.0, 0.0, 1.0);

        let outcome = update_primitive(&mut ctx, id, vec![vec![InstanceAttribute::Color(red)]]);
        assert_eq!(outcome, UpdateOutcome::Applied);
        assert_eq!(instance_color(&ctx, id), Some(red));
        assert!(!ctx.metadata(id).expect("meta").dirty);
    }

    #[test]
    fn unknown_attribute_does_not_block_the_rest() {
        let (mut ctx, feature) = setup(0, 20);
        let id = add_fill(&mut ctx, &feature);
        let red = Color::new(1.0, 0.0, 0.0, 1.0);

        let outcome = update_primitive(
            &mut ctx,
            id,
            vec![vec![
                InstanceAttribute::Show(false),
                InstanceAttribute::Color(red),
            ]],
        );
        assert_eq!(outcome, UpdateOutcome::Applied);
        assert_eq!(instance_color(&ctx, id), Some(red));
    }

    #[test]
    fn pending_primitive_is_retried_until_ready() {
        let (mut ctx, feature) = setup(1, 20);
        let id = add_fill(&mut ctx, &feature);
        let red = Color::new(1.0, 0.0, 0.0, 1.0);

        let outcome = update_primitive(&mut ctx, id, vec![vec![InstanceAttribute::Color(red)]]);
        assert_eq!(outcome, UpdateOutcome::Deferred);
        assert!(ctx.metadata(id).expect("meta").dirty);
        assert_eq!(ctx.pending_retries(), 1);

        ctx.scene().render_frame();
        ctx.set_now(Time::from_millis(100));
        assert_eq!(run_due_updates(&mut ctx), 1);
        assert_eq!(instance_color(&ctx, id), Some(red));
        let meta = ctx.metadata(id).expect("meta");
        assert!(!meta.dirty);
        assert_eq!(meta.update_retries, 0);
        assert_eq!(ctx.pending_retries(), 0);
    }

    #[test]
    fn repeated_updates_share_one_retry() {
        let (mut ctx, feature) = setup(5, 20);
        let id = add_fill(&mut ctx, &feature);
        update_primitive(&mut ctx, id, vec![vec![]]);
        update_primitive(&mut ctx, id, vec![vec![]]);
        assert_eq!(ctx.pending_retries(), 1);
        assert_eq!(ctx.metadata(id).expect("meta").update_retries, 2);
    }

    #[test]
    fn retries_stop_at_the_attempt_cap() {
        let (mut ctx, feature) = setup(u32::MAX, 3);
        let id = add_fill(&mut ctx, &feature);

        assert_eq!(update_primitive(&mut ctx, id, vec![vec![]]), UpdateOutcome::Deferred);
        ctx.set_now(Time::from_millis(100));
        assert_eq!(run_due_updates(&mut ctx), 1);
        ctx.set_now(Time::from_millis(200));
        assert_eq!(run_due_updates(&mut ctx), 1);
        assert_eq!(ctx.metadata(id).expect("meta").update_retries, 3);
        assert_eq!(ctx.pending_retries(), 0);

        ctx.set_now(Time::from_millis(1000));
        assert_eq!(run_due_updates(&mut ctx), 0);
    }

    #[test]
    fn removed_primitive_is_missing() {
        let (mut ctx, feature) = setup(1, 20);
        let id = add_fill(&mut ctx, &feature);
        update_primitive(&mut ctx, id, vec![vec![]]);
        ctx.remove_primitive(id);
        assert_eq!(ctx.pending_retries(), 0);
        assert_eq!(update_primitive(&mut ctx, id, vec![vec![]]), UpdateOutcome::Missing);
    }

    #[test]
    fn class_and_revision_changes_block_in_place_updates() {
        let (mut ctx, feature) = setup(0, 20);
        let id = add_fill(&mut ctx, &feature);
        let geometry = feature.geometry().clone();

        assert!(should_update_primitive(&ctx, id, &geometry, PrimitiveKind::Primitive, false));
        assert!(!should_update_primitive(&ctx, id, &geometry, PrimitiveKind::Primitive, true));
        assert!(!should_update_primitive(&ctx, id, &geometry, PrimitiveKind::Billboard, false));

        feature.set_shape(Shape::Point([1.0, 1.0, 0.0]));
        let moved = feature.geometry().clone();
        assert!(!should_update_primitive(&ctx, id, &moved, PrimitiveKind::Primitive, false));

        let b = ctx
            .add_billboard(Billboard::new(Vec3::ZERO, "builtin:circle"), &feature, &moved)
            .expect("live")
            .expect("added");
        assert!(should_update_primitive(&ctx, b, &moved, PrimitiveKind::Billboard, false));
        assert!(!ctx.contains(id));
    }
}
