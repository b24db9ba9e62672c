use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use foundation::ids::{FeatureId, GeometryId, LayerId};
use foundation::math::Vec3;
use foundation::time::Time;
use layers::{Feature, Geometry};
use runtime::timer::TimerQueue;
use scene::{
    Billboard, CollectionHandle, CollectionKind, Drawable, Label, PickId, Polyline,
    PrimitiveKind, Scene, SceneGroup,
};
use tracing::{debug, error, trace};

use crate::config::RetryPolicy;
use crate::error::RegistryError;
use crate::metadata::{PrimitiveId, PrimitiveMetadata};
use crate::update::AttributeSet;

/// Registry of every drawable created for one layer in one scene.
///
/// Owns the five collections exclusively and keeps the indices between
/// features, geometries and drawables consistent:
/// - every id in `feature_to_primitives` has metadata and a live slot in its
///   collection, and no feature maps to an empty list;
/// - each geometry maps to at most one drawable and at most one label;
/// - `feature_shown` outlives the drawables it applies to.
#[derive(Debug)]
pub struct VectorContext {
    layer: LayerId,
    scene: Rc<Scene>,
    billboards: CollectionHandle,
    labels: CollectionHandle,
    polylines: CollectionHandle,
    primitives: CollectionHandle,
    ground_primitives: CollectionHandle,
    metadata: BTreeMap<PrimitiveId, PrimitiveMetadata>,
    feature_to_primitives: BTreeMap<FeatureId, Vec<PrimitiveId>>,
    geometry_to_primitive: BTreeMap<GeometryId, PrimitiveId>,
    geometry_to_label: BTreeMap<GeometryId, PrimitiveId>,
    feature_shown: BTreeMap<FeatureId, bool>,
    pick_ids: BTreeSet<PickId>,
    eye_offset: Rc<Vec3>,
    label_eye_offset: Rc<Vec3>,
    retries: TimerQueue<PrimitiveId, AttributeSet>,
    retry_policy: RetryPolicy,
    now: Time,
    attached: bool,
    disposed: bool,
}

impl VectorContext {
    pub fn new(layer: LayerId, scene: Rc<Scene>, retry_policy: RetryPolicy) -> Self {
        let billboards = scene.create_collection(CollectionKind::Billboards);
        let labels = scene.create_collection(CollectionKind::Labels);
        let polylines = scene.create_collection(CollectionKind::Polylines);
        let primitives = scene.create_collection(CollectionKind::Primitives);
        let ground_primitives = scene.create_collection(CollectionKind::GroundPrimitives);
        Self {
            layer,
            scene,
            billboards,
            labels,
            polylines,
            primitives,
            ground_primitives,
            metadata: BTreeMap::new(),
            feature_to_primitives: BTreeMap::new(),
            geometry_to_primitive: BTreeMap::new(),
            geometry_to_label: BTreeMap::new(),
            feature_shown: BTreeMap::new(),
            pick_ids: BTreeSet::new(),
            eye_offset: Rc::new(Vec3::ZERO),
            label_eye_offset: Rc::new(Vec3::ZERO),
            retries: TimerQueue::new(),
            retry_policy,
            now: Time::ZERO,
            attached: false,
            disposed: false,
        }
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn scene(&self) -> &Rc<Scene> {
        &self.scene
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Attaches the collections to the scene: ground primitives to the ground
    /// group, everything else to the primitives group.
    pub fn attach(&mut self) -> Result<(), RegistryError> {
        self.ensure_live()?;
        if self.attached {
            return Ok(());
        }
        for kind in CollectionKind::ALL {
            let collection = self.collection(kind);
            self.scene.add(scene_group(kind), collection);
        }
        self.attached = true;
        debug!("vector context for {} attached", self.layer);
        Ok(())
    }

    pub fn add_billboard(
        &mut self,
        billboard: Billboard,
        feature: &Feature,
        geometry: &Geometry,
    ) -> Result<Option<PrimitiveId>, RegistryError> {
        self.insert(Drawable::Billboard(billboard), feature, geometry)
    }

    pub fn add_label(
        &mut self,
        label: Label,
        feature: &Feature,
        geometry: &Geometry,
    ) -> Result<Option<PrimitiveId>, RegistryError> {
        self.insert(Drawable::Label(label), feature, geometry)
    }

    pub fn add_polyline(
        &mut self,
        polyline: Polyline,
        feature: &Feature,
        geometry: &Geometry,
    ) -> Result<Option<PrimitiveId>, RegistryError> {
        self.insert(Drawable::Polyline(polyline), feature, geometry)
    }

    /// Adds a generic primitive or primitive group. Clamped ones go to the
    /// ground collection.
    pub fn add_primitive(
        &mut self,
        primitive: Drawable,
        feature: &Feature,
        geometry: &Geometry,
    ) -> Result<Option<PrimitiveId>, RegistryError> {
        debug_assert!(matches!(
            primitive,
            Drawable::Primitive(_) | Drawable::Collection(_)
        ));
        self.insert(primitive, feature, geometry)
    }

    /// Removes a drawable and every index entry pointing at it, and returns its
    /// pick ids to the scene.
    ///
    /// Returns `false` if it was already gone, including after [`Self::dispose`].
    pub fn remove_primitive(&mut self, id: PrimitiveId) -> bool {
        let Some(meta) = self.metadata.remove(&id) else {
            return false;
        };
        let index = if meta.is_label() {
            &mut self.geometry_to_label
        } else {
            &mut self.geometry_to_primitive
        };
        if index.get(&meta.geometry) == Some(&id) {
            index.remove(&meta.geometry);
        }
        if let Some(ids) = self.feature_to_primitives.get_mut(&meta.feature) {
            ids.retain(|p| *p != id);
            if ids.is_empty() {
                self.feature_to_primitives.remove(&meta.feature);
            }
        }
        self.retries.cancel(id);
        self.collection(id.collection).borrow_mut().remove(id.handle);
        for pick in &meta.pick_ids {
            self.pick_ids.remove(pick);
        }
        self.scene.release_pick_ids(&meta.pick_ids);
        trace!("removed {} {id} of {}", meta.kind.as_str(), meta.feature);
        true
    }

    /// Removes every drawable of a feature and forgets its shown-state.
    pub fn cleanup(&mut self, feature: FeatureId) -> usize {
        let ids = self.feature_to_primitives.remove(&feature).unwrap_or_default();
        let removed = ids.into_iter().filter(|id| self.remove_primitive(*id)).count();
        self.feature_shown.remove(&feature);
        removed
    }

    pub fn mark_dirty(&mut self, feature: FeatureId) {
        for id in self.primitives_for_feature(feature) {
            if let Some(meta) = self.metadata.get_mut(&id) {
                meta.dirty = true;
            }
        }
    }

    /// Removes the feature's drawables that are marked dirty.
    pub fn remove_dirty(&mut self, feature: FeatureId) -> usize {
        let dirty: Vec<PrimitiveId> = self
            .primitives_for_feature(feature)
            .into_iter()
            .filter(|id| self.metadata.get(id).is_some_and(|m| m.dirty))
            .collect();
        dirty.into_iter().filter(|id| self.remove_primitive(*id)).count()
    }

    /// Removes the feature's drawables built for geometries it no longer has.
    ///
    /// `shapes` lists the geometries that may own a shape drawable and `label`
    /// the one that may own a label. Returns the number of drawables removed.
    pub fn retain_geometries(
        &mut self,
        feature: FeatureId,
        shapes: &BTreeSet<GeometryId>,
        label: GeometryId,
    ) -> usize {
        let orphans: Vec<PrimitiveId> = self
            .primitives_for_feature(feature)
            .into_iter()
            .filter(|id| {
                self.metadata.get(id).is_some_and(|m| {
                    if m.is_label() {
                        m.geometry != label
                    } else {
                        !shapes.contains(&m.geometry)
                    }
                })
            })
            .collect();
        orphans.into_iter().filter(|id| self.remove_primitive(*id)).count()
    }

    /// Drops index entries that no longer point at a live drawable and returns
    /// pick ids that are no longer in use to the scene.
    ///
    /// Returns the number of pick ids released.
    pub fn prune_maps(&mut self) -> usize {
        let live: BTreeSet<PrimitiveId> = self
            .metadata
            .keys()
            .copied()
            .filter(|id| self.collection(id.collection).borrow().contains(id.handle))
            .collect();
        self.metadata.retain(|id, _| live.contains(id));
        self.feature_to_primitives.retain(|_, ids| {
            ids.retain(|id| live.contains(id));
            !ids.is_empty()
        });
        self.geometry_to_primitive.retain(|_, id| live.contains(id));
        self.geometry_to_label.retain(|_, id| live.contains(id));

        let in_use: BTreeSet<PickId> = self
            .metadata
            .values()
            .flat_map(|m| m.pick_ids.iter().copied())
            .collect();
        let unused: Vec<PickId> = self.pick_ids.difference(&in_use).copied().collect();
        self.pick_ids = in_use;
        self.scene.release_pick_ids(&unused)
    }

    pub fn get_primitive_for_geometry(&self, geometry: GeometryId) -> Option<PrimitiveId> {
        self.geometry_to_primitive.get(&geometry).copied()
    }

    pub fn get_label_for_geometry(&self, geometry: GeometryId) -> Option<PrimitiveId> {
        self.geometry_to_label.get(&geometry).copied()
    }

    pub fn primitives_for_feature(&self, feature: FeatureId) -> Vec<PrimitiveId> {
        self.feature_to_primitives
            .get(&feature)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tracked_features(&self) -> Vec<FeatureId> {
        self.feature_to_primitives.keys().copied().collect()
    }

    pub fn metadata(&self, id: PrimitiveId) -> Option<&PrimitiveMetadata> {
        self.metadata.get(&id)
    }

    pub(crate) fn metadata_mut(&mut self, id: PrimitiveId) -> Option<&mut PrimitiveMetadata> {
        self.metadata.get_mut(&id)
    }

    pub fn contains(&self, id: PrimitiveId) -> bool {
        self.metadata.contains_key(&id)
    }

    pub fn primitive_count(&self) -> usize {
        self.metadata.len()
    }

    /// Number of drawables currently held by one collection.
    pub fn collection_len(&self, kind: CollectionKind) -> usize {
        self.collection(kind).borrow().len()
    }

    pub fn collection_contains(&self, id: PrimitiveId) -> bool {
        self.collection(id.collection).borrow().contains(id.handle)
    }

    pub fn with_drawable<R>(&self, id: PrimitiveId, f: impl FnOnce(&Drawable) -> R) -> Option<R> {
        let collection = self.collection(id.collection).borrow();
        collection.get(id.handle).map(f)
    }

    pub fn with_drawable_mut<R>(
        &self,
        id: PrimitiveId,
        f: impl FnOnce(&mut Drawable) -> R,
    ) -> Option<R> {
        let mut collection = self.collection(id.collection).borrow_mut();
        collection.get_mut(id.handle).map(f)
    }

    /// Shows or hides the whole layer.
    pub fn set_visibility(&mut self, show: bool) {
        for kind in CollectionKind::ALL {
            self.collection(kind).borrow_mut().set_show(show);
        }
    }

    pub fn is_visible(&self) -> bool {
        self.billboards.borrow().show()
    }

    pub fn eye_offset(&self) -> &Rc<Vec3> {
        &self.eye_offset
    }

    pub fn label_eye_offset(&self) -> &Rc<Vec3> {
        &self.label_eye_offset
    }

    /// Applies `offset` to every billboard unless it equals the cached one.
    ///
    /// Returns `false` on the no-op path, where neither the billboards nor
    /// the cached `Rc` are touched.
    pub fn set_eye_offset(&mut self, offset: Vec3) -> bool {
        if *self.eye_offset == offset {
            return false;
        }
        let shared = Rc::new(offset);
        for (_, drawable) in self.billboards.borrow_mut().iter_mut() {
            drawable.set_eye_offset(&shared);
        }
        self.eye_offset = shared;
        true
    }

    pub fn set_label_eye_offset(&mut self, offset: Vec3) -> bool {
        if *self.label_eye_offset == offset {
            return false;
        }
        let shared = Rc::new(offset);
        for (_, drawable) in self.labels.borrow_mut().iter_mut() {
            drawable.set_eye_offset(&shared);
        }
        self.label_eye_offset = shared;
        true
    }

    /// Desired visibility of a feature; `true` when nothing was recorded.
    pub fn is_feature_shown(&self, feature: FeatureId) -> bool {
        self.feature_shown.get(&feature).copied().unwrap_or(true)
    }

    /// Records the desired visibility. Drawables added later pick it up.
    pub fn set_feature_shown(&mut self, feature: FeatureId, shown: bool) {
        self.feature_shown.insert(feature, shown);
    }

    /// Writes the recorded visibility onto the feature's drawables.
    ///
    /// Returns how many drawables changed.
    pub fn apply_feature_shown(&mut self, feature: FeatureId) -> usize {
        let shown = self.is_feature_shown(feature);
        self.primitives_for_feature(feature)
            .into_iter()
            .filter(|id| {
                self.with_drawable_mut(*id, |d| {
                    let changed = d.show() != shown;
                    d.set_show(shown);
                    changed
                })
                .unwrap_or(false)
            })
            .count()
    }

    pub fn now(&self) -> Time {
        self.now
    }

    /// Advances the clock used to schedule retries. Time never moves back.
    pub fn set_now(&mut self, now: Time) {
        if now.0 > self.now.0 {
            self.now = now;
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    pub fn next_retry_due(&self) -> Option<Time> {
        self.retries.next_due()
    }

    /// Returns `false` if a retry was already pending; its payload is replaced.
    pub(crate) fn schedule_retry(&mut self, id: PrimitiveId, attributes: AttributeSet) -> bool {
        let due = self.now.after_millis(self.retry_policy.delay_ms);
        self.retries.schedule(due, id, attributes)
    }

    pub(crate) fn cancel_retry(&mut self, id: PrimitiveId) -> bool {
        self.retries.cancel(id)
    }

    pub(crate) fn take_due_retries(&mut self) -> Vec<(PrimitiveId, AttributeSet)> {
        self.retries.pop_due(self.now)
    }

    /// Detaches every collection, destroys them along with their drawables
    /// and clears all indices. Calling it again does nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        for kind in CollectionKind::ALL {
            let collection = self.collection(kind);
            if self.attached {
                self.scene.remove(scene_group(kind), collection);
            }
            let mut collection = collection.borrow_mut();
            collection.set_destroy_primitives(true);
            collection.destroy();
        }
        let owned: Vec<PickId> = std::mem::take(&mut self.pick_ids).into_iter().collect();
        self.scene.release_pick_ids(&owned);
        self.metadata.clear();
        self.feature_to_primitives.clear();
        self.geometry_to_primitive.clear();
        self.geometry_to_label.clear();
        self.feature_shown.clear();
        self.retries.clear();
        self.attached = false;
        self.disposed = true;
        debug!("vector context for {} disposed", self.layer);
    }

    fn insert(
        &mut self,
        mut drawable: Drawable,
        feature: &Feature,
        geometry: &Geometry,
    ) -> Result<Option<PrimitiveId>, RegistryError> {
        self.ensure_live()?;
        if feature.is_disposed() {
            trace!("skipping {} for disposed {}", drawable.kind().as_str(), feature.id());
            return Ok(None);
        }

        let kind = drawable.kind();
        let collection_kind = match kind {
            PrimitiveKind::Billboard => CollectionKind::Billboards,
            PrimitiveKind::Label => CollectionKind::Labels,
            PrimitiveKind::Polyline => CollectionKind::Polylines,
            PrimitiveKind::Primitive | PrimitiveKind::PrimitiveCollection => {
                if drawable.clamp_to_ground() {
                    CollectionKind::GroundPrimitives
                } else {
                    CollectionKind::Primitives
                }
            }
        };

        let mut pick_ids = Vec::new();
        for primitive in drawable.geometry_primitives_mut() {
            for instance in &mut primitive.instances {
                let id = *instance
                    .pick_id
                    .get_or_insert_with(|| self.scene.allocate_pick_id());
                pick_ids.push(id);
            }
        }
        self.pick_ids.extend(pick_ids.iter().copied());

        drawable.set_show(self.is_feature_shown(feature.id()));
        match kind {
            PrimitiveKind::Billboard => drawable.set_eye_offset(&self.eye_offset),
            PrimitiveKind::Label => drawable.set_eye_offset(&self.label_eye_offset),
            _ => {}
        }

        let previous = if kind == PrimitiveKind::Label {
            self.get_label_for_geometry(geometry.id())
        } else {
            self.get_primitive_for_geometry(geometry.id())
        };
        if let Some(previous) = previous {
            self.remove_primitive(previous);
        }

        let Some(handle) = self.collection(collection_kind).borrow_mut().add(drawable) else {
            return Ok(None);
        };
        let id = PrimitiveId::new(collection_kind, handle);

        let mut meta = PrimitiveMetadata::new(
            self.layer,
            feature.id(),
            geometry.id(),
            geometry.revision(),
            kind,
        );
        meta.pick_ids = pick_ids;
        self.metadata.insert(id, meta);
        if kind == PrimitiveKind::Label {
            self.geometry_to_label.insert(geometry.id(), id);
        } else {
            self.geometry_to_primitive.insert(geometry.id(), id);
        }
        self.feature_to_primitives
            .entry(feature.id())
            .or_default()
            .push(id);
        trace!("added {} {id} for {}", kind.as_str(), feature.id());
        Ok(Some(id))
    }

    fn ensure_live(&self) -> Result<(), RegistryError> {
        if self.disposed {
            error!("operation on disposed vector context for {}", self.layer);
            return Err(RegistryError::Disposed { layer: self.layer });
        }
        Ok(())
    }

    fn collection(&self, kind: CollectionKind) -> &CollectionHandle {
        match kind {
            CollectionKind::Billboards => &self.billboards,
            CollectionKind::Labels => &self.labels,
            CollectionKind::Polylines => &self.polylines,
            CollectionKind::Primitives => &self.primitives,
            CollectionKind::GroundPrimitives => &self.ground_primitives,
        }
    }
}

fn scene_group(kind: CollectionKind) -> SceneGroup {
    match kind {
        CollectionKind::GroundPrimitives => SceneGroup::Ground,
        _ => SceneGroup::Primitives,
    }
}
