use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use foundation::ids::FeatureId;
use runtime::event_bus::{EventBus, Sequenced, Subscription};

use crate::feature::{FeatureRef, Shape};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum AltitudeMode {
    #[default]
    Absolute,
    RelativeToGround,
    ClampToGround,
}

impl AltitudeMode {
    pub fn is_clamped(self) -> bool {
        self == AltitudeMode::ClampToGround
    }
}

/// How point features carrying ellipse or bearing data are drawn.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum GeometryShape {
    #[default]
    Default,
    Point,
    Ellipse,
    EllipseCenter,
    Ellipsoid,
    LineOfBearing,
    /// Ellipse for selected features only.
    SelectedEllipse,
    SelectedEllipseCenter,
}

impl GeometryShape {
    pub fn is_selected_variant(self) -> bool {
        matches!(
            self,
            GeometryShape::SelectedEllipse | GeometryShape::SelectedEllipseCenter
        )
    }

    pub fn is_ellipse_family(self) -> bool {
        matches!(
            self,
            GeometryShape::Ellipse
                | GeometryShape::EllipseCenter
                | GeometryShape::Ellipsoid
                | GeometryShape::SelectedEllipse
                | GeometryShape::SelectedEllipseCenter
        )
    }

    pub fn draws_center(self) -> bool {
        matches!(
            self,
            GeometryShape::EllipseCenter | GeometryShape::SelectedEllipseCenter
        )
    }

    /// Whether switching between the two shapes changes what kind of drawable
    /// a feature needs, rather than just its style.
    pub fn crosses_rebuild_boundary(from: GeometryShape, to: GeometryShape) -> bool {
        let special = |s: GeometryShape| s.is_ellipse_family() || s == GeometryShape::LineOfBearing;
        from != to && (special(from) || special(to))
    }
}

/// Marker drawn at an ellipse center by the `*Center` shapes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CenterShape {
    #[default]
    Circle,
    Square,
}

#[derive(Debug, Clone)]
pub enum SourceChange {
    Cleared,
    /// Features whose source-level shown flag changed.
    FeatureVisibility(Vec<FeatureId>),
    /// Batched shown-state delta for one animation frame.
    AnimationFrame(BTreeMap<FeatureId, bool>),
    AnimationEnabled(bool),
    Altitude(AltitudeMode),
    Features {
        added: Vec<FeatureRef>,
        removed: Vec<FeatureRef>,
    },
    /// Union of previously and newly highlighted features.
    HighlightedItems(Vec<FeatureId>),
    GeometryShape {
        previous: GeometryShape,
        current: GeometryShape,
    },
    GeometryCenterShape(CenterShape),
    SelectionAdded(Vec<FeatureId>),
    SelectionRemoved(Vec<FeatureId>),
    SelectionChanged {
        added: Vec<FeatureId>,
        removed: Vec<FeatureId>,
    },
}

#[derive(Debug, Clone)]
pub enum SourceEvent {
    Change(SourceChange),
    FeatureAdded(FeatureRef),
    FeatureRemoved(FeatureRef),
    FeatureChanged(FeatureRef),
}

/// The 2D vector feature collection and its display state.
///
/// Removing a feature disposes it: the source owns feature lifetime.
#[derive(Debug, Default)]
pub struct VectorSource {
    features: BTreeMap<FeatureId, FeatureRef>,
    shown: BTreeMap<FeatureId, bool>,
    highlighted: BTreeSet<FeatureId>,
    selected: BTreeSet<FeatureId>,
    animating: bool,
    altitude_mode: AltitudeMode,
    geometry_shape: GeometryShape,
    center_shape: CenterShape,
    events: EventBus<SourceEvent>,
}

impl VectorSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Subscription {
        self.events.subscribe()
    }

    pub fn unsubscribe(&mut self, sub: Subscription) -> bool {
        self.events.unsubscribe(sub)
    }

    pub fn drain_events(&mut self, sub: Subscription) -> Vec<SourceEvent> {
        self.events.drain(sub)
    }

    /// Events with their emission stamps, for merging with other buses.
    pub fn drain_sequenced_events(&mut self, sub: Subscription) -> Vec<Sequenced<SourceEvent>> {
        self.events.drain_sequenced(sub)
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Features in id order.
    pub fn features(&self) -> Vec<FeatureRef> {
        self.features.values().cloned().collect()
    }

    pub fn feature(&self, id: FeatureId) -> Option<FeatureRef> {
        self.features.get(&id).cloned()
    }

    pub fn has_feature(&self, id: FeatureId) -> bool {
        self.features.contains_key(&id)
    }

    /// Returns `false` if a feature with the same id is already present.
    pub fn add_feature(&mut self, feature: FeatureRef) -> bool {
        if !self.insert(&feature) {
            return false;
        }
        self.events.emit(SourceEvent::FeatureAdded(feature));
        true
    }

    /// Bulk insert announced with a single `Features` change.
    pub fn add_features(&mut self, features: Vec<FeatureRef>) -> usize {
        let added: Vec<FeatureRef> = features.into_iter().filter(|f| self.insert(f)).collect();
        let count = added.len();
        if count > 0 {
            self.events.emit(SourceEvent::Change(SourceChange::Features {
                added,
                removed: Vec::new(),
            }));
        }
        count
    }

    pub fn remove_feature(&mut self, id: FeatureId) -> Option<FeatureRef> {
        let feature = self.take(id)?;
        self.events
            .emit(SourceEvent::FeatureRemoved(Rc::clone(&feature)));
        Some(feature)
    }

    pub fn remove_features(&mut self, ids: &[FeatureId]) -> usize {
        let removed: Vec<FeatureRef> = ids.iter().filter_map(|id| self.take(*id)).collect();
        let count = removed.len();
        if count > 0 {
            self.events.emit(SourceEvent::Change(SourceChange::Features {
                added: Vec::new(),
                removed,
            }));
        }
        count
    }

    /// Announces an in-place edit of a feature's style or properties.
    pub fn notify_changed(&mut self, id: FeatureId) -> bool {
        let Some(feature) = self.features.get(&id).cloned() else {
            return false;
        };
        self.events.emit(SourceEvent::FeatureChanged(feature));
        true
    }

    /// Replaces a feature's geometry shape and announces the change.
    pub fn set_feature_shape(&mut self, id: FeatureId, shape: Shape) -> bool {
        let Some(feature) = self.features.get(&id).cloned() else {
            return false;
        };
        feature.set_shape(shape);
        self.events.emit(SourceEvent::FeatureChanged(feature));
        true
    }

    pub fn clear(&mut self) {
        for feature in self.features.values() {
            feature.dispose();
        }
        self.features.clear();
        self.shown.clear();
        self.highlighted.clear();
        self.selected.clear();
        self.events.emit(SourceEvent::Change(SourceChange::Cleared));
    }

    /// Shown flag of a feature; features without an entry are shown.
    pub fn is_feature_shown(&self, id: FeatureId) -> bool {
        self.shown.get(&id).copied().unwrap_or(true)
    }

    pub fn set_feature_visibility(&mut self, ids: &[FeatureId], shown: bool) -> usize {
        let changed: Vec<FeatureId> = ids
            .iter()
            .copied()
            .filter(|id| self.features.contains_key(id) && self.is_feature_shown(*id) != shown)
            .collect();
        for id in &changed {
            self.shown.insert(*id, shown);
        }
        let count = changed.len();
        if count > 0 {
            self.events
                .emit(SourceEvent::Change(SourceChange::FeatureVisibility(changed)));
        }
        count
    }

    pub fn is_animating(&self) -> bool {
        self.animating
    }

    pub fn set_animating(&mut self, animating: bool) {
        if self.animating == animating {
            return;
        }
        self.animating = animating;
        self.events
            .emit(SourceEvent::Change(SourceChange::AnimationEnabled(animating)));
    }

    /// Records a frame's shown-state delta and announces it, even when empty.
    pub fn apply_animation_frame(&mut self, delta: BTreeMap<FeatureId, bool>) {
        for (id, shown) in &delta {
            self.shown.insert(*id, *shown);
        }
        self.events
            .emit(SourceEvent::Change(SourceChange::AnimationFrame(delta)));
    }

    pub fn altitude_mode(&self) -> AltitudeMode {
        self.altitude_mode
    }

    pub fn set_altitude_mode(&mut self, mode: AltitudeMode) {
        if self.altitude_mode == mode {
            return;
        }
        self.altitude_mode = mode;
        self.events
            .emit(SourceEvent::Change(SourceChange::Altitude(mode)));
    }

    pub fn geometry_shape(&self) -> GeometryShape {
        self.geometry_shape
    }

    pub fn set_geometry_shape(&mut self, shape: GeometryShape) {
        let previous = self.geometry_shape;
        if previous == shape {
            return;
        }
        self.geometry_shape = shape;
        self.events
            .emit(SourceEvent::Change(SourceChange::GeometryShape {
                previous,
                current: shape,
            }));
    }

    pub fn center_shape(&self) -> CenterShape {
        self.center_shape
    }

    pub fn set_center_shape(&mut self, shape: CenterShape) {
        if self.center_shape == shape {
            return;
        }
        self.center_shape = shape;
        self.events
            .emit(SourceEvent::Change(SourceChange::GeometryCenterShape(shape)));
    }

    pub fn is_highlighted(&self, id: FeatureId) -> bool {
        self.highlighted.contains(&id)
    }

    pub fn set_highlighted(&mut self, ids: &[FeatureId]) {
        let next: BTreeSet<FeatureId> = ids.iter().copied().collect();
        if next == self.highlighted {
            return;
        }
        let affected: Vec<FeatureId> = self.highlighted.union(&next).copied().collect();
        self.highlighted = next;
        self.events
            .emit(SourceEvent::Change(SourceChange::HighlightedItems(affected)));
    }

    pub fn is_selected(&self, id: FeatureId) -> bool {
        self.selected.contains(&id)
    }

    pub fn select(&mut self, ids: &[FeatureId]) -> usize {
        let added: Vec<FeatureId> = ids
            .iter()
            .copied()
            .filter(|id| self.features.contains_key(id) && self.selected.insert(*id))
            .collect();
        let count = added.len();
        if count > 0 {
            self.events
                .emit(SourceEvent::Change(SourceChange::SelectionAdded(added)));
        }
        count
    }

    pub fn deselect(&mut self, ids: &[FeatureId]) -> usize {
        let removed: Vec<FeatureId> = ids
            .iter()
            .copied()
            .filter(|id| self.selected.remove(id))
            .collect();
        let count = removed.len();
        if count > 0 {
            self.events
                .emit(SourceEvent::Change(SourceChange::SelectionRemoved(removed)));
        }
        count
    }

    /// Replaces the whole selection.
    pub fn set_selection(&mut self, ids: &[FeatureId]) {
        let next: BTreeSet<FeatureId> = ids
            .iter()
            .copied()
            .filter(|id| self.features.contains_key(id))
            .collect();
        let added: Vec<FeatureId> = next.difference(&self.selected).copied().collect();
        let removed: Vec<FeatureId> = self.selected.difference(&next).copied().collect();
        if added.is_empty() && removed.is_empty() {
            return;
        }
        self.selected = next;
        self.events
            .emit(SourceEvent::Change(SourceChange::SelectionChanged {
                added,
                removed,
            }));
    }

    fn insert(&mut self, feature: &FeatureRef) -> bool {
        if self.features.contains_key(&feature.id()) {
            return false;
        }
        self.features.insert(feature.id(), Rc::clone(feature));
        true
    }

    fn take(&mut self, id: FeatureId) -> Option<FeatureRef> {
        let feature = self.features.remove(&id)?;
        self.shown.remove(&id);
        self.highlighted.remove(&id);
        self.selected.remove(&id);
        feature.dispose();
        Some(feature)
    }
}
