use std::fmt;

use foundation::handles::Handle;
use foundation::ids::{FeatureId, GeometryId, LayerId};
use scene::{CollectionKind, PickId, PrimitiveKind};

/// Address of a drawable owned by a [`crate::VectorContext`]: the collection
/// it lives in and its handle there.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrimitiveId {
    pub collection: CollectionKind,
    pub handle: Handle,
}

impl PrimitiveId {
    pub fn new(collection: CollectionKind, handle: Handle) -> Self {
        Self { collection, handle }
    }

    pub fn is_ground(&self) -> bool {
        self.collection == CollectionKind::GroundPrimitives
    }
}

impl fmt::Display for PrimitiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}", self.collection, self.handle)
    }
}

/// Bookkeeping the registry keeps per drawable, outside the drawable itself.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveMetadata {
    pub layer: LayerId,
    pub feature: FeatureId,
    pub geometry: GeometryId,
    /// Geometry revision the drawable was built from.
    pub geometry_revision: u64,
    pub kind: PrimitiveKind,
    pub pick_ids: Vec<PickId>,
    /// An attribute update is pending because the drawable was not ready.
    pub dirty: bool,
    /// Failed update attempts since the last successful one.
    pub update_retries: u32,
}

impl PrimitiveMetadata {
    pub fn new(
        layer: LayerId,
        feature: FeatureId,
        geometry: GeometryId,
        geometry_revision: u64,
        kind: PrimitiveKind,
    ) -> Self {
        Self {
            layer,
            feature,
            geometry,
            geometry_revision,
            kind,
            pick_ids: Vec::new(),
            dirty: false,
            update_retries: 0,
        }
    }

    pub fn is_label(&self) -> bool {
        self.kind == PrimitiveKind::Label
    }

    /// Whether the geometry moved on since the drawable was built.
    pub fn is_stale(&self, geometry: GeometryId, revision: u64) -> bool {
        self.geometry != geometry || self.geometry_revision != revision
    }
}
