use std::cell::{Cell, Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use foundation::ids::{FeatureId, GeometryId};

use crate::style::Style;

/// Well-known feature property keys.
pub mod keys {
    pub const SEMI_MAJOR: &str = "semiMajor";
    pub const SEMI_MINOR: &str = "semiMinor";
    pub const ORIENTATION: &str = "orientation";
    pub const BEARING: &str = "bearing";
    pub const LOB_LENGTH: &str = "lobLength";
}

/// `[lon_deg, lat_deg, alt_m]`.
pub type Coordinate = [f64; 3];

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EllipseParams {
    pub center: Coordinate,
    pub semi_major_m: f64,
    pub semi_minor_m: f64,
    /// Clockwise from north.
    pub orientation_deg: f64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
    Ellipse,
    Ellipsoid,
    LineOfBearing,
    Collection,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Coordinate),
    LineString(Vec<Coordinate>),
    /// Outer ring first, then holes.
    Polygon(Vec<Vec<Coordinate>>),
    Ellipse(EllipseParams),
    Ellipsoid(EllipseParams),
    LineOfBearing {
        origin: Coordinate,
        bearing_deg: f64,
        length_m: f64,
    },
    Collection(Vec<Geometry>),
}

/// A feature's geometry. `revision` increments on every coordinate mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    id: GeometryId,
    shape: Shape,
    revision: u64,
}

impl Geometry {
    pub fn new(id: GeometryId, shape: Shape) -> Self {
        Self {
            id,
            shape,
            revision: 0,
        }
    }

    pub fn id(&self) -> GeometryId {
        self.id
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn kind(&self) -> GeometryKind {
        match self.shape {
            Shape::Point(_) => GeometryKind::Point,
            Shape::LineString(_) => GeometryKind::LineString,
            Shape::Polygon(_) => GeometryKind::Polygon,
            Shape::Ellipse(_) => GeometryKind::Ellipse,
            Shape::Ellipsoid(_) => GeometryKind::Ellipsoid,
            Shape::LineOfBearing { .. } => GeometryKind::LineOfBearing,
            Shape::Collection(_) => GeometryKind::Collection,
        }
    }

    pub fn set_shape(&mut self, shape: Shape) {
        self.shape = shape;
        self.revision += 1;
    }

    /// Ids of the geometries that are drawn on their own: this one, or every
    /// non-collection descendant of a collection.
    pub fn leaf_ids(&self) -> Vec<GeometryId> {
        match &self.shape {
            Shape::Collection(children) => children.iter().flat_map(Geometry::leaf_ids).collect(),
            _ => vec![self.id],
        }
    }

    /// This geometry or the descendant with id `id`.
    pub fn find(&self, id: GeometryId) -> Option<&Geometry> {
        if self.id == id {
            return Some(self);
        }
        match &self.shape {
            Shape::Collection(children) => children.iter().find_map(|c| c.find(id)),
            _ => None,
        }
    }

    /// First coordinate of the geometry, used to anchor labels.
    pub fn anchor(&self) -> Option<Coordinate> {
        match &self.shape {
            Shape::Point(c) => Some(*c),
            Shape::LineString(coords) => coords.get(coords.len() / 2).copied(),
            Shape::Polygon(rings) => rings.first().and_then(|r| r.first()).copied(),
            Shape::Ellipse(e) | Shape::Ellipsoid(e) => Some(e.center),
            Shape::LineOfBearing { origin, .. } => Some(*origin),
            Shape::Collection(children) => children.first().and_then(Geometry::anchor),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// An application feature, shared between the 2D model and its 3D mirror.
///
/// Interior mutability lets the model edit a feature other holders still
/// reference; a disposed feature must not gain new drawables.
#[derive(Debug)]
pub struct Feature {
    id: FeatureId,
    geometry: RefCell<Geometry>,
    style: RefCell<Option<Style>>,
    properties: RefCell<BTreeMap<String, PropertyValue>>,
    disposed: Cell<bool>,
}

pub type FeatureRef = Rc<Feature>;

impl Feature {
    pub fn new(id: FeatureId, geometry: Geometry) -> FeatureRef {
        Rc::new(Self {
            id,
            geometry: RefCell::new(geometry),
            style: RefCell::new(None),
            properties: RefCell::new(BTreeMap::new()),
            disposed: Cell::new(false),
        })
    }

    pub fn id(&self) -> FeatureId {
        self.id
    }

    pub fn geometry(&self) -> Ref<'_, Geometry> {
        self.geometry.borrow()
    }

    /// Replaces the root geometry's shape, bumping its revision.
    pub fn set_shape(&self, shape: Shape) {
        self.geometry.borrow_mut().set_shape(shape);
    }

    pub fn style(&self) -> Option<Style> {
        self.style.borrow().clone()
    }

    pub fn set_style(&self, style: Option<Style>) {
        *self.style.borrow_mut() = style;
    }

    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.properties.borrow().get(key).cloned()
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        match self.properties.borrow().get(key) {
            Some(PropertyValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn set_property(&self, key: impl Into<String>, value: PropertyValue) {
        self.properties.borrow_mut().insert(key.into(), value);
    }

    /// Ellipse parameters carried as properties on a point feature.
    pub fn ellipse_params(&self) -> Option<EllipseParams> {
        let Shape::Point(center) = *self.geometry().shape() else {
            return None;
        };
        let semi_major_m = self.number(keys::SEMI_MAJOR)?;
        let semi_minor_m = self.number(keys::SEMI_MINOR)?;
        Some(EllipseParams {
            center,
            semi_major_m,
            semi_minor_m,
            orientation_deg: self.number(keys::ORIENTATION).unwrap_or(0.0),
        })
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    pub fn dispose(&self) {
        self.disposed.set(true);
    }
}
