use std::rc::Rc;

use foundation::color::Color;
use foundation::math::Vec3;
use thiserror::Error;

use crate::pick_ids::PickId;

/// Discriminant of a [`Drawable`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrimitiveKind {
    Billboard,
    Label,
    Polyline,
    Primitive,
    PrimitiveCollection,
}

impl PrimitiveKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PrimitiveKind::Billboard => "billboard",
            PrimitiveKind::Label => "label",
            PrimitiveKind::Polyline => "polyline",
            PrimitiveKind::Primitive => "primitive",
            PrimitiveKind::PrimitiveCollection => "primitive_collection",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum HeightReference {
    #[default]
    None,
    ClampToGround,
    RelativeToGround,
}

/// GPU upload state of a generic primitive.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Enqueued for upload; attributes are not mutable yet.
    Pending { frames_remaining: u32 },
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
    #[error("primitive is not ready")]
    NotReady,
    #[error("primitive has been destroyed")]
    Destroyed,
    #[error("no geometry instance at index {index}")]
    NoSuchInstance { index: usize },
    #[error("geometry instance has no `{name}` attribute")]
    UnknownAttribute { name: &'static str },
}

/// Per-instance attribute written into a ready primitive.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum InstanceAttribute {
    Color(Color),
    Show(bool),
}

impl InstanceAttribute {
    pub fn name(&self) -> &'static str {
        match self {
            InstanceAttribute::Color(_) => "color",
            InstanceAttribute::Show(_) => "show",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Billboard {
    pub position: Vec3,
    pub image: String,
    pub color: Color,
    pub scale: f32,
    pub height_reference: HeightReference,
    pub show: bool,
    pub eye_offset: Rc<Vec3>,
}

impl Billboard {
    pub fn new(position: Vec3, image: impl Into<String>) -> Self {
        Self {
            position,
            image: image.into(),
            color: Color::WHITE,
            scale: 1.0,
            height_reference: HeightReference::None,
            show: true,
            eye_offset: Rc::new(Vec3::ZERO),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub position: Vec3,
    pub text: String,
    pub font: String,
    pub fill_color: Color,
    pub outline_color: Color,
    pub outline_width: f32,
    pub show: bool,
    pub eye_offset: Rc<Vec3>,
}

impl Label {
    pub fn new(position: Vec3, text: impl Into<String>) -> Self {
        Self {
            position,
            text: text.into(),
            font: "bold 14px sans-serif".to_string(),
            fill_color: Color::WHITE,
            outline_color: Color::BLACK,
            outline_width: 2.0,
            show: true,
            eye_offset: Rc::new(Vec3::ZERO),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    pub positions: Vec<Vec3>,
    pub width: f32,
    pub color: Color,
    pub show: bool,
}

impl Polyline {
    pub fn new(positions: Vec<Vec3>, width: f32, color: Color) -> Self {
        Self {
            positions,
            width,
            color,
            show: true,
        }
    }
}

/// Geometry batched into a primitive, with its declared per-instance attributes.
///
/// Only declared attributes can be written after upload.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryInstance {
    pub pick_id: Option<PickId>,
    pub positions: Vec<Vec3>,
    /// Triangle list, or line segments for outline instances.
    pub indices: Vec<u32>,
    color: Option<Color>,
    show: Option<bool>,
}

impl GeometryInstance {
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self {
            pick_id: None,
            positions,
            indices,
            color: None,
            show: None,
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_show(mut self, show: bool) -> Self {
        self.show = Some(show);
        self
    }

    pub fn color(&self) -> Option<Color> {
        self.color
    }

    pub fn show(&self) -> Option<bool> {
        self.show
    }

    fn set(&mut self, attribute: InstanceAttribute) -> Result<(), AttributeError> {
        match attribute {
            InstanceAttribute::Color(c) => match self.color.as_mut() {
                Some(slot) => *slot = c,
                None => return Err(AttributeError::UnknownAttribute { name: "color" }),
            },
            InstanceAttribute::Show(s) => match self.show.as_mut() {
                Some(slot) => *slot = s,
                None => return Err(AttributeError::UnknownAttribute { name: "show" }),
            },
        }
        Ok(())
    }
}

/// Batched GPU primitive. Mutable only once its upload completed.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryPrimitive {
    pub instances: Vec<GeometryInstance>,
    pub clamp_to_ground: bool,
    pub show: bool,
    readiness: Readiness,
    destroyed: bool,
}

impl GeometryPrimitive {
    pub fn new(instances: Vec<GeometryInstance>, clamp_to_ground: bool) -> Self {
        Self {
            instances,
            clamp_to_ground,
            show: true,
            readiness: Readiness::Pending {
                frames_remaining: 0,
            },
            destroyed: false,
        }
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn is_ready(&self) -> bool {
        !self.destroyed && self.readiness == Readiness::Ready
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn set_instance_attribute(
        &mut self,
        index: usize,
        attribute: InstanceAttribute,
    ) -> Result<(), AttributeError> {
        if self.destroyed {
            return Err(AttributeError::Destroyed);
        }
        if self.readiness != Readiness::Ready {
            return Err(AttributeError::NotReady);
        }
        self.instances
            .get_mut(index)
            .ok_or(AttributeError::NoSuchInstance { index })?
            .set(attribute)
    }

    pub(crate) fn begin_upload(&mut self, latency_frames: u32) {
        self.readiness = if latency_frames == 0 {
            Readiness::Ready
        } else {
            Readiness::Pending {
                frames_remaining: latency_frames,
            }
        };
    }

    pub(crate) fn advance_upload(&mut self) {
        if let Readiness::Pending { frames_remaining } = self.readiness {
            self.readiness = if frames_remaining <= 1 {
                Readiness::Ready
            } else {
                Readiness::Pending {
                    frames_remaining: frames_remaining - 1,
                }
            };
        }
    }

    pub(crate) fn destroy(&mut self) {
        self.destroyed = true;
    }
}

/// Several primitives drawn, shown and uploaded as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveGroup {
    pub primitives: Vec<GeometryPrimitive>,
    pub show: bool,
}

impl PrimitiveGroup {
    pub fn new(primitives: Vec<GeometryPrimitive>) -> Self {
        Self {
            primitives,
            show: true,
        }
    }
}

/// Everything a collection can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Drawable {
    Billboard(Billboard),
    Label(Label),
    Polyline(Polyline),
    Primitive(GeometryPrimitive),
    Collection(PrimitiveGroup),
}

impl Drawable {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Drawable::Billboard(_) => PrimitiveKind::Billboard,
            Drawable::Label(_) => PrimitiveKind::Label,
            Drawable::Polyline(_) => PrimitiveKind::Polyline,
            Drawable::Primitive(_) => PrimitiveKind::Primitive,
            Drawable::Collection(_) => PrimitiveKind::PrimitiveCollection,
        }
    }

    pub fn show(&self) -> bool {
        match self {
            Drawable::Billboard(b) => b.show,
            Drawable::Label(l) => l.show,
            Drawable::Polyline(p) => p.show,
            Drawable::Primitive(p) => p.show,
            Drawable::Collection(g) => g.show,
        }
    }

    pub fn set_show(&mut self, show: bool) {
        match self {
            Drawable::Billboard(b) => b.show = show,
            Drawable::Label(l) => l.show = show,
            Drawable::Polyline(p) => p.show = show,
            Drawable::Primitive(p) => p.show = show,
            Drawable::Collection(g) => g.show = show,
        }
    }

    /// Billboards, labels and polylines are mutable as soon as they are added.
    pub fn is_ready(&self) -> bool {
        match self {
            Drawable::Primitive(p) => p.is_ready(),
            Drawable::Collection(g) => g.primitives.iter().all(GeometryPrimitive::is_ready),
            _ => true,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        match self {
            Drawable::Primitive(p) => p.is_destroyed(),
            Drawable::Collection(g) => g.primitives.iter().any(GeometryPrimitive::is_destroyed),
            _ => false,
        }
    }

    /// Whether the drawable belongs in the terrain-clamped pass.
    pub fn clamp_to_ground(&self) -> bool {
        match self {
            Drawable::Primitive(p) => p.clamp_to_ground,
            Drawable::Collection(g) => g.primitives.iter().any(|p| p.clamp_to_ground),
            Drawable::Billboard(b) => b.height_reference == HeightReference::ClampToGround,
            _ => false,
        }
    }

    pub fn eye_offset(&self) -> Option<&Rc<Vec3>> {
        match self {
            Drawable::Billboard(b) => Some(&b.eye_offset),
            Drawable::Label(l) => Some(&l.eye_offset),
            _ => None,
        }
    }

    pub fn set_eye_offset(&mut self, offset: &Rc<Vec3>) {
        match self {
            Drawable::Billboard(b) => b.eye_offset = Rc::clone(offset),
            Drawable::Label(l) => l.eye_offset = Rc::clone(offset),
            _ => {}
        }
    }

    /// Generic primitives batched by this drawable, in instance order.
    pub fn geometry_primitives_mut(&mut self) -> &mut [GeometryPrimitive] {
        match self {
            Drawable::Primitive(p) => std::slice::from_mut(p),
            Drawable::Collection(g) => &mut g.primitives,
            _ => &mut [],
        }
    }

    pub fn pick_ids(&self) -> Vec<PickId> {
        let primitives: &[GeometryPrimitive] = match self {
            Drawable::Primitive(p) => std::slice::from_ref(p),
            Drawable::Collection(g) => &g.primitives,
            _ => &[],
        };
        primitives
            .iter()
            .flat_map(|p| p.instances.iter().filter_map(|i| i.pick_id))
            .collect()
    }

    pub(crate) fn begin_upload(&mut self, latency_frames: u32) {
        for p in self.geometry_primitives_mut() {
            p.begin_upload(latency_frames);
        }
    }

    pub(crate) fn advance_upload(&mut self) {
        for p in self.geometry_primitives_mut() {
            p.advance_upload();
        }
    }

    pub(crate) fn destroy(&mut self) {
        for p in self.geometry_primitives_mut() {
            p.destroy();
        }
    }
}
