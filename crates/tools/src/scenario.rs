//! JSON description of a replay: the layer, the scene, the initial features and
//! a list of steps applied one after the other.

use std::collections::BTreeMap;

use foundation::color::Color;
use foundation::ids::{FeatureId, GeometryId};
use layers::{
    AltitudeMode, CenterShape, EllipseParams, Feature, FeatureRef, Geometry, GeometryShape,
    PropertyValue, Shape, Style, Text,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub layer: LayerSpec,
    #[serde(default)]
    pub upload_latency_frames: u32,
    #[serde(default)]
    pub features: Vec<FeatureSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayerSpec {
    #[serde(default = "default_layer_id")]
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default = "default_true")]
    pub labels_visible: bool,
}

impl Default for LayerSpec {
    fn default() -> Self {
        Self {
            id: default_layer_id(),
            title: String::new(),
            visible: true,
            opacity: default_opacity(),
            labels_visible: true,
        }
    }
}

fn default_layer_id() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_opacity() -> f32 {
    1.0
}

/// `[lon, lat]` or `[lon, lat, alt]`.
pub type Position = Vec<f64>;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeometrySpec {
    Point {
        coordinates: Position,
    },
    LineString {
        coordinates: Vec<Position>,
    },
    Polygon {
        coordinates: Vec<Vec<Position>>,
    },
    Ellipse {
        center: Position,
        semi_major_m: f64,
        semi_minor_m: f64,
        #[serde(default)]
        orientation_deg: f64,
    },
    Ellipsoid {
        center: Position,
        semi_major_m: f64,
        semi_minor_m: f64,
        #[serde(default)]
        orientation_deg: f64,
    },
    LineOfBearing {
        origin: Position,
        bearing_deg: f64,
        length_m: f64,
    },
    Collection {
        geometries: Vec<GeometrySpec>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StyleSpec {
    /// RGBA in `0..=1`.
    pub fill: Option<[f32; 4]>,
    pub stroke: Option<[f32; 4]>,
    pub stroke_width: Option<f32>,
    pub icon: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureSpec {
    pub id: u64,
    pub geometry: GeometrySpec,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    pub style: Option<StyleSpec>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AltitudeSpec {
    Absolute,
    RelativeToGround,
    ClampToGround,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeSpec {
    Default,
    Point,
    Ellipse,
    EllipseCenter,
    Ellipsoid,
    LineOfBearing,
    SelectedEllipse,
    SelectedEllipseCenter,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CenterSpec {
    Circle,
    Square,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Add { features: Vec<FeatureSpec> },
    Remove { ids: Vec<u64> },
    Update { feature: FeatureSpec },
    Clear,
    Visibility { ids: Vec<u64>, shown: bool },
    Animate { enabled: bool },
    /// Feature id (as a string key) to shown flag.
    Frame { shown: BTreeMap<String, bool> },
    Altitude { mode: AltitudeSpec },
    Shape { shape: ShapeSpec },
    CenterShape { shape: CenterSpec },
    Highlight { ids: Vec<u64> },
    Select { ids: Vec<u64> },
    LayerVisible { visible: bool },
    Opacity { value: f32 },
    Labels { visible: bool },
    Camera { distance_m: f64 },
    IconLoaded { src: String },
    IconFailed { src: String },
    /// Renders frames and advances time by `ms` per frame, running due retries.
    Advance {
        #[serde(default = "default_frames")]
        frames: u32,
        #[serde(default)]
        ms: u64,
    },
}

fn default_frames() -> u32 {
    1
}

fn coordinate(p: &[f64]) -> [f64; 3] {
    [
        p.first().copied().unwrap_or(0.0),
        p.get(1).copied().unwrap_or(0.0),
        p.get(2).copied().unwrap_or(0.0),
    ]
}

fn color(rgba: [f32; 4]) -> Color {
    Color::from_array(rgba)
}

impl GeometrySpec {
    pub fn to_shape(&self, next_id: &mut u64) -> Shape {
        match self {
            GeometrySpec::Point { coordinates } => Shape::Point(coordinate(coordinates)),
            GeometrySpec::LineString { coordinates } => {
                Shape::LineString(coordinates.iter().map(|p| coordinate(p)).collect())
            }
            GeometrySpec::Polygon { coordinates } => Shape::Polygon(
                coordinates
                    .iter()
                    .map(|ring| ring.iter().map(|p| coordinate(p)).collect())
                    .collect(),
            ),
            GeometrySpec::Ellipse {
                center,
                semi_major_m,
                semi_minor_m,
                orientation_deg,
            } => Shape::Ellipse(EllipseParams {
                center: coordinate(center),
                semi_major_m: *semi_major_m,
                semi_minor_m: *semi_minor_m,
                orientation_deg: *orientation_deg,
            }),
            GeometrySpec::Ellipsoid {
                center,
                semi_major_m,
                semi_minor_m,
                orientation_deg,
            } => Shape::Ellipsoid(EllipseParams {
                center: coordinate(center),
                semi_major_m: *semi_major_m,
                semi_minor_m: *semi_minor_m,
                orientation_deg: *orientation_deg,
            }),
            GeometrySpec::LineOfBearing {
                origin,
                bearing_deg,
                length_m,
            } => Shape::LineOfBearing {
                origin: coordinate(origin),
                bearing_deg: *bearing_deg,
                length_m: *length_m,
            },
            GeometrySpec::Collection { geometries } => Shape::Collection(
                geometries
                    .iter()
                    .map(|g| {
                        let shape = g.to_shape(next_id);
                        *next_id += 1;
                        Geometry::new(GeometryId(*next_id), shape)
                    })
                    .collect(),
            ),
        }
    }
}

impl StyleSpec {
    pub fn to_style(&self) -> Style {
        let mut style = Style::default();
        if let Some(fill) = self.fill {
            style.fill = Some(color(fill));
        }
        if let Some(stroke) = style.stroke.as_mut() {
            if let Some(rgba) = self.stroke {
                stroke.color = color(rgba);
            }
            if let Some(width) = self.stroke_width {
                stroke.width = width;
            }
        }
        if let Some(icon) = &self.icon {
            style = style.with_icon(icon.clone());
        }
        if let Some(text) = &self.text {
            style = style.with_text(Text::new(text.clone()));
        }
        style
    }
}

/// Child geometries of collections get ids above this base so they never
/// collide with feature-level geometry ids.
const CHILD_GEOMETRY_BASE: u64 = 1 << 32;

impl FeatureSpec {
    /// Builds the feature. The root geometry shares the feature's numeric id.
    pub fn to_feature(&self) -> FeatureRef {
        let mut next_child = CHILD_GEOMETRY_BASE + self.id * 1024;
        let shape = self.geometry.to_shape(&mut next_child);
        let feature = Feature::new(FeatureId(self.id), Geometry::new(GeometryId(self.id), shape));
        for (key, value) in &self.properties {
            let value = match value {
                serde_json::Value::Bool(b) => PropertyValue::Bool(*b),
                serde_json::Value::Number(n) => match n.as_f64() {
                    Some(n) => PropertyValue::Number(n),
                    None => continue,
                },
                serde_json::Value::String(s) => PropertyValue::Text(s.clone()),
                _ => continue,
            };
            feature.set_property(key.clone(), value);
        }
        feature.set_style(self.style.as_ref().map(StyleSpec::to_style));
        feature
    }
}

impl From<AltitudeSpec> for AltitudeMode {
    fn from(spec: AltitudeSpec) -> Self {
        match spec {
            AltitudeSpec::Absolute => AltitudeMode::Absolute,
            AltitudeSpec::RelativeToGround => AltitudeMode::RelativeToGround,
            AltitudeSpec::ClampToGround => AltitudeMode::ClampToGround,
        }
    }
}

impl From<ShapeSpec> for GeometryShape {
    fn from(spec: ShapeSpec) -> Self {
        match spec {
            ShapeSpec::Default => GeometryShape::Default,
            ShapeSpec::Point => GeometryShape::Point,
            ShapeSpec::Ellipse => GeometryShape::Ellipse,
            ShapeSpec::EllipseCenter => GeometryShape::EllipseCenter,
            ShapeSpec::Ellipsoid => GeometryShape::Ellipsoid,
            ShapeSpec::LineOfBearing => GeometryShape::LineOfBearing,
            ShapeSpec::SelectedEllipse => GeometryShape::SelectedEllipse,
            ShapeSpec::SelectedEllipseCenter => GeometryShape::SelectedEllipseCenter,
        }
    }
}

impl From<CenterSpec> for CenterShape {
    fn from(spec: CenterSpec) -> Self {
        match spec {
            CenterSpec::Circle => CenterShape::Circle,
            CenterSpec::Square => CenterShape::Square,
        }
    }
}
