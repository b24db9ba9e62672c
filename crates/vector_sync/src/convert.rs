use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::TAU;
use std::rc::Rc;

use earcutr::earcut;
use foundation::color::Color;
use foundation::ids::{FeatureId, GeometryId, LayerId};
use foundation::math::{Geodetic, Vec3, surface_normal};
use layers::{
    AltitudeMode, CenterShape, Coordinate, EllipseParams, FeatureRef, Geometry, GeometryShape,
    Shape, Style, keys,
};
use scene::{
    Billboard, Drawable, GeometryInstance, GeometryPrimitive, HeightReference, IconCache,
    IconState, InstanceAttribute, Label, Polyline, PrimitiveGroup, PrimitiveKind, Scene,
};
use tracing::trace;

use crate::config::SyncConfig;
use crate::context::VectorContext;
use crate::error::RegistryError;
use crate::metadata::PrimitiveId;
use crate::update::{AttributeSet, should_update_primitive, update_primitive};

/// Icon used when a billboard's image failed to load.
pub const FALLBACK_ICON: &str = "builtin:circle";
/// Length of a line of bearing whose feature does not carry `lobLength`.
pub const DEFAULT_LOB_LENGTH_M: f64 = 10_000.0;

const ELLIPSE_SEGMENTS: usize = 64;
const CENTER_SEGMENTS: usize = 16;

/// Source-level state that changes how a feature is drawn.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct ConvertOptions {
    pub altitude_mode: AltitudeMode,
    pub shape: GeometryShape,
    pub center_shape: CenterShape,
    pub selected: bool,
}

impl ConvertOptions {
    /// The shape actually drawn: `Selected*` shapes only apply to selected
    /// features, everything else falls back to a point.
    pub fn effective_shape(&self) -> GeometryShape {
        match self.shape {
            GeometryShape::SelectedEllipse if self.selected => GeometryShape::Ellipse,
            GeometryShape::SelectedEllipseCenter if self.selected => GeometryShape::EllipseCenter,
            shape if shape.is_selected_variant() => GeometryShape::Point,
            shape => shape,
        }
    }
}

/// Turns features into drawables of a [`VectorContext`].
///
/// Converting the same inputs twice must leave the context as the first call
/// did: existing drawables are updated in place when their class allows it,
/// and drawables of geometries the feature no longer has are removed.
pub trait Converter {
    fn create_context(
        &mut self,
        layer: LayerId,
        scene: Rc<Scene>,
        config: &SyncConfig,
    ) -> VectorContext {
        VectorContext::new(layer, scene, config.retry.clone())
    }

    fn convert(
        &mut self,
        feature: &FeatureRef,
        geometry: &Geometry,
        style: &Style,
        options: &ConvertOptions,
        context: &mut VectorContext,
    ) -> Result<(), RegistryError>;

    /// Creates drawables whose inputs became available since the last call.
    ///
    /// Returns the features that gained drawables.
    fn flush_loaded(&mut self, _context: &mut VectorContext) -> Result<Vec<FeatureId>, RegistryError> {
        Ok(Vec::new())
    }

    /// Drops deferred work for a feature that left the model.
    fn forget(&mut self, _feature: FeatureId) {}

    /// Drops all deferred work, e.g. after the source was cleared.
    fn forget_all(&mut self) {}

    /// Whether creation is still outstanding for `feature`.
    fn has_pending(&self, _feature: FeatureId) -> bool {
        false
    }
}

#[derive(Debug)]
struct DeferredBillboard {
    feature: FeatureRef,
    geometry: Geometry,
    billboard: Billboard,
}

/// Default converter: billboards for points, polylines for lines and
/// lines of bearing, ground-clampable primitives for areas and ellipses,
/// labels for text.
///
/// Billboards whose icon is still loading are kept aside and created by
/// [`Converter::flush_loaded`].
#[derive(Debug, Default)]
pub struct FeatureConverter {
    icons: IconCache,
    deferred: BTreeMap<GeometryId, DeferredBillboard>,
}

impl FeatureConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn icons(&self) -> &IconCache {
        &self.icons
    }

    pub fn icons_mut(&mut self) -> &mut IconCache {
        &mut self.icons
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    fn convert_shape(
        &mut self,
        feature: &FeatureRef,
        geometry: &Geometry,
        style: &Style,
        options: &ConvertOptions,
        context: &mut VectorContext,
    ) -> Result<(), RegistryError> {
        let mode = options.altitude_mode;
        match geometry.shape() {
            Shape::Collection(children) => {
                for child in children {
                    self.convert_shape(feature, child, style, options, context)?;
                }
                Ok(())
            }
            Shape::Point(coord) => self.convert_point(feature, geometry, *coord, style, options, context),
            Shape::LineString(coords) => {
                let line = stroke_polyline(coords.iter().map(|c| position(*c, mode)).collect(), style);
                self.place_polyline(line, feature, geometry, context)
            }
            Shape::Polygon(rings) => {
                let built = polygon_drawable(rings, style, mode);
                self.place_primitive(built, feature, geometry, context)
            }
            Shape::Ellipse(params) => {
                let center = options.effective_shape().draws_center().then_some(options.center_shape);
                let built = ellipse_drawable(params, false, center, style, mode);
                self.place_primitive(built, feature, geometry, context)
            }
            Shape::Ellipsoid(params) => {
                let built = ellipse_drawable(params, true, None, style, mode);
                self.place_primitive(built, feature, geometry, context)
            }
            Shape::LineOfBearing {
                origin,
                bearing_deg,
                length_m,
            } => {
                let line = stroke_polyline(bearing_line(*origin, *bearing_deg, *length_m, mode), style);
                self.place_polyline(line, feature, geometry, context)
            }
        }
    }

    fn convert_point(
        &mut self,
        feature: &FeatureRef,
        geometry: &Geometry,
        coord: Coordinate,
        style: &Style,
        options: &ConvertOptions,
        context: &mut VectorContext,
    ) -> Result<(), RegistryError> {
        let shape = options.effective_shape();
        let mode = options.altitude_mode;

        if shape.is_ellipse_family()
            && let Some(params) = feature.ellipse_params()
        {
            self.deferred.remove(&geometry.id());
            let ellipsoid = shape == GeometryShape::Ellipsoid;
            let center = shape.draws_center().then_some(options.center_shape);
            let built = ellipse_drawable(&params, ellipsoid, center, style, mode);
            return self.place_primitive(built, feature, geometry, context);
        }

        if shape == GeometryShape::LineOfBearing
            && let Some(bearing) = feature.number(keys::BEARING)
        {
            self.deferred.remove(&geometry.id());
            let length = feature.number(keys::LOB_LENGTH).unwrap_or(DEFAULT_LOB_LENGTH_M);
            let line = stroke_polyline(bearing_line(coord, bearing, length, mode), style);
            return self.place_polyline(line, feature, geometry, context);
        }

        self.place_billboard(coord, style, mode, feature, geometry, context)
    }

    fn place_billboard(
        &mut self,
        coord: Coordinate,
        style: &Style,
        mode: AltitudeMode,
        feature: &FeatureRef,
        geometry: &Geometry,
        context: &mut VectorContext,
    ) -> Result<(), RegistryError> {
        let existing = context.get_primitive_for_geometry(geometry.id());
        let Some(icon) = &style.icon else {
            self.deferred.remove(&geometry.id());
            remove_existing(context, existing);
            return Ok(());
        };

        let mut billboard = Billboard::new(position(coord, mode), icon.src.clone());
        billboard.color = icon.color;
        billboard.scale = icon.scale;
        billboard.height_reference = height_reference(mode);

        match self.icons.request(&icon.src) {
            IconState::Pending => {
                remove_existing(context, existing);
                trace!("deferring billboard of {} until {} loads", feature.id(), icon.src);
                self.deferred.insert(
                    geometry.id(),
                    DeferredBillboard {
                        feature: Rc::clone(feature),
                        geometry: geometry.clone(),
                        billboard,
                    },
                );
                return Ok(());
            }
            IconState::Failed => billboard.image = FALLBACK_ICON.to_string(),
            IconState::Loaded => {}
        }
        self.deferred.remove(&geometry.id());

        if let Some(id) = existing
            && should_update_primitive(
                context,
                id,
                geometry,
                PrimitiveKind::Billboard,
                mode.is_clamped(),
            )
        {
            context.with_drawable_mut(id, |drawable| {
                if let Drawable::Billboard(b) = drawable {
                    b.image = billboard.image;
                    b.color = billboard.color;
                    b.scale = billboard.scale;
                }
            });
            return Ok(());
        }
        context.add_billboard(billboard, feature, geometry)?;
        Ok(())
    }

    fn place_polyline(
        &mut self,
        polyline: Option<Polyline>,
        feature: &FeatureRef,
        geometry: &Geometry,
        context: &mut VectorContext,
    ) -> Result<(), RegistryError> {
        let existing = context.get_primitive_for_geometry(geometry.id());
        let Some(polyline) = polyline else {
            remove_existing(context, existing);
            return Ok(());
        };
        if let Some(id) = existing
            && should_update_primitive(context, id, geometry, PrimitiveKind::Polyline, false)
        {
            context.with_drawable_mut(id, |drawable| {
                if let Drawable::Polyline(p) = drawable {
                    p.color = polyline.color;
                    p.width = polyline.width;
                }
            });
            return Ok(());
        }
        context.add_polyline(polyline, feature, geometry)?;
        Ok(())
    }

    fn place_primitive(
        &mut self,
        built: Option<(Drawable, AttributeSet)>,
        feature: &FeatureRef,
        geometry: &Geometry,
        context: &mut VectorContext,
    ) -> Result<(), RegistryError> {
        let existing = context.get_primitive_for_geometry(geometry.id());
        let Some((drawable, attributes)) = built else {
            remove_existing(context, existing);
            return Ok(());
        };
        if let Some(id) = existing
            && should_update_primitive(
                context,
                id,
                geometry,
                drawable.kind(),
                drawable.clamp_to_ground(),
            )
        {
            update_primitive(context, id, attributes);
            return Ok(());
        }
        context.add_primitive(drawable, feature, geometry)?;
        Ok(())
    }

    fn convert_label(
        &mut self,
        feature: &FeatureRef,
        geometry: &Geometry,
        style: &Style,
        mode: AltitudeMode,
        context: &mut VectorContext,
    ) -> Result<(), RegistryError> {
        let existing = context.get_label_for_geometry(geometry.id());
        let (Some(text), Some(anchor)) = (&style.text, geometry.anchor()) else {
            remove_existing(context, existing);
            return Ok(());
        };

        let mut label = Label::new(position(anchor, mode), text.text.clone());
        label.font = text.font.clone();
        label.fill_color = text.fill;
        label.outline_color = text.outline;
        label.outline_width = text.outline_width;

        if let Some(id) = existing
            && should_update_primitive(context, id, geometry, PrimitiveKind::Label, false)
        {
            context.with_drawable_mut(id, |drawable| {
                if let Drawable::Label(l) = drawable {
                    l.text = label.text;
                    l.font = label.font;
                    l.fill_color = label.fill_color;
                    l.outline_color = label.outline_color;
                    l.outline_width = label.outline_width;
                }
            });
            return Ok(());
        }
        context.add_label(label, feature, geometry)?;
        Ok(())
    }
}

impl Converter for FeatureConverter {
    fn convert(
        &mut self,
        feature: &FeatureRef,
        geometry: &Geometry,
        style: &Style,
        options: &ConvertOptions,
        context: &mut VectorContext,
    ) -> Result<(), RegistryError> {
        if feature.is_disposed() {
            return Ok(());
        }
        // Billboards still pending are queued again below if the geometry still needs them.
        self.forget(feature.id());
        self.convert_shape(feature, geometry, style, options, context)?;
        self.convert_label(feature, geometry, style, options.altitude_mode, context)?;

        let shapes: BTreeSet<GeometryId> = geometry.leaf_ids().into_iter().collect();
        let orphans = context.retain_geometries(feature.id(), &shapes, geometry.id());
        if orphans > 0 {
            trace!("removed {orphans} stale drawables of {}", feature.id());
        }
        Ok(())
    }

    fn flush_loaded(&mut self, context: &mut VectorContext) -> Result<Vec<FeatureId>, RegistryError> {
        let completed = self.icons.take_completed();
        if !completed.is_empty() {
            trace!("icons loaded: {}", completed.join(", "));
        }

        let settled: Vec<GeometryId> = self
            .deferred
            .iter()
            .filter(|(_, d)| self.icons.state(&d.billboard.image) != Some(IconState::Pending))
            .map(|(id, _)| *id)
            .collect();

        let mut features = Vec::new();
        for geometry_id in settled {
            let Some(mut deferred) = self.deferred.remove(&geometry_id) else {
                continue;
            };
            if deferred.feature.is_disposed() {
                trace!("dropping billboard of disposed {}", deferred.feature.id());
                continue;
            }
            let current = deferred
                .feature
                .geometry()
                .find(geometry_id)
                .map(Geometry::revision);
            if current != Some(deferred.geometry.revision()) {
                trace!("dropping billboard of {}: geometry changed", deferred.feature.id());
                continue;
            }
            if self.icons.state(&deferred.billboard.image) == Some(IconState::Failed) {
                deferred.billboard.image = FALLBACK_ICON.to_string();
            }
            let added =
                context.add_billboard(deferred.billboard, &deferred.feature, &deferred.geometry)?;
            if added.is_some() {
                features.push(deferred.feature.id());
            }
        }
        features.sort();
        features.dedup();
        Ok(features)
    }

    fn forget(&mut self, feature: FeatureId) {
        self.deferred.retain(|_, d| d.feature.id() != feature);
    }

    fn forget_all(&mut self) {
        self.deferred.clear();
    }

    fn has_pending(&self, feature: FeatureId) -> bool {
        self.deferred.values().any(|d| d.feature.id() == feature)
    }
}

fn remove_existing(context: &mut VectorContext, existing: Option<PrimitiveId>) {
    if let Some(id) = existing {
        context.remove_primitive(id);
    }
}

fn height_reference(mode: AltitudeMode) -> HeightReference {
    match mode {
        AltitudeMode::Absolute => HeightReference::None,
        AltitudeMode::RelativeToGround => HeightReference::RelativeToGround,
        AltitudeMode::ClampToGround => HeightReference::ClampToGround,
    }
}

fn position(coord: Coordinate, mode: AltitudeMode) -> Vec3 {
    let alt = if mode.is_clamped() { 0.0 } else { coord[2] };
    Geodetic::from_lon_lat_deg([coord[0], coord[1], alt]).to_ecef()
}

fn offset_coordinate(origin: Coordinate, bearing_rad: f64, distance_m: f64) -> Coordinate {
    Geodetic::from_lon_lat_deg(origin)
        .destination(bearing_rad, distance_m)
        .to_lon_lat_deg()
}

fn stroke_polyline(positions: Vec<Vec3>, style: &Style) -> Option<Polyline> {
    let stroke = style.stroke.as_ref()?;
    if positions.len() < 2 {
        return None;
    }
    Some(Polyline::new(positions, stroke.width, stroke.color))
}

fn bearing_line(origin: Coordinate, bearing_deg: f64, length_m: f64, mode: AltitudeMode) -> Vec<Vec3> {
    let end = offset_coordinate(origin, bearing_deg.to_radians(), length_m);
    vec![position(origin, mode), position(end, mode)]
}

fn solid(positions: Vec<Vec3>, indices: Vec<u32>, color: Color, clamp: bool) -> GeometryPrimitive {
    GeometryPrimitive::new(
        vec![GeometryInstance::new(positions, indices)
            .with_color(color)
            .with_show(true)],
        clamp,
    )
}

/// One primitive, or a group when there are several; attributes follow the
/// same order.
fn assemble(parts: Vec<(GeometryPrimitive, Color)>) -> Option<(Drawable, AttributeSet)> {
    let attributes: AttributeSet = parts
        .iter()
        .map(|(_, color)| vec![InstanceAttribute::Color(*color)])
        .collect();
    let mut primitives: Vec<GeometryPrimitive> = parts.into_iter().map(|(p, _)| p).collect();
    let drawable = match primitives.len() {
        0 => return None,
        1 => Drawable::Primitive(primitives.remove(0)),
        _ => Drawable::Collection(PrimitiveGroup::new(primitives)),
    };
    Some((drawable, attributes))
}

fn polygon_drawable(
    rings: &[Vec<Coordinate>],
    style: &Style,
    mode: AltitudeMode,
) -> Option<(Drawable, AttributeSet)> {
    let clamp = mode.is_clamped();
    let rings: Vec<Vec<Vec3>> = rings
        .iter()
        .map(|ring| without_closing_duplicate(ring.iter().map(|c| position(*c, mode)).collect()))
        .collect();

    let mut parts = Vec::new();
    if let Some(fill) = style.fill
        && let Some((vertices, indices)) = triangulate_rings(&rings)
    {
        parts.push((solid(vertices, indices, fill, clamp), fill));
    }
    if let Some(stroke) = &style.stroke {
        let (vertices, indices) = ring_outline(&rings);
        if !indices.is_empty() {
            parts.push((solid(vertices, indices, stroke.color, clamp), stroke.color));
        }
    }
    assemble(parts)
}

fn ellipse_drawable(
    params: &EllipseParams,
    ellipsoid: bool,
    center: Option<CenterShape>,
    style: &Style,
    mode: AltitudeMode,
) -> Option<(Drawable, AttributeSet)> {
    // An ellipsoid is a volume and never drapes over terrain.
    let mode = if ellipsoid && mode.is_clamped() {
        AltitudeMode::Absolute
    } else {
        mode
    };
    let clamp = mode.is_clamped();
    let fill = style
        .fill
        .or_else(|| style.stroke.as_ref().map(|s| s.color))?;

    let ring: Vec<Vec3> = ellipse_ring(params)
        .into_iter()
        .map(|c| position(c, mode))
        .collect();
    let (vertices, indices) = fan(position(params.center, mode), ring);
    let mut parts = vec![(solid(vertices, indices, fill, clamp), fill)];

    if let Some(center) = center {
        let marker = style.stroke.as_ref().map(|s| s.color).unwrap_or(Color::WHITE);
        let radius = (params.semi_minor_m * 0.05).max(1.0);
        let ring: Vec<Vec3> = center_ring(params.center, center, radius)
            .into_iter()
            .map(|c| position(c, mode))
            .collect();
        let (vertices, indices) = fan(position(params.center, mode), ring);
        parts.push((solid(vertices, indices, marker, clamp), marker));
    }
    assemble(parts)
}

/// Boundary of an ellipse, counter-clockwise from the end of its major axis.
fn ellipse_ring(params: &EllipseParams) -> Vec<Coordinate> {
    let orientation = params.orientation_deg.to_radians();
    (0..ELLIPSE_SEGMENTS)
        .map(|i| {
            let t = TAU * i as f64 / ELLIPSE_SEGMENTS as f64;
            let along = params.semi_major_m * t.cos();
            let across = params.semi_minor_m * t.sin();
            let distance = along.hypot(across);
            let bearing = orientation + across.atan2(along);
            offset_coordinate(params.center, bearing, distance)
        })
        .collect()
}

fn center_ring(center: Coordinate, shape: CenterShape, radius_m: f64) -> Vec<Coordinate> {
    match shape {
        CenterShape::Circle => (0..CENTER_SEGMENTS)
            .map(|i| {
                let bearing = TAU * i as f64 / CENTER_SEGMENTS as f64;
                offset_coordinate(center, bearing, radius_m)
            })
            .collect(),
        CenterShape::Square => [45.0f64, 135.0, 225.0, 315.0]
            .into_iter()
            .map(|deg| offset_coordinate(center, deg.to_radians(), radius_m * std::f64::consts::SQRT_2))
            .collect(),
    }
}

/// Triangle fan around `center`; the ring is closed implicitly.
fn fan(center: Vec3, ring: Vec<Vec3>) -> (Vec<Vec3>, Vec<u32>) {
    let n = ring.len() as u32;
    let mut vertices = Vec::with_capacity(ring.len() + 1);
    vertices.push(center);
    vertices.extend(ring);
    let indices = (0..n)
        .flat_map(|i| [0, 1 + i, 1 + (i + 1) % n])
        .collect();
    (vertices, indices)
}

/// Line-list indices for every ring, each closed back to its first vertex.
fn ring_outline(rings: &[Vec<Vec3>]) -> (Vec<Vec3>, Vec<u32>) {
    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    for ring in rings.iter().filter(|r| r.len() >= 2) {
        let base = vertices.len() as u32;
        let n = ring.len() as u32;
        vertices.extend(ring.iter().copied());
        for i in 0..n {
            indices.push(base + i);
            indices.push(base + (i + 1) % n);
        }
    }
    (vertices, indices)
}

/// Triangulates an outer ring and its holes in the tangent plane at the
/// outer ring's centroid.
fn triangulate_rings(rings: &[Vec<Vec3>]) -> Option<(Vec<Vec3>, Vec<u32>)> {
    let outer = rings.first()?;
    if outer.len() < 3 {
        return None;
    }

    let origin = centroid(outer);
    let n = surface_normal(origin);
    let up = if n.z.abs() < 0.99 {
        Vec3::new(0.0, 0.0, 1.0)
    } else {
        Vec3::new(0.0, 1.0, 0.0)
    };
    let east = up.cross(n).normalize();
    let north = n.cross(east);

    let mut vertices: Vec<Vec3> = Vec::new();
    let mut coords_2d: Vec<f64> = Vec::new();
    let mut hole_indices: Vec<usize> = Vec::new();
    for (ring_i, ring) in rings.iter().enumerate() {
        if ring.len() < 3 {
            continue;
        }
        if ring_i > 0 {
            hole_indices.push(vertices.len());
        }
        for p in ring {
            let v = *p - origin;
            coords_2d.push(v.dot(east));
            coords_2d.push(v.dot(north));
            vertices.push(*p);
        }
    }

    let indices = earcut(&coords_2d, &hole_indices, 2).ok()?;
    if indices.is_empty() {
        return None;
    }
    Some((vertices, indices.into_iter().map(|i| i as u32).collect()))
}

fn without_closing_duplicate(mut points: Vec<Vec3>) -> Vec<Vec3> {
    let closed = match (points.first(), points.last()) {
        (Some(first), Some(last)) => points.len() >= 2 && (*first - *last).length() < 1e-9,
        _ => false,
    };
    if closed {
        points.pop();
    }
    points
}

fn centroid(vertices: &[Vec3]) -> Vec3 {
    let sum = vertices.iter().fold(Vec3::ZERO, |acc, v| acc + *v);
    sum.scale(1.0 / vertices.len() as f64)
}
