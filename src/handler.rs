/// The geometry event protocol.
///
/// Decoded shapes are not returned as objects; they are streamed into a
/// `GeometryHandler`, one callback per structural event:
///
/// ```text
/// vector_start
///   feature_start
///     geometry_start [geometry_start coord* geometry_end]* coord*
///     geometry_end
///   feature_end
///   ... more features ...
/// vector_end
/// ```
///
/// Every callback (except `vector_end`) returns a `HandlerResult`, so the
/// handler can skip the rest of a feature or stop the whole vector at any
/// point. `vector_end` is always delivered, even after an abort.
use std::fmt;

/// What the handler wants done next.
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum HandlerResult {
    Continue,
    /// Skip the remaining events of the current feature; continue with the
    /// next one.
    AbortFeature,
    /// Stop the vector. `vector_end` still fires.
    Abort,
}

/// The well-known vocabulary the shapefile type codes translate into.
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum GeometryType {
    /// Type unknown up front (a file of Null shapes).
    Geometry,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

/// Coordinate dimensionality.
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum Dims {
    Unknown,
    Xy,
    Xym,
    Xyz,
    Xyzm,
}

impl Dims {
    pub fn has_z(&self) -> bool {
        match *self {
            Dims::Xyz | Dims::Xyzm => true,
            _ => false,
        }
    }

    pub fn has_m(&self) -> bool {
        match *self {
            Dims::Xym | Dims::Xyzm => true,
            _ => false,
        }
    }

    /// The same dimensionality minus the measure axis.
    pub fn without_m(&self) -> Dims {
        match *self {
            Dims::Xym => Dims::Xy,
            Dims::Xyzm => Dims::Xyz,
            other => other,
        }
    }
}

/// Metadata held fixed for a whole vector run.
#[derive(Debug,Clone)]
pub struct VectorMeta {
    pub geometry_type: GeometryType,
    /// How many features the run will visit.
    pub size: usize,
    pub dims: Dims,
    /// xmin, ymin, zmin, mmin from the file header.
    pub bounds_min: [f64; 4],
    /// xmax, ymax, zmax, mmax from the file header.
    pub bounds_max: [f64; 4],
}

/// Metadata for one geometry (or one part of a multi-part geometry).
#[derive(Debug,Clone,Copy)]
pub struct GeometryMeta {
    pub geometry_type: GeometryType,
    /// Points for a point-ish geometry, parts for a multi-part one.
    pub size: usize,
    pub dims: Dims,
}

#[derive(Debug,Clone,Copy,PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    pub m: Option<f64>,
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Receives the event stream. All methods default to `Continue` (and
/// `error` to `Abort`), so a handler only implements what it cares about.
pub trait GeometryHandler {
    fn vector_start(&mut self, _meta: &VectorMeta) -> HandlerResult {
        HandlerResult::Continue
    }

    fn feature_start(&mut self, _meta: &VectorMeta, _feature_index: usize) -> HandlerResult {
        HandlerResult::Continue
    }

    /// `part_id` is `None` for a feature's outermost geometry and the part
    /// index for nested parts (rings, linestrings, multipoint members).
    fn geometry_start(&mut self, _meta: &GeometryMeta, _part_id: Option<usize>) -> HandlerResult {
        HandlerResult::Continue
    }

    fn coord(&mut self, _meta: &GeometryMeta, _coord: Coord, _coord_index: usize) -> HandlerResult {
        HandlerResult::Continue
    }

    fn geometry_end(&mut self, _meta: &GeometryMeta, _part_id: Option<usize>) -> HandlerResult {
        HandlerResult::Continue
    }

    fn feature_end(&mut self, _meta: &VectorMeta, _feature_index: usize) -> HandlerResult {
        HandlerResult::Continue
    }

    fn vector_end(&mut self, _meta: &VectorMeta) {}

    /// A feature could not be read (null id, id out of range, NULL shape,
    /// corrupt record). Return `Abort` to stop the vector or anything else
    /// to skip the feature.
    fn error(&mut self, _feature_index: usize, _message: &str) -> HandlerResult {
        HandlerResult::Abort
    }
}
