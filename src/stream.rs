/// Walks a sequence of shape ids and emits each geometry through the
/// `GeometryHandler` protocol.
///
/// The geometry type and dimensionality are fixed once from the file
/// header's shape type code; measure presence is additionally re-checked
/// per feature, because the format only marks a missing M axis with a
/// "no data" sentinel in the coordinates themselves.
use std::io;
use std::path::Path;
use std::slice;

use handler::{Coord, Dims, GeometryHandler, GeometryMeta, GeometryType, HandlerResult, VectorMeta};
use shp::{PolyParts, ShapePayload, ShapeRecord, ShapeType, ShpError, ShpPoint, ShpReader};

/// Propagates any non-`Continue` signal to the caller of the enclosing
/// `fn(...) -> HandlerResult`.
macro_rules! signal {
    ($expr:expr) => {
        match $expr {
            HandlerResult::Continue => {}
            other => return other,
        }
    };
}

fn geometry_type_for(shape_type: ShapeType) -> GeometryType {
    match shape_type {
        ShapeType::Null => GeometryType::Geometry,
        ShapeType::Point | ShapeType::PointM | ShapeType::PointZ => GeometryType::Point,
        ShapeType::PolyLine | ShapeType::PolyLineM | ShapeType::PolyLineZ => {
            GeometryType::MultiLineString
        }
        ShapeType::Polygon | ShapeType::PolygonM | ShapeType::PolygonZ => GeometryType::Polygon,
        ShapeType::MultiPoint | ShapeType::MultiPointM | ShapeType::MultiPointZ => {
            GeometryType::MultiPoint
        }
        ShapeType::MultiPatch => GeometryType::MultiPolygon,
    }
}

fn dims_for(shape_type: ShapeType) -> Dims {
    match shape_type {
        ShapeType::Null | ShapeType::MultiPatch => Dims::Unknown,
        _ => {
            if shape_type.has_z() {
                Dims::Xyzm
            } else if shape_type.has_m() {
                Dims::Xym
            } else {
                Dims::Xy
            }
        }
    }
}

/// Dimensions for one feature: the vector's dims, minus the measure axis
/// when this feature's coordinates carry no real measures.
fn feature_dims(vector_dims: Dims, points: &[ShpPoint]) -> Dims {
    if !vector_dims.has_m() {
        return vector_dims;
    }

    match points.first() {
        Some(point) if point.m.is_some() => vector_dims,
        _ => vector_dims.without_m(),
    }
}

fn coord_for(point: &ShpPoint, dims: Dims) -> Coord {
    Coord {
        x: point.x,
        y: point.y,
        z: if dims.has_z() { point.z } else { None },
        m: if dims.has_m() { point.m } else { None },
    }
}

fn emit_point<H: GeometryHandler>(
    handler: &mut H,
    vector_meta: &VectorMeta,
    feature_index: usize,
    point: &ShpPoint,
) -> HandlerResult {
    let dims = feature_dims(vector_meta.dims, slice::from_ref(point));
    let meta = GeometryMeta {
        geometry_type: GeometryType::Point,
        size: 1,
        dims: dims,
    };

    signal!(handler.feature_start(vector_meta, feature_index));
    signal!(handler.geometry_start(&meta, None));
    signal!(handler.coord(&meta, coord_for(point, dims), 0));
    signal!(handler.geometry_end(&meta, None));
    signal!(handler.feature_end(vector_meta, feature_index));
    HandlerResult::Continue
}

fn emit_multi_point<H: GeometryHandler>(
    handler: &mut H,
    vector_meta: &VectorMeta,
    feature_index: usize,
    points: &[ShpPoint],
) -> HandlerResult {
    let dims = feature_dims(vector_meta.dims, points);
    let meta = GeometryMeta {
        geometry_type: GeometryType::MultiPoint,
        size: points.len(),
        dims: dims,
    };
    let part_meta = GeometryMeta {
        geometry_type: GeometryType::Point,
        size: 1,
        dims: dims,
    };

    signal!(handler.feature_start(vector_meta, feature_index));
    signal!(handler.geometry_start(&meta, None));
    for (part_id, point) in points.iter().enumerate() {
        signal!(handler.geometry_start(&part_meta, Some(part_id)));
        signal!(handler.coord(&part_meta, coord_for(point, dims), part_id));
        signal!(handler.geometry_end(&part_meta, Some(part_id)));
    }
    signal!(handler.geometry_end(&meta, None));
    signal!(handler.feature_end(vector_meta, feature_index));
    HandlerResult::Continue
}

fn emit_poly<H: GeometryHandler>(
    handler: &mut H,
    vector_meta: &VectorMeta,
    feature_index: usize,
    poly: &PolyParts,
    outer_type: GeometryType,
) -> HandlerResult {
    let dims = feature_dims(vector_meta.dims, &poly.points);
    let ranges = poly.part_ranges();
    let meta = GeometryMeta {
        geometry_type: outer_type,
        size: ranges.len(),
        dims: dims,
    };

    signal!(handler.feature_start(vector_meta, feature_index));
    signal!(handler.geometry_start(&meta, None));

    let mut coord_index = 0;
    for (part_id, &(start, end)) in ranges.iter().enumerate() {
        let part_meta = GeometryMeta {
            geometry_type: GeometryType::LineString,
            size: end - start,
            dims: dims,
        };

        signal!(handler.geometry_start(&part_meta, Some(part_id)));
        for point in &poly.points[start..end] {
            signal!(handler.coord(&part_meta, coord_for(point, dims), coord_index));
            coord_index += 1;
        }
        signal!(handler.geometry_end(&part_meta, Some(part_id)));
    }

    signal!(handler.geometry_end(&meta, None));
    signal!(handler.feature_end(vector_meta, feature_index));
    HandlerResult::Continue
}

fn emit_feature<H: GeometryHandler>(
    handler: &mut H,
    vector_meta: &VectorMeta,
    feature_index: usize,
    record: &ShapeRecord,
) -> HandlerResult {
    match record.payload {
        ShapePayload::Null => handler.error(
            feature_index,
            &format!("Record number {} is a NULL shape", record.record_number),
        ),
        ShapePayload::MultiPatch { .. } => handler.error(
            feature_index,
            &format!(
                "Record number {} is a MultiPatch, which can't be streamed",
                record.record_number
            ),
        ),
        ShapePayload::Point(ref point) => emit_point(handler, vector_meta, feature_index, point),
        ShapePayload::MultiPoint(ref points) => {
            emit_multi_point(handler, vector_meta, feature_index, points)
        }
        ShapePayload::PolyLine(ref poly) => emit_poly(
            handler,
            vector_meta,
            feature_index,
            poly,
            GeometryType::MultiLineString,
        ),
        ShapePayload::Polygon(ref poly) => emit_poly(
            handler,
            vector_meta,
            feature_index,
            poly,
            GeometryType::Polygon,
        ),
    }
}

fn emit_features<R: io::Read + io::Seek, H: GeometryHandler>(
    reader: &mut ShpReader<R>,
    n_features: u32,
    shape_ids: &[Option<u32>],
    vector_meta: &VectorMeta,
    handler: &mut H,
) {
    for (feature_index, id) in shape_ids.iter().enumerate() {
        // Ids are 1-based at this boundary; 0-based inside the readers.
        let shape_id = match *id {
            None => {
                match handler.error(feature_index, "shape id is null") {
                    HandlerResult::Abort => break,
                    _ => continue,
                }
            }
            Some(id) if id == 0 || id > n_features => {
                let message = format!("shape id {} is out of range 1..{}", id, n_features);
                match handler.error(feature_index, &message) {
                    HandlerResult::Abort => break,
                    _ => continue,
                }
            }
            Some(id) => id - 1,
        };

        let record = match reader.read_record_at(shape_id) {
            Err(err) => {
                debug!("skipping shape id {}: {}", shape_id + 1, err);
                match handler.error(feature_index, &format!("{}", err)) {
                    HandlerResult::Abort => break,
                    _ => continue,
                }
            }
            Ok(record) => record,
        };

        if emit_feature(handler, vector_meta, feature_index, &record) == HandlerResult::Abort {
            break;
        }
    }
}

/// Streams the records named by `shape_ids` (1-based; `None` for null)
/// through `handler`.
///
/// `vector_end` is delivered exactly once on every path out of this
/// function, abort included; the open files are released by scope.
pub fn stream_geometry_records<R: io::Read + io::Seek, H: GeometryHandler>(
    reader: &mut ShpReader<R>,
    shape_ids: &[Option<u32>],
    handler: &mut H,
) -> Result<(), ShpError> {
    let n_features = reader.n_records()?;

    let bounds = reader.header.bounds;
    let vector_meta = VectorMeta {
        geometry_type: geometry_type_for(reader.header.shape_type),
        size: shape_ids.len(),
        dims: dims_for(reader.header.shape_type),
        bounds_min: [bounds.x_min, bounds.y_min, bounds.z_min, bounds.m_min],
        bounds_max: [bounds.x_max, bounds.y_max, bounds.z_max, bounds.m_max],
    };

    if handler.vector_start(&vector_meta) != HandlerResult::Abort {
        emit_features(reader, n_features, shape_ids, &vector_meta, handler);
    }

    handler.vector_end(&vector_meta);
    Ok(())
}

/// Opens `path` and streams the records named by `shape_ids` (1-based)
/// through `handler`. See `stream_geometry_records()`.
pub fn stream_geometry<H: GeometryHandler>(
    path: &Path,
    shape_ids: &[Option<u32>],
    handler: &mut H,
) -> Result<(), ShpError> {
    let mut reader = ShpReader::open(path)?;
    stream_geometry_records(&mut reader, shape_ids, handler)
}
