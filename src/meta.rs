/// The path-in, records-out operations most callers want: file and
/// geometry metadata, raw ".shx" lookups, column metadata and typed table
/// decoding.
///
/// Conventions at this boundary: geometry operations take 1-based shape
/// ids (`None` for null), and a null or out-of-range id produces an
/// all-null row rather than an error; ".shx" operations speak the index's
/// own 0-based ids, and an unresolvable id produces a null pair.
use std::path::Path;

use collect;
use collect::DecodedTable;
use dbf::{DbfError, DbfFieldInfo, DbfTable};
use shp::{ShapePayload, ShapeType, ShpError, ShpReader};
use shx::{ShxError, ShxIndex, ShxLookup, ShxRecord};

#[derive(Debug,Clone)]
pub struct FileMeta {
    pub shape_type: ShapeType,
    pub n_features: u32,
    /// xmin, ymin, zmin, mmin from the file header.
    pub bounds_min: [f64; 4],
    /// xmax, ymax, zmax, mmax from the file header.
    pub bounds_max: [f64; 4],
}

/// Header-level metadata: shape type, feature count, bounds.
pub fn read_file_meta(path: &Path) -> Result<FileMeta, ShpError> {
    let mut reader = ShpReader::open(path)?;
    let n_features = reader.n_records()?;
    let bounds = reader.header.bounds;

    Ok(FileMeta {
        shape_type: reader.header.shape_type,
        n_features: n_features,
        bounds_min: [bounds.x_min, bounds.y_min, bounds.z_min, bounds.m_min],
        bounds_max: [bounds.x_max, bounds.y_max, bounds.z_max, bounds.m_max],
    })
}

/// Per-feature metadata. Everything is optional: a null or out-of-range
/// id nulls the whole row, and the measure bounds are null whenever the
/// feature carries no real measures.
#[derive(Debug,Clone,PartialEq)]
pub struct GeometryRowMeta {
    pub shape_id: Option<u32>,
    pub n_parts: Option<usize>,
    pub n_vertices: Option<usize>,
    pub x_min: Option<f64>,
    pub y_min: Option<f64>,
    pub z_min: Option<f64>,
    pub m_min: Option<f64>,
    pub x_max: Option<f64>,
    pub y_max: Option<f64>,
    pub z_max: Option<f64>,
    pub m_max: Option<f64>,
}

impl GeometryRowMeta {
    fn null_row() -> GeometryRowMeta {
        GeometryRowMeta {
            shape_id: None,
            n_parts: None,
            n_vertices: None,
            x_min: None,
            y_min: None,
            z_min: None,
            m_min: None,
            x_max: None,
            y_max: None,
            z_max: None,
            m_max: None,
        }
    }
}

fn min_max<I: Iterator<Item = f64>>(values: I) -> (Option<f64>, Option<f64>) {
    let mut min: Option<f64> = None;
    let mut max: Option<f64> = None;

    for value in values {
        min = Some(match min {
            None => value,
            Some(m) => if value < m { value } else { m },
        });
        max = Some(match max {
            None => value,
            Some(m) => if value > m { value } else { m },
        });
    }

    (min, max)
}

fn geometry_row(shape_id: u32, payload: &ShapePayload) -> GeometryRowMeta {
    let points = payload.points();
    let (x_min, x_max) = min_max(points.iter().map(|p| p.x));
    let (y_min, y_max) = min_max(points.iter().map(|p| p.y));
    let (z_min, z_max) = min_max(points.iter().filter_map(|p| p.z));
    let (m_min, m_max) = min_max(points.iter().filter_map(|p| p.m));

    GeometryRowMeta {
        shape_id: Some(shape_id),
        n_parts: Some(payload.n_parts()),
        n_vertices: Some(payload.n_vertices()),
        x_min: x_min,
        y_min: y_min,
        z_min: z_min,
        m_min: m_min,
        x_max: x_max,
        y_max: y_max,
        z_max: z_max,
        m_max: m_max,
    }
}

/// Part/vertex counts and bounds for each requested shape (1-based ids).
pub fn read_geometry_meta(
    path: &Path,
    shape_ids: &[Option<u32>],
) -> Result<Vec<GeometryRowMeta>, ShpError> {
    let mut reader = ShpReader::open(path)?;
    let n_features = reader.n_records()?;

    let mut rows = Vec::with_capacity(shape_ids.len());
    for id in shape_ids {
        let shape_id = match *id {
            None => {
                rows.push(GeometryRowMeta::null_row());
                continue;
            }
            Some(id) if id == 0 || id > n_features => {
                rows.push(GeometryRowMeta::null_row());
                continue;
            }
            Some(id) => id,
        };

        let record = reader.read_record_at(shape_id - 1)?;
        rows.push(geometry_row(shape_id, &record.payload));
    }

    Ok(rows)
}

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub struct ShxMeta {
    pub n_features: u32,
}

pub fn read_shx_meta(path: &Path) -> Result<ShxMeta, ShxError> {
    let index = ShxIndex::open(path)?;
    Ok(ShxMeta { n_features: index.n_records() })
}

/// Raw index entries for each requested 0-based shape id; `None` for an id
/// the index can't resolve.
pub fn read_shx_records(
    path: &Path,
    shape_ids: &[Option<u32>],
) -> Result<Vec<Option<ShxRecord>>, ShxError> {
    let mut index = ShxIndex::open(path)?;

    let mut records = Vec::with_capacity(shape_ids.len());
    for id in shape_ids {
        match *id {
            None => records.push(None),
            Some(id) => match index.record(id) {
                Ok(record) => records.push(Some(record)),
                Err(ShxError::NotFound(_)) => records.push(None),
                Err(err) => return Err(err),
            },
        }
    }

    Ok(records)
}

/// Name, native type code, width and precision for every column.
pub fn read_dbf_column_meta(path: &Path) -> Result<Vec<DbfFieldInfo>, DbfError> {
    let table = DbfTable::open(path, None)?;
    Ok(table.fields().to_vec())
}

/// Decodes the whole attribute table under `col_spec` (see
/// `collect::Collector`), returning typed columns plus the problem list.
pub fn read_dbf_table(
    path: &Path,
    col_spec: &str,
    encoding_override: Option<&str>,
) -> Result<DecodedTable, DbfError> {
    let mut table = DbfTable::open(path, encoding_override)?;
    collect::decode_table(&mut table, col_spec)
}
