/// Reads ESRI ".shp" Shapefile geometry, as per
/// https://www.esri.com/library/whitepapers/pdfs/shapefile.pdf
///
/// A ".shp" file is a 100-byte header followed by variable-length records.
/// The header mixes byte orders: file code and file length are big-endian,
/// version, shape type and bounds are little-endian. Every record is an
/// 8-byte big-endian `{record_number, content_length}` header followed by a
/// little-endian payload whose first word repeats the shape type.
///
/// Records can be read two ways: sequentially (the reader is an `Iterator`),
/// or by shape id through the ".shx" companion index, which is opened
/// lazily on the first non-sequential access.
use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use itertools::Itertools;

use file;
use shx;
use shx::{ShxIndex, ShxLookup};

const SHP_HEADER_LENGTH: usize = 100;
const SHP_RECORD_HEADER_LENGTH: usize = 8;
const SHP_MAGIC_NUMBER: u32 = 9994;
const SHP_VERSION: u32 = 1000;

const POINT_CONTENT_WORDS: u32 = 10;
const POINT_M_CONTENT_WORDS: u32 = 14;
const POINT_Z_CONTENT_WORDS: u32 = 18;

/// Measure values below this are the format's "no data" sentinel.
const M_NO_DATA_LIMIT: f64 = -1e38;

#[derive(Debug)]
pub enum ShpError {
    IOError(io::Error),
    ParseError(String),
    ShxError(shx::ShxError),
}

impl error::Error for ShpError {
    fn description(&self) -> &str {
        match *self {
            ShpError::IOError(ref err) => err.description(),
            ShpError::ParseError(ref description) => description,
            ShpError::ShxError(ref err) => err.description(),
        }
    }

    fn cause(&self) -> Option<&error::Error> {
        match *self {
            ShpError::IOError(ref err) => Some(err),
            ShpError::ParseError(_) => None,
            ShpError::ShxError(ref err) => Some(err),
        }
    }
}

impl fmt::Display for ShpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ShpError::IOError(ref err) => err.fmt(f),
            ShpError::ParseError(ref description) => write!(f, "Parse error: {}", description),
            ShpError::ShxError(ref err) => err.fmt(f),
        }
    }
}

#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum ShapeType {
    Null,
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
    PointZ,
    PolyLineZ,
    PolygonZ,
    MultiPointZ,
    PointM,
    PolyLineM,
    PolygonM,
    MultiPointM,
    MultiPatch,
}

impl ShapeType {
    pub fn from_code(code: u32) -> Option<ShapeType> {
        match code {
            0  => Some(ShapeType::Null),
            1  => Some(ShapeType::Point),
            3  => Some(ShapeType::PolyLine),
            5  => Some(ShapeType::Polygon),
            8  => Some(ShapeType::MultiPoint),
            11 => Some(ShapeType::PointZ),
            13 => Some(ShapeType::PolyLineZ),
            15 => Some(ShapeType::PolygonZ),
            18 => Some(ShapeType::MultiPointZ),
            21 => Some(ShapeType::PointM),
            23 => Some(ShapeType::PolyLineM),
            25 => Some(ShapeType::PolygonM),
            28 => Some(ShapeType::MultiPointM),
            31 => Some(ShapeType::MultiPatch),
            _ => None,
        }
    }

    pub fn code(&self) -> u32 {
        match *self {
            ShapeType::Null => 0,
            ShapeType::Point => 1,
            ShapeType::PolyLine => 3,
            ShapeType::Polygon => 5,
            ShapeType::MultiPoint => 8,
            ShapeType::PointZ => 11,
            ShapeType::PolyLineZ => 13,
            ShapeType::PolygonZ => 15,
            ShapeType::MultiPointZ => 18,
            ShapeType::PointM => 21,
            ShapeType::PolyLineM => 23,
            ShapeType::PolygonM => 25,
            ShapeType::MultiPointM => 28,
            ShapeType::MultiPatch => 31,
        }
    }

    pub fn has_z(&self) -> bool {
        match *self {
            ShapeType::PointZ
            | ShapeType::PolyLineZ
            | ShapeType::PolygonZ
            | ShapeType::MultiPointZ => true,
            _ => false,
        }
    }

    /// `true` for both the M and the Z families: Z shapes carry measures too.
    pub fn has_m(&self) -> bool {
        match *self {
            ShapeType::PointM
            | ShapeType::PolyLineM
            | ShapeType::PolygonM
            | ShapeType::MultiPointM => true,
            _ => self.has_z(),
        }
    }
}

/// The header's eight bounding doubles, in file order.
#[derive(Debug,Copy,Clone)]
pub struct ShpBounds {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
    pub m_min: f64,
    pub m_max: f64,
}

#[derive(Debug,Copy,Clone)]
pub struct ShpHeader {
    pub file_n_bytes: usize,
    pub shape_type: ShapeType,
    pub bounds: ShpBounds,
}

/// One vertex. `z` and `m` are `None` for shape types without those axes,
/// and `m` is also `None` when the stored measure is the "no data" sentinel
/// (anything below -1e38).
#[derive(Debug,Clone,Copy,PartialEq)]
pub struct ShpPoint {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    pub m: Option<f64>,
}

impl ShpPoint {
    pub fn xy(x: f64, y: f64) -> ShpPoint {
        ShpPoint { x: x, y: y, z: None, m: None }
    }
}

impl fmt::Display for ShpPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// A part-indexed vertex sequence, shared by PolyLine and Polygon payloads.
///
/// `parts[i]` is the index of part `i`'s first vertex; part `i` ends where
/// part `i + 1` begins (or at `points.len()` for the last part). For
/// polygons each part is one ring.
#[derive(Debug,Clone)]
pub struct PolyParts {
    pub parts: Box<[usize]>,
    pub points: Box<[ShpPoint]>,
}

impl PolyParts {
    /// Start/end vertex ranges, one per part.
    pub fn part_ranges(&self) -> Vec<(usize, usize)> {
        let mut boundaries: Vec<usize> = self.parts.to_vec();
        boundaries.push(self.points.len());
        boundaries.iter().tuple_windows().map(|(&start, &end)| (start, end)).collect()
    }
}

#[derive(Debug,Clone)]
pub enum ShapePayload {
    Null,
    Point(ShpPoint),
    MultiPoint(Box<[ShpPoint]>),
    PolyLine(PolyParts),
    Polygon(PolyParts),
    /// Not decoded beyond its size; the streaming layer reports it as
    /// unsupported rather than guessing at part types.
    MultiPatch { content_n_bytes: usize },
}

impl ShapePayload {
    pub fn n_parts(&self) -> usize {
        match *self {
            ShapePayload::PolyLine(ref poly) | ShapePayload::Polygon(ref poly) => poly.parts.len(),
            _ => 0,
        }
    }

    pub fn n_vertices(&self) -> usize {
        match *self {
            ShapePayload::Point(_) => 1,
            ShapePayload::MultiPoint(ref points) => points.len(),
            ShapePayload::PolyLine(ref poly) | ShapePayload::Polygon(ref poly) => poly.points.len(),
            _ => 0,
        }
    }

    pub fn points(&self) -> &[ShpPoint] {
        match *self {
            ShapePayload::Point(ref point) => ::std::slice::from_ref(point),
            ShapePayload::MultiPoint(ref points) => points,
            ShapePayload::PolyLine(ref poly) | ShapePayload::Polygon(ref poly) => &poly.points,
            _ => &[],
        }
    }
}

#[derive(Debug,Clone)]
pub struct ShapeRecord {
    pub record_number: u32,
    /// In 16-bit words, as stored on disk.
    pub content_length: u32,
    pub shape_type: ShapeType,
    pub payload: ShapePayload,
}

fn measure(value: f64) -> Option<f64> {
    if value < M_NO_DATA_LIMIT {
        None
    } else {
        Some(value)
    }
}

/// Reads the first 100 bytes of the file.
///
/// Side-effect: advances the file cursor 100 bytes.
///
/// Returns Ok iff the file code is 9994, the version is 1000 and the shape
/// type code is one this crate knows about.
fn read_shp_header<R: io::Read>(file: &mut R) -> Result<ShpHeader, ShpError> {
    let mut buf = [0u8; SHP_HEADER_LENGTH];

    if let Err(err) = file.read_exact(&mut buf) {
        return Err(ShpError::IOError(err));
    }

    let magic_number = BigEndian::read_u32(&buf[0..4]);
    let file_len = BigEndian::read_u32(&buf[24..28]);
    let version = LittleEndian::read_u32(&buf[28..32]);
    let shape_type_code = LittleEndian::read_u32(&buf[32..36]);

    if magic_number != SHP_MAGIC_NUMBER {
        return Err(ShpError::ParseError(format!(
            "File has wrong magic number: found {}, expected {}",
            magic_number, SHP_MAGIC_NUMBER
        )));
    }

    if version != SHP_VERSION {
        return Err(ShpError::ParseError(format!(
            "File has wrong version: found {}, expected {}",
            version, SHP_VERSION
        )));
    }

    let shape_type = match ShapeType::from_code(shape_type_code) {
        None => {
            return Err(ShpError::ParseError(format!(
                "File has nonexistent shape type {}",
                shape_type_code
            )))
        }
        Some(shape_type) => shape_type,
    };

    Ok(ShpHeader {
        file_n_bytes: (file_len * 2) as usize,
        shape_type: shape_type,
        bounds: ShpBounds {
            x_min: LittleEndian::read_f64(&buf[36..44]),
            y_min: LittleEndian::read_f64(&buf[44..52]),
            x_max: LittleEndian::read_f64(&buf[52..60]),
            y_max: LittleEndian::read_f64(&buf[60..68]),
            z_min: LittleEndian::read_f64(&buf[68..76]),
            z_max: LittleEndian::read_f64(&buf[76..84]),
            m_min: LittleEndian::read_f64(&buf[84..92]),
            m_max: LittleEndian::read_f64(&buf[92..100]),
        },
    })
}

fn parse_point(content: &[u8], record_number: u32, shape_type: ShapeType) -> Result<ShapePayload, ShpError> {
    let has_z = shape_type.has_z();
    let has_m = shape_type.has_m();

    let expected = 8 * (2 + has_z as usize + has_m as usize);
    // PointZ records in the wild sometimes omit the trailing measure.
    let measure_omitted = has_z && content.len() == expected - 8;

    if content.len() != expected && !measure_omitted {
        return Err(ShpError::ParseError(format!(
            "Record number {} has {} content bytes, but a {:?} needs {}",
            record_number,
            content.len() + 4,
            shape_type,
            expected + 4
        )));
    }
    let with_m = has_m && !measure_omitted;

    let x = LittleEndian::read_f64(&content[0..8]);
    let y = LittleEndian::read_f64(&content[8..16]);
    let z = if has_z {
        Some(LittleEndian::read_f64(&content[16..24]))
    } else {
        None
    };
    let m = if with_m {
        measure(LittleEndian::read_f64(&content[content.len() - 8..]))
    } else {
        None
    };

    Ok(ShapePayload::Point(ShpPoint { x: x, y: y, z: z, m: m }))
}

/// Reads `n` x/y pairs starting at `content[offset]`.
fn parse_xy_points(content: &[u8], offset: usize, n: usize) -> Vec<ShpPoint> {
    content[offset..offset + 16 * n]
        .chunks(16)
        .map(|chunk| ShpPoint::xy(
            LittleEndian::read_f64(&chunk[0..8]),
            LittleEndian::read_f64(&chunk[8..16]),
        ))
        .collect()
}

/// Parses a `{min, max, values[n]}` coordinate block (the Z and M blocks of
/// multipoint and poly records). Returns the values and the new offset.
fn parse_axis_block(content: &[u8], offset: usize, n: usize) -> (Vec<f64>, usize) {
    let values_start = offset + 16; // skip the min/max pair
    let values = content[values_start..values_start + 8 * n]
        .chunks(8)
        .map(|chunk| LittleEndian::read_f64(chunk))
        .collect();
    (values, values_start + 8 * n)
}

fn parse_multi_point(content: &[u8], record_number: u32, shape_type: ShapeType) -> Result<ShapePayload, ShpError> {
    if content.len() < 36 {
        return Err(ShpError::ParseError(format!(
            "Record number {} is too short for a {:?} header",
            record_number, shape_type
        )));
    }

    // 32 bytes of bounding box, then the point count.
    let num_points = LittleEndian::read_u32(&content[32..36]) as usize;
    let mut offset = 36;

    if content.len() < offset + 16 * num_points {
        return Err(ShpError::ParseError(format!(
            "Record number {} claims {} points, but only {} content bytes follow",
            record_number,
            num_points,
            content.len() - offset
        )));
    }

    let mut points = parse_xy_points(content, offset, num_points);
    offset += 16 * num_points;

    if shape_type.has_z() {
        if content.len() < offset + 16 + 8 * num_points {
            return Err(ShpError::ParseError(format!(
                "Record number {} is missing its Z block",
                record_number
            )));
        }
        let (z_values, next) = parse_axis_block(content, offset, num_points);
        for (point, z) in points.iter_mut().zip(z_values) {
            point.z = Some(z);
        }
        offset = next;
    }

    // The M block is optional: writers may stop after the Z block (or after
    // the points, for MultiPointM).
    if shape_type.has_m() && content.len() >= offset + 16 + 8 * num_points {
        let (m_values, next) = parse_axis_block(content, offset, num_points);
        for (point, m) in points.iter_mut().zip(m_values) {
            point.m = measure(m);
        }
        offset = next;
    }

    if offset != content.len() {
        return Err(ShpError::ParseError(format!(
            "Record number {} has {} content bytes, but its {} points account for {}",
            record_number,
            content.len(),
            num_points,
            offset
        )));
    }

    Ok(ShapePayload::MultiPoint(points.into_boxed_slice()))
}

fn parse_poly(content: &[u8], record_number: u32, shape_type: ShapeType) -> Result<ShapePayload, ShpError> {
    if content.len() < 40 {
        return Err(ShpError::ParseError(format!(
            "Record number {} is too short for a {:?} header",
            record_number, shape_type
        )));
    }

    // 32 bytes of bounding box, then the part and point counts.
    let num_parts = LittleEndian::read_u32(&content[32..36]) as usize;
    let num_points = LittleEndian::read_u32(&content[36..40]) as usize;

    if num_parts == 0 {
        return Err(ShpError::ParseError(format!(
            "Record number {} has no parts",
            record_number
        )));
    }

    let mut offset = 40;
    if content.len() < offset + 4 * num_parts + 16 * num_points {
        return Err(ShpError::ParseError(format!(
            "Record number {} claims {} parts and {} points, but only {} content bytes follow",
            record_number,
            num_parts,
            num_points,
            content.len() - offset
        )));
    }

    let parts: Vec<usize> = content[offset..offset + 4 * num_parts]
        .chunks(4)
        .map(|chunk| LittleEndian::read_u32(chunk) as usize)
        .collect();
    offset += 4 * num_parts;

    // Every part must begin where sane: at or after the previous part's
    // start, and within the vertex array.
    let mut boundaries = parts.clone();
    boundaries.push(num_points);
    for (&start, &end) in boundaries.iter().tuple_windows() {
        if start > end || end > num_points {
            return Err(ShpError::ParseError(format!(
                "Record number {} has a part with points {}-{}, but there are only {} points in the record",
                record_number, start, end, num_points
            )));
        }
    }

    let mut points = parse_xy_points(content, offset, num_points);
    offset += 16 * num_points;

    if shape_type.has_z() {
        if content.len() < offset + 16 + 8 * num_points {
            return Err(ShpError::ParseError(format!(
                "Record number {} is missing its Z block",
                record_number
            )));
        }
        let (z_values, next) = parse_axis_block(content, offset, num_points);
        for (point, z) in points.iter_mut().zip(z_values) {
            point.z = Some(z);
        }
        offset = next;
    }

    if shape_type.has_m() && content.len() >= offset + 16 + 8 * num_points {
        let (m_values, next) = parse_axis_block(content, offset, num_points);
        for (point, m) in points.iter_mut().zip(m_values) {
            point.m = measure(m);
        }
        offset = next;
    }

    if offset != content.len() {
        return Err(ShpError::ParseError(format!(
            "Record number {} has {} content bytes, but its {} parts and {} points account for {}",
            record_number,
            content.len(),
            num_parts,
            num_points,
            offset
        )));
    }

    let poly = PolyParts {
        parts: parts.into_boxed_slice(),
        points: points.into_boxed_slice(),
    };

    match shape_type {
        ShapeType::Polygon | ShapeType::PolygonM | ShapeType::PolygonZ => Ok(ShapePayload::Polygon(poly)),
        _ => Ok(ShapePayload::PolyLine(poly)),
    }
}

/// Parses one record's content (shape type word included) into a payload.
///
/// A record whose type is neither Null nor the file's declared type is
/// corrupt — the mismatch is reported, never papered over.
fn parse_record_content(
    buf: &[u8],
    record_number: u32,
    file_shape_type: ShapeType,
) -> Result<(ShapeType, ShapePayload), ShpError> {
    if buf.len() < 4 {
        return Err(ShpError::ParseError(format!(
            "Record number {} is too short to hold a shape type",
            record_number
        )));
    }

    let code = LittleEndian::read_u32(&buf[0..4]);
    let shape_type = match ShapeType::from_code(code) {
        None => {
            return Err(ShpError::ParseError(format!(
                "Record number {} has nonexistent shape type {}",
                record_number, code
            )))
        }
        Some(shape_type) => shape_type,
    };

    if shape_type != ShapeType::Null && shape_type != file_shape_type {
        return Err(ShpError::ParseError(format!(
            "Record number {} has shape type {:?}, but the file header says {:?}",
            record_number, shape_type, file_shape_type
        )));
    }

    let content = &buf[4..];
    let payload = match shape_type {
        ShapeType::Null => ShapePayload::Null,
        ShapeType::Point | ShapeType::PointM | ShapeType::PointZ => {
            parse_point(content, record_number, shape_type)?
        }
        ShapeType::MultiPoint | ShapeType::MultiPointM | ShapeType::MultiPointZ => {
            parse_multi_point(content, record_number, shape_type)?
        }
        ShapeType::PolyLine
        | ShapeType::PolyLineM
        | ShapeType::PolyLineZ
        | ShapeType::Polygon
        | ShapeType::PolygonM
        | ShapeType::PolygonZ => parse_poly(content, record_number, shape_type)?,
        ShapeType::MultiPatch => ShapePayload::MultiPatch { content_n_bytes: content.len() },
    };

    Ok((shape_type, payload))
}

/// Derives the ".shx" companion path from a ".shp" path, matching the case
/// of the extension it replaces.
fn shx_sibling_path(shp_path: &Path) -> PathBuf {
    let upper = match shp_path.extension() {
        Some(ext) => ext == "SHP",
        None => false,
    };

    let mut path = PathBuf::from(shp_path);
    path.set_extension(if upper { "SHX" } else { "shx" });
    path
}

/// Reads an ESRI ".shp" Shapefile.
///
/// Sequential scans use the `Iterator` implementation; `read_record_at()`
/// jumps to any shape id through the ".shx" companion index, which is
/// opened lazily (once) the first time a non-zero id is requested.
pub struct ShpReader<R: io::Read + io::Seek> {
    file: R,
    shp_path: Option<PathBuf>,
    shx: Option<Box<ShxLookup>>,
    pub header: ShpHeader,
}

// Box<ShxLookup> does not implement std::fmt::Debug
impl<R: io::Read + io::Seek> fmt::Debug for ShpReader<R> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("ShpReader")
            .field("shp_path", &self.shp_path)
            .field("has_shx", &self.shx.is_some())
            .field("header", &self.header)
            .finish()
    }
}

impl ShpReader<io::BufReader<fs::File>> {
    pub fn open(path: &Path) -> Result<ShpReader<io::BufReader<fs::File>>, ShpError> {
        match file::open_binary(path) {
            Err(err) => Err(ShpError::IOError(err)),
            Ok(f) => {
                let mut reader = ShpReader::new(f)?;
                reader.shp_path = Some(PathBuf::from(path));
                Ok(reader)
            }
        }
    }
}

impl<R: io::Read + io::Seek> ShpReader<R> {
    /// Builds a reader over any seekable stream.
    ///
    /// Random access needs an index: either construct with `open()` (the
    /// ".shx" sibling is found by path) or attach one with `set_index()`.
    pub fn new(mut file: R) -> Result<ShpReader<R>, ShpError> {
        read_shp_header(&mut file).map(move |header| ShpReader {
            file: file,
            shp_path: None,
            shx: None,
            header: header,
        })
    }

    pub fn set_index<I: ShxLookup + 'static>(&mut self, index: I) {
        self.shx = Some(Box::new(index));
    }

    /// The current byte offset into the ".shp" file.
    pub fn position(&mut self) -> Result<u64, ShpError> {
        self.file
            .seek(io::SeekFrom::Current(0))
            .map_err(ShpError::IOError)
    }

    /// The number of shapes, per the ".shx" companion.
    pub fn n_records(&mut self) -> Result<u32, ShpError> {
        Ok(self.index()?.n_records())
    }

    fn index(&mut self) -> Result<&mut Box<ShxLookup>, ShpError> {
        if self.shx.is_none() {
            let shx_path = match self.shp_path {
                None => {
                    return Err(ShpError::ParseError(String::from(
                        "Can't look up shapes by id without a .shx index; open the reader by path or attach one with set_index()",
                    )))
                }
                Some(ref shp_path) => shx_sibling_path(shp_path),
            };

            debug!("opening .shx companion {:?}", shx_path);
            let index = ShxIndex::open(&shx_path).map_err(ShpError::ShxError)?;
            self.shx = Some(Box::new(index));
        }

        match self.shx {
            Some(ref mut index) => Ok(index),
            None => unreachable!(),
        }
    }

    /// Positions the cursor at the record for `shape_id` (0-based).
    ///
    /// Shape 0 always sits right after the header; every other id goes
    /// through the ".shx" index, whose offsets are in 16-bit words.
    fn seek_shape(&mut self, shape_id: u32) -> Result<(), ShpError> {
        let byte_offset = if shape_id == 0 {
            SHP_HEADER_LENGTH as u64
        } else {
            let record = self.index()?.record(shape_id).map_err(ShpError::ShxError)?;
            record.offset as u64 * 2
        };

        match self.file.seek(io::SeekFrom::Start(byte_offset)) {
            Err(err) => Err(ShpError::IOError(err)),
            Ok(_) => Ok(()),
        }
    }

    /// Reads the record at the cursor and advances past it.
    pub fn read_record(&mut self) -> Result<ShapeRecord, ShpError> {
        let mut header_buf = [0u8; SHP_RECORD_HEADER_LENGTH];
        if let Err(err) = self.file.read_exact(&mut header_buf) {
            return Err(ShpError::IOError(err));
        }

        let record_number = BigEndian::read_u32(&header_buf[0..4]);
        let content_length = BigEndian::read_u32(&header_buf[4..8]);

        let mut buf = vec![0u8; content_length as usize * 2];
        if let Err(err) = self.file.read_exact(&mut buf) {
            return Err(ShpError::IOError(err));
        }

        let (shape_type, payload) = parse_record_content(&buf, record_number, self.header.shape_type)?;

        Ok(ShapeRecord {
            record_number: record_number,
            content_length: content_length,
            shape_type: shape_type,
            payload: payload,
        })
    }

    /// Random access: seeks to `shape_id` (0-based) and reads its record.
    pub fn read_record_at(&mut self, shape_id: u32) -> Result<ShapeRecord, ShpError> {
        self.seek_shape(shape_id)?;
        self.read_record()
    }

    pub fn read_point_records(&mut self, n: usize) -> Result<Vec<ShapeRecord>, ShpError> {
        self.read_fixed_records(n, ShapeType::Point, POINT_CONTENT_WORDS)
    }

    pub fn read_point_m_records(&mut self, n: usize) -> Result<Vec<ShapeRecord>, ShpError> {
        self.read_fixed_records(n, ShapeType::PointM, POINT_M_CONTENT_WORDS)
    }

    pub fn read_point_z_records(&mut self, n: usize) -> Result<Vec<ShapeRecord>, ShpError> {
        self.read_fixed_records(n, ShapeType::PointZ, POINT_Z_CONTENT_WORDS)
    }

    /// Bulk-reads up to `n` fixed-size records of `expected` type in one
    /// I/O call.
    ///
    /// Each record's content length and shape type are checked against the
    /// expected values; the first mismatch truncates the result to the
    /// valid prefix and repositions the cursor at the start of the invalid
    /// record, so corruption costs at most one record boundary, and a
    /// subsequent read resumes cleanly.
    fn read_fixed_records(
        &mut self,
        n: usize,
        expected: ShapeType,
        content_words: u32,
    ) -> Result<Vec<ShapeRecord>, ShpError> {
        let record_n_bytes = SHP_RECORD_HEADER_LENGTH + content_words as usize * 2;
        let start = self.position()?;

        let mut buf = vec![0u8; record_n_bytes * n];
        let n_bytes = file::read_up_to(&mut self.file, &mut buf).map_err(ShpError::IOError)?;

        let n_whole = n_bytes / record_n_bytes;
        let mut records = Vec::with_capacity(n_whole);

        for i in 0..n_whole {
            let chunk = &buf[i * record_n_bytes..(i + 1) * record_n_bytes];
            let record_number = BigEndian::read_u32(&chunk[0..4]);
            let content_length = BigEndian::read_u32(&chunk[4..8]);
            let shape_type_code = LittleEndian::read_u32(&chunk[8..12]);

            if content_length != content_words || shape_type_code != expected.code() {
                warn!(
                    "record {} has content length {} and type {}, expected {} and {}; truncating bulk read at {} of {} records",
                    record_number, content_length, shape_type_code, content_words, expected.code(), i, n
                );
                let invalid_start = start + (i * record_n_bytes) as u64;
                self.file
                    .seek(io::SeekFrom::Start(invalid_start))
                    .map_err(ShpError::IOError)?;
                return Ok(records);
            }

            let (shape_type, payload) = parse_record_content(&chunk[8..], record_number, expected)?;
            records.push(ShapeRecord {
                record_number: record_number,
                content_length: content_length,
                shape_type: shape_type,
                payload: payload,
            });
        }

        if n_bytes % record_n_bytes != 0 {
            // Partial trailing record: park the cursor on its first byte.
            let aligned = start + (n_whole * record_n_bytes) as u64;
            self.file
                .seek(io::SeekFrom::Start(aligned))
                .map_err(ShpError::IOError)?;
        }

        Ok(records)
    }
}

impl<R: io::Read + io::Seek> Iterator for ShpReader<R> {
    type Item = Result<ShapeRecord, ShpError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.position() {
            Err(err) => Some(Err(err)),
            Ok(position) => {
                if position >= self.header.file_n_bytes as u64 {
                    None
                } else {
                    Some(self.read_record())
                }
            }
        }
    }
}

pub fn open(path: &Path) -> Result<ShpReader<io::BufReader<fs::File>>, ShpError> {
    ShpReader::open(path)
}

#[cfg(test)]
pub mod test {
    use std::io;
    use byteorder::{BigEndian, ByteOrder, LittleEndian};
    use shx::ShxIndex;
    use super::*;

    pub fn shp_header_bytes(shape_type: ShapeType, file_n_bytes: usize) -> Vec<u8> {
        let mut buf = vec![0u8; 100];
        BigEndian::write_u32(&mut buf[0..4], 9994);
        BigEndian::write_u32(&mut buf[24..28], (file_n_bytes / 2) as u32);
        LittleEndian::write_u32(&mut buf[28..32], 1000);
        LittleEndian::write_u32(&mut buf[32..36], shape_type.code());
        for i in 0..8 {
            LittleEndian::write_f64(&mut buf[36 + i * 8..44 + i * 8], (i + 1) as f64);
        }
        buf
    }

    fn record_header(record_number: u32, content_words: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 8];
        BigEndian::write_u32(&mut buf[0..4], record_number);
        BigEndian::write_u32(&mut buf[4..8], content_words);
        buf
    }

    fn doubles(values: &[f64]) -> Vec<u8> {
        let mut buf = vec![0u8; values.len() * 8];
        for (i, &value) in values.iter().enumerate() {
            LittleEndian::write_f64(&mut buf[i * 8..(i + 1) * 8], value);
        }
        buf
    }

    pub fn point_record(record_number: u32, x: f64, y: f64) -> Vec<u8> {
        let mut buf = record_header(record_number, 10);
        let mut type_word = [0u8; 4];
        LittleEndian::write_u32(&mut type_word, 1);
        buf.extend_from_slice(&type_word);
        buf.extend_from_slice(&doubles(&[x, y]));
        buf
    }

    fn point_z_record(record_number: u32, x: f64, y: f64, z: f64, m: f64) -> Vec<u8> {
        let mut buf = record_header(record_number, 18);
        let mut type_word = [0u8; 4];
        LittleEndian::write_u32(&mut type_word, 11);
        buf.extend_from_slice(&type_word);
        buf.extend_from_slice(&doubles(&[x, y, z, m]));
        buf
    }

    fn polygon_record(record_number: u32, parts: &[u32], points: &[(f64, f64)]) -> Vec<u8> {
        let mut content = vec![0u8; 4];
        LittleEndian::write_u32(&mut content[0..4], 5);
        content.extend_from_slice(&doubles(&[0., 0., 10., 10.]));
        let mut counts = [0u8; 8];
        LittleEndian::write_u32(&mut counts[0..4], parts.len() as u32);
        LittleEndian::write_u32(&mut counts[4..8], points.len() as u32);
        content.extend_from_slice(&counts);
        for &part in parts {
            let mut word = [0u8; 4];
            LittleEndian::write_u32(&mut word, part);
            content.extend_from_slice(&word);
        }
        for &(x, y) in points {
            content.extend_from_slice(&doubles(&[x, y]));
        }

        let mut buf = record_header(record_number, (content.len() / 2) as u32);
        buf.extend_from_slice(&content);
        buf
    }

    fn reader_over(bytes: Vec<u8>) -> ShpReader<io::Cursor<Vec<u8>>> {
        ShpReader::new(io::Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn bad_magic_number() {
        let mut bytes = shp_header_bytes(ShapeType::Point, 100);
        BigEndian::write_u32(&mut bytes[0..4], 9993);

        match ShpReader::new(io::Cursor::new(bytes)) {
            Err(ShpError::ParseError(ref message)) => {
                assert!(message.contains("magic number"), "{}", message);
            }
            other => panic!("expected ParseError, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn bad_version() {
        let mut bytes = shp_header_bytes(ShapeType::Point, 100);
        LittleEndian::write_u32(&mut bytes[28..32], 1001);

        match ShpReader::new(io::Cursor::new(bytes)) {
            Err(ShpError::ParseError(ref message)) => {
                assert!(message.contains("version"), "{}", message);
            }
            other => panic!("expected ParseError, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn header_fields() {
        let mut bytes = shp_header_bytes(ShapeType::PointZ, 0);
        BigEndian::write_u32(&mut bytes[24..28], 150);
        let reader = reader_over(bytes);

        assert_eq!(300, reader.header.file_n_bytes);
        assert_eq!(ShapeType::PointZ, reader.header.shape_type);
        assert_eq!(1., reader.header.bounds.x_min);
        assert_eq!(4., reader.header.bounds.y_max);
        assert_eq!(8., reader.header.bounds.m_max);
    }

    #[test]
    fn sequential_point_records() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&point_record(1, 1.5, 2.5));
        bytes.extend_from_slice(&point_record(2, 3.5, 4.5));
        let mut file = shp_header_bytes(ShapeType::Point, 100 + bytes.len());
        file.extend_from_slice(&bytes);

        let reader = reader_over(file);
        let records: Vec<ShapeRecord> = reader.map(|r| r.unwrap()).collect();

        assert_eq!(2, records.len());
        assert_eq!(1, records[0].record_number);
        match records[1].payload {
            ShapePayload::Point(point) => assert_eq!(ShpPoint::xy(3.5, 4.5), point),
            ref other => panic!("expected Point, got {:?}", other),
        }
    }

    #[test]
    fn record_type_mismatch_is_an_error() {
        let mut file = shp_header_bytes(ShapeType::PointZ, 144);
        file.extend_from_slice(&point_record(1, 1., 2.));

        let mut reader = reader_over(file);
        match reader.read_record() {
            Err(ShpError::ParseError(ref message)) => {
                assert!(message.contains("shape type"), "{}", message);
            }
            other => panic!("expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn bulk_point_z_read() {
        let mut file = shp_header_bytes(ShapeType::PointZ, 100 + 3 * 44);
        file.extend_from_slice(&point_z_record(1, 1., 2., 3., 4.));
        file.extend_from_slice(&point_z_record(2, 5., 6., 7., 8.));
        file.extend_from_slice(&point_z_record(3, 9., 10., 11., 12.));

        let mut reader = reader_over(file);
        let records = reader.read_point_z_records(3).unwrap();

        assert_eq!(3, records.len());
        match records[2].payload {
            ShapePayload::Point(point) => {
                assert_eq!(9., point.x);
                assert_eq!(Some(11.), point.z);
                assert_eq!(Some(12.), point.m);
            }
            ref other => panic!("expected Point, got {:?}", other),
        }
    }

    #[test]
    fn bulk_read_truncates_and_repositions_at_corrupt_record() {
        let mut file = shp_header_bytes(ShapeType::PointZ, 100 + 3 * 44);
        file.extend_from_slice(&point_z_record(1, 1., 2., 3., 4.));
        file.extend_from_slice(&point_z_record(2, 5., 6., 7., 8.));
        // Corrupt record 3's content length.
        let mut bad = point_z_record(3, 9., 10., 11., 12.);
        BigEndian::write_u32(&mut bad[4..8], 99);
        file.extend_from_slice(&bad);

        let mut reader = reader_over(file);
        let records = reader.read_point_z_records(3).unwrap();

        assert_eq!(2, records.len());
        assert_eq!(100 + 2 * 44, reader.position().unwrap());
    }

    #[test]
    fn bulk_read_stops_at_end_of_file() {
        let mut file = shp_header_bytes(ShapeType::Point, 100 + 2 * 28);
        file.extend_from_slice(&point_record(1, 1., 2.));
        file.extend_from_slice(&point_record(2, 3., 4.));

        let mut reader = reader_over(file);
        let records = reader.read_point_records(5).unwrap();

        assert_eq!(2, records.len());
    }

    #[test]
    fn point_m_sentinel_becomes_none() {
        let mut record = record_header(1, 14);
        let mut type_word = [0u8; 4];
        LittleEndian::write_u32(&mut type_word, 21);
        record.extend_from_slice(&type_word);
        record.extend_from_slice(&doubles(&[1., 2., -1e39]));

        let mut file = shp_header_bytes(ShapeType::PointM, 100 + record.len());
        file.extend_from_slice(&record);

        let mut reader = reader_over(file);
        match reader.read_record().unwrap().payload {
            ShapePayload::Point(point) => assert_eq!(None, point.m),
            ref other => panic!("expected Point, got {:?}", other),
        }
    }

    #[test]
    fn polygon_parts_and_points() {
        let record = polygon_record(
            1,
            &[0, 4],
            &[
                (0., 0.), (4., 0.), (4., 4.), (0., 0.),
                (1., 1.), (2., 1.), (2., 2.), (1., 1.),
            ],
        );
        let mut file = shp_header_bytes(ShapeType::Polygon, 100 + record.len());
        file.extend_from_slice(&record);

        let mut reader = reader_over(file);
        match reader.read_record().unwrap().payload {
            ShapePayload::Polygon(ref poly) => {
                assert_eq!(vec![(0, 4), (4, 8)], poly.part_ranges());
                assert_eq!(8, poly.points.len());
                assert_eq!(ShpPoint::xy(2., 1.), poly.points[5]);
            }
            ref other => panic!("expected Polygon, got {:?}", other),
        }
    }

    #[test]
    fn polygon_part_out_of_range() {
        let record = polygon_record(1, &[0, 9], &[(0., 0.), (1., 0.), (1., 1.), (0., 0.)]);
        let mut file = shp_header_bytes(ShapeType::Polygon, 100 + record.len());
        file.extend_from_slice(&record);

        let mut reader = reader_over(file);
        match reader.read_record() {
            Err(ShpError::ParseError(ref message)) => {
                assert!(message.contains("part"), "{}", message);
            }
            other => panic!("expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn read_record_at_uses_the_index() {
        let mut file = shp_header_bytes(ShapeType::Point, 100 + 3 * 28);
        file.extend_from_slice(&point_record(1, 1., 2.));
        file.extend_from_slice(&point_record(2, 3., 4.));
        file.extend_from_slice(&point_record(3, 5., 6.));

        // Offsets in words: header is 50 words, each record 14.
        let mut shx = vec![0u8; 100];
        for i in 0..3u32 {
            let mut buf = [0u8; 8];
            BigEndian::write_u32(&mut buf[0..4], 50 + 14 * i);
            BigEndian::write_u32(&mut buf[4..8], 10);
            shx.extend_from_slice(&buf);
        }

        let mut reader = reader_over(file);
        reader.set_index(ShxIndex::new(io::Cursor::new(shx)).unwrap());

        assert_eq!(3, reader.n_records().unwrap());

        let record = reader.read_record_at(2).unwrap();
        assert_eq!(3, record.record_number);
        match record.payload {
            ShapePayload::Point(point) => assert_eq!(ShpPoint::xy(5., 6.), point),
            ref other => panic!("expected Point, got {:?}", other),
        }

        // Shape 0 seeks straight past the header, no index needed.
        let record = reader.read_record_at(0).unwrap();
        assert_eq!(1, record.record_number);
    }

    #[test]
    fn shx_sibling_path_matches_case() {
        use std::path::Path;
        assert_eq!(
            Path::new("nation.shx"),
            super::shx_sibling_path(Path::new("nation.shp")).as_path()
        );
        assert_eq!(
            Path::new("NATION.SHX"),
            super::shx_sibling_path(Path::new("NATION.SHP")).as_path()
        );
        assert_eq!(
            Path::new("Nation.Shp.shx"),
            super::shx_sibling_path(Path::new("Nation.Shp.shp")).as_path()
        );
    }
}
