/// Reads ESRI ".shx" Shapefile index, as per
/// https://www.esri.com/library/whitepapers/pdfs/shapefile.pdf
///
/// The ".shx" file is a 100-byte header followed by one fixed-size record
/// per shape: `{offset, content_length}`, both big-endian and both measured
/// in 16-bit words. It exists so a reader can seek straight to shape `i` of
/// the variable-length ".shp" file without scanning everything before it.
use std::cmp;
use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use byteorder::{BigEndian, ByteOrder};

use file;

const SHX_HEADER_LENGTH: u64 = 100;
const SHX_RECORD_LENGTH: usize = 8;
const DEFAULT_CACHE_SIZE: u32 = 64;

#[derive(Debug)]
pub enum ShxError {
    IOError(io::Error),
    ParseError(String),
    NotFound(u32),
}

impl error::Error for ShxError {
    fn description(&self) -> &str {
        match *self {
            ShxError::IOError(ref err) => err.description(),
            ShxError::ParseError(ref description) => description,
            ShxError::NotFound(_) => "shape id is not in the .shx index",
        }
    }

    fn cause(&self) -> Option<&error::Error> {
        match *self {
            ShxError::IOError(ref err) => Some(err),
            ShxError::ParseError(_) => None,
            ShxError::NotFound(_) => None,
        }
    }
}

impl fmt::Display for ShxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ShxError::IOError(ref err) => err.fmt(f),
            ShxError::ParseError(ref description) => write!(f, "Parse error: {}", description),
            ShxError::NotFound(shape_id) => write!(f, "No record for shape id {} in .shx index", shape_id),
        }
    }
}

/// One index entry: where shape `i` lives in the ".shp" file.
///
/// Both fields are in 16-bit words; multiply by 2 for bytes.
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub struct ShxRecord {
    pub offset: u32,
    pub content_length: u32,
}

/// What the read-ahead cache currently holds.
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
enum CacheState {
    Empty,
    Populated { start: u32, end: u32 },
}

/// Anything that can translate a shape id into a ".shp" file position.
///
/// `ShpReader` seeks through this trait rather than a concrete index, so
/// tests (and callers with their own storage) can substitute any backend.
pub trait ShxLookup {
    fn n_records(&self) -> u32;
    fn record(&mut self, shape_id: u32) -> Result<ShxRecord, ShxError>;
}

/// Random-access reader for ".shx" index files.
///
/// Lookups go through a read-ahead cache of consecutive records: a miss
/// seeks once and bulk-reads up to `cache_size` entries, so a sequential id
/// scan costs one seek per `cache_size` lookups instead of one per lookup.
/// Cache size only ever changes the I/O call count, never the results.
#[derive(Debug)]
pub struct ShxIndex<R: io::Read + io::Seek> {
    file: R,
    n_records: u32,
    cache_size: u32,
    cache_state: CacheState,
    cache: Vec<ShxRecord>,
}

impl ShxIndex<io::BufReader<fs::File>> {
    pub fn open(path: &Path) -> Result<ShxIndex<io::BufReader<fs::File>>, ShxError> {
        match file::open_binary(path) {
            Err(err) => Err(ShxError::IOError(err)),
            Ok(f) => ShxIndex::new(f),
        }
    }
}

impl<R: io::Read + io::Seek> ShxIndex<R> {
    /// Builds an index over any seekable stream.
    ///
    /// The record count is computed here, once, from the stream length:
    /// `(len - 100) / 8`.
    pub fn new(mut file: R) -> Result<ShxIndex<R>, ShxError> {
        let n_bytes = match file::stream_len(&mut file) {
            Err(err) => return Err(ShxError::IOError(err)),
            Ok(n) => n,
        };

        if n_bytes < SHX_HEADER_LENGTH {
            return Err(ShxError::ParseError(format!(
                ".shx file is {} bytes long, but the header alone is {} bytes",
                n_bytes, SHX_HEADER_LENGTH
            )));
        }

        Ok(ShxIndex {
            file: file,
            n_records: ((n_bytes - SHX_HEADER_LENGTH) / SHX_RECORD_LENGTH as u64) as u32,
            cache_size: DEFAULT_CACHE_SIZE,
            cache_state: CacheState::Empty,
            cache: Vec::new(),
        })
    }

    /// Resizes the read-ahead cache. Sizes below 1 are clamped to 1.
    ///
    /// Changing the size invalidates the cache wholesale; setting the same
    /// size again is a no-op.
    pub fn set_cache_size(&mut self, cache_size: u32) {
        let cache_size = cmp::max(1, cache_size);

        if cache_size != self.cache_size {
            self.cache_size = cache_size;
            self.cache_state = CacheState::Empty;
            self.cache = Vec::new();
        }
    }

    /// Reads up to `n` consecutive records starting at `shape_id`, straight
    /// from the file (no cache involved).
    ///
    /// A short read at end-of-file truncates the result instead of failing;
    /// callers decide whether fewer records than requested is a problem.
    pub fn record_n(&mut self, shape_id: u32, n: u32) -> Result<Vec<ShxRecord>, ShxError> {
        let byte_offset = SHX_HEADER_LENGTH + SHX_RECORD_LENGTH as u64 * shape_id as u64;
        if let Err(err) = self.file.seek(io::SeekFrom::Start(byte_offset)) {
            return Err(ShxError::IOError(err));
        }

        let mut buf = vec![0u8; SHX_RECORD_LENGTH * n as usize];
        let n_bytes = match file::read_up_to(&mut self.file, &mut buf) {
            Err(err) => return Err(ShxError::IOError(err)),
            Ok(n_bytes) => n_bytes,
        };

        let n_read = n_bytes / SHX_RECORD_LENGTH;
        if n_read < n as usize {
            debug!(
                "expected {} records at .shx id {} but read {}",
                n, shape_id, n_read
            );
        }

        let mut records = Vec::with_capacity(n_read);
        for i in 0..n_read {
            let chunk = &buf[i * SHX_RECORD_LENGTH..(i + 1) * SHX_RECORD_LENGTH];
            records.push(ShxRecord {
                offset: BigEndian::read_u32(&chunk[0..4]),
                content_length: BigEndian::read_u32(&chunk[4..8]),
            });
        }

        Ok(records)
    }

    fn cache_hit(&self, shape_id: u32) -> bool {
        match self.cache_state {
            CacheState::Empty => false,
            CacheState::Populated { start, end } => shape_id >= start && shape_id < end,
        }
    }
}

impl<R: io::Read + io::Seek> ShxLookup for ShxIndex<R> {
    fn n_records(&self) -> u32 {
        self.n_records
    }

    /// Looks up one record by 0-based shape id, through the cache.
    ///
    /// Ids at or past `n_records()` fail with `NotFound` before any file
    /// I/O happens.
    fn record(&mut self, shape_id: u32) -> Result<ShxRecord, ShxError> {
        if shape_id >= self.n_records {
            return Err(ShxError::NotFound(shape_id));
        }

        if !self.cache_hit(shape_id) {
            let n = cmp::min(self.cache_size, self.n_records - shape_id);
            debug!("refilling .shx cache: records {}..{}", shape_id, shape_id + n);

            let records = self.record_n(shape_id, n)?;
            if records.is_empty() {
                return Err(ShxError::ParseError(format!(
                    "Expected record {} in .shx index, but the file ends before it",
                    shape_id
                )));
            }

            self.cache_state = CacheState::Populated {
                start: shape_id,
                end: shape_id + records.len() as u32,
            };
            self.cache = records;
        }

        match self.cache_state {
            CacheState::Populated { start, .. } => Ok(self.cache[(shape_id - start) as usize]),
            CacheState::Empty => unreachable!(),
        }
    }
}
