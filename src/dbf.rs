/// Reads xBase ".dbf" attribute tables, as per
/// https://www.clicketyclick.dk/databases/xbase/format/dbf.html
///
/// The layout is a 32-byte header, a field descriptor array terminated by
/// 0x0D, then fixed-width text records (one deletion-flag byte, then every
/// field of the row, contiguous). Everything the header promises is taken
/// at face value — almost any 32 bytes are a "valid" header, so the only
/// structural check available is the last-update date.
///
/// Cells are untyped on disk; the typed view lives in `collect`. This
/// module serves raw trimmed bytes, null tests and the resolved text
/// encoding.
use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::io::Read;
use std::path::{Path, PathBuf};
use byteorder::{ByteOrder, LittleEndian};
use encoding::EncodingRef;

use codepage;
use file;

const DBF_HEADER_LENGTH: usize = 32;
const DBF_FIELD_DESCRIPTOR_LENGTH: usize = 32;
const DBF_FIELD_TERMINATOR: u8 = 0x0d;

#[derive(Debug)]
pub enum DbfError {
    IOError(io::Error),
    ParseError(String),
    /// The column spec's length matches neither 1 nor the field count.
    ColumnSpecError(String),
    /// The interrupt callback asked a table decode to stop.
    Interrupted,
}

impl error::Error for DbfError {
    fn description(&self) -> &str {
        match *self {
            DbfError::IOError(ref err) => err.description(),
            DbfError::ParseError(ref description) => description,
            DbfError::ColumnSpecError(ref description) => description,
            DbfError::Interrupted => "table decode was interrupted",
        }
    }

    fn cause(&self) -> Option<&error::Error> {
        match *self {
            DbfError::IOError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for DbfError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DbfError::IOError(ref err) => err.fmt(f),
            DbfError::ParseError(ref description) => write!(f, "Parse error: {}", description),
            DbfError::ColumnSpecError(ref description) => write!(f, "{}", description),
            DbfError::Interrupted => write!(f, "Table decode was interrupted"),
        }
    }
}

/// One column's declared shape: dBase name (11 bytes max), native type
/// code ('C', 'N', 'F', 'I', 'L', 'D', ...), width and decimal precision.
#[derive(Debug,Clone)]
pub struct DbfFieldInfo {
    pub name: String,
    pub native_type: u8,
    pub width: usize,
    pub precision: usize,
    offset: usize,
}

/// Reads one ".dbf" file: field metadata, raw cell values, null tests.
///
/// Cell reads go through a one-record buffer; iterating rows in the outer
/// loop and fields in the inner loop (the way `collect::decode_table`
/// does) costs one seek+read per row, matching the on-disk layout.
pub struct DbfTable<R: io::Read + io::Seek> {
    file: R,
    n_records: usize,
    n_header_bytes: usize,
    n_bytes_per_record: usize,
    fields: Vec<DbfFieldInfo>,
    resolved_encoding: String,
    encoding: Option<EncodingRef>,
    current_row: Option<usize>,
    record_buf: Vec<u8>,
}

// encoding::EncodingRef does not implement std::fmt::Debug
impl<R: io::Read + io::Seek> fmt::Debug for DbfTable<R> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("DbfTable")
            .field("n_records", &self.n_records)
            .field("n_bytes_per_record", &self.n_bytes_per_record)
            .field("fields", &self.fields)
            .field("resolved_encoding", &self.resolved_encoding)
            .finish()
    }
}

struct DbfHeader {
    n_records: usize,
    n_header_bytes: usize,
    n_bytes_per_record: usize,
    language_driver_id: u8,
}

/// Reads the first 32 bytes of the file.
///
/// Side-effect: advances the file cursor 32 bytes.
fn read_dbf_header<R: io::Read>(file: &mut R) -> Result<DbfHeader, DbfError> {
    let mut buf = [0u8; DBF_HEADER_LENGTH];

    if let Err(err) = file.read_exact(&mut buf) {
        return Err(DbfError::IOError(err));
    }

    // It's hard to come up with a ParseError, because virtually any
    // combination of 32 bytes is a valid .dbf header.
    //
    // The one exception: invalid dates. Bytes 1-3 (base 0) are "YMD"; all
    // years are valid, but there are only 12 months and 31 days.
    if buf[2] > 12 || buf[3] > 31 {
        return Err(DbfError::ParseError(String::from(
            "The first four bytes of the file mention an invalid creation date. This is not a valid .dbf file.",
        )));
    }

    Ok(DbfHeader {
        n_records: LittleEndian::read_u32(&buf[4..8]) as usize,
        n_header_bytes: LittleEndian::read_u16(&buf[8..10]) as usize,
        n_bytes_per_record: LittleEndian::read_u16(&buf[10..12]) as usize,
        language_driver_id: buf[29],
    })
}

/// Reads the field descriptor array.
///
/// Assumes exactly DBF_HEADER_LENGTH bytes of the file have been read
/// already. Side-effect: advances the file cursor to the first data record.
fn read_dbf_fields<R: io::Read>(file: &mut R, header: &DbfHeader) -> Result<Vec<DbfFieldInfo>, DbfError> {
    if header.n_header_bytes < DBF_HEADER_LENGTH {
        return Err(DbfError::ParseError(format!(
            "Header claims to be {} bytes long, but the fixed part alone is {}",
            header.n_header_bytes, DBF_HEADER_LENGTH
        )));
    }

    let mut buf = vec![0u8; header.n_header_bytes - DBF_HEADER_LENGTH];
    if let Err(err) = file.read_exact(&mut buf) {
        return Err(DbfError::IOError(err));
    }

    let mut fields = Vec::new();
    let mut offset = 1; // row byte 0 is the deletion flag

    for chunk in buf.chunks(DBF_FIELD_DESCRIPTOR_LENGTH) {
        if chunk.is_empty() || chunk[0] == DBF_FIELD_TERMINATOR {
            break;
        }
        if chunk.len() < DBF_FIELD_DESCRIPTOR_LENGTH {
            return Err(DbfError::ParseError(String::from(
                "Field descriptor array ends mid-descriptor",
            )));
        }

        let name_bytes: Vec<u8> = chunk[0..11].iter().cloned().take_while(|&b| b != 0).collect();
        let width = chunk[16] as usize;

        fields.push(DbfFieldInfo {
            name: String::from_utf8_lossy(&name_bytes).into_owned(),
            native_type: chunk[11],
            width: width,
            precision: chunk[17] as usize,
            offset: offset,
        });
        offset += width;
    }

    Ok(fields)
}

/// The contents of the ".cpg" companion file, if one exists next to the
/// ".dbf" (same case convention as the ".shx" sibling of a ".shp").
fn read_cpg_sibling(dbf_path: &Path) -> Option<String> {
    let upper = match dbf_path.extension() {
        Some(ext) => ext == "DBF",
        None => false,
    };

    let mut cpg_path = PathBuf::from(dbf_path);
    cpg_path.set_extension(if upper { "CPG" } else { "cpg" });

    match fs::File::open(&cpg_path) {
        Err(_) => None,
        Ok(mut f) => {
            let mut contents = String::new();
            match f.read_to_string(&mut contents) {
                Err(_) => None,
                Ok(_) => {
                    let trimmed = contents.trim().to_string();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed)
                    }
                }
            }
        }
    }
}

/// Trims a cell's padding. Numeric types are blank-padded on the left,
/// text on the right; logical cells are a single byte that must survive
/// untouched (0x00 is a meaningful value there).
fn trim_cell(native_type: u8, bytes: &[u8]) -> &[u8] {
    fn is_pad(b: u8) -> bool {
        b == b' ' || b == 0
    }

    match native_type {
        b'L' => bytes,
        b'N' | b'F' | b'I' | b'D' => {
            let start = bytes.iter().position(|&b| !is_pad(b)).unwrap_or(bytes.len());
            let end = bytes.iter().rposition(|&b| !is_pad(b)).map_or(start, |p| p + 1);
            &bytes[start..end]
        }
        _ => {
            let end = bytes.iter().rposition(|&b| !is_pad(b)).map_or(0, |p| p + 1);
            &bytes[..end]
        }
    }
}

impl DbfTable<io::BufReader<fs::File>> {
    /// Opens a ".dbf" file.
    ///
    /// The text encoding is, in order of preference: `encoding_override`
    /// verbatim; the ".cpg" companion file's contents; the header's
    /// language driver id (as `LDID/<n>`); UTF-8.
    pub fn open(
        path: &Path,
        encoding_override: Option<&str>,
    ) -> Result<DbfTable<io::BufReader<fs::File>>, DbfError> {
        match file::open_binary(path) {
            Err(err) => Err(DbfError::IOError(err)),
            Ok(f) => DbfTable::new(f, read_cpg_sibling(path), encoding_override),
        }
    }
}

impl<R: io::Read + io::Seek> DbfTable<R> {
    /// Builds a table over any seekable stream. `cpg` stands in for the
    /// ".cpg" companion file (there is no path to find it by here).
    pub fn new(
        mut file: R,
        cpg: Option<String>,
        encoding_override: Option<&str>,
    ) -> Result<DbfTable<R>, DbfError> {
        let header = read_dbf_header(&mut file)?;
        let fields = read_dbf_fields(&mut file, &header)?;

        let resolved = match encoding_override {
            Some(encoding) => String::from(encoding),
            None => {
                let descriptor = match cpg {
                    Some(contents) => contents,
                    None => {
                        if header.language_driver_id != 0 {
                            format!("LDID/{}", header.language_driver_id)
                        } else {
                            String::new()
                        }
                    }
                };
                codepage::resolve_encoding(&descriptor)
            }
        };
        let resolved = if resolved.is_empty() {
            String::from("UTF-8")
        } else {
            resolved
        };

        let converter = codepage::encoding_for(&resolved);
        if converter.is_none() {
            warn!("no converter for text encoding '{}'; raw bytes will pass through", resolved);
        }

        Ok(DbfTable {
            file: file,
            n_records: header.n_records,
            n_header_bytes: header.n_header_bytes,
            n_bytes_per_record: header.n_bytes_per_record,
            fields: fields,
            resolved_encoding: resolved,
            encoding: converter,
            current_row: None,
            record_buf: Vec::new(),
        })
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn row_count(&self) -> usize {
        self.n_records
    }

    pub fn fields(&self) -> &[DbfFieldInfo] {
        &self.fields
    }

    pub fn field_info(&self, field: usize) -> &DbfFieldInfo {
        &self.fields[field]
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// The encoding attribute text will be converted from, e.g. "CP932" or
    /// "ISO-8859-1". "UTF-8" when the file doesn't say.
    pub fn resolved_encoding(&self) -> &str {
        &self.resolved_encoding
    }

    /// The converter for `resolved_encoding()`, when one exists.
    pub fn encoding(&self) -> Option<EncodingRef> {
        self.encoding
    }

    fn load_row(&mut self, row: usize) -> Result<(), DbfError> {
        if self.current_row == Some(row) {
            return Ok(());
        }

        if row >= self.n_records {
            return Err(DbfError::ParseError(format!(
                "Row {} is out of range: the table has {} rows",
                row, self.n_records
            )));
        }

        let byte_offset = self.n_header_bytes as u64 + (row * self.n_bytes_per_record) as u64;
        if let Err(err) = self.file.seek(io::SeekFrom::Start(byte_offset)) {
            return Err(DbfError::IOError(err));
        }

        let mut buf = vec![0u8; self.n_bytes_per_record];
        if let Err(err) = self.file.read_exact(&mut buf) {
            return Err(DbfError::IOError(err));
        }

        self.record_buf = buf;
        self.current_row = Some(row);
        Ok(())
    }

    /// The trimmed raw bytes of one cell.
    pub fn raw_value(&mut self, row: usize, field: usize) -> Result<Vec<u8>, DbfError> {
        self.load_row(row)?;

        let info = &self.fields[field];
        if info.offset + info.width > self.record_buf.len() {
            return Err(DbfError::ParseError(format!(
                "Field {} extends past the {}-byte record",
                field, self.n_bytes_per_record
            )));
        }

        let cell = &self.record_buf[info.offset..info.offset + info.width];
        Ok(trim_cell(info.native_type, cell).to_vec())
    }

    /// The cell as text, raw bytes decoded leniently. (Encoding-aware
    /// conversion, with problem reporting, lives in `collect`.)
    pub fn raw_string(&mut self, row: usize, field: usize) -> Result<String, DbfError> {
        self.raw_value(row, field)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// `true` when the cell holds the format's null marker for its type:
    /// all-blank (or all-`*` for numerics), or '?' for logicals.
    pub fn is_null(&mut self, row: usize, field: usize) -> Result<bool, DbfError> {
        let native_type = self.fields[field].native_type;
        let bytes = self.raw_value(row, field)?;

        Ok(match native_type {
            b'N' | b'F' | b'I' | b'D' => {
                bytes.is_empty() || bytes.iter().all(|&b| b == b'*')
            }
            b'L' => bytes.is_empty() || bytes[0] == b'?' || bytes[0] == b' ',
            _ => bytes.is_empty(),
        })
    }
}
