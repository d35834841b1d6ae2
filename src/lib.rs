//! Reads the ESRI Shapefile family: ".shp" geometry, ".shx" record index
//! and ".dbf" attribute tables.
//!
//! Three readers, usable separately or together:
//!
//! * `ShxIndex` resolves a shape id to a ".shp" byte range in O(1)-ish
//!   time, through a small read-ahead cache over the flat offset table.
//! * `ShpReader` decodes the mixed-endian geometry records into typed
//!   payloads (point, polyline, polygon, multipoint, with Z/M variants),
//!   sequentially or by shape id.
//! * `DbfTable` plus the `collect` module decode the fixed-width attribute
//!   rows into typed columns under a column spec, converting legacy
//!   code-page text to UTF-8 and reporting per-cell problems instead of
//!   aborting.
//!
//! Geometries can also be streamed through the `GeometryHandler` event
//! protocol (`stream_geometry`), and `meta` has the one-call operations:
//! `read_file_meta`, `read_geometry_meta`, `read_shx_meta`,
//! `read_shx_records`, `read_dbf_column_meta`, `read_dbf_table`.
//!
//! What these files _don't_ contain: a projection. Sometimes there's a
//! ".prj" companion with that information, but no file format can
//! represent every projection out there. This library ignores it and
//! returns `f64` coordinates as stored.

extern crate byteorder;
extern crate encoding;
extern crate itertools;
#[macro_use] extern crate lazy_static;
#[macro_use] extern crate log;
extern crate regex;

pub mod codepage;
pub mod collect;
pub mod dbf;
pub mod file;
pub mod handler;
pub mod meta;
pub mod shp;
pub mod shx;
pub mod stream;

pub use collect::{decode_table, decode_table_with_interrupt, Collector, Column, DecodedTable, Problem};
pub use dbf::{DbfError, DbfFieldInfo, DbfTable};
pub use handler::{Coord, Dims, GeometryHandler, GeometryMeta, GeometryType, HandlerResult, VectorMeta};
pub use meta::{read_dbf_column_meta, read_dbf_table, read_file_meta, read_geometry_meta,
               read_shx_meta, read_shx_records, FileMeta, GeometryRowMeta, ShxMeta};
pub use shp::{ShapePayload, ShapeRecord, ShapeType, ShpBounds, ShpError, ShpHeader, ShpPoint, ShpReader};
pub use shx::{ShxError, ShxIndex, ShxLookup, ShxRecord};
pub use stream::{stream_geometry, stream_geometry_records};
