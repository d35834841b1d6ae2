/// Byte-stream helpers shared by the ".shp", ".shx" and ".dbf" readers.
///
/// Every reader in this crate is generic over `io::Read + io::Seek`, so any
/// backend works: a buffered file (the common case, via `open_binary()`) or
/// an in-memory `io::Cursor` (the tests' case).
use std::fs;
use std::io;
use std::path::Path;

/// Opens a file for buffered, seekable binary reads.
pub fn open_binary(path: &Path) -> io::Result<io::BufReader<fs::File>> {
    fs::File::open(path).map(io::BufReader::new)
}

/// Returns the total length of a stream, in bytes.
///
/// The cursor is restored to where it was before the call.
pub fn stream_len<R: io::Seek>(file: &mut R) -> io::Result<u64> {
    let position = file.seek(io::SeekFrom::Current(0))?;
    let len = file.seek(io::SeekFrom::End(0))?;
    file.seek(io::SeekFrom::Start(position))?;
    Ok(len)
}

/// Reads as many bytes as the stream can provide, up to `buf.len()`.
///
/// Unlike `read_exact()`, a short read is not an error: the number of bytes
/// actually read is returned so callers can truncate at a record boundary.
pub fn read_up_to<R: io::Read>(file: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut n_total: usize = 0;

    while n_total < buf.len() {
        match file.read(&mut buf[n_total..]) {
            Ok(0) => break,
            Ok(n) => n_total += n,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }

    Ok(n_total)
}
