use crate::error::{Error, Result};
use std::{fs, io, path::Path};

pub const DAT_FILE: &str = "ABPFilterParserData.dat";

pub const DEFAULT_PAYLOAD: &[u8] = b"{user:name}";

/// Reads the whole file. A missing or empty file is `NotFound`.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Err(Error::NotFound(path.to_path_buf())),
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(path.to_path_buf())),
        Err(e) => Err(e.into()),
    }
}

pub fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).map_err(Error::from)
}

/// Reads the file, writing `default` and retrying the read once when it is
/// missing.
pub fn read_or_init(path: &Path, default: &[u8]) -> Result<Vec<u8>> {
    match read_file(path) {
        Err(Error::NotFound(_)) => {
            tracing::warn!("{} missing, writing default", path.display());
            write_file(path, default)?;
            read_file(path)
        }
        other => other,
    }
}
