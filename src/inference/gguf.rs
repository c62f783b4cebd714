//! GGUF header preflight
//!
//! llama.cpp can abort the whole process when handed a malformed model file,
//! so the session loader reads the header first and rejects anything that is
//! not a plausible GGUF file. Failures count as the model-load stage.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::inference::error::RuntimeError;

/// GGUF magic bytes (little-endian: "GGUF").
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Header size: magic(4) + version(4) + tensor_count(8) + metadata_kv_count(8).
const GGUF_HEADER_LEN: u64 = 24;

/// Fields read from a GGUF file header.
#[derive(Debug, Clone, Copy)]
pub struct GgufHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

/// Reads and validates the GGUF header of the file at `path`.
///
/// Checks the magic bytes and that the format version is one the engine
/// understands (v2 and v3). Any problem, including the file being missing or
/// too short, is reported as a model-load failure naming the cause.
pub fn preflight_gguf(path: &Path) -> Result<GgufHeader, RuntimeError> {
    let mut file = File::open(path)
        .map_err(|e| RuntimeError::ModelLoadFailed(format!("{}: {e}", path.display())))?;

    let file_size = file
        .seek(SeekFrom::End(0))
        .map_err(|e| RuntimeError::ModelLoadFailed(e.to_string()))?;
    if file_size < GGUF_HEADER_LEN {
        return Err(RuntimeError::ModelLoadFailed(format!(
            "{}: file too small to be a GGUF model ({file_size} bytes)",
            path.display()
        )));
    }
    file.seek(SeekFrom::Start(0))
        .map_err(|e| RuntimeError::ModelLoadFailed(e.to_string()))?;

    let magic = read_u32(&mut file)?;
    if magic != GGUF_MAGIC {
        return Err(RuntimeError::ModelLoadFailed(format!(
            "{}: not a GGUF file (magic 0x{magic:08X})",
            path.display()
        )));
    }

    let version = read_u32(&mut file)?;
    if !(2..=3).contains(&version) {
        return Err(RuntimeError::ModelLoadFailed(format!(
            "{}: unsupported GGUF version {version}",
            path.display()
        )));
    }

    let tensor_count = read_u64(&mut file)?;
    let metadata_kv_count = read_u64(&mut file)?;

    Ok(GgufHeader {
        version,
        tensor_count,
        metadata_kv_count,
    })
}

fn read_u32(file: &mut File) -> Result<u32, RuntimeError> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)
        .map_err(|e| RuntimeError::ModelLoadFailed(e.to_string()))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(file: &mut File) -> Result<u64, RuntimeError> {
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)
        .map_err(|e| RuntimeError::ModelLoadFailed(e.to_string()))?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_header(magic: u32, version: u32) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".gguf").tempfile().unwrap();
        file.write_all(&magic.to_le_bytes()).unwrap();
        file.write_all(&version.to_le_bytes()).unwrap();
        file.write_all(&7u64.to_le_bytes()).unwrap(); // tensor_count
        file.write_all(&3u64.to_le_bytes()).unwrap(); // metadata_kv_count
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_preflight_accepts_valid_header() {
        let file = write_header(GGUF_MAGIC, 3);
        let header = preflight_gguf(file.path()).unwrap();
        assert_eq!(header.version, 3);
        assert_eq!(header.tensor_count, 7);
        assert_eq!(header.metadata_kv_count, 3);
    }

    #[test]
    fn test_preflight_rejects_bad_magic() {
        let file = write_header(0xDEAD_BEEF, 3);
        let err = preflight_gguf(file.path()).unwrap_err();
        assert!(matches!(err, RuntimeError::ModelLoadFailed(_)));
        assert!(err.to_string().contains("not a GGUF file"));
    }

    #[test]
    fn test_preflight_rejects_unsupported_version() {
        let file = write_header(GGUF_MAGIC, 9);
        let err = preflight_gguf(file.path()).unwrap_err();
        assert!(err.to_string().contains("version 9"));
    }

    #[test]
    fn test_preflight_rejects_truncated_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&GGUF_MAGIC.to_le_bytes()).unwrap();
        file.flush().unwrap();
        let err = preflight_gguf(file.path()).unwrap_err();
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn test_preflight_rejects_missing_file() {
        let err = preflight_gguf(Path::new("/no/such/model.gguf")).unwrap_err();
        assert!(matches!(err, RuntimeError::ModelLoadFailed(_)));
    }
}
