//! On-disk framing for tree images.
//!
//! ```text
//! [8 bytes: magic "DEVSTATE"]
//! [4 bytes: format version (little-endian u32)]
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (serde_json-encoded tree)]
//! ```
//!
//! Commits replace the whole file, so there is exactly one image per file.
//! A short read, a length mismatch or a CRC failure means the file was not
//! produced by a completed commit and is reported as corrupt.

use std::path::Path;

use crate::error::{Result, TreeError};
use crate::tree::Tree;

/// File magic identifying a devstate tree image.
pub const MAGIC: &[u8; 8] = b"DEVSTATE";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Header size: magic + version + length + CRC.
pub const HEADER_SIZE: usize = 20;

/// Serialize a tree into a framed image.
pub fn encode(tree: &Tree) -> Result<Vec<u8>> {
    let payload =
        serde_json::to_vec(tree).map_err(|e| TreeError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| TreeError::Serialization(format!("image too large: {} bytes", payload.len())))?;
    let crc = crc32fast::hash(&payload);

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Validate and deserialize a framed image read from `path`.
pub fn decode(path: &Path, bytes: &[u8]) -> Result<Tree> {
    let corrupt = |reason: String| TreeError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.len() < HEADER_SIZE {
        return Err(corrupt(format!(
            "file is {} bytes, shorter than the {HEADER_SIZE}-byte header",
            bytes.len()
        )));
    }
    if &bytes[0..8] != MAGIC {
        return Err(corrupt("bad magic".into()));
    }

    let version = read_u32(&bytes[8..12]);
    if version != FORMAT_VERSION {
        return Err(TreeError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: version,
            expected: FORMAT_VERSION,
        });
    }

    let length = read_u32(&bytes[12..16]) as usize;
    let expected_crc = read_u32(&bytes[16..20]);
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != length {
        return Err(corrupt(format!(
            "payload length {} does not match header length {length}",
            payload.len()
        )));
    }

    let actual_crc = crc32fast::hash(payload);
    if actual_crc != expected_crc {
        return Err(corrupt(format!(
            "CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"
        )));
    }

    serde_json::from_slice(payload).map_err(|e| corrupt(format!("invalid payload: {e}")))
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Tree {
        let mut tree = Tree::new();
        tree.insert("bot".into(), json!({"x": 10, "y": 20}));
        tree.insert("pi".into(), json!({"last_sync": "2015-03-01T12:00:00Z"}));
        tree
    }

    #[test]
    fn header_layout() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(&bytes[0..8], MAGIC);
        assert_eq!(read_u32(&bytes[8..12]), FORMAT_VERSION);
        assert_eq!(read_u32(&bytes[12..16]) as usize, bytes.len() - HEADER_SIZE);
    }

    #[test]
    fn decode_accepts_encoded_image() {
        let tree = sample();
        let bytes = encode(&tree).unwrap();
        assert_eq!(decode(Path::new("t"), &bytes).unwrap(), tree);
    }

    #[test]
    fn rejects_short_file() {
        let err = decode(Path::new("t"), b"DEVST").unwrap_err();
        assert!(matches!(err, TreeError::Corrupt { .. }));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[0] = b'X';
        let err = decode(Path::new("t"), &bytes).unwrap_err();
        assert!(matches!(err, TreeError::Corrupt { .. }));
    }

    #[test]
    fn rejects_future_version() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[8..12].copy_from_slice(&7u32.to_le_bytes());
        let err = decode(Path::new("t"), &bytes).unwrap_err();
        assert!(matches!(
            err,
            TreeError::UnsupportedVersion { found: 7, expected: 1, .. }
        ));
    }

    #[test]
    fn crc_detects_flipped_byte() {
        let mut bytes = encode(&sample()).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0xFF;
        let err = decode(Path::new("t"), &bytes).unwrap_err();
        assert!(err.to_string().contains("CRC mismatch"), "got: {err}");
    }

    #[test]
    fn rejects_truncated_payload() {
        let bytes = encode(&sample()).unwrap();
        let err = decode(Path::new("t"), &bytes[..bytes.len() - 4]).unwrap_err();
        assert!(err.to_string().contains("does not match header length"));
    }
}
