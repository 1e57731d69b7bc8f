//! Content hashing (C2): streams a file in fixed-size blocks and emits a
//! hex digest that depends only on bytes, never on path or mtime.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

const BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("failed to read {path}: {source}")]
    ReadError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Hash a file's contents, returning a lowercase hex SHA-256 digest.
pub fn hash_file(path: &Path) -> Result<String, HashError> {
    let mut file = File::open(path).map_err(|source| HashError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; BLOCK_SIZE];
    loop {
        let read = file.read(&mut buffer).map_err(|source| HashError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(to_hex(&hasher.finalize()))
}

/// Hash an in-memory buffer the same way `hash_file` would, useful for tests
/// and for small in-memory previews fetched over the admin API.
pub fn hash_bytes(buffer: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(buffer);
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn identical_bytes_hash_identically_regardless_of_path() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        for p in [&a, &b] {
            let mut f = File::create(p).unwrap();
            f.write_all(b"same content").unwrap();
        }
        assert_eq!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
    }

    #[test]
    fn different_bytes_hash_differently() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"content one").unwrap();
        std::fs::write(&b, b"content two").unwrap();
        assert_ne!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = hash_file(Path::new("/no/such/file")).unwrap_err();
        assert!(matches!(err, HashError::ReadError { .. }));
    }

    #[test]
    fn hash_bytes_matches_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.bin");
        std::fs::write(&p, b"abc123").unwrap();
        assert_eq!(hash_file(&p).unwrap(), hash_bytes(b"abc123"));
    }
}
