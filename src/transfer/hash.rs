//! SHA-1 helpers
//!
//! Whole files are hashed in a streaming fashion with a bounded buffer;
//! parts are read into memory (they are capped by the part size) and hashed
//! there.

use sha1::{Digest, Sha1};
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Lowercase hex SHA-1 of a byte slice
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Lowercase hex SHA-1 of a whole file, read `buffer_size` bytes at a time
pub async fn sha1_file(path: &Path, buffer_size: usize) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; buffer_size.max(1)];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Read exactly `length` bytes starting at `offset`
pub async fn read_range(path: &Path, offset: u64, length: u64) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let mut data = vec![0u8; length as usize];
    file.read_exact(&mut data).await?;
    Ok(data)
}
