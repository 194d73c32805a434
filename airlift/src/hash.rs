//! Streaming file hashing with size-tiered read buffers

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha1::{Digest, Sha1};

use crate::error::{Result, UpdateError};
use crate::remote::HashAlgorithm;

/// Read/write buffer size tiered by the expected file length.
///
/// Small files stay on small buffers; gigabyte-class files get up to 32 MiB.
pub fn buffer_size_for(length: u64) -> usize {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    let size = match length {
        l if l < MB => 8 * KB,
        l if l < 2 * MB => 16 * KB,
        l if l < 4 * MB => 32 * KB,
        l if l < 8 * MB => 64 * KB,
        l if l < 16 * MB => 256 * KB,
        l if l < 32 * MB => 512 * KB,
        l if l < 64 * MB => MB,
        l if l < 128 * MB => 2 * MB,
        l if l < 256 * MB => 4 * MB,
        l if l < 512 * MB => 8 * MB,
        l if l < GB => 16 * MB,
        _ => 32 * MB,
    };
    size as usize
}

/// Hash a file with the given algorithm, returning lowercase hex.
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| UpdateError::hash_error(path, format!("failed to open: {e}")))?;
    let length = file
        .metadata()
        .map_err(|e| UpdateError::hash_error(path, format!("failed to stat: {e}")))?
        .len();
    let mut buffer = vec![0u8; buffer_size_for(length)];

    match algorithm {
        HashAlgorithm::Sha1 => digest_stream::<Sha1>(&mut file, &mut buffer, path),
        HashAlgorithm::Md5 => digest_stream::<Md5>(&mut file, &mut buffer, path),
        HashAlgorithm::Crc32 => {
            let mut hasher = crc32fast::Hasher::new();
            loop {
                let read = file
                    .read(&mut buffer)
                    .map_err(|e| UpdateError::hash_error(path, format!("failed to read: {e}")))?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
            }
            Ok(format!("{:08x}", hasher.finalize()))
        }
    }
}

fn digest_stream<D: Digest>(file: &mut File, buffer: &mut [u8], path: &Path) -> Result<String> {
    let mut hasher = D::new();
    loop {
        let read = file
            .read(buffer)
            .map_err(|e| UpdateError::hash_error(path, format!("failed to read: {e}")))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-1 of an in-memory buffer, lowercase hex; used for version fingerprints.
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}
