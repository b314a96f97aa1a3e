use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use md5::{Digest, Md5};

use crate::error::KiraError;

const BLOCK_SIZE: usize = 64 * 1024;

/// Lowercase hex MD5 of a file, read in fixed-size blocks.
///
/// MD5 is what the archive publishes in its `*_md5` columns.
pub fn md5_file(path: &Path) -> Result<String, KiraError> {
    let mut file = File::open(path)
        .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; BLOCK_SIZE];
    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(KiraError::Filesystem(format!(
                    "read {}: {err}",
                    path.display()
                )));
            }
        };
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
