use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::KiraError;
use crate::record::{LEDGER_HEADER, TransferRecord};

/// File name of the ledger inside an output directory.
pub const LEDGER_FILE_NAME: &str = ".progress.csv";

/// Append-only record of fetched files, one per output directory.
///
/// Only lines with `md5_passed=True` count as done when the ledger is read back.
#[derive(Debug)]
pub struct ProgressLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ProgressLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(LEDGER_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the set of verified transfers. Returns an empty set when caching is off.
    pub fn load(&self, cache_enabled: bool) -> Result<HashSet<TransferRecord>, KiraError> {
        let mut verified = HashSet::new();
        if !cache_enabled || !self.path.exists() {
            return Ok(verified);
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", self.path.display())))?;
        let complete = content.ends_with('\n');
        let lines: Vec<&str> = content.lines().collect();
        let last = lines.len().saturating_sub(1);

        // line 0 is the header
        for (index, line) in lines.iter().enumerate().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            match TransferRecord::from_ledger_line(line) {
                Ok(record) => {
                    if record.is_verified() {
                        verified.insert(record);
                    }
                }
                Err(err) if index == last && !complete => {
                    warn!(
                        ledger = %self.path.display(),
                        line = index + 1,
                        "ignoring interrupted ledger line: {err}"
                    );
                }
                Err(err) => {
                    return Err(KiraError::LedgerFormat {
                        path: self.path.clone(),
                        line: index + 1,
                        message: err.to_string(),
                    });
                }
            }
        }
        debug!(
            ledger = %self.path.display(),
            verified = verified.len(),
            "loaded progress ledger"
        );
        Ok(verified)
    }

    /// Creates the ledger with its header if needed, then appends `record` as one
    /// flushed line. Passing `None` only ensures the file exists.
    pub fn append(&self, record: Option<&TransferRecord>) -> Result<(), KiraError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| KiraError::Filesystem("progress ledger lock poisoned".to_string()))?;

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|err| self.io_error(err))?;

        let mut len = file.metadata().map_err(|err| self.io_error(err))?.len();
        if len > 0 && !ends_with_newline(&mut file, len).map_err(|err| self.io_error(err))? {
            len = drop_partial_line(&mut file).map_err(|err| self.io_error(err))?;
            warn!(ledger = %self.path.display(), "dropped interrupted ledger line");
        }
        if len == 0 {
            write_line(&mut file, LEDGER_HEADER).map_err(|err| self.io_error(err))?;
        }

        if let Some(record) = record {
            write_line(&mut file, &record.to_ledger_line()).map_err(|err| self.io_error(err))?;
        }
        Ok(())
    }

    fn io_error(&self, err: std::io::Error) -> KiraError {
        KiraError::Filesystem(format!("{}: {err}", self.path.display()))
    }
}

fn write_line(file: &mut File, line: &str) -> std::io::Result<()> {
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())?;
    file.flush()
}

fn ends_with_newline(file: &mut File, len: u64) -> std::io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

// Truncates back to the last complete line and returns the new length.
fn drop_partial_line(file: &mut File) -> std::io::Result<u64> {
    let mut content = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut content)?;
    let keep = content
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map(|index| index + 1)
        .unwrap_or(0) as u64;
    file.set_len(keep)?;
    Ok(keep)
}
