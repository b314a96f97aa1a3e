use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::Serialize;

use crate::error::KiraError;

/// Header line of the progress ledger, in serialization order.
pub const LEDGER_HEADER: &str = "run_accession,study_accession,ftp,md5,md5_passed";

const LEDGER_FIELDS: usize = 5;

/// One remote file to fetch.
///
/// Two records are the same transfer when their remote paths match, whatever
/// the other fields say.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    run_id: String,
    group_id: String,
    remote_path: String,
    expected_digest: String,
    verified: bool,
    #[serde(skip)]
    key: String,
}

impl TransferRecord {
    pub fn new(
        run_id: &str,
        group_id: &str,
        remote_path: &str,
        expected_digest: &str,
    ) -> Result<Self, KiraError> {
        let run_id = required("run_accession", run_id)?;
        let group_id = required("study_accession", group_id)?;
        let remote_path = required("ftp", remote_path)?;
        if remote_path.ends_with('/') {
            return Err(KiraError::InvalidRecord(format!(
                "ftp path has no file name: {remote_path}"
            )));
        }
        let expected_digest = required("md5", expected_digest)?;
        let key = stem(&remote_path);
        Ok(Self {
            run_id,
            group_id,
            remote_path,
            expected_digest,
            verified: false,
            key,
        })
    }

    /// Parses one ledger data line (without its trailing newline).
    pub fn from_ledger_line(line: &str) -> Result<Self, KiraError> {
        let fields: Vec<&str> = line.trim().split(',').collect();
        if fields.len() != LEDGER_FIELDS {
            return Err(KiraError::InvalidRecord(format!(
                "expected {LEDGER_FIELDS} fields, got {}",
                fields.len()
            )));
        }
        let mut record = Self::new(fields[0], fields[1], fields[2], fields[3])?;
        record.verified = parse_flag(fields[4])?;
        Ok(record)
    }

    pub fn to_ledger_line(&self) -> String {
        [
            self.run_id.as_str(),
            self.group_id.as_str(),
            self.remote_path.as_str(),
            self.expected_digest.as_str(),
            if self.verified { "True" } else { "False" },
        ]
        .join(",")
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn expected_digest(&self) -> &str {
        &self.expected_digest
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Filename stem of the remote path, used to index outstanding work.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Base filename of the remote path.
    pub fn file_name(&self) -> &str {
        self.remote_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.remote_path)
    }

    /// Records the outcome of comparing a computed digest with the expected one.
    /// Only the component that fetched the file calls this, once per transfer.
    pub(crate) fn mark_verified(&mut self, computed_digest: &str) -> bool {
        self.verified = computed_digest.eq_ignore_ascii_case(&self.expected_digest);
        self.verified
    }
}

impl PartialEq for TransferRecord {
    fn eq(&self, other: &Self) -> bool {
        self.remote_path == other.remote_path
    }
}

impl Eq for TransferRecord {}

impl Hash for TransferRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.remote_path.hash(state);
    }
}

impl fmt::Display for TransferRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ledger_line())
    }
}

fn required(field: &str, value: &str) -> Result<String, KiraError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(KiraError::InvalidRecord(format!(
            "{field} must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

fn stem(remote_path: &str) -> String {
    Path::new(remote_path)
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or(remote_path)
        .to_string()
}

fn parse_flag(value: &str) -> Result<bool, KiraError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "y" | "yes" | "on" | "1" => Ok(true),
        "false" | "n" | "no" | "off" | "0" => Ok(false),
        other => Err(KiraError::InvalidRecord(format!(
            "unrecognised md5_passed value: {other}"
        ))),
    }
}
