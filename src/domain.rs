use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::KiraError;

/// Which pair of file columns a metadata row is read from.
///
/// The archive publishes primary sequencing files (`fastq_*`) and the files
/// originally uploaded by the submitter (`submitted_*`) side by side in the
/// same row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Fastq,
    Submitted,
}

struct FileFields {
    ftp: &'static str,
    md5: &'static str,
}

const FASTQ_FIELDS: FileFields = FileFields {
    ftp: "fastq_ftp",
    md5: "fastq_md5",
};

const SUBMITTED_FIELDS: FileFields = FileFields {
    ftp: "submitted_ftp",
    md5: "submitted_md5",
};

impl FileType {
    fn fields(self) -> &'static FileFields {
        match self {
            FileType::Fastq => &FASTQ_FIELDS,
            FileType::Submitted => &SUBMITTED_FIELDS,
        }
    }

    pub fn ftp_field(self) -> &'static str {
        self.fields().ftp
    }

    pub fn md5_field(self) -> &'static str {
        self.fields().md5
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Fastq => write!(f, "fastq"),
            FileType::Submitted => write!(f, "submitted"),
        }
    }
}

impl FromStr for FileType {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fastq" => Ok(FileType::Fastq),
            "submitted" => Ok(FileType::Submitted),
            _ => Err(KiraError::InvalidFileType(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AccessionKind {
    Run,
    Sample,
    Study,
}

impl AccessionKind {
    fn prefixes(self) -> &'static [&'static str] {
        match self {
            AccessionKind::Run => &["SRR", "ERR", "DRR"],
            AccessionKind::Sample => &["ERS", "DRS", "SRS", "SAM"],
            AccessionKind::Study => &["SRP", "ERP", "DRP", "PRJ"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessionKind::Run => "run",
            AccessionKind::Sample => "sample",
            AccessionKind::Study => "study",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Accession {
    kind: AccessionKind,
    value: String,
}

impl Accession {
    pub fn parse(value: &str, kind: AccessionKind) -> Result<Self, KiraError> {
        let normalized = value.trim();
        let is_valid = kind
            .prefixes()
            .iter()
            .any(|prefix| normalized.starts_with(prefix));
        if !is_valid {
            return Err(KiraError::InvalidAccession {
                kind: kind.as_str(),
                value: value.to_string(),
            });
        }
        Ok(Self {
            kind,
            value: normalized.to_string(),
        })
    }

    pub fn kind(&self) -> AccessionKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Keeps the valid accessions, logging and dropping the rest.
pub fn parse_accessions<I, S>(values: I, kind: AccessionKind) -> Vec<Accession>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed = Vec::new();
    for value in values {
        let value = value.as_ref();
        if value.trim().is_empty() {
            continue;
        }
        match Accession::parse(value, kind) {
            Ok(accession) => parsed.push(accession),
            Err(err) => warn!("{err}. Skipping..."),
        }
    }
    parsed
}
