use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid {kind} accession: {value}")]
    InvalidAccession { kind: &'static str, value: String },

    #[error("invalid transfer record: {0}")]
    InvalidRecord(String),

    #[error("unknown file type: {0}")]
    InvalidFileType(String),

    #[error("malformed progress ledger {path} at line {line}: {message}")]
    #[diagnostic(help("the ledger is the download cache; fix or remove the line, or rerun with --no-cache"))]
    LedgerFormat {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("missing metadata field `{field}` in every row; got fields: {available}")]
    MissingField { field: String, available: String },

    #[error("failed to read metadata: {0}")]
    MetadataRead(String),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("transfer returned status {status} for {url}")]
    TransferStatus { status: u16, url: String },

    #[error("all {attempted} scheduled downloads failed for {group}")]
    NoSuccessfulDownloads { group: String, attempted: usize },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("download runtime error: {0}")]
    Runtime(String),
}
