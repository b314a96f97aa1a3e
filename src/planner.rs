use std::collections::BTreeMap;
use std::path::Path;

use tracing::{info, warn};

use crate::domain::FileType;
use crate::error::KiraError;
use crate::ledger::ProgressLedger;
use crate::metadata::{MetadataRow, RUN_ACCESSION, RunMetadata, STUDY_ACCESSION, missing_field};
use crate::record::TransferRecord;

/// Outstanding transfers keyed by filename stem.
pub type Outstanding = BTreeMap<String, TransferRecord>;

/// Turns metadata rows into the transfers that still have to happen.
pub struct FetchPlanner<'a> {
    ledger: &'a ProgressLedger,
    cache: bool,
    log_full_path: bool,
    output_dir: Option<&'a Path>,
}

impl<'a> FetchPlanner<'a> {
    pub fn new(ledger: &'a ProgressLedger, cache: bool) -> Self {
        Self {
            ledger,
            cache,
            log_full_path: false,
            output_dir: None,
        }
    }

    /// Logs skipped files with their full output path instead of the basename.
    pub fn log_full_path(mut self, output_dir: &'a Path) -> Self {
        self.log_full_path = true;
        self.output_dir = Some(output_dir);
        self
    }

    pub fn plan(&self, rows: &RunMetadata, file_type: FileType) -> Result<Outstanding, KiraError> {
        let required = [
            RUN_ACCESSION,
            STUDY_ACCESSION,
            file_type.ftp_field(),
            file_type.md5_field(),
        ];
        for field in required {
            if !rows.is_empty() && !rows.values().any(|row| row.contains(field)) {
                return Err(missing_field(field, rows));
            }
        }

        let verified = self.ledger.load(self.cache)?;
        let mut outstanding = Outstanding::new();
        for row in rows.values() {
            let records = match split_row(row, file_type) {
                Ok(records) => records,
                Err(reason) => {
                    warn!(
                        run_accession = %row.run_accession(),
                        "Found invalid metadata for run accession {}. Reason: {reason}. Skipping.",
                        row.run_accession()
                    );
                    continue;
                }
            };
            for record in records {
                if verified.contains(&record) {
                    info!(file = %record.file_name(), "{} already exists. Skipping.", self.display_path(&record));
                    continue;
                }
                if let Some(previous) = outstanding.insert(record.key().to_string(), record) {
                    warn!(
                        key = %previous.key(),
                        "{} shares its file stem with another transfer and was replaced",
                        previous.remote_path()
                    );
                }
            }
        }
        Ok(outstanding)
    }

    fn display_path(&self, record: &TransferRecord) -> String {
        match (self.log_full_path, self.output_dir) {
            (true, Some(dir)) => dir.join(record.file_name()).display().to_string(),
            _ => record.file_name().to_string(),
        }
    }
}

fn split_row(
    row: &MetadataRow,
    file_type: FileType,
) -> Result<Vec<TransferRecord>, String> {
    let field = |name: &str| {
        row.get(name)
            .ok_or_else(|| format!("missing field {name}"))
    };
    let ftp = field(file_type.ftp_field())?;
    let md5 = field(file_type.md5_field())?;
    if ftp.trim().is_empty() {
        return Err("No FTP URL was found".to_string());
    }

    let ftp_links: Vec<&str> = ftp.split(';').collect();
    let md5s: Vec<&str> = md5.split(';').collect();
    if ftp_links.len() != md5s.len() {
        return Err(
            "The number of FTP URLs does not match the number of MD5 checksums".to_string(),
        );
    }

    let run = field(RUN_ACCESSION)?;
    let study = field(STUDY_ACCESSION)?;
    ftp_links
        .iter()
        .zip(md5s.iter())
        .map(|(link, md5)| {
            TransferRecord::new(run, study, link, md5).map_err(|err| err.to_string())
        })
        .collect()
}
