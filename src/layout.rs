use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::KiraError;
use crate::ledger::{LEDGER_FILE_NAME, ProgressLedger};
use crate::record::TransferRecord;

/// Where downloaded files and the progress ledger live.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: Utf8PathBuf,
    group_by_study: bool,
}

impl OutputLayout {
    pub fn new(root: Utf8PathBuf, group_by_study: bool) -> Self {
        Self {
            root,
            group_by_study,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn group_by_study(&self) -> bool {
        self.group_by_study
    }

    pub fn ensure_root(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("cannot create dir {}: {err}", self.root)))
    }

    /// `<root>/<file>` or `<root>/<study>/<file>`.
    pub fn destination(&self, record: &TransferRecord) -> Utf8PathBuf {
        if self.group_by_study {
            self.root.join(record.group_id()).join(record.file_name())
        } else {
            self.root.join(record.file_name())
        }
    }

    pub fn ledger_path(&self) -> Utf8PathBuf {
        self.root.join(LEDGER_FILE_NAME)
    }

    pub fn ledger(&self) -> ProgressLedger {
        ProgressLedger::new(self.ledger_path().into_std_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let record = TransferRecord::new(
            "SRR25042885",
            "PRJNA123456",
            "ftp.sra.ebi.ac.uk/vol1/fastq/SRR250/001/SRR25042885/SRR25042885.fastq.gz",
            "5fc34f3bd5a7f2696902d661d8b21981",
        )
        .unwrap();

        let flat = OutputLayout::new(Utf8PathBuf::from("/data/out"), false);
        assert_eq!(flat.destination(&record).as_str(), "/data/out/SRR25042885.fastq.gz");
        assert_eq!(flat.ledger_path().as_str(), "/data/out/.progress.csv");

        let grouped = OutputLayout::new(Utf8PathBuf::from("/data/out"), true);
        assert!(
            grouped
                .destination(&record)
                .ends_with("PRJNA123456/SRR25042885.fastq.gz")
        );
        assert_eq!(grouped.ledger_path(), flat.ledger_path());
    }
}
