use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::checksum;
use crate::error::KiraError;
use crate::layout::OutputLayout;
use crate::ledger::ProgressLedger;
use crate::planner::Outstanding;
use crate::record::TransferRecord;
use crate::transfer::TransferClient;

/// Simultaneous transfers the archive tolerates from one client.
pub const ENA_MAX_CONCURRENT: usize = 50;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub max_retries: u32,
    pub max_concurrent: usize,
    pub scheme: String,
    pub log_full_path: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_concurrent: ENA_MAX_CONCURRENT,
            scheme: "https".to_string(),
            log_full_path: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub fetched: usize,
    pub verified: usize,
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    fetched: bool,
    verified: bool,
}

pub struct DownloadCoordinator<C: TransferClient> {
    client: Arc<C>,
    ledger: Arc<ProgressLedger>,
    layout: OutputLayout,
    options: DownloadOptions,
}

impl<C: TransferClient + 'static> DownloadCoordinator<C> {
    pub fn new(
        client: Arc<C>,
        ledger: Arc<ProgressLedger>,
        layout: OutputLayout,
        options: DownloadOptions,
    ) -> Self {
        Self {
            client,
            ledger,
            layout,
            options,
        }
    }

    /// Downloads and verifies every outstanding record, at most
    /// `max_concurrent` at a time.
    ///
    /// Individual failures only show up as unverified ledger lines. The batch
    /// fails with `NoSuccessfulDownloads` when transfers were attempted and
    /// none of them fetched anything, and with the checksum error when a
    /// fetched file cannot be read back.
    pub fn run_batch(&self, group: &str, outstanding: Outstanding) -> Result<BatchSummary, KiraError> {
        self.ledger.append(None)?;
        if outstanding.is_empty() {
            debug!(group, "nothing outstanding");
            return Ok(BatchSummary::default());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("kira-ena-transfer")
            .build()
            .map_err(|err| KiraError::Runtime(err.to_string()))?;
        let outcomes = runtime.block_on(self.drive(outstanding))?;

        let summary = BatchSummary {
            attempted: outcomes.len(),
            fetched: outcomes.iter().filter(|outcome| outcome.fetched).count(),
            verified: outcomes.iter().filter(|outcome| outcome.verified).count(),
        };
        info!(
            group,
            attempted = summary.attempted,
            fetched = summary.fetched,
            verified = summary.verified,
            "batch finished"
        );
        if summary.attempted > 0 && summary.fetched == 0 {
            return Err(KiraError::NoSuccessfulDownloads {
                group: group.to_string(),
                attempted: summary.attempted,
            });
        }
        Ok(summary)
    }

    async fn drive(&self, outstanding: Outstanding) -> Result<Vec<Outcome>, KiraError> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        for record in outstanding.into_values() {
            let unit = TransferUnit {
                client: Arc::clone(&self.client),
                ledger: Arc::clone(&self.ledger),
                url: format!("{}://{}", self.options.scheme, record.remote_path()),
                destination: self.layout.destination(&record).into_std_path_buf(),
                max_retries: self.options.max_retries,
                log_full_path: self.options.log_full_path,
                record,
            };
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|err| KiraError::Runtime(err.to_string()))?;
                tokio::task::spawn_blocking(move || unit.run())
                    .await
                    .map_err(|err| KiraError::Runtime(err.to_string()))?
            });
        }

        let mut outcomes = Vec::new();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|err| KiraError::Runtime(err.to_string()));
            match result.and_then(|outcome| outcome) {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    warn!("transfer task failed: {err}");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(outcomes),
        }
    }
}

struct TransferUnit<C: TransferClient> {
    client: Arc<C>,
    ledger: Arc<ProgressLedger>,
    record: TransferRecord,
    url: String,
    destination: PathBuf,
    max_retries: u32,
    log_full_path: bool,
}

impl<C: TransferClient> TransferUnit<C> {
    fn run(mut self) -> Result<Outcome, KiraError> {
        if !self.client.fetch(&self.url, &self.destination, self.max_retries) {
            return Ok(Outcome {
                fetched: false,
                verified: false,
            });
        }
        let shown = if self.log_full_path {
            self.destination.display().to_string()
        } else {
            self.record.file_name().to_string()
        };
        info!(run_accession = %self.record.run_id(), "{shown} downloaded");

        let digest = checksum::md5_file(&self.destination)?;
        if !self.record.mark_verified(&digest) {
            warn!(
                run_accession = %self.record.run_id(),
                expected = %self.record.expected_digest(),
                actual = %digest,
                "MD5 mismatch for {shown}"
            );
        }

        self.ledger.append(Some(&self.record))?;
        Ok(Outcome {
            fetched: true,
            verified: self.record.is_verified(),
        })
    }
}
