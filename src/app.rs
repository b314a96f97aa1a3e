use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::config::ResolvedConfig;
use crate::coordinator::{BatchSummary, DownloadCoordinator, DownloadOptions};
use crate::error::KiraError;
use crate::layout::OutputLayout;
use crate::metadata::{MetadataSource, group_by_study};
use crate::planner::FetchPlanner;
use crate::transfer::TransferClient;

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    pub output_dir: String,
    pub studies: Vec<StudyReport>,
}

impl FetchReport {
    pub fn failed(&self) -> usize {
        self.studies
            .iter()
            .filter(|study| study.error.is_some())
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StudyReport {
    pub study_accession: String,
    pub planned: usize,
    #[serde(flatten)]
    pub summary: BatchSummary,
    pub error: Option<String>,
}

pub struct App<S: MetadataSource, C: TransferClient> {
    source: S,
    client: Arc<C>,
    config: ResolvedConfig,
}

impl<S: MetadataSource, C: TransferClient + 'static> App<S, C> {
    pub fn new(source: S, client: C, config: ResolvedConfig) -> Self {
        Self {
            source,
            client: Arc::new(client),
            config,
        }
    }

    /// Fetches every study's outstanding files.
    ///
    /// A study where every transfer failed is reported and skipped; the
    /// remaining studies still run. Metadata and ledger errors abort.
    pub fn fetch(&self) -> Result<FetchReport, KiraError> {
        let rows = self.source.metadata()?;
        let layout = OutputLayout::new(self.config.output_dir.clone(), self.config.group_by_study);
        layout.ensure_root()?;
        let ledger = Arc::new(layout.ledger());
        let coordinator = DownloadCoordinator::new(
            Arc::clone(&self.client),
            Arc::clone(&ledger),
            layout.clone(),
            DownloadOptions {
                max_retries: self.config.retries,
                max_concurrent: self.config.max_concurrent,
                scheme: self.config.scheme.clone(),
                log_full_path: self.config.log_full_path,
            },
        );

        let mut report = FetchReport {
            output_dir: layout.root().to_string(),
            studies: Vec::new(),
        };
        for (study, study_rows) in group_by_study(&rows)? {
            let mut planner = FetchPlanner::new(&ledger, self.config.cache);
            if self.config.log_full_path {
                planner = planner.log_full_path(layout.root().as_std_path());
            }
            let outstanding = planner.plan(&study_rows, self.config.file_type)?;
            let planned = outstanding.len();
            info!(study_accession = %study, planned, "processing study");

            let (summary, error) = match coordinator.run_batch(&study, outstanding) {
                Ok(summary) => (summary, None),
                Err(err @ KiraError::NoSuccessfulDownloads { .. }) => {
                    error!(study_accession = %study, "{err}");
                    let summary = BatchSummary {
                        attempted: planned,
                        ..BatchSummary::default()
                    };
                    (summary, Some(err.to_string()))
                }
                Err(err) => return Err(err),
            };
            report.studies.push(StudyReport {
                study_accession: study,
                planned,
                summary,
                error,
            });
        }
        Ok(report)
    }
}
