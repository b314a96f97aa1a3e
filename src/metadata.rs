use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::domain::{Accession, AccessionKind};
use crate::error::KiraError;

pub const RUN_ACCESSION: &str = "run_accession";
pub const STUDY_ACCESSION: &str = "study_accession";

/// One metadata row: named string fields in source column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRow {
    fields: Vec<(String, String)>,
}

impl MetadataRow {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn run_accession(&self) -> &str {
        self.get(RUN_ACCESSION).unwrap_or("")
    }
}

/// Rows keyed by run accession.
pub type RunMetadata = BTreeMap<String, MetadataRow>;

/// Supplies already-fetched metadata rows; how they were obtained is up to the source.
pub trait MetadataSource: Send + Sync {
    fn metadata(&self) -> Result<RunMetadata, KiraError>;
}

/// Reads an ENA portal `read_run` report saved as tab-separated text.
#[derive(Debug, Clone)]
pub struct TsvMetadata {
    path: PathBuf,
    filter: Option<(AccessionKind, HashSet<String>)>,
}

impl TsvMetadata {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            filter: None,
        }
    }

    /// Keeps only rows matching one of `accessions` in the column for `kind`,
    /// primary or secondary form.
    pub fn with_accessions(mut self, kind: AccessionKind, accessions: &[Accession]) -> Self {
        self.filter = Some((
            kind,
            accessions
                .iter()
                .map(|acc| acc.as_str().to_string())
                .collect(),
        ));
        self
    }

    pub fn parse(content: &str) -> Result<RunMetadata, KiraError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .flexible(true)
            .from_reader(content.as_bytes());
        let headers = reader
            .headers()
            .map_err(|err| KiraError::MetadataRead(err.to_string()))?
            .clone();
        if !headers.iter().any(|name| name == RUN_ACCESSION) {
            return Err(KiraError::MetadataRead(format!(
                "header has no {RUN_ACCESSION} column"
            )));
        }

        let mut rows = RunMetadata::new();
        for record in reader.records() {
            let record = record.map_err(|err| KiraError::MetadataRead(err.to_string()))?;
            let row = MetadataRow::from_pairs(
                headers
                    .iter()
                    .zip(record.iter())
                    .map(|(name, value)| (name.to_string(), value.to_string())),
            );
            let run = row.run_accession().trim().to_string();
            if run.is_empty() {
                warn!("skipping metadata row without {RUN_ACCESSION}");
                continue;
            }
            rows.insert(run, row);
        }
        Ok(rows)
    }
}

impl MetadataSource for TsvMetadata {
    fn metadata(&self) -> Result<RunMetadata, KiraError> {
        let content = fs::read_to_string(&self.path)
            .map_err(|err| KiraError::MetadataRead(format!("{}: {err}", self.path.display())))?;
        let mut rows = Self::parse(&content)?;
        if let Some((kind, accessions)) = &self.filter {
            let columns = accession_columns(*kind);
            rows.retain(|_, row| {
                columns
                    .iter()
                    .filter_map(|column| row.get(column))
                    .any(|value| accessions.contains(value.trim()))
            });
            for accession in accessions {
                let found = rows.values().any(|row| {
                    columns
                        .iter()
                        .any(|column| row.get(column).map(str::trim) == Some(accession.as_str()))
                });
                if !found {
                    warn!(accession = %accession, "no metadata found for {accession}");
                }
            }
        }
        info!(rows = rows.len(), "loaded metadata from {}", self.path.display());
        Ok(rows)
    }
}

fn accession_columns(kind: AccessionKind) -> [&'static str; 2] {
    match kind {
        AccessionKind::Run => [RUN_ACCESSION, RUN_ACCESSION],
        AccessionKind::Sample => ["sample_accession", "secondary_sample_accession"],
        AccessionKind::Study => [STUDY_ACCESSION, "secondary_study_accession"],
    }
}

/// Splits rows into per-study groups.
pub fn group_by_study(rows: &RunMetadata) -> Result<BTreeMap<String, RunMetadata>, KiraError> {
    if !rows.is_empty() && !rows.values().any(|row| row.contains(STUDY_ACCESSION)) {
        return Err(missing_field(STUDY_ACCESSION, rows));
    }
    let mut studies: BTreeMap<String, RunMetadata> = BTreeMap::new();
    for (run, row) in rows {
        match row.get(STUDY_ACCESSION).map(str::trim) {
            Some(study) if !study.is_empty() => {
                studies
                    .entry(study.to_string())
                    .or_default()
                    .insert(run.clone(), row.clone());
            }
            _ => warn!(run_accession = %run, "no {STUDY_ACCESSION} for {run}. Skipping."),
        }
    }
    Ok(studies)
}

/// Writes rows back out as TSV, using the first row's columns.
pub fn write_metadata_tsv(rows: &RunMetadata, path: &Path) -> Result<(), KiraError> {
    let Some(first) = rows.values().next() else {
        return Err(KiraError::MetadataRead("no metadata rows to write".to_string()));
    };
    let columns: Vec<&str> = first.field_names().collect();
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_path(path)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    writer
        .write_record(&columns)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    for row in rows.values() {
        let values: Vec<&str> = columns
            .iter()
            .map(|column| row.get(column).unwrap_or(""))
            .collect();
        writer
            .write_record(&values)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    info!("Wrote metadata to {}", path.display());
    Ok(())
}

pub(crate) fn missing_field(field: &str, rows: &RunMetadata) -> KiraError {
    let available = rows
        .values()
        .next()
        .map(|row| row.field_names().collect::<Vec<_>>().join(", "))
        .unwrap_or_default();
    KiraError::MissingField {
        field: field.to_string(),
        available,
    }
}
