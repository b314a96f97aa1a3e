use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::coordinator::ENA_MAX_CONCURRENT;
use crate::domain::FileType;
use crate::error::KiraError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-ena.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub file_type: Option<FileType>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    #[serde(default)]
    pub cache: Option<bool>,
    #[serde(default)]
    pub group_by_study: Option<bool>,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub log_full_path: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub output_dir: Utf8PathBuf,
    pub file_type: FileType,
    pub retries: u32,
    pub max_concurrent: usize,
    pub cache: bool,
    pub group_by_study: bool,
    pub scheme: String,
    pub log_full_path: bool,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `kira-ena.json` in the working directory when present.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }
        if !config_path.exists() {
            return Err(KiraError::ConfigRead(config_path));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let max_concurrent = config.max_concurrent.unwrap_or(ENA_MAX_CONCURRENT);
        if max_concurrent == 0 {
            return Err(KiraError::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }

        let scheme = match config.scheme {
            Some(scheme) => normalize_scheme(&scheme)?,
            None => "https".to_string(),
        };

        let output_dir = match config.output_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => {
                let cwd = std::env::current_dir()
                    .map_err(|err| KiraError::Filesystem(err.to_string()))?;
                Utf8PathBuf::from_path_buf(cwd)
                    .map_err(|_| KiraError::Filesystem("non-utf8 working directory".to_string()))?
            }
        };

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            output_dir,
            file_type: config.file_type.unwrap_or(FileType::Fastq),
            retries: config.retries.unwrap_or(5),
            max_concurrent,
            cache: config.cache.unwrap_or(true),
            group_by_study: config.group_by_study.unwrap_or(false),
            scheme,
            log_full_path: config.log_full_path.unwrap_or(false),
        })
    }
}

/// Lowercases a scheme, dropping any `://`. Only HTTP(S) transfers are supported;
/// the archive serves its FTP paths over HTTPS as well.
pub fn normalize_scheme(value: &str) -> Result<String, KiraError> {
    let scheme = value.trim().trim_end_matches("://").to_ascii_lowercase();
    if !matches!(scheme.as_str(), "http" | "https") {
        return Err(KiraError::InvalidConfig(format!(
            "unsupported transfer scheme: {scheme}"
        )));
    }
    Ok(scheme)
}
