use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info, warn};

use crate::error::KiraError;

/// Fetches one remote object to a local path.
///
/// Implementations never surface transport errors: after the retry budget is
/// spent they report `false` and leave the decision to the caller.
pub trait TransferClient: Send + Sync {
    fn fetch(&self, url: &str, destination: &Path, max_retries: u32) -> bool;
}

/// Exponential backoff: attempt `n` waits `base_delay * 2^n` before retrying.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(20))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct HttpTransferClient {
    client: Client,
    policy: RetryPolicy,
}

impl HttpTransferClient {
    pub fn new() -> Result<Self, KiraError> {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(policy: RetryPolicy) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-ena/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Transfer(err.to_string()))?,
        );
        // Run files are routinely several gigabytes, so only the connect phase is bounded.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| KiraError::Transfer(err.to_string()))?;
        Ok(Self { client, policy })
    }

    fn fetch_once(&self, url: &str, destination: &Path) -> Result<u64, KiraError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| KiraError::Transfer(err.to_string()))?;
        if !response.status().is_success() {
            return Err(KiraError::TransferStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let parent = destination
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".kira-ena-part")
            .tempfile_in(parent)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let written = std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| KiraError::Transfer(err.to_string()))?;
        if destination.exists() {
            fs::remove_file(destination).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        temp.persist(destination)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(written)
    }
}

impl TransferClient for HttpTransferClient {
    fn fetch(&self, url: &str, destination: &Path, max_retries: u32) -> bool {
        let file = destination
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| destination.display().to_string());
        info!(file = %file, "Downloading {file}");

        for attempt in 0..=max_retries {
            match self.fetch_once(url, destination) {
                Ok(bytes) => {
                    debug!(file = %file, bytes, attempt, "transfer complete");
                    return true;
                }
                Err(err) if attempt < max_retries => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        file = %file,
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        "Download of {file} failed. Reason: {err}. Retrying after {:?}...",
                        delay
                    );
                    thread::sleep(delay);
                }
                Err(err) => {
                    warn!(file = %file, attempt, "Download of {file} failed. Reason: {err}.");
                }
            }
        }
        warn!(file = %file, "Download of {file} failed entirely!");
        false
    }
}
