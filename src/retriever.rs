// src/retriever.rs
// Attachment download: one GET per transcript PDF, written to the scratch
// directory under a deterministic sanitized filename.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::error::DownloadError;

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Fetch `attachment_ref` and write it to `dest_dir/save_as`. The caller
    /// owns cleanup of the resulting file.
    async fn fetch(
        &self,
        attachment_ref: &str,
        dest_dir: &Path,
        save_as: &str,
    ) -> Result<PathBuf, DownloadError>;
}

/// Replace anything that is not filesystem-safe. `Acme / Sub: Ltd` becomes
/// `Acme_Sub-_Ltd` style output, stable across runs.
pub fn sanitize_file_name(name: &str) -> String {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());
    let replaced = name.replace(':', "-");
    re.replace_all(&replaced, "_").to_string()
}

pub struct HttpRetriever {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRetriever {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn fetch(
        &self,
        attachment_ref: &str,
        dest_dir: &Path,
        save_as: &str,
    ) -> Result<PathBuf, DownloadError> {
        if attachment_ref.is_empty() {
            return Err(DownloadError::EmptyRef);
        }

        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), attachment_ref);
        let resp = self
            .http
            .get(&url)
            .header("Referer", "https://www.bseindia.com/")
            .header("Accept", "application/pdf")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                reference: attachment_ref.to_string(),
                status: status.as_u16(),
            });
        }

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|source| DownloadError::Write {
                path: dest_dir.to_path_buf(),
                source,
            })?;

        let bytes = resp.bytes().await?;
        let path = dest_dir.join(save_as);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| DownloadError::Write {
                path: path.clone(),
                source,
            })?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_file_name("Acme Ltd"), "Acme_Ltd");
        assert_eq!(sanitize_file_name("A/B\\C"), "A_B_C");
        assert_eq!(sanitize_file_name("X: Y"), "X-_Y");
        assert_eq!(sanitize_file_name("plain-name_1.pdf"), "plain-name_1.pdf");
    }

    #[test]
    fn sanitize_is_deterministic() {
        let a = sanitize_file_name("Acme & Sons (India) Ltd");
        let b = sanitize_file_name("Acme & Sons (India) Ltd");
        assert_eq!(a, b);
        assert!(!a.contains(' '));
    }
}
