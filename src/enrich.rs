// src/enrich.rs
// Enrichment client: uploads a transcript to Gemini, asks one fixed question,
// and returns the one-line guidance verdict. Transient upstream failures
// (429/500/503) are retried with exponential backoff + jitter; everything
// else propagates immediately.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EnrichError;

/// The single analysis prompt. The sentinel "NA" doubles as the skip marker
/// downstream, so the wording pins the model to exactly that literal.
const GUIDANCE_PROMPT: &str = "Go through the concall and identify if management has given any \
guidance for fy26 on the future growth of the company in terms of revenue, earnings, eps etc. \
If yes, then just return the fy26' guidance after quantifying it and return nothing else. If no \
guidance is provided, then return \"NA\". Your response should be just 1 line providing the \
guidance for fy26' in numbers otherwise NA.";

#[async_trait]
pub trait Enrichment: Send + Sync {
    /// Extract the guidance verdict for the document at `path`.
    async fn summarize(&self, path: &Path) -> Result<String, EnrichError>;
}

/// Bounded exponential backoff. Injectable so tests run in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying attempt `attempt` (0-indexed):
    /// `base * 2^attempt` plus a uniform jitter in `[0, delay/5)` so
    /// overlapping runs don't retry in lockstep.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(1u32 << attempt.min(31));
        let spread = delay.as_nanos() as u64 / 5;
        let jitter = if spread > 0 {
            rand::random_range(0..spread)
        } else {
            0
        };
        delay + Duration::from_nanos(jitter)
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping between transient
/// failures. The sleep is a plain tokio sleep, so a caller-side deadline
/// cancels the wait rather than letting the remaining retries play out.
pub async fn call_with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, EnrichError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, EnrichError>>,
{
    for attempt in 0..policy.max_attempts {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() => {
                let wait = policy.backoff_delay(attempt);
                tracing::warn!(
                    error = %e,
                    attempt = attempt + 1,
                    max = policy.max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    "transient AI error, retrying"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(EnrichError::RetriesExhausted {
        attempts: policy.max_attempts,
    })
}

// ------------------------------------------------------------
// Gemini wire types
// ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    name: String,
    uri: String,
    #[serde(default)]
    mime_type: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<ReqPart<'a>>,
}

#[derive(Serialize)]
enum ReqPart<'a> {
    #[serde(rename = "fileData")]
    FileData {
        #[serde(rename = "mimeType")]
        mime_type: &'a str,
        #[serde(rename = "fileUri")]
        file_uri: &'a str,
    },
    #[serde(rename = "text")]
    Text(&'a str),
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<RespPart>,
}

#[derive(Debug, Default, Deserialize)]
struct RespPart {
    #[serde(default)]
    text: String,
}

// ------------------------------------------------------------
// Client
// ------------------------------------------------------------

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl GeminiClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(600))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
            model,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, EnrichError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(EnrichError::Status {
            code: status.as_u16(),
            message,
        })
    }

    async fn upload(&self, path: &Path) -> Result<RemoteFile, EnrichError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| EnrichError::ReadDocument {
                path: path.to_path_buf(),
                source,
            })?;

        let url = format!("{}/upload/v1beta/files", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .header("X-Goog-Upload-Protocol", "raw")
            .header("Content-Type", "application/pdf")
            .body(bytes)
            .send()
            .await?;

        let resp = Self::check(resp).await?;
        let body = resp.text().await?;
        let uploaded: UploadResponse =
            serde_json::from_str(&body).map_err(EnrichError::Decode)?;
        tracing::debug!(name = %uploaded.file.name, "uploaded document");
        Ok(uploaded.file)
    }

    async fn generate(&self, file: &RemoteFile) -> Result<String, EnrichError> {
        let mime = if file.mime_type.is_empty() {
            "application/pdf"
        } else {
            file.mime_type.as_str()
        };
        let req = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    ReqPart::FileData {
                        mime_type: mime,
                        file_uri: &file.uri,
                    },
                    ReqPart::Text(GUIDANCE_PROMPT),
                ],
            }],
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let resp = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&req)
            .send()
            .await?;

        let resp = Self::check(resp).await?;
        let body = resp.text().await?;
        let decoded: GenerateResponse =
            serde_json::from_str(&body).map_err(EnrichError::Decode)?;
        Ok(collect_text(&decoded))
    }

    /// Best-effort removal of the uploaded remote file. Failure here is
    /// logged, never fatal.
    async fn delete_remote(&self, name: &str) {
        let url = format!("{}/v1beta/{}", self.base_url.trim_end_matches('/'), name);
        let result = self
            .http
            .delete(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                tracing::warn!(name, status = resp.status().as_u16(), "failed to delete uploaded file");
            }
            Err(e) => {
                tracing::warn!(name, error = %e, "failed to delete uploaded file");
            }
        }
    }

    async fn summarize_once(&self, path: &Path) -> Result<String, EnrichError> {
        let file = self.upload(path).await?;
        let outcome = self.generate(&file).await;
        self.delete_remote(&file.name).await;
        outcome
    }
}

/// Concatenate every candidate part's text, one line per part, trimmed.
/// Gemini occasionally returns zero candidates; that yields the default
/// `"(no response)"` rather than an error.
fn collect_text(resp: &GenerateResponse) -> String {
    if resp.candidates.is_empty() {
        return "(no response)".to_string();
    }
    let mut out = String::new();
    for cand in &resp.candidates {
        for part in &cand.content.parts {
            out.push_str(&part.text);
            out.push('\n');
        }
    }
    out.trim().to_string()
}

#[async_trait]
impl Enrichment for GeminiClient {
    async fn summarize(&self, path: &Path) -> Result<String, EnrichError> {
        call_with_retry(self.retry, |_attempt| self.summarize_once(path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> EnrichError {
        EnrichError::Status {
            code: 429,
            message: "rate limited".into(),
        }
    }

    fn terminal() -> EnrichError {
        EnrichError::Status {
            code: 401,
            message: "bad key".into(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_delay_is_within_expected_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 0..5u32 {
            let lower = policy.base_delay * (1 << attempt);
            let upper = lower + lower / 5;
            for _ in 0..50 {
                let d = policy.backoff_delay(attempt);
                assert!(d >= lower, "attempt {attempt}: {d:?} < {lower:?}");
                assert!(d < upper, "attempt {attempt}: {d:?} >= {upper:?}");
            }
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let out = call_with_retry(fast_policy(), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(transient())
                } else {
                    Ok("Revenue growth of 12-15%".to_string())
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, "Revenue growth of 12-15%");
        assert_eq!(calls.load(Ordering::SeqCst), 4, "3 failures + 1 success");
    }

    #[tokio::test]
    async fn terminal_failure_is_never_retried() {
        let calls = AtomicU32::new(0);
        let err = call_with_retry::<String, _, _>(fast_policy(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(terminal()) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, EnrichError::Status { code: 401, .. }));
    }

    #[tokio::test]
    async fn exhaustion_yields_retries_exhausted() {
        let calls = AtomicU32::new(0);
        let err = call_with_retry::<String, _, _>(fast_policy(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(transient()) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(matches!(err, EnrichError::RetriesExhausted { attempts: 5 }));
    }

    #[tokio::test]
    async fn caller_deadline_cancels_the_backoff_wait() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
        };
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            call_with_retry::<String, _, _>(policy, |_| async { Err(transient()) }),
        )
        .await;
        assert!(result.is_err(), "timeout should fire during the backoff sleep");
    }

    #[test]
    fn empty_candidate_list_yields_default_text() {
        let resp = GenerateResponse { candidates: vec![] };
        assert_eq!(collect_text(&resp), "(no response)");
    }

    #[test]
    fn candidate_parts_are_concatenated_and_trimmed() {
        let resp = GenerateResponse {
            candidates: vec![Candidate {
                content: CandidateContent {
                    parts: vec![
                        RespPart {
                            text: "Revenue growth of 12-15%".into(),
                        },
                        RespPart { text: " ".into() },
                    ],
                },
            }],
        };
        assert_eq!(collect_text(&resp), "Revenue growth of 12-15%");
    }

    #[test]
    fn generate_request_serializes_camel_case() {
        let req = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    ReqPart::FileData {
                        mime_type: "application/pdf",
                        file_uri: "files/abc",
                    },
                    ReqPart::Text("prompt"),
                ],
            }],
        };
        let json = serde_json::to_value(&req).unwrap();
        let part = &json["contents"][0]["parts"][0];
        assert_eq!(part["fileData"]["mimeType"], "application/pdf");
        assert_eq!(part["fileData"]["fileUri"], "files/abc");
    }
}
