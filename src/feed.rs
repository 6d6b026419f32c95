// src/feed.rs
// Disclosure feed client: one GET over a date range, page 1 only.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Announcement, AnnouncementEnvelope, DateRange};
use crate::error::FeedError;

const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36";
const REFERER: &str = "https://www.bseindia.com/";

#[async_trait]
pub trait Feed: Send + Sync {
    /// Announcements for the earnings-call-transcript subcategory within the
    /// range. Trusted to be a single page; page 2+ is never requested.
    async fn fetch_announcements(&self, range: &DateRange)
        -> Result<Vec<Announcement>, FeedError>;
}

/// Feed impl against the BSE announcement API. The upstream filters bots, so
/// requests carry browser-like headers.
pub struct BseFeed {
    http: reqwest::Client,
    base_url: String,
}

impl BseFeed {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

/// Shared hardened transport for the feed and attachment downloads: TLS 1.2
/// floor, generous idle-connection reuse, long request timeout for large
/// transcript PDFs.
pub fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(600))
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(600))
        .user_agent(BROWSER_UA)
        .build()
}

#[async_trait]
impl Feed for BseFeed {
    async fn fetch_announcements(
        &self,
        range: &DateRange,
    ) -> Result<Vec<Announcement>, FeedError> {
        let (from, to) = range.compact();

        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("pageno", "1"),
                ("strCat", "Company Update"),
                ("strPrevDate", from.as_str()),
                ("strScrip", ""),
                ("strSearch", "P"),
                ("strToDate", to.as_str()),
                ("strType", "C"),
                ("subcategory", "Earnings Call Transcript"),
            ])
            .header("Accept", "application/json, text/plain, */*")
            .header("Referer", REFERER)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        let body = resp.text().await?;
        let envelope: AnnouncementEnvelope =
            serde_json::from_str(&body).map_err(FeedError::Decode)?;

        tracing::debug!(
            count = envelope.table.len(),
            rowcnt = envelope.table1.first().map(|r| r.rowcnt).unwrap_or(0),
            "fetched announcements"
        );
        Ok(envelope.table)
    }
}
