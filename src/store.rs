// src/store.rs
// Store capability boundary + the in-memory implementation the server ships
// with. The trait mirrors what the pipeline and API actually need: one
// batched existence lookup, one bulk insert, paginated list/find, and an
// atomic visit counter.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{GuidanceLite, GuidanceRecord};
use crate::error::StoreError;

/// Pagination request. Values are clamped, not rejected, matching how the
/// HTTP handlers treat bad `page`/`limit` input.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u64,
    pub limit: u64,
}

impl Page {
    pub fn clamped(page: u64, limit: u64) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.limit
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { page: 1, limit: 10 }
    }
}

/// One page of guidance rows plus the totals the UI paginates with.
#[derive(Debug, Clone, Serialize)]
pub struct GuidancePage {
    pub items: Vec<GuidanceLite>,
    pub total: u64,
    pub total_pages: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Which of `names` already have a persisted record. One batched query,
    /// exact case-sensitive match on issuer name.
    async fn existing_names(&self, names: &[String]) -> Result<HashSet<String>, StoreError>;

    /// Bulk insert of a pipeline run's records.
    async fn insert_guidances(&self, records: Vec<GuidanceRecord>) -> Result<(), StoreError>;

    /// Newest-first (by disclosure date) page of all records.
    async fn list_guidances(&self, page: Page) -> Result<GuidancePage, StoreError>;

    /// Newest-first page of records whose issuer name contains `query`,
    /// case-insensitively.
    async fn find_guidances(&self, query: &str, page: Page) -> Result<GuidancePage, StoreError>;

    /// Atomically bump the visit counter and return the new total.
    async fn increment_total_visits(&self) -> Result<u64, StoreError>;

    async fn total_visits(&self) -> Result<u64, StoreError>;
}

/// In-memory store. Guidance rows behind a mutex, the visit counter on an
/// atomic so the increment+read is a single fetch_add.
#[derive(Debug, Default)]
pub struct MemoryStore {
    guidances: Mutex<Vec<GuidanceRecord>>,
    visits: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn page_of(records: Vec<GuidanceLite>, page: Page) -> GuidancePage {
        let total = records.len() as u64;
        let total_pages = total.div_ceil(page.limit);
        let items = records
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();
        GuidancePage {
            items,
            total,
            total_pages,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn existing_names(&self, names: &[String]) -> Result<HashSet<String>, StoreError> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        let g = self.guidances.lock().expect("guidance mutex poisoned");
        Ok(g.iter()
            .filter(|r| wanted.contains(r.name.as_str()))
            .map(|r| r.name.clone())
            .collect())
    }

    async fn insert_guidances(&self, records: Vec<GuidanceRecord>) -> Result<(), StoreError> {
        let mut g = self.guidances.lock().expect("guidance mutex poisoned");
        g.extend(records);
        Ok(())
    }

    async fn list_guidances(&self, page: Page) -> Result<GuidancePage, StoreError> {
        let g = self.guidances.lock().expect("guidance mutex poisoned");
        let mut rows: Vec<&GuidanceRecord> = g.iter().collect();
        // ISO dates sort lexicographically; newest first.
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        let lite = rows.into_iter().map(GuidanceLite::from).collect();
        Ok(Self::page_of(lite, page))
    }

    async fn find_guidances(&self, query: &str, page: Page) -> Result<GuidancePage, StoreError> {
        let needle = query.to_lowercase();
        let g = self.guidances.lock().expect("guidance mutex poisoned");
        let mut rows: Vec<&GuidanceRecord> = g
            .iter()
            .filter(|r| r.name.to_lowercase().contains(&needle))
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        let lite = rows.into_iter().map(GuidanceLite::from).collect();
        Ok(Self::page_of(lite, page))
    }

    async fn increment_total_visits(&self) -> Result<u64, StoreError> {
        Ok(self.visits.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn total_visits(&self) -> Result<u64, StoreError> {
        Ok(self.visits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str, date: &str) -> GuidanceRecord {
        GuidanceRecord::new(name, date, "Revenue growth of 10%".into())
    }

    #[tokio::test]
    async fn existing_names_matches_exactly() {
        let store = MemoryStore::new();
        store
            .insert_guidances(vec![rec("Acme Ltd", "2025-10-18")])
            .await
            .unwrap();

        let names = vec!["Acme Ltd".to_string(), "acme ltd".to_string(), "Other".into()];
        let existing = store.existing_names(&names).await.unwrap();
        assert!(existing.contains("Acme Ltd"));
        assert!(!existing.contains("acme ltd"), "match is case-sensitive");
        assert_eq!(existing.len(), 1);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paginated() {
        let store = MemoryStore::new();
        store
            .insert_guidances(vec![
                rec("A", "2025-10-16"),
                rec("B", "2025-10-18"),
                rec("C", "2025-10-17"),
            ])
            .await
            .unwrap();

        let page = store.list_guidances(Page::clamped(1, 2)).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        let names: Vec<&str> = page.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);

        let page2 = store.list_guidances(Page::clamped(2, 2)).await.unwrap();
        assert_eq!(page2.items.len(), 1);
        assert_eq!(page2.items[0].name, "A");
    }

    #[tokio::test]
    async fn find_is_case_insensitive_substring() {
        let store = MemoryStore::new();
        store
            .insert_guidances(vec![rec("Acme Industries", "2025-10-18"), rec("Zen Corp", "2025-10-18")])
            .await
            .unwrap();

        let page = store.find_guidances("acme", Page::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].name, "Acme Industries");
    }

    #[tokio::test]
    async fn visit_counter_increments_atomically() {
        let store = MemoryStore::new();
        assert_eq!(store.total_visits().await.unwrap(), 0);
        assert_eq!(store.increment_total_visits().await.unwrap(), 1);
        assert_eq!(store.increment_total_visits().await.unwrap(), 2);
        assert_eq!(store.total_visits().await.unwrap(), 2);
    }
}
