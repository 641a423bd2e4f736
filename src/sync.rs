// src/sync.rs

use crate::http::HttpError;
use crate::journal::JournalEntry;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("journal store rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected journal store response: {0}")]
    UnexpectedResponse(String),
}

/// Durable home of journal pages, keyed by calendar date
pub trait JournalStore: Send + Sync {
    /// Id of the page for `date`, if one exists
    fn find_page(&self, date: NaiveDate) -> Result<Option<String>, StoreError>;

    /// Creates the page for `entry.date` and returns its id
    fn create_page(&self, entry: &JournalEntry) -> Result<String, StoreError>;

    /// Replaces the system-owned content of an existing page
    fn update_page(&self, page_id: &str, entry: &JournalEntry) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Created(String),
    Updated(String),
}

impl SyncOutcome {
    pub fn page_id(&self) -> &str {
        match self {
            SyncOutcome::Created(id) | SyncOutcome::Updated(id) => id,
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Created(id) => write!(f, "created {id}"),
            SyncOutcome::Updated(id) => write!(f, "updated {id}"),
        }
    }
}

/// Find-or-create for one date at a time.
///
/// The lookup and the write for a date run back to back on the calling
/// thread. There is no store-side lock: two concurrent runs targeting the
/// same date can both miss the lookup and create a page each.
pub struct JournalSynchronizer<'a> {
    store: &'a dyn JournalStore,
}

impl<'a> JournalSynchronizer<'a> {
    pub fn new(store: &'a dyn JournalStore) -> Self {
        JournalSynchronizer { store }
    }

    pub fn sync(&self, entry: &mut JournalEntry) -> Result<SyncOutcome, StoreError> {
        match self.store.find_page(entry.date)? {
            Some(page_id) => {
                debug!(date = %entry.date, page = %page_id, "journal page found, updating");
                entry.remote_page_id = Some(page_id.clone());
                self.store.update_page(&page_id, entry)?;
                info!(date = %entry.date, page = %page_id, "journal page updated");
                Ok(SyncOutcome::Updated(page_id))
            }
            None => {
                let page_id = self.store.create_page(entry)?;
                entry.remote_page_id = Some(page_id.clone());
                info!(date = %entry.date, page = %page_id, "journal page created");
                Ok(SyncOutcome::Created(page_id))
            }
        }
    }
}

// ── In-memory store ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredPage {
    entry: JournalEntry,
    writes: usize,
}

/// Process-local journal used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryJournalStore {
    pages: Mutex<BTreeMap<String, StoredPage>>,
    next_id: Mutex<u64>,
    /// Dates whose writes are refused
    failing: Mutex<Vec<NaiveDate>>,
}

impl MemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_count(&self) -> usize {
        self.lock().len()
    }

    pub fn pages_for(&self, date: NaiveDate) -> usize {
        self.lock().values().filter(|p| p.entry.date == date).count()
    }

    /// Stored entries ordered by date
    pub fn entries(&self) -> Vec<JournalEntry> {
        let mut entries: Vec<JournalEntry> = self.lock().values().map(|p| p.entry.clone()).collect();
        entries.sort_by_key(|e| e.date);
        entries
    }

    /// How many times a page has been written (create counts as one)
    pub fn writes(&self, page_id: &str) -> usize {
        self.lock().get(page_id).map_or(0, |p| p.writes)
    }

    #[cfg(test)]
    pub(crate) fn fail_on(&self, date: NaiveDate) {
        self.failing.lock().unwrap_or_else(|e| e.into_inner()).push(date);
    }

    fn check(&self, date: NaiveDate) -> Result<(), StoreError> {
        if self.failing.lock().unwrap_or_else(|e| e.into_inner()).contains(&date) {
            return Err(StoreError::Rejected { status: 403, message: "page not shared with integration".into() });
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredPage>> {
        self.pages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl JournalStore for MemoryJournalStore {
    fn find_page(&self, date: NaiveDate) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .find(|(_, page)| page.entry.date == date)
            .map(|(id, _)| id.clone()))
    }

    fn create_page(&self, entry: &JournalEntry) -> Result<String, StoreError> {
        self.check(entry.date)?;
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            format!("page-{next}")
        };
        let mut stored = entry.clone();
        stored.remote_page_id = Some(id.clone());
        self.lock().insert(id.clone(), StoredPage { entry: stored, writes: 1 });
        Ok(id)
    }

    fn update_page(&self, page_id: &str, entry: &JournalEntry) -> Result<(), StoreError> {
        self.check(entry.date)?;
        let mut pages = self.lock();
        let page = pages
            .get_mut(page_id)
            .ok_or_else(|| StoreError::Rejected { status: 404, message: format!("no page {page_id}") })?;
        page.entry = entry.clone();
        page.writes += 1;
        Ok(())
    }
}
