// src/notion.rs
//
// Journal pages in a Notion database.
//
// Page layout (top-level blocks):
//
//   ...anything the user put above...
//   ## 📊 Daily Summary        <- anchor, written once and kept
//   ...summary, statistics, commit logs...   (replaced on every run)
//   ## 📝 Notes                <- everything from here on belongs to the user
//   ...
//
// The region between the anchor and the Notes heading is owned by this tool;
// nothing outside it is ever deleted.

use crate::clock::Deadline;
use crate::config::NotionCredentials;
use crate::http::{send_with_retry, HttpRequest, HttpTransport, Method, RetryPolicy};
use crate::journal::{CommitLine, JournalEntry, RepositorySection};
use crate::sync::{JournalStore, StoreError};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

const NOTION_API: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

pub const SUMMARY_HEADING: &str = "📊 Daily Summary";
pub const NOTES_HEADING: &str = "📝 Notes";
const NOTES_PLACEHOLDER: &str = "Add your notes and reflections here...";

/// Notion accepts at most 100 children per request; the managed region
/// stays below that with room for the Notes section.
const MAX_MANAGED_BLOCKS: usize = 90;
/// Notion's limit for one rich text object
const MAX_TEXT_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PropertyNames {
    title: String,
    date: String,
}

impl Default for PropertyNames {
    fn default() -> Self {
        PropertyNames { title: "Title".to_string(), date: "Date".to_string() }
    }
}

pub struct NotionJournalStore {
    transport: Arc<dyn HttpTransport>,
    credentials: NotionCredentials,
    policy: RetryPolicy,
    api_base: String,
    properties: PropertyNames,
}

impl NotionJournalStore {
    /// Builds the store and resolves the database's title and date property
    /// names, falling back to `Title` / `Date` when the schema is unreadable.
    pub fn connect(transport: Arc<dyn HttpTransport>, credentials: NotionCredentials, policy: RetryPolicy) -> Self {
        Self::connect_at(NOTION_API, transport, credentials, policy)
    }

    fn connect_at(
        api_base: &str,
        transport: Arc<dyn HttpTransport>,
        credentials: NotionCredentials,
        policy: RetryPolicy,
    ) -> Self {
        let mut store = NotionJournalStore {
            transport,
            credentials,
            policy,
            api_base: api_base.trim_end_matches('/').to_string(),
            properties: PropertyNames::default(),
        };
        match store.discover_properties() {
            Ok(properties) => store.properties = properties,
            Err(e) => warn!(error = %e, "cannot read journal database schema, assuming Title/Date properties"),
        }
        debug!(title = %store.properties.title, date = %store.properties.date, "journal database properties");
        store
    }

    fn discover_properties(&self) -> Result<PropertyNames, StoreError> {
        let database = self.call(self.request(Method::Get, &format!("/databases/{}", self.credentials.database_id)))?;
        let properties = database
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| StoreError::UnexpectedResponse("database has no properties".into()))?;

        let of_type = |kind: &str, preferred: &str| -> Option<String> {
            let matching: Vec<&String> = properties
                .iter()
                .filter(|(_, p)| p.get("type").and_then(Value::as_str) == Some(kind))
                .map(|(name, _)| name)
                .collect();
            matching
                .iter()
                .find(|name| name.as_str() == preferred)
                .or_else(|| matching.first())
                .map(|name| name.to_string())
        };

        let defaults = PropertyNames::default();
        let title = of_type("title", &defaults.title).unwrap_or(defaults.title);
        let date = of_type("date", &defaults.date).ok_or_else(|| {
            StoreError::UnexpectedResponse("journal database has no date property".into())
        })?;
        Ok(PropertyNames { title, date })
    }

    fn request(&self, method: Method, path: &str) -> HttpRequest {
        HttpRequest::new(method, format!("{}{path}", self.api_base))
            .bearer(&self.credentials.token)
            .header("Notion-Version", NOTION_VERSION)
    }

    /// Writes are not bound by the run deadline: dates that were aggregated
    /// get written even when collection ran out of time.
    fn call(&self, request: HttpRequest) -> Result<Value, StoreError> {
        let response = send_with_retry(self.transport.as_ref(), &request, &self.policy, &Deadline::never())?;
        if response.is_success() {
            Ok(response.body)
        } else {
            Err(StoreError::Rejected { status: response.status, message: response.error_message() })
        }
    }

    fn title_properties(&self, entry: &JournalEntry) -> Value {
        let mut properties = serde_json::Map::new();
        properties.insert(self.properties.title.clone(), json!({"title": [{"text": {"content": entry.title()}}]}));
        properties.insert(self.properties.date.clone(), json!({"date": {"start": date_key(entry.date)}}));
        Value::Object(properties)
    }

    /// Top-level blocks of a page, following pagination
    fn children(&self, block_id: &str) -> Result<Vec<Value>, StoreError> {
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut path = format!("/blocks/{block_id}/children?page_size=100");
            if let Some(cursor) = &cursor {
                path.push_str(&format!("&start_cursor={cursor}"));
            }
            let page = self.call(self.request(Method::Get, &path))?;
            if let Some(results) = page.get("results").and_then(Value::as_array) {
                blocks.extend(results.iter().cloned());
            }
            cursor = page
                .get("has_more")
                .and_then(Value::as_bool)
                .filter(|more| *more)
                .and_then(|_| page.get("next_cursor").and_then(Value::as_str).map(str::to_string));
            if cursor.is_none() {
                return Ok(blocks);
            }
        }
    }
}

impl JournalStore for NotionJournalStore {
    fn find_page(&self, date: NaiveDate) -> Result<Option<String>, StoreError> {
        let body = json!({
            "filter": {"property": self.properties.date, "date": {"equals": date_key(date)}},
            "page_size": 10,
        });
        let response = self.call(
            self.request(Method::Post, &format!("/databases/{}/query", self.credentials.database_id))
                .json(body),
        )?;

        let ids: Vec<String> = response
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter_map(|page| page.get("id").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if ids.len() > 1 {
            warn!(%date, pages = ?ids, "several journal pages share this date, updating the first");
        }
        Ok(ids.into_iter().next())
    }

    fn create_page(&self, entry: &JournalEntry) -> Result<String, StoreError> {
        let mut children = managed_blocks(entry);
        children.extend(notes_blocks());

        let body = json!({
            "parent": {"database_id": self.credentials.database_id},
            "properties": self.title_properties(entry),
            "children": children,
        });
        let page = self.call(self.request(Method::Post, "/pages").json(body))?;
        page.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::UnexpectedResponse("created page has no id".into()))
    }

    fn update_page(&self, page_id: &str, entry: &JournalEntry) -> Result<(), StoreError> {
        self.call(
            self.request(Method::Patch, &format!("/pages/{page_id}"))
                .json(json!({"properties": self.title_properties(entry)})),
        )?;

        // Append before deleting; a failed write must never leave the
        // region empty.
        let region = managed_region(&self.children(page_id)?);
        let mut blocks = managed_blocks(entry);
        let body = match &region.anchor {
            Some(anchor) => {
                blocks.remove(0);
                json!({"children": blocks, "after": anchor})
            }
            None => {
                warn!(date = %entry.date, page = %page_id, "summary heading missing, appending journal content at the end");
                json!({"children": blocks})
            }
        };
        self.call(self.request(Method::Patch, &format!("/blocks/{page_id}/children")).json(body))?;

        for block_id in &region.stale {
            self.call(self.request(Method::Delete, &format!("/blocks/{block_id}")))?;
        }
        debug!(date = %entry.date, page = %page_id, replaced = region.stale.len(), "journal content replaced");
        Ok(())
    }
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// ── Managed region ──────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq, Eq)]
struct ManagedRegion {
    anchor: Option<String>,
    /// Blocks after the anchor that the next write replaces
    stale: Vec<String>,
}

fn managed_region(blocks: &[Value]) -> ManagedRegion {
    let Some(anchor_index) = blocks.iter().position(|b| is_heading(b, SUMMARY_HEADING)) else {
        return ManagedRegion::default();
    };

    let stale = blocks[anchor_index + 1..]
        .iter()
        .take_while(|b| !is_heading(b, NOTES_HEADING))
        .filter_map(block_id)
        .collect();
    ManagedRegion { anchor: block_id(&blocks[anchor_index]), stale }
}

fn block_id(block: &Value) -> Option<String> {
    block.get("id").and_then(Value::as_str).map(str::to_string)
}

fn is_heading(block: &Value, text: &str) -> bool {
    let Some(kind) = block.get("type").and_then(Value::as_str) else {
        return false;
    };
    kind.starts_with("heading_") && plain_text(&block[kind]).trim() == text
}

fn plain_text(content: &Value) -> String {
    content
        .get("rich_text")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| {
                    part.get("plain_text")
                        .or_else(|| part.pointer("/text/content"))
                        .and_then(Value::as_str)
                })
                .collect()
        })
        .unwrap_or_default()
}

// ── Block rendering ─────────────────────────────────────────────────

fn rich_text(text: &str, link: Option<&str>) -> Value {
    let content: String = text.chars().take(MAX_TEXT_CHARS).collect();
    match link {
        Some(url) => json!([{"type": "text", "text": {"content": content, "link": {"url": url}}}]),
        None => json!([{"type": "text", "text": {"content": content}}]),
    }
}

fn block(kind: &str, text: &str, link: Option<&str>) -> Value {
    json!({"object": "block", "type": kind, kind: {"rich_text": rich_text(text, link)}})
}

fn commit_bullet(line: &CommitLine) -> Value {
    block("bulleted_list_item", &line.text(), line.url.as_deref())
}

fn repository_blocks(sections: &[RepositorySection], out: &mut Vec<Value>) {
    for section in sections {
        out.push(block("heading_3", &format!("📁 {}", section.repository), None));
        out.extend(section.commits.iter().map(commit_bullet));
    }
}

/// The system-owned blocks for `entry`, anchor heading first
fn managed_blocks(entry: &JournalEntry) -> Vec<Value> {
    let mut blocks = vec![block("heading_2", SUMMARY_HEADING, None)];

    if let Some(summary) = &entry.summary_text {
        blocks.push(block("heading_3", "🤖 AI Summary", None));
        blocks.extend(
            summary
                .split("\n\n")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| block("paragraph", p, None)),
        );
    }

    blocks.push(block("heading_3", "📈 Statistics", None));
    blocks.push(block("bulleted_list_item", &format!("Total commits: {}", entry.stats.commit_count), None));
    blocks.push(block("bulleted_list_item", &format!("Repositories worked on: {}", entry.stats.repo_count), None));
    blocks.push(block("bulleted_list_item", &format!("Files changed: {}", entry.stats.files_changed_total), None));

    if !entry.commit_log_sections.is_empty() {
        blocks.push(block("heading_2", "💻 Commits", None));
        repository_blocks(&entry.commit_log_sections, &mut blocks);
    }
    if !entry.remote_commits.is_empty() {
        blocks.push(block("heading_2", "🌐 GitHub Commits", None));
        repository_blocks(&entry.remote_commits, &mut blocks);
    }

    if blocks.len() > MAX_MANAGED_BLOCKS {
        let omitted = blocks
            .split_off(MAX_MANAGED_BLOCKS - 1)
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("bulleted_list_item"))
            .count();
        blocks.push(block("paragraph", &format!("… and {omitted} more commits not shown"), None));
    }
    blocks
}

fn notes_blocks() -> Vec<Value> {
    vec![block("heading_2", NOTES_HEADING, None), block("paragraph", NOTES_PLACEHOLDER, None)]
}
