// Core structs: work items, extracted records, seed rows, run reports and errors
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

/// Icon labels the site uses to tell appendix layouts apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppendixKind {
    Tai,
    Ke,
    Xing,
}

impl AppendixKind {
    pub fn from_icon_label(label: &str) -> Option<Self> {
        match label.trim() {
            "台" => Some(AppendixKind::Tai),
            "客" => Some(AppendixKind::Ke),
            "姓" => Some(AppendixKind::Xing),
            _ => None,
        }
    }

    pub fn icon_label(&self) -> &'static str {
        match self {
            AppendixKind::Tai => "台",
            AppendixKind::Ke => "客",
            AppendixKind::Xing => "姓",
        }
    }
}

/// Detail page layouts known to the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Standard,
    Variant,
    Appendix(AppendixKind),
}

impl TemplateKind {
    /// Discriminant stored in `details.template`.
    pub fn tag(&self) -> &'static str {
        match self {
            TemplateKind::Standard => "standard",
            TemplateKind::Variant => "variant",
            TemplateKind::Appendix(_) => "appendix",
        }
    }
}

/// One unit of crawl work: a single page to fetch, parse and persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Natural key of the row this item produces.
    pub key: String,
    /// Display value (usually a character) used by fallback scans.
    pub lookup: String,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub parent: Option<String>,
    pub anchor: Option<String>,
    /// Set for detail pages; listing pages leave it empty.
    pub template: Option<TemplateKind>,
}

impl WorkItem {
    pub fn new(key: impl Into<String>, lookup: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            lookup: lookup.into(),
            url: url.into(),
            query: Vec::new(),
            parent: None,
            anchor: None,
            template: None,
        }
    }

    pub fn with_query(mut self, query: &[(&str, &str)]) -> Self {
        self.query = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_anchor(mut self, anchor: Option<String>) -> Self {
        self.anchor = anchor.filter(|a| !a.trim().is_empty());
        self
    }

    pub fn with_template(mut self, template: TemplateKind) -> Self {
        self.template = Some(template);
        self
    }

    pub fn request(&self) -> FetchRequest {
        FetchRequest {
            url: self.url.clone(),
            query: self.query.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

/// An image embedded in a page as a `data:` URI, decoded but not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    /// Path relative to the image directory, e.g. `standard/A00001/0.png`.
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Flat result of parsing one detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRecord {
    pub key: String,
    pub parent: Option<String>,
    pub template: TemplateKind,
    pub fields: BTreeMap<String, Option<String>>,
    /// Row labels the extractor did not recognise.
    pub unknown_labels: Vec<String>,
    pub images: Vec<InlineImage>,
}

impl ExtractedRecord {
    pub fn new(item: &WorkItem, template: TemplateKind, field_names: &[&str]) -> Self {
        Self {
            key: item.key.clone(),
            parent: item.parent.clone(),
            template,
            fields: field_names.iter().map(|f| (f.to_string(), None)).collect(),
            unknown_labels: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn set(&mut self, field: &str, value: impl Into<String>) {
        self.fields.insert(field.to_string(), Some(value.into()));
    }

    #[cfg(test)]
    pub fn field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }
}

/// A row of the `summary` table, one per standard character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryEntry {
    pub code: String,
    pub character: String,
    pub radical: String,
    pub detail_url: String,
}

/// A row of the `variants` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantLink {
    pub variant_code: String,
    pub main_code: String,
    pub variant_char: String,
    pub href: String,
    pub data_ucs: String,
    pub data_tp: String,
    pub img_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchTab {
    Text,
    Appendix,
}

impl SearchTab {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTab::Text => "text",
            SearchTab::Appendix => "appendix",
        }
    }

    /// Value of the `TP` query parameter selecting this tab.
    pub fn tp(&self) -> &'static str {
        match self {
            SearchTab::Text => "1",
            SearchTab::Appendix => "2",
        }
    }

    /// Stored `search_results.result_type`.
    pub fn result_type(&self) -> &'static str {
        match self {
            SearchTab::Text => "Text",
            SearchTab::Appendix => "Appendix",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(SearchTab::Text),
            "appendix" => Some(SearchTab::Appendix),
            _ => None,
        }
    }
}

/// A row of the `search_results` table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchHit {
    pub id: Option<i64>,
    pub search_char: String,
    pub result_type: String,
    pub result_char: String,
    pub result_code: String,
    pub detail_url: String,
    pub appendix_id: String,
    pub anchor_id: String,
    pub icon_label: String,
    pub data_sn: Option<i64>,
    pub ucs_code: String,
    pub radical_stroke: String,
}

/// Rows parsed from a listing page, plus any images they reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing<T> {
    pub rows: Vec<T>,
    pub images: Vec<InlineImage>,
}

impl<T> Listing<T> {
    pub fn new(rows: Vec<T>) -> Self {
        Self {
            rows,
            images: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted(usize),
    /// The row already existed; nothing was written.
    Duplicate,
}

/// Per-item pipeline state once dispatched; an item still in the frontier
/// is pending. Only the last four are terminal.
#[derive(Debug)]
pub enum ItemState {
    Fetching,
    Extracting,
    Persisted { rows: usize },
    FetchFailed(FetchError),
    ExtractFailed(ExtractError),
    StoreFailed(StorageError),
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ItemState::Fetching | ItemState::Extracting)
    }

    /// Bucket used in the run summary.
    pub fn failure_reason(&self) -> Option<&'static str> {
        match self {
            ItemState::FetchFailed(FetchError::BudgetExhausted { .. }) => Some("budget_exhausted"),
            ItemState::FetchFailed(_) => Some("fetch_error"),
            ItemState::ExtractFailed(ExtractError::ShapeMismatch { .. }) => Some("shape_mismatch"),
            ItemState::ExtractFailed(_) => Some("extract_error"),
            ItemState::StoreFailed(_) => Some("store_error"),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ItemOutcome {
    pub item: WorkItem,
    pub state: ItemState,
    /// True when the store already held this item's row.
    pub duplicate: bool,
}

/// Counts collected over one coordinator run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub job: String,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub failures: Vec<(String, String)>,
    pub reasons: BTreeMap<&'static str, usize>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(job: &str, total: usize) -> Self {
        Self {
            job: job.to_string(),
            total,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: &ItemOutcome) {
        debug_assert!(outcome.state.is_terminal());
        self.processed += 1;
        let key = &outcome.item.key;
        match &outcome.state {
            ItemState::Persisted { rows } => {
                self.succeeded += 1;
                if outcome.duplicate {
                    self.duplicates += 1;
                }
                info!(
                    "[{}/{}] {} saved {} ({} rows)",
                    self.processed, self.total, self.job, key, rows
                );
            }
            state => {
                self.failed += 1;
                let reason = state.failure_reason().unwrap_or("unfinished");
                *self.reasons.entry(reason).or_default() += 1;
                let detail = match state {
                    ItemState::FetchFailed(e) => e.to_string(),
                    ItemState::ExtractFailed(e) => e.to_string(),
                    ItemState::StoreFailed(e) => e.to_string(),
                    other => format!("{:?}", other),
                };
                warn!(
                    "[{}/{}] {} failed {} ({}): {}",
                    self.processed, self.total, self.job, key, outcome.item.url, detail
                );
                self.failures.push((key.clone(), detail));
            }
        }
    }

    pub fn log_summary(&self) {
        info!(
            "{} finished: {} candidates, {} processed, {} succeeded ({} already stored), {} failed{}",
            self.job,
            self.total,
            self.processed,
            self.succeeded,
            self.duplicates,
            self.failed,
            if self.cancelled { ", cancelled" } else { "" }
        );
        for (reason, count) in &self.reasons {
            info!("  {}: {}", reason, count);
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server responded with status {status}")]
    Server { status: u16 },
    #[error("gave up after {attempts} attempts: {last}")]
    BudgetExhausted { attempts: u32, last: Box<FetchError> },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("failed to build http client: {0}")]
    Client(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Server { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("shape mismatch at {url}: `{selector}` not found")]
    ShapeMismatch { url: String, selector: String },
    #[error("invalid selector `{0}`")]
    Selector(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),
    #[error("store unavailable: {0}")]
    Unavailable(#[source] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match e.sqlite_error_code() {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::ReadOnly
                | ErrorCode::DiskFull
                | ErrorCode::SystemIoFailure
                | ErrorCode::PermissionDenied,
            ) => StorageError::Unavailable(e),
            _ => StorageError::Database(e),
        }
    }
}

impl StorageError {
    /// Unavailability of the store itself stops the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("{job}: storage error before dispatch: {source}")]
    Storage {
        job: String,
        #[source]
        source: StorageError,
    },
    #[error("{job}: store became unavailable, run aborted: {source}")]
    Fatal {
        job: String,
        #[source]
        source: StorageError,
        report: Box<RunReport>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appendix_kind_round_trips_icon_labels() {
        for kind in [AppendixKind::Tai, AppendixKind::Ke, AppendixKind::Xing] {
            assert_eq!(AppendixKind::from_icon_label(kind.icon_label()), Some(kind));
        }
        assert_eq!(AppendixKind::from_icon_label(" 台 "), Some(AppendixKind::Tai));
        assert_eq!(AppendixKind::from_icon_label("音"), None);
    }

    #[test]
    fn blank_anchor_is_dropped() {
        let item = WorkItem::new("1", "丁", "https://x/").with_anchor(Some("  ".into()));
        assert_eq!(item.anchor, None);
    }

    #[test]
    fn report_buckets_failures_by_reason() {
        let item = WorkItem::new("A", "一", "https://x/a");
        let mut report = RunReport::new("standard", 3);
        report.record(&ItemOutcome {
            item: item.clone(),
            state: ItemState::Persisted { rows: 1 },
            duplicate: false,
        });
        report.record(&ItemOutcome {
            item: item.clone(),
            state: ItemState::FetchFailed(FetchError::BudgetExhausted {
                attempts: 3,
                last: Box::new(FetchError::Server { status: 500 }),
            }),
            duplicate: false,
        });
        report.record(&ItemOutcome {
            item,
            state: ItemState::ExtractFailed(ExtractError::ShapeMismatch {
                url: "https://x/a".into(),
                selector: "table#view".into(),
            }),
            duplicate: false,
        });

        assert_eq!(report.processed, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.reasons.get("budget_exhausted"), Some(&1));
        assert_eq!(report.reasons.get("shape_mismatch"), Some(&1));
        assert_eq!(report.failures.len(), 2);
    }

    #[test]
    fn only_terminal_states_carry_reasons() {
        assert!(!ItemState::Fetching.is_terminal());
        assert!(ItemState::Fetching.failure_reason().is_none());
        assert!(ItemState::Persisted { rows: 1 }.is_terminal());
    }
}
