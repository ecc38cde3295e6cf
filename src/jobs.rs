// Crawl jobs. Each job binds a frontier query, the request for an item,
// an extractor and a persister; the coordinator drives them all the same way.
use crate::model::{
    AppendixKind, ExtractError, ExtractedRecord, InlineImage, Listing, PersistOutcome, SearchHit,
    SearchTab, StorageError, SummaryEntry, TemplateKind, VariantLink, WorkItem,
};
use crate::parser::Extractor;
use crate::parser::listing::{parse_index_page, parse_search, parse_variant_list};
use crate::storage::SqliteStorage;
use crate::utils::absolute_url;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Index,
    VariantList,
    Search,
    Standard,
    Variant,
    Appendix,
}

impl JobKind {
    pub const ALL: [JobKind; 6] = [
        JobKind::Index,
        JobKind::VariantList,
        JobKind::Search,
        JobKind::Standard,
        JobKind::Variant,
        JobKind::Appendix,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Index => "index",
            JobKind::VariantList => "variant-list",
            JobKind::Search => "search",
            JobKind::Standard => "standard",
            JobKind::Variant => "variant",
            JobKind::Appendix => "appendix",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown job `{0}` (expected one of index, variant-list, search, standard, variant, appendix)")]
pub struct UnknownJob(pub String);

impl FromStr for JobKind {
    type Err = UnknownJob;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| UnknownJob(s.to_string()))
    }
}

/// A named crawl. `frontier` and `persist` run with the store locked;
/// `extract` must stay free of I/O.
pub trait Job: Send + Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    /// Items not yet completed, in ascending key order.
    fn frontier(&self, storage: &SqliteStorage) -> Result<Vec<WorkItem>, StorageError>;

    fn extract(&self, item: &WorkItem, html: &str) -> Result<Self::Output, ExtractError>;

    /// Images referenced by an extracted output.
    fn images<'a>(&self, output: &'a Self::Output) -> &'a [InlineImage];

    /// Clears columns that point at image files, for when none were written.
    fn forget_images(&self, _output: &mut Self::Output) {}

    fn persist(
        &self,
        storage: &mut SqliteStorage,
        item: &WorkItem,
        output: &Self::Output,
    ) -> Result<PersistOutcome, StorageError>;
}

// ---- detail crawls --------------------------------------------------------

/// Detail pages written to the `details` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailJob {
    Standard,
    Variant,
    Appendix,
}

impl DetailJob {
    fn appendix_item(hit: SearchHit) -> Option<WorkItem> {
        let id = hit.id?;
        let kind = AppendixKind::from_icon_label(&hit.icon_label)?;
        Some(
            WorkItem::new(id.to_string(), hit.result_char, hit.detail_url)
                .with_parent(hit.search_char)
                .with_anchor(Some(hit.anchor_id))
                .with_template(TemplateKind::Appendix(kind)),
        )
    }

    // Frontier items always carry their template; appendix items also carry the layout.
    fn template_for(&self, item: &WorkItem) -> TemplateKind {
        item.template.unwrap_or(match self {
            DetailJob::Standard => TemplateKind::Standard,
            DetailJob::Variant => TemplateKind::Variant,
            DetailJob::Appendix => TemplateKind::Appendix(AppendixKind::Tai),
        })
    }
}

impl Job for DetailJob {
    type Output = ExtractedRecord;

    fn name(&self) -> &'static str {
        match self {
            DetailJob::Standard => JobKind::Standard.name(),
            DetailJob::Variant => JobKind::Variant.name(),
            DetailJob::Appendix => JobKind::Appendix.name(),
        }
    }

    fn frontier(&self, storage: &SqliteStorage) -> Result<Vec<WorkItem>, StorageError> {
        let items = match self {
            DetailJob::Standard => storage
                .pending_standard()?
                .into_iter()
                .map(|e| {
                    WorkItem::new(e.code, e.character, e.detail_url)
                        .with_template(TemplateKind::Standard)
                })
                .collect(),
            DetailJob::Variant => storage
                .pending_variants()?
                .into_iter()
                .map(|v| {
                    WorkItem::new(v.variant_code, v.variant_char, v.href)
                        .with_parent(v.main_code)
                        .with_template(TemplateKind::Variant)
                })
                .collect(),
            DetailJob::Appendix => storage
                .pending_appendix()?
                .into_iter()
                .filter_map(Self::appendix_item)
                .collect(),
        };
        Ok(items)
    }

    fn extract(&self, item: &WorkItem, html: &str) -> Result<ExtractedRecord, ExtractError> {
        Extractor::new().extract(self.template_for(item), item, html)
    }

    fn images<'a>(&self, output: &'a ExtractedRecord) -> &'a [InlineImage] {
        &output.images
    }

    fn forget_images(&self, output: &mut ExtractedRecord) {
        if let Some(path) = output.fields.get_mut("glyph_image") {
            *path = None;
        }
    }

    fn persist(
        &self,
        storage: &mut SqliteStorage,
        _item: &WorkItem,
        output: &ExtractedRecord,
    ) -> Result<PersistOutcome, StorageError> {
        storage.insert_detail(output)
    }
}

// ---- seed crawls ----------------------------------------------------------

/// Appendix index pages that fill the `summary` table.
pub struct IndexJob {
    base: Url,
    pages: u32,
    appendix_id: String,
}

impl IndexJob {
    pub fn new(base: Url, pages: u32, appendix_id: impl Into<String>) -> Self {
        Self {
            base,
            pages,
            appendix_id: appendix_id.into(),
        }
    }
}

impl Job for IndexJob {
    type Output = Vec<SummaryEntry>;

    fn name(&self) -> &'static str {
        JobKind::Index.name()
    }

    fn frontier(&self, storage: &SqliteStorage) -> Result<Vec<WorkItem>, StorageError> {
        let url = absolute_url(&self.base, "appendix.jsp");
        Ok(storage
            .pending_index_pages(self.name(), self.pages)?
            .into_iter()
            .map(|page| {
                let page = page.to_string();
                WorkItem::new(page.as_str(), page.as_str(), url.as_str())
                    .with_query(&[("ID", self.appendix_id.as_str()), ("page", page.as_str())])
            })
            .collect())
    }

    fn extract(&self, item: &WorkItem, html: &str) -> Result<Vec<SummaryEntry>, ExtractError> {
        parse_index_page(html, item, &self.base)
    }

    fn images<'a>(&self, _output: &'a Vec<SummaryEntry>) -> &'a [InlineImage] {
        &[]
    }

    fn persist(
        &self,
        storage: &mut SqliteStorage,
        item: &WorkItem,
        output: &Vec<SummaryEntry>,
    ) -> Result<PersistOutcome, StorageError> {
        storage.save_summary_page(self.name(), &item.key, output)
    }
}

/// The variant strip of every standard character page.
pub struct VariantListJob {
    base: Url,
}

impl VariantListJob {
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

impl Job for VariantListJob {
    type Output = Listing<VariantLink>;

    fn name(&self) -> &'static str {
        JobKind::VariantList.name()
    }

    fn frontier(&self, storage: &SqliteStorage) -> Result<Vec<WorkItem>, StorageError> {
        Ok(storage
            .pending_summary_for(self.name())?
            .into_iter()
            .map(|e| WorkItem::new(e.code, e.character, e.detail_url))
            .collect())
    }

    fn extract(&self, item: &WorkItem, html: &str) -> Result<Listing<VariantLink>, ExtractError> {
        parse_variant_list(html, item, &self.base)
    }

    fn images<'a>(&self, output: &'a Listing<VariantLink>) -> &'a [InlineImage] {
        &output.images
    }

    fn forget_images(&self, output: &mut Listing<VariantLink>) {
        for row in &mut output.rows {
            row.img_path = None;
        }
    }

    fn persist(
        &self,
        storage: &mut SqliteStorage,
        item: &WorkItem,
        output: &Listing<VariantLink>,
    ) -> Result<PersistOutcome, StorageError> {
        storage.save_variant_links(self.name(), &item.key, &output.rows)
    }
}

/// Quick search for every standard character, one item per result tab.
/// Item keys are `<code>:<tab>`.
pub struct SearchJob {
    base: Url,
}

impl SearchJob {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    fn tab(item: &WorkItem) -> Option<SearchTab> {
        item.key
            .rsplit_once(':')
            .and_then(|(_, tab)| SearchTab::parse(tab))
    }
}

impl Job for SearchJob {
    type Output = Vec<SearchHit>;

    fn name(&self) -> &'static str {
        JobKind::Search.name()
    }

    fn frontier(&self, storage: &SqliteStorage) -> Result<Vec<WorkItem>, StorageError> {
        let url = absolute_url(&self.base, "search.jsp");
        Ok(storage
            .pending_search(self.name())?
            .into_iter()
            .map(|(entry, tab)| {
                WorkItem::new(
                    format!("{}:{}", entry.code, tab.as_str()),
                    entry.character.as_str(),
                    url.as_str(),
                )
                .with_query(&[("QTP", "0"), ("WORD", entry.character.as_str()), ("TP", tab.tp())])
                .with_parent(entry.code)
            })
            .collect())
    }

    fn extract(&self, item: &WorkItem, html: &str) -> Result<Vec<SearchHit>, ExtractError> {
        let tab = Self::tab(item).unwrap_or(SearchTab::Text);
        parse_search(html, item, tab, &self.base)
    }

    fn images<'a>(&self, _output: &'a Vec<SearchHit>) -> &'a [InlineImage] {
        &[]
    }

    fn persist(
        &self,
        storage: &mut SqliteStorage,
        item: &WorkItem,
        output: &Vec<SearchHit>,
    ) -> Result<PersistOutcome, StorageError> {
        storage.save_search_hits(self.name(), &item.key, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://dict.variants.moe.edu.tw/").unwrap()
    }

    fn seeded() -> SqliteStorage {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let entries = [("A00002", "丁"), ("A00001", "一")].map(|(code, ch)| SummaryEntry {
            code: code.into(),
            character: ch.into(),
            radical: "一".into(),
            detail_url: format!("https://dict.variants.moe.edu.tw/dictView.jsp?ID={}", code),
        });
        storage.save_summary_page("index", "1", &entries).unwrap();
        storage
    }

    #[test]
    fn job_names_parse_both_ways() {
        for kind in JobKind::ALL {
            assert_eq!(kind.name().parse::<JobKind>(), Ok(kind));
        }
        assert_eq!("crawl".parse::<JobKind>(), Err(UnknownJob("crawl".into())));
        let kinds: Vec<JobKind> = serde_json::from_str(r#"["variant-list", "appendix"]"#).unwrap();
        assert_eq!(kinds, vec![JobKind::VariantList, JobKind::Appendix]);
    }

    #[test]
    fn standard_frontier_is_sorted_by_code() {
        let items = DetailJob::Standard.frontier(&seeded()).unwrap();
        let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, ["A00001", "A00002"]);
        assert_eq!(items[1].lookup, "丁");
        assert_eq!(items[1].template, Some(TemplateKind::Standard));
    }

    #[test]
    fn index_frontier_builds_paged_requests() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let job = IndexJob::new(base(), 2, "1");
        let items = job.frontier(&storage).unwrap();
        assert_eq!(items.len(), 2);
        let req = items[1].request();
        assert_eq!(req.url, "https://dict.variants.moe.edu.tw/appendix.jsp");
        assert_eq!(
            req.query,
            vec![("ID".to_string(), "1".to_string()), ("page".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn search_frontier_uses_quick_search_per_tab() {
        let items = SearchJob::new(base()).frontier(&seeded()).unwrap();
        let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(
            keys,
            ["A00001:text", "A00001:appendix", "A00002:text", "A00002:appendix"]
        );
        let appendix = &items[1];
        assert_eq!(SearchJob::tab(appendix), Some(SearchTab::Appendix));
        assert!(appendix.query.contains(&("TP".to_string(), "2".to_string())));
        assert!(appendix.query.contains(&("WORD".to_string(), "一".to_string())));
        assert_eq!(appendix.parent.as_deref(), Some("A00001"));
    }

    #[test]
    fn appendix_frontier_skips_unknown_layouts() {
        let mut storage = seeded();
        let hit = |label: &str, anchor: &str| SearchHit {
            search_char: "丁".into(),
            result_type: "Appendix".into(),
            result_char: "丁".into(),
            detail_url: format!("https://dict.variants.moe.edu.tw/appendix.jsp?ID=3#{}", anchor),
            appendix_id: "3".into(),
            anchor_id: anchor.into(),
            icon_label: label.into(),
            ..Default::default()
        };
        storage
            .save_search_hits("search", "A00002:appendix", &[hit("姓", "x1"), hit("音", "x2")])
            .unwrap();

        let items = DetailJob::Appendix.frontier(&storage).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, "1");
        assert_eq!(items[0].anchor.as_deref(), Some("x1"));
        assert_eq!(items[0].parent.as_deref(), Some("丁"));
        assert_eq!(
            items[0].template,
            Some(TemplateKind::Appendix(AppendixKind::Xing))
        );
    }

    #[test]
    fn forgetting_images_clears_file_columns_only() {
        let job = VariantListJob::new(base());
        let item = WorkItem::new("A00001", "一", "https://dict.variants.moe.edu.tw/dictView.jsp?ID=A00001");
        let html = r#"<section id="vari"><details>
            <a href="dictView.jsp?ID=A00001-001" data-sn="-001"><img src="data:image/png;base64,R0lGOA==" alt="弌"></a>
            </details></section>"#;
        let mut listing = job.extract(&item, html).unwrap();
        assert!(listing.rows[0].img_path.is_some());

        job.forget_images(&mut listing);
        assert_eq!(listing.rows[0].img_path, None);
        assert_eq!(listing.rows[0].variant_char, "弌");
        assert_eq!(listing.images.len(), 1);

        let mut record = ExtractedRecord::new(&item, TemplateKind::Variant, &["glyph_image"]);
        record.set("glyph_image", "variant/A00001-001/glyph.png");
        record.set("definition", "[img:variant/A00001-001/1.png]");
        DetailJob::Variant.forget_images(&mut record);
        assert_eq!(record.fields.get("glyph_image"), Some(&None));
        assert!(record.fields.get("definition").unwrap().is_some());
    }

    #[test]
    fn variant_list_persist_marks_characters_without_variants() {
        let mut storage = seeded();
        let job = VariantListJob::new(base());
        let items = job.frontier(&storage).unwrap();
        let listing = job.extract(&items[0], "<main></main>").unwrap();
        assert_eq!(
            job.persist(&mut storage, &items[0], &listing).unwrap(),
            PersistOutcome::Inserted(0)
        );
        assert_eq!(job.frontier(&storage).unwrap().len(), 1);
    }
}
