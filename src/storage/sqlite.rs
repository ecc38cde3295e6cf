use crate::model::{
    ExtractedRecord, PersistOutcome, SearchHit, SearchTab, StorageError, SummaryEntry, VariantLink,
};
use chrono::Utc;
use rusqlite::{Connection, Row, params};
use std::path::Path;
use std::time::Duration;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS summary (
        code TEXT PRIMARY KEY,
        char TEXT,
        radical TEXT,
        detail_url TEXT
    );

    CREATE TABLE IF NOT EXISTS variants (
        variant_code TEXT PRIMARY KEY,
        main_code TEXT NOT NULL,
        variant_char TEXT,
        href TEXT
    );

    CREATE TABLE IF NOT EXISTS search_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        search_char TEXT NOT NULL,
        result_type TEXT NOT NULL,
        result_char TEXT,
        result_code TEXT,
        detail_url TEXT,
        appendix_id TEXT,
        anchor_id TEXT,
        icon_label TEXT,
        data_sn INTEGER,
        ucs_code TEXT,
        radical_stroke TEXT,
        UNIQUE(search_char, result_type, result_code, appendix_id, anchor_id)
    );

    CREATE TABLE IF NOT EXISTS details (
        template TEXT NOT NULL,
        item_key TEXT NOT NULL,
        parent_key TEXT,
        fields TEXT NOT NULL,
        unknown_labels TEXT NOT NULL DEFAULT '[]',
        fetched_at TEXT NOT NULL,
        PRIMARY KEY (template, item_key)
    );

    CREATE TABLE IF NOT EXISTS crawl_marks (
        job TEXT NOT NULL,
        item_key TEXT NOT NULL,
        rows INTEGER NOT NULL DEFAULT 0,
        marked_at TEXT NOT NULL,
        PRIMARY KEY (job, item_key)
    );

    CREATE INDEX IF NOT EXISTS idx_variants_main_code ON variants(main_code);
    CREATE INDEX IF NOT EXISTS idx_search_results_type ON search_results(result_type);
";

/// Row counts of the crawled tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub summary: usize,
    pub variants: usize,
    pub search_results: usize,
    pub details: usize,
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens the database and creates or migrates the schema.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        // Older databases have a bare variants table.
        Self::migrate_add_column_if_missing(&conn, "variants", "img_path", "TEXT")?;
        Self::migrate_add_column_if_missing(&conn, "variants", "data_ucs", "TEXT")?;
        Self::migrate_add_column_if_missing(&conn, "variants", "data_tp", "TEXT")?;

        Ok(Self { conn })
    }

    /// Adds a column to a table when it is missing.
    fn migrate_add_column_if_missing(
        conn: &Connection,
        table: &str,
        column: &str,
        column_def: &str,
    ) -> Result<(), StorageError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let existing_columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;

        if !existing_columns.iter().any(|c| c == column) {
            let alter_sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_def);
            conn.execute(&alter_sql, [])?;
        }

        Ok(())
    }

    /// Opens a batch transaction unless one is already open.
    pub fn begin_batch(&self) -> Result<(), StorageError> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
        }
        Ok(())
    }

    /// Commits the open batch, if any. Writes become durable here.
    pub fn checkpoint(&self) -> Result<(), StorageError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    // ---- frontier ------------------------------------------------------

    /// Summary entries without a `standard` detail row.
    pub fn pending_standard(&self) -> Result<Vec<SummaryEntry>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.code, COALESCE(s.char, ''), COALESCE(s.radical, ''), s.detail_url
             FROM summary s
             WHERE COALESCE(s.detail_url, '') <> ''
               AND NOT EXISTS (
                   SELECT 1 FROM details d
                   WHERE d.template = 'standard' AND d.item_key = s.code)
             ORDER BY s.code",
        )?;
        let rows = stmt.query_map([], Self::map_summary)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Variant links without a `variant` detail row.
    pub fn pending_variants(&self) -> Result<Vec<VariantLink>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT v.variant_code, v.main_code, COALESCE(v.variant_char, ''), v.href,
                    COALESCE(v.data_ucs, ''), COALESCE(v.data_tp, ''), v.img_path
             FROM variants v
             WHERE COALESCE(v.href, '') <> ''
               AND NOT EXISTS (
                   SELECT 1 FROM details d
                   WHERE d.template = 'variant' AND d.item_key = v.variant_code)
             ORDER BY v.variant_code",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(VariantLink {
                variant_code: row.get(0)?,
                main_code: row.get(1)?,
                variant_char: row.get(2)?,
                href: row.get(3)?,
                data_ucs: row.get(4)?,
                data_tp: row.get(5)?,
                img_path: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Appendix search hits with a known layout and no `appendix` detail row.
    pub fn pending_appendix(&self) -> Result<Vec<SearchHit>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT sr.id, sr.search_char, sr.result_type, COALESCE(sr.result_char, ''),
                    COALESCE(sr.result_code, ''), sr.detail_url, COALESCE(sr.appendix_id, ''),
                    COALESCE(sr.anchor_id, ''), sr.icon_label, sr.data_sn,
                    COALESCE(sr.ucs_code, ''), COALESCE(sr.radical_stroke, '')
             FROM search_results sr
             WHERE sr.result_type = 'Appendix'
               AND sr.icon_label IN ('台', '客', '姓')
               AND COALESCE(sr.detail_url, '') <> ''
               AND NOT EXISTS (
                   SELECT 1 FROM details d
                   WHERE d.template = 'appendix' AND d.item_key = CAST(sr.id AS TEXT))
             ORDER BY sr.id",
        )?;
        let rows = stmt.query_map([], Self::map_search_hit)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Summary entries not yet marked done for a listing job.
    pub fn pending_summary_for(&self, job: &str) -> Result<Vec<SummaryEntry>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.code, COALESCE(s.char, ''), COALESCE(s.radical, ''), s.detail_url
             FROM summary s
             WHERE COALESCE(s.detail_url, '') <> ''
               AND NOT EXISTS (
                   SELECT 1 FROM crawl_marks m WHERE m.job = ?1 AND m.item_key = s.code)
             ORDER BY s.code",
        )?;
        let rows = stmt.query_map(params![job], Self::map_summary)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// (summary entry, tab) pairs whose search tab has not been crawled.
    pub fn pending_search(&self, job: &str) -> Result<Vec<(SummaryEntry, SearchTab)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.code, COALESCE(s.char, ''), COALESCE(s.radical, ''),
                    COALESCE(s.detail_url, ''), t.tab
             FROM summary s
             CROSS JOIN (SELECT 'text' AS tab UNION ALL SELECT 'appendix') t
             WHERE COALESCE(s.char, '') <> ''
               AND NOT EXISTS (
                   SELECT 1 FROM crawl_marks m
                   WHERE m.job = ?1 AND m.item_key = s.code || ':' || t.tab)
             ORDER BY s.code, t.tab DESC",
        )?;
        let rows = stmt.query_map(params![job], |row| {
            let entry = Self::map_summary(row)?;
            let tab: String = row.get(4)?;
            Ok((entry, tab))
        })?;

        let mut pending = Vec::new();
        for row in rows {
            let (entry, tab) = row?;
            if let Some(tab) = SearchTab::parse(&tab) {
                pending.push((entry, tab));
            }
        }
        Ok(pending)
    }

    /// Index page numbers in `1..=pages` not yet marked done.
    pub fn pending_index_pages(&self, job: &str, pages: u32) -> Result<Vec<u32>, StorageError> {
        let mut stmt = self.conn.prepare(
            "WITH RECURSIVE pages(n) AS (
                 SELECT 1 WHERE ?2 >= 1
                 UNION ALL
                 SELECT n + 1 FROM pages WHERE n < ?2)
             SELECT n FROM pages
             WHERE NOT EXISTS (
                 SELECT 1 FROM crawl_marks m
                 WHERE m.job = ?1 AND m.item_key = CAST(n AS TEXT))
             ORDER BY n",
        )?;
        let rows = stmt.query_map(params![job, pages], |row| row.get::<_, u32>(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    // ---- persistence ---------------------------------------------------

    /// Stores an extracted detail record. The first write for a
    /// (template, key) wins; later writes are dropped.
    pub fn insert_detail(&mut self, record: &ExtractedRecord) -> Result<PersistOutcome, StorageError> {
        let fields = serde_json::to_string(&record.fields)?;
        let unknown = serde_json::to_string(&record.unknown_labels)?;
        let sp = self.conn.savepoint()?;
        let changed = sp.execute(
            "INSERT OR IGNORE INTO details
                (template, item_key, parent_key, fields, unknown_labels, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.template.tag(),
                &record.key,
                &record.parent,
                fields,
                unknown,
                Utc::now().to_rfc3339(),
            ],
        )?;
        sp.commit()?;
        Ok(if changed == 0 {
            PersistOutcome::Duplicate
        } else {
            PersistOutcome::Inserted(changed)
        })
    }

    /// Upserts one index page worth of summary rows and marks the page done.
    pub fn save_summary_page(
        &mut self,
        job: &str,
        page_key: &str,
        entries: &[SummaryEntry],
    ) -> Result<PersistOutcome, StorageError> {
        let sp = self.conn.savepoint()?;
        for e in entries {
            sp.execute(
                "INSERT OR REPLACE INTO summary (code, char, radical, detail_url)
                 VALUES (?1, ?2, ?3, ?4)",
                params![&e.code, &e.character, &e.radical, &e.detail_url],
            )?;
        }
        Self::mark(&sp, job, page_key, entries.len())?;
        sp.commit()?;
        Ok(PersistOutcome::Inserted(entries.len()))
    }

    /// Upserts the variant links of one standard character and marks it done.
    pub fn save_variant_links(
        &mut self,
        job: &str,
        main_code: &str,
        links: &[VariantLink],
    ) -> Result<PersistOutcome, StorageError> {
        let sp = self.conn.savepoint()?;
        for l in links {
            sp.execute(
                "INSERT OR REPLACE INTO variants
                    (variant_code, main_code, variant_char, href, img_path, data_ucs, data_tp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    &l.variant_code,
                    &l.main_code,
                    &l.variant_char,
                    &l.href,
                    &l.img_path,
                    &l.data_ucs,
                    &l.data_tp,
                ],
            )?;
        }
        Self::mark(&sp, job, main_code, links.len())?;
        sp.commit()?;
        Ok(PersistOutcome::Inserted(links.len()))
    }

    /// Inserts search hits, keeping ids of hits already stored, and marks the tab done.
    pub fn save_search_hits(
        &mut self,
        job: &str,
        item_key: &str,
        hits: &[SearchHit],
    ) -> Result<PersistOutcome, StorageError> {
        let sp = self.conn.savepoint()?;
        let mut inserted = 0;
        for h in hits {
            inserted += sp.execute(
                "INSERT OR IGNORE INTO search_results
                    (search_char, result_type, result_char, result_code, detail_url,
                     appendix_id, anchor_id, icon_label, data_sn, ucs_code, radical_stroke)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    &h.search_char,
                    &h.result_type,
                    &h.result_char,
                    &h.result_code,
                    &h.detail_url,
                    &h.appendix_id,
                    &h.anchor_id,
                    &h.icon_label,
                    &h.data_sn,
                    &h.ucs_code,
                    &h.radical_stroke,
                ],
            )?;
        }
        Self::mark(&sp, job, item_key, hits.len())?;
        sp.commit()?;
        Ok(PersistOutcome::Inserted(inserted))
    }

    fn mark(conn: &Connection, job: &str, item_key: &str, rows: usize) -> Result<(), StorageError> {
        conn.execute(
            "INSERT OR REPLACE INTO crawl_marks (job, item_key, rows, marked_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![job, item_key, rows as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ---- reads ---------------------------------------------------------

    pub fn table_counts(&self) -> Result<TableCounts, StorageError> {
        let count = |table: &str| -> Result<usize, StorageError> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(TableCounts {
            summary: count("summary")?,
            variants: count("variants")?,
            search_results: count("search_results")?,
            details: count("details")?,
        })
    }

    fn map_summary(row: &Row) -> Result<SummaryEntry, rusqlite::Error> {
        Ok(SummaryEntry {
            code: row.get(0)?,
            character: row.get(1)?,
            radical: row.get(2)?,
            detail_url: row.get(3)?,
        })
    }

    fn map_search_hit(row: &Row) -> Result<SearchHit, rusqlite::Error> {
        Ok(SearchHit {
            id: row.get(0)?,
            search_char: row.get(1)?,
            result_type: row.get(2)?,
            result_char: row.get(3)?,
            result_code: row.get(4)?,
            detail_url: row.get(5)?,
            appendix_id: row.get(6)?,
            anchor_id: row.get(7)?,
            icon_label: row.get(8)?,
            data_sn: row.get(9)?,
            ucs_code: row.get(10)?,
            radical_stroke: row.get(11)?,
        })
    }
}

/// A row of the `details` table read back.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDetail {
    pub template: String,
    pub item_key: String,
    pub parent_key: Option<String>,
    pub fields: std::collections::BTreeMap<String, Option<String>>,
    pub unknown_labels: Vec<String>,
    pub fetched_at: chrono::DateTime<Utc>,
}

#[cfg(test)]
impl SqliteStorage {
    pub fn get_detail(&self, template: &str, key: &str) -> Result<Option<StoredDetail>, StorageError> {
        use rusqlite::OptionalExtension;

        let mut stmt = self.conn.prepare(
            "SELECT template, item_key, parent_key, fields, unknown_labels, fetched_at
             FROM details WHERE template = ?1 AND item_key = ?2",
        )?;
        Ok(stmt
            .query_row(params![template, key], Self::map_detail)
            .optional()?)
    }

    pub fn detail_keys(&self, template: &str) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT item_key FROM details WHERE template = ?1 ORDER BY item_key")?;
        let rows = stmt.query_map(params![template], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn map_detail(row: &Row) -> Result<StoredDetail, rusqlite::Error> {
        let json = |idx: usize| -> Result<String, rusqlite::Error> { row.get(idx) };
        let fields = serde_json::from_str(&json(3)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let unknown_labels = serde_json::from_str(&json(4)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(StoredDetail {
            template: row.get(0)?,
            item_key: row.get(1)?,
            parent_key: row.get(2)?,
            fields,
            unknown_labels,
            fetched_at: row.get(5)?,
        })
    }
}
