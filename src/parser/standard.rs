// Standard character pages: a `table#view` of label / content rows.
use super::text::{cell_with_images, strip_text};
use super::{TemplateParser, selector, shape_mismatch};
use crate::model::{ExtractError, ExtractedRecord, TemplateKind, WorkItem};
use crate::utils::{clean_label, path_segment};
use scraper::Html;

pub const FIELDS: [&str; 7] = [
    "main_char",
    "standard_character",
    "shuowen_etymology",
    "character_style",
    "zhuyin_pronunciation",
    "hanyu_pinyin",
    "definition",
];

const EXACT_LABELS: [(&str, &str); 10] = [
    ("正字", "standard_character"),
    ("說文釋形", "shuowen_etymology"),
    ("說文", "shuowen_etymology"),
    ("字樣說明", "character_style"),
    ("字樣", "character_style"),
    ("注音", "zhuyin_pronunciation"),
    ("漢語拼音", "hanyu_pinyin"),
    ("拼音", "hanyu_pinyin"),
    ("釋義", "definition"),
    ("義", "definition"),
];

/// Maps a row label to a field: exact match first, then keywords.
pub fn map_label(label: &str) -> Option<&'static str> {
    let label = clean_label(label);
    if let Some((_, field)) = EXACT_LABELS.iter().find(|(l, _)| *l == label) {
        return Some(field);
    }
    if label.contains("正字") {
        Some("standard_character")
    } else if label.contains("說文") {
        Some("shuowen_etymology")
    } else if label.contains("字樣") {
        Some("character_style")
    } else if label.contains('注') && label.contains('音') {
        Some("zhuyin_pronunciation")
    } else if label.contains("拼音") {
        Some("hanyu_pinyin")
    } else if label.contains('釋') || label.contains('義') {
        Some("definition")
    } else {
        None
    }
}

pub struct StandardParser;

impl TemplateParser for StandardParser {
    fn parse(&self, document: &Html, item: &WorkItem) -> Result<ExtractedRecord, ExtractError> {
        let table_sel = selector("table#view")?;
        let row_sel = selector("tr")?;
        let th_sel = selector("th")?;
        let td_sel = selector("td")?;

        let table = document
            .select(&table_sel)
            .next()
            .ok_or_else(|| shape_mismatch(item, "table#view"))?;

        let template = TemplateKind::Standard;
        let mut record = ExtractedRecord::new(item, template, &FIELDS);
        record.set("main_char", item.lookup.as_str());
        let image_dir = format!("{}/{}", template.tag(), path_segment(&item.key));

        for row in table.select(&row_sel) {
            let (Some(th), Some(td)) = (row.select(&th_sel).next(), row.select(&td_sel).next()) else {
                continue;
            };
            let label = strip_text(th);
            if label.is_empty() {
                continue;
            }
            match map_label(&label) {
                Some(field) => {
                    let content = cell_with_images(td, &image_dir, &mut record.images);
                    record.set(field, content);
                }
                None => record.unknown_labels.push(label),
            }
        }

        Ok(record)
    }
}
