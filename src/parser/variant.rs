// Variant character pages. Same `table#view` shell as standard pages, but
// the 內容 label appears twice: key references before the 研訂說明 header
// row and the research explanation after it.
use super::text::{cell_with_images, decode_data_uri, spaced_text, strip_text};
use super::{TemplateParser, selector, shape_mismatch};
use crate::model::{ExtractError, ExtractedRecord, InlineImage, TemplateKind, WorkItem};
use crate::utils::{clean_label, path_segment};
use scraper::{ElementRef, Html};

pub const FIELDS: [&str; 8] = [
    "standard_code",
    "variant_character",
    "glyph_image",
    "key_references",
    "bopomofo",
    "pinyin",
    "researcher",
    "explanation",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    VariantCharacter,
    Content,
    Bopomofo,
    Pinyin,
    Researcher,
    ResearchHeader,
}

// Checked in order; the first substring hit wins.
const LABELS: [(&str, Label); 6] = [
    ("異體字", Label::VariantCharacter),
    ("內容", Label::Content),
    ("注音", Label::Bopomofo),
    ("漢語拼音", Label::Pinyin),
    ("研訂者", Label::Researcher),
    ("研訂說明", Label::ResearchHeader),
];

fn classify(label: &str) -> Option<Label> {
    let clean = clean_label(label);
    LABELS
        .iter()
        .find(|(zh, _)| clean.contains(zh))
        .map(|(_, l)| *l)
}

/// Last whitespace token that looks like a radical-stroke index (`一-04-05`).
fn radical_stroke(td: ElementRef) -> Option<String> {
    spaced_text(td)
        .split_whitespace()
        .rev()
        .find(|t| t.contains('-') && t.chars().any(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

pub struct VariantParser;

impl VariantParser {
    fn glyph(
        &self,
        td: ElementRef,
        image_dir: &str,
        images: &mut Vec<InlineImage>,
    ) -> Result<(String, Option<String>), ExtractError> {
        let big_sel = selector("big2")?;
        let img_sel = selector("img")?;

        let Some(big) = td.select(&big_sel).next() else {
            return Ok((String::new(), None));
        };
        let Some(img) = big.select(&img_sel).next() else {
            return Ok((strip_text(big), None));
        };

        let glyph = img.value().attr("alt").unwrap_or("[img]").to_string();
        let saved = img
            .value()
            .attr("src")
            .and_then(decode_data_uri)
            .map(|bytes| {
                let path = format!("{}/glyph.png", image_dir);
                images.push(InlineImage {
                    path: path.clone(),
                    bytes,
                });
                path
            });
        Ok((glyph, saved))
    }
}

impl TemplateParser for VariantParser {
    fn parse(&self, document: &Html, item: &WorkItem) -> Result<ExtractedRecord, ExtractError> {
        let table_sel = selector("table#view")?;
        let row_sel = selector("tr")?;
        let th_sel = selector("th")?;
        let td_sel = selector("td")?;

        let table = document
            .select(&table_sel)
            .next()
            .ok_or_else(|| shape_mismatch(item, "table#view"))?;

        let template = TemplateKind::Variant;
        let mut record = ExtractedRecord::new(item, template, &FIELDS);
        if let Some(parent) = &item.parent {
            record.set("standard_code", parent.as_str());
        }
        let image_dir = format!("{}/{}", template.tag(), path_segment(&item.key));
        let mut past_research_header = false;

        for row in table.select(&row_sel) {
            let Some(th) = row.select(&th_sel).next() else {
                continue;
            };
            let label = strip_text(th);
            let kind = classify(&label);

            if kind == Some(Label::ResearchHeader) {
                past_research_header = true;
                continue;
            }
            let Some(td) = row.select(&td_sel).next() else {
                continue;
            };

            match kind {
                Some(Label::VariantCharacter) => {
                    let (glyph, image) = self.glyph(td, &image_dir, &mut record.images)?;
                    let radical = radical_stroke(td).unwrap_or_default();
                    record.set("variant_character", format!("{} {}", glyph, radical).trim());
                    if let Some(path) = image {
                        record.set("glyph_image", path);
                    }
                }
                Some(Label::Bopomofo) => record.set("bopomofo", spaced_text(td)),
                Some(Label::Pinyin) => record.set("pinyin", spaced_text(td)),
                Some(Label::Researcher) => record.set("researcher", spaced_text(td)),
                Some(Label::Content) if past_research_header => {
                    let text = cell_with_images(td, &image_dir, &mut record.images);
                    record.set("explanation", text);
                }
                Some(Label::Content) => record.set("key_references", spaced_text(td)),
                Some(Label::ResearchHeader) => {}
                None if label.is_empty() => {}
                None => record.unknown_labels.push(label),
            }
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Extractor;

    const PAGE: &str = r#"
        <table id="view">
          <tr><th>異體字</th><td><big2><img src="data:image/png;base64,R0lGOA==" alt="丁"></big2> 一-01-02</td></tr>
          <tr><th>內　容</th><td>說文 卷十四</td></tr>
          <tr><th>注　音</th><td>ㄉㄧㄥ</td></tr>
          <tr><th>漢語拼音</th><td>dīng</td></tr>
          <tr><th colspan="2">研訂說明</th></tr>
          <tr><th>研訂者</th><td>某 某</td></tr>
          <tr><th>內　容</th><td>見於古籍。<img src="data:image/png;base64,R0lGOA=="></td></tr>
          <tr><th>附　註</th><td>—</td></tr>
        </table>"#;

    fn item() -> WorkItem {
        WorkItem::new("A00001-001", "丁", "https://dict.example/dictView.jsp?ID=2")
            .with_parent("A00001")
    }

    #[test]
    fn splits_content_rows_around_research_header() {
        let record = Extractor::new()
            .extract(TemplateKind::Variant, &item(), PAGE)
            .unwrap();

        assert_eq!(record.field("standard_code"), Some("A00001"));
        assert_eq!(record.field("variant_character"), Some("丁 一-01-02"));
        assert_eq!(record.field("glyph_image"), Some("variant/A00001-001/glyph.png"));
        assert_eq!(record.field("key_references"), Some("說文 卷十四"));
        assert_eq!(record.field("bopomofo"), Some("ㄉㄧㄥ"));
        assert_eq!(record.field("pinyin"), Some("dīng"));
        assert_eq!(record.field("researcher"), Some("某 某"));
        assert_eq!(
            record.field("explanation"),
            Some("見於古籍。[img:variant/A00001-001/1.png]")
        );
        assert_eq!(record.unknown_labels, vec!["附　註".to_string()]);
        assert_eq!(record.images.len(), 2);
    }

    #[test]
    fn text_glyph_without_image() {
        let html = r#"<table id="view"><tr><th>異體字</th><td><big2>丅</big2> 一-01-02 </td></tr></table>"#;
        let record = Extractor::new()
            .extract(TemplateKind::Variant, &item(), html)
            .unwrap();
        assert_eq!(record.field("variant_character"), Some("丅 一-01-02"));
        assert_eq!(record.field("glyph_image"), None);
        assert!(record.images.is_empty());
    }

    #[test]
    fn classifies_labels_in_order() {
        assert_eq!(classify("異 體 字"), Some(Label::VariantCharacter));
        assert_eq!(classify("研訂說明"), Some(Label::ResearchHeader));
        assert_eq!(classify("出處"), None);
    }
}
