// HTML extraction for the dictionary's page templates.
pub mod appendix;
pub mod listing;
pub mod standard;
pub mod variant;
mod text;

use crate::model::{ExtractError, ExtractedRecord, TemplateKind, WorkItem};
use scraper::{Html, Selector};

pub use appendix::AppendixParser;
pub use standard::StandardParser;
pub use variant::VariantParser;

/// One detail-page layout.
pub trait TemplateParser {
    fn parse(&self, document: &Html, item: &WorkItem) -> Result<ExtractedRecord, ExtractError>;
}

/// Picks the parser for a template. Holds no state, so the same document
/// always produces the same record.
#[derive(Debug, Default, Clone, Copy)]
pub struct Extractor;

impl Extractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(
        &self,
        template: TemplateKind,
        item: &WorkItem,
        html: &str,
    ) -> Result<ExtractedRecord, ExtractError> {
        let document = Html::parse_document(html);
        match template {
            TemplateKind::Standard => StandardParser.parse(&document, item),
            TemplateKind::Variant => VariantParser.parse(&document, item),
            TemplateKind::Appendix(kind) => AppendixParser::new(kind).parse(&document, item),
        }
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector(format!("{}: {}", css, e)))
}

pub(crate) fn shape_mismatch(item: &WorkItem, css: &str) -> ExtractError {
    ExtractError::ShapeMismatch {
        url: item.url.clone(),
        selector: css.to_string(),
    }
}
