// Appendix pages list many characters in one `div.appendV` table. The row
// for an item is found by its anchor id, or failing that by scanning the
// `tr.act` rows for the character itself.
use super::text::strip_text;
use super::{TemplateParser, selector, shape_mismatch};
use crate::model::{AppendixKind, ExtractError, ExtractedRecord, TemplateKind, WorkItem};
use scraper::{ElementRef, Html};

pub const FIELDS: [&str; 11] = [
    "icon_label",
    "search_char",
    "result_char",
    "char_form",
    "radical_stroke",
    "pronunciation",
    "examples_or_notes",
    "char_code",
    "surname_single",
    "surname_compound",
    "surname_double",
];

pub struct AppendixParser {
    kind: AppendixKind,
}

impl AppendixParser {
    pub fn new(kind: AppendixKind) -> Self {
        Self { kind }
    }

    /// Displayed character of a row; surname rows wrap it in a link.
    fn row_char(&self, row: ElementRef) -> Result<Option<String>, ExtractError> {
        let val_sel = selector("td.val")?;
        let link_sel = selector("a")?;
        let Some(val) = row.select(&val_sel).next() else {
            return Ok(None);
        };
        let text = match self.kind {
            AppendixKind::Xing => val
                .select(&link_sel)
                .next()
                .map(strip_text)
                .unwrap_or_else(|| strip_text(val)),
            _ => strip_text(val),
        };
        Ok(Some(text))
    }

    fn target_row<'a>(
        &self,
        container: ElementRef<'a>,
        item: &WorkItem,
    ) -> Result<Option<ElementRef<'a>>, ExtractError> {
        let row_sel = selector("tr.act")?;

        if let Some(anchor) = &item.anchor {
            let by_id = container
                .select(&row_sel)
                .find(|row| row.value().id() == Some(anchor.as_str()));
            if by_id.is_some() {
                return Ok(by_id);
            }
        }

        for row in container.select(&row_sel) {
            if self.row_char(row)?.as_deref() == Some(item.lookup.as_str()) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn sub_divs(row: ElementRef) -> Result<Option<(ElementRef, Vec<String>)>, ExtractError> {
        let sub_sel = selector("td.sub")?;
        let div_sel = selector("div")?;
        Ok(row
            .select(&sub_sel)
            .next()
            .map(|sub| (sub, sub.select(&div_sel).map(strip_text).collect())))
    }

    fn fill_tai(row: ElementRef, record: &mut ExtractedRecord) -> Result<(), ExtractError> {
        let (pronunciation, notes) = match Self::sub_divs(row)? {
            Some((_, divs)) if divs.len() >= 2 => (divs[0].clone(), divs[1].clone()),
            Some((_, divs)) if divs.len() == 1 => (divs[0].clone(), String::new()),
            Some((sub, _)) => (strip_text(sub), String::new()),
            None => (String::new(), String::new()),
        };
        record.set("pronunciation", pronunciation);
        record.set("examples_or_notes", notes);
        Ok(())
    }

    fn fill_ke(row: ElementRef, record: &mut ExtractedRecord) -> Result<(), ExtractError> {
        let pronunciation = match Self::sub_divs(row)? {
            Some((_, divs)) if !divs.is_empty() => divs[0].clone(),
            Some((sub, _)) => strip_text(sub),
            None => String::new(),
        };
        record.set("pronunciation", pronunciation);
        record.set("examples_or_notes", "");
        Ok(())
    }

    fn fill_xing(row: ElementRef, record: &mut ExtractedRecord) -> Result<(), ExtractError> {
        let code_sel = selector(r#"td.idx[headers*="codeH"]"#)?;
        let rad_sel = selector(r#"td.idx[headers*="radH"]"#)?;

        let code = row.select(&code_sel).next().map(strip_text).unwrap_or_default();
        record.set("char_code", code);
        let radical = row.select(&rad_sel).next().map(strip_text).unwrap_or_default();
        record.set("radical_stroke", radical);

        let surnames = match Self::sub_divs(row)? {
            Some((_, divs)) if divs.len() >= 3 => [divs[0].clone(), divs[1].clone(), divs[2].clone()],
            _ => Default::default(),
        };
        let [single, compound, double] = surnames;
        record.set("surname_single", single);
        record.set("surname_compound", compound);
        record.set("surname_double", double);
        record.set("pronunciation", "");
        record.set("examples_or_notes", "");
        Ok(())
    }
}

impl TemplateParser for AppendixParser {
    fn parse(&self, document: &Html, item: &WorkItem) -> Result<ExtractedRecord, ExtractError> {
        let container_sel = selector("div.appendV")?;
        let idx_sel = selector("td.idx")?;

        let container = document
            .select(&container_sel)
            .next()
            .ok_or_else(|| shape_mismatch(item, "div.appendV"))?;
        let row = self
            .target_row(container, item)?
            .ok_or_else(|| shape_mismatch(item, "div.appendV tr.act"))?;

        let mut record = ExtractedRecord::new(item, TemplateKind::Appendix(self.kind), &FIELDS);
        record.set("icon_label", self.kind.icon_label());
        record.set("result_char", item.lookup.as_str());
        if let Some(parent) = &item.parent {
            record.set("search_char", parent.as_str());
        }
        record.set("char_form", self.row_char(row)?.unwrap_or_default());

        match self.kind {
            AppendixKind::Tai | AppendixKind::Ke => {
                let radical = row.select(&idx_sel).next().map(strip_text).unwrap_or_default();
                record.set("radical_stroke", radical);
                if self.kind == AppendixKind::Tai {
                    Self::fill_tai(row, &mut record)?;
                } else {
                    Self::fill_ke(row, &mut record)?;
                }
            }
            AppendixKind::Xing => Self::fill_xing(row, &mut record)?,
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Extractor;

    const TAI: &str = r#"
        <div class="appendV"><table>
          <tr class="act" id="a1"><td class="val">乜</td><td class="idx">乙-01-02</td>
              <td class="sub"><div>mí</div><div>乜代</div></td></tr>
          <tr class="act" id="a2"><td class="val">丁</td><td class="idx">一-01-02</td>
              <td class="sub"><div>ting</div><div>壯丁</div></td></tr>
        </table></div>"#;

    const KE: &str = r#"
        <div class="appendV"><table>
          <tr class="act" id="k9"><td class="val">𠊎</td><td class="idx">人-02-05</td>
              <td class="sub">ngai</td></tr>
        </table></div>"#;

    const XING: &str = r#"
        <div class="appendV"><table>
          <tr class="act" id="x3">
            <td class="idx" headers="codeH">C00123</td>
            <td class="val"><a href="dictView.jsp?ID=9">丁</a></td>
            <td class="idx" headers="radH">一-01-02</td>
            <td class="sub"><div>丁</div><div>丁若</div><div>—</div></td></tr>
        </table></div>"#;

    fn item(anchor: Option<&str>, lookup: &str) -> WorkItem {
        WorkItem::new("42", lookup, "https://dict.example/appendix.jsp?ID=3")
            .with_parent("丁")
            .with_anchor(anchor.map(str::to_string))
    }

    #[test]
    fn tai_row_by_anchor() {
        let record = Extractor::new()
            .extract(TemplateKind::Appendix(AppendixKind::Tai), &item(Some("a2"), "丁"), TAI)
            .unwrap();
        assert_eq!(record.field("char_form"), Some("丁"));
        assert_eq!(record.field("radical_stroke"), Some("一-01-02"));
        assert_eq!(record.field("pronunciation"), Some("ting"));
        assert_eq!(record.field("examples_or_notes"), Some("壯丁"));
        assert_eq!(record.field("icon_label"), Some("台"));
        assert_eq!(record.field("search_char"), Some("丁"));
    }

    #[test]
    fn falls_back_to_scanning_for_the_character() {
        let record = Extractor::new()
            .extract(TemplateKind::Appendix(AppendixKind::Tai), &item(Some("gone"), "乜"), TAI)
            .unwrap();
        assert_eq!(record.field("pronunciation"), Some("mí"));

        let record = Extractor::new()
            .extract(TemplateKind::Appendix(AppendixKind::Tai), &item(None, "乜"), TAI)
            .unwrap();
        assert_eq!(record.field("char_form"), Some("乜"));
    }

    #[test]
    fn ke_row_without_divs_uses_cell_text() {
        let record = Extractor::new()
            .extract(TemplateKind::Appendix(AppendixKind::Ke), &item(Some("k9"), "𠊎"), KE)
            .unwrap();
        assert_eq!(record.field("pronunciation"), Some("ngai"));
        assert_eq!(record.field("examples_or_notes"), Some(""));
        assert_eq!(record.field("radical_stroke"), Some("人-02-05"));
    }

    #[test]
    fn xing_row_reads_code_and_surnames() {
        let record = Extractor::new()
            .extract(TemplateKind::Appendix(AppendixKind::Xing), &item(None, "丁"), XING)
            .unwrap();
        assert_eq!(record.field("char_code"), Some("C00123"));
        assert_eq!(record.field("char_form"), Some("丁"));
        assert_eq!(record.field("radical_stroke"), Some("一-01-02"));
        assert_eq!(record.field("surname_single"), Some("丁"));
        assert_eq!(record.field("surname_compound"), Some("丁若"));
        assert_eq!(record.field("surname_double"), Some("—"));
    }

    #[test]
    fn unmatched_character_is_a_shape_mismatch() {
        let err = Extractor::new()
            .extract(TemplateKind::Appendix(AppendixKind::Tai), &item(None, "木"), TAI)
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractError::ShapeMismatch { ref selector, .. } if selector == "div.appendV tr.act"
        ));
    }
}
