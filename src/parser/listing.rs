// Listing pages that feed the detail crawls: the appendix index, the
// variant strip on each standard page, and the search result tabs.
use super::text::{decode_data_uri, strip_text, text_outside};
use super::{selector, shape_mismatch};
use crate::model::{
    ExtractError, InlineImage, Listing, SearchHit, SearchTab, SummaryEntry, VariantLink, WorkItem,
};
use crate::utils::{absolute_url, path_segment};
use scraper::{ElementRef, Html};
use url::Url;

/// Rows of an appendix index page (`appendix.jsp?ID=1&page=N`).
pub fn parse_index_page(
    html: &str,
    item: &WorkItem,
    base: &Url,
) -> Result<Vec<SummaryEntry>, ExtractError> {
    let document = Html::parse_document(html);
    let row_sel = selector("tr[id]")?;
    let td_sel = selector("td")?;
    let link_sel = selector("a[href]")?;

    let mut entries = Vec::new();
    for row in document.select(&row_sel) {
        let tds: Vec<ElementRef> = row.select(&td_sel).collect();
        if tds.len() < 3 {
            continue;
        }
        let Some(link) = tds[1].select(&link_sel).next() else {
            continue;
        };
        let href = link.value().attr("href").unwrap_or_default();
        entries.push(SummaryEntry {
            code: strip_text(tds[0]),
            character: strip_text(link),
            radical: strip_text(tds[2]),
            detail_url: absolute_url(base, href),
        });
    }

    if entries.is_empty() {
        return Err(shape_mismatch(item, "tr[id]"));
    }
    Ok(entries)
}

/// Variant links from a standard character page. Characters without
/// variants have no `section#vari`, which is an empty listing.
pub fn parse_variant_list(
    html: &str,
    item: &WorkItem,
    base: &Url,
) -> Result<Listing<VariantLink>, ExtractError> {
    let document = Html::parse_document(html);
    let link_sel = selector("section#vari details a[href]")?;
    let img_sel = selector("img")?;

    let mut listing = Listing::new(Vec::new());
    for link in document.select(&link_sel) {
        let attr = |name: &str| link.value().attr(name).unwrap_or_default().trim().to_string();
        let data_sn = attr("data-sn");
        let suffix = if data_sn.is_empty() { "-000".to_string() } else { data_sn };
        let variant_code = format!("{}{}", item.key, suffix);

        let mut img_path = None;
        let variant_char = match link.select(&img_sel).next() {
            Some(img) => {
                if let Some(bytes) = img.value().attr("src").and_then(decode_data_uri) {
                    let path = format!("variant-list/{}.png", path_segment(&variant_code));
                    listing.images.push(InlineImage {
                        path: path.clone(),
                        bytes,
                    });
                    img_path = Some(path);
                }
                img.value()
                    .attr("alt")
                    .filter(|a| !a.is_empty())
                    .unwrap_or("[img]")
                    .to_string()
            }
            None => {
                let text = strip_text(link);
                if text.is_empty() { "[?]".to_string() } else { text }
            }
        };

        listing.rows.push(VariantLink {
            variant_code,
            main_code: item.key.clone(),
            variant_char,
            href: absolute_url(base, &attr("href")),
            data_ucs: attr("data-ucs"),
            data_tp: attr("data-tp"),
            img_path,
        });
    }
    Ok(listing)
}

/// Number shown next to a tab label, e.g. `正文(3)` or `附收字（12）`.
fn tab_count(section: ElementRef, label: &str) -> Result<usize, ExtractError> {
    let link_sel = selector("a")?;
    for link in section.select(&link_sel) {
        let text = strip_text(link);
        let Some((_, rest)) = text.split_once(label) else {
            continue;
        };
        let digits: String = rest
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let Ok(n) = digits.parse() {
            return Ok(n);
        }
    }
    Ok(0)
}

/// Result links of one search tab. A tab that announces results but lists
/// none is treated as a shape mismatch so the page gets fetched again.
pub fn parse_search(
    html: &str,
    item: &WorkItem,
    tab: SearchTab,
    base: &Url,
) -> Result<Vec<SearchHit>, ExtractError> {
    let document = Html::parse_document(html);
    let section_sel = selector("div#searchL")?;
    let section = document
        .select(&section_sel)
        .next()
        .ok_or_else(|| shape_mismatch(item, "div#searchL"))?;

    let (label, links_css) = match tab {
        SearchTab::Text => ("正文", r#"a[href*="dictView.jsp"]"#),
        SearchTab::Appendix => ("附收字", r#"a[href*="appendix.jsp"]"#),
    };
    let announced = tab_count(section, label)?;
    let links_sel = selector(links_css)?;

    let hits = section
        .select(&links_sel)
        .map(|link| match tab {
            SearchTab::Text => text_hit(link, item, base),
            SearchTab::Appendix => appendix_hit(link, item, base),
        })
        .collect::<Result<Vec<_>, ExtractError>>()?;

    if announced > 0 && hits.is_empty() {
        return Err(shape_mismatch(item, links_css));
    }
    Ok(hits)
}

fn text_hit(link: ElementRef, item: &WorkItem, base: &Url) -> Result<SearchHit, ExtractError> {
    let code_sel = selector("code")?;
    let lines: Vec<String> = link
        .select(&code_sel)
        .next()
        .map(|code| {
            code.text()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let line = |i: usize| lines.get(i).cloned().unwrap_or_default();
    let attr = |name: &str| link.value().attr(name).unwrap_or_default().trim().to_string();

    let mut ucs_code = line(1);
    if ucs_code.is_empty() {
        ucs_code = attr("data-ucs");
    }

    Ok(SearchHit {
        search_char: item.lookup.clone(),
        result_type: SearchTab::Text.result_type().to_string(),
        result_char: text_outside(link, "code"),
        result_code: line(0),
        detail_url: absolute_url(base, &attr("href")),
        data_sn: attr("data-sn").parse().ok(),
        ucs_code,
        radical_stroke: line(2),
        ..Default::default()
    })
}

fn appendix_hit(link: ElementRef, item: &WorkItem, base: &Url) -> Result<SearchHit, ExtractError> {
    let attr = |name: &str| link.value().attr(name).unwrap_or_default().trim().to_string();
    let detail_url = absolute_url(base, &attr("href"));

    let (appendix_id, anchor_id) = match Url::parse(&detail_url) {
        Ok(url) => (
            url.query_pairs()
                .find(|(k, _)| k == "ID")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default(),
            url.fragment().unwrap_or_default().to_string(),
        ),
        Err(_) => (String::new(), String::new()),
    };

    Ok(SearchHit {
        search_char: item.lookup.clone(),
        result_type: SearchTab::Appendix.result_type().to_string(),
        result_char: strip_text(link),
        detail_url,
        appendix_id,
        anchor_id,
        icon_label: attr("data-tp"),
        ucs_code: attr("data-ucs"),
        radical_stroke: attr("data-rad"),
        ..Default::default()
    })
}
