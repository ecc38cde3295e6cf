use crate::model::InlineImage;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use scraper::ElementRef;

/// Trimmed text pieces glued together, like the cell text a reader sees.
pub(crate) fn strip_text(el: ElementRef) -> String {
    el.text().map(str::trim).collect::<String>()
}

/// Trimmed text pieces joined with single spaces.
pub(crate) fn spaced_text(el: ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of `el` ignoring anything nested inside a `tag` element.
pub(crate) fn text_outside(el: ElementRef, tag: &str) -> String {
    el.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let nested = node
                .ancestors()
                .take_while(|a| a.id() != el.id())
                .any(|a| a.value().as_element().is_some_and(|e| e.name() == tag));
            if nested { None } else { Some(text.trim().to_string()) }
        })
        .collect()
}

pub(crate) fn decode_data_uri(src: &str) -> Option<Vec<u8>> {
    if !src.starts_with("data:image") {
        return None;
    }
    let (_, payload) = src.split_once(',')?;
    STANDARD.decode(payload.trim()).ok()
}

/// Cell text with inline images replaced by `[img:<path>]` placeholders.
/// Decoded images are appended to `images`, named `<dir>/<n>.png`.
pub(crate) fn cell_with_images(el: ElementRef, dir: &str, images: &mut Vec<InlineImage>) -> String {
    let mut parts = Vec::new();
    for node in el.descendants() {
        if let Some(text) = node.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed.to_string());
            }
            continue;
        }
        let Some(element) = node.value().as_element() else {
            continue;
        };
        if element.name() != "img" {
            continue;
        }
        let Some(src) = element.attr("src").filter(|s| s.starts_with("data:image")) else {
            continue;
        };
        match decode_data_uri(src) {
            Some(bytes) => {
                let path = format!("{}/{}.png", dir, images.len());
                parts.push(format!("[img:{}]", path));
                images.push(InlineImage { path, bytes });
            }
            None => parts.push("[img_error]".to_string()),
        }
    }
    parts.concat().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    // "GIF8" base64-encoded
    const TINY: &str = "data:image/png;base64,R0lGOA==";

    fn first<'a>(doc: &'a Html, css: &str) -> ElementRef<'a> {
        doc.select(&Selector::parse(css).unwrap()).next().unwrap()
    }

    #[test]
    fn strips_and_spaces_text() {
        let doc = Html::parse_fragment("<table><tr><td> ㄧ <br> yī </td></tr></table>");
        let td = first(&doc, "td");
        assert_eq!(strip_text(td), "ㄧyī");
        assert_eq!(spaced_text(td), "ㄧ yī");
    }

    #[test]
    fn ignores_text_inside_code() {
        let doc = Html::parse_fragment("<a>丁<code>A00001</code></a>");
        assert_eq!(text_outside(first(&doc, "a"), "code"), "丁");
    }

    #[test]
    fn replaces_inline_images_with_placeholders() {
        let html = format!(
            r#"<table><tr><td>見<img src="{0}" alt="x">字<img src="data:image/png;base64,!!!"><img src="/static/a.png"></td></tr></table>"#,
            TINY
        );
        let doc = Html::parse_fragment(&html);
        let mut images = Vec::new();
        let text = cell_with_images(first(&doc, "td"), "standard/A1", &mut images);
        assert_eq!(text, "見[img:standard/A1/0.png]字[img_error]");
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].bytes, b"GIF8".to_vec());
    }

    #[test]
    fn rejects_non_image_data_uris() {
        assert_eq!(decode_data_uri("data:text/plain;base64,QQ=="), None);
        assert_eq!(decode_data_uri(TINY), Some(b"GIF8".to_vec()));
    }
}
