//! Deterministic serialization of a deck back to a single HTML document.

use super::{Slide, SlideDeck};

const DEFAULT_CHARSET: &str = "UTF-8";
const DEFAULT_VIEWPORT: &str = "width=device-width, initial-scale=1.0";

/// Render a full document around `slides`, using the deck's shared head,
/// style and script content.
pub(crate) fn render_document<'a>(
    deck: &SlideDeck,
    slides: impl IntoIterator<Item = &'a Slide>,
) -> String {
    let mut out = String::with_capacity(deck.css.len() + deck.scripts.len() + 1_024);
    out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");

    let charset = deck
        .head_meta
        .get("charset")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CHARSET);
    out.push_str(&format!("<meta charset=\"{}\">\n", escape_attr(charset)));

    let viewport = deck
        .head_meta
        .get("viewport")
        .map(String::as_str)
        .unwrap_or(DEFAULT_VIEWPORT);
    out.push_str(&format!(
        "<meta name=\"viewport\" content=\"{}\">\n",
        escape_attr(viewport)
    ));

    for (name, content) in &deck.head_meta {
        if name == "charset" || name == "viewport" {
            continue;
        }
        out.push_str(&format!(
            "<meta name=\"{}\" content=\"{}\">\n",
            escape_attr(name),
            escape_attr(content)
        ));
    }

    if let Some(title) = &deck.title {
        out.push_str(&format!("<title>{}</title>\n", escape_text(title)));
    }

    for src in &deck.external_scripts {
        out.push_str(&format!("<script src=\"{}\"></script>\n", escape_attr(src)));
    }

    if !deck.css.trim().is_empty() {
        out.push_str(&format!("<style>\n{}\n</style>\n", deck.css));
    }

    out.push_str("</head>\n<body>\n");

    let body = slides
        .into_iter()
        .map(|s| s.html.trim())
        .collect::<Vec<_>>()
        .join("\n\n");
    if !body.is_empty() {
        out.push_str(&body);
        out.push('\n');
    }

    if !deck.scripts.trim().is_empty() {
        out.push_str(&format!("<script>\n{}\n</script>\n", deck.scripts));
    }

    out.push_str("</body>\n</html>\n");
    out
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}
