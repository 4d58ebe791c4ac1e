//! Markup walk that turns an HTML document (or an edit fragment) into the
//! pieces a deck is assembled from.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::{DeckError, Slide};

/// Attribute that marks an inline script as chart-init code belonging to the
/// slides it ships with, rather than to the deck-wide script block.
pub const SLIDE_SCRIPTS_MARKER: &str = "data-slide-scripts";

/// Class that marks a top-level slide container.
pub const SLIDE_CLASS: &str = "slide";

static TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("head > title").expect("Invalid title selector"));
static STYLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("style").expect("Invalid style selector"));
static SCRIPT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script").expect("Invalid script selector"));
static META: Lazy<Selector> = Lazy::new(|| Selector::parse("meta").expect("Invalid meta selector"));
static SLIDE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".slide").expect("Invalid slide selector"));

/// An inline `<script>` found outside any slide container.
#[derive(Debug, Clone)]
pub(crate) struct InlineScript {
    pub text: String,
    pub slide_scoped: bool,
}

/// Everything extracted from one markup document, before deck assembly.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParsedMarkup {
    pub title: Option<String>,
    pub styles: Vec<String>,
    pub external_scripts: Vec<String>,
    pub inline_scripts: Vec<InlineScript>,
    pub head_meta: BTreeMap<String, String>,
    /// Slides carry only IDs taken from their own `id` attribute.
    pub slides: Vec<Slide>,
}

impl ParsedMarkup {
    pub fn joined_css(&self) -> String {
        join_blocks(self.styles.iter().map(String::as_str))
    }

    pub fn joined_scripts(&self, filter: impl Fn(&InlineScript) -> bool) -> String {
        join_blocks(
            self.inline_scripts
                .iter()
                .filter(|s| filter(s))
                .map(|s| s.text.as_str()),
        )
    }
}

pub(crate) fn parse_markup(html: &str) -> Result<ParsedMarkup, DeckError> {
    if html.trim().is_empty() {
        return Err(DeckError::Parse("document is empty".to_string()));
    }
    if !html.contains('<') {
        return Err(DeckError::Parse("document contains no markup".to_string()));
    }

    let document = Html::parse_document(html);
    let mut parsed = ParsedMarkup {
        title: document
            .select(&TITLE)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty()),
        ..Default::default()
    };

    for el in document.select(&STYLE).filter(|el| !inside_slide(el)) {
        let text = el.text().collect::<String>();
        let text = text.trim();
        if !text.is_empty() {
            parsed.styles.push(text.to_string());
        }
    }

    for el in document.select(&SCRIPT).filter(|el| !inside_slide(el)) {
        let element = el.value();
        if let Some(src) = element.attr("src") {
            parsed.external_scripts.push(src.to_string());
            continue;
        }
        let text = el.text().collect::<String>();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        parsed.inline_scripts.push(InlineScript {
            text: text.to_string(),
            slide_scoped: element.attr(SLIDE_SCRIPTS_MARKER).is_some(),
        });
    }

    for el in document.select(&META).filter(|el| !inside_slide(el)) {
        let element = el.value();
        if let Some(charset) = element.attr("charset") {
            parsed
                .head_meta
                .entry("charset".to_string())
                .or_insert_with(|| charset.to_string());
        }
        if let (Some(name), Some(content)) = (element.attr("name"), element.attr("content")) {
            parsed
                .head_meta
                .entry(name.to_string())
                .or_insert_with(|| content.to_string());
        }
    }

    parsed.slides = document
        .select(&SLIDE)
        .filter(|el| !inside_slide(el))
        .map(|el| Slide {
            html: el.html(),
            slide_id: el
                .value()
                .attr("id")
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
        })
        .collect();

    Ok(parsed)
}

/// Text of every inline script in `html`, including scripts nested in slides.
pub(crate) fn all_inline_script_text(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&SCRIPT)
        .filter(|el| el.value().attr("src").is_none())
        .map(|el| el.text().collect::<String>())
        .filter(|text| !text.trim().is_empty())
        .collect()
}

fn is_slide(el: &ElementRef<'_>) -> bool {
    el.value().classes().any(|c| c == SLIDE_CLASS)
}

/// Whether any ancestor of `el` is a slide container.
fn inside_slide(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| is_slide(&ancestor))
}

fn join_blocks<'a>(blocks: impl Iterator<Item = &'a str>) -> String {
    blocks.collect::<Vec<_>>().join("\n")
}
