use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

static CANVAS_WITH_ID: Lazy<Selector> =
    Lazy::new(|| Selector::parse("canvas[id]").expect("Invalid canvas selector"));

/// One slide: the outer HTML of its container plus an optional stable ID.
///
/// `Clone` is a deep copy; slides never share mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    pub html: String,
    pub slide_id: Option<String>,
}

impl Slide {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            slide_id: None,
        }
    }

    pub fn with_id(html: impl Into<String>, slide_id: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            slide_id: Some(slide_id.into()),
        }
    }

    /// IDs of every `<canvas id=...>` in this slide, in document order.
    ///
    /// Repeats are kept so callers can detect duplicates.
    pub fn canvas_ids(&self) -> Vec<String> {
        canvas_ids_in(&self.html)
    }
}

/// Canvas IDs declared anywhere in a markup fragment, in document order.
pub fn canvas_ids_in(html: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(html);
    fragment
        .select(&CANVAS_WITH_ID)
        .filter_map(|el| el.value().attr("id"))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_ids_keep_document_order_and_repeats() {
        let slide = Slide::new(
            r#"<div class="slide"><canvas id="b"></canvas><canvas id="a"></canvas><canvas id="b"></canvas><canvas></canvas></div>"#,
        );
        assert_eq!(slide.canvas_ids(), vec!["b", "a", "b"]);
    }

    #[test]
    fn clone_is_independent() {
        let original = Slide::with_id("<div class=\"slide\">A</div>", "s1");
        let mut copy = original.clone();
        copy.html.push_str("<p>changed</p>");
        copy.slide_id = Some("s2".into());

        assert_eq!(original.html, "<div class=\"slide\">A</div>");
        assert_eq!(original.slide_id.as_deref(), Some("s1"));
    }
}
