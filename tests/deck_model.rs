use deck_harness::{DeckError, Slide, SlideDeck};

const DECK: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="author" content="Finance">
<title>Q3 Review</title>
<script src="https://cdn.jsdelivr.net/npm/chart.js"></script>
<style>.slide { padding: 2rem; }</style>
</head>
<body>
<div class="slide" id="intro"><h1>Q3 Review</h1></div>
<div class="slide"><h2>Revenue</h2><canvas id="revenueChart"></canvas></div>
<section class="slide" id="regions"><h2>Regions</h2><canvas id="regionChart"></canvas></section>
<script>
new Chart(document.getElementById('revenueChart'), {type: 'line'});
new Chart(document.getElementById('regionChart'), {type: 'bar'});
</script>
</body>
</html>"#;

#[test]
fn parse_extracts_slides_and_shared_content() {
    let deck = SlideDeck::parse(DECK).unwrap();

    assert_eq!(deck.title.as_deref(), Some("Q3 Review"));
    assert_eq!(deck.len(), 3);
    assert_eq!(deck.css, ".slide { padding: 2rem; }");
    assert!(deck.scripts.contains("revenueChart"));
    assert_eq!(
        deck.external_scripts,
        vec!["https://cdn.jsdelivr.net/npm/chart.js"]
    );
    assert_eq!(deck.head_meta.get("author").map(String::as_str), Some("Finance"));

    let ids: Vec<Option<&str>> = deck.slides.iter().map(|s| s.slide_id.as_deref()).collect();
    assert_eq!(ids, vec![Some("intro"), Some("slide_1"), Some("regions")]);
    assert_eq!(deck.canvas_ids(), vec!["revenueChart", "regionChart"]);
}

#[test]
fn knit_then_parse_preserves_slides_and_content() {
    let deck = SlideDeck::parse(DECK).unwrap();
    let knitted = deck.knit();
    let reparsed = SlideDeck::parse(&knitted).unwrap();

    assert_eq!(reparsed.slides, deck.slides);
    assert_eq!(reparsed.css, deck.css);
    assert_eq!(reparsed.scripts, deck.scripts);
    assert_eq!(reparsed.title, deck.title);
    assert_eq!(reparsed.external_scripts, deck.external_scripts);

    // Once normalized, knitting is a fixed point.
    assert_eq!(reparsed.knit(), knitted);
}

#[test]
fn document_without_slides_parses_to_empty_deck() {
    let deck = SlideDeck::parse("<html><body><p>Nothing here</p></body></html>").unwrap();
    assert!(deck.is_empty());
    assert!(deck.knit().contains("<body>"));
}

#[test]
fn blank_document_is_a_parse_error() {
    assert!(matches!(SlideDeck::parse("  "), Err(DeckError::Parse(_))));
}

#[test]
fn render_slide_keeps_shared_head_and_scripts() {
    let deck = SlideDeck::parse(DECK).unwrap();
    let single = deck.render_slide(1).unwrap();

    assert!(single.contains("<h2>Revenue</h2>"));
    assert!(!single.contains("<h2>Regions</h2>"));
    assert!(single.contains(".slide { padding: 2rem; }"));
    assert!(single.contains("revenueChart"));
    assert!(single.contains("<script src=\"https://cdn.jsdelivr.net/npm/chart.js\"></script>"));

    assert_eq!(
        deck.render_slide(3).unwrap_err(),
        DeckError::IndexOutOfRange { index: 3, len: 3 }
    );
}

#[test]
fn view_lists_slides_in_order() {
    let deck = SlideDeck::parse(DECK).unwrap();
    let view = deck.view();
    assert_eq!(view.slide_count, 3);
    assert_eq!(view.slides[2].index, 2);
    assert_eq!(view.slides[2].slide_id.as_deref(), Some("regions"));

    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["slides"][0]["slide_id"], "intro");
}

#[test]
fn mutations_reorder_and_bounds_check() {
    let mut deck = SlideDeck::parse(DECK).unwrap();

    deck.move_slide(0, 2).unwrap();
    let ids: Vec<&str> = deck
        .slides
        .iter()
        .filter_map(|s| s.slide_id.as_deref())
        .collect();
    assert_eq!(ids, vec!["slide_1", "regions", "intro"]);

    deck.swap(0, 1).unwrap();
    assert_eq!(deck.slides[0].slide_id.as_deref(), Some("regions"));

    deck.insert(99, Slide::with_id("<div class=\"slide\">End</div>", "end"));
    assert_eq!(deck.slides[3].slide_id.as_deref(), Some("end"));

    let removed = deck.remove(3).unwrap();
    assert_eq!(removed.slide_id.as_deref(), Some("end"));
    assert!(matches!(
        deck.remove(3),
        Err(DeckError::IndexOutOfRange { index: 3, len: 3 })
    ));
    assert!(deck.swap(0, 5).is_err());
    assert_eq!(deck.len(), 3);
}

#[test]
fn cloned_decks_are_independent() {
    let original = SlideDeck::parse(DECK).unwrap();
    let mut copy = original.clone();

    copy.get_mut(0).unwrap().html = "<div class=\"slide\">changed</div>".into();
    copy.css.push_str("\nh1 { color: red; }");
    copy.remove(2).unwrap();

    assert_eq!(original.len(), 3);
    assert!(original.slides[0].html.contains("Q3 Review"));
    assert!(!original.css.contains("color: red"));
}

#[test]
fn canvas_ids_outside_skips_the_range() {
    let deck = SlideDeck::parse(DECK).unwrap();
    let outside = deck.canvas_ids_outside(1..2);
    assert!(outside.contains("regionChart"));
    assert!(!outside.contains("revenueChart"));
}

#[test]
fn assign_missing_ids_avoids_taken_ids() {
    let mut deck = SlideDeck::default();
    deck.append(Slide::with_id("<div class=\"slide\">a</div>", "slide_1"));
    deck.append(Slide::new("<div class=\"slide\">b</div>"));
    deck.assign_missing_ids();

    let second = deck.slides[1].slide_id.clone().unwrap();
    assert_ne!(second, "slide_1");
    assert!(second.starts_with("slide_"));
}
