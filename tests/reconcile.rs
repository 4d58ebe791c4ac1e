use deck_harness::{reconcile, ReconciliationError, Slide, SlideDeck};

fn slides(n: usize, canvas_prefix: &str) -> String {
    (0..n)
        .map(|i| {
            format!(
                "<div class=\"slide\"><h2>New {i}</h2><canvas id=\"{canvas_prefix}{i}\"></canvas></div>"
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn deck_of(n: usize) -> SlideDeck {
    let mut deck = SlideDeck {
        css: ".slide{}".into(),
        scripts: "initDeck();".into(),
        ..Default::default()
    };
    for i in 0..n {
        deck.append(Slide::with_id(
            format!("<div class=\"slide\" id=\"s{i}\"><canvas id=\"chart{i}\"></canvas></div>"),
            format!("s{i}"),
        ));
    }
    deck
}

#[test]
fn net_change_tracks_slide_count_difference() {
    let same = reconcile(&slides(2, "a"), &[1, 2]).unwrap();
    assert_eq!(same.net_change, 0);

    let grow = reconcile(&slides(3, "b"), &[0, 1]).unwrap();
    assert_eq!(grow.net_change, 1);
    assert_eq!(grow.replacement_slides.len(), 3);

    let shrink = reconcile(&slides(1, "c"), &[2, 3, 4]).unwrap();
    assert_eq!(shrink.net_change, -2);
}

#[test]
fn marked_scripts_and_css_are_collected() {
    let response = format!(
        "<style>.kpi {{ color: green; }}</style>\n{}\n<script>console.log('stray')</script>\n<script data-slide-scripts>new Chart('n0');</script>",
        slides(1, "n")
    );
    let patch = reconcile(&response, &[4]).unwrap();

    assert_eq!(patch.replacement_css, ".kpi { color: green; }");
    assert_eq!(patch.replacement_scripts, "new Chart('n0');");
    assert!(patch.canvas_ids.contains("n0"));
    assert_eq!(patch.original_indices, vec![4]);
}

#[test]
fn unmarked_scripts_are_used_when_no_marked_block_exists() {
    let response = format!("{}\n<script>new Chart('u0');</script>", slides(1, "u"));
    let patch = reconcile(&response, &[0]).unwrap();
    assert_eq!(patch.replacement_scripts, "new Chart('u0');");
}

#[test]
fn duplicate_canvas_ids_are_rejected() {
    let response = "<div class=\"slide\"><canvas id=\"chartX\"></canvas></div>\n\
                    <div class=\"slide\"><canvas id=\"chartX\"></canvas></div>";
    assert_eq!(
        reconcile(response, &[0, 1]).unwrap_err(),
        ReconciliationError::DuplicateCanvasId("chartX".into())
    );
}

#[test]
fn structural_errors_are_reported() {
    assert_eq!(
        reconcile(&slides(1, "a"), &[]).unwrap_err(),
        ReconciliationError::EmptyIndices
    );
    assert_eq!(
        reconcile(&slides(1, "a"), &[1, 3]).unwrap_err(),
        ReconciliationError::NonContiguous {
            indices: vec![1, 3]
        }
    );
    assert_eq!(
        reconcile("<p>I rewrote the slide for you.</p>", &[0]).unwrap_err(),
        ReconciliationError::NoSlides
    );
    assert!(matches!(
        reconcile("   ", &[0]),
        Err(ReconciliationError::Parse(_))
    ));
}

#[test]
fn collisions_with_untouched_slides_are_rejected() {
    let deck = deck_of(4);
    // chart3 belongs to slide 3, which is outside the edited range.
    let patch = reconcile(
        "<div class=\"slide\"><canvas id=\"chart3\"></canvas></div>",
        &[1, 2],
    )
    .unwrap();
    assert_eq!(
        patch.check_collisions(&deck).unwrap_err(),
        ReconciliationError::CanvasCollision(vec!["chart3".into()])
    );

    // Reusing an ID from a slide being replaced is fine.
    let patch = reconcile(
        "<div class=\"slide\"><canvas id=\"chart1\"></canvas></div>",
        &[1, 2],
    )
    .unwrap();
    assert!(patch.check_collisions(&deck).is_ok());
}

#[test]
fn apply_splices_and_appends_shared_content() {
    let mut deck = deck_of(5);
    let response = format!(
        "<style>.new{{}}</style>\n{}\n<script data-slide-scripts>draw('r0');</script>",
        slides(1, "r")
    );
    let patch = reconcile(&response, &[2, 3, 4]).unwrap();
    patch.apply(&mut deck).unwrap();

    assert_eq!(deck.len(), 3);
    assert_eq!(deck.slides[0].slide_id.as_deref(), Some("s0"));
    assert_eq!(deck.slides[1].slide_id.as_deref(), Some("s1"));
    assert!(deck.slides[2].html.contains("New 0"));
    assert!(deck.slides[2].slide_id.is_some());
    assert_eq!(deck.css, ".slide{}\n.new{}");
    assert_eq!(deck.scripts, "initDeck();\ndraw('r0');");
}

#[test]
fn apply_leaves_deck_untouched_on_error() {
    let mut deck = deck_of(2);
    let before = deck.clone();

    let patch = reconcile(&slides(1, "z"), &[1, 2]).unwrap();
    assert_eq!(
        patch.apply(&mut deck).unwrap_err(),
        ReconciliationError::IndexOutOfRange { index: 2, len: 2 }
    );
    assert_eq!(deck, before);
}

#[test]
fn reconcile_is_deterministic() {
    let response = format!(
        "{}\n<script data-slide-scripts>go();</script>",
        slides(2, "d")
    );
    assert_eq!(
        reconcile(&response, &[3, 4]).unwrap(),
        reconcile(&response, &[3, 4]).unwrap()
    );
}

fn chart_deck() -> SlideDeck {
    let mut deck = deck_of(3);
    deck.scripts = "initDeck();\n\
                    new Chart(document.getElementById('chart0'), {});\n\
                    new Chart(document.getElementById('chart1'), {});\n\
                    new Chart(document.getElementById('chart2'), {});"
        .into();
    deck
}

fn init_count(deck: &SlideDeck, canvas_id: &str) -> usize {
    deck.scripts
        .matches(&format!("getElementById('{canvas_id}')"))
        .count()
}

fn assert_each_canvas_initialized_once(deck: &SlideDeck) {
    for id in deck.canvas_ids() {
        assert_eq!(init_count(deck, &id), 1, "canvas {id} in:\n{}", deck.scripts);
    }
}

#[test]
fn apply_replaces_chart_code_of_a_reused_canvas() {
    let mut deck = chart_deck();
    let response = "<div class=\"slide\"><canvas id=\"chart1\"></canvas></div>\n\
                    <script data-slide-scripts>new Chart(document.getElementById('chart1'), { type: 'pie' });</script>";
    let patch = reconcile(response, &[1]).unwrap();
    patch.apply(&mut deck).unwrap();

    assert_each_canvas_initialized_once(&deck);
    assert!(deck.scripts.contains("{ type: 'pie' }"));
    assert!(deck.scripts.starts_with("initDeck();"));
}

#[test]
fn apply_drops_chart_code_of_a_removed_canvas() {
    let mut deck = chart_deck();
    let patch = reconcile("<div class=\"slide\"><h2>Notes</h2></div>", &[2]).unwrap();
    patch.apply(&mut deck).unwrap();

    assert_eq!(deck.canvas_ids(), vec!["chart0".to_string(), "chart1".to_string()]);
    assert_eq!(init_count(&deck, "chart2"), 0);
    assert_each_canvas_initialized_once(&deck);
}

#[test]
fn apply_keeps_chart_code_of_a_canvas_the_replacement_does_not_redraw() {
    let mut deck = chart_deck();
    let patch = reconcile(
        "<div class=\"slide\"><h2>Renamed</h2><canvas id=\"chart0\"></canvas></div>",
        &[0],
    )
    .unwrap();
    patch.apply(&mut deck).unwrap();

    assert!(deck.slides[0].html.contains("Renamed"));
    assert_each_canvas_initialized_once(&deck);
}

#[test]
fn apply_does_not_duplicate_css_across_repeated_edits() {
    let mut deck = chart_deck();
    let response = "<style>.kpi { color: green; }</style>\n<div class=\"slide\"><h2>KPI</h2></div>";
    for _ in 0..2 {
        reconcile(response, &[1]).unwrap().apply(&mut deck).unwrap();
    }
    assert_eq!(deck.css, ".slide{}\n.kpi { color: green; }");
}

#[test]
fn index_runs_ending_at_usize_max_are_errors() {
    assert!(matches!(
        reconcile(&slides(1, "m"), &[usize::MAX]),
        Err(ReconciliationError::IndexOutOfRange { .. })
    ));
}
