//! Prompt templates for query planning, new-deck generation and slide edits.
//!
//! Domain logic only. Provider-agnostic.

use crate::gateway::Message;

// =============================================================================
// Rendered prompt
// =============================================================================

/// Rendered prompt ready for LLM.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: String,
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }
}

/// Escape XML special characters to prevent prompt injection via tag breaking.
fn escape_xml_chars(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// =============================================================================
// Query planning
// =============================================================================

/// Description of the data the query service can answer questions about.
pub const DEFAULT_DATA_DOMAIN: &str = "\
The data service answers natural-language questions over a business analytics \
warehouse: sales and revenue by product, region, channel and customer segment; \
orders and units over time (daily, weekly, monthly, yearly); marketing spend and \
campaign performance; headcount and operating costs. Each question returns a \
table of rows. Ask one focused question per query; the service handles \
filtering, grouping and date bucketing itself.";

const PLANNER_SYSTEM_PROMPT: &str = "\
You plan data queries for a slide deck. Given a user's request, write the \
natural-language questions that should be sent to the data service so the \
deck can be built from real numbers.

Rules:
- Write between 1 and {max_queries} queries. Fewer, sharper queries beat many vague ones.
- Each query must be a single self-contained question in plain English.
- Prefer queries that return trends over time or rankings by category; they chart well.
- Never write SQL.

Data available:
{data_domain}

Respond with JSON only:
{
  \"queries\": [\"question 1\", \"question 2\"],
  \"rationale\": \"One or two sentences on why these queries cover the request\"
}";

pub fn planner_prompt(request: &str, max_queries: usize, data_domain: &str) -> PromptInstance {
    let system = PLANNER_SYSTEM_PROMPT
        .replace("{max_queries}", &max_queries.to_string())
        .replace("{data_domain}", data_domain);
    let user = format!(
        "<request>\n{}\n</request>",
        escape_xml_chars(request.trim())
    );
    PromptInstance {
        template_slug: "planner_v1".to_string(),
        system,
        user,
    }
}

// =============================================================================
// Deck generation
// =============================================================================

const DECK_RULES: &str = "\
Markup rules:
- Every slide is a top-level <div class=\"slide\"> with a unique id attribute.
- Charts use Chart.js: <canvas id=\"...\"> inside the slide plus a script that calls \
  new Chart(document.getElementById('<same id>'), ...).
- Canvas ids must be unique across the deck and every canvas must be initialized by a script.
- Use only the numbers present in the data sections. If a query has no data, say so \
  on the slide instead of inventing figures.
- Keep text short: a headline, at most four bullets or one chart per slide.";

const NEW_DECK_SYSTEM_PROMPT: &str = "\
You are an expert presentation designer who builds HTML slide decks from data.

Produce one complete HTML document: <!DOCTYPE html>, a <head> with <title>, one \
<style> block, the Chart.js CDN script \
(https://cdn.jsdelivr.net/npm/chart.js), then the slides in <body> and a single \
<script> block at the end that initializes every chart.

{rules}

Return only the HTML document, no commentary.";

pub fn new_deck_prompt(request: &str, data_sections: &[String], max_slides: usize) -> PromptInstance {
    let system = NEW_DECK_SYSTEM_PROMPT.replace("{rules}", DECK_RULES);
    let mut user = format!(
        "<request>\n{}\n</request>\n\nCreate at most {max_slides} slides.\n\n<data>\n",
        escape_xml_chars(request.trim())
    );
    push_data_sections(&mut user, data_sections);
    user.push_str("</data>");

    PromptInstance {
        template_slug: "new_deck_v1".to_string(),
        system,
        user,
    }
}

const EDIT_SYSTEM_PROMPT: &str = "\
You are an expert presentation designer editing slides of an existing HTML deck.

You receive the slides selected for editing and an edit request. Return ONLY the \
replacement slides: one <div class=\"slide\"> per slide, in order. You may return \
more or fewer slides than you were given. Put any new CSS in one <style> block and \
every chart-initialization script for the returned slides in \
<script data-slide-scripts>...</script>. Do not return <html>, <head> or <body>.

{rules}
- Canvas ids in your slides must not repeat, and must not be any id listed in <reserved_canvas_ids>.
- <current_chart_scripts> holds the deck code that draws the selected slides' charts. \
  Reuse its data when a chart stays; redraw every chart you return in your own script.

Return only the markup, no commentary.";

/// What the rest of the deck contributes to an edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditContext {
    /// Deck-script statements that draw the selected slides' charts.
    pub chart_scripts: Vec<String>,
    /// Canvas ids of the slides that are not being edited.
    pub reserved_canvas_ids: Vec<String>,
}

pub fn edit_prompt(
    request: &str,
    slide_htmls: &[String],
    context: &EditContext,
    data_sections: &[String],
    feedback: Option<&str>,
) -> PromptInstance {
    let system = EDIT_SYSTEM_PROMPT.replace("{rules}", DECK_RULES);
    let mut user = format!(
        "<request>\n{}\n</request>\n\n<selected_slides count=\"{}\">\n",
        escape_xml_chars(request.trim()),
        slide_htmls.len()
    );
    for (i, html) in slide_htmls.iter().enumerate() {
        user.push_str(&format!("<!-- selected slide {} -->\n{}\n", i + 1, html.trim()));
    }
    user.push_str("</selected_slides>");

    if !context.chart_scripts.is_empty() {
        user.push_str("\n\n<current_chart_scripts>\n");
        for statement in &context.chart_scripts {
            user.push_str(statement.trim());
            user.push('\n');
        }
        user.push_str("</current_chart_scripts>");
    }

    if !context.reserved_canvas_ids.is_empty() {
        user.push_str(&format!(
            "\n\n<reserved_canvas_ids>\n{}\n</reserved_canvas_ids>",
            escape_xml_chars(&context.reserved_canvas_ids.join(", "))
        ));
    }

    if !data_sections.is_empty() {
        user.push_str("\n\n<data>\n");
        push_data_sections(&mut user, data_sections);
        user.push_str("</data>");
    }

    if let Some(feedback) = feedback {
        user.push_str(&format!(
            "\n\n<previous_attempt_error>\n{}\n</previous_attempt_error>\n\
             Fix this problem in your new answer.",
            escape_xml_chars(feedback)
        ));
    }

    PromptInstance {
        template_slug: "edit_slides_v1".to_string(),
        system,
        user,
    }
}

fn push_data_sections(out: &mut String, sections: &[String]) {
    if sections.is_empty() {
        out.push_str("No data was retrieved for this request.\n");
        return;
    }
    for section in sections {
        out.push_str(section.trim_end());
        out.push_str("\n\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planner_prompt_fills_placeholders_and_escapes_request() {
        let prompt = planner_prompt("Revenue <by> region", 4, "sales data");
        assert!(prompt.system.contains("between 1 and 4 queries"));
        assert!(prompt.system.contains("sales data"));
        assert!(!prompt.system.contains("{data_domain}"));
        assert!(prompt.user.contains("Revenue &lt;by&gt; region"));
    }

    #[test]
    fn new_deck_prompt_mentions_slide_cap_and_data() {
        let prompt = new_deck_prompt("Q3 review", &["### Query: a\nrows".to_string()], 5);
        assert!(prompt.user.contains("at most 5 slides"));
        assert!(prompt.user.contains("### Query: a"));
        assert!(!prompt.system.contains("{rules}"));
    }

    #[test]
    fn edit_prompt_includes_slides_and_feedback() {
        let slides = vec!["<div class=\"slide\">A</div>".to_string()];
        let prompt = edit_prompt(
            "make it blue",
            &slides,
            &EditContext::default(),
            &[],
            Some("duplicate canvas id"),
        );
        assert!(prompt.user.contains("<div class=\"slide\">A</div>"));
        assert!(prompt.user.contains("count=\"1\""));
        assert!(prompt.user.contains("duplicate canvas id"));
        assert!(!prompt.user.contains("<data>"));
        assert!(!prompt.user.contains("<current_chart_scripts>"));
        assert!(!prompt.user.contains("<reserved_canvas_ids>"));
        assert_eq!(prompt.to_messages().len(), 2);
    }

    #[test]
    fn edit_prompt_renders_chart_code_and_reserved_ids() {
        let slides = vec!["<div class=\"slide\"><canvas id=\"a\"></canvas></div>".to_string()];
        let context = EditContext {
            chart_scripts: vec![
                "const sales = [4, 5];".to_string(),
                "new Chart(document.getElementById('a'), { data: sales });".to_string(),
            ],
            reserved_canvas_ids: vec!["b".to_string(), "c".to_string()],
        };
        let prompt = edit_prompt("make it blue", &slides, &context, &[], None);
        assert!(prompt.user.contains(
            "<current_chart_scripts>\nconst sales = [4, 5];\n\
             new Chart(document.getElementById('a'), { data: sales });\n</current_chart_scripts>"
        ));
        assert!(prompt
            .user
            .contains("<reserved_canvas_ids>\nb, c\n</reserved_canvas_ids>"));
        assert!(prompt.system.contains("<reserved_canvas_ids>"));
    }
}
