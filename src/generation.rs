//! Single text-generation call producing deck markup.
//!
//! New-deck mode expects a full HTML document. Edit mode accepts either a
//! full document or a bare fragment and normalizes to a fragment whose
//! chart-init scripts carry the slide-scripts marker.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::deck::parse::{all_inline_script_text, parse_markup};
use crate::deck::{canvas_ids_in, SLIDE_SCRIPTS_MARKER};
use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, ProviderError};
use crate::llm_output::strip_code_fence;
use crate::prompts::{edit_prompt, new_deck_prompt, EditContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_edit_max_tokens")]
    pub edit_max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.4
}
fn default_max_tokens() -> u32 {
    16_000
}
fn default_edit_max_tokens() -> u32 {
    8_000
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            edit_max_tokens: default_edit_max_tokens(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum GenerationMode {
    NewDeck {
        max_slides: usize,
    },
    Edit {
        slide_htmls: Vec<String>,
        context: EditContext,
        /// Error from a rejected previous attempt, fed back to the model.
        feedback: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct GenerationInput<'a> {
    pub request: &'a str,
    /// Rendered summarized results, one section per query.
    pub data_sections: Vec<String>,
    pub mode: GenerationMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedHtml {
    pub html: String,
    pub template_slug: String,
    /// Canvas IDs no script mentions.
    pub unreferenced_canvases: Vec<String>,
    pub truncated: bool,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_nanodollars: i64,
    pub latency_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] ProviderError),
    #[error("unusable generation output: {0}")]
    Unusable(String),
}

pub async fn generate_html(
    gateway: &dyn ChatGateway,
    model: &str,
    config: &GenerationConfig,
    input: GenerationInput<'_>,
) -> Result<GeneratedHtml, GenerationError> {
    let (prompt, max_tokens, caller) = match &input.mode {
        GenerationMode::NewDeck { max_slides } => (
            new_deck_prompt(input.request, &input.data_sections, *max_slides),
            config.max_tokens,
            "deck::generate_new",
        ),
        GenerationMode::Edit {
            slide_htmls,
            context,
            feedback,
        } => (
            edit_prompt(
                input.request,
                slide_htmls,
                context,
                &input.data_sections,
                feedback.as_deref(),
            ),
            config.edit_max_tokens,
            "deck::generate_edit",
        ),
    };

    let req = ChatRequest::new(
        ChatModel::openrouter(model),
        prompt.to_messages(),
        Attribution::new(caller),
    )
    .temperature(config.temperature)
    .max_tokens(max_tokens);

    let started = Instant::now();
    let resp = gateway.chat(req).await?;
    let truncated = resp.was_truncated();
    if truncated {
        tracing::warn!(
            template = %prompt.template_slug,
            output_tokens = resp.output_tokens,
            "generation hit the token limit; markup may be incomplete"
        );
    }

    let markup = strip_code_fence(&resp.content);
    if markup.is_empty() {
        return Err(GenerationError::Unusable("empty response".to_string()));
    }
    if !markup.contains('<') {
        return Err(GenerationError::Unusable(
            "response contains no markup".to_string(),
        ));
    }

    let html = match &input.mode {
        GenerationMode::NewDeck { .. } => {
            let parsed =
                parse_markup(markup).map_err(|e| GenerationError::Unusable(e.to_string()))?;
            if parsed.slides.is_empty() {
                return Err(GenerationError::Unusable(
                    "response contains no slide containers".to_string(),
                ));
            }
            markup.to_string()
        }
        GenerationMode::Edit { .. } => normalize_edit_markup(markup)?,
    };

    let unreferenced_canvases = unreferenced_canvas_ids(&html);
    for canvas_id in &unreferenced_canvases {
        tracing::warn!(canvas_id = %canvas_id, "canvas has no initializing script");
    }

    tracing::info!(
        template = %prompt.template_slug,
        chars = html.len(),
        input_tokens = resp.input_tokens,
        output_tokens = resp.output_tokens,
        "generated deck markup"
    );

    Ok(GeneratedHtml {
        html,
        template_slug: prompt.template_slug,
        unreferenced_canvases,
        truncated,
        input_tokens: resp.input_tokens,
        output_tokens: resp.output_tokens,
        cost_nanodollars: resp.cost_nanodollars,
        latency_ms: started.elapsed().as_millis() as u64,
    })
}

/// Canvas IDs that do not appear in any inline script, in document order.
pub fn unreferenced_canvas_ids(html: &str) -> Vec<String> {
    let scripts = all_inline_script_text(html);
    let mut missing: Vec<String> = Vec::new();
    for id in canvas_ids_in(html) {
        let referenced = scripts.iter().any(|s| s.contains(id.as_str()));
        if !referenced && !missing.contains(&id) {
            missing.push(id);
        }
    }
    missing
}

fn is_full_document(markup: &str) -> bool {
    let head: String = markup.chars().take(512).collect::<String>().to_ascii_lowercase();
    head.contains("<!doctype") || head.contains("<html") || head.contains("<body")
}

/// Reduce edit output to `<style>` + slides + marked script.
///
/// Bare fragments pass through untouched; a full document is cut down to its
/// slides, with every inline script outside them treated as slide-scripts.
pub fn normalize_edit_markup(markup: &str) -> Result<String, GenerationError> {
    if !is_full_document(markup) {
        return Ok(markup.to_string());
    }

    let parsed = parse_markup(markup).map_err(|e| GenerationError::Unusable(e.to_string()))?;
    if parsed.slides.is_empty() {
        return Err(GenerationError::Unusable(
            "edit response contains no slide containers".to_string(),
        ));
    }

    let mut out = String::new();
    let css = parsed.joined_css();
    if !css.is_empty() {
        out.push_str(&format!("<style>\n{css}\n</style>\n"));
    }
    let slides: Vec<&str> = parsed.slides.iter().map(|s| s.html.trim()).collect();
    out.push_str(&slides.join("\n\n"));
    out.push('\n');

    let scripts = parsed.joined_scripts(|_| true);
    if !scripts.is_empty() {
        out.push_str(&format!(
            "<script {SLIDE_SCRIPTS_MARKER}>\n{scripts}\n</script>\n"
        ));
    }
    Ok(out)
}
