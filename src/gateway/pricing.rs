//! Chat model pricing used to attribute generation cost to a deck run.
//!
//! Costs are in nanodollars (1e-9 USD) per token.

use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_nanos_per_token: i64,
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        (input_tokens as i64) * self.input_nanos_per_token
            + (output_tokens as i64) * self.output_nanos_per_token
    }
}

// Deck generation is output-heavy (a full HTML document per call), so the
// table only carries models with large output windows.
// Claude Sonnet 4.5: $3.00/1M input, $15.00/1M output
const CLAUDE_SONNET_4_5: ModelPricing = ModelPricing::new(3_000, 15_000);
// Claude Haiku 4.5: $1.00/1M input, $5.00/1M output
const CLAUDE_HAIKU_4_5: ModelPricing = ModelPricing::new(1_000, 5_000);
// GPT-5 mini: $0.25/1M input, $2.00/1M output
const GPT_5_MINI: ModelPricing = ModelPricing::new(250, 2_000);
// GPT-4.1: $2.00/1M input, $8.00/1M output
const GPT_4_1: ModelPricing = ModelPricing::new(2_000, 8_000);
// Gemini 2.5 Flash: $0.30/1M input, $2.50/1M output
const GEMINI_2_5_FLASH: ModelPricing = ModelPricing::new(300, 2_500);

const UNKNOWN_MODEL: ModelPricing = ModelPricing::new(1_000, 5_000);

static PRICING_MAP: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();

fn init_pricing() -> HashMap<&'static str, ModelPricing> {
    HashMap::from([
        ("anthropic/claude-sonnet-4.5", CLAUDE_SONNET_4_5),
        ("anthropic/claude-haiku-4.5", CLAUDE_HAIKU_4_5),
        ("openai/gpt-5-mini", GPT_5_MINI),
        ("openai/gpt-4.1", GPT_4_1),
        ("google/gemini-2.5-flash", GEMINI_2_5_FLASH),
    ])
}

pub fn get_pricing(model_id: &str) -> Option<ModelPricing> {
    PRICING_MAP.get_or_init(init_pricing).get(model_id).copied()
}

/// Cost of one chat call; unknown models are billed at a mid-range rate.
pub fn chat_cost(model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    get_pricing(model)
        .unwrap_or(UNKNOWN_MODEL)
        .calculate_cost(input_tokens, output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_cost() {
        // 2K input * 3_000 + 10K output * 15_000 = 156,000,000 nanos
        let cost = chat_cost("anthropic/claude-sonnet-4.5", 2_000, 10_000);
        assert_eq!(cost, 156_000_000);
    }

    #[test]
    fn unknown_model_uses_fallback_rate() {
        assert_eq!(chat_cost("someone/new-model", 1_000, 1_000), 6_000_000);
    }
}
