//! Request cost from token counts.

use rust_decimal::Decimal;

use super::TokenUsage;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPrice {
    pub input: Decimal,
    pub output: Decimal,
}

const fn price(input_cents: i64, output_cents: i64) -> ModelPrice {
    ModelPrice {
        input: Decimal::from_parts(input_cents as u32, 0, 0, false, 2),
        output: Decimal::from_parts(output_cents as u32, 0, 0, false, 2),
    }
}

/// Matched by prefix, first hit wins, so more specific names come first.
const PRICES: &[(&str, ModelPrice)] = &[
    ("claude-opus-4", price(1500, 7500)),
    ("claude-sonnet-4", price(300, 1500)),
    ("claude-3-7-sonnet", price(300, 1500)),
    ("claude-3-5-sonnet", price(300, 1500)),
    ("claude-haiku-4", price(100, 500)),
    ("claude-3-5-haiku", price(80, 400)),
    ("gpt-5-mini", price(25, 200)),
    ("gpt-5", price(125, 1000)),
    ("gpt-4.1-mini", price(40, 160)),
    ("gpt-4.1", price(200, 800)),
    ("gpt-4o-mini", price(15, 60)),
    ("gpt-4o", price(250, 1000)),
    ("gemini-2.5-pro", price(125, 1000)),
    ("gemini-2.5-flash", price(30, 250)),
];

pub fn price_for(model: &str) -> Option<ModelPrice> {
    let normalized = model.trim().to_ascii_lowercase();
    // "anthropic/claude-sonnet-4" -> "claude-sonnet-4"
    let name = normalized.rsplit('/').next().unwrap_or(&normalized);
    PRICES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, p)| *p)
}

/// Unknown models cost zero.
pub fn calculate_cost(model: &str, usage: TokenUsage) -> Decimal {
    let Some(p) = price_for(model) else {
        return Decimal::ZERO;
    };
    let million = Decimal::from(1_000_000u32);
    (Decimal::from(usage.input_tokens) * p.input + Decimal::from(usage.output_tokens) * p.output)
        / million
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn sonnet_cost() {
        let cost = calculate_cost(
            "claude-sonnet-4-20250514",
            TokenUsage { input_tokens: 1_000_000, output_tokens: 100_000 },
        );
        assert_eq!(cost, Decimal::from_str("4.5").unwrap());
    }

    #[test]
    fn specific_prefix_wins() {
        assert_eq!(price_for("gpt-4o-mini-2024").unwrap(), price(15, 60));
        assert_eq!(price_for("openai/gpt-4o").unwrap(), price(250, 1000));
    }

    #[test]
    fn unknown_model_is_free() {
        assert_eq!(
            calculate_cost("my-local-llama", TokenUsage { input_tokens: 5, output_tokens: 5 }),
            Decimal::ZERO
        );
    }
}
