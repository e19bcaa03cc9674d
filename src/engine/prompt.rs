//! Prompt construction.
//!
//! Renders a realtime quote into the instruction sent to each predictor,
//! including the JSON answer contract for the configured horizons. A short
//! model-specific addendum is appended when the predictor name matches a
//! known family.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::debug;

use crate::types::{Horizon, Market, RealtimeQuote};

/// Addenda keyed by lower-case predictor name prefix.
const MODEL_ADDENDA: &[(&str, &str)] = &[
    ("gpt", "Return only the JSON object, with no extra commentary."),
    ("gemini", "Ground each reason in the figures above and keep the analysis objective."),
    ("claude", "Give a balanced view and weigh downside risks alongside upside."),
    ("gemma", "Keep reasons short and follow the JSON format exactly."),
    ("qwen", "Focus on market trend and momentum. Answer in JSON."),
];

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    horizons: Vec<Horizon>,
}

impl PromptBuilder {
    pub fn new(horizons: Vec<Horizon>) -> Self {
        Self { horizons }
    }

    /// Prompt for a single predictor.
    pub fn build(
        &self,
        symbol: &str,
        market: Market,
        quote: &RealtimeQuote,
        predictor_name: &str,
    ) -> String {
        let mut prompt = String::new();

        // Writing to a String cannot fail.
        let _ = writeln!(prompt, "Instrument: {symbol} ({market})");
        let _ = writeln!(prompt, "- Current price: {:.2}", quote.current_price);
        let _ = writeln!(prompt, "- Previous close: {:.2}", quote.previous_close);
        let _ = writeln!(prompt, "- Change rate: {:+.2}%", quote.change_rate);
        let _ = writeln!(prompt, "- Trading volume: {}", quote.trading_volume);
        let _ = writeln!(prompt, "- Trading value: {:.0}", quote.trading_value);
        let _ = writeln!(prompt, "- Market cap: {:.0}", quote.market_cap);

        if quote.synthetic {
            prompt.push_str(
                "\nNOTE: live market data was unavailable. The figures above are \
                 PLACEHOLDER values, not real quotes. Say so in every reason.\n",
            );
        }

        let _ = writeln!(
            prompt,
            "\nPredict the price at each of these horizons: {}.",
            self.horizons.join(", ")
        );
        prompt.push_str("Respond with a JSON object in exactly this shape:\n");
        prompt.push_str(&self.answer_contract());

        if let Some(addendum) = addendum_for(predictor_name) {
            prompt.push_str("\n\n");
            prompt.push_str(addendum);
        }

        prompt
    }

    /// One prompt per predictor name, keyed by that name.
    pub fn build_all(
        &self,
        symbol: &str,
        market: Market,
        quote: &RealtimeQuote,
        predictor_names: &[String],
    ) -> BTreeMap<String, String> {
        let prompts: BTreeMap<String, String> = predictor_names
            .iter()
            .map(|name| (name.clone(), self.build(symbol, market, quote, name)))
            .collect();
        debug!(symbol, count = prompts.len(), synthetic = quote.synthetic, "Prompts built");
        prompts
    }

    fn answer_contract(&self) -> String {
        let entries: Vec<String> = self
            .horizons
            .iter()
            .map(|h| {
                format!(
                    "  \"{h}\": {{\"price\": <number>, \"reason\": \"<text>\", \
                     \"sentiment\": \"positive|negative|neutral\"}}"
                )
            })
            .collect();
        format!("{{\n{}\n}}", entries.join(",\n"))
    }
}

fn addendum_for(predictor_name: &str) -> Option<&'static str> {
    let lower = predictor_name.to_lowercase();
    MODEL_ADDENDA
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map(|(_, text)| *text)
}
