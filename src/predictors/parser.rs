//! Turns raw predictor text into structured per-horizon opinions.
//!
//! Models rarely return clean JSON. Extraction tries, in order: the whole
//! text, the first fenced code block, then the outermost `{ ... }` span.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::types::{Horizon, PeriodOpinion, ProviderPrediction, RawResponse, Sentiment};

/// Reason used when a model gives a price without a rationale.
pub const DEFAULT_REASON: &str = "No rationale provided";

const POSITIVE_KEYWORDS: &[&str] = &["positive", "bullish", "buy", "긍정", "상승", "매수"];
const NEGATIVE_KEYWORDS: &[&str] = &["negative", "bearish", "sell", "부정", "하락", "매도"];

/// Parse one predictor's answer.
///
/// `None` and `success: false` responses yield an unsuccessful prediction,
/// as does text in which no configured horizon carries a usable price.
pub fn parse_response(
    provider_name: &str,
    raw: Option<&RawResponse>,
    horizons: &[Horizon],
) -> ProviderPrediction {
    let Some(raw) = raw.filter(|r| r.success) else {
        debug!(predictor = provider_name, "No response to parse");
        return ProviderPrediction::failed(provider_name);
    };

    let Some(object) = extract_json(&raw.raw_text) else {
        warn!(
            predictor = provider_name,
            preview = %preview(&raw.raw_text),
            "No JSON object found in response"
        );
        return ProviderPrediction::failed(provider_name);
    };

    let mut opinions = BTreeMap::new();
    for horizon in horizons {
        match parse_opinion(object.get(horizon.as_str())) {
            Some(opinion) => {
                opinions.insert(horizon.clone(), opinion);
            }
            None => debug!(predictor = provider_name, horizon = %horizon, "Horizon skipped"),
        }
    }

    if opinions.is_empty() {
        warn!(predictor = provider_name, "Response had no usable horizon");
        return ProviderPrediction::failed(provider_name);
    }

    debug!(predictor = provider_name, horizons = opinions.len(), "Response parsed");
    ProviderPrediction::new(provider_name, opinions)
}

/// Locate and decode the JSON object in free-form model output.
pub fn extract_json(text: &str) -> Option<Map<String, Value>> {
    let as_object = |s: &str| match serde_json::from_str::<Value>(s.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    };

    as_object(text)
        .or_else(|| fenced_block(text).and_then(as_object))
        .or_else(|| {
            let start = text.find('{')?;
            let end = text.rfind('}')?;
            (end > start).then(|| &text[start..=end]).and_then(as_object)
        })
}

/// Body of the first ``` fence, with an optional `json` language tag.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let rest = &text[open + 3..];
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let close = rest.find("```")?;
    Some(&rest[..close])
}

fn parse_opinion(value: Option<&Value>) -> Option<PeriodOpinion> {
    let entry = value?.as_object()?;

    let price = parse_price(entry.get("price")?)?;
    if !(price.is_finite() && price > 0.0) {
        return None;
    }

    let reason = entry
        .get("reason")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_REASON)
        .to_string();

    let sentiment = entry
        .get("sentiment")
        .and_then(Value::as_str)
        .map(normalize_sentiment)
        .unwrap_or(Sentiment::Neutral);

    Some(PeriodOpinion {
        price,
        reason,
        sentiment,
    })
}

/// Numbers, or numeric strings with thousands separators ("71,500").
fn parse_price(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Map free-form sentiment text onto the three-way scale.
///
/// Positive keywords win over negative ones. `up` and `down` only count as
/// whole words so that e.g. "unsupported" stays neutral.
pub fn normalize_sentiment(text: &str) -> Sentiment {
    let lower = text.trim().to_lowercase();
    let has_word = |w: &str| {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token == w)
    };

    if POSITIVE_KEYWORDS.iter().any(|k| lower.contains(k)) || has_word("up") {
        Sentiment::Positive
    } else if NEGATIVE_KEYWORDS.iter().any(|k| lower.contains(k)) || has_word("down") {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn horizons() -> Vec<Horizon> {
        vec!["1d".into(), "1w".into(), "1m".into()]
    }

    fn parse(text: &str) -> ProviderPrediction {
        parse_response("GPT", Some(&RawResponse::ok("gpt-4o", text.to_string())), &horizons())
    }

    #[test]
    fn test_parse_plain_json() {
        let p = parse(
            r#"{"1d": {"price": 71500, "reason": "Earnings beat", "sentiment": "positive"},
                "1w": {"price": 72000.5, "reason": "Momentum", "sentiment": "neutral"},
                "1m": {"price": 69000, "reason": "Macro headwinds", "sentiment": "bearish"}}"#,
        );
        assert!(p.success);
        assert_eq!(p.provider_name, "GPT");
        assert_eq!(p.opinions.len(), 3);
        assert_eq!(p.opinions["1d"].price, 71500.0);
        assert_eq!(p.opinions["1w"].sentiment, Sentiment::Neutral);
        assert_eq!(p.opinions["1m"].sentiment, Sentiment::Negative);
    }

    #[test]
    fn test_parse_fenced_block() {
        let p = parse(
            "Here is my forecast:\n```json\n{\"1d\": {\"price\": 100, \"reason\": \"r\", \"sentiment\": \"up\"}}\n```\nGood luck!",
        );
        assert!(p.success);
        assert_eq!(p.opinions["1d"].sentiment, Sentiment::Positive);
    }

    #[test]
    fn test_parse_embedded_object() {
        let p = parse(r#"Sure! {"1w": {"price": "150", "reason": "x"}} Hope that helps."#);
        assert!(p.success);
        assert_eq!(p.opinions["1w"].price, 150.0);
        assert_eq!(p.opinions["1w"].sentiment, Sentiment::Neutral);
    }

    #[test]
    fn test_numeric_string_with_separators() {
        let p = parse(r#"{"1d": {"price": "71,500", "reason": "r", "sentiment": "매수"}}"#);
        assert_eq!(p.opinions["1d"].price, 71500.0);
        assert_eq!(p.opinions["1d"].sentiment, Sentiment::Positive);
    }

    #[test]
    fn test_missing_and_invalid_horizons_skipped() {
        let p = parse(
            r#"{"1d": {"price": "abc"},
                "1w": {"price": -5, "reason": "r"},
                "1m": {"price": 120, "reason": "", "sentiment": "하락"},
                "1y": {"price": 999}}"#,
        );
        assert!(p.success);
        assert_eq!(p.opinions.keys().collect::<Vec<_>>(), vec!["1m"]);
        assert_eq!(p.opinions["1m"].reason, DEFAULT_REASON);
        assert_eq!(p.opinions["1m"].sentiment, Sentiment::Negative);
    }

    #[test]
    fn test_no_usable_horizon_fails() {
        assert!(!parse(r#"{"1d": {"reason": "no price"}}"#).success);
        assert!(!parse("I cannot predict stock prices.").success);
        assert!(!parse("[1, 2, 3]").success);
    }

    #[test]
    fn test_null_or_declared_failure() {
        assert!(!parse_response("Gemma", None, &horizons()).success);
        let declined = RawResponse {
            model_identifier: "gemma3:1b".into(),
            raw_text: r#"{"1d": {"price": 1}}"#.into(),
            success: false,
        };
        let p = parse_response("Gemma", Some(&declined), &horizons());
        assert!(!p.success);
        assert!(p.opinions.is_empty());
    }

    #[test]
    fn test_only_configured_horizons_parsed() {
        let p = parse_response(
            "GPT",
            Some(&RawResponse::ok("m", r#"{"1d": {"price": 1}, "3m": {"price": 2}}"#.into())),
            &["3m".to_string()],
        );
        assert_eq!(p.opinions.keys().collect::<Vec<_>>(), vec!["3m"]);
    }

    #[test]
    fn test_normalize_sentiment() {
        assert_eq!(normalize_sentiment("Bullish"), Sentiment::Positive);
        assert_eq!(normalize_sentiment(" 긍정 "), Sentiment::Positive);
        assert_eq!(normalize_sentiment("strong sell"), Sentiment::Negative);
        assert_eq!(normalize_sentiment("부정적"), Sentiment::Negative);
        assert_eq!(normalize_sentiment("down"), Sentiment::Negative);
        assert_eq!(normalize_sentiment("sideways"), Sentiment::Neutral);
        assert_eq!(normalize_sentiment("unsupported"), Sentiment::Neutral);
        assert_eq!(normalize_sentiment(""), Sentiment::Neutral);
        // Positive is checked first.
        assert_eq!(normalize_sentiment("buy or sell"), Sentiment::Positive);
    }

    #[test]
    fn test_extract_json_prefers_whole_text() {
        let obj = extract_json(r#"  {"a": 1}  "#).unwrap();
        assert_eq!(obj["a"], 1);
        assert!(extract_json("no braces").is_none());
        assert!(extract_json("} backwards {").is_none());
    }
}
