//! Change extraction from raw model output.
//!
//! Models are unreliable about formatting: prose around the JSON, several
//! code fences, reasoning preambles. Extraction runs an ordered list of
//! strategies and keeps the first payload that parses. A response nothing can
//! parse becomes a [`ParseFailure`] value; extraction never panics.

use crate::error::ParseFailure;
use crate::model::AnalysisPayload;
use crate::util::truncate;
use regex::Regex;
use std::sync::OnceLock;

const PREVIEW_CHARS: usize = 120;

/// One way of locating the JSON payload inside a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Contents of a ``` fence, optionally tagged `json`
    FencedBlock,
    /// From `{"analysis"` to the last closing brace
    AnalysisObject,
    /// The whole response as one JSON document
    WholeText,
    /// Widest `{ ... }` region anywhere in the text
    WidestBraces,
}

/// Strategies in the order they are tried.
pub const STRATEGIES: [Strategy; 4] = [
    Strategy::FencedBlock,
    Strategy::AnalysisObject,
    Strategy::WholeText,
    Strategy::WidestBraces,
];

/// Why a single strategy did not produce a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    /// The strategy's region does not exist in the text
    NotFound,
    /// The region exists but is not a valid payload
    Invalid(String),
}

impl Strategy {
    pub fn label(&self) -> &'static str {
        match self {
            Strategy::FencedBlock => "fenced-block",
            Strategy::AnalysisObject => "analysis-object",
            Strategy::WholeText => "whole-text",
            Strategy::WidestBraces => "widest-braces",
        }
    }

    /// Run this strategy against `text`.
    pub fn attempt(&self, text: &str) -> Result<AnalysisPayload, StrategyError> {
        match self {
            Strategy::FencedBlock => {
                let mut last_error = StrategyError::NotFound;
                for block in fenced_blocks(text) {
                    match parse_payload(block) {
                        Ok(payload) => return Ok(payload),
                        Err(err) => last_error = err,
                    }
                }
                Err(last_error)
            }
            Strategy::AnalysisObject => {
                let mut last_error = StrategyError::NotFound;
                for candidate in analysis_objects(text) {
                    match parse_payload(candidate) {
                        Ok(payload) => return Ok(payload),
                        Err(err) => last_error = err,
                    }
                }
                Err(last_error)
            }
            Strategy::WholeText => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err(StrategyError::NotFound);
                }
                parse_payload(trimmed)
            }
            Strategy::WidestBraces => {
                parse_payload(extract_json_fragment(text, '{', '}').ok_or(StrategyError::NotFound)?)
            }
        }
    }
}

/// A successfully extracted payload and the strategy that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub payload: AnalysisPayload,
    pub strategy: Strategy,
}

/// Extract the analysis payload from a model response.
pub fn extract(text: &str) -> Result<Extraction, ParseFailure> {
    for strategy in STRATEGIES {
        match strategy.attempt(text) {
            Ok(payload) => return Ok(Extraction { payload, strategy }),
            Err(StrategyError::NotFound) => {}
            Err(StrategyError::Invalid(reason)) => {
                tracing::debug!(strategy = strategy.label(), %reason, "strategy rejected candidate");
            }
        }
    }

    Err(ParseFailure {
        attempts: STRATEGIES.len(),
        preview: truncate(text.trim(), PREVIEW_CHARS),
    })
}

/// Top-level keys that mark an object as an analysis payload.
const PAYLOAD_KEYS: [&str; 2] = ["analysis", "suggested_changes"];

fn parse_payload(candidate: &str) -> Result<AnalysisPayload, StrategyError> {
    let value: serde_json::Value =
        serde_json::from_str(candidate).map_err(|e| StrategyError::Invalid(e.to_string()))?;
    let is_payload = value
        .as_object()
        .is_some_and(|object| PAYLOAD_KEYS.iter().any(|key| object.contains_key(*key)));
    if !is_payload {
        return Err(StrategyError::Invalid(
            "object has neither \"analysis\" nor \"suggested_changes\"".to_string(),
        ));
    }
    serde_json::from_value::<AnalysisPayload>(value).map_err(|e| StrategyError::Invalid(e.to_string()))
}

fn fence_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").ok())
        .as_ref()
}

fn analysis_start_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\{\s*"analysis""#).ok()).as_ref()
}

/// Contents of every fenced block, in document order.
fn fenced_blocks(text: &str) -> impl Iterator<Item = &str> {
    fence_regex()
        .into_iter()
        .flat_map(move |re| re.captures_iter(text))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Regions starting at each `{"analysis"` and ending at the final `}` of the text.
fn analysis_objects(text: &str) -> impl Iterator<Item = &str> {
    let end = text.rfind('}');
    analysis_start_regex()
        .into_iter()
        .flat_map(move |re| re.find_iter(text))
        .filter_map(move |m| end.filter(|&end| m.start() < end).map(|end| &text[m.start()..=end]))
}

/// Extract a JSON fragment between the first `open` and last `close` delimiter
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}
