use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::log;

/// Pattern for a measurement token, alternatives tried in order at each
/// position:
/// - Decimal with `.` or `,` separator, spaces allowed around it: 12.345, 12 , 345
/// - Plain integer: 7
/// - Decimal without integer part: .5, , 5
const NUMBER_PATTERN: &str = r"[0-9]+\s*[.,]\s*[0-9]+|[0-9]+|\s*[.,]\s*[0-9]+";

/// Confidence reported whenever a numeric token is found.
///
/// Fixed; the engine's own per-block confidence is not blended in.
pub const MATCH_CONFIDENCE: f64 = 0.9;

/// Final output of a scan: one numeric reading plus the text it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementReading {
    pub value: f64,
    /// 0.0 when no number was found, `MATCH_CONFIDENCE` otherwise
    pub confidence: f64,
    /// Full unmodified recognized text, kept for manual correction
    pub raw_text: String,
}

impl MeasurementReading {
    pub fn is_empty(&self) -> bool {
        self.confidence == 0.0
    }
}

fn number_regex() -> Option<&'static Regex> {
    static NUMBER_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    NUMBER_REGEX
        .get_or_init(|| Regex::new(NUMBER_PATTERN).ok())
        .as_ref()
}

/// Strips whitespace and turns a decimal comma into a dot.
fn normalize_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect()
}

/// Extracts the first numeric token from recognized text.
///
/// Never fails: text without a number yields value 0.0 with confidence
/// 0.0, which the confirmation step leaves to the operator to correct.
pub fn extract_measurement(full_text: &str) -> MeasurementReading {
    let found = number_regex().and_then(|re| re.find(full_text));

    let Some(token) = found else {
        log("No numeric token in recognized text");
        return MeasurementReading {
            value: 0.0,
            confidence: 0.0,
            raw_text: full_text.to_string(),
        };
    };

    let normalized = normalize_token(token.as_str());
    let value = normalized
        .parse::<f64>()
        .ok()
        .filter(|v| !v.is_nan())
        .unwrap_or(0.0);

    log(&format!(
        "Matched token {:?} -> {} (value {})",
        token.as_str(),
        normalized,
        value
    ));

    MeasurementReading {
        value,
        confidence: MATCH_CONFIDENCE,
        raw_text: full_text.to_string(),
    }
}

/// Parses an operator's manual correction.
///
/// Accepts a decimal comma and surrounding whitespace. Returns `None` for
/// anything that is not a finite number, in which case nothing is committed.
pub fn parse_correction(text: &str) -> Option<f64> {
    let normalized = normalize_token(text);
    if normalized.is_empty() {
        return None;
    }
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}
