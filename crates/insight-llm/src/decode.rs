//! Typed decoding of JSON embedded in analysis responses
//!
//! Backends are asked for a bare JSON object but regularly wrap it in a
//! markdown fence or surround it with prose. Decoding tries, in order:
//!
//! 1. the whole response as the target type
//! 2. the first fenced code block
//! 3. the span from the first `{` to the last `}`
//!
//! Callers decide what default to fall back to when all three fail.

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Which extraction step produced the decoded value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// The response was a clean JSON document
    Strict,
    /// Found inside a fenced code block
    Fenced,
    /// Found between the outermost braces
    Braced,
}

/// A decoded value plus the step that recovered it
#[derive(Debug, Clone)]
pub struct Decoded<T> {
    pub value: T,
    pub stage: DecodeStage,
}

/// Why a response could not be decoded
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("response was empty")]
    Empty,

    #[error("no JSON object found in response")]
    NoJson,

    #[error("response JSON does not match the expected schema: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Decode `text` into `T`, falling back to embedded-JSON extraction
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<Decoded<T>, DecodeError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::Empty);
    }

    let strict_error = match serde_json::from_str::<T>(trimmed) {
        Ok(value) => {
            return Ok(Decoded {
                value,
                stage: DecodeStage::Strict,
            });
        }
        Err(e) => e,
    };

    if let Some(Ok(value)) = fenced_block(trimmed).map(serde_json::from_str::<T>) {
        return Ok(Decoded {
            value,
            stage: DecodeStage::Fenced,
        });
    }

    match braced_span(trimmed) {
        Some(span) if span.len() < trimmed.len() => serde_json::from_str::<T>(span)
            .map(|value| Decoded {
                value,
                stage: DecodeStage::Braced,
            })
            .map_err(DecodeError::Invalid),
        Some(_) => Err(DecodeError::Invalid(strict_error)),
        None => Err(DecodeError::NoJson),
    }
}

/// The most likely JSON payload inside `text`, without parsing it
pub fn extract_json_candidate(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    fenced_block(trimmed)
        .filter(|block| block.starts_with('{'))
        .or_else(|| braced_span(trimmed))
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // skip an optional language tag on the opening line
    let body_start = after.find('\n').map_or(0, |i| i + 1);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn braced_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        sentiment: String,
        #[serde(default)]
        confidence: f64,
    }

    #[test]
    fn test_strict_decode() {
        let decoded: Decoded<Verdict> =
            decode_json(r#"{"sentiment":"positive","confidence":0.8}"#).unwrap();
        assert_eq!(decoded.stage, DecodeStage::Strict);
        assert_eq!(decoded.value.sentiment, "positive");
    }

    #[test]
    fn test_fenced_decode() {
        let text = "Here is the analysis:\n```json\n{\"sentiment\": \"negative\"}\n```\nDone.";
        let decoded: Decoded<Verdict> = decode_json(text).unwrap();
        assert_eq!(decoded.stage, DecodeStage::Fenced);
        assert_eq!(decoded.value.sentiment, "negative");
        assert_eq!(decoded.value.confidence, 0.0);
    }

    #[test]
    fn test_braced_decode_in_prose() {
        let text = "Sure! {\"sentiment\": \"neutral\", \"confidence\": 0.4} hope that helps";
        let decoded: Decoded<Verdict> = decode_json(text).unwrap();
        assert_eq!(decoded.stage, DecodeStage::Braced);
        assert_eq!(decoded.value.confidence, 0.4);
    }

    #[test]
    fn test_failures() {
        assert!(matches!(decode_json::<Verdict>("   "), Err(DecodeError::Empty)));
        assert!(matches!(
            decode_json::<Verdict>("I cannot analyze this content."),
            Err(DecodeError::NoJson)
        ));
        assert!(matches!(
            decode_json::<Verdict>("{\"sentiment\": "),
            Err(DecodeError::NoJson)
        ));
        assert!(matches!(
            decode_json::<Verdict>("{\"confidence\": 1}"),
            Err(DecodeError::Invalid(_))
        ));
    }

    #[test]
    fn test_extract_candidate() {
        assert_eq!(
            extract_json_candidate("noise {\"a\": {\"b\": 1}} trailing"),
            Some("{\"a\": {\"b\": 1}}")
        );
        assert_eq!(extract_json_candidate("```\n{\"a\":1}\n```"), Some("{\"a\":1}"));
        assert_eq!(extract_json_candidate("nothing here"), None);
    }
}
