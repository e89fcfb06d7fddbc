//! Mapping of raw HTTP responses to [`CallOutcome`].

use anyhow::{Context, Result, anyhow};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use qad_core::task::CallOutcome;
use qad_core::types::Tier;
use qad_scheduler::detect::{detect_rate_limit, is_rate_limit_code};
use serde_json::Value;
use tracing::debug;

/// Error messages and body previews are cut to this many characters.
const PREVIEW_CHARS: usize = 200;

/// Payload error code the gateway uses for content-policy rejections.
const CONTENT_FILTER_CODE: i64 = 400;

/// Classify one response. Pure: no I/O, no retries.
pub fn classify_response(tier: Tier, status: u16, body: &str) -> CallOutcome {
    if let Some(detected) = detect_rate_limit(tier, status, body) {
        debug!(tier = %tier, pattern = %detected.matched_pattern, "Rate limit detected");
        return CallOutcome::RateLimited;
    }

    if !(200..300).contains(&status) {
        return CallOutcome::TransientError(format!("HTTP {status}: {}", preview(body)));
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(err) => {
            return CallOutcome::TransientError(format!("Invalid JSON response: {err}"));
        }
    };

    if let Some(content) = completion_content(&value) {
        return CallOutcome::Success(content.to_string());
    }

    if let Some(encoded) = value.get("dataBase64").and_then(Value::as_str) {
        return match decode_payload(encoded) {
            Ok(decoded) => classify_decoded(&decoded, body),
            Err(err) => CallOutcome::TransientError(format!("{err:#}")),
        };
    }

    CallOutcome::TransientError(format!("Invalid response: {}", preview(body)))
}

fn classify_decoded(decoded: &Value, body: &str) -> CallOutcome {
    if let Some(error) = decoded.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        if code == CONTENT_FILTER_CODE {
            return CallOutcome::ContentFiltered(preview(message));
        }
        if is_rate_limit_code(code) {
            return CallOutcome::RateLimited;
        }
        return CallOutcome::TransientError(format!("API error {code}: {}", preview(message)));
    }

    match completion_content(decoded) {
        Some(content) => CallOutcome::Success(content.to_string()),
        None => CallOutcome::TransientError(format!("Invalid response: {}", preview(body))),
    }
}

fn completion_content(value: &Value) -> Option<&str> {
    value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}

fn decode_payload(encoded: &str) -> Result<Value> {
    let bytes = BASE64
        .decode(encoded.trim())
        .context("Failed to decode dataBase64 payload")?;
    let text = String::from_utf8(bytes).map_err(|_| anyhow!("dataBase64 payload is not UTF-8"))?;
    serde_json::from_str(&text).context("dataBase64 payload is not JSON")
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}
