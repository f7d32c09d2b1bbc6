//! Character-budget clamping for text that crosses the tool boundary.
//!
//! Counts Unicode scalar values, never splits a char, and always reports how
//! much was cut.

/// Default budget for file reads and search output.
pub const DEFAULT_CLAMP_CHARS: usize = 120_000;

/// Result of clamping a text payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clamped {
    /// Possibly shortened text (with the truncation suffix appended when cut).
    pub text: String,
    pub truncated: bool,
    /// Characters dropped; 0 when not truncated.
    pub omitted_chars: usize,
    /// Character length of the input.
    pub original_length: usize,
}

/// Suffix appended to clamped text. Its length depends on `omitted`.
#[inline]
pub fn truncation_suffix(omitted: usize) -> String {
    format!("\n…[truncated {omitted} chars]")
}

/// Clamp `text` to at most `limit` characters plus the truncation suffix.
pub fn clamp_text(text: &str, limit: usize) -> Clamped {
    let original_length = text.chars().count();
    if original_length <= limit {
        return Clamped {
            text: text.to_string(),
            truncated: false,
            omitted_chars: 0,
            original_length,
        };
    }
    let cut = text
        .char_indices()
        .nth(limit)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let omitted = original_length - limit;
    let mut out = String::with_capacity(cut + 32);
    out.push_str(&text[..cut]);
    out.push_str(&truncation_suffix(omitted));
    Clamped {
        text: out,
        truncated: true,
        omitted_chars: omitted,
        original_length,
    }
}
