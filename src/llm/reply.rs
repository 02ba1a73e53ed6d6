//! Decoding JSON out of model replies.
//!
//! Models wrap JSON in prose, in ```json fences, or in bare ``` fences, and
//! occasionally emit two fenced blocks where the first is an example.
//! Candidates are tried in order and the first that deserializes wins.

use serde::de::DeserializeOwned;

/// Candidate JSON snippets in priority order: the whole reply, each fenced
/// block, then the outermost `{...}` span.
fn candidates(text: &str) -> Vec<&str> {
    let trimmed = text.trim();
    let mut out = vec![trimmed];

    // Odd segments between ``` markers are fence bodies.
    for (i, segment) in trimmed.split("```").enumerate() {
        if i % 2 == 0 {
            continue;
        }
        let body = match segment.split_once('\n') {
            Some((label, rest)) if !label.trim_start().starts_with('{') => rest,
            _ => segment,
        };
        let body = body.trim();
        if !body.is_empty() {
            out.push(body);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        out.push(&trimmed[start..=end]);
    }
    out
}

/// Deserialize the first JSON candidate in `text` that fits `T`.
///
/// On total failure the error from the whole-reply attempt is returned.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    let mut first_err = None;
    for candidate in candidates(text) {
        match serde_json::from_str(candidate) {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }
    // candidates() always yields the trimmed reply, so an error was recorded.
    Err(first_err.unwrap_or_else(|| serde::de::Error::custom("empty reply")))
}
