//! Recovering JSON objects from an undelimited byte stream.
//!
//! The peer concatenates JSON objects with no length prefix or separator.
//! Object boundaries are found by tracking brace depth outside of string
//! literals; each balanced span is then decoded.
//!
//! ```text
//! {"a":"}{"}{"b":1}{"c":
//! └────────┘└─────┘└────  remainder
//! ```

use serde::de::DeserializeOwned;

/// Extract every complete top-level object from `data`.
///
/// Returns the decoded objects in stream order and the unconsumed suffix of
/// `data`. Feed the suffix back, extended with newly read bytes, on the next
/// call.
///
/// A balanced span that fails to decode is skipped once the next object
/// begins; until then it stays in the remainder.
pub fn deframe<T: DeserializeOwned>(data: &[u8]) -> (Vec<T>, &[u8]) {
    let mut out = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in data.iter().enumerate() {
        match b {
            b'\\' => {
                escape = !escape;
                continue;
            }
            b'"' if !escape => in_string = !in_string,
            b'{' if !in_string => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            // A closing brace at depth zero has no opener; ignore it.
            b'}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    match serde_json::from_slice(&data[start..=i]) {
                        Ok(value) => {
                            out.push(value);
                            start = i + 1;
                        }
                        Err(err) => {
                            tracing::debug!(
                                offset = start,
                                len = i + 1 - start,
                                error = %err,
                                "discarding undecodable object"
                            );
                        }
                    }
                }
            }
            _ => {}
        }
        escape = false;
    }

    (out, &data[start..])
}
