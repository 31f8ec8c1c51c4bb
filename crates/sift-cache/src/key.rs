//! Cache key generation.
//!
//! The default generator serializes arguments to canonical JSON (object keys
//! sorted). Domain keys are built from cheap summaries instead of full
//! payloads.

use serde::Serialize;
use sift_core::{BulkAction, ItemId};
use std::fmt::Write as _;

/// How many leading ids a summary key samples.
pub const SUMMARY_ID_SAMPLE: usize = 5;

/// Canonical JSON of `args`, or `None` if it cannot be serialized (the call
/// then bypasses the cache).
pub fn stable_key<A: Serialize + ?Sized>(args: &A) -> Option<String> {
    serde_json::to_value(args).ok().map(|value| value.to_string())
}

/// Key for a single eligibility check.
#[must_use]
pub fn eligibility_key(id: &ItemId, status: &str, action: BulkAction) -> String {
    format!("{id}|{status}|{action}")
}

/// Compact key: prefix, total count, and the first few ids.
pub fn summary_key<'a>(prefix: &str, ids: impl IntoIterator<Item = &'a ItemId>) -> String {
    let mut sample = String::new();
    let mut count = 0usize;
    for id in ids {
        if count < SUMMARY_ID_SAMPLE {
            if count > 0 {
                sample.push(',');
            }
            sample.push_str(id.as_str());
        }
        count += 1;
    }
    let mut key = String::with_capacity(prefix.len() + sample.len() + 16);
    let _ = write!(key, "{prefix}|n={count}|{sample}");
    key
}

/// Exact key over every `(id, status)` pair. Unresolved ids are marked `~`.
///
/// Use this wherever the cached value names ids to act on: a false hit
/// there would be state corruption, not a stale count.
pub fn snapshot_key<'a>(
    prefix: &str,
    entries: impl IntoIterator<Item = (&'a ItemId, Option<&'a str>)>,
) -> String {
    let mut key = String::from(prefix);
    for (id, status) in entries {
        let _ = write!(key, "|{id}={}", status.unwrap_or("~"));
    }
    key
}
