//! ID generation utilities for gridbench
//!
//! Record IDs are timestamp based. Puzzle IDs are content addresses: two
//! puzzles with the same example pairs always receive the same ID.

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::domain::{Grid, Pair};

/// Number of hex characters in a content address.
pub const CONTENT_ID_LEN: usize = 16;

/// Get current time in milliseconds since epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate a unique record ID.
///
/// Format: `{prefix}-{timestamp_ms}{counter:04}`
/// Example: `ej-17383008001230007`
pub fn generate_id(prefix: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}{:04}", prefix, now_ms(), counter % 10000)
}

#[derive(Serialize)]
struct CanonicalPair<'a> {
    input: &'a Grid,
    output: &'a Grid,
    order: u32,
}

/// Content address for a puzzle's pairs.
///
/// Pairs are sorted by `order`, reduced to `{input, output, order}` in that
/// field order, serialized as compact JSON and hashed with SHA-256. The first
/// 16 hex characters of the digest form the ID. The `is_test_case` flag does
/// not participate.
pub fn puzzle_id_for(pairs: &[Pair]) -> String {
    let mut sorted: Vec<&Pair> = pairs.iter().collect();
    sorted.sort_by_key(|p| p.order);

    let canonical: Vec<CanonicalPair<'_>> = sorted
        .into_iter()
        .map(|p| CanonicalPair {
            input: &p.input,
            output: &p.output,
            order: p.order,
        })
        .collect();

    // Serializing plain integer grids cannot fail
    let content = serde_json::to_string(&canonical).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..CONTENT_ID_LEN / 2])
}

/// Whether an ID has the shape of a content address.
pub fn is_content_id(id: &str) -> bool {
    id.len() == CONTENT_ID_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
