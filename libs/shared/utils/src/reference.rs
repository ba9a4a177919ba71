use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Human-facing record number: `prefix` + unix millis + a 4-digit rolling
/// sequence. Two calls in the same process never collide within a millisecond
/// unless more than 10,000 numbers are issued in it.
pub fn next_reference(prefix: &str) -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) % 10_000;
    format!("{}{}{:04}", prefix, Utc::now().timestamp_millis(), seq)
}
