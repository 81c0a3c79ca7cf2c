//! Log file reading: lenient line parsing and bounded tail scans.
//!
//! A malformed line never fails a read — it is skipped with a warning
//! and the rest of the file is used. A truncated file yields whatever
//! prefix parses.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use rd_domain::entry::Entry;
use rd_domain::error::Result;
use rd_domain::message::Role;

/// Initial tail window for preview scans.
const TAIL_START: u64 = 32 * 1024;
/// Tail window cap; a title that is not found by then is given up on.
const TAIL_CAP: u64 = 256 * 1024;

/// Title/summary material recovered from a log.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// First user text in the scanned window (up to 200 chars).
    pub title: Option<String>,
    /// First assistant text in the scanned window (up to 300 chars).
    pub summary: Option<String>,
    /// Most recent entry timestamp seen.
    pub updated_at: Option<String>,
}

/// Parse newline-delimited entries from raw text, skipping bad lines.
pub fn parse_entries(raw: &str, path: &Path) -> Vec<Entry> {
    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Entry>(line) {
            Ok(entry) => entries.push(entry),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!(
            path = %path.display(),
            skipped,
            "skipped malformed log lines"
        );
    }
    entries
}

/// Read and parse a whole log file.
pub fn read_entries(path: &Path) -> Result<Vec<Entry>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(parse_entries(&raw, path))
}

/// Scan a log's tail for preview material.
///
/// Starts with a 32 KiB window and doubles up to 256 KiB until a title
/// (first user text) is found or the window covers the whole file. This
/// is a latency bound, not a correctness one: an extremely large
/// pre-title prefix legitimately yields no title and callers must
/// tolerate that.
pub fn scan_tail(path: &Path) -> Result<ScanResult> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();

    let mut window = TAIL_START;
    loop {
        let start = len.saturating_sub(window);
        file.seek(SeekFrom::Start(start))?;
        let mut raw = String::new();
        // Invalid UTF-8 at a chopped boundary must not fail the scan.
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        raw.push_str(&String::from_utf8_lossy(&bytes));

        // Drop the partial first line when we started mid-file.
        let text = if start > 0 {
            match raw.find('\n') {
                Some(pos) => &raw[pos + 1..],
                None => "",
            }
        } else {
            raw.as_str()
        };

        let result = extract_preview(text, path);
        let covered_all = start == 0;
        if result.title.is_some() || covered_all || window >= TAIL_CAP {
            return Ok(result);
        }
        window = (window * 2).min(TAIL_CAP);
    }
}

fn extract_preview(text: &str, path: &Path) -> ScanResult {
    let entries = parse_entries(text, path);
    let mut result = ScanResult::default();

    for entry in &entries {
        let Some(tree) = entry.tree() else { continue };
        if let Some(ref ts) = tree.timestamp {
            result.updated_at = Some(ts.clone());
        }
        let Some(message) = tree.parsed_message() else {
            continue;
        };
        let text = message.content.plain_text();
        if text.trim().is_empty() {
            continue;
        }
        match message.role {
            Role::User if result.title.is_none() => {
                result.title = Some(truncate_chars(text.trim(), 200));
            }
            Role::Assistant if result.summary.is_none() => {
                result.summary = Some(truncate_chars(text.trim(), 300));
            }
            _ => {}
        }
    }

    result
}

/// Truncate at a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_owned()
    } else {
        text.chars().take(max).collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
