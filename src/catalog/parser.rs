//! Parsing of catalog search listings into [`MediaRecord`]s
//!
//! The backend prints one JSON object per line (flat playlist entries). A
//! single document with an `entries` array is accepted too. Entries without
//! a usable id are skipped and counted; everything else is optional.

use chrono::NaiveDate;
use serde_json::Value;
use tracing::debug;

use crate::identifier::MediaId;
use crate::MediaRecord;

/// Result of parsing a listing
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedListing {
    /// Usable records, in source order
    pub records: Vec<MediaRecord>,
    /// Lines or entries that were malformed or partial
    pub skipped: usize,
}

/// Parse newline-delimited JSON listing output
///
/// # Arguments
/// * `output` - Backend stdout
/// * `watch_url_base` - Prefix used to build a page URL when the entry has none
pub fn parse_listing(output: &str, watch_url_base: &str) -> ParsedListing {
    let mut listing = ParsedListing::default();

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Skipping unparsable listing line");
                listing.skipped += 1;
                continue;
            }
        };

        match value.get("entries").and_then(Value::as_array) {
            Some(entries) => {
                for entry in entries {
                    push_entry(&mut listing, entry, watch_url_base);
                }
            }
            None => push_entry(&mut listing, &value, watch_url_base),
        }
    }

    listing
}

fn push_entry(listing: &mut ParsedListing, entry: &Value, watch_url_base: &str) {
    match parse_entry(entry, watch_url_base) {
        Some(record) => listing.records.push(record),
        None => listing.skipped += 1,
    }
}

/// Convert one listing entry; `None` if it has no valid id
pub fn parse_entry(entry: &Value, watch_url_base: &str) -> Option<MediaRecord> {
    let object = entry.as_object()?;
    let raw_id = object.get("id").and_then(Value::as_str)?;
    let id = match MediaId::parse(raw_id) {
        Ok(id) => id,
        Err(e) => {
            debug!(error = %e, "Skipping entry with invalid id");
            return None;
        }
    };

    let title = string_field(entry, "title").unwrap_or_default();
    let source_url = string_field(entry, "webpage_url")
        .or_else(|| string_field(entry, "url").filter(|u| u.starts_with("http")))
        .unwrap_or_else(|| format!("{watch_url_base}{id}"));

    let mut record = MediaRecord::new(id, title, source_url);
    record.thumbnail_url = string_field(entry, "thumbnail").or_else(|| last_thumbnail(entry));
    record.duration_seconds = entry
        .get("duration")
        .and_then(Value::as_f64)
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(|d| d.round() as u64);
    record.upload_date = string_field(entry, "upload_date")
        .and_then(|d| NaiveDate::parse_from_str(&d, "%Y%m%d").ok());
    record.description = string_field(entry, "description");
    Some(record)
}

fn string_field(entry: &Value, key: &str) -> Option<String> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn last_thumbnail(entry: &Value) -> Option<String> {
    entry
        .get("thumbnails")?
        .as_array()?
        .iter()
        .rev()
        .find_map(|t| string_field(t, "url"))
}
