//! Text and JSON encodings of entries and subject names
//!
//! The line-oriented form delimits items by `\n`. Subject names cannot
//! contain whitespace, but schema text can, so a listing that holds a
//! multi-line schema is prefixed with a warning line.

use crate::entry::SchemaEntry;
use crate::error::Result;

/// Prefix written before an entry listing that cannot be parsed back line by line
pub const SCHEMA_WITH_NEWLINE_WARNING: &str = "ERROR: One of the schemas for this subject contains a new line \
     and won't be parse-able properly. Please use a non-plain text format instead (e.g.: JSON).";

/// Encode entries as `id<TAB>schema` lines, in the order given
pub fn entries_to_text(entries: &[SchemaEntry]) -> String {
    let mut out = String::new();
    if entries.iter().any(|e| e.schema().contains('\n')) {
        out.push_str(SCHEMA_WITH_NEWLINE_WARNING);
        out.push('\n');
    }
    for entry in entries {
        out.push_str(&entry.to_string());
        out.push('\n');
    }
    out
}

/// Decode a listing written by [`entries_to_text`]; lines that are not entries are skipped
pub fn entries_from_text(text: &str) -> Vec<SchemaEntry> {
    text.lines().filter_map(SchemaEntry::from_line).collect()
}

pub fn subject_names_to_text<S: AsRef<str>>(names: &[S]) -> String {
    let mut out = String::new();
    for name in names {
        out.push_str(name.as_ref());
        out.push('\n');
    }
    out
}

pub fn subject_names_from_text(text: &str) -> Vec<String> {
    text.lines()
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

pub fn entries_to_json(entries: &[SchemaEntry]) -> Result<String> {
    Ok(serde_json::to_string_pretty(entries)?)
}

pub fn subject_names_to_json<S: AsRef<str>>(names: &[S]) -> Result<String> {
    let names: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
    Ok(serde_json::to_string_pretty(&names)?)
}
