//! Affected-table extraction from SQL statements.
//!
//! Change hints are derived by syntactic inspection of the leading verb
//! only. Recognized forms: `INSERT INTO`, `UPDATE`, `DELETE FROM`,
//! `CREATE TABLE IF NOT EXISTS`, `DROP TABLE IF EXISTS`. Anything else
//! (SELECT, PRAGMA, bare CREATE TABLE) contributes no hint.

use std::collections::BTreeSet;

/// Table touched by a single statement, normalized to uppercase.
pub fn affected_table(sql: &str) -> Option<String> {
    let trimmed = sql.trim_start();

    let rest = strip_prefix_ci(trimmed, "INSERT INTO")
        .or_else(|| strip_prefix_ci(trimmed, "DELETE FROM"))
        .or_else(|| strip_prefix_ci(trimmed, "CREATE TABLE IF NOT EXISTS"))
        .or_else(|| strip_prefix_ci(trimmed, "DROP TABLE IF EXISTS"))
        .or_else(|| strip_prefix_ci(trimmed, "UPDATE"))?;

    let name = leading_identifier(rest)?;
    Some(name.to_uppercase())
}

/// Deduplicated, uppercase table names for a sequence of statements.
pub fn affected_tables<'a>(statements: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let set: BTreeSet<String> = statements
        .into_iter()
        .filter_map(affected_table)
        .collect();
    set.into_iter().collect()
}

/// Case-insensitive keyword prefix strip. The prefix must be followed by
/// whitespace (so `UPDATED_ROWS` does not match `UPDATE`).
fn strip_prefix_ci<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    if input.len() <= prefix.len() {
        return None;
    }
    let (head, tail) = input.split_at(prefix.len());
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    if !tail.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }
    Some(tail.trim_start())
}

/// First identifier token: up to whitespace, `(`, or `;`, with optional
/// quoting stripped.
fn leading_identifier(input: &str) -> Option<&str> {
    let end = input
        .find(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .unwrap_or(input.len());
    let token = &input[..end];
    let token = token
        .trim_matches('"')
        .trim_matches('`')
        .trim_matches('\'');
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
