//! Parser for slash commands in comment text.
//!
//! This module provides a pure parser that extracts structured intents from
//! unstructured GitHub comment text.

use super::types::Intent;

/// Parses every slash command found in comment text.
///
/// # Parsing Rules
///
/// - One command per line, of the form `/command [args...]`
/// - The slash must be the first non-whitespace character of the line
/// - Command names are case-insensitive; arguments keep their case
/// - A line whose command word is not built in toggles a label: bare
///   `/<label>` adds it, `/<label> cancel` removes it
/// - Malformed lines (e.g. `/cherry-pick` with no branches) are ignored,
///   not errors
/// - Intents are returned in line order; duplicates are preserved
pub fn parse_comment(body: &str) -> Vec<Intent> {
    body.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<Intent> {
    let line = line.trim();
    let rest = line.strip_prefix('/')?;

    let mut words = rest.split_ascii_whitespace();
    let command = words.next()?;
    let args: Vec<&str> = words.collect();

    match command.to_ascii_lowercase().as_str() {
        "hold" => parse_gate(&args).map(|cancel| Intent::Hold { cancel }),
        "wip" => parse_gate(&args).map(|cancel| Intent::Wip { cancel }),
        "verified" => parse_gate(&args).map(|cancel| Intent::Verified { cancel }),
        "automerge" => parse_gate(&args).map(|cancel| Intent::Automerge { cancel }),
        "cherry-pick" => parse_cherry_pick(&args),
        "retest" => parse_retest(&args),
        _ => parse_label_toggle(command, &args),
    }
}

/// Gate commands take no arguments, or the single word `cancel`.
fn parse_gate(args: &[&str]) -> Option<bool> {
    match args {
        [] => Some(false),
        [word] if word.eq_ignore_ascii_case("cancel") => Some(true),
        _ => None,
    }
}

/// `/cherry-pick <branch>...` requires at least one branch name.
fn parse_cherry_pick(args: &[&str]) -> Option<Intent> {
    if args.is_empty() || !args.iter().all(|b| is_ref_like(b)) {
        return None;
    }
    Some(Intent::CherryPick {
        branches: args.iter().map(|b| b.to_string()).collect(),
    })
}

/// `/retest [check...]`; no arguments means every required check.
fn parse_retest(args: &[&str]) -> Option<Intent> {
    if !args.iter().all(|c| is_ref_like(c)) {
        return None;
    }
    Some(Intent::Retest {
        checks: args.iter().map(|c| c.to_string()).collect(),
    })
}

/// Any other `/<word>` is a label toggle, provided the word looks like a
/// label name. Whether the label is actually managed is the handler's call.
fn parse_label_toggle(label: &str, args: &[&str]) -> Option<Intent> {
    if !is_label_like(label) {
        return None;
    }
    parse_gate(args).map(|cancel| Intent::ToggleLabel {
        label: label.to_string(),
        cancel,
    })
}

/// Branch and check names: alphanumerics plus the separators git and CI
/// systems commonly use.
fn is_ref_like(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':'))
}

/// Label names: alphanumerics, dashes, underscores, and the `/` of graded
/// labels like `size/XS`.
fn is_label_like(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/'))
}
