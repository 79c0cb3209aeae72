//! Free-text feedback merging over a closed vocabulary
//!
//! Recognizes three directive shapes per clause:
//! - `add <items>`: append items not yet present
//! - `remove <items>`: drop items that are present
//! - `only <items>`: replace the list with exactly these items
//!
//! Clauses are separated by `;`, `.` or newlines; items by `,` or `and`.
//! Anything not understood becomes a warning, never an error.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

use crate::types::StateMap;

/// The list field a stage exposes to feedback, plus its known items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackTarget {
    pub field: String,
    pub vocabulary: Vec<String>,
}

impl FeedbackTarget {
    pub fn new<I, S>(field: impl Into<String>, vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            field: field.into(),
            vocabulary: vocabulary.into_iter().map(Into::into).collect(),
        }
    }

    /// Canonical vocabulary entry for a free-text item
    fn resolve(&self, item: &str) -> Option<&str> {
        let wanted = normalize(item);
        self.vocabulary
            .iter()
            .find(|known| normalize(known) == wanted)
            .map(String::as_str)
    }
}

/// State delta and warnings produced by a merge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub delta: StateMap,
    pub warnings: Vec<String>,
}

impl MergeOutcome {
    pub fn is_empty(&self) -> bool {
        self.delta.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Add,
    Remove,
    Only,
}

fn directive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:please\s+)?(add|remove|only)\b\s*(.*)$").expect("valid directive regex")
    })
}

fn item_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s*(?:,|\band\b)\s*").expect("valid separator regex"))
}

/// Compute the delta that `feedback` applies to the target list in `state`
pub fn merge(state: &StateMap, feedback: &str, target: &FeedbackTarget) -> MergeOutcome {
    let mut items = current_items(state, &target.field);
    let mut warnings = Vec::new();
    let mut matched = false;

    for clause in feedback
        .split(|c| matches!(c, ';' | '.' | '\n'))
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        let Some(caps) = directive_regex().captures(clause) else {
            warnings.push(format!("Ignored feedback without a directive: '{}'", clause));
            continue;
        };

        let directive = match caps[1].to_lowercase().as_str() {
            "add" => Directive::Add,
            "remove" => Directive::Remove,
            _ => Directive::Only,
        };

        let mut resolved = Vec::new();
        for raw in item_separator()
            .split(&caps[2])
            .map(|s| s.trim().trim_matches(|c| matches!(c, '"' | '\'' | '`')))
            .filter(|s| !s.is_empty())
        {
            match target.resolve(raw) {
                Some(known) => {
                    if !resolved.iter().any(|r: &String| r == known) {
                        resolved.push(known.to_string());
                    }
                }
                None => warnings.push(format!(
                    "Unrecognized item '{}' for '{}' (known: {})",
                    raw,
                    target.field,
                    target.vocabulary.join(", ")
                )),
            }
        }

        if resolved.is_empty() {
            warnings.push(format!("No known items in feedback: '{}'", clause));
            continue;
        }

        matched = true;
        match directive {
            Directive::Add => {
                for item in resolved {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
            }
            Directive::Remove => items.retain(|item| !resolved.contains(item)),
            Directive::Only => items = resolved,
        }
    }

    let mut delta = StateMap::new();
    if matched {
        delta.insert(
            target.field.clone(),
            Value::Array(items.into_iter().map(Value::String).collect()),
        );
    }

    MergeOutcome { delta, warnings }
}

fn current_items(state: &StateMap, field: &str) -> Vec<String> {
    match state.get(field) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn normalize(item: &str) -> String {
    item.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
