//! Keyword matching over free-text descriptions

/// A label assigned when any of its phrases occurs in the text
pub(crate) struct Rule {
    pub label: &'static str,
    pub phrases: &'static [&'static str],
}

/// Lowercased text with words separated by single spaces and padded on
/// both sides, so `" phrase "` lookups only match whole words
pub(crate) struct Words(String);

impl Words {
    pub fn new(text: &str) -> Self {
        let joined = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self(format!(" {} ", joined))
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn has(&self, phrase: &str) -> bool {
        self.0.contains(&format!(" {} ", phrase))
    }

    pub fn has_any(&self, phrases: &[&str]) -> bool {
        phrases.iter().any(|p| self.has(p))
    }
}

/// Labels of every matching rule, in rule order
pub(crate) fn matching(words: &Words, rules: &[Rule]) -> Vec<&'static str> {
    rules
        .iter()
        .filter(|rule| words.has_any(rule.phrases))
        .map(|rule| rule.label)
        .collect()
}

/// Label of the first matching rule
pub(crate) fn first_match(words: &Words, rules: &[Rule]) -> Option<&'static str> {
    rules
        .iter()
        .find(|rule| words.has_any(rule.phrases))
        .map(|rule| rule.label)
}

/// String items of a JSON array field, None when the field is absent
pub(crate) fn string_list(state: &stagegate_core::StateMap, field: &str) -> Option<Vec<String>> {
    state.get(field)?.as_array().map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &[Rule] = &[
        Rule {
            label: "cli",
            phrases: &["cli", "command line"],
        },
        Rule {
            label: "web",
            phrases: &["api", "server"],
        },
    ];

    #[test]
    fn test_whole_word_matching() {
        let words = Words::new("A Command-Line tool with an API!");
        assert!(words.has("command line"));
        assert!(words.has("api"));
        assert!(!words.has("tool with an api server"));

        // "capital" contains "api" but is a different word
        assert!(!Words::new("capital").has("api"));
    }

    #[test]
    fn test_rule_order() {
        let words = Words::new("server and cli");
        assert_eq!(matching(&words, RULES), vec!["cli", "web"]);
        assert_eq!(first_match(&words, RULES), Some("cli"));
        assert_eq!(first_match(&Words::new("nothing"), RULES), None);
        assert!(Words::new("  ...  ").is_empty());
    }
}
