use anyhow::Result;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::config::{CustomPattern, Settings};
use crate::link_cleaner::{self, DEFAULT_HOP_LIMIT};

const IP_TOKEN: &str = "[IP_ADDRESS]";
const EMAIL_TOKEN: &str = "[EMAIL]";
const PHONE_TOKEN: &str = "[PHONE]";
const CARD_TOKEN: &str = "[CARD_NUMBER]";
const SSN_TOKEN: &str = "[SSN]";
const NAME_TOKEN: &str = "[NAME]";
const URL_TOKEN: &str = "[URL]";

const BUILTIN_NAMES: &[&str] = &[
    "mohammad", "mike", "john", "ahmad", "qusai", "lana", "ismail", "bob", "alice", "diana",
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Category {
    IpAddress,
    Email,
    Phone,
    CreditCard,
    Ssn,
    Name,
    Url,
    Custom,
}

/// One built-in category: its whole-value and in-text patterns, the token it
/// is replaced with, and the setting that switches it on.
struct BuiltinRule {
    category: Category,
    anchored: &'static str,
    unanchored: &'static str,
    placeholder: &'static str,
    enabled: fn(&Settings) -> bool,
}

// Application order is part of the output contract: phone runs before card.
const BUILTIN_RULES: &[BuiltinRule] = &[
    BuiltinRule {
        category: Category::IpAddress,
        anchored: r"^(?:\d{1,3}\.){3}\d{1,3}$",
        unanchored: r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
        placeholder: IP_TOKEN,
        enabled: |s| s.mask_ip_addresses,
    },
    BuiltinRule {
        category: Category::Email,
        anchored: r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$",
        unanchored: r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        placeholder: EMAIL_TOKEN,
        enabled: |s| s.mask_emails,
    },
    BuiltinRule {
        category: Category::Phone,
        anchored: r"^(?:\+?1[-.]?)?\(?([0-9]{3})\)?[-.]?([0-9]{3})[-.]?([0-9]{4})$",
        unanchored: r"\b(?:\+?1[-.]?)?\(?([0-9]{3})\)?[-.]?([0-9]{3})[-.]?([0-9]{4})\b",
        placeholder: PHONE_TOKEN,
        enabled: |s| s.mask_phone_numbers,
    },
    BuiltinRule {
        category: Category::CreditCard,
        anchored: r"^(?:\d[ -]?){13,16}$",
        unanchored: r"\b(?:\d[ -]?){13,16}\b",
        placeholder: CARD_TOKEN,
        enabled: |s| s.mask_credit_cards,
    },
    BuiltinRule {
        category: Category::Ssn,
        anchored: r"^\d{3}-\d{2}-\d{4}$",
        unanchored: r"\b\d{3}-\d{2}-\d{4}\b",
        placeholder: SSN_TOKEN,
        enabled: |s| s.mask_ssn,
    },
];

static URL_WHOLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://[^\s]+$").expect("url regex"));
static URL_INLINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s]+").expect("url regex"));

struct CompiledBuiltin {
    rule: &'static BuiltinRule,
    anchored: Regex,
    unanchored: Regex,
}

static COMPILED_BUILTINS: Lazy<Vec<CompiledBuiltin>> = Lazy::new(|| {
    BUILTIN_RULES
        .iter()
        .map(|rule| CompiledBuiltin {
            rule,
            anchored: Regex::new(rule.anchored).expect("built-in anchored regex"),
            unanchored: Regex::new(rule.unanchored).expect("built-in regex"),
        })
        .collect()
});

static BUILTIN_NAME_RULES: Lazy<Vec<(Regex, Regex)>> = Lazy::new(|| {
    BUILTIN_NAMES
        .iter()
        .map(|name| build_name_rules(name).expect("built-in name regex"))
        .collect()
});

/// Per-category replacement counts for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MaskStats {
    pub ip_addresses: usize,
    pub emails: usize,
    pub phones: usize,
    pub cards: usize,
    pub ssn: usize,
    pub names: usize,
    pub urls: usize,
    pub custom: usize,
    /// Set when the whole value was a link that got sanitised.
    pub link_cleaned: bool,
}

impl MaskStats {
    pub fn total(&self) -> usize {
        self.ip_addresses
            + self.emails
            + self.phones
            + self.cards
            + self.ssn
            + self.names
            + self.urls
            + self.custom
    }

    fn record(&mut self, category: Category, count: usize) {
        let slot = match category {
            Category::IpAddress => &mut self.ip_addresses,
            Category::Email => &mut self.emails,
            Category::Phone => &mut self.phones,
            Category::CreditCard => &mut self.cards,
            Category::Ssn => &mut self.ssn,
            Category::Name => &mut self.names,
            Category::Url => &mut self.urls,
            Category::Custom => &mut self.custom,
        };
        *slot += count;
    }
}

/// Outcome of one anonymizer run. `changed` is true exactly when `output`
/// differs from the input, so callers can skip writing back identical text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskingResult {
    pub output: String,
    pub changed: bool,
    pub stats: MaskStats,
}

impl MaskingResult {
    fn new(input: &str, output: String, stats: MaskStats) -> Self {
        let changed = output != input;
        Self {
            output,
            changed,
            stats,
        }
    }

    fn unchanged(input: &str) -> Self {
        Self::new(input, input.to_string(), MaskStats::default())
    }
}

enum Replacement {
    Placeholder(&'static str),
    /// User replacement; `$1` and `${name}` expand to capture groups.
    Template(String),
}

struct Substitution {
    category: Category,
    regex: Regex,
    replacement: Replacement,
}

impl Substitution {
    fn placeholder(category: Category, regex: Regex, token: &'static str) -> Self {
        Self {
            category,
            regex,
            replacement: Replacement::Placeholder(token),
        }
    }

    fn apply(&self, input: &str) -> (String, usize) {
        match &self.replacement {
            Replacement::Placeholder(token) => replace_all(&self.regex, input, token),
            Replacement::Template(template) => replace_all_expanded(&self.regex, input, template),
        }
    }
}

/// Rule tables compiled from one [`Settings`] snapshot.
///
/// Only enabled rules are kept. `whole_value` is consulted against the
/// trimmed input first; if nothing there matches, `substitutions` run in
/// order over the full text, each one seeing the output of the previous.
pub struct Anonymizer {
    clean_links: bool,
    mask_urls: bool,
    whole_value: Vec<(Category, Regex)>,
    substitutions: Vec<Substitution>,
}

impl Anonymizer {
    pub fn new(settings: &Settings) -> Self {
        let mut whole_value = Vec::new();
        let mut substitutions = Vec::new();

        for builtin in COMPILED_BUILTINS.iter() {
            if !(builtin.rule.enabled)(settings) {
                continue;
            }
            whole_value.push((builtin.rule.category, builtin.anchored.clone()));
            substitutions.push(Substitution::placeholder(
                builtin.rule.category,
                builtin.unanchored.clone(),
                builtin.rule.placeholder,
            ));
        }

        if settings.mask_names {
            let custom_rules = settings
                .custom_names
                .iter()
                .filter(|name| !name.trim().is_empty())
                .filter_map(|name| match build_name_rules(name.trim()) {
                    Ok(rules) => Some(rules),
                    Err(err) => {
                        tracing::warn!(%name, error = %err, "skipping custom name");
                        None
                    }
                });
            for (anchored, unanchored) in BUILTIN_NAME_RULES.iter().cloned().chain(custom_rules) {
                whole_value.push((Category::Name, anchored));
                substitutions.push(Substitution::placeholder(Category::Name, unanchored, NAME_TOKEN));
            }
        }

        if settings.mask_urls {
            substitutions.push(Substitution::placeholder(
                Category::Url,
                URL_INLINE_RE.clone(),
                URL_TOKEN,
            ));
        }

        for pattern in settings.custom_patterns.iter().filter(|p| p.is_enabled) {
            match build_custom_rules(pattern) {
                Ok((anchored, unanchored)) => {
                    whole_value.push((Category::Custom, anchored));
                    substitutions.push(Substitution {
                        category: Category::Custom,
                        regex: unanchored,
                        replacement: Replacement::Template(pattern.replacement.clone()),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        id = %pattern.id,
                        name = %pattern.name,
                        error = %err,
                        "skipping invalid custom pattern"
                    );
                }
            }
        }

        Self {
            clean_links: settings.clean_copied_links,
            mask_urls: settings.mask_urls,
            whole_value,
            substitutions,
        }
    }

    pub fn anonymize(&self, input: &str) -> MaskingResult {
        let trimmed = input.trim();

        if URL_WHOLE_RE.is_match(trimmed) {
            if self.clean_links {
                let cleaned = link_cleaner::clean(trimmed, DEFAULT_HOP_LIMIT);
                if cleaned == trimmed {
                    return MaskingResult::unchanged(input);
                }
                tracing::debug!("whole value is a link, cleaned it");
                let leading = input.len() - input.trim_start().len();
                let trailing = input.trim_end().len();
                let output = format!("{}{}{}", &input[..leading], cleaned, &input[trailing..]);
                let stats = MaskStats {
                    link_cleaned: true,
                    ..MaskStats::default()
                };
                return MaskingResult::new(input, output, stats);
            }
            if self.mask_urls {
                tracing::debug!("whole value is a link, leaving it untouched");
                return MaskingResult::unchanged(input);
            }
        }

        if let Some((category, _)) = self.whole_value.iter().find(|(_, regex)| regex.is_match(trimmed)) {
            tracing::debug!(?category, "whole value is a single entity, leaving it untouched");
            return MaskingResult::unchanged(input);
        }

        let mut output = input.to_string();
        let mut stats = MaskStats::default();
        for substitution in &self.substitutions {
            let (next, count) = substitution.apply(&output);
            output = next;
            stats.record(substitution.category, count);
        }

        tracing::debug!(replacements = stats.total(), "masking pass finished");
        MaskingResult::new(input, output, stats)
    }
}

/// Masks `text` under `settings`. Never fails; rules that cannot be compiled
/// are left out.
pub fn transform(text: &str, settings: &Settings) -> String {
    Anonymizer::new(settings).anonymize(text).output
}

fn replace_all(regex: &Regex, input: &str, replacement: &str) -> (String, usize) {
    let mut count = 0;
    let result = regex.replace_all(input, |_: &Captures| {
        count += 1;
        replacement
    });
    (result.into_owned(), count)
}

fn replace_all_expanded(regex: &Regex, input: &str, template: &str) -> (String, usize) {
    let mut count = 0;
    let result = regex.replace_all(input, |caps: &Captures| {
        count += 1;
        let mut expanded = String::new();
        caps.expand(template, &mut expanded);
        expanded
    });
    (result.into_owned(), count)
}

fn build_name_rules(name: &str) -> Result<(Regex, Regex)> {
    let escaped = regex::escape(name);
    let anchored = Regex::new(&format!("(?i)^{}$", escaped))?;
    let unanchored = Regex::new(&format!(r"(?i)\b{}\b", escaped))?;
    Ok((anchored, unanchored))
}

fn build_custom_rules(pattern: &CustomPattern) -> Result<(Regex, Regex)> {
    let unanchored = Regex::new(&pattern.pattern)?;
    let anchored = Regex::new(&format!("^{}$", pattern.pattern))?;
    Ok((anchored, unanchored))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_pattern(pattern: &str, replacement: &str) -> Settings {
        let mut settings = Settings::default();
        settings.add_custom_pattern(CustomPattern::new("test", pattern, replacement));
        settings
    }

    #[test]
    fn masks_email_in_running_text() {
        let output = transform("Contact me at a@b.com", &Settings::default());
        assert_eq!(output, "Contact me at [EMAIL]");
    }

    #[test]
    fn single_name_is_left_alone() {
        let settings = Settings::default();
        assert_eq!(transform("john", &settings), "john");
        assert_eq!(transform("  John \n", &settings), "  John \n");
        assert_eq!(transform("hello john", &settings), "hello [NAME]");
        assert_eq!(transform("Hello JOHN and Alice", &settings), "Hello [NAME] and [NAME]");
        assert_eq!(transform("johnny was here", &settings), "johnny was here");
    }

    #[test]
    fn card_number_alone_bypasses_but_is_masked_in_text() {
        let settings = Settings::default();
        assert_eq!(transform("4111-1111-1111-1111", &settings), "4111-1111-1111-1111");
        assert_eq!(
            transform("card: 4111-1111-1111-1111", &settings),
            "card: [CARD_NUMBER]"
        );
    }

    #[test]
    fn phone_rule_runs_before_card_rule() {
        let output = transform("ids 555-123-4567 123", &Settings::default());
        assert_eq!(output, "ids [PHONE] 123");
    }

    #[test]
    fn masks_each_builtin_category() {
        let input = "Email bob@example.com, call 555-123-4567, server 10.0.0.1, ssn 123-45-6789, see https://example.com";
        let anonymizer = Anonymizer::new(&Settings::default());
        let result = anonymizer.anonymize(input);
        assert_eq!(
            result.output,
            "Email [EMAIL], call [PHONE], server [IP_ADDRESS], ssn [SSN], see https://example.com"
        );
        assert!(result.changed);
        assert_eq!(result.stats.emails, 1);
        assert_eq!(result.stats.phones, 1);
        assert_eq!(result.stats.ip_addresses, 1);
        assert_eq!(result.stats.ssn, 1);
        assert_eq!(result.stats.total(), 4);
    }

    #[test]
    fn masking_is_idempotent() {
        let settings = Settings {
            mask_urls: true,
            ..Settings::default()
        };
        let input = "mike (mike@corp.io) at 172.16.0.4 paid with 4111 1111 1111 1111, ssn 078-05-1120, docs https://corp.io/x";
        let once = transform(input, &settings);
        assert_ne!(once, input);
        assert_eq!(transform(&once, &settings), once);
    }

    #[test]
    fn whole_value_entities_bypass() {
        let settings = Settings::default();
        for input in ["192.168.1.10", "a@b.com", "(555) 123-4567", "123-45-6789", " Diana\t"] {
            assert_eq!(transform(input, &settings), input);
        }
        assert_eq!(transform("ping 192.168.1.10 now", &settings), "ping [IP_ADDRESS] now");
    }

    #[test]
    fn disabled_rule_is_a_no_op() {
        let settings = Settings {
            mask_emails: false,
            ..Settings::default()
        };
        assert_eq!(transform("a@b.com", &settings), "a@b.com");
        assert_eq!(transform("write to a@b.com", &settings), "write to a@b.com");
    }

    #[test]
    fn bare_link_is_cleaned_keeping_whitespace() {
        let result = Anonymizer::new(&Settings::default())
            .anonymize("  https://example.com/page?utm_source=x&id=2\n");
        assert_eq!(result.output, "  https://example.com/page?id=2\n");
        assert!(result.changed);
        assert!(result.stats.link_cleaned);
    }

    #[test]
    fn clean_bare_link_is_returned_verbatim() {
        let input = " https://example.com/page ";
        let result = Anonymizer::new(&Settings::default()).anonymize(input);
        assert_eq!(result.output, input);
        assert!(!result.changed);
    }

    #[test]
    fn bare_link_is_never_masked() {
        let settings = Settings {
            mask_urls: true,
            clean_copied_links: false,
            ..Settings::default()
        };
        let link = "https://example.com/page?utm_source=x";
        assert_eq!(transform(link, &settings), link);
        assert_eq!(transform("see https://example.com/x now", &settings), "see [URL] now");
    }

    #[test]
    fn links_in_text_are_kept_without_url_masking() {
        let settings = Settings {
            clean_copied_links: false,
            ..Settings::default()
        };
        let input = "https://example.com/?utm_source=x";
        assert_eq!(transform(input, &settings), input);
        assert_eq!(transform("go to https://example.com/a", &settings), "go to https://example.com/a");
    }

    #[test]
    fn custom_pattern_applies_after_builtins() {
        let settings = with_pattern(r"\bfoo\b", "[FOO]");
        assert_eq!(transform("call foo now", &settings), "call [FOO] now");

        let settings = with_pattern(r"\[EMAIL\]", "<hidden>");
        assert_eq!(transform("mail a@b.com", &settings), "mail <hidden>");
    }

    #[test]
    fn custom_pattern_expands_capture_groups() {
        let settings = with_pattern(r"order (\d+)", "order #${1}");
        assert_eq!(transform("my order 42 shipped", &settings), "my order #42 shipped");
    }

    #[test]
    fn custom_pattern_whole_value_wraps_pattern_in_anchors() {
        let settings = with_pattern(r"TICK-\d+", "[TICKET]");
        assert_eq!(transform("TICK-42", &settings), "TICK-42");
        assert_eq!(transform("see TICK-42", &settings), "see [TICKET]");

        // `^foo|bar$`: a leading `foo` or a trailing `bar` is enough to bypass.
        let settings = with_pattern("foo|bar", "[X]");
        assert_eq!(transform("foo and bar", &settings), "foo and bar");
        assert_eq!(transform("bar", &settings), "bar");
        assert_eq!(transform("see foo now", &settings), "see [X] now");
        assert_eq!(transform("the bar is open", &settings), "the [X] is open");
    }

    #[test]
    fn invalid_custom_pattern_is_skipped() {
        let mut settings = with_pattern("(unclosed", "[BROKEN]");
        settings.add_custom_pattern(CustomPattern::new("ok", r"\bfoo\b", "[FOO]"));
        assert_eq!(transform("(unclosed foo", &settings), "(unclosed [FOO]");
    }

    #[test]
    fn disabled_custom_pattern_is_ignored() {
        let mut settings = with_pattern(r"\bfoo\b", "[FOO]");
        let id = settings.custom_patterns[0].id;
        settings.set_pattern_enabled(id, false);
        assert_eq!(transform("call foo now", &settings), "call foo now");
    }

    #[test]
    fn custom_names_follow_the_names_toggle() {
        let mut settings = Settings::default();
        settings.add_custom_name("Zelda");
        settings.add_custom_name("d.j");
        assert_eq!(transform("zelda", &settings), "zelda");
        assert_eq!(transform("met Zelda and d.j today", &settings), "met [NAME] and [NAME] today");
        assert_eq!(transform("met dxj today", &settings), "met dxj today");

        settings.mask_names = false;
        assert_eq!(transform("met Zelda and bob", &settings), "met Zelda and bob");
    }

    #[test]
    fn unmatched_text_is_unchanged() {
        let result = Anonymizer::new(&Settings::default()).anonymize("nothing to see here");
        assert_eq!(result.output, "nothing to see here");
        assert!(!result.changed);
        assert_eq!(result.stats, MaskStats::default());

        assert_eq!(transform("", &Settings::default()), "");
    }
}
