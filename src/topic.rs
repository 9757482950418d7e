use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between topic levels
pub const LEVEL_SEPARATOR: char = '/';
/// Matches exactly one topic level
pub const SINGLE_LEVEL_WILDCARD: char = '+';
/// Matches the remainder of the hierarchy
pub const MULTI_LEVEL_WILDCARD: char = '#';
/// Maximum length for topic names and filters, in bytes
pub const MAX_TOPIC_LENGTH: usize = 65_535;

/// Check `s` against the topic grammar.
///
/// With `allow_wildcards` set the string is checked as a filter, otherwise
/// as a concrete topic name. Every syntax violation is reported as
/// [`Error::InvalidFilterSyntax`].
pub fn validate(s: &str, allow_wildcards: bool) -> Result<()> {
    if s.is_empty() {
        return Err(syntax(s, "must not be empty"));
    }
    if s.len() > MAX_TOPIC_LENGTH {
        return Err(Error::TopicTooLong);
    }

    let mut prev: Option<char> = None;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            LEVEL_SEPARATOR => {
                if prev == Some(LEVEL_SEPARATOR) {
                    return Err(syntax(s, "contains an empty level"));
                }
            }
            SINGLE_LEVEL_WILDCARD | MULTI_LEVEL_WILDCARD => {
                if !allow_wildcards {
                    return Err(syntax(s, "wildcards are not allowed in a topic name"));
                }
                let starts_level = matches!(prev, None | Some(LEVEL_SEPARATOR));
                let ends_level = matches!(chars.peek(), None | Some(&LEVEL_SEPARATOR));
                if !starts_level || !ends_level {
                    return Err(syntax(s, "a wildcard must occupy an entire level"));
                }
            }
            _ => {}
        }
        prev = Some(c);
    }

    if prev == Some(LEVEL_SEPARATOR) {
        return Err(syntax(s, "must not end with a level separator"));
    }
    Ok(())
}

fn syntax(s: &str, reason: &str) -> Error {
    Error::InvalidFilterSyntax(format!("{:?} {}", s, reason))
}

/// Match a concrete topic against a filter.
///
/// Both arguments are assumed to be valid; use [`TopicFilter::matches`] when
/// working with checked values. A `#` level matches everything from that
/// point on, including nothing at all, so `a/b` matches `a/b/#`.
pub fn matches(topic: &str, filter: &str) -> bool {
    let mut topic_levels = topic.split(LEVEL_SEPARATOR);

    for level in filter.split(LEVEL_SEPARATOR) {
        match Level::parse(level) {
            Level::MultiLevel => return true,
            Level::SingleLevel => {
                if topic_levels.next().is_none() {
                    return false;
                }
            }
            Level::Literal(literal) => match topic_levels.next() {
                Some(topic_level) if topic_level == literal => {}
                _ => return false,
            },
        }
    }

    topic_levels.next().is_none()
}

/// One level of a topic filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level<'a> {
    Literal(&'a str),
    SingleLevel,
    MultiLevel,
}

impl<'a> Level<'a> {
    fn parse(level: &'a str) -> Self {
        match level {
            "+" => Level::SingleLevel,
            "#" => Level::MultiLevel,
            literal => Level::Literal(literal),
        }
    }
}

/// A concrete topic name, never containing wildcards
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic {
    name: String,
}

impl Topic {
    /// Create a new topic, checking it against the topic grammar
    pub fn new(name: &str) -> Result<Self> {
        validate(name, false).map_err(|e| match e {
            Error::InvalidFilterSyntax(reason) => Error::InvalidTopic(reason),
            other => other,
        })?;
        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Get the topic name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn levels(&self) -> impl Iterator<Item = &str> {
        self.name.split(LEVEL_SEPARATOR)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Topic {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.name
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

/// A checked topic filter, used for subscriptions and mailbox queries
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicFilter {
    pattern: String,
}

impl TopicFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        validate(pattern, true)?;
        Ok(Self {
            pattern: pattern.to_string(),
        })
    }

    /// Parse several filters at once, failing on the first invalid one
    pub fn parse_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Self>> {
        patterns.iter().map(|p| Self::new(p.as_ref())).collect()
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn levels(&self) -> impl Iterator<Item = Level<'_>> {
        self.pattern.split(LEVEL_SEPARATOR).map(Level::parse)
    }

    pub fn has_wildcards(&self) -> bool {
        self.levels().any(|l| !matches!(l, Level::Literal(_)))
    }

    pub fn matches(&self, topic: &Topic) -> bool {
        matches(topic.name(), &self.pattern)
    }
}

impl From<Topic> for TopicFilter {
    /// Every topic name is also a filter matching only itself.
    fn from(topic: Topic) -> Self {
        Self {
            pattern: topic.name,
        }
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl FromStr for TopicFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for TopicFilter {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<TopicFilter> for String {
    fn from(filter: TopicFilter) -> Self {
        filter.pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(s: &str) -> Topic {
        Topic::new(s).unwrap()
    }

    fn filter(s: &str) -> TopicFilter {
        TopicFilter::new(s).unwrap()
    }

    #[test]
    fn test_exact_match() {
        assert!(matches("/images/png", "/images/png"));
        assert!(!matches("/images/jpg", "/images/png"));
        assert!(!matches("Images/png", "images/png"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(matches("a/b/c", "a/+/c"));
        assert!(matches("a/b/c", "+/+/+"));
        assert!(!matches("a/b/c", "a/+"));
        assert!(!matches("a", "a/+"));
        assert!(matches("/images", "+/images"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(matches("a/b/c", "a/#"));
        assert!(matches("a/b/c", "#"));
        assert!(matches("a", "#"));
        assert!(!matches("b/c", "a/#"));
    }

    #[test]
    fn test_multi_level_wildcard_matches_parent() {
        assert!(matches("a/b", "a/b/#"));
        assert!(matches("a/b", "a/+/#"));
        assert!(!matches("a", "a/+/#"));
    }

    #[test]
    fn test_multi_level_wildcard_terminates_comparison() {
        assert!(filter("a/#/c").matches(&topic("a/x/y/z")));
        assert!(filter("a/#/c").matches(&topic("a")));
        assert!(!filter("a/#/c").matches(&topic("b/c")));
    }

    #[test]
    fn test_complex_pattern() {
        let f = filter("/images/+/size/#");
        assert!(f.matches(&topic("/images/png/size/large")));
        assert!(f.matches(&topic("/images/jpg/size/small/thumbnail")));
        assert!(!f.matches(&topic("/images/png")));
        assert!(!f.matches(&topic("/images/png/width")));
    }

    #[test]
    fn test_validate_accepts_well_formed_filters() {
        for s in ["a", "a/b", "/a", "+", "#", "a/+/c", "+/+", "a/#", "a/#/b", "+/#"] {
            assert!(validate(s, true).is_ok(), "{s} should be a valid filter");
        }
    }

    #[test]
    fn test_validate_rejects_malformed_filters() {
        for s in ["", "a//b", "a/", "/", "a+", "+a", "a/b#", "#a", "++", "a/+b/c", "a/##"] {
            assert!(
                matches!(validate(s, true), Err(Error::InvalidFilterSyntax(_))),
                "{s:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_rejects_wildcards_in_topic_names() {
        assert!(matches!(validate("a/+", false), Err(Error::InvalidFilterSyntax(_))));
        assert!(matches!(validate("#", false), Err(Error::InvalidFilterSyntax(_))));
        assert!(matches!(Topic::new("a/#"), Err(Error::InvalidTopic(_))));
        assert!(Topic::new("a/b").is_ok());
    }

    #[test]
    fn test_validate_rejects_overlong_input() {
        let long = "a".repeat(MAX_TOPIC_LENGTH + 1);
        assert!(matches!(validate(&long, true), Err(Error::TopicTooLong)));
    }

    #[test]
    fn test_filter_levels() {
        let binding = filter("a/+/#");
        let levels: Vec<_> = binding.levels().collect();
        assert_eq!(
            levels,
            vec![Level::Literal("a"), Level::SingleLevel, Level::MultiLevel]
        );
        assert!(filter("a/+").has_wildcards());
        assert!(!filter("a/b").has_wildcards());
    }

    #[test]
    fn test_serde_revalidates() {
        let f: TopicFilter = serde_json::from_str("\"x/+\"").unwrap();
        assert_eq!(f.pattern(), "x/+");
        assert!(serde_json::from_str::<TopicFilter>("\"x+\"").is_err());
        assert!(serde_json::from_str::<Topic>("\"x/#\"").is_err());
    }
}
