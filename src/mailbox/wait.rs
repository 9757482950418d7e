use crate::message::ArrivedMessage;
use crate::topic::TopicFilter;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// How long a blocking mailbox call may park; a negative millisecond count
/// means forever
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until the call can complete
    Never,
    /// Give up after the given duration; `Duration::ZERO` never parks
    After(Duration),
}

impl Timeout {
    /// Check once and return without parking
    pub const IMMEDIATE: Timeout = Timeout::After(Duration::ZERO);

    pub fn from_millis(millis: i64) -> Self {
        if millis < 0 {
            Timeout::Never
        } else {
            Timeout::After(Duration::from_millis(millis as u64))
        }
    }

    pub(crate) fn deadline(self) -> Deadline {
        match self {
            Timeout::Never => Deadline::Never,
            // An unrepresentable instant is as good as forever
            Timeout::After(d) => Instant::now()
                .checked_add(d)
                .map_or(Deadline::Never, Deadline::At),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::After(duration)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(duration: Option<Duration>) -> Self {
        duration.map_or(Timeout::Never, Timeout::After)
    }
}

impl From<i64> for Timeout {
    fn from(millis: i64) -> Self {
        Timeout::from_millis(millis)
    }
}

/// Absolute end of a wait, fixed when the call starts
#[derive(Debug, Clone, Copy)]
pub(crate) enum Deadline {
    Never,
    At(Instant),
}

/// Condition a non-consuming wait blocks on
#[derive(Debug, Clone, Copy)]
pub(crate) enum Query<'a> {
    /// At least one message is buffered
    Any,
    /// Some message matches the filter
    One(&'a TopicFilter),
    /// Every filter is matched by some message; the set is never empty
    All(&'a [TopicFilter]),
}

impl<'a> Query<'a> {
    pub(crate) fn is_satisfied(&self, messages: &VecDeque<ArrivedMessage>) -> bool {
        match self {
            Query::Any => !messages.is_empty(),
            Query::One(filter) => any_match(messages, filter),
            Query::All(filters) => filters.iter().all(|f| any_match(messages, f)),
        }
    }
}

pub(crate) fn any_match(messages: &VecDeque<ArrivedMessage>, filter: &TopicFilter) -> bool {
    messages.iter().any(|m| filter.matches(m.topic()))
}

/// Index of the oldest message matching `filter`, or of the oldest message
pub(crate) fn locate(messages: &VecDeque<ArrivedMessage>, filter: Option<&TopicFilter>) -> Option<usize> {
    match filter {
        None if messages.is_empty() => None,
        None => Some(0),
        Some(filter) => messages.iter().position(|m| filter.matches(m.topic())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_millis() {
        assert_eq!(Timeout::from_millis(-1), Timeout::Never);
        assert_eq!(Timeout::from_millis(0), Timeout::IMMEDIATE);
        assert_eq!(
            Timeout::from_millis(250),
            Timeout::After(Duration::from_millis(250))
        );
        assert_eq!(Timeout::from(None::<Duration>), Timeout::Never);
    }

    #[test]
    fn test_huge_timeout_never_expires() {
        assert!(matches!(
            Timeout::After(Duration::MAX).deadline(),
            Deadline::Never
        ));
    }
}
