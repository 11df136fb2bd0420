use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

/// Counts consecutive failures per source and lets one notification through
/// once a source has failed `after_failures` times in a row. Nothing more is
/// sent for that source until it succeeds again.
#[derive(Debug)]
pub struct Notifier {
    after_failures: u32,
    failures: HashMap<&'static str, u32>,
    notified: HashSet<&'static str>,
}

impl Notifier {
    pub fn new(after_failures: u32) -> Self {
        Self {
            after_failures: after_failures.max(1),
            failures: HashMap::new(),
            notified: HashSet::new(),
        }
    }

    pub fn failure(&mut self, source: &'static str, message: impl std::fmt::Display) -> Option<Notification> {
        let count = self.failures.entry(source).or_default();
        *count += 1;

        if *count < self.after_failures || !self.notified.insert(source) {
            return None;
        }

        Some(Notification {
            title: format!("Fronius Solar Fehler, {source}"),
            message: message.to_string(),
        })
    }

    /// Returns true when this ends an outage that was notified.
    pub fn success(&mut self, source: &'static str) -> bool {
        self.failures.remove(source);
        self.notified.remove(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_notification_per_outage() {
        let mut notifier = Notifier::new(3);

        assert_eq!(notifier.failure("handle_rate", "e1"), None);
        assert_eq!(notifier.failure("handle_rate", "e2"), None);
        assert_eq!(
            notifier.failure("handle_rate", "e3"),
            Some(Notification {
                title: "Fronius Solar Fehler, handle_rate".to_owned(),
                message: "e3".to_owned(),
            })
        );
        assert_eq!(notifier.failure("handle_rate", "e4"), None);

        assert!(notifier.success("handle_rate"));
        assert!(!notifier.success("handle_rate"));

        assert_eq!(notifier.failure("handle_rate", "e5"), None);
    }

    #[test]
    fn sources_are_independent() {
        let mut notifier = Notifier::new(1);

        assert!(notifier.failure("reconnect", "down").is_some());
        assert!(notifier.failure("handle_rate", "bad").is_some());
        assert!(notifier.failure("reconnect", "still down").is_none());
    }
}
