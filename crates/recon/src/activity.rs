//! Recent-activity observations and the source contract.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::error::ReconError;

/// Half-open lookback window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ActivityWindow {
    /// The `window_days` days ending (exclusively) at `now`.
    pub fn ending_at(now: DateTime<Utc>, window_days: u32) -> Self {
        Self {
            start: now - Duration::days(i64::from(window_days)),
            end: now,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Most recent in-window timestamp per terminal ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityObservations {
    latest: BTreeMap<String, DateTime<Utc>>,
}

impl ActivityObservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group events by terminal and keep the max timestamp, dropping
    /// events outside `window` and blank IDs.
    pub fn from_events<I, S>(events: I, window: &ActivityWindow) -> Self
    where
        I: IntoIterator<Item = (S, DateTime<Utc>)>,
        S: AsRef<str>,
    {
        let mut obs = Self::new();
        for (terminal_id, at) in events {
            if window.contains(at) {
                obs.observe(terminal_id.as_ref(), at);
            }
        }
        obs
    }

    /// Record one event; keeps the later of the stored and new timestamps.
    pub fn observe(&mut self, terminal_id: &str, at: DateTime<Utc>) {
        let id = crate::snapshot::normalize_id(terminal_id);
        if id.is_empty() {
            return;
        }
        self.latest
            .entry(id)
            .and_modify(|t| {
                if at > *t {
                    *t = at;
                }
            })
            .or_insert(at);
    }

    pub fn get(&self, terminal_id: &str) -> Option<DateTime<Utc>> {
        self.latest.get(terminal_id).copied()
    }

    pub fn contains(&self, terminal_id: &str) -> bool {
        self.latest.contains_key(terminal_id)
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        self.latest.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// External transaction log queried for recent terminal activity.
///
/// An empty result is a valid answer ("no recent activity"); only an
/// unreachable store is an error, reported as `SourceUnavailable`.
pub trait ActivitySource {
    fn query_recent_activity(&self, window: &ActivityWindow) -> Result<ActivityObservations, ReconError>;

    /// Short label for logs ("csv:events.csv", "http:host").
    fn describe(&self) -> String;
}

/// Source for snapshot-only runs.
pub struct NoActivity;

impl ActivitySource for NoActivity {
    fn query_recent_activity(&self, _window: &ActivityWindow) -> Result<ActivityObservations, ReconError> {
        Err(ReconError::SourceUnavailable("activity source disabled".into()))
    }

    fn describe(&self) -> String {
        "none".into()
    }
}

/// Query `source`, degrading to `None` when it is unavailable.
///
/// Any other error is returned to the caller unchanged.
pub fn query_or_degrade(
    source: &dyn ActivitySource,
    window: &ActivityWindow,
) -> Result<Option<ActivityObservations>, ReconError> {
    match source.query_recent_activity(window) {
        Ok(obs) => {
            log::info!("{}: {} terminals active in window", source.describe(), obs.len());
            Ok(Some(obs))
        }
        Err(ReconError::SourceUnavailable(msg)) => {
            log::warn!(
                "{}: {msg}; falling back to snapshot status",
                source.describe()
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
