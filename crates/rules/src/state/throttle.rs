//! Sliding-window action-count accounting.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Execution history of one rule instance and the window it is throttled by.
///
/// `window` holds the timestamps that still count against the limit; `all`
/// is the lifetime history and is never evicted.
#[derive(Debug, Clone)]
pub(crate) struct SlidingWindowThrottle {
    limit: u32,
    span: Option<chrono::Duration>,
    window: VecDeque<DateTime<Utc>>,
    all: Vec<DateTime<Utc>>,
}

impl SlidingWindowThrottle {
    pub(crate) fn new(limit: u32, span: Option<Duration>) -> Self {
        Self {
            limit,
            span: span.map(|d| chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)),
            window: VecDeque::new(),
            all: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, at: DateTime<Utc>) {
        self.window.push_back(at);
        self.all.push(at);
    }

    /// Drop every window entry strictly older than `now - span`.
    ///
    /// Without a configured span nothing is evicted.
    pub(crate) fn evict(&mut self, now: DateTime<Utc>) {
        let Some(cutoff) = self.cutoff(now) else {
            return;
        };
        while let Some(front) = self.window.front() {
            if *front < cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether the limit is reached by the entries currently held.
    ///
    /// Call [`evict`](Self::evict) first to get the answer for a given instant.
    pub(crate) fn is_throttled(&self) -> bool {
        self.span.is_some() && self.window.len() >= self.limit as usize
    }

    pub(crate) fn window_timestamps(&self) -> Vec<DateTime<Utc>> {
        self.window.iter().copied().collect()
    }

    pub(crate) fn lifetime_len(&self) -> usize {
        self.all.len()
    }

    pub(crate) fn all_timestamps(&self) -> Vec<DateTime<Utc>> {
        self.all.clone()
    }

    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.span.and_then(|span| now.checked_sub_signed(span))
    }
}

/// Number of `timestamps` that would survive eviction at `now`.
pub(crate) fn count_in_window(
    timestamps: &[DateTime<Utc>],
    span: Option<Duration>,
    now: DateTime<Utc>,
) -> usize {
    let cutoff = span
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .and_then(|d| now.checked_sub_signed(d));
    match cutoff {
        Some(cutoff) => timestamps.iter().filter(|t| **t >= cutoff).count(),
        None => timestamps.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn evicts_only_entries_strictly_older_than_cutoff() {
        let mut t = SlidingWindowThrottle::new(10, Some(Duration::from_secs(2)));
        t.record(at(0));
        t.record(at(1));
        t.record(at(2));

        // cutoff = 2s - 2s = 0s; the entry at exactly 0s stays.
        t.evict(at(2));
        assert_eq!(t.window_timestamps().len(), 3);

        t.evict(at(3));
        assert_eq!(t.window_timestamps(), vec![at(1), at(2)]);
        assert_eq!(t.all_timestamps().len(), 3);
    }

    #[test]
    fn no_span_never_evicts_or_throttles() {
        let mut t = SlidingWindowThrottle::new(1, None);
        t.record(at(0));
        t.record(at(1));
        t.evict(at(10_000));
        assert_eq!(t.window_timestamps().len(), 2);
        assert!(!t.is_throttled());
    }

    #[test]
    fn zero_limit_with_span_is_always_throttled() {
        let t = SlidingWindowThrottle::new(0, Some(Duration::from_secs(60)));
        assert!(t.is_throttled());
    }

    #[test]
    fn count_in_window_matches_eviction() {
        let ts = vec![at(0), at(5), at(9)];
        assert_eq!(count_in_window(&ts, Some(Duration::from_secs(5)), at(10)), 2);
        assert_eq!(count_in_window(&ts, None, at(10)), 3);
    }
}
