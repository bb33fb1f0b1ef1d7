//! Deterministic top-K ranking
//!
//! Order: primary metric descending, then entity key ascending, then a per-type
//! secondary key ascending. The comparison is total, so identical input always
//! yields the identical output sequence, ties included.

use crate::domain::{EntityKey, Limit, Session};
use chrono::{DateTime, TimeDelta, Utc};
use std::cmp::Ordering;

/// Something that can be ranked by a metric
pub trait Ranked {
    type Metric: Ord;
    type Tiebreak: Ord;

    /// Primary metric, larger ranks first
    fn metric(&self) -> Self::Metric;

    /// Entity key, first tie-break (ascending)
    fn key(&self) -> &EntityKey;

    /// Final tie-break (ascending)
    fn tiebreak(&self) -> Self::Tiebreak;
}

/// Ranking order between two items
pub fn rank_order<T: Ranked>(a: &T, b: &T) -> Ordering {
    b.metric()
        .cmp(&a.metric())
        .then_with(|| a.key().cmp(b.key()))
        .then_with(|| a.tiebreak().cmp(&b.tiebreak()))
}

/// Keep the best `limit` items in ranking order.
///
/// Uses partial selection so only the retained prefix is fully sorted.
pub fn top_k<T: Ranked>(mut items: Vec<T>, limit: Limit) -> Vec<T> {
    let k = limit.get();
    if k == 0 {
        return Vec::new();
    }
    if items.len() > k {
        items.select_nth_unstable_by(k - 1, rank_order);
        items.truncate(k);
    }
    items.sort_by(rank_order);
    items
}

impl Ranked for Session {
    // Open sessions have no duration and rank after every closed one
    type Metric = Option<TimeDelta>;
    type Tiebreak = (DateTime<Utc>, Option<DateTime<Utc>>);

    fn metric(&self) -> Self::Metric {
        self.duration()
    }

    fn key(&self) -> &EntityKey {
        &self.key
    }

    fn tiebreak(&self) -> Self::Tiebreak {
        (self.entry_time, self.exit_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        key: EntityKey,
        value: u64,
    }

    impl Ranked for Row {
        type Metric = u64;
        type Tiebreak = ();

        fn metric(&self) -> u64 {
            self.value
        }

        fn key(&self) -> &EntityKey {
            &self.key
        }

        fn tiebreak(&self) {}
    }

    fn row(region: &str, plate: &str, value: u64) -> Row {
        Row { key: EntityKey::parse(region, plate).unwrap(), value }
    }

    #[test]
    fn test_descending_metric_then_key() {
        let rows = vec![row("F", "B", 5), row("D", "Z", 9), row("F", "A", 5), row("A", "A", 1)];
        let ranked = top_k(rows, Limit::new(10).unwrap());

        let order: Vec<String> = ranked.iter().map(|r| r.key.to_string()).collect();
        assert_eq!(order, vec!["D/Z", "F/A", "F/B", "A/A"]);
    }

    #[test]
    fn test_limit_truncates_after_ordering() {
        let rows: Vec<Row> = (0..100).map(|i| row("D", &format!("P{:03}", i), i % 7)).collect();
        let ranked = top_k(rows.clone(), Limit::new(5).unwrap());

        let mut expected = rows;
        expected.sort_by(rank_order);
        expected.truncate(5);
        assert_eq!(ranked, expected);
    }

    #[test]
    fn test_zero_limit_is_empty() {
        let rows = vec![row("D", "A", 1)];
        assert!(top_k(rows, Limit::new(0).unwrap()).is_empty());
    }

    #[test]
    fn test_ranking_is_input_order_independent() {
        let rows = vec![row("D", "B", 3), row("D", "A", 3), row("I", "A", 3), row("A", "C", 4)];
        let mut reversed = rows.clone();
        reversed.reverse();

        let limit = Limit::new(3).unwrap();
        assert_eq!(top_k(rows, limit), top_k(reversed, limit));
    }

    #[test]
    fn test_sessions_rank_by_duration_with_open_last() {
        let key = EntityKey::parse("D", "X1").unwrap();
        let t = |h: u32| Utc.with_ymd_and_hms(2025, 1, 1, h, 0, 0).unwrap();
        let sessions = vec![
            Session::open(key.clone(), t(1)),
            Session::closed(key.clone(), t(2), t(4)),
            Session::closed(key.clone(), t(0), t(5)),
            Session::closed(key.clone(), t(6), t(8)),
        ];

        let ranked = top_k(sessions, Limit::new(4).unwrap());
        let entries: Vec<_> = ranked.iter().map(|s| s.entry_time).collect();
        assert_eq!(entries, vec![t(0), t(2), t(6), t(1)]);
    }

    #[test]
    fn test_sub_second_difference_decides_rank() {
        let key = EntityKey::parse("D", "X1").unwrap();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let short = Session::closed(key.clone(), t0, t0 + TimeDelta::milliseconds(1_100));
        let long = Session::closed(key, t0 + TimeDelta::seconds(10), t0 + TimeDelta::milliseconds(11_900));
        assert_eq!(short.duration_secs, long.duration_secs);

        let ranked = top_k(vec![short, long.clone()], Limit::new(1).unwrap());
        assert_eq!(ranked, vec![long]);
    }
}
