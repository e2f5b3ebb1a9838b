use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::calendar::DayWindow;
use crate::error::{AttendanceError, Result};
use crate::models::RecognitionEvent;

/// Which recognitions count at all. Applied once, before either read view is built.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ConfidencePolicy {
    #[default]
    AcceptAll,
    MinConfidence(f64),
}

impl ConfidencePolicy {
    pub fn at_least(threshold: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&threshold) {
            return Err(AttendanceError::InvalidParameter(format!(
                "minimum confidence {threshold} is outside [0, 100]"
            )));
        }
        Ok(ConfidencePolicy::MinConfidence(threshold))
    }

    pub fn admits(&self, event: &RecognitionEvent) -> bool {
        match self {
            ConfidencePolicy::AcceptAll => true,
            ConfidencePolicy::MinConfidence(threshold) => event.confidence >= *threshold,
        }
    }

    pub fn apply(&self, events: Vec<RecognitionEvent>) -> Vec<RecognitionEvent> {
        events.into_iter().filter(|event| self.admits(event)).collect()
    }
}

/// Per-person presence on one day, before directory enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceTally {
    pub person_id: String,
    pub first_seen: DateTime<Utc>,
    pub scan_count: usize,
}

/// Collapses a day's events into one tally per distinct person.
///
/// Output is ordered by `first_seen`, then `person_id`, so identical input
/// always yields identical output regardless of event arrival order.
pub fn aggregate(events: &[RecognitionEvent], window: &DayWindow) -> Vec<PresenceTally> {
    let mut tallies: BTreeMap<&str, PresenceTally> = BTreeMap::new();

    for event in events.iter() {
        if !window.contains(&event.timestamp) {
            continue;
        }

        let entry = tallies
            .entry(event.person_id.as_str())
            .or_insert_with(|| PresenceTally {
                person_id: event.person_id.clone(),
                first_seen: event.timestamp,
                scan_count: 0,
            });

        entry.scan_count += 1;
        if event.timestamp < entry.first_seen {
            entry.first_seen = event.timestamp;
        }
    }

    let mut values: Vec<PresenceTally> = tallies.into_values().collect();
    values.sort_by(|a, b| {
        a.first_seen
            .cmp(&b.first_seen)
            .then_with(|| a.person_id.cmp(&b.person_id))
    });
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, TimeZone};

    fn window() -> DayWindow {
        DayWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    fn event(person_id: &str, hour: u32, minute: u32, confidence: f64) -> RecognitionEvent {
        RecognitionEvent {
            person_id: person_id.to_string(),
            device_id: "gate-a".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 10, hour, minute, 0).unwrap(),
            confidence,
        }
    }

    #[test]
    fn duplicate_scans_collapse_to_one_tally() {
        let events = vec![
            event("p1", 9, 5, 90.0),
            event("p2", 9, 10, 90.0),
            event("p1", 9, 0, 90.0),
        ];
        let tallies = aggregate(&events, &window());
        assert_eq!(tallies.len(), 2);
        assert_eq!(tallies[0].person_id, "p1");
        assert_eq!(tallies[0].scan_count, 2);
        assert_eq!(tallies[0].first_seen, event("p1", 9, 0, 0.0).timestamp);
        assert_eq!(tallies[1].person_id, "p2");
        assert_eq!(tallies[1].scan_count, 1);
    }

    #[test]
    fn identical_first_seen_orders_by_person_id() {
        let events = vec![event("p9", 8, 0, 90.0), event("p3", 8, 0, 90.0)];
        let tallies = aggregate(&events, &window());
        let ids: Vec<&str> = tallies.iter().map(|t| t.person_id.as_str()).collect();
        assert_eq!(ids, vec!["p3", "p9"]);
    }

    #[test]
    fn output_is_independent_of_input_order() {
        let mut events = vec![
            event("p2", 10, 0, 90.0),
            event("p1", 9, 0, 90.0),
            event("p3", 9, 30, 90.0),
            event("p1", 11, 0, 90.0),
        ];
        let forward = aggregate(&events, &window());
        events.reverse();
        assert_eq!(forward, aggregate(&events, &window()));
    }

    #[test]
    fn events_outside_the_day_are_ignored() {
        let mut late = event("p1", 9, 0, 90.0);
        late.timestamp = Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap();
        assert!(aggregate(&[late], &window()).is_empty());
    }

    #[test]
    fn confidence_policy_filters_low_scores() {
        let policy = ConfidencePolicy::at_least(80.0).unwrap();
        let kept = policy.apply(vec![event("p1", 9, 0, 79.9), event("p2", 9, 0, 80.0)]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].person_id, "p2");
        assert!(ConfidencePolicy::at_least(-1.0).is_err());
        assert!(ConfidencePolicy::AcceptAll.admits(&event("p1", 9, 0, 0.0)));
    }
}
