use std::collections::HashMap;
use std::fmt::Write;

use chrono::{FixedOffset, NaiveDate};

use crate::aggregate::PresenceTally;
use crate::models::{AttendanceReport, Cohort, Person, PresenceRecord};

/// Joins presence tallies with the eligible directory population.
///
/// Tallies for people outside `eligible` (inactive, deleted, or in another
/// batch) are dropped: they appear neither in `present` nor in
/// `total_present`. Recognitions of stale enrollments therefore never inflate
/// the attendance figure.
pub fn build_report(
    date: NaiveDate,
    cohort: Option<Cohort>,
    tallies: &[PresenceTally],
    eligible: &[Person],
) -> AttendanceReport {
    let by_id: HashMap<&str, &Person> = eligible
        .iter()
        .map(|person| (person.person_id.as_str(), person))
        .collect();

    let present: Vec<PresenceRecord> = tallies
        .iter()
        .filter_map(|tally| {
            by_id
                .get(tally.person_id.as_str())
                .map(|person| PresenceRecord {
                    person_id: tally.person_id.clone(),
                    name: person.name.clone(),
                    batch: person.cohort,
                    first_seen: tally.first_seen,
                    scan_count: tally.scan_count,
                })
        })
        .collect();

    let total_enrolled = by_id.len();
    let total_present = present.len();

    AttendanceReport {
        date,
        batch: cohort,
        total_enrolled,
        total_present,
        total_absent: total_enrolled.saturating_sub(total_present),
        attendance_percentage: attendance_percentage(total_present, total_enrolled),
        present,
    }
}

/// `present / enrolled * 100`, rounded half-up to two decimals, clamped to [0, 100].
pub fn attendance_percentage(present: usize, enrolled: usize) -> f64 {
    if enrolled == 0 {
        return 0.0;
    }
    let present = present.min(enrolled) as u128;
    let enrolled = enrolled as u128;
    // Hundredths of a percent, rounded half-up in integer arithmetic.
    let hundredths = (present * 10_000 * 2 + enrolled) / (enrolled * 2);
    hundredths as f64 / 100.0
}

pub fn render_markdown(report: &AttendanceReport, offset: FixedOffset) -> String {
    let mut output = String::new();
    let batch_label = report
        .batch
        .map(|cohort| cohort.to_string())
        .unwrap_or_else(|| "all batches".to_string());

    let _ = writeln!(output, "# Attendance Report");
    let _ = writeln!(output, "Generated for {} on {}", batch_label, report.date);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Enrolled: {}", report.total_enrolled);
    let _ = writeln!(output, "- Present: {}", report.total_present);
    let _ = writeln!(output, "- Absent: {}", report.total_absent);
    let _ = writeln!(
        output,
        "- Attendance rate: {:.2}%",
        report.attendance_percentage
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Present");

    if report.present.is_empty() {
        let _ = writeln!(output, "No attendance recorded for this date.");
    } else {
        for record in report.present.iter() {
            let batch = record
                .batch
                .map(|cohort| cohort.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                output,
                "- {} ({}, {}) first seen {} across {} scans",
                record.name,
                record.person_id,
                batch,
                record.first_seen.with_timezone(&offset).format("%H:%M:%S"),
                record.scan_count
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PersonStatus, PersonType};
    use chrono::{TimeZone, Utc};

    fn student(id: &str, cohort: Cohort) -> Person {
        Person {
            person_id: id.to_string(),
            name: format!("Student {id}"),
            person_type: PersonType::Student,
            cohort: Some(cohort),
            status: PersonStatus::Active,
        }
    }

    fn tally(id: &str, minute: u32, scans: usize) -> PresenceTally {
        PresenceTally {
            person_id: id.to_string(),
            first_seen: Utc.with_ymd_and_hms(2024, 1, 10, 9, minute, 0).unwrap(),
            scan_count: scans,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
    }

    #[test]
    fn two_of_three_present() {
        let eligible = vec![
            student("p1", Cohort::S1),
            student("p2", Cohort::S1),
            student("p3", Cohort::S1),
        ];
        let tallies = vec![tally("p1", 0, 2), tally("p2", 10, 1)];
        let report = build_report(date(), Some(Cohort::S1), &tallies, &eligible);

        assert_eq!(report.total_enrolled, 3);
        assert_eq!(report.total_present, 2);
        assert_eq!(report.total_absent, 1);
        assert_eq!(report.attendance_percentage, 66.67);
        assert_eq!(report.present[0].person_id, "p1");
        assert_eq!(report.present[0].scan_count, 2);
        assert_eq!(report.present[1].person_id, "p2");
    }

    #[test]
    fn unknown_people_are_excluded_from_presence() {
        let eligible = vec![student("p1", Cohort::S1)];
        let tallies = vec![tally("p1", 0, 1), tally("other-batch", 1, 4)];
        let report = build_report(date(), Some(Cohort::S1), &tallies, &eligible);

        assert_eq!(report.total_present, 1);
        assert_eq!(report.present.len(), 1);
        assert_eq!(report.attendance_percentage, 100.0);
    }

    #[test]
    fn empty_directory_reports_zero_without_dividing() {
        let report = build_report(date(), None, &[tally("p1", 0, 1)], &[]);
        assert_eq!(report.total_enrolled, 0);
        assert_eq!(report.total_present, 0);
        assert_eq!(report.total_absent, 0);
        assert_eq!(report.attendance_percentage, 0.0);
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(attendance_percentage(1, 3), 33.33);
        assert_eq!(attendance_percentage(2, 3), 66.67);
        // 1/8 = 12.5% exactly; 1/16 = 6.25%; 1/32 = 3.125% rounds up to 3.13.
        assert_eq!(attendance_percentage(1, 8), 12.5);
        assert_eq!(attendance_percentage(1, 32), 3.13);
        assert_eq!(attendance_percentage(0, 5), 0.0);
        assert_eq!(attendance_percentage(5, 5), 100.0);
    }

    #[test]
    fn percentage_stays_within_bounds() {
        for enrolled in 0..40 {
            for present in 0..=enrolled + 2 {
                let value = attendance_percentage(present, enrolled);
                assert!((0.0..=100.0).contains(&value));
                assert_eq!(value == 0.0, enrolled == 0 || present == 0);
            }
        }
    }

    #[test]
    fn markdown_lists_present_people() {
        let eligible = vec![student("p1", Cohort::S2)];
        let report = build_report(date(), Some(Cohort::S2), &[tally("p1", 5, 3)], &eligible);
        let text = render_markdown(&report, FixedOffset::east_opt(0).unwrap());

        assert!(text.contains("Generated for S2 on 2024-01-10"));
        assert!(text.contains("- Attendance rate: 100.00%"));
        assert!(text.contains("Student p1 (p1, S2) first seen 09:05:00 across 3 scans"));
    }

    #[test]
    fn markdown_notes_empty_days() {
        let report = build_report(date(), None, &[], &[student("p1", Cohort::S1)]);
        let text = render_markdown(&report, FixedOffset::east_opt(0).unwrap());
        assert!(text.contains("Generated for all batches"));
        assert!(text.contains("No attendance recorded for this date."));
    }
}
