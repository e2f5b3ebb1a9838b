use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate};
use tracing::debug;

use crate::aggregate::{self, ConfidencePolicy};
use crate::calendar::DayWindow;
use crate::error::{AttendanceError, Result};
use crate::models::{AttendanceRecord, AttendanceReport, Cohort, Person, PersonType, RecognitionEvent};
use crate::report;
use crate::store::{EventQuery, EventStore, IdentityDirectory};

/// Serves the raw and aggregated attendance views.
///
/// Both views load events through [`QueryService::load_events`] with the same
/// filter and confidence policy, so every person present in a report has at
/// least one row in the raw view for the same date and batch. Nothing is
/// cached; each call reads the stores afresh.
#[derive(Clone)]
pub struct QueryService {
    events: Arc<dyn EventStore>,
    directory: Arc<dyn IdentityDirectory>,
    policy: ConfidencePolicy,
    utc_offset: FixedOffset,
}

impl QueryService {
    pub fn new(
        events: Arc<dyn EventStore>,
        directory: Arc<dyn IdentityDirectory>,
        policy: ConfidencePolicy,
        utc_offset: FixedOffset,
    ) -> Self {
        Self {
            events,
            directory,
            policy,
            utc_offset,
        }
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    pub fn window(&self, date: NaiveDate) -> DayWindow {
        DayWindow::new(date, self.utc_offset)
    }

    /// Raw recognition events for the day, enriched from the directory.
    pub async fn get_records(
        &self,
        date: NaiveDate,
        cohort: Option<Cohort>,
        person_id: Option<&str>,
    ) -> Result<Vec<AttendanceRecord>> {
        let query = EventQuery {
            window: self.window(date),
            cohort,
            person_id: person_id.map(str::to_string),
        };
        let events = self.load_events(&query).await?;

        let mut person_ids: Vec<String> = events.iter().map(|e| e.person_id.clone()).collect();
        person_ids.sort();
        person_ids.dedup();
        let people = self.directory.lookup(&person_ids).await?;

        let records = events
            .into_iter()
            .map(|event| {
                let person = people.get(&event.person_id);
                AttendanceRecord {
                    name: person.map(|p| p.name.clone()),
                    person_type: person
                        .map(|p| p.person_type)
                        .or_else(|| PersonType::from_person_id(&event.person_id)),
                    batch: person.and_then(|p| p.cohort),
                    person_id: event.person_id,
                    timestamp: event.timestamp,
                    confidence: event.confidence,
                    device_id: event.device_id,
                }
            })
            .collect::<Vec<_>>();

        debug!(%date, ?cohort, records = records.len(), "served attendance records");
        Ok(records)
    }

    /// Attendance report for the day and optional batch.
    pub async fn get_report(
        &self,
        date: NaiveDate,
        cohort: Option<Cohort>,
    ) -> Result<AttendanceReport> {
        let query = EventQuery {
            window: self.window(date),
            cohort,
            person_id: None,
        };
        let events = self.load_events(&query).await?;
        let eligible = self.directory.eligible(cohort).await?;

        let tallies = aggregate::aggregate(&events, &query.window);
        let report = report::build_report(date, cohort, &tallies, &eligible);

        debug!(
            %date,
            ?cohort,
            enrolled = report.total_enrolled,
            present = report.total_present,
            "built attendance report"
        );
        Ok(report)
    }

    /// Direct directory lookup; an unknown id is `NotFound`.
    pub async fn get_person(&self, person_id: &str) -> Result<Person> {
        self.directory
            .get_person(person_id)
            .await?
            .ok_or_else(|| AttendanceError::NotFound(format!("person {person_id}")))
    }

    /// Directory listing of one person type, optionally within a batch.
    pub async fn list_people(
        &self,
        person_type: PersonType,
        cohort: Option<Cohort>,
    ) -> Result<Vec<Person>> {
        self.directory.list_people(person_type, cohort).await
    }

    async fn load_events(&self, query: &EventQuery) -> Result<Vec<RecognitionEvent>> {
        let events = self.events.query_events(query).await?;
        Ok(self.policy.apply(events))
    }
}
