use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::NaiveTime;

use crate::calendar::DayWindow;
use crate::error::{AttendanceError, Result};
use crate::models::{Cohort, Person, PersonStatus, PersonType, RecognitionEvent};

/// Filter for one day of recognition events.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub window: DayWindow,
    /// Resolved through the directory: only events of people in this batch.
    pub cohort: Option<Cohort>,
    pub person_id: Option<String>,
}

impl EventQuery {
    #[cfg(test)]
    pub fn for_day(window: DayWindow) -> Self {
        Self {
            window,
            cohort: None,
            person_id: None,
        }
    }
}

/// An event to append, optionally keyed for idempotent re-delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSubmission {
    pub event: RecognitionEvent,
    /// Events sharing a key with one already stored are skipped.
    pub source_key: Option<String>,
}

impl EventSubmission {
    pub fn keyed(event: RecognitionEvent, source_key: impl Into<String>) -> Self {
        Self {
            event,
            source_key: Some(source_key.into()),
        }
    }
}

impl From<RecognitionEvent> for EventSubmission {
    fn from(event: RecognitionEvent) -> Self {
        Self {
            event,
            source_key: None,
        }
    }
}

/// Append-only log of recognition events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events in the window matching the filters, ordered by timestamp then
    /// person id. No match is an empty vector, never an error.
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<RecognitionEvent>>;

    /// Validates every event, then appends them. Returns how many were stored;
    /// submissions with an already-seen source key are skipped.
    async fn append(&self, submissions: Vec<EventSubmission>) -> Result<usize>;
}

/// Read-only view of enrolled people.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn get_person(&self, person_id: &str) -> Result<Option<Person>>;

    async fn lookup(&self, person_ids: &[String]) -> Result<HashMap<String, Person>>;

    /// Active people, restricted to `cohort` when given.
    async fn eligible(&self, cohort: Option<Cohort>) -> Result<Vec<Person>>;

    /// Every directory entry of one type regardless of status, ordered by id.
    async fn list_people(
        &self,
        person_type: PersonType,
        cohort: Option<Cohort>,
    ) -> Result<Vec<Person>>;
}

/// Face template storage behind the enrollment endpoints.
#[async_trait]
pub trait FaceEnrollment: Send + Sync {
    /// Stores the images as one batch, in order. Returns the number stored.
    async fn store_templates(&self, person_id: &str, images: Vec<Vec<u8>>) -> Result<usize>;

    /// Removes every template for the person. Returns the number removed.
    async fn remove_templates(&self, person_id: &str) -> Result<usize>;
}

/// In-process backend for tests and offline demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    people: RwLock<Vec<Person>>,
    events: RwLock<Vec<RecognitionEvent>>,
    source_keys: RwLock<HashSet<String>>,
    templates: RwLock<HashMap<String, Vec<Vec<u8>>>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new(people: Vec<Person>, events: Vec<RecognitionEvent>) -> Self {
        Self {
            people: RwLock::new(people),
            events: RwLock::new(events),
            ..Self::default()
        }
    }

    /// Demo directory plus a morning of scans on the window's day.
    pub fn demo(window: &DayWindow) -> Self {
        Self::new(demo_people(), demo_events(window))
    }

    /// Simulates an unreachable backend: every call fails until cleared.
    #[cfg(test)]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn upsert_person(&self, person: Person) -> Result<()> {
        self.check_available()?;
        let mut people = self.people.write().map_err(poisoned)?;
        match people.iter_mut().find(|p| p.person_id == person.person_id) {
            Some(existing) => *existing = person,
            None => people.push(person),
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn templates(&self, person_id: &str) -> Vec<Vec<u8>> {
        self.templates
            .read()
            .map(|templates| templates.get(person_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn template_count(&self, person_id: &str) -> usize {
        self.templates(person_id).len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AttendanceError::UpstreamUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> AttendanceError {
    AttendanceError::UpstreamUnavailable("memory store lock poisoned".to_string())
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<RecognitionEvent>> {
        self.check_available()?;
        let cohort_members: Option<Vec<String>> = match query.cohort {
            Some(cohort) => Some(
                self.people
                    .read()
                    .map_err(poisoned)?
                    .iter()
                    .filter(|person| person.cohort == Some(cohort))
                    .map(|person| person.person_id.clone())
                    .collect(),
            ),
            None => None,
        };

        let mut matched: Vec<RecognitionEvent> = self
            .events
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|event| query.window.contains(&event.timestamp))
            .filter(|event| {
                query
                    .person_id
                    .as_ref()
                    .map_or(true, |wanted| &event.person_id == wanted)
            })
            .filter(|event| {
                cohort_members
                    .as_ref()
                    .map_or(true, |members| members.contains(&event.person_id))
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.person_id.cmp(&b.person_id))
                .then_with(|| a.device_id.cmp(&b.device_id))
        });
        Ok(matched)
    }

    async fn append(&self, submissions: Vec<EventSubmission>) -> Result<usize> {
        self.check_available()?;
        for submission in submissions.iter() {
            submission.event.validate()?;
        }

        let mut keys = self.source_keys.write().map_err(poisoned)?;
        let mut events = self.events.write().map_err(poisoned)?;
        let mut stored = 0usize;
        for submission in submissions {
            if let Some(key) = submission.source_key {
                if !keys.insert(key) {
                    continue;
                }
            }
            events.push(submission.event);
            stored += 1;
        }
        Ok(stored)
    }
}

#[async_trait]
impl IdentityDirectory for MemoryStore {
    async fn get_person(&self, person_id: &str) -> Result<Option<Person>> {
        self.check_available()?;
        Ok(self
            .people
            .read()
            .map_err(poisoned)?
            .iter()
            .find(|person| person.person_id == person_id)
            .cloned())
    }

    async fn lookup(&self, person_ids: &[String]) -> Result<HashMap<String, Person>> {
        self.check_available()?;
        Ok(self
            .people
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|person| person_ids.contains(&person.person_id))
            .map(|person| (person.person_id.clone(), person.clone()))
            .collect())
    }

    async fn eligible(&self, cohort: Option<Cohort>) -> Result<Vec<Person>> {
        self.check_available()?;
        Ok(self
            .people
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|person| person.is_eligible(cohort))
            .cloned()
            .collect())
    }

    async fn list_people(
        &self,
        person_type: PersonType,
        cohort: Option<Cohort>,
    ) -> Result<Vec<Person>> {
        self.check_available()?;
        let mut people: Vec<Person> = self
            .people
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|person| person.person_type == person_type)
            .filter(|person| cohort.map_or(true, |wanted| person.cohort == Some(wanted)))
            .cloned()
            .collect();
        people.sort_by(|a, b| a.person_id.cmp(&b.person_id));
        Ok(people)
    }
}

#[async_trait]
impl FaceEnrollment for MemoryStore {
    async fn store_templates(&self, person_id: &str, images: Vec<Vec<u8>>) -> Result<usize> {
        self.check_available()?;
        let count = images.len();
        self.templates
            .write()
            .map_err(poisoned)?
            .entry(person_id.to_string())
            .or_default()
            .extend(images);
        Ok(count)
    }

    async fn remove_templates(&self, person_id: &str) -> Result<usize> {
        self.check_available()?;
        Ok(self
            .templates
            .write()
            .map_err(poisoned)?
            .remove(person_id)
            .map_or(0, |removed| removed.len()))
    }
}

pub fn demo_people() -> Vec<Person> {
    let person = |id: &str, name: &str, cohort: Option<Cohort>, status: PersonStatus| Person {
        person_id: id.to_string(),
        name: name.to_string(),
        person_type: PersonType::from_person_id(id).unwrap_or(PersonType::Student),
        cohort,
        status,
    };

    vec![
        person("STU-001", "Avery Lee", Some(Cohort::S1), PersonStatus::Active),
        person("STU-002", "Jules Moreno", Some(Cohort::S1), PersonStatus::Active),
        person("STU-003", "Kiara Patel", Some(Cohort::S1), PersonStatus::Active),
        person("STU-004", "Noor Haddad", Some(Cohort::S2), PersonStatus::Active),
        person("STU-005", "Tomas Berg", Some(Cohort::S2), PersonStatus::Inactive),
        person("STU-006", "Mei Tanaka", Some(Cohort::S3), PersonStatus::Active),
        person("FAC-001", "Dr. Ruth Okafor", None, PersonStatus::Active),
    ]
}

/// A morning at two gates, including repeat scans and one inactive student.
pub fn demo_events(window: &DayWindow) -> Vec<RecognitionEvent> {
    let scans = [
        ("STU-001", "gate-main", 8, 52, 97.4),
        ("STU-002", "gate-main", 8, 55, 91.2),
        ("STU-001", "gate-lab", 9, 5, 88.9),
        ("FAC-001", "gate-main", 8, 40, 99.1),
        ("STU-004", "gate-lab", 9, 12, 76.5),
        ("STU-005", "gate-main", 9, 20, 93.0),
        ("STU-002", "gate-lab", 13, 2, 94.8),
    ];

    scans
        .iter()
        .filter_map(|(person_id, device_id, hour, minute, confidence)| {
            let since_midnight = NaiveTime::from_hms_opt(*hour, *minute, 0)?
                .signed_duration_since(NaiveTime::MIN);
            Some(RecognitionEvent {
                person_id: person_id.to_string(),
                device_id: device_id.to_string(),
                timestamp: window.start + since_midnight,
                confidence: *confidence,
            })
        })
        .collect()
}
