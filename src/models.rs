use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AttendanceError;

/// Student batch. The set of batches is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Cohort {
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
}

impl Cohort {
    pub const ALL: [Cohort; 6] = [
        Cohort::S1,
        Cohort::S2,
        Cohort::S3,
        Cohort::S4,
        Cohort::S5,
        Cohort::S6,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cohort::S1 => "S1",
            Cohort::S2 => "S2",
            Cohort::S3 => "S3",
            Cohort::S4 => "S4",
            Cohort::S5 => "S5",
            Cohort::S6 => "S6",
        }
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cohort {
    type Err = AttendanceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        Cohort::ALL
            .into_iter()
            .find(|cohort| cohort.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AttendanceError::InvalidParameter(format!("unknown batch '{value}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonType {
    Student,
    Faculty,
}

impl PersonType {
    /// Person ids carry their type as a prefix: `STU-*` or `FAC-*`.
    pub fn from_person_id(person_id: &str) -> Option<Self> {
        if person_id.starts_with("STU-") {
            Some(PersonType::Student)
        } else if person_id.starts_with("FAC-") {
            Some(PersonType::Faculty)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PersonType::Student => "student",
            PersonType::Faculty => "faculty",
        }
    }
}

impl FromStr for PersonType {
    type Err = AttendanceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(PersonType::Student),
            "faculty" => Ok(PersonType::Faculty),
            other => Err(AttendanceError::InvalidParameter(format!(
                "unknown person type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonStatus {
    Active,
    Inactive,
}

impl PersonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonStatus::Active => "active",
            PersonStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for PersonStatus {
    type Err = AttendanceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(PersonStatus::Active),
            "inactive" => Ok(PersonStatus::Inactive),
            other => Err(AttendanceError::InvalidParameter(format!(
                "unknown person status '{other}'"
            ))),
        }
    }
}

/// Directory entry. Owned by the identity directory, only referenced here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub person_id: String,
    pub name: String,
    pub person_type: PersonType,
    #[serde(rename = "batch")]
    pub cohort: Option<Cohort>,
    pub status: PersonStatus,
}

impl Person {
    /// Counted as enrolled: active, and in the requested batch when one is given.
    pub fn is_eligible(&self, cohort: Option<Cohort>) -> bool {
        if self.status != PersonStatus::Active {
            return false;
        }
        match cohort {
            Some(wanted) => self.cohort == Some(wanted),
            None => true,
        }
    }
}

/// One face match produced by an edge device. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    pub person_id: String,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
}

impl RecognitionEvent {
    pub fn validate(&self) -> Result<(), AttendanceError> {
        if self.person_id.trim().is_empty() {
            return Err(AttendanceError::ValidationFailed(
                "recognition event is missing person_id".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.confidence) {
            return Err(AttendanceError::ValidationFailed(format!(
                "confidence {} for {} is outside [0, 100]",
                self.confidence, self.person_id
            )));
        }
        Ok(())
    }
}

/// Raw view row: a recognition event joined with its directory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub person_id: String,
    pub name: Option<String>,
    pub person_type: Option<PersonType>,
    pub batch: Option<Cohort>,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub person_id: String,
    pub name: String,
    pub batch: Option<Cohort>,
    pub first_seen: DateTime<Utc>,
    pub scan_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceReport {
    pub date: NaiveDate,
    pub batch: Option<Cohort>,
    pub total_enrolled: usize,
    pub total_present: usize,
    pub total_absent: usize,
    pub attendance_percentage: f64,
    pub present: Vec<PresenceRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: &str, cohort: Option<Cohort>, status: PersonStatus) -> Person {
        Person {
            person_id: id.to_string(),
            name: id.to_string(),
            person_type: PersonType::from_person_id(id).unwrap_or(PersonType::Student),
            cohort,
            status,
        }
    }

    #[test]
    fn cohort_parses_case_insensitively() {
        assert_eq!("s3".parse::<Cohort>().unwrap(), Cohort::S3);
        assert_eq!(" S6 ".parse::<Cohort>().unwrap(), Cohort::S6);
        assert!(matches!(
            "S7".parse::<Cohort>(),
            Err(AttendanceError::InvalidParameter(_))
        ));
    }

    #[test]
    fn person_type_follows_id_prefix() {
        assert_eq!(
            PersonType::from_person_id("STU-001"),
            Some(PersonType::Student)
        );
        assert_eq!(
            PersonType::from_person_id("FAC-014"),
            Some(PersonType::Faculty)
        );
        assert_eq!(PersonType::from_person_id("guest"), None);
    }

    #[test]
    fn eligibility_requires_active_and_matching_batch() {
        let active = person("STU-1", Some(Cohort::S1), PersonStatus::Active);
        let inactive = person("STU-2", Some(Cohort::S1), PersonStatus::Inactive);
        assert!(active.is_eligible(Some(Cohort::S1)));
        assert!(active.is_eligible(None));
        assert!(!active.is_eligible(Some(Cohort::S2)));
        assert!(!inactive.is_eligible(Some(Cohort::S1)));
        assert!(!inactive.is_eligible(None));
    }

    #[test]
    fn events_outside_confidence_range_are_rejected() {
        let mut event = RecognitionEvent {
            person_id: "STU-1".to_string(),
            device_id: "gate-a".to_string(),
            timestamp: Utc::now(),
            confidence: 101.0,
        };
        assert!(event.validate().is_err());
        event.confidence = 87.5;
        assert!(event.validate().is_ok());
        event.person_id = " ".to_string();
        assert!(event.validate().is_err());
    }

    #[test]
    fn person_serializes_cohort_as_batch() {
        let json = serde_json::to_value(person("STU-9", Some(Cohort::S2), PersonStatus::Active))
            .unwrap();
        assert_eq!(json["batch"], "S2");
        assert_eq!(json["person_type"], "student");
        assert_eq!(json["status"], "active");
    }
}
