use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::calendar::DayWindow;
use crate::error::{AttendanceError, Result};
use crate::models::{Cohort, Person, PersonStatus, PersonType, RecognitionEvent};
use crate::store::{
    self, EventQuery, EventStore, EventSubmission, FaceEnrollment, IdentityDirectory,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed event log, directory and template store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn upsert_person(&self, person: &Person) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO attendance.persons (person_id, full_name, person_type, cohort, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (person_id) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                person_type = EXCLUDED.person_type,
                cohort = EXCLUDED.cohort,
                status = EXCLUDED.status
            "#,
        )
        .bind(&person.person_id)
        .bind(&person.name)
        .bind(person.person_type.as_str())
        .bind(person.cohort.map(|cohort| cohort.as_str()))
        .bind(person.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Writes one event; a repeated `source_key` is skipped. Returns whether a row was written.
    async fn insert_event(
        &self,
        event: &RecognitionEvent,
        source_key: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO attendance.recognition_events
            (id, person_id, device_id, occurred_at, confidence, source_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&event.person_id)
        .bind(&event.device_id)
        .bind(event.timestamp)
        .bind(event.confidence)
        .bind(source_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn person_from_row(row: &PgRow) -> Result<Person> {
    let person_type: String = row.try_get("person_type")?;
    let cohort: Option<String> = row.try_get("cohort")?;
    let status: String = row.try_get("status")?;
    Ok(Person {
        person_id: row.try_get("person_id")?,
        name: row.try_get("full_name")?,
        person_type: person_type.parse()?,
        cohort: cohort.as_deref().map(str::parse::<Cohort>).transpose()?,
        status: status.parse()?,
    })
}

fn event_from_row(row: &PgRow) -> Result<RecognitionEvent> {
    Ok(RecognitionEvent {
        person_id: row.try_get("person_id")?,
        device_id: row.try_get("device_id")?,
        timestamp: row.try_get("occurred_at")?,
        confidence: row.try_get("confidence")?,
    })
}

const PERSON_COLUMNS: &str = "person_id, full_name, person_type, cohort, status";

#[async_trait]
impl EventStore for PgStore {
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<RecognitionEvent>> {
        let mut sql = String::from(
            "SELECT e.person_id, e.device_id, e.occurred_at, e.confidence \
             FROM attendance.recognition_events e \
             WHERE e.occurred_at >= $1 AND e.occurred_at < $2",
        );
        let mut next_param = 3;

        if query.cohort.is_some() {
            sql.push_str(&format!(
                " AND e.person_id IN (SELECT p.person_id FROM attendance.persons p WHERE p.cohort = ${next_param})"
            ));
            next_param += 1;
        }
        if query.person_id.is_some() {
            sql.push_str(&format!(" AND e.person_id = ${next_param}"));
        }
        sql.push_str(" ORDER BY e.occurred_at, e.person_id, e.device_id");

        let mut rows = sqlx::query(&sql)
            .bind(query.window.start)
            .bind(query.window.end);

        if let Some(cohort) = query.cohort {
            rows = rows.bind(cohort.as_str());
        }
        if let Some(person_id) = query.person_id.as_deref() {
            rows = rows.bind(person_id);
        }

        let records = rows.fetch_all(&self.pool).await?;
        records.iter().map(event_from_row).collect()
    }

    async fn append(&self, submissions: Vec<EventSubmission>) -> Result<usize> {
        for submission in submissions.iter() {
            submission.event.validate()?;
        }

        let mut inserted = 0usize;
        for submission in submissions.iter() {
            if self
                .insert_event(&submission.event, submission.source_key.as_deref())
                .await?
            {
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

#[async_trait]
impl IdentityDirectory for PgStore {
    async fn get_person(&self, person_id: &str) -> Result<Option<Person>> {
        let row = sqlx::query(&format!(
            "SELECT {PERSON_COLUMNS} FROM attendance.persons WHERE person_id = $1"
        ))
        .bind(person_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(person_from_row).transpose()
    }

    async fn lookup(&self, person_ids: &[String]) -> Result<HashMap<String, Person>> {
        if person_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {PERSON_COLUMNS} FROM attendance.persons WHERE person_id = ANY($1)"
        ))
        .bind(person_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut people = HashMap::with_capacity(rows.len());
        for row in rows.iter() {
            let person = person_from_row(row)?;
            people.insert(person.person_id.clone(), person);
        }
        Ok(people)
    }

    async fn eligible(&self, cohort: Option<Cohort>) -> Result<Vec<Person>> {
        let rows = sqlx::query(&format!(
            "SELECT {PERSON_COLUMNS} FROM attendance.persons \
             WHERE status = 'active' AND ($1::text IS NULL OR cohort = $1) \
             ORDER BY person_id"
        ))
        .bind(cohort.map(|cohort| cohort.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(person_from_row).collect()
    }

    async fn list_people(
        &self,
        person_type: PersonType,
        cohort: Option<Cohort>,
    ) -> Result<Vec<Person>> {
        let rows = sqlx::query(&format!(
            "SELECT {PERSON_COLUMNS} FROM attendance.persons \
             WHERE person_type = $1 AND ($2::text IS NULL OR cohort = $2) \
             ORDER BY person_id"
        ))
        .bind(person_type.as_str())
        .bind(cohort.map(|cohort| cohort.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(person_from_row).collect()
    }
}

#[async_trait]
impl FaceEnrollment for PgStore {
    async fn store_templates(&self, person_id: &str, images: Vec<Vec<u8>>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent enrollments for the same person so positions stay contiguous.
        sqlx::query("SELECT person_id FROM attendance.persons WHERE person_id = $1 FOR UPDATE")
            .bind(person_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AttendanceError::NotFound(format!("person {person_id}")))?;

        let start: i32 = sqlx::query(
            "SELECT COALESCE(MAX(position) + 1, 0) AS next_position \
             FROM attendance.face_templates WHERE person_id = $1",
        )
        .bind(person_id)
        .fetch_one(&mut *tx)
        .await?
        .try_get("next_position")?;

        let count = images.len();
        for (index, image) in images.into_iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO attendance.face_templates (id, person_id, position, image)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(person_id)
            .bind(start + index as i32)
            .bind(image)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(count)
    }

    async fn remove_templates(&self, person_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM attendance.face_templates WHERE person_id = $1")
            .bind(person_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

/// Loads the demo directory and a morning of scans on `window`'s day.
pub async fn seed(store: &PgStore, window: &DayWindow) -> anyhow::Result<usize> {
    for person in store::demo_people().iter() {
        store.upsert_person(person).await?;
    }

    let submissions: Vec<EventSubmission> = store::demo_events(window)
        .into_iter()
        .enumerate()
        .map(|(index, event)| {
            EventSubmission::keyed(event, format!("seed-{}-{:03}", window.date, index + 1))
        })
        .collect();
    Ok(store.append(submissions).await?)
}

pub async fn import_events_csv(
    store: &PgStore,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        person_id: String,
        device_id: String,
        timestamp: DateTime<Utc>,
        confidence: f64,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut submissions = Vec::new();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let event = RecognitionEvent {
            person_id: row.person_id,
            device_id: row.device_id,
            timestamp: row.timestamp,
            confidence: row.confidence,
        };
        if let Err(err) = event.validate() {
            warn!(row = line + 1, error = %err, "skipping invalid recognition event");
            continue;
        }

        let source_key = row
            .source_key
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        submissions.push(EventSubmission::keyed(event, source_key));
    }

    let inserted = store.append(submissions).await?;
    info!(inserted, path = %csv_path.display(), "imported recognition events");
    Ok(inserted)
}

pub async fn import_people_csv(
    store: &PgStore,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        person_id: String,
        full_name: String,
        batch: Option<String>,
        status: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut upserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let person_type = PersonType::from_person_id(&row.person_id).ok_or_else(|| {
            AttendanceError::InvalidParameter(format!(
                "person id '{}' must start with STU- or FAC-",
                row.person_id
            ))
        })?;
        let cohort = row
            .batch
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .map(str::parse::<Cohort>)
            .transpose()?;
        let status = match row.status.as_deref() {
            Some(value) if !value.trim().is_empty() => value.parse()?,
            _ => PersonStatus::Active,
        };

        store
            .upsert_person(&Person {
                person_id: row.person_id,
                name: row.full_name,
                person_type,
                cohort,
                status,
            })
            .await?;
        upserted += 1;
    }

    info!(upserted, path = %csv_path.display(), "imported directory entries");
    Ok(upserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at a disposable Postgres"]
    async fn concurrent_enrollments_get_distinct_positions(pool: PgPool) {
        let store = PgStore::new(pool);
        store.upsert_person(&store::demo_people()[0]).await.unwrap();

        let (first, second) = tokio::join!(
            store.store_templates("STU-001", vec![vec![1], vec![2], vec![3]]),
            store.store_templates("STU-001", vec![vec![4], vec![5]]),
        );
        assert_eq!(first.unwrap() + second.unwrap(), 5);

        let positions: Vec<i32> = sqlx::query_scalar(
            "SELECT position FROM attendance.face_templates WHERE person_id = $1 ORDER BY position",
        )
        .bind("STU-001")
        .fetch_all(store.pool())
        .await
        .unwrap();
        assert_eq!(positions, (0..5).collect::<Vec<i32>>());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at a disposable Postgres"]
    async fn append_skips_repeated_source_keys(pool: PgPool) {
        let store = PgStore::new(pool);
        let window = DayWindow::new(
            chrono::NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            chrono::FixedOffset::east_opt(0).unwrap(),
        );
        assert_eq!(seed(&store, &window).await.unwrap(), 7);
        assert_eq!(seed(&store, &window).await.unwrap(), 0);
    }
}
