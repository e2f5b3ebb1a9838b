use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::try_join_all;
use serde::Serialize;
use tracing::info;

use crate::error::{AttendanceError, Result};
use crate::store::{FaceEnrollment, IdentityDirectory};

pub const MAX_IMAGES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentReceipt {
    pub person_id: String,
    pub images_stored: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalReceipt {
    pub person_id: String,
    pub templates_removed: usize,
}

/// Face enrollment for people already in the directory.
#[derive(Clone)]
pub struct EnrollmentService {
    directory: Arc<dyn IdentityDirectory>,
    faces: Arc<dyn FaceEnrollment>,
}

impl EnrollmentService {
    pub fn new(directory: Arc<dyn IdentityDirectory>, faces: Arc<dyn FaceEnrollment>) -> Self {
        Self { directory, faces }
    }

    /// Decodes 1..=10 base64 images and stores them as one batch in selection order.
    pub async fn enroll(&self, person_id: &str, images: Vec<String>) -> Result<EnrollmentReceipt> {
        let person_id = require_person_id(person_id)?;
        if images.is_empty() || images.len() > MAX_IMAGES {
            return Err(AttendanceError::ValidationFailed(format!(
                "expected 1 to {MAX_IMAGES} images, got {}",
                images.len()
            )));
        }
        self.require_known(person_id).await?;

        let decoded = decode_all(images).await?;
        let images_stored = self.faces.store_templates(person_id, decoded).await?;

        info!(person_id, images_stored, "enrolled face images");
        Ok(EnrollmentReceipt {
            person_id: person_id.to_string(),
            images_stored,
        })
    }

    pub async fn remove(&self, person_id: &str) -> Result<RemovalReceipt> {
        let person_id = require_person_id(person_id)?;
        self.require_known(person_id).await?;

        let templates_removed = self.faces.remove_templates(person_id).await?;
        info!(person_id, templates_removed, "removed face templates");
        Ok(RemovalReceipt {
            person_id: person_id.to_string(),
            templates_removed,
        })
    }

    async fn require_known(&self, person_id: &str) -> Result<()> {
        match self.directory.get_person(person_id).await? {
            Some(_) => Ok(()),
            None => Err(AttendanceError::NotFound(format!("person {person_id}"))),
        }
    }
}

fn require_person_id(person_id: &str) -> Result<&str> {
    let trimmed = person_id.trim();
    if trimmed.is_empty() {
        return Err(AttendanceError::ValidationFailed(
            "person_id is required".to_string(),
        ));
    }
    Ok(trimmed)
}

/// Decodes every image on the blocking pool, then joins.
///
/// Results come back in input order regardless of which decode finishes
/// first; one bad image fails the whole batch.
async fn decode_all(images: Vec<String>) -> Result<Vec<Vec<u8>>> {
    let tasks = images.into_iter().enumerate().map(|(index, image)| async move {
        tokio::task::spawn_blocking(move || decode_image(index, &image))
            .await
            .map_err(|err| {
                AttendanceError::UpstreamUnavailable(format!("image decoder task failed: {err}"))
            })?
    });
    try_join_all(tasks).await
}

/// Accepts raw base64 or a `data:image/...;base64,` URL.
fn decode_image(index: usize, image: &str) -> Result<Vec<u8>> {
    let payload = match image.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => image,
    };
    let bytes = STANDARD.decode(payload.trim()).map_err(|err| {
        AttendanceError::ValidationFailed(format!("image {} is not valid base64: {err}", index + 1))
    })?;
    if bytes.is_empty() {
        return Err(AttendanceError::ValidationFailed(format!(
            "image {} is empty",
            index + 1
        )));
    }
    Ok(bytes)
}
