//! Initiator job seeding
//!
//! Every job without requisites depends on the synthetic Initiator job, so it
//! has to exist (and stay SUCCEEDED) before a [`JobStore`] is opened.
//!
//! [`JobStore`]: crate::repositories::JobStore

use anyhow::Result;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::models::definition::DEFAULT_PRIORITY;
use crate::models::{INITIATOR_JOB_ID, JobState, Jobs, job};

/// Inserts the Initiator job unless it already exists.
///
/// An existing Initiator that is not SUCCEEDED is put back to SUCCEEDED.
///
/// # Arguments
///
/// * `db` - Database connection
///
/// # Returns
///
/// Returns the Initiator's internal id
pub async fn seed_initiator(db: &DatabaseConnection) -> Result<i32> {
    let existing = Jobs::find()
        .filter(job::Column::JobId.eq(INITIATOR_JOB_ID))
        .one(db)
        .await?;

    match existing {
        Some(row) if row.state == JobState::Succeeded => {
            log::info!("{} job already exists, skipping", INITIATOR_JOB_ID);
            Ok(row.id)
        }
        Some(row) => {
            log::warn!(
                "{} job found in state {}, resetting to SUCCEEDED",
                INITIATOR_JOB_ID,
                row.state
            );
            let id = row.id;
            let mut active: job::ActiveModel = row.into();
            active.state = Set(JobState::Succeeded);
            active.update(db).await?;
            Ok(id)
        }
        None => {
            log::info!("Creating {} job", INITIATOR_JOB_ID);
            let inserted = job::ActiveModel {
                job_id: Set(INITIATOR_JOB_ID.to_string()),
                update_id: Set(0),
                state: Set(JobState::Succeeded),
                content: Set(None),
                start_after: Set(None),
                node: Set(None),
                host: Set(None),
                priority: Set(DEFAULT_PRIORITY),
                ..Default::default()
            }
            .insert(db)
            .await?;
            Ok(inserted.id)
        }
    }
}
