//! Schedule handles
//!
//! Create/describe/trigger/backfill/pause/unpause/update/delete against the
//! cluster's schedule state. The conflict token returned by create/describe
//! is carried on update when available; the server does not currently
//! enforce mismatches.

use tracing::info;
use uuid::Uuid;

use tempo_core::error::ArgumentError;
use tempo_core::schedule::{
    Schedule, ScheduleBackfill, ScheduleInfo, ScheduleOverlapPolicy, SchedulePatch,
    ScheduleTriggerImmediately,
};
use tempo_core::service::{
    CreateScheduleRequest, DeleteScheduleRequest, DescribeScheduleRequest, PatchScheduleRequest,
    UpdateScheduleRequest,
};

use crate::error::ClientError;
use crate::Client;

const DEFAULT_PAUSE_NOTE: &str = "Paused via client";
const DEFAULT_UNPAUSE_NOTE: &str = "Unpaused via client";

/// Options accompanying schedule creation
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    /// Trigger one action immediately upon creation
    pub trigger_immediately: bool,

    /// Backfill periods to run as part of creation
    pub backfills: Vec<ScheduleBackfill>,
}

/// A described schedule: configuration plus server bookkeeping
#[derive(Debug, Clone)]
pub struct ScheduleDescription {
    pub schedule: Schedule,
    pub info: ScheduleInfo,
    pub conflict_token: Vec<u8>,
}

/// Handle to one schedule
#[derive(Clone)]
pub struct ScheduleHandle {
    client: Client,
    schedule_id: String,
}

impl Client {
    /// Create a schedule and return its handle
    pub async fn create_schedule(
        &self,
        schedule_id: impl Into<String>,
        schedule: Schedule,
        options: ScheduleOptions,
    ) -> Result<ScheduleHandle, ClientError> {
        let schedule_id = schedule_id.into();

        let initial_patch = if options.trigger_immediately || !options.backfills.is_empty() {
            Some(SchedulePatch {
                trigger_immediately: options
                    .trigger_immediately
                    .then(ScheduleTriggerImmediately::default),
                backfill_request: options.backfills,
                pause: None,
                unpause: None,
            })
        } else {
            None
        };

        self.inner
            .service
            .create_schedule(CreateScheduleRequest {
                namespace: self.inner.namespace.clone(),
                schedule_id: schedule_id.clone(),
                schedule,
                initial_patch,
                identity: self.inner.identity.clone(),
                request_id: Uuid::now_v7().to_string(),
                memo: Default::default(),
                search_attributes: Default::default(),
            })
            .await?;

        info!(%schedule_id, "schedule created");
        Ok(ScheduleHandle {
            client: self.clone(),
            schedule_id,
        })
    }

    /// A handle to an existing schedule
    pub fn schedule_handle(&self, schedule_id: impl Into<String>) -> ScheduleHandle {
        ScheduleHandle {
            client: self.clone(),
            schedule_id: schedule_id.into(),
        }
    }
}

impl ScheduleHandle {
    pub fn schedule_id(&self) -> &str {
        &self.schedule_id
    }

    /// Full configuration plus action counts and recent/next action times
    pub async fn describe(&self) -> Result<ScheduleDescription, ClientError> {
        let response = self
            .client
            .inner
            .service
            .describe_schedule(DescribeScheduleRequest {
                namespace: self.client.inner.namespace.clone(),
                schedule_id: self.schedule_id.clone(),
            })
            .await?;
        Ok(ScheduleDescription {
            schedule: response.schedule,
            info: response.info,
            conflict_token: response.conflict_token,
        })
    }

    /// Run an action immediately, ignoring the timing specification
    pub async fn trigger(
        &self,
        overlap: Option<ScheduleOverlapPolicy>,
    ) -> Result<(), ClientError> {
        self.patch(SchedulePatch {
            trigger_immediately: Some(ScheduleTriggerImmediately { overlap }),
            ..Default::default()
        })
        .await
    }

    /// Treat historical periods as if they had occurred live
    ///
    /// An empty backfill list is an argument error.
    pub async fn backfill(&self, backfills: Vec<ScheduleBackfill>) -> Result<(), ClientError> {
        if backfills.is_empty() {
            return Err(ArgumentError::new("backfill requires at least one period").into());
        }
        self.patch(SchedulePatch {
            backfill_request: backfills,
            ..Default::default()
        })
        .await
    }

    /// Pause the schedule with an optional note
    pub async fn pause(&self, note: Option<String>) -> Result<(), ClientError> {
        self.patch(SchedulePatch {
            pause: Some(note.unwrap_or_else(|| DEFAULT_PAUSE_NOTE.to_string())),
            ..Default::default()
        })
        .await
    }

    /// Unpause the schedule with an optional note
    pub async fn unpause(&self, note: Option<String>) -> Result<(), ClientError> {
        self.patch(SchedulePatch {
            unpause: Some(note.unwrap_or_else(|| DEFAULT_UNPAUSE_NOTE.to_string())),
            ..Default::default()
        })
        .await
    }

    /// Read-modify-write the schedule definition
    ///
    /// The closure receives the current description; returning `None` makes
    /// the call a no-op. The described conflict token is carried on the
    /// update.
    pub async fn update<F>(&self, update: F) -> Result<(), ClientError>
    where
        F: FnOnce(ScheduleDescription) -> Option<Schedule>,
    {
        let description = self.describe().await?;
        let conflict_token = description.conflict_token.clone();

        let Some(schedule) = update(description) else {
            return Ok(());
        };

        self.client
            .inner
            .service
            .update_schedule(UpdateScheduleRequest {
                namespace: self.client.inner.namespace.clone(),
                schedule_id: self.schedule_id.clone(),
                schedule,
                conflict_token: Some(conflict_token),
                identity: self.client.inner.identity.clone(),
                request_id: Uuid::now_v7().to_string(),
            })
            .await?;
        Ok(())
    }

    /// Delete the schedule; irreversible
    pub async fn delete(&self) -> Result<(), ClientError> {
        self.client
            .inner
            .service
            .delete_schedule(DeleteScheduleRequest {
                namespace: self.client.inner.namespace.clone(),
                schedule_id: self.schedule_id.clone(),
                identity: self.client.inner.identity.clone(),
            })
            .await?;
        info!(schedule_id = %self.schedule_id, "schedule deleted");
        Ok(())
    }

    async fn patch(&self, patch: SchedulePatch) -> Result<(), ClientError> {
        self.client
            .inner
            .service
            .patch_schedule(PatchScheduleRequest {
                namespace: self.client.inner.namespace.clone(),
                schedule_id: self.schedule_id.clone(),
                patch,
                identity: self.client.inner.identity.clone(),
                request_id: Uuid::now_v7().to_string(),
            })
            .await?;
        Ok(())
    }
}
