use async_trait::async_trait;

use crate::models::Activity;

use super::{ApiClient, ApiError};

/// Read access to the activity catalog.
#[async_trait]
pub trait ActivityCatalog: Send + Sync {
    /// `Ok(None)` when the subject has no activity with that id, or the
    /// caller may not see it.
    async fn get_activity(
        &self,
        materia_id: i64,
        activity_id: i64,
    ) -> Result<Option<Activity>, ApiError>;
}

pub struct HttpActivityCatalog {
    api: ApiClient,
}

impl HttpActivityCatalog {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn list_activities(&self, materia_id: i64) -> Result<Vec<Activity>, ApiError> {
        self.api
            .get_json(&format!("/api/actividades/?materia={materia_id}"))
            .await
    }
}

#[async_trait]
impl ActivityCatalog for HttpActivityCatalog {
    async fn get_activity(
        &self,
        materia_id: i64,
        activity_id: i64,
    ) -> Result<Option<Activity>, ApiError> {
        let activities = self.list_activities(materia_id).await?;
        Ok(activities.into_iter().find(|activity| activity.id == activity_id))
    }
}
