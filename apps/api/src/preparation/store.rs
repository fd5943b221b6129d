//! Persistence for applications and their preparation state.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::application::ApplicationRow;
use crate::preparation::models::{PreparationState, PreparationStatus};

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn fetch_application(&self, id: Uuid) -> Result<Option<ApplicationRow>, AppError>;

    async fn set_cv_text(&self, id: Uuid, cv_text: &str) -> Result<(), AppError>;

    async fn load_preparation(
        &self,
        application_id: Uuid,
    ) -> Result<Option<PreparationState>, AppError>;

    /// Creates a `pending` state if none exists and returns the stored state.
    async fn ensure_preparation(&self, application_id: Uuid)
        -> Result<PreparationState, AppError>;

    /// Compare-and-set on status. Returns `false` if the stored status is not `from`.
    async fn transition_preparation(
        &self,
        application_id: Uuid,
        from: PreparationStatus,
        to: PreparationStatus,
    ) -> Result<bool, AppError>;

    /// Writes status, content, and metadata. Safe to repeat.
    async fn save_preparation(&self, state: &PreparationState) -> Result<(), AppError>;
}

/// Process-local store for tests and local runs.
#[derive(Default)]
pub struct InMemoryApplicationStore {
    applications: Mutex<HashMap<Uuid, ApplicationRow>>,
    preparations: Mutex<HashMap<Uuid, PreparationState>>,
}

impl InMemoryApplicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn insert_application(&self, application: ApplicationRow) {
        self.applications
            .lock()
            .insert(application.id, application);
    }

    #[cfg(test)]
    /// Removes an application and, like the SQL cascade, its preparation.
    pub fn delete_application(&self, id: Uuid) {
        self.applications.lock().remove(&id);
        self.preparations.lock().remove(&id);
    }

    #[cfg(test)]
    pub fn put_preparation(&self, state: PreparationState) {
        self.preparations.lock().insert(state.application_id, state);
    }
}

#[async_trait]
impl ApplicationStore for InMemoryApplicationStore {
    async fn fetch_application(&self, id: Uuid) -> Result<Option<ApplicationRow>, AppError> {
        Ok(self.applications.lock().get(&id).cloned())
    }

    async fn set_cv_text(&self, id: Uuid, cv_text: &str) -> Result<(), AppError> {
        let mut applications = self.applications.lock();
        let application = applications
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Application {id} not found")))?;
        application.cv_text = Some(cv_text.to_string());
        Ok(())
    }

    async fn load_preparation(
        &self,
        application_id: Uuid,
    ) -> Result<Option<PreparationState>, AppError> {
        Ok(self.preparations.lock().get(&application_id).cloned())
    }

    async fn ensure_preparation(
        &self,
        application_id: Uuid,
    ) -> Result<PreparationState, AppError> {
        let mut preparations = self.preparations.lock();
        Ok(preparations
            .entry(application_id)
            .or_insert_with(|| PreparationState::new(application_id))
            .clone())
    }

    async fn transition_preparation(
        &self,
        application_id: Uuid,
        from: PreparationStatus,
        to: PreparationStatus,
    ) -> Result<bool, AppError> {
        let mut preparations = self.preparations.lock();
        match preparations.get_mut(&application_id) {
            Some(state) if state.status == from => {
                state.status = to;
                state.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save_preparation(&self, state: &PreparationState) -> Result<(), AppError> {
        self.preparations
            .lock()
            .insert(state.application_id, state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn application() -> ApplicationRow {
        ApplicationRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            job_title: "Backend Engineer".to_string(),
            company: "Acme".to_string(),
            job_description: "Rust".to_string(),
            cv_text: None,
        }
    }

    #[tokio::test]
    async fn test_ensure_preparation_is_idempotent() {
        let store = InMemoryApplicationStore::new();
        let id = Uuid::new_v4();

        let first = store.ensure_preparation(id).await.unwrap();
        assert_eq!(first.status, PreparationStatus::Pending);

        store
            .transition_preparation(id, PreparationStatus::Pending, PreparationStatus::Preparing)
            .await
            .unwrap();
        let second = store.ensure_preparation(id).await.unwrap();
        assert_eq!(second.status, PreparationStatus::Preparing);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = InMemoryApplicationStore::new();
        let id = Uuid::new_v4();
        store.ensure_preparation(id).await.unwrap();

        let won = store
            .transition_preparation(id, PreparationStatus::Pending, PreparationStatus::Preparing)
            .await
            .unwrap();
        let lost = store
            .transition_preparation(id, PreparationStatus::Pending, PreparationStatus::Preparing)
            .await
            .unwrap();
        assert!(won);
        assert!(!lost);
    }

    #[tokio::test]
    async fn test_set_cv_text_on_missing_application_is_not_found() {
        let store = InMemoryApplicationStore::new();
        let err = store.set_cv_text(Uuid::new_v4(), "cv").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_application_cascades_preparation() {
        let store = InMemoryApplicationStore::new();
        let app = application();
        store.insert_application(app.clone());
        store.ensure_preparation(app.id).await.unwrap();

        store.delete_application(app.id);
        assert!(store.fetch_application(app.id).await.unwrap().is_none());
        assert!(store.load_preparation(app.id).await.unwrap().is_none());
    }
}
