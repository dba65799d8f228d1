//! HTTP collaborators for the dashboard data core.
//!
//! The core consumes three endpoints (the employee listing, the batched
//! reasoning lookup, and the training job status) through dyn-compatible
//! traits so tests fake the seam instead of the network. `HttpDashboardApi`
//! is the production implementation; it maps status codes to typed errors at
//! the boundary and nothing loosely shaped flows past it.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::types::{EmployeeRecord, ReasoningResult, TrainingStatus};

#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    /// Fetch the base record set for a dataset. `force_refresh` is forwarded
    /// so the server can bypass its own layers.
    async fn list_employees(
        &self,
        project_id: &str,
        dataset_id: &str,
        force_refresh: bool,
    ) -> Result<Vec<EmployeeRecord>, ApiError>;
}

#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Look up reasoning risk for a batch of employee ids. Partial results
    /// are acceptable; absent ids are simply not represented.
    async fn batch_lookup_reasoning(
        &self,
        employee_ids: &[String],
    ) -> Result<Vec<ReasoningResult>, ApiError>;
}

#[async_trait]
pub trait TrainingStatusApi: Send + Sync {
    /// Current training job status. A 404 surfaces as `ApiError::NotFound`,
    /// which the monitor maps to the `idle` phase.
    async fn get_training_status(&self) -> Result<TrainingStatus, ApiError>;

    /// Fire-and-forget training trigger. Not part of the read path.
    async fn force_training_refresh(&self, project_id: &str) -> Result<(), ApiError>;
}

pub struct HttpDashboardApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDashboardApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Map a non-success response to a typed error, reading the body for the
/// message. 404 gets its own variant because callers treat it as a state.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl EmployeeDirectory for HttpDashboardApi {
    async fn list_employees(
        &self,
        project_id: &str,
        dataset_id: &str,
        force_refresh: bool,
    ) -> Result<Vec<EmployeeRecord>, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/api/projects/{}/employees", project_id)))
            .query(&[("dataset", dataset_id)])
            .query(&[("refresh", force_refresh)])
            .send()
            .await?;

        check_status(response)
            .await?
            .json::<Vec<EmployeeRecord>>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ReasoningProvider for HttpDashboardApi {
    async fn batch_lookup_reasoning(
        &self,
        employee_ids: &[String],
    ) -> Result<Vec<ReasoningResult>, ApiError> {
        let response = self
            .client
            .post(self.url("/api/reasoning/batch-lookup"))
            .json(&serde_json::json!({ "employeeIds": employee_ids }))
            .send()
            .await?;

        check_status(response)
            .await?
            .json::<Vec<ReasoningResult>>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl TrainingStatusApi for HttpDashboardApi {
    async fn get_training_status(&self) -> Result<TrainingStatus, ApiError> {
        let response = self
            .client
            .get(self.url("/api/training/status"))
            .send()
            .await?;

        check_status(response)
            .await?
            .json::<TrainingStatus>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn force_training_refresh(&self, project_id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(&format!("/api/projects/{}/training/refresh", project_id)))
            .send()
            .await?;

        check_status(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let api = HttpDashboardApi::new("http://localhost:8000/");
        assert_eq!(
            api.url("/api/training/status"),
            "http://localhost:8000/api/training/status"
        );
    }
}
