//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission (`POST /prompt`) and memory release
//! (`POST /free`) using [`reqwest`].

use serde::Deserialize;

use crate::error::ComfyUIError;

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after queuing a
/// workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with the graph and the caller's `client_id`
    /// and returns the server-assigned `prompt_id`. A 2xx response without
    /// a `prompt_id` is treated as a failure to queue.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<String, ComfyUIError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        let parsed: SubmitResponse = Self::parse_response(response).await?;
        let prompt_id = parsed
            .prompt_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ComfyUIError::Protocol("Failed to queue job: no prompt_id".into()))?;

        tracing::info!(
            client_id,
            prompt_id = %prompt_id,
            queue_number = parsed.number,
            "Workflow submitted to ComfyUI",
        );
        Ok(prompt_id)
    }

    /// Ask ComfyUI to unload models and free accelerator memory.
    ///
    /// Sends `POST /free`. Maintenance only: failures are logged and
    /// never returned.
    pub async fn free_memory(&self) {
        let body = serde_json::json!({
            "unload_models": true,
            "free_memory": true,
        });

        let result = match self
            .client
            .post(format!("{}/free", self.api_url))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => Self::check_status(response).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => tracing::info!(api_url = %self.api_url, "Requested ComfyUI memory release"),
            Err(e) => tracing::warn!(error = %e, "Failed to request ComfyUI memory release"),
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIError::Backend`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIError::Backend {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIError> {
        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ComfyUIError::Protocol(format!("Malformed response body: {e}")))
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
