//! Client contract for the external test-generation service.
//!
//! The service is the only network dependency of the library: a single HTTP
//! POST whose response carries generated pytest code plus a suggested file
//! name. Failures here are the one place the library propagates `Err` — the
//! caller must be able to distinguish "generation failed" from "generation
//! succeeded but the code is unusable" (the latter is not detected here at
//! all).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::paths;
use crate::types::WorkspaceSnapshot;

/// Default endpoint of the generation service.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/generate-tests";

/// Default instruction sent along with the source code.
pub const DEFAULT_REQUIREMENTS: &str = "Cover edge cases and happy paths";

/// Request body for the generation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Source code (or selected fragment) to generate tests for.
    pub code: String,
    /// Base name of the file the code came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Free-form generation instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    /// Whether the service should run pytest on its own output before
    /// responding.
    pub run_pytest: bool,
}

impl GenerateRequest {
    /// Builds the conventional request for a workspace file: base name only,
    /// default requirements, no server-side pytest run.
    pub fn for_file(path: &str, code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            filename: Some(paths::base_name(path).to_string()),
            requirements: Some(DEFAULT_REQUIREMENTS.to_string()),
            run_pytest: false,
        }
    }
}

/// Response body from the generation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub status: String,
    /// The generated pytest code, verbatim.
    pub generated_code: String,
    /// Server-suggested file name for the generated tests.
    pub filename_suggestion: String,
}

/// Error body of a non-2xx response.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

/// Fault raised by the generation call — the only thrown error in the
/// library.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// The service answered with a non-2xx status; carries the server's
    /// `detail` message when one was supplied.
    #[error("{0}")]
    Service(String),
    /// The request never produced a response (connect, timeout, decode).
    #[error("test generation request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Blocking HTTP client for the generation service.
pub struct TestGenClient {
    endpoint: String,
    http: reqwest::blocking::Client,
}

impl TestGenClient {
    /// Client against `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: reqwest::blocking::Client::new(),
        }
    }

    /// The endpoint this client posts to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Posts `request` and returns the parsed response.
    ///
    /// Non-2xx responses become [`GenerateError::Service`] with the
    /// server-supplied `detail` when the body parses, otherwise a fixed
    /// fallback message.
    pub fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, GenerateError> {
        debug!(endpoint = %self.endpoint, filename = ?request.filename, "posting generation request");
        let response = self.http.post(&self.endpoint).json(request).send()?;

        if !response.status().is_success() {
            let detail = response
                .json::<ErrorBody>()
                .ok()
                .and_then(|body| body.detail)
                .unwrap_or_else(|| "Test generation failed".to_string());
            return Err(GenerateError::Service(detail));
        }

        Ok(response.json::<GenerateResponse>()?)
    }
}

impl Default for TestGenClient {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

/// Writes `generated_code` into the snapshot at the conventional test path
/// for `selected_file` (`tests/test_<basename>.py`), creating or overwriting
/// that entry.
///
/// Returns the updated snapshot and the target path.
pub fn apply_generated_test(
    selected_file: &str,
    generated_code: &str,
    snapshot: &WorkspaceSnapshot,
) -> (WorkspaceSnapshot, String) {
    let test_file = paths::test_file_path(selected_file);
    let mut updated = snapshot.clone();
    updated.insert(test_file.clone(), generated_code.to_string());
    (updated, test_file)
}

// ── Unit tests ────────────────────────────────────────────────────────────────
