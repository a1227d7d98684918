use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    application::{
        error::ErrorReport,
        render::{RenderError, RenderErrorKind},
    },
    domain::error::DomainError,
};

pub mod kinds {
    pub const INPUT_ERROR: &str = "InputError";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub detail: ApiErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub error: String,
    pub traceback: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Failed conversion, rendered as `{"detail": {"error", "traceback", "type"}}`.
///
/// The attached [`ErrorReport`] keeps the full cause chain for the response log,
/// while the body only carries the top-level message and the diagnostic.
#[derive(Debug)]
pub struct ApiError {
    kind: &'static str,
    error: String,
    traceback: String,
    report: ErrorReport,
}

impl ApiError {
    pub fn input(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: kinds::INPUT_ERROR,
            error: message.clone(),
            traceback: message.clone(),
            report: ErrorReport::from_message(
                "infra::http::input",
                StatusCode::BAD_REQUEST,
                message,
            ),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.report.status
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn report(&self) -> &ErrorReport {
        &self.report
    }
}

impl From<RenderError> for ApiError {
    fn from(err: RenderError) -> Self {
        let kind = err.kind();
        let status = match kind {
            RenderErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            kind: kind.as_str(),
            error: err.to_string(),
            traceback: err.diagnostic(),
            report: ErrorReport::from_error("infra::http::render", status, &err),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self::input(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            detail: ApiErrorDetail {
                error: self.error,
                traceback: self.traceback,
                kind: self.kind.to_string(),
            },
        };
        let mut response = (self.report.status, Json(body)).into_response();
        self.report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use std::{io, path::PathBuf, time::Duration};

    use super::*;
    use crate::application::render::PipelineStep;

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let err = RenderError::TimedOut {
            step: PipelineStep::Typeset,
            tool: "lilypond",
            command: "lilypond --pdf -o score score.ly".to_string(),
            after: Duration::from_secs(120),
        };

        let api = ApiError::from(err);
        assert_eq!(api.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(api.kind(), "Timeout");
    }

    #[test]
    fn tool_failure_maps_to_internal_error() {
        let err = RenderError::ToolFailed {
            step: PipelineStep::Typeset,
            tool: "lilypond",
            command: "lilypond --pdf -o score score.ly".to_string(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "syntax error".to_string(),
        };

        let api = ApiError::from(err);
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.kind(), "ExternalToolFailure");
    }

    #[test]
    fn domain_errors_are_input_errors() {
        let api = ApiError::from(DomainError::validation("File must be a .txt file"));
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
        assert_eq!(api.kind(), kinds::INPUT_ERROR);

        let response = api.into_response();
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("error report attached");
        assert_eq!(report.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn render_report_keeps_io_cause() {
        let err = RenderError::Staging {
            step: PipelineStep::Stage,
            action: "create",
            path: PathBuf::from("/srv/staging/abc"),
            source: io::Error::other("no space left on device"),
        };

        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("error report attached");
        assert_eq!(report.source, "infra::http::render");
        assert_eq!(report.messages.len(), 2);
        assert!(report.messages[0].starts_with("failed to create `/srv/staging/abc`"));
        assert_eq!(report.messages[1], "no space left on device");
    }
}
