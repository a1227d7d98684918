use std::time::Instant;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, Uri},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: Uuid::new_v4().to_string(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Emit one structured line per failed request, using the attached `ErrorReport` when present.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();
    let started_at = Instant::now();

    let mut response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    FailedRequest {
        status,
        method,
        uri,
        request_id,
        elapsed_ms: started_at.elapsed().as_millis() as u64,
        report: response.extensions_mut().remove::<ErrorReport>(),
    }
    .emit();

    response
}

struct FailedRequest {
    status: StatusCode,
    method: Method,
    uri: Uri,
    request_id: String,
    elapsed_ms: u64,
    report: Option<ErrorReport>,
}

impl FailedRequest {
    fn source(&self) -> &'static str {
        self.report.as_ref().map_or("unknown", |report| report.source)
    }

    fn chain(&self) -> &[String] {
        self.report
            .as_ref()
            .map(|report| report.messages.as_slice())
            .unwrap_or_default()
    }

    fn detail(&self) -> &str {
        self.chain()
            .first()
            .map_or("no diagnostic available", String::as_str)
    }

    fn emit(&self) {
        let path = self.uri.path();
        let query = self.uri.query().unwrap_or("");

        // Client errors omit the cause chain.
        if self.status.is_server_error() {
            error!(
                target = "lilyrender::http::response",
                status = self.status.as_u16(),
                method = %self.method,
                path,
                query,
                elapsed_ms = self.elapsed_ms,
                source = self.source(),
                detail = self.detail(),
                chain = ?self.chain(),
                request_id = %self.request_id,
                "request failed",
            );
        } else {
            warn!(
                target = "lilyrender::http::response",
                status = self.status.as_u16(),
                method = %self.method,
                path,
                query,
                elapsed_ms = self.elapsed_ms,
                source = self.source(),
                detail = self.detail(),
                request_id = %self.request_id,
                "client request error",
            );
        }
    }
}
