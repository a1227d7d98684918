use axum::{
    Json,
    extract::{Multipart, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::{
    application::dependencies::DependencyReport,
    domain::{
        EngineVersion, NotationSource, RenderProfile, RenderRequest, ensure_text_upload,
    },
};

use super::{
    HttpState,
    error::ApiError,
    models::{BinaryConvertRequest, ConvertRequest, ConvertResponse, VersionQuery},
};

const UPLOAD_FIELD: &str = "file";

/// `POST /convert`: notation text in a JSON body.
pub async fn convert_text(
    State(state): State<HttpState>,
    payload: Result<Json<ConvertRequest>, JsonRejection>,
) -> Result<Json<ConvertResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::input(rejection.body_text()))?;
    let version = EngineVersion::resolve(payload.version.as_deref(), &state.default_version)?;

    let request = RenderRequest::new(
        NotationSource::new(payload.content),
        version,
        RenderProfile::Standard,
    );
    render(&state, request).await
}

/// `POST /convert/txt`: a `.txt` upload in the `file` multipart field, version in the query.
pub async fn convert_txt_file(
    State(state): State<HttpState>,
    Query(query): Query<VersionQuery>,
    mut multipart: Multipart,
) -> Result<Json<ConvertResponse>, ApiError> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::input(format!("invalid multipart payload: {err}")))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            let filename = field.file_name().map(str::to_string);
            ensure_text_upload(filename.as_deref())?;
            let data = field
                .bytes()
                .await
                .map_err(|err| ApiError::input(format!("failed to read upload: {err}")))?;
            upload = Some((filename, data));
            break;
        }
    }

    let (filename, data) = upload.ok_or_else(|| ApiError::input("missing file"))?;
    let content = String::from_utf8(data.to_vec())
        .map_err(|_| ApiError::input("File must be UTF-8 encoded text"))?;
    let version = EngineVersion::resolve(query.version.as_deref(), &state.default_version)?;

    debug!(
        target = "infra::http::handlers",
        op = "convert_txt_file",
        filename = filename.as_deref().unwrap_or(""),
        bytes = content.len(),
        "Accepted notation upload"
    );

    let request = RenderRequest::new(
        NotationSource::new(content),
        version,
        RenderProfile::Standard,
    );
    render(&state, request).await
}

/// `POST /convert/binary`: possibly base64-encoded notation, rendered with the EPS backend.
pub async fn convert_binary(
    State(state): State<HttpState>,
    payload: Result<Json<BinaryConvertRequest>, JsonRejection>,
) -> Result<Json<ConvertResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::input(rejection.body_text()))?;
    let version = EngineVersion::resolve(payload.version.as_deref(), &state.default_version)?;
    let source = payload.encoding.decode(payload.content)?;

    let request = RenderRequest::new(source, version, RenderProfile::Binary);
    render(&state, request).await
}

/// `GET /health`: tool availability, `503` when either tool is missing.
pub async fn health(State(state): State<HttpState>) -> Response {
    let report = DependencyReport::check(&state.pipeline);
    let status = if report.all_available() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn render(
    state: &HttpState,
    request: RenderRequest,
) -> Result<Json<ConvertResponse>, ApiError> {
    let image = state.pipeline.render(&request).await?;
    Ok(Json(ConvertResponse::from(&image)))
}
