//! Handlers for submitting conversions and fetching their results.

use std::io;

use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::HeaderValue;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use serde::Serialize;

use transmute_core::{Intake, JobId, JobSnapshot, StagedUpload, TransmuteError};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub job_id: JobId,
}

/// Fields collected from the `POST /convert` form.
#[derive(Default)]
struct ConvertForm {
    file: Option<(StagedUpload, String)>,
    output_format: Option<String>,
}

// ---------------------------------------------------------------------------
// POST /convert
// ---------------------------------------------------------------------------

/// Accepts a multipart form with a `file` field (filename required) and an
/// `output_format` field. The file is streamed into storage and a job is
/// queued; the response only carries the job id.
pub async fn convert(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<ConvertResponse>> {
    let mut form = ConvertForm::default();
    let read = read_form(&state.intake, &mut multipart, &mut form).await;

    match (read, form.file, form.output_format) {
        (Ok(()), Some((staged, filename)), Some(output_format)) => {
            let job_id = state
                .intake
                .submit_staged(staged, filename, &output_format)
                .await?;
            Ok(Json(ConvertResponse { job_id }))
        }
        (read, file, _) => {
            if let Some((staged, _)) = file {
                state.intake.discard(staged).await;
            }
            read?;
            Err(AppError::BadRequest(
                "both 'file' and 'output_format' fields are required".into(),
            ))
        }
    }
}

/// Walk the form. Fields may arrive in any order; when `output_format` comes
/// first the pair is validated before the file is stored.
async fn read_form(
    intake: &Intake,
    multipart: &mut Multipart,
    form: &mut ConvertForm,
) -> AppResult<()> {
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "output_format" => form.output_format = Some(field.text().await?),
            "file" => {
                if form.file.is_some() {
                    return Err(AppError::BadRequest("only one 'file' field is allowed".into()));
                }
                let filename = field
                    .file_name()
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| AppError::BadRequest("the 'file' field needs a filename".into()))?;
                if let Some(output_format) = &form.output_format {
                    intake.validate(&filename, output_format)?;
                }

                let body = field.map_err(io::Error::other);
                let staged = intake.store_upload(Box::pin(body)).await?;
                tracing::debug!(%filename, size = staged.size(), "upload stored");
                form.file = Some((staged, filename));
            }
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// GET /progress/{job_id}
// ---------------------------------------------------------------------------

pub async fn progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobSnapshot>> {
    let id = parse_job_id(&job_id)?;
    Ok(Json(state.intake.get_progress(&id).await?))
}

// ---------------------------------------------------------------------------
// GET /download/{job_id}
// ---------------------------------------------------------------------------

/// Streams the converted file as an attachment. `409` until the job finished.
pub async fn download(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Response> {
    let id = parse_job_id(&job_id)?;
    let download = state.intake.get_output(&id).await?;

    let headers = [
        (CONTENT_TYPE, HeaderValue::from_static(download.content_type)),
        (CONTENT_LENGTH, HeaderValue::from(download.size)),
        (CONTENT_DISPOSITION, content_disposition(&download.filename)?),
    ];
    Ok((headers, Body::from_stream(download.body)).into_response())
}

// ---------------------------------------------------------------------------
// POST /cancel/{job_id}
// ---------------------------------------------------------------------------

pub async fn cancel(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobSnapshot>> {
    let id = parse_job_id(&job_id)?;
    Ok(Json(state.intake.cancel(&id).await?))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Malformed ids cannot name a job, so they are reported as unknown.
fn parse_job_id(raw: &str) -> AppResult<JobId> {
    raw.parse()
        .map_err(|_| AppError::Core(TransmuteError::NotFound(format!("job {raw} does not exist"))))
}

/// `attachment; filename="..."`, plus an RFC 5987 `filename*` when the name
/// is not plain ASCII.
fn content_disposition(filename: &str) -> AppResult<HeaderValue> {
    let fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .collect();
    let mut value = format!("attachment; filename=\"{fallback}\"");
    if fallback != filename {
        value.push_str("; filename*=UTF-8''");
        value.push_str(&percent_encode(filename));
    }
    HeaderValue::from_str(&value).map_err(|err| AppError::InternalError(err.to_string()))
}

fn percent_encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}
