//! Axum route handlers for CV upload.

use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cv::{clean_extracted_text, MAX_CV_BYTES};
use crate::errors::AppError;
use crate::state::AppState;
use crate::usage::handlers::UserIdQuery;

#[derive(Debug, Serialize)]
pub struct CvUploadResponse {
    pub application_id: Uuid,
    pub characters: usize,
}

/// POST /api/applications/:id/cv?user_id=
///
/// Accepts a PDF in the `file` field, extracts its text, and stores it on the application.
pub async fn handle_upload_cv(
    State(state): State<AppState>,
    Path(application_id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
    mut multipart: Multipart,
) -> Result<Json<CvUploadResponse>, AppError> {
    match state.applications.fetch_application(application_id).await? {
        Some(application) if application.user_id == params.user_id => {}
        _ => {
            return Err(AppError::NotFound(format!(
                "Application {application_id} not found"
            )))
        }
    }

    let pdf = read_file_field(&mut multipart).await?;
    info!(
        "Extracting CV text for application {application_id} ({} bytes)",
        pdf.len()
    );

    let raw = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&pdf))
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .map_err(|e| {
            warn!("PDF extraction failed for application {application_id}: {e}");
            AppError::Validation("The uploaded file is not a readable PDF".to_string())
        })?;

    let cv_text = clean_extracted_text(&raw);
    if cv_text.is_empty() {
        return Err(AppError::Validation(
            "No text could be extracted from the PDF. Scanned images are not supported."
                .to_string(),
        ));
    }

    state
        .applications
        .set_cv_text(application_id, &cv_text)
        .await?;

    Ok(Json(CvUploadResponse {
        application_id,
        characters: cv_text.chars().count(),
    }))
}

async fn read_file_field(multipart: &mut Multipart) -> Result<Bytes, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Could not read uploaded file: {e}")))?;
        if data.is_empty() {
            return Err(AppError::Validation("Uploaded file is empty".to_string()));
        }
        if data.len() > MAX_CV_BYTES {
            return Err(AppError::Validation(format!(
                "CV must be under {} MB",
                MAX_CV_BYTES / (1024 * 1024)
            )));
        }
        if !data.starts_with(b"%PDF") {
            return Err(AppError::Validation("Only PDF files are accepted".to_string()));
        }
        return Ok(data);
    }

    Err(AppError::Validation(
        "Multipart body must include a 'file' field".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use crate::models::application::ApplicationRow;
    use crate::preparation::store::ApplicationStore;
    use crate::routes::build_router;
    use crate::test_support::{harness, StubGenerator};

    use super::*;

    const BOUNDARY: &str = "prep-api-test-boundary";

    fn multipart_body(field: &str, content: &[u8]) -> Body {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"cv.pdf\"\r\n\
             Content-Type: application/pdf\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        Body::from(body)
    }

    fn upload(application_id: Uuid, user_id: Uuid, body: Body) -> Request<Body> {
        Request::post(format!(
            "/api/applications/{application_id}/cv?user_id={user_id}"
        ))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(body)
        .unwrap()
    }

    fn seed() -> (crate::test_support::TestHarness, ApplicationRow) {
        let h = harness(StubGenerator::failing());
        let application = ApplicationRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            job_title: "QA Engineer".to_string(),
            company: "Hooli".to_string(),
            job_description: "Playwright".to_string(),
            cv_text: None,
        };
        h.applications.insert_application(application.clone());
        (h, application)
    }

    #[tokio::test]
    async fn test_non_pdf_upload_is_rejected() {
        let (h, app) = seed();

        let response = build_router(h.state.clone())
            .oneshot(upload(app.id, app.user_id, multipart_body("file", b"hello")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert!(h
            .applications
            .fetch_application(app.id)
            .await
            .unwrap()
            .unwrap()
            .cv_text
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_file_field_is_rejected() {
        let (h, app) = seed();

        let response = build_router(h.state.clone())
            .oneshot(upload(app.id, app.user_id, multipart_body("resume", b"%PDF-1.4")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_to_foreign_application_is_404() {
        let (h, app) = seed();

        let response = build_router(h.state.clone())
            .oneshot(upload(app.id, Uuid::new_v4(), multipart_body("file", b"%PDF-1.4")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
