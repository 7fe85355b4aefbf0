use axum::{
    extract::{FromRef, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::badge::BadgeClient;
use crate::db::Db;
use crate::error::CoreError;
use crate::exam;
use crate::lifecycle;
use crate::mock::{MockEngine, MockOutcome, StartedAttempt};
use crate::models::*;
use crate::progress;
use crate::session::CurrentUser;
use crate::store;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db: Db,
    pub mock: MockEngine,
    pub badge: BadgeClient,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // administration
        .route("/api/users", post(create_user))
        .route("/api/tracks", get(list_tracks).post(create_track))
        .route("/api/mock-tests", post(create_mock_test))
        .route("/api/enrollments", post(create_enrollment))
        .route("/api/enrollments/:enrollment_id/status", post(set_enrollment_status))
        // learner dashboard + course progress
        .route("/api/me/dashboard", get(dashboard))
        .route("/api/me/tracks/:track_id/modules/:module_index", get(module_progress))
        .route(
            "/api/me/tracks/:track_id/modules/:module_index/complete",
            post(complete_module),
        )
        .route(
            "/api/me/tracks/:track_id/modules/:module_index/progress",
            post(record_module_progress),
        )
        // mock tests
        .route("/api/mock-tests/:test_id/attempts", post(start_mock_attempt))
        .route("/api/mock-attempts/:attempt_id/answers", post(select_mock_answer))
        .route("/api/mock-attempts/:attempt_id/submit", post(submit_mock_attempt))
        // final exam + certification
        .route("/api/me/tracks/:track_id/exam/eligibility", get(exam_eligibility))
        .route("/api/me/tracks/:track_id/exam/result", post(record_exam_result))
        .route("/api/me/tracks/:track_id/exam/addons", post(purchase_addons))
        .route("/api/me/tracks/:track_id/certificate", get(certificate))
        .route("/api/me/tracks/:track_id/certificate/reissue", post(reissue_certificate))
        .with_state(state)
}

// --- administration ---

#[derive(Serialize)]
struct CreatedUser {
    #[serde(flatten)]
    user: User,
    api_token: String,
}

async fn create_user(
    State(db): State<Db>,
    admin: CurrentUser,
    Json(req): Json<CreateUserReq>,
) -> Result<Json<CreatedUser>, CoreError> {
    admin.require_admin()?;
    if req.full_name.trim().is_empty() || !req.email.contains('@') {
        return Err(CoreError::Validation("a name and a valid email are required".into()));
    }
    let (user, api_token) = store::insert_user(&db, &req).await?;
    Ok(Json(CreatedUser { user, api_token }))
}

async fn list_tracks(
    State(db): State<Db>,
    _user: CurrentUser,
) -> Result<Json<Vec<CertificationTrack>>, CoreError> {
    Ok(Json(store::get_all_certification_tracks(&db).await?))
}

async fn create_track(
    State(db): State<Db>,
    admin: CurrentUser,
    Json(req): Json<CreateTrackReq>,
) -> Result<Json<CertificationTrack>, CoreError> {
    admin.require_admin()?;
    req.validate()?;
    Ok(Json(store::insert_track(&db, &req).await?))
}

async fn create_mock_test(
    State(db): State<Db>,
    admin: CurrentUser,
    Json(req): Json<CreateMockTestReq>,
) -> Result<Json<MockTest>, CoreError> {
    admin.require_admin()?;
    req.validate()?;
    store::get_track(&db, req.track_id)
        .await?
        .ok_or(CoreError::NotFound("certification track"))?;
    Ok(Json(store::insert_mock_test(&db, &req).await?))
}

async fn create_enrollment(
    State(db): State<Db>,
    admin: CurrentUser,
    Json(req): Json<CreateEnrollmentReq>,
) -> Result<Json<Enrollment>, CoreError> {
    admin.require_admin()?;
    let enrollment = lifecycle::enroll(&db, req.learner_id, req.track_id, req.expires_at).await?;
    Ok(Json(enrollment))
}

async fn set_enrollment_status(
    State(db): State<Db>,
    admin: CurrentUser,
    Path(enrollment_id): Path<Uuid>,
    Json(req): Json<SetEnrollmentStatusReq>,
) -> Result<Json<Enrollment>, CoreError> {
    admin.require_admin()?;
    if req.status == EnrollmentStatus::Expired {
        return Err(CoreError::Validation(
            "expiry is derived from the enrollment dates and cannot be set directly".into(),
        ));
    }
    store::get_enrollment_by_id(&db, enrollment_id)
        .await?
        .ok_or(CoreError::NotFound("enrollment"))?;
    Ok(Json(store::update_enrollment_status(&db, enrollment_id, req.status).await?))
}

// --- learner dashboard + course progress ---

#[derive(Deserialize)]
struct DashboardQuery {
    track_id: Uuid,
}

async fn dashboard(
    State(db): State<Db>,
    State(badge): State<BadgeClient>,
    user: CurrentUser,
    Query(q): Query<DashboardQuery>,
) -> Result<Json<lifecycle::DashboardView>, CoreError> {
    Ok(Json(lifecycle::dashboard(&db, &badge, &user, q.track_id).await?))
}

async fn module_progress(
    State(db): State<Db>,
    user: CurrentUser,
    Path((track_id, module_index)): Path<(Uuid, i32)>,
) -> Result<Json<progress::ModuleProgressView>, CoreError> {
    Ok(Json(
        progress::get_module_progress(&db, user.id, track_id, module_index).await?,
    ))
}

#[derive(Serialize)]
struct OverallProgress {
    overall_progress: i16,
}

async fn complete_module(
    State(db): State<Db>,
    user: CurrentUser,
    Path((track_id, module_index)): Path<(Uuid, i32)>,
) -> Result<Json<OverallProgress>, CoreError> {
    let overall = progress::mark_module_completed(&db, user.id, track_id, module_index).await?;
    Ok(Json(OverallProgress { overall_progress: overall }))
}

async fn record_module_progress(
    State(db): State<Db>,
    user: CurrentUser,
    Path((track_id, module_index)): Path<(Uuid, i32)>,
    Json(req): Json<ModuleProgressReq>,
) -> Result<Json<ModuleProgress>, CoreError> {
    let row =
        progress::record_module_progress(&db, user.id, track_id, module_index, req.percent).await?;
    Ok(Json(row))
}

// --- mock tests ---

async fn start_mock_attempt(
    State(mock): State<MockEngine>,
    user: CurrentUser,
    Path(test_id): Path<Uuid>,
) -> Result<Json<StartedAttempt>, CoreError> {
    Ok(Json(mock.start(user.id, test_id).await?))
}

async fn select_mock_answer(
    State(mock): State<MockEngine>,
    user: CurrentUser,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<SelectAnswerReq>,
) -> Result<Json<serde_json::Value>, CoreError> {
    mock.select_answer(user.id, attempt_id, req.question_index, req.option_index)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn submit_mock_attempt(
    State(mock): State<MockEngine>,
    user: CurrentUser,
    Path(attempt_id): Path<Uuid>,
) -> Result<Json<MockOutcome>, CoreError> {
    Ok(Json(mock.submit(user.id, attempt_id).await?))
}

// --- final exam + certification ---

async fn exam_eligibility(
    State(db): State<Db>,
    user: CurrentUser,
    Path(track_id): Path<Uuid>,
) -> Result<Json<exam::EligibilityView>, CoreError> {
    Ok(Json(exam::check_eligibility(&db, user.id, track_id).await?))
}

async fn record_exam_result(
    State(db): State<Db>,
    State(badge): State<BadgeClient>,
    user: CurrentUser,
    Path(track_id): Path<Uuid>,
    Json(req): Json<ExamResultReq>,
) -> Result<Json<exam::ExamOutcomeView>, CoreError> {
    Ok(Json(
        exam::record_attempt_result(&db, &badge, &user, track_id, req.passed).await?,
    ))
}

async fn purchase_addons(
    State(db): State<Db>,
    user: CurrentUser,
    Path(track_id): Path<Uuid>,
    Json(req): Json<PurchaseAddonReq>,
) -> Result<Json<ExamBudget>, CoreError> {
    Ok(Json(
        exam::purchase_addon_attempts(&db, user.id, track_id, req.quantity).await?,
    ))
}

async fn certificate(
    State(db): State<Db>,
    user: CurrentUser,
    Path(track_id): Path<Uuid>,
) -> Result<Json<crate::certificate::CertificateView>, CoreError> {
    let cert = store::latest_certificate(&db, user.id, track_id)
        .await?
        .ok_or(CoreError::NotFound("certificate"))?;
    let today = chrono::Utc::now().date_naive();
    Ok(Json(crate::certificate::CertificateView::build(&cert, today)))
}

async fn reissue_certificate(
    State(db): State<Db>,
    State(badge): State<BadgeClient>,
    user: CurrentUser,
    Path(track_id): Path<Uuid>,
) -> Result<Json<ReissueResp>, CoreError> {
    let (certificate, exam) = lifecycle::reissue(&db, &badge, &user, track_id).await?;
    Ok(Json(ReissueResp { certificate, exam }))
}

#[derive(Serialize)]
struct ReissueResp {
    certificate: crate::certificate::CertificateView,
    exam: ExamBudget,
}
