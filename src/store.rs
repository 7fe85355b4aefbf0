//! Persistence collaborator: every SQL statement in the service lives here.
//!
//! The domain modules call these as black-box CRUD and own only the decision
//! of when to call them and with what values.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::db::Db;
use crate::error::CoreError;
use crate::models::*;

// ---- users ----

// The api_token column never leaves this module except through insert_user.

pub async fn find_user_by_token(db: &Db, token: &str) -> Result<Option<User>, CoreError> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, full_name, email, role, created_at FROM users WHERE api_token = $1",
    )
    .bind(token)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

pub async fn get_user(db: &Db, id: Uuid) -> Result<Option<User>, CoreError> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, full_name, email, role, created_at FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

pub async fn insert_user(db: &Db, req: &CreateUserReq) -> Result<(User, String), CoreError> {
    let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (id, full_name, email, role, api_token)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, full_name, email, role, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(&req.full_name)
    .bind(&req.email)
    .bind(req.role)
    .bind(&token)
    .fetch_one(db)
    .await?;
    Ok((user, token))
}

// ---- certification tracks ----

pub async fn get_all_certification_tracks(db: &Db) -> Result<Vec<CertificationTrack>, CoreError> {
    let tracks = sqlx::query_as::<_, CertificationTrack>(
        "SELECT * FROM certification_tracks ORDER BY created_at",
    )
    .fetch_all(db)
    .await?;
    Ok(tracks)
}

pub async fn get_track(db: &Db, id: Uuid) -> Result<Option<CertificationTrack>, CoreError> {
    let track =
        sqlx::query_as::<_, CertificationTrack>("SELECT * FROM certification_tracks WHERE id = $1")
            .bind(id)
            .fetch_optional(db)
            .await?;
    Ok(track)
}

pub async fn insert_track(db: &Db, req: &CreateTrackReq) -> Result<CertificationTrack, CoreError> {
    let track = sqlx::query_as::<_, CertificationTrack>(
        "INSERT INTO certification_tracks
             (id, name, module_count, passing_score, exam_regular_attempts,
              reissue_attempts, validity_years, eligibility_threshold)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(&req.name)
    .bind(req.module_count)
    .bind(req.passing_score)
    .bind(req.exam_regular_attempts)
    .bind(req.reissue_attempts)
    .bind(req.validity_years)
    .bind(req.eligibility_threshold.unwrap_or(100))
    .fetch_one(db)
    .await?;
    Ok(track)
}

// ---- enrollments ----

pub async fn get_enrollment(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
) -> Result<Option<Enrollment>, CoreError> {
    let enrollment = sqlx::query_as::<_, Enrollment>(
        "SELECT * FROM enrollments WHERE learner_id = $1 AND track_id = $2",
    )
    .bind(learner_id)
    .bind(track_id)
    .fetch_optional(db)
    .await?;
    Ok(enrollment)
}

pub async fn get_enrollment_by_id(db: &Db, id: Uuid) -> Result<Option<Enrollment>, CoreError> {
    let enrollment = sqlx::query_as::<_, Enrollment>("SELECT * FROM enrollments WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(enrollment)
}

pub async fn insert_enrollment(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
    status: EnrollmentStatus,
    expires_at: Option<DateTime<Utc>>,
) -> Result<Enrollment, CoreError> {
    let enrollment = sqlx::query_as::<_, Enrollment>(
        "INSERT INTO enrollments (id, learner_id, track_id, status, expires_at)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(learner_id)
    .bind(track_id)
    .bind(status)
    .bind(expires_at)
    .fetch_one(db)
    .await?;
    Ok(enrollment)
}

pub async fn update_enrollment_status(
    db: &Db,
    enrollment_id: Uuid,
    status: EnrollmentStatus,
) -> Result<Enrollment, CoreError> {
    let enrollment = sqlx::query_as::<_, Enrollment>(
        "UPDATE enrollments SET status = $2 WHERE id = $1 RETURNING *",
    )
    .bind(enrollment_id)
    .bind(status)
    .fetch_one(db)
    .await?;
    Ok(enrollment)
}

pub async fn update_overall_progress(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
    overall: i16,
) -> Result<(), CoreError> {
    sqlx::query(
        "UPDATE enrollments SET overall_progress = $3 WHERE learner_id = $1 AND track_id = $2",
    )
    .bind(learner_id)
    .bind(track_id)
    .bind(overall)
    .execute(db)
    .await?;
    Ok(())
}

// ---- module progress ----

pub async fn get_user_course_progress(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
) -> Result<Vec<ModuleProgress>, CoreError> {
    let rows = sqlx::query_as::<_, ModuleProgress>(
        "SELECT * FROM module_progress
         WHERE learner_id = $1 AND track_id = $2
         ORDER BY module_index",
    )
    .bind(learner_id)
    .bind(track_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn get_module_progress(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
    module_index: i32,
) -> Result<Option<ModuleProgress>, CoreError> {
    let row = sqlx::query_as::<_, ModuleProgress>(
        "SELECT * FROM module_progress
         WHERE learner_id = $1 AND track_id = $2 AND module_index = $3",
    )
    .bind(learner_id)
    .bind(track_id)
    .bind(module_index)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn update_course_progress(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
    module_index: i32,
    progress: i16,
    status: ModuleStatus,
) -> Result<ModuleProgress, CoreError> {
    let row = sqlx::query_as::<_, ModuleProgress>(
        "INSERT INTO module_progress (id, learner_id, track_id, module_index, progress, status)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (learner_id, track_id, module_index)
         DO UPDATE SET progress = EXCLUDED.progress, status = EXCLUDED.status, updated_at = now()
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(learner_id)
    .bind(track_id)
    .bind(module_index)
    .bind(progress)
    .bind(status)
    .fetch_one(db)
    .await?;
    Ok(row)
}

// ---- mock tests ----

pub async fn get_mock_test_by_id(db: &Db, id: Uuid) -> Result<Option<MockTest>, CoreError> {
    let test = sqlx::query_as::<_, MockTest>("SELECT * FROM mock_tests WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(test)
}

pub async fn insert_mock_test(db: &Db, req: &CreateMockTestReq) -> Result<MockTest, CoreError> {
    let test = sqlx::query_as::<_, MockTest>(
        "INSERT INTO mock_tests (id, track_id, title, duration_minutes, passing_score, questions)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(req.track_id)
    .bind(&req.title)
    .bind(req.duration_minutes)
    .bind(req.passing_score)
    .bind(Json(&req.questions))
    .fetch_one(db)
    .await?;
    Ok(test)
}

/// Insert a terminal mock attempt. The conflict clause makes a replayed
/// finalize a no-op rather than a duplicate row.
pub async fn save_mock_test_result(db: &Db, attempt: &MockTestAttempt) -> Result<(), CoreError> {
    sqlx::query(
        "INSERT INTO mock_test_attempts
             (id, learner_id, test_id, answers, score, passed, completed, started_at, finished_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(attempt.id)
    .bind(attempt.learner_id)
    .bind(attempt.test_id)
    .bind(Json(&attempt.answers.0))
    .bind(attempt.score)
    .bind(attempt.passed)
    .bind(attempt.completed)
    .bind(attempt.started_at)
    .bind(attempt.finished_at)
    .execute(db)
    .await?;
    Ok(())
}

// ---- exam budgets ----

/// Fetch the learner's budget, creating it from the track defaults if the
/// enrollment predates budget tracking.
pub async fn ensure_exam_budget(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
    regular_default: i16,
) -> Result<ExamBudget, CoreError> {
    sqlx::query(
        "INSERT INTO exam_budgets (learner_id, track_id, remaining_regular)
         VALUES ($1, $2, $3)
         ON CONFLICT (learner_id, track_id) DO NOTHING",
    )
    .bind(learner_id)
    .bind(track_id)
    .bind(regular_default)
    .execute(db)
    .await?;

    let budget = sqlx::query_as::<_, ExamBudget>(
        "SELECT * FROM exam_budgets WHERE learner_id = $1 AND track_id = $2",
    )
    .bind(learner_id)
    .bind(track_id)
    .fetch_one(db)
    .await?;
    Ok(budget)
}

pub async fn get_exam_budget(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
) -> Result<Option<ExamBudget>, CoreError> {
    let budget = sqlx::query_as::<_, ExamBudget>(
        "SELECT * FROM exam_budgets WHERE learner_id = $1 AND track_id = $2",
    )
    .bind(learner_id)
    .bind(track_id)
    .fetch_optional(db)
    .await?;
    Ok(budget)
}

pub async fn update_exam_budget(db: &Db, budget: &ExamBudget) -> Result<ExamBudget, CoreError> {
    let budget = sqlx::query_as::<_, ExamBudget>(
        "UPDATE exam_budgets
         SET remaining_regular = $3, remaining_addon = $4, status = $5, updated_at = now()
         WHERE learner_id = $1 AND track_id = $2
         RETURNING *",
    )
    .bind(budget.learner_id)
    .bind(budget.track_id)
    .bind(budget.remaining_regular)
    .bind(budget.remaining_addon)
    .bind(budget.status)
    .fetch_one(db)
    .await?;
    Ok(budget)
}

// ---- certificates ----

pub async fn latest_certificate(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
) -> Result<Option<Certificate>, CoreError> {
    let cert = sqlx::query_as::<_, Certificate>(
        "SELECT * FROM certificates
         WHERE learner_id = $1 AND track_id = $2
         ORDER BY issued_on DESC, created_at DESC
         LIMIT 1",
    )
    .bind(learner_id)
    .bind(track_id)
    .fetch_optional(db)
    .await?;
    Ok(cert)
}

pub async fn insert_certificate(db: &Db, cert: &Certificate) -> Result<Certificate, CoreError> {
    let cert = sqlx::query_as::<_, Certificate>(
        "INSERT INTO certificates
             (id, certificate_number, learner_id, track_id, issued_on, expires_on, badge_url)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING *",
    )
    .bind(cert.id)
    .bind(&cert.certificate_number)
    .bind(cert.learner_id)
    .bind(cert.track_id)
    .bind(cert.issued_on)
    .bind(cert.expires_on)
    .bind(&cert.badge_url)
    .fetch_one(db)
    .await?;
    Ok(cert)
}

pub async fn set_badge_url(db: &Db, certificate_id: Uuid, url: &str) -> Result<(), CoreError> {
    sqlx::query("UPDATE certificates SET badge_url = $2 WHERE id = $1")
        .bind(certificate_id)
        .bind(url)
        .execute(db)
        .await?;
    Ok(())
}
