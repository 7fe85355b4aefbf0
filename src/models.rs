use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Learner,
    Admin,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "enrollment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Suspended,
    Expired,
    Admin,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Enrollment {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub track_id: Uuid,
    pub status: EnrollmentStatus,
    pub overall_progress: i16,
    pub enrolled_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "module_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    NotStarted,
    InProgress,
    Completed,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct ModuleProgress {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub track_id: Uuid,
    pub module_index: i32,
    pub progress: i16,
    pub status: ModuleStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct CertificationTrack {
    pub id: Uuid,
    pub name: String,
    pub module_count: i32,
    pub passing_score: i16,
    pub exam_regular_attempts: i16,
    pub reissue_attempts: i16,
    pub validity_years: i16,
    pub eligibility_threshold: i16,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MockQuestion {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_option: i16,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct MockTest {
    pub id: Uuid,
    pub track_id: Uuid,
    pub title: String,
    pub duration_minutes: i32,
    pub passing_score: i16,
    pub questions: sqlx::types::Json<Vec<MockQuestion>>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct MockTestAttempt {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub test_id: Uuid,
    pub answers: sqlx::types::Json<Vec<i16>>,
    pub score: i16,
    pub passed: bool,
    pub completed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "exam_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExamStatus {
    NotAttempted,
    Passed,
    Failed,
    NotApplicable,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct ExamBudget {
    pub learner_id: Uuid,
    pub track_id: Uuid,
    pub remaining_regular: i16,
    pub remaining_addon: i16,
    pub status: ExamStatus,
    pub updated_at: DateTime<Utc>,
}

impl ExamBudget {
    pub fn attempts_available(&self) -> i16 {
        self.remaining_regular + self.remaining_addon
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Certificate {
    pub id: Uuid,
    pub certificate_number: String,
    pub learner_id: Uuid,
    pub track_id: Uuid,
    pub issued_on: NaiveDate,
    pub expires_on: NaiveDate,
    pub badge_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---- request payloads ----

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateUserReq {
    pub full_name: String,
    pub email: String,
    pub role: UserRole,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateTrackReq {
    pub name: String,
    pub module_count: i32,
    pub passing_score: i16,
    pub exam_regular_attempts: i16,
    pub reissue_attempts: i16,
    pub validity_years: i16,
    pub eligibility_threshold: Option<i16>,
}

impl CreateTrackReq {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("track name is required".into()));
        }
        if self.module_count < 1 {
            return Err(CoreError::Validation("module_count must be at least 1".into()));
        }
        if !(0..=100).contains(&self.passing_score) {
            return Err(CoreError::Validation("passing_score must be between 0 and 100".into()));
        }
        if self.exam_regular_attempts < 0 || self.reissue_attempts < 0 {
            return Err(CoreError::Validation("attempt counts must not be negative".into()));
        }
        if self.validity_years < 1 {
            return Err(CoreError::Validation("validity_years must be at least 1".into()));
        }
        if let Some(t) = self.eligibility_threshold {
            if !(0..=100).contains(&t) {
                return Err(CoreError::Validation(
                    "eligibility_threshold must be between 0 and 100".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateMockTestReq {
    pub track_id: Uuid,
    pub title: String,
    pub duration_minutes: i32,
    pub passing_score: i16,
    pub questions: Vec<MockQuestion>,
}

impl CreateMockTestReq {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.duration_minutes < 1 {
            return Err(CoreError::Validation("duration_minutes must be at least 1".into()));
        }
        if !(0..=100).contains(&self.passing_score) {
            return Err(CoreError::Validation("passing_score must be between 0 and 100".into()));
        }
        if self.questions.is_empty() {
            return Err(CoreError::Validation("a mock test needs at least one question".into()));
        }
        for (i, q) in self.questions.iter().enumerate() {
            if q.options.len() < 2 {
                return Err(CoreError::Validation(format!(
                    "question {i} needs at least two options"
                )));
            }
            if q.correct_option < 0 || q.correct_option as usize >= q.options.len() {
                return Err(CoreError::Validation(format!(
                    "question {i} has an answer key outside its option range"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateEnrollmentReq {
    pub learner_id: Uuid,
    pub track_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetEnrollmentStatusReq {
    pub status: EnrollmentStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ModuleProgressReq {
    pub percent: i16,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SelectAnswerReq {
    pub question_index: usize,
    pub option_index: i16,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExamResultReq {
    pub passed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PurchaseAddonReq {
    pub quantity: i16,
}
