//! Certification state machine.
//!
//! Every surface that shows a learner's standing reads it from
//! [`derive_state`]; nothing else in the service computes status. The
//! derived state is a pure function of the persisted records and today's
//! date, so "transitions" like certificate expiry happen at read time
//! without a scheduler.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::badge::BadgeClient;
use crate::certificate::{self, CertificateStatus, CertificateView};
use crate::db::Db;
use crate::error::CoreError;
use crate::models::{
    Certificate, CertificationTrack, Enrollment, EnrollmentStatus, ExamBudget, ExamStatus, User,
};
use crate::progress::{self, ModuleProgressView};
use crate::store;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CertificationState {
    NotEnrolled,
    Enrolled,
    InProgress,
    ReadyForExam,
    ExamFailed,
    Certified,
    Expired,
}

/// Derive the authoritative certification state from a learner snapshot.
///
/// A failed learner with attempts still available derives to `ReadyForExam`
/// (they may retry immediately); `ExamFailed` is the locked-out case, which
/// only an addon purchase leaves.
pub fn derive_state(
    enrollment: Option<&Enrollment>,
    has_started: bool,
    overall_progress: i16,
    threshold: i16,
    budget: Option<&ExamBudget>,
    cert: Option<&Certificate>,
    today: NaiveDate,
) -> CertificationState {
    if enrollment.is_none() {
        return CertificationState::NotEnrolled;
    }
    if let Some(cert) = cert {
        return match certificate::status_on(cert.expires_on, today) {
            CertificateStatus::Expired => CertificationState::Expired,
            _ => CertificationState::Certified,
        };
    }
    if let Some(budget) = budget {
        // Passed with a missing certificate row is healed by the caller;
        // the derived state already reflects the heal.
        if budget.status == ExamStatus::Passed {
            return CertificationState::Certified;
        }
        if budget.status == ExamStatus::Failed && budget.attempts_available() == 0 {
            return CertificationState::ExamFailed;
        }
    }
    if overall_progress >= threshold {
        CertificationState::ReadyForExam
    } else if has_started {
        CertificationState::InProgress
    } else {
        CertificationState::Enrolled
    }
}

/// Load the enrollment and apply read-time expiry detection: an active
/// enrollment whose expiry date has passed is written back as expired.
pub async fn refreshed_enrollment(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
) -> Result<Option<Enrollment>, CoreError> {
    let Some(enrollment) = store::get_enrollment(db, learner_id, track_id).await? else {
        return Ok(None);
    };
    if enrollment.status == EnrollmentStatus::Active
        && enrollment.expires_at.is_some_and(|at| at < Utc::now())
    {
        tracing::info!(%learner_id, %track_id, "enrollment lapsed, marking expired");
        let updated =
            store::update_enrollment_status(db, enrollment.id, EnrollmentStatus::Expired).await?;
        return Ok(Some(updated));
    }
    Ok(Some(enrollment))
}

/// Return the certificate in force, issuing one if none exists. Called on
/// the pass transition and by the self-heal path; an unexpired certificate
/// is never duplicated.
pub async fn ensure_certificate(
    db: &Db,
    badge: &BadgeClient,
    learner: &User,
    track: &CertificationTrack,
) -> Result<Certificate, CoreError> {
    let today = Utc::now().date_naive();
    if let Some(existing) = store::latest_certificate(db, learner.id, track.id).await? {
        if certificate::status_on(existing.expires_on, today) != CertificateStatus::Expired {
            return Ok(existing);
        }
    }
    issue_certificate(db, badge, learner, track).await
}

async fn issue_certificate(
    db: &Db,
    badge: &BadgeClient,
    learner: &User,
    track: &CertificationTrack,
) -> Result<Certificate, CoreError> {
    let today = Utc::now().date_naive();
    let cert = Certificate {
        id: Uuid::new_v4(),
        certificate_number: certificate::certificate_number(today),
        learner_id: learner.id,
        track_id: track.id,
        issued_on: today,
        expires_on: certificate::expiry_for(today, track.validity_years),
        badge_url: None,
        created_at: Utc::now(),
    };
    let mut cert = store::insert_certificate(db, &cert).await?;
    tracing::info!(
        learner_id = %learner.id,
        track_id = %track.id,
        certificate_number = %cert.certificate_number,
        "certificate issued"
    );

    if let Some(url) = badge.request_issuance(&cert, learner).await {
        store::set_badge_url(db, cert.id, &url).await?;
        cert.badge_url = Some(url);
    }
    Ok(cert)
}

/// Paid reissue of an expired certificate: a fresh certificate row with a
/// new validity window, and the exam budget reset to the track's reissue
/// allowance. Only legal once the current certificate has expired.
pub async fn reissue(
    db: &Db,
    badge: &BadgeClient,
    learner: &User,
    track_id: Uuid,
) -> Result<(CertificateView, ExamBudget), CoreError> {
    let track = store::get_track(db, track_id)
        .await?
        .ok_or(CoreError::NotFound("certification track"))?;
    refreshed_enrollment(db, learner.id, track_id)
        .await?
        .ok_or(CoreError::NotFound("enrollment"))?;
    let today = Utc::now().date_naive();

    let current = store::latest_certificate(db, learner.id, track_id)
        .await?
        .ok_or(CoreError::NotFound("certificate"))?;
    if certificate::status_on(current.expires_on, today) != CertificateStatus::Expired {
        return Err(CoreError::Precondition(format!(
            "certificate {} is still valid until {}; reissue applies to expired certificates only",
            current.certificate_number, current.expires_on
        )));
    }

    let cert = issue_certificate(db, badge, learner, &track).await?;

    let mut budget =
        store::ensure_exam_budget(db, learner.id, track_id, track.exam_regular_attempts).await?;
    budget.remaining_regular = track.reissue_attempts;
    budget.status = ExamStatus::NotAttempted;
    let budget = store::update_exam_budget(db, &budget).await?;

    tracing::info!(
        learner_id = %learner.id,
        %track_id,
        certificate_number = %cert.certificate_number,
        reissue_attempts = track.reissue_attempts,
        "certificate reissued"
    );
    Ok((CertificateView::build(&cert, today), budget))
}

#[skip_serializing_none]
#[derive(Serialize, Debug, Clone)]
pub struct DashboardView {
    pub track: CertificationTrack,
    pub state: CertificationState,
    pub enrollment: Option<Enrollment>,
    pub overall_progress: i16,
    pub eligibility_threshold: i16,
    pub modules: Vec<ModuleProgressView>,
    pub exam: Option<ExamBudget>,
    pub certificate: Option<CertificateView>,
}

/// The one read every UI surface shares. Also the self-heal point: a passed
/// exam with no certificate row gets its certificate issued here.
pub async fn dashboard(
    db: &Db,
    badge: &BadgeClient,
    learner: &User,
    track_id: Uuid,
) -> Result<DashboardView, CoreError> {
    let track = store::get_track(db, track_id)
        .await?
        .ok_or(CoreError::NotFound("certification track"))?;
    let enrollment = refreshed_enrollment(db, learner.id, track_id).await?;

    let rows = store::get_user_course_progress(db, learner.id, track_id).await?;
    let overall =
        progress::overall_progress(progress::completed_count(&rows), track.module_count as usize);
    let has_started = rows.iter().any(|r| r.progress > 0);

    let budget = store::get_exam_budget(db, learner.id, track_id).await?;
    let mut cert = store::latest_certificate(db, learner.id, track_id).await?;

    if cert.is_none()
        && enrollment.is_some()
        && budget.as_ref().is_some_and(|b| b.status == ExamStatus::Passed)
    {
        tracing::warn!(
            learner_id = %learner.id,
            %track_id,
            "exam passed but certificate record missing, issuing"
        );
        cert = Some(ensure_certificate(db, badge, learner, &track).await?);
    }

    let today = Utc::now().date_naive();
    let state = derive_state(
        enrollment.as_ref(),
        has_started,
        overall,
        track.eligibility_threshold,
        budget.as_ref(),
        cert.as_ref(),
        today,
    );

    Ok(DashboardView {
        state,
        enrollment,
        overall_progress: overall,
        eligibility_threshold: track.eligibility_threshold,
        modules: progress::padded_modules(&rows, track.module_count),
        exam: budget,
        certificate: cert.map(|c| CertificateView::build(&c, today)),
        track,
    })
}

/// Enroll a learner into a track and seed their exam budget.
pub async fn enroll(
    db: &Db,
    req_learner_id: Uuid,
    track_id: Uuid,
    expires_at: Option<chrono::DateTime<Utc>>,
) -> Result<Enrollment, CoreError> {
    let track = store::get_track(db, track_id)
        .await?
        .ok_or(CoreError::NotFound("certification track"))?;
    let learner = store::get_user(db, req_learner_id)
        .await?
        .ok_or(CoreError::NotFound("learner"))?;
    if let Some(at) = expires_at {
        if at < Utc::now() {
            return Err(CoreError::Validation(
                "enrollment expiry must not be in the past".into(),
            ));
        }
    }
    if store::get_enrollment(db, learner.id, track_id).await?.is_some() {
        return Err(CoreError::Precondition(
            "this learner is already enrolled in the track".into(),
        ));
    }

    let enrollment =
        store::insert_enrollment(db, learner.id, track_id, EnrollmentStatus::Active, expires_at)
            .await?;
    store::ensure_exam_budget(db, learner.id, track_id, track.exam_regular_attempts).await?;
    tracing::info!(learner_id = %learner.id, %track_id, "learner enrolled");
    Ok(enrollment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn enrollment(status: EnrollmentStatus) -> Enrollment {
        Enrollment {
            id: Uuid::new_v4(),
            learner_id: Uuid::new_v4(),
            track_id: Uuid::new_v4(),
            status,
            overall_progress: 0,
            enrolled_at: Utc::now() - Duration::days(30),
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    fn budget(regular: i16, addon: i16, status: ExamStatus) -> ExamBudget {
        ExamBudget {
            learner_id: Uuid::new_v4(),
            track_id: Uuid::new_v4(),
            remaining_regular: regular,
            remaining_addon: addon,
            status,
            updated_at: Utc::now(),
        }
    }

    fn cert(expires_on: NaiveDate) -> Certificate {
        Certificate {
            id: Uuid::new_v4(),
            certificate_number: "CT-2023-ABCD1234".into(),
            learner_id: Uuid::new_v4(),
            track_id: Uuid::new_v4(),
            issued_on: d(2023, 1, 15),
            expires_on,
            badge_url: None,
            created_at: Utc::now(),
        }
    }

    fn today() -> NaiveDate {
        d(2025, 11, 1)
    }

    #[test]
    fn unenrolled_learner() {
        assert_eq!(
            derive_state(None, false, 0, 100, None, None, today()),
            CertificationState::NotEnrolled
        );
    }

    #[test]
    fn enrollment_without_activity() {
        let e = enrollment(EnrollmentStatus::Active);
        let b = budget(3, 0, ExamStatus::NotAttempted);
        assert_eq!(
            derive_state(Some(&e), false, 0, 100, Some(&b), None, today()),
            CertificationState::Enrolled
        );
    }

    #[test]
    fn any_module_progress_means_in_progress() {
        let e = enrollment(EnrollmentStatus::Active);
        let b = budget(3, 0, ExamStatus::NotAttempted);
        // One module at 30%: overall completion still 0.
        assert_eq!(
            derive_state(Some(&e), true, 0, 100, Some(&b), None, today()),
            CertificationState::InProgress
        );
    }

    #[test]
    fn threshold_unlocks_ready_for_exam() {
        let e = enrollment(EnrollmentStatus::Active);
        let b = budget(3, 0, ExamStatus::NotAttempted);
        assert_eq!(
            derive_state(Some(&e), true, 67, 100, Some(&b), None, today()),
            CertificationState::InProgress
        );
        assert_eq!(
            derive_state(Some(&e), true, 100, 100, Some(&b), None, today()),
            CertificationState::ReadyForExam
        );
    }

    #[test]
    fn failure_with_budget_left_allows_retry() {
        let e = enrollment(EnrollmentStatus::Active);
        let b = budget(1, 0, ExamStatus::Failed);
        assert_eq!(
            derive_state(Some(&e), true, 100, 100, Some(&b), None, today()),
            CertificationState::ReadyForExam
        );
    }

    #[test]
    fn exhausted_budget_locks_out() {
        let e = enrollment(EnrollmentStatus::Active);
        let b = budget(0, 0, ExamStatus::Failed);
        assert_eq!(
            derive_state(Some(&e), true, 100, 100, Some(&b), None, today()),
            CertificationState::ExamFailed
        );

        // An addon purchase replenishes the budget and reopens the exam.
        let b = budget(0, 2, ExamStatus::Failed);
        assert_eq!(
            derive_state(Some(&e), true, 100, 100, Some(&b), None, today()),
            CertificationState::ReadyForExam
        );
    }

    #[test]
    fn valid_certificate_wins_over_everything() {
        let e = enrollment(EnrollmentStatus::Active);
        let b = budget(0, 0, ExamStatus::Passed);
        let c = cert(d(2026, 1, 15));
        assert_eq!(
            derive_state(Some(&e), true, 100, 100, Some(&b), Some(&c), today()),
            CertificationState::Certified
        );
    }

    #[test]
    fn lapsed_certificate_derives_expired() {
        let e = enrollment(EnrollmentStatus::Active);
        let b = budget(0, 0, ExamStatus::Passed);
        let c = cert(d(2025, 10, 1));
        assert_eq!(
            derive_state(Some(&e), true, 100, 100, Some(&b), Some(&c), today()),
            CertificationState::Expired
        );
    }

    #[test]
    fn passed_without_certificate_still_reads_certified() {
        // The async read path heals the missing row; the derived state must
        // not regress to ReadyForExam in the meantime.
        let e = enrollment(EnrollmentStatus::Active);
        let b = budget(1, 0, ExamStatus::Passed);
        assert_eq!(
            derive_state(Some(&e), true, 100, 100, Some(&b), None, today()),
            CertificationState::Certified
        );
    }
}
