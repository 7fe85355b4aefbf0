//! Final exam attempt budget.
//!
//! The budget is the consumable resource behind certification: regular
//! attempts are granted at enrollment, addon attempts are purchased, and a
//! pass freezes the budget for good. All mutation goes through
//! [`record_attempt_result`] and [`purchase_addon_attempts`].

use serde::Serialize;
use uuid::Uuid;

use crate::badge::BadgeClient;
use crate::certificate::CertificateView;
use crate::db::Db;
use crate::error::CoreError;
use crate::lifecycle;
use crate::models::{
    CertificationTrack, Enrollment, EnrollmentStatus, ExamBudget, ExamStatus, User,
};
use crate::store;

/// Pure eligibility rule consumed by the precondition check and the
/// dashboard alike.
pub fn can_attempt(budget: &ExamBudget, overall_progress: i16, threshold: i16) -> bool {
    budget.status != ExamStatus::Passed
        && budget.attempts_available() > 0
        && overall_progress >= threshold
}

/// Apply one exam outcome to the budget. A pass freezes it; a fail consumes
/// a regular attempt before an addon attempt.
pub fn apply_result(budget: &mut ExamBudget, passed: bool) -> Result<(), CoreError> {
    if budget.status == ExamStatus::Passed {
        return Err(CoreError::Precondition(
            "this certification has already been earned; no further exam attempts are accepted"
                .into(),
        ));
    }
    if passed {
        budget.status = ExamStatus::Passed;
        return Ok(());
    }
    if budget.remaining_regular > 0 {
        budget.remaining_regular -= 1;
    } else if budget.remaining_addon > 0 {
        budget.remaining_addon -= 1;
    } else {
        return Err(CoreError::Precondition(
            "you have 0 attempts remaining, purchase more to continue".into(),
        ));
    }
    budget.status = ExamStatus::Failed;
    Ok(())
}

#[derive(Serialize, Debug, Clone)]
pub struct EligibilityView {
    pub eligible: bool,
    pub reasons: Vec<String>,
    pub overall_progress: i16,
    pub threshold: i16,
    pub remaining_regular: i16,
    pub remaining_addon: i16,
    pub status: ExamStatus,
}

#[derive(Serialize, Debug, Clone)]
pub struct ExamOutcomeView {
    pub status: ExamStatus,
    pub remaining_regular: i16,
    pub remaining_addon: i16,
    pub certificate: Option<CertificateView>,
}

fn eligibility_reasons(
    enrollment: &Enrollment,
    budget: &ExamBudget,
    overall_progress: i16,
    threshold: i16,
) -> Vec<String> {
    let mut reasons = Vec::new();
    match enrollment.status {
        EnrollmentStatus::Active | EnrollmentStatus::Admin => {}
        EnrollmentStatus::Suspended => reasons.push("your enrollment is suspended".into()),
        EnrollmentStatus::Expired => {
            reasons.push("your enrollment has expired; contact your administrator".into())
        }
    }
    if budget.status == ExamStatus::Passed {
        reasons.push("this certification has already been earned".into());
    } else if budget.attempts_available() == 0 {
        reasons.push("you have 0 attempts remaining, purchase more to continue".into());
    }
    if overall_progress < threshold {
        reasons.push(format!(
            "course progress is {overall_progress}%, the exam unlocks at {threshold}%"
        ));
    }
    reasons
}

struct ExamContext {
    track: CertificationTrack,
    budget: ExamBudget,
    view: EligibilityView,
}

async fn load_context(db: &Db, learner_id: Uuid, track_id: Uuid) -> Result<ExamContext, CoreError> {
    let track = store::get_track(db, track_id)
        .await?
        .ok_or(CoreError::NotFound("certification track"))?;
    let enrollment = lifecycle::refreshed_enrollment(db, learner_id, track_id)
        .await?
        .ok_or(CoreError::NotFound("enrollment"))?;
    let budget =
        store::ensure_exam_budget(db, learner_id, track_id, track.exam_regular_attempts).await?;

    let rows = store::get_user_course_progress(db, learner_id, track_id).await?;
    let overall = crate::progress::overall_progress(
        crate::progress::completed_count(&rows),
        track.module_count as usize,
    );

    let threshold = track.eligibility_threshold;
    let reasons = eligibility_reasons(&enrollment, &budget, overall, threshold);
    let view = EligibilityView {
        eligible: reasons.is_empty(),
        reasons,
        overall_progress: overall,
        threshold,
        remaining_regular: budget.remaining_regular,
        remaining_addon: budget.remaining_addon,
        status: budget.status,
    };
    Ok(ExamContext { track, budget, view })
}

/// The check callers must pass before triggering any proctoring side effect.
pub async fn check_eligibility(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
) -> Result<EligibilityView, CoreError> {
    Ok(load_context(db, learner_id, track_id).await?.view)
}

/// Record a final-exam outcome. Rejected up front when the learner is not
/// eligible, so an ineligible call leaves no partial state behind.
pub async fn record_attempt_result(
    db: &Db,
    badge: &BadgeClient,
    learner: &User,
    track_id: Uuid,
    passed: bool,
) -> Result<ExamOutcomeView, CoreError> {
    let ctx = load_context(db, learner.id, track_id).await?;
    if !ctx.view.eligible {
        return Err(CoreError::Precondition(ctx.view.reasons.join("; ")));
    }

    let mut budget = ctx.budget;
    apply_result(&mut budget, passed)?;
    let budget = store::update_exam_budget(db, &budget).await?;

    let certificate = if passed {
        let cert = lifecycle::ensure_certificate(db, badge, learner, &ctx.track).await?;
        Some(CertificateView::build(&cert, chrono::Utc::now().date_naive()))
    } else {
        None
    };

    tracing::info!(
        learner_id = %learner.id,
        %track_id,
        passed,
        remaining_regular = budget.remaining_regular,
        remaining_addon = budget.remaining_addon,
        "final exam result recorded"
    );

    Ok(ExamOutcomeView {
        status: budget.status,
        remaining_regular: budget.remaining_regular,
        remaining_addon: budget.remaining_addon,
        certificate,
    })
}

/// Add purchased attempts. Never touches the exam status: a locked-out
/// learner becomes attemptable again purely by the budget refill.
pub async fn purchase_addon_attempts(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
    quantity: i16,
) -> Result<ExamBudget, CoreError> {
    if quantity < 1 {
        return Err(CoreError::Validation(
            "addon quantity must be at least 1".into(),
        ));
    }
    let track = store::get_track(db, track_id)
        .await?
        .ok_or(CoreError::NotFound("certification track"))?;
    store::get_enrollment(db, learner_id, track_id)
        .await?
        .ok_or(CoreError::NotFound("enrollment"))?;

    let mut budget =
        store::ensure_exam_budget(db, learner_id, track_id, track.exam_regular_attempts).await?;
    if budget.status == ExamStatus::Passed {
        return Err(CoreError::Precondition(
            "this certification has already been earned; no further attempts are needed".into(),
        ));
    }
    budget.remaining_addon += quantity;
    let budget = store::update_exam_budget(db, &budget).await?;
    tracing::info!(%learner_id, %track_id, quantity, "addon attempts purchased");
    Ok(budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

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

    #[test]
    fn two_failures_exhaust_two_regular_attempts() {
        let mut b = budget(2, 0, ExamStatus::NotAttempted);
        apply_result(&mut b, false).unwrap();
        assert_eq!(b.remaining_regular, 1);
        apply_result(&mut b, false).unwrap();
        assert_eq!(b.remaining_regular, 0);
        assert_eq!(b.status, ExamStatus::Failed);

        assert!(!can_attempt(&b, 100, 100));
        assert!(matches!(
            apply_result(&mut b, false),
            Err(CoreError::Precondition(_))
        ));
    }

    #[test]
    fn regular_attempts_consumed_before_addons() {
        let mut b = budget(1, 2, ExamStatus::NotAttempted);
        apply_result(&mut b, false).unwrap();
        assert_eq!((b.remaining_regular, b.remaining_addon), (0, 2));
        apply_result(&mut b, false).unwrap();
        assert_eq!((b.remaining_regular, b.remaining_addon), (0, 1));
    }

    #[test]
    fn pass_freezes_the_budget() {
        let mut b = budget(2, 1, ExamStatus::NotAttempted);
        apply_result(&mut b, true).unwrap();
        assert_eq!(b.status, ExamStatus::Passed);
        assert_eq!((b.remaining_regular, b.remaining_addon), (2, 1));

        // Certification is terminal absent an explicit reissue.
        assert!(matches!(
            apply_result(&mut b, true),
            Err(CoreError::Precondition(_))
        ));
        assert!(matches!(
            apply_result(&mut b, false),
            Err(CoreError::Precondition(_))
        ));
        assert!(!can_attempt(&b, 100, 100));
    }

    #[test]
    fn progress_threshold_gates_attempts() {
        let b = budget(3, 0, ExamStatus::NotAttempted);
        // Learner at 67% under a 100% completion policy.
        assert!(!can_attempt(&b, 67, 100));
        assert!(can_attempt(&b, 100, 100));
        // A partial-completion policy admits the same learner.
        assert!(can_attempt(&b, 67, 60));
    }

    #[test]
    fn failed_learner_with_budget_can_retry() {
        let mut b = budget(2, 0, ExamStatus::NotAttempted);
        apply_result(&mut b, false).unwrap();
        assert!(can_attempt(&b, 100, 100));
    }

    #[test]
    fn addon_purchase_reopens_a_locked_out_learner() {
        let mut b = budget(1, 0, ExamStatus::NotAttempted);
        apply_result(&mut b, false).unwrap();
        assert!(!can_attempt(&b, 100, 100));

        b.remaining_addon += 2;
        assert_eq!(b.status, ExamStatus::Failed);
        assert!(can_attempt(&b, 100, 100));
    }
}
