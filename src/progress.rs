//! Course progress tracking.
//!
//! Overall progress is always recomputed from the module rows before it is
//! written back to the enrollment; the stored column is a cache for list
//! views, never an input.

use serde::Serialize;
use uuid::Uuid;

use crate::db::Db;
use crate::error::CoreError;
use crate::models::{CertificationTrack, ModuleProgress, ModuleStatus};
use crate::store;

pub fn overall_progress(completed: usize, total: usize) -> i16 {
    if total == 0 {
        return 0;
    }
    (100.0 * completed as f64 / total as f64).round() as i16
}

pub fn status_for(percent: i16) -> ModuleStatus {
    if percent >= 100 {
        ModuleStatus::Completed
    } else if percent > 0 {
        ModuleStatus::InProgress
    } else {
        ModuleStatus::NotStarted
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ModuleProgressView {
    pub module_index: i32,
    pub progress: i16,
    pub status: ModuleStatus,
}

/// One entry per track module, with `{0, not_started}` for modules the
/// learner has not touched yet.
pub fn padded_modules(rows: &[ModuleProgress], module_count: i32) -> Vec<ModuleProgressView> {
    (0..module_count)
        .map(|index| match rows.iter().find(|r| r.module_index == index) {
            Some(row) => ModuleProgressView {
                module_index: index,
                progress: row.progress,
                status: row.status,
            },
            None => ModuleProgressView {
                module_index: index,
                progress: 0,
                status: ModuleStatus::NotStarted,
            },
        })
        .collect()
}

pub fn completed_count(rows: &[ModuleProgress]) -> usize {
    rows.iter()
        .filter(|r| r.status == ModuleStatus::Completed)
        .count()
}

fn check_module_index(track: &CertificationTrack, module_index: i32) -> Result<(), CoreError> {
    if module_index < 0 || module_index >= track.module_count {
        return Err(CoreError::Validation(format!(
            "module index {module_index} is outside this track's {} modules",
            track.module_count
        )));
    }
    Ok(())
}

/// Mark a module completed and return the recomputed overall progress.
/// Reapplying to an already-completed module is a no-op at the same value.
pub async fn mark_module_completed(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
    module_index: i32,
) -> Result<i16, CoreError> {
    let track = store::get_track(db, track_id)
        .await?
        .ok_or(CoreError::NotFound("certification track"))?;
    check_module_index(&track, module_index)?;
    store::get_enrollment(db, learner_id, track_id)
        .await?
        .ok_or(CoreError::NotFound("enrollment"))?;

    store::update_course_progress(db, learner_id, track_id, module_index, 100, ModuleStatus::Completed)
        .await?;
    recompute_overall(db, &track, learner_id).await
}

/// Apply a content-consumption progress update. Progress never regresses:
/// a stale tab reporting a lower percentage keeps the stored maximum.
pub async fn record_module_progress(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
    module_index: i32,
    percent: i16,
) -> Result<ModuleProgress, CoreError> {
    if !(0..=100).contains(&percent) {
        return Err(CoreError::Validation(
            "progress percent must be between 0 and 100".into(),
        ));
    }
    let track = store::get_track(db, track_id)
        .await?
        .ok_or(CoreError::NotFound("certification track"))?;
    check_module_index(&track, module_index)?;
    store::get_enrollment(db, learner_id, track_id)
        .await?
        .ok_or(CoreError::NotFound("enrollment"))?;

    let existing = store::get_module_progress(db, learner_id, track_id, module_index)
        .await?
        .map(|r| r.progress)
        .unwrap_or(0);
    let merged = percent.max(existing);
    let row = store::update_course_progress(
        db,
        learner_id,
        track_id,
        module_index,
        merged,
        status_for(merged),
    )
    .await?;
    recompute_overall(db, &track, learner_id).await?;
    Ok(row)
}

/// `{0, not_started}` when no record exists; never an error.
pub async fn get_module_progress(
    db: &Db,
    learner_id: Uuid,
    track_id: Uuid,
    module_index: i32,
) -> Result<ModuleProgressView, CoreError> {
    let row = store::get_module_progress(db, learner_id, track_id, module_index).await?;
    Ok(match row {
        Some(row) => ModuleProgressView {
            module_index,
            progress: row.progress,
            status: row.status,
        },
        None => ModuleProgressView {
            module_index,
            progress: 0,
            status: ModuleStatus::NotStarted,
        },
    })
}

async fn recompute_overall(
    db: &Db,
    track: &CertificationTrack,
    learner_id: Uuid,
) -> Result<i16, CoreError> {
    let rows = store::get_user_course_progress(db, learner_id, track.id).await?;
    let overall = overall_progress(completed_count(&rows), track.module_count as usize);
    store::update_overall_progress(db, learner_id, track.id, overall).await?;
    Ok(overall)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn overall_is_rounded_share_of_completed_modules() {
        assert_eq!(overall_progress(0, 3), 0);
        assert_eq!(overall_progress(1, 3), 33);
        assert_eq!(overall_progress(2, 3), 67);
        assert_eq!(overall_progress(3, 3), 100);
        assert_eq!(overall_progress(1, 8), 13);
    }

    #[test]
    fn overall_with_no_modules_is_zero() {
        assert_eq!(overall_progress(0, 0), 0);
    }

    #[test]
    fn status_follows_percent() {
        assert_eq!(status_for(0), ModuleStatus::NotStarted);
        assert_eq!(status_for(1), ModuleStatus::InProgress);
        assert_eq!(status_for(99), ModuleStatus::InProgress);
        assert_eq!(status_for(100), ModuleStatus::Completed);
    }

    fn row(module_index: i32, progress: i16) -> ModuleProgress {
        ModuleProgress {
            id: Uuid::new_v4(),
            learner_id: Uuid::new_v4(),
            track_id: Uuid::new_v4(),
            module_index,
            progress,
            status: status_for(progress),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn partially_completed_track_scenario() {
        // Two modules at 100%, one at 50%, out of three.
        let rows = vec![row(0, 100), row(1, 100), row(2, 50)];
        assert_eq!(overall_progress(completed_count(&rows), 3), 67);
    }

    #[test]
    fn padding_fills_untouched_modules() {
        let rows = vec![row(1, 40)];
        let padded = padded_modules(&rows, 3);
        assert_eq!(padded.len(), 3);
        assert_eq!(padded[0].progress, 0);
        assert_eq!(padded[0].status, ModuleStatus::NotStarted);
        assert_eq!(padded[1].progress, 40);
        assert_eq!(padded[1].status, ModuleStatus::InProgress);
        assert_eq!(padded[2].status, ModuleStatus::NotStarted);
    }

    #[test]
    fn overall_never_decreases_under_completion() {
        let mut rows: Vec<ModuleProgress> = Vec::new();
        let mut last = 0;
        for index in 0..5 {
            rows.push(row(index, 100));
            let overall = overall_progress(completed_count(&rows), 5);
            assert!(overall >= last);
            last = overall;
        }
        assert_eq!(last, 100);
    }
}
