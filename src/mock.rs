//! Mock test attempt engine.
//!
//! Live attempts exist only in memory; the database sees an attempt exactly
//! once, when it reaches its terminal state. The deadline task and a manual
//! submit race into the same finalize-once path, so both produce the same
//! score through the single scoring routine.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::db::Db;
use crate::error::CoreError;
use crate::models::{MockQuestion, MockTestAttempt};
use crate::store;

/// Answer slot value for a question the learner has not answered.
pub const UNANSWERED: i16 = -1;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockOutcome {
    pub score: i16,
    pub passed: bool,
}

pub fn score_answers(answers: &[i16], questions: &[MockQuestion]) -> i16 {
    if questions.is_empty() {
        return 0;
    }
    let correct = questions
        .iter()
        .zip(answers)
        .filter(|(q, a)| **a == q.correct_option)
        .count();
    (100.0 * correct as f64 / questions.len() as f64).round() as i16
}

/// The mutable state of one live attempt. Pure with respect to clock and
/// storage so the transition rules are testable in isolation.
#[derive(Debug, Clone)]
pub struct AttemptState {
    questions: Vec<MockQuestion>,
    passing_score: i16,
    answers: Vec<i16>,
    outcome: Option<MockOutcome>,
}

impl AttemptState {
    pub fn new(questions: Vec<MockQuestion>, passing_score: i16) -> Self {
        let answers = vec![UNANSWERED; questions.len()];
        Self {
            questions,
            passing_score,
            answers,
            outcome: None,
        }
    }

    pub fn answers(&self) -> &[i16] {
        &self.answers
    }

    pub fn is_finalized(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn select(&mut self, question_index: usize, option_index: i16) -> Result<(), CoreError> {
        if self.outcome.is_some() {
            return Err(CoreError::Precondition(
                "this attempt has already been submitted".into(),
            ));
        }
        if question_index >= self.answers.len() {
            return Err(CoreError::Validation(format!(
                "question index {question_index} is outside this test's {} questions",
                self.answers.len()
            )));
        }
        self.answers[question_index] = option_index;
        Ok(())
    }

    /// Score the attempt exactly once. The second return value is false for
    /// every call after the first, which then sees the identical outcome.
    pub fn finalize(&mut self) -> (MockOutcome, bool) {
        if let Some(outcome) = self.outcome {
            return (outcome, false);
        }
        let score = score_answers(&self.answers, &self.questions);
        let outcome = MockOutcome {
            score,
            passed: score >= self.passing_score,
        };
        self.outcome = Some(outcome);
        (outcome, true)
    }
}

struct AttemptSlot {
    learner_id: Uuid,
    test_id: Uuid,
    title: String,
    duration_minutes: i32,
    deadline: Instant,
    started_at: DateTime<Utc>,
    state: AttemptState,
}

#[derive(Serialize, Debug, Clone)]
pub struct MockQuestionView {
    pub prompt: String,
    pub options: Vec<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct StartedAttempt {
    pub attempt_id: Uuid,
    pub test_id: Uuid,
    pub title: String,
    pub duration_minutes: i32,
    pub seconds_remaining: u64,
    pub questions: Vec<MockQuestionView>,
    pub answers: Vec<i16>,
}

#[derive(Clone)]
pub struct MockEngine {
    attempts: Arc<Mutex<HashMap<Uuid, AttemptSlot>>>,
    db: Db,
}

impl MockEngine {
    pub fn new(db: Db) -> Self {
        Self {
            attempts: Arc::new(Mutex::new(HashMap::new())),
            db,
        }
    }

    /// Open an attempt at a test. A live attempt at the same test is resumed
    /// (the multi-tab case); a finalized leftover is replaced with a fresh
    /// attempt record.
    pub async fn start(&self, learner_id: Uuid, test_id: Uuid) -> Result<StartedAttempt, CoreError> {
        if let Some(resumed) = self.resume_live(learner_id, test_id).await {
            return Ok(resumed);
        }

        let test = store::get_mock_test_by_id(&self.db, test_id)
            .await?
            .ok_or(CoreError::NotFound("mock test"))?;

        let attempt_id = Uuid::new_v4();
        let deadline = Instant::now() + Duration::from_secs(test.duration_minutes as u64 * 60);
        let slot = AttemptSlot {
            learner_id,
            test_id,
            title: test.title.clone(),
            duration_minutes: test.duration_minutes,
            deadline,
            started_at: Utc::now(),
            state: AttemptState::new(test.questions.0.clone(), test.passing_score),
        };

        let view = {
            let mut attempts = self.attempts.lock().await;
            // A second tab may have raced us past the resume check above.
            drop_finalized(&mut attempts, learner_id, test_id);
            if let Some((id, live)) = find_live(&attempts, learner_id, test_id) {
                return Ok(attempt_view(id, live));
            }
            let view = attempt_view(attempt_id, &slot);
            attempts.insert(attempt_id, slot);
            view
        };

        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            match engine.finalize(attempt_id, None).await {
                Ok(outcome) => tracing::debug!(
                    %attempt_id, score = outcome.score, "attempt reached its deadline"
                ),
                Err(e) => tracing::warn!(%attempt_id, error=%e, "deadline finalize failed"),
            }
        });

        tracing::info!(%attempt_id, %test_id, %learner_id, "mock attempt started");
        Ok(view)
    }

    pub async fn select_answer(
        &self,
        learner_id: Uuid,
        attempt_id: Uuid,
        question_index: usize,
        option_index: i16,
    ) -> Result<(), CoreError> {
        let mut attempts = self.attempts.lock().await;
        let slot = owned_slot(&mut attempts, attempt_id, learner_id)?;
        slot.state.select(question_index, option_index)
    }

    /// Manual submit. Idempotent: resubmitting returns the recorded outcome
    /// without touching storage again.
    pub async fn submit(&self, learner_id: Uuid, attempt_id: Uuid) -> Result<MockOutcome, CoreError> {
        self.finalize(attempt_id, Some(learner_id)).await
    }

    /// Shared terminal path for manual submit and the deadline task. The
    /// first caller persists; everyone else gets the same outcome back.
    async fn finalize(
        &self,
        attempt_id: Uuid,
        learner_id: Option<Uuid>,
    ) -> Result<MockOutcome, CoreError> {
        let (outcome, record) = {
            let mut attempts = self.attempts.lock().await;
            let slot = match learner_id {
                Some(learner) => owned_slot(&mut attempts, attempt_id, learner)?,
                None => attempts
                    .get_mut(&attempt_id)
                    .ok_or(CoreError::NotFound("mock attempt"))?,
            };
            let (outcome, first) = slot.state.finalize();
            let record = first.then(|| MockTestAttempt {
                id: attempt_id,
                learner_id: slot.learner_id,
                test_id: slot.test_id,
                answers: sqlx::types::Json(slot.state.answers().to_vec()),
                score: outcome.score,
                passed: outcome.passed,
                completed: true,
                started_at: slot.started_at,
                finished_at: Some(Utc::now()),
            });
            (outcome, record)
        };

        if let Some(record) = record {
            store::save_mock_test_result(&self.db, &record).await?;
            tracing::info!(
                %attempt_id,
                score = outcome.score,
                passed = outcome.passed,
                "mock attempt finalized"
            );
        }
        Ok(outcome)
    }

    async fn resume_live(&self, learner_id: Uuid, test_id: Uuid) -> Option<StartedAttempt> {
        let attempts = self.attempts.lock().await;
        find_live(&attempts, learner_id, test_id).map(|(id, slot)| attempt_view(id, slot))
    }
}

fn find_live(
    attempts: &HashMap<Uuid, AttemptSlot>,
    learner_id: Uuid,
    test_id: Uuid,
) -> Option<(Uuid, &AttemptSlot)> {
    attempts
        .iter()
        .find(|(_, s)| {
            s.learner_id == learner_id && s.test_id == test_id && !s.state.is_finalized()
        })
        .map(|(id, s)| (*id, s))
}

fn drop_finalized(attempts: &mut HashMap<Uuid, AttemptSlot>, learner_id: Uuid, test_id: Uuid) {
    attempts.retain(|_, s| {
        !(s.learner_id == learner_id && s.test_id == test_id && s.state.is_finalized())
    });
}

fn owned_slot<'a>(
    attempts: &'a mut HashMap<Uuid, AttemptSlot>,
    attempt_id: Uuid,
    learner_id: Uuid,
) -> Result<&'a mut AttemptSlot, CoreError> {
    let slot = attempts
        .get_mut(&attempt_id)
        .ok_or(CoreError::NotFound("mock attempt"))?;
    if slot.learner_id != learner_id {
        // Another learner's attempt is indistinguishable from a missing one.
        return Err(CoreError::NotFound("mock attempt"));
    }
    Ok(slot)
}

fn attempt_view(attempt_id: Uuid, slot: &AttemptSlot) -> StartedAttempt {
    StartedAttempt {
        attempt_id,
        test_id: slot.test_id,
        title: slot.title.clone(),
        duration_minutes: slot.duration_minutes,
        seconds_remaining: slot
            .deadline
            .saturating_duration_since(Instant::now())
            .as_secs(),
        questions: slot
            .state
            .questions
            .iter()
            .map(|q| MockQuestionView {
                prompt: q.prompt.clone(),
                options: q.options.clone(),
            })
            .collect(),
        answers: slot.state.answers().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(correct: i16) -> MockQuestion {
        MockQuestion {
            prompt: "which option is right".into(),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_option: correct,
        }
    }

    fn four_question_test() -> Vec<MockQuestion> {
        vec![question(1), question(3), question(2), question(0)]
    }

    #[test]
    fn scores_against_answer_key() {
        let questions = four_question_test();
        // Three of four correct, one unanswered.
        assert_eq!(score_answers(&[1, UNANSWERED, 2, 0], &questions), 75);
        assert_eq!(score_answers(&[1, 3, 2, 0], &questions), 100);
        assert_eq!(
            score_answers(&[UNANSWERED, UNANSWERED, UNANSWERED, UNANSWERED], &questions),
            0
        );
    }

    #[test]
    fn passes_at_threshold() {
        let mut state = AttemptState::new(four_question_test(), 70);
        state.select(0, 1).unwrap();
        state.select(2, 2).unwrap();
        state.select(3, 0).unwrap();
        let (outcome, first) = state.finalize();
        assert!(first);
        assert_eq!(outcome, MockOutcome { score: 75, passed: true });
    }

    #[test]
    fn unanswered_slots_count_wrong() {
        let mut state = AttemptState::new(four_question_test(), 80);
        state.select(0, 1).unwrap();
        let (outcome, _) = state.finalize();
        assert_eq!(outcome, MockOutcome { score: 25, passed: false });
    }

    #[test]
    fn finalize_runs_once() {
        let mut state = AttemptState::new(four_question_test(), 70);
        state.select(0, 1).unwrap();
        let (first_outcome, first) = state.finalize();
        assert!(first);

        // Late answers and the losing side of the submit race are no-ops.
        assert!(state.select(1, 3).is_err());
        let (second_outcome, second) = state.finalize();
        assert!(!second);
        assert_eq!(first_outcome, second_outcome);
    }

    #[test]
    fn selecting_out_of_range_question_is_rejected() {
        let mut state = AttemptState::new(four_question_test(), 70);
        assert!(matches!(
            state.select(4, 0),
            Err(CoreError::Validation(_))
        ));
        // Option index is trusted; it is recorded as-is and scored wrong.
        state.select(1, 9).unwrap();
        let (outcome, _) = state.finalize();
        assert_eq!(outcome.score, 0);
    }

    #[test]
    fn empty_test_scores_zero() {
        assert_eq!(score_answers(&[], &[]), 0);
    }
}
