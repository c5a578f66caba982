//! Auto-grading of multiple-choice and true/false assessments.
//!
//! Scoring is weighted: a question is worth `points` (1 unless configured)
//! and earns all of them when the submitted option matches the key, nothing
//! otherwise. Answers are aligned with the question order.

use chrono::Utc;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult, StoreError},
    models::{
        AssessmentResult, ProgressOutcome, Question, QuestionKind, SubmissionOutcome,
        TRUE_FALSE_OPTIONS,
    },
    progress,
    store::RecordStore,
};

/// Upper bound on an assessment's total points; scores are stored as `INTEGER`.
pub const MAX_TOTAL_POINTS: u32 = i32::MAX as u32;

/// Turns the raw `answers` payload into option indices. `None` marks a
/// skipped question; entries past the end of the payload are skipped too.
pub fn parse_answers(raw: &Value, questions: &[Question]) -> AppResult<Vec<Option<usize>>> {
    let items = raw
        .as_array()
        .ok_or_else(|| AppError::invalid("answers must be an array"))?;
    if items.len() > questions.len() {
        return Err(AppError::invalid(format!(
            "{} answers submitted for {} questions",
            items.len(),
            questions.len()
        )));
    }

    let mut out = Vec::with_capacity(questions.len());
    for (i, (item, question)) in items.iter().zip(questions).enumerate() {
        let answer = match item {
            Value::Null => None,
            Value::Bool(b) if question.kind == QuestionKind::TrueFalse => {
                // "True" is option 0
                Some(if *b { 0 } else { 1 })
            }
            Value::Number(n) => match n.as_u64() {
                Some(idx) => Some(usize::try_from(idx).unwrap_or(usize::MAX)),
                None => {
                    return Err(AppError::invalid(format!(
                        "answer {i} must be a non-negative option index"
                    )))
                }
            },
            _ => {
                return Err(AppError::invalid(format!(
                    "answer {i} has an unsupported type for a {:?} question",
                    question.kind
                )))
            }
        };
        out.push(answer);
    }
    out.resize(questions.len(), None);
    Ok(out)
}

pub fn grade(questions: &[Question], answers: &[Option<usize>]) -> u32 {
    questions
        .iter()
        .enumerate()
        .filter(|(i, q)| answers.get(*i).copied().flatten() == Some(q.correct_option))
        .fold(0u32, |acc, (_, q)| acc.saturating_add(q.points))
}

/// Checks an answer key before it is stored. True/false questions get their
/// fixed option labels.
pub fn validate_questions(questions: Vec<Question>) -> AppResult<Vec<Question>> {
    if questions.is_empty() {
        return Err(AppError::invalid("an assessment needs at least one question"));
    }
    let mut total: u32 = 0;
    for (i, q) in questions.iter().enumerate() {
        total = total
            .checked_add(q.points)
            .filter(|t| *t <= MAX_TOTAL_POINTS)
            .ok_or_else(|| {
                AppError::invalid(format!(
                    "question {i}: assessment would exceed {MAX_TOTAL_POINTS} total points"
                ))
            })?;
    }
    questions
        .into_iter()
        .enumerate()
        .map(|(i, mut q)| {
            if q.prompt.trim().is_empty() {
                return Err(AppError::invalid(format!("question {i} has an empty prompt")));
            }
            if q.points == 0 {
                return Err(AppError::invalid(format!("question {i} must be worth at least one point")));
            }
            match q.kind {
                QuestionKind::TrueFalse => {
                    q.options = TRUE_FALSE_OPTIONS.iter().map(|s| s.to_string()).collect();
                }
                QuestionKind::MultipleChoice => {
                    if q.options.len() < 2 {
                        return Err(AppError::invalid(format!("question {i} needs at least two options")));
                    }
                }
            }
            if q.correct_option >= q.options.len() {
                return Err(AppError::invalid(format!(
                    "question {i}: correct option {} out of range",
                    q.correct_option
                )));
            }
            Ok(q)
        })
        .collect()
}

/// Grades a submission and records it together with the learner's progress
/// increment. A learner gets one graded attempt per assessment.
pub async fn submit_assessment(
    store: &dyn RecordStore,
    assessment_id: Uuid,
    user_id: Uuid,
    answers: &Value,
) -> AppResult<SubmissionOutcome> {
    let assessment = store
        .find_assessment(assessment_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("assessment {assessment_id}")))?;
    if store.find_user(user_id).await?.is_none() {
        return Err(AppError::not_found(format!("user {user_id}")));
    }

    let parsed = parse_answers(answers, &assessment.questions)?;
    let score = grade(&assessment.questions, &parsed);
    let total_points = assessment.total_points();

    let course_id = assessment.course_id;
    let increment = progress::increment_for(store.count_assessments(course_id).await?);
    let result = AssessmentResult {
        assessment_id,
        user_id,
        score,
        submitted_at: Utc::now(),
    };

    let applied = store
        .commit_submission(course_id, &result, increment)
        .await
        .map_err(|e| match e {
            StoreError::UniqueViolation(_) => AppError::DuplicateSubmission,
            other => AppError::from(other),
        })?;

    let progress = match applied {
        Some(p) => ProgressOutcome::applied(p),
        None => {
            let existing = store.find_progress(user_id, course_id).await?;
            ProgressOutcome::unchanged(user_id, course_id, existing)
        }
    };
    info!(%assessment_id, %user_id, score, total_points, "submission graded");

    Ok(SubmissionOutcome {
        assessment_id,
        user_id,
        score,
        total_points,
        progress,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mc(correct: usize, points: u32) -> Question {
        Question {
            prompt: "pick one".into(),
            kind: QuestionKind::MultipleChoice,
            options: vec!["a".into(), "b".into(), "c".into()],
            correct_option: correct,
            points,
        }
    }

    fn tf(answer: bool) -> Question {
        Question {
            prompt: "true or false".into(),
            kind: QuestionKind::TrueFalse,
            options: vec![],
            correct_option: if answer { 0 } else { 1 },
            points: 1,
        }
    }

    #[test]
    fn two_of_three_correct() {
        let key = vec![mc(0, 1), mc(1, 1), mc(0, 1)];
        let answers = parse_answers(&json!([0, 1, 1]), &key).unwrap();
        assert_eq!(grade(&key, &answers), 2);
    }

    #[test]
    fn weights_are_applied() {
        let key = vec![mc(0, 5), mc(1, 3)];
        let answers = parse_answers(&json!([0, 2]), &key).unwrap();
        assert_eq!(grade(&key, &answers), 5);
    }

    #[test]
    fn short_submission_counts_missing_as_wrong() {
        let key = vec![mc(0, 1), mc(1, 1), mc(2, 1)];
        let answers = parse_answers(&json!([0]), &key).unwrap();
        assert_eq!(answers, vec![Some(0), None, None]);
        assert_eq!(grade(&key, &answers), 1);
        assert_eq!(grade(&key, &[]), 0);
    }

    #[test]
    fn nulls_and_out_of_range_are_wrong_not_errors() {
        let key = vec![mc(0, 1), mc(1, 1)];
        let answers = parse_answers(&json!([null, 99]), &key).unwrap();
        assert_eq!(grade(&key, &answers), 0);
    }

    #[test]
    fn true_false_accepts_bools_and_indices() {
        let key = vec![tf(true), tf(false), tf(true)];
        let answers = parse_answers(&json!([true, false, 1]), &key).unwrap();
        assert_eq!(grade(&key, &answers), 2);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let key = vec![mc(0, 1), mc(1, 1)];
        for bad in [
            json!({"0": 1}),
            json!("0,1"),
            json!(["a", 1]),
            json!([-1]),
            json!([0.5]),
            json!([true]),
            json!([[0]]),
            json!([0, 1, 2]),
        ] {
            assert!(
                matches!(parse_answers(&bad, &key), Err(AppError::InvalidInput(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn score_never_exceeds_total() {
        let key = vec![mc(0, 2), mc(1, 3), tf(false)];
        let total: u32 = key.iter().map(|q| q.points).sum();
        for a in 0..3usize {
            for b in 0..3usize {
                for c in 0..2usize {
                    let s = grade(&key, &[Some(a), Some(b), Some(c)]);
                    assert!(s <= total);
                }
            }
        }
        assert_eq!(grade(&key, &[Some(0), Some(1), Some(1)]), total);
    }

    #[test]
    fn answer_key_validation() {
        assert!(validate_questions(vec![]).is_err());
        assert!(validate_questions(vec![mc(3, 1)]).is_err());
        assert!(validate_questions(vec![mc(0, 0)]).is_err());

        let mut one_option = mc(0, 1);
        one_option.options.truncate(1);
        assert!(validate_questions(vec![one_option]).is_err());

        let checked = validate_questions(vec![tf(false)]).unwrap();
        assert_eq!(checked[0].options, vec!["True", "False"]);
    }

    #[test]
    fn oversized_weights_are_rejected() {
        assert!(matches!(
            validate_questions(vec![mc(0, u32::MAX), mc(1, 2)]),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_questions(vec![mc(0, MAX_TOTAL_POINTS), mc(1, 1)]),
            Err(AppError::InvalidInput(_))
        ));
        let at_cap = validate_questions(vec![mc(0, MAX_TOTAL_POINTS - 1), mc(1, 1)]).unwrap();
        assert_eq!(grade(&at_cap, &[Some(0), Some(1)]), MAX_TOTAL_POINTS);
    }

    #[test]
    fn grading_saturates_instead_of_overflowing() {
        let key = vec![mc(0, u32::MAX), mc(1, 2)];
        assert_eq!(grade(&key, &[Some(0), Some(1)]), u32::MAX);
    }
}
