// src/exam/scorer.rs

use crate::models::{
    answer::AnswerMap,
    exam_record::{ExamResult, QuestionOutcome},
    question::Question,
};

/// Scored exam, before the caller attaches time spent.
#[derive(Debug, Clone, PartialEq)]
pub struct Scorecard {
    pub score: u32,
    pub total: u32,
    pub percentage: u32,
    pub per_question_results: Vec<QuestionOutcome>,
}

impl Scorecard {
    pub fn into_result(self, time_spent_seconds: u64) -> ExamResult {
        ExamResult {
            score: self.score,
            total: self.total,
            percentage: self.percentage,
            time_spent_seconds,
            per_question_results: self.per_question_results,
        }
    }
}

/// Scores `answers` against the keys of `questions`.
///
/// Pure: same inputs, same output. Missing or out-of-range selections count
/// as wrong. Answers for questions not in the set are ignored.
pub fn score(questions: &[Question], answers: &AnswerMap) -> Scorecard {
    let per_question_results: Vec<QuestionOutcome> = questions
        .iter()
        .map(|q| {
            let selected = answers.get(&q.id).cloned();
            let is_correct = selected
                .as_ref()
                .is_some_and(|s| s.matches(&q.correct_answer));
            QuestionOutcome {
                question_id: q.id.clone(),
                question: q.text.clone(),
                options: q.options.clone(),
                correct_answer: q.correct_answer.clone(),
                selected,
                is_correct,
                explanation: q.explanation.clone(),
            }
        })
        .collect();

    let total = per_question_results.len() as u32;
    let score = per_question_results.iter().filter(|r| r.is_correct).count() as u32;

    Scorecard {
        score,
        total,
        percentage: percentage(score, total),
        per_question_results,
    }
}

/// `round(100 * correct / total)`, half rounded up; 0 for an empty exam.
pub fn percentage(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let correct = u64::from(correct.min(total));
    let total = u64::from(total);
    ((200 * correct + total) / (2 * total)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        answer::Answer,
        question::{Difficulty, QuestionOption},
    };
    use std::collections::BTreeSet;

    fn question(id: &str, key: Answer) -> Question {
        Question {
            id: id.to_string(),
            text: format!("Question {}", id),
            options: ["A", "B", "C", "D"]
                .iter()
                .map(|t| QuestionOption { text: t.to_string() })
                .collect(),
            correct_answer: key,
            category: "General".to_string(),
            difficulty: Difficulty::Medium,
            explanation: None,
        }
    }

    #[test]
    fn test_score_half() {
        let questions = vec![question("q1", Answer::Single(0)), question("q2", Answer::Single(2))];
        let mut answers = AnswerMap::new();
        answers.insert("q1".to_string(), Answer::Single(0));
        answers.insert("q2".to_string(), Answer::Single(1)); // Wrong

        let card = score(&questions, &answers);
        assert_eq!(card.score, 1);
        assert_eq!(card.total, 2);
        assert_eq!(card.percentage, 50);
        assert!(card.per_question_results[0].is_correct);
        assert!(!card.per_question_results[1].is_correct);
        assert_eq!(card.per_question_results[1].selected, Some(Answer::Single(1)));
    }

    #[test]
    fn test_score_empty_answers() {
        let questions: Vec<Question> = (0..10)
            .map(|i| question(&format!("q{}", i), Answer::Single(0)))
            .collect();
        let card = score(&questions, &AnswerMap::new());
        assert_eq!(card.score, 0);
        assert_eq!(card.total, 10);
        assert_eq!(card.percentage, 0);
        assert!(card.per_question_results.iter().all(|r| r.selected.is_none()));
    }

    #[test]
    fn test_score_no_questions() {
        let mut answers = AnswerMap::new();
        answers.insert("ghost".to_string(), Answer::Single(0));
        let card = score(&[], &answers);
        assert_eq!(card.total, 0);
        assert_eq!(card.percentage, 0);
    }

    #[test]
    fn test_out_of_range_selection_is_wrong() {
        let questions = vec![question("q1", Answer::Single(1))];
        let mut answers = AnswerMap::new();
        answers.insert("q1".to_string(), Answer::Single(42));
        assert_eq!(score(&questions, &answers).score, 0);
    }

    #[test]
    fn test_multi_select_set_match() {
        let questions = vec![
            question("q1", Answer::Multiple(BTreeSet::from([0, 3]))),
            question("q2", Answer::Multiple(BTreeSet::from([1, 2]))),
        ];
        let mut answers = AnswerMap::new();
        answers.insert("q1".to_string(), Answer::Multiple(BTreeSet::from([3, 0])));
        answers.insert("q2".to_string(), Answer::Multiple(BTreeSet::from([1])));

        let card = score(&questions, &answers);
        assert_eq!(card.score, 1);
        assert_eq!(card.percentage, 50);
    }

    #[test]
    fn test_score_is_pure() {
        let questions = vec![question("q1", Answer::Single(0)), question("q2", Answer::Single(3))];
        let mut answers = AnswerMap::new();
        answers.insert("q2".to_string(), Answer::Single(3));
        assert_eq!(score(&questions, &answers), score(&questions, &answers));
    }

    #[test]
    fn test_percentage_rounding_and_bounds() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13); // 12.5 rounds up
        assert_eq!(percentage(3, 5), 60);
        assert_eq!(percentage(7, 7), 100);
        assert_eq!(percentage(9, 7), 100);
        assert_eq!(percentage(0, 0), 0);
    }

    #[test]
    fn test_into_result_keeps_breakdown() {
        let questions = vec![question("q1", Answer::Single(0))];
        let mut answers = AnswerMap::new();
        answers.insert("q1".to_string(), Answer::Single(0));
        let result = score(&questions, &answers).into_result(42);
        assert_eq!(result.time_spent_seconds, 42);
        assert_eq!(result.percentage, 100);
        assert!(result.passed());
    }
}
