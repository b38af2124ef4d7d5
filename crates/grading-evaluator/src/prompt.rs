//! Chat messages sent to the model.

use std::fmt::Write as _;

use grading_core::{CriterionPrompt, FeedbackPrompt};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Messages asking for a single criterion score as `{"score", "notes"}`.
pub fn criterion_messages(prompt: &CriterionPrompt) -> Vec<ChatMessage> {
    let system = format!(
        "You are an expert evaluator for the criterion \"{name}\".\n\
         Criterion description: {description}\n\
         Maximum score: {max} points\n\n\
         Read the submission and judge it against this criterion only; other \
         criteria are graded separately. Be fair, consistent and constructive.\n\
         Reply with a JSON object: {{\"score\": <number from 0 to {max}>, \
         \"notes\": \"<justification for the score>\"}}",
        name = prompt.criterion_name,
        description = prompt.description,
        max = prompt.max_score,
    );
    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("Submission:\n\n{}", prompt.submission)),
    ]
}

/// Messages asking for structured feedback on a graded submission.
pub fn feedback_messages(prompt: &FeedbackPrompt) -> Vec<ChatMessage> {
    let system = "You are a feedback specialist writing for a student. Start with what \
                  they did well, then name specific areas for improvement, give \
                  actionable suggestions and end with encouragement. Reference the \
                  submission concretely and keep the tone constructive.\n\
                  Reply with a JSON object with the keys \"strengths\" (list of strings), \
                  \"areas_for_improvement\" (list of strings), \"suggestions\" (list of \
                  strings), \"encouragement\" (string) and \"overall_summary\" (string).";

    let agg = &prompt.aggregation;
    let mut user = format!(
        "Rubric: {}\nFinal grade: {}\nTotal: {}/{}\n\nCriterion results:\n",
        prompt.rubric.name,
        agg.grade_line(),
        agg.total_score,
        agg.max_possible,
    );
    for detail in &agg.details {
        let _ = writeln!(
            user,
            "- {}: {}/{} ({})",
            detail.criterion_name, detail.score, detail.max_score, detail.notes
        );
    }
    if let Some(decision) = &prompt.approval {
        let verdict = if decision.confirmed {
            "approved"
        } else {
            "rejected"
        };
        let _ = writeln!(
            user,
            "\nA reviewer ({}) {} this grade.",
            decision.decided_by, verdict
        );
    }
    let _ = write!(user, "\nSubmission:\n\n{}", prompt.submission);

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}
