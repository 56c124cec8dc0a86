//! Question generation stage.

use tracing::warn;
use uuid::Uuid;

use crate::gateway::Attribution;
use crate::orchestrator::types::{MaskedCase, Question};
use crate::provider::StageRequest;

use super::{ProviderHandle, StageError};

/// Generate up to `num_questions` questions for a masked case.
///
/// The provider is instructed to return exactly `num_questions` items;
/// extras are trimmed. A short list is returned together with the
/// shortfall so the caller can surface a degraded-count warning - it is
/// never an error, and never silent. Zero usable questions is an error.
pub async fn generate_questions(
    handle: &ProviderHandle,
    masked: &MaskedCase,
    num_questions: usize,
    job_id: Option<Uuid>,
) -> Result<(Vec<Question>, Option<usize>), StageError> {
    let mut attribution = Attribution::new("stages::questions");
    attribution.job_id = job_id;

    let request = StageRequest::Questions {
        case_text: &masked.body,
        num_questions,
    };
    let output = handle.invoke(&request, attribution).await?;

    let mut lines = parse_question_lines(&output.reply.answer);
    if lines.is_empty() {
        return Err(StageError::EmptyAnswer);
    }
    lines.truncate(num_questions);

    let shortfall = num_questions.checked_sub(lines.len()).filter(|s| *s > 0);
    if let Some(short) = shortfall {
        warn!(
            case_id = %masked.case_id,
            requested = num_questions,
            got = lines.len(),
            short,
            "provider returned fewer questions than requested"
        );
    }

    let questions = lines
        .into_iter()
        .enumerate()
        .map(|(i, text)| Question {
            case_id: masked.case_id.clone(),
            index: i + 1,
            text,
        })
        .collect();

    Ok((questions, shortfall))
}

/// Split a reply into question lines, stripping list markers the model
/// may prepend despite instructions ("1.", "2)", "-", "Q3:").
pub fn parse_question_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(strip_list_marker)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let trimmed = line.trim_start();
    let stripped = trimmed
        .strip_prefix('-')
        .or_else(|| trimmed.strip_prefix('*'))
        .or_else(|| trimmed.strip_prefix('•'));
    if let Some(rest) = stripped {
        return rest;
    }

    // "12.", "3)", "Q4:" style prefixes.
    let rest = trimmed.strip_prefix(['Q', 'q']).unwrap_or(trimmed);
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let after = &rest[digits..];
        if let Some(body) = after
            .strip_prefix('.')
            .or_else(|| after.strip_prefix(')'))
            .or_else(|| after.strip_prefix(':'))
            .or_else(|| after.strip_prefix('、'))
        {
            return body;
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_numbering_styles() {
        let content = "1. First question?\n2) Second question?\nQ3: Third question?\n- Fourth question?";
        let lines = parse_question_lines(content);
        assert_eq!(
            lines,
            vec![
                "First question?",
                "Second question?",
                "Third question?",
                "Fourth question?"
            ]
        );
    }

    #[test]
    fn drops_blank_lines() {
        let lines = parse_question_lines("One?\n\n   \nTwo?\n");
        assert_eq!(lines, vec!["One?", "Two?"]);
    }

    #[test]
    fn keeps_unnumbered_lines_verbatim() {
        let lines = parse_question_lines("Does the evidence establish a pattern of conduct?");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Does the evidence"));
    }

    #[test]
    fn question_mark_inside_line_is_untouched() {
        let lines = parse_question_lines("Is the 3.5% rate lawful?");
        assert_eq!(lines, vec!["Is the 3.5% rate lawful?"]);
    }
}
