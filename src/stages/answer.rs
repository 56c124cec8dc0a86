//! Answer generation stage (the fan-out stage).

use uuid::Uuid;

use crate::gateway::Attribution;
use crate::orchestrator::types::{AnswerRecord, MaskedCase, Question};
use crate::provider::StageRequest;

use super::{ProviderHandle, StageError};

/// Generate the answer for one (case, question) pair.
///
/// Invoked once per pair on the question-level pool; the orchestrator
/// submits exactly one task per (case_id, question_index, provider)
/// tuple, so at most one call is ever in flight for a tuple. Failures
/// here are isolated: they never cancel sibling questions.
pub async fn generate_answer(
    handle: &ProviderHandle,
    masked: &MaskedCase,
    question: &Question,
    job_id: Option<Uuid>,
) -> Result<AnswerRecord, StageError> {
    let mut attribution = Attribution::new("stages::answer");
    attribution.job_id = job_id;

    let request = StageRequest::Answer {
        case_text: &masked.body,
        question: &question.text,
    };
    let output = handle.invoke(&request, attribution).await?;

    Ok(AnswerRecord {
        case_id: masked.case_id.clone(),
        question_index: question.index,
        provider: handle.kind(),
        answer: output.reply.answer,
        reasoning: output.reply.reasoning,
        truncated: output.truncated,
        error: None,
    })
}
