//! Prompt templates for the four pipeline stages.
//!
//! Domain logic for rendering stage prompts. Provider-agnostic: adapters
//! pick a template, fill it, and attach their own model parameters.

use crate::gateway::Message;

/// Rendered prompt ready for a chat request.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: String,
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        if self.system.is_empty() {
            vec![Message::user(&self.user)]
        } else {
            vec![Message::system(&self.system), Message::user(&self.user)]
        }
    }
}

/// A prompt template with `{name}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    pub fn render(&self, vars: &[(&str, &str)]) -> PromptInstance {
        let mut system = self.system.to_string();
        let mut user = self.user.to_string();
        for (name, value) in vars {
            let needle = format!("{{{name}}}");
            system = system.replace(&needle, value);
            user = user.replace(&needle, value);
        }
        PromptInstance {
            template_slug: self.slug.to_string(),
            system: system.trim().to_string(),
            user: user.trim().to_string(),
        }
    }
}

// =============================================================================
// MASKING
// =============================================================================

pub const MASK_TITLE: PromptTemplate = PromptTemplate {
    slug: "mask_title_v1",
    system: "",
    user: r#"
Anonymize the following legal case title. Requirements:
1. Replace every real person name with a numbered placeholder ("Person 1", "Person 2", ...) so distinct people stay distinguishable.
2. Replace every place name (province, city, county, street, address) with "some province", "some city", "some county", "some street", "some address".
3. Replace every date or time with "some year", "some month", "some day".
4. Replace every docket number with "(some year) No. X".
5. Output only the anonymized title, with no explanation or commentary.

Original title:
{text}

Anonymized title:"#,
};

pub const MASK_BODY: PromptTemplate = PromptTemplate {
    slug: "mask_body_v1",
    system: "",
    user: r#"
Anonymize the following legal case text. Requirements:
1. Replace every real person name with a numbered placeholder ("Person 1", "Person 2", ...) so distinct people stay distinguishable.
2. Replace every place name (province, city, county, street, address) with "some province", "some city", "some county", "some street", "some address".
3. Replace every date or time with "some year", "some month", "some day", "some hour".
4. Replace every docket number with "(some year) No. X" and every document reference number with "Ref. (some year) No. X".
5. Replace identity numbers, phone numbers and account numbers with "XXX"; delete any URLs outright.
6. IMPORTANT: monetary figures - damages, compensation amounts, support payments, litigation fees - are the substance of the ruling and must be preserved verbatim, never altered or masked.
7. Beyond the substitutions above, preserve the legal terminology and the logical structure of the case unchanged.
8. Output only the anonymized text, with no explanation or commentary.

Original text:
{text}

Anonymized text:"#,
};

// =============================================================================
// QUESTION GENERATION
// =============================================================================

pub const QUESTIONS: PromptTemplate = PromptTemplate {
    slug: "questions_v1",
    system: "You are a legal education expert who distills contested legal questions from case records. The questions favor legal analysis and value judgement over factual recall.",
    user: r#"
From the disputed issues, the court's reasoning and the legal principles in the case below, produce exactly {num_questions} contested legal questions answerable by a legal-reasoning AI. The questions should cover issue characterization, severity and continuity of conduct, evidence evaluation, attribution of responsibility, and public-policy or relational context. Prefer legal analysis and value judgement; avoid pure fact questions.

Case text:
{case_text}

Output {num_questions} questions, one per line, with no numbering and no other commentary."#,
};

// =============================================================================
// ANSWER GENERATION
// =============================================================================

pub const ANSWER: PromptTemplate = PromptTemplate {
    slug: "answer_v1",
    system: "You are a professional legal expert skilled at analyzing cases and giving reasoned legal opinions.",
    user: r#"
As a legal expert, analyze the following case and answer the question.

Case text:
{case_text}

Question: {question}

Provide a thorough legal analysis covering:
1. The material facts
2. The applicable law
3. The recommended disposition
4. The legal basis for it"#,
};

// =============================================================================
// EVALUATION (LLM-AS-JUDGE)
// =============================================================================

pub const EVALUATE: PromptTemplate = PromptTemplate {
    slug: "evaluate_v1",
    system: "You are a meticulous legal evaluator. You compare an AI answer against the authoritative judge decision and emit a machine-readable verdict. You respond with a single JSON object and nothing else.",
    user: r#"
Score the AI answer below against the judge's actual decision for the same case.

Question:
{question}

Case text:
{case_text}

Judge decision (authoritative):
{judge_decision}

AI answer under evaluation:
{answer}

Score five dimensions, each an integer from 0 to {dimension_max}:
- "statutory_basis": relevance and correctness of the normative legal basis invoked
- "subsumption_alignment": how well the answer's application of law to fact tracks the judge's reasoning chain
- "value_balancing": alignment of value weighing and empathy with the decision
- "fact_coverage": coverage of the key facts and contested issues
- "remedy_consistency": consistency of the conclusion and remedies with the decision

Also list every defect you find as a finding with severity "minor", "moderate" or "major".

Respond with exactly this JSON shape and nothing else:
{"dimension_scores": {"statutory_basis": 0, "subsumption_alignment": 0, "value_balancing": 0, "fact_coverage": 0, "remedy_consistency": 0}, "findings": [{"severity": "minor", "description": "..."}], "rationale": "..."}"#,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_placeholders() {
        let instance = QUESTIONS.render(&[("num_questions", "5"), ("case_text", "CASE")]);
        assert!(instance.user.contains("exactly 5 contested"));
        assert!(instance.user.contains("CASE"));
        assert!(!instance.user.contains("{num_questions}"));
        assert_eq!(instance.template_slug, "questions_v1");
    }

    #[test]
    fn to_messages_omits_empty_system() {
        let instance = MASK_TITLE.render(&[("text", "T")]);
        let messages = instance.to_messages();
        assert_eq!(messages.len(), 1);

        let instance = ANSWER.render(&[("case_text", "C"), ("question", "Q")]);
        assert_eq!(instance.to_messages().len(), 2);
    }

    #[test]
    fn mask_body_preserves_monetary_instruction() {
        let instance = MASK_BODY.render(&[("text", "T")]);
        assert!(instance.user.contains("preserved verbatim"));
    }
}
