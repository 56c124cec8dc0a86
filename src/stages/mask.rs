//! Masking stage: anonymize a case while preserving monetary figures.

use tracing::warn;
use uuid::Uuid;

use crate::gateway::Attribution;
use crate::mask_cache::{MaskCache, MaskCacheKey};
use crate::orchestrator::types::{CaseDocument, MaskedCase};
use crate::provider::{MaskUnit, Stage, StageRequest};

use super::{ProviderHandle, StageError};

/// Run the Masking stage for one case: one call per unit (title, body,
/// decision). No side effects beyond the API calls.
///
/// If a cache is provided, units with previously-masked identical
/// content are reused and fresh results are written back.
pub async fn mask_case(
    handle: &ProviderHandle,
    cache: Option<&dyn MaskCache>,
    doc: &CaseDocument,
    job_id: Option<Uuid>,
) -> Result<MaskedCase, StageError> {
    let title = mask_unit(handle, cache, MaskUnit::Title, &doc.title, job_id).await?;
    let body = mask_unit(handle, cache, MaskUnit::Body, &doc.body, job_id).await?;
    let decision = mask_unit(handle, cache, MaskUnit::Decision, &doc.judge_decision, job_id).await?;

    Ok(MaskedCase {
        case_id: doc.case_id.clone(),
        title,
        body,
        decision,
        degraded: false,
    })
}

async fn mask_unit(
    handle: &ProviderHandle,
    cache: Option<&dyn MaskCache>,
    unit: MaskUnit,
    text: &str,
    job_id: Option<Uuid>,
) -> Result<String, StageError> {
    if text.trim().is_empty() {
        return Ok(String::new());
    }

    let cache_key = cache.map(|_| {
        MaskCacheKey::new(handle.adapter().model_for(Stage::Masking), unit.as_str(), text)
    });
    if let (Some(cache), Some(key)) = (cache, &cache_key) {
        if let Some(hit) = cache.get(key).await {
            return Ok(hit);
        }
    }

    let mut attribution = Attribution::new("stages::mask");
    attribution.job_id = job_id;

    let request = StageRequest::Mask { unit, text };
    let output = handle.invoke(&request, attribution).await?;
    let masked = output.reply.answer;

    if let (Some(cache), Some(key)) = (cache, &cache_key) {
        cache.put(key, &masked).await;
    }

    // Monetary figures are the substance of the ruling; masking must not
    // alter them. The prompt enforces this, the check catches drift.
    let missing: Vec<String> = monetary_amounts(text)
        .into_iter()
        .filter(|amount| !masked.contains(amount.as_str()))
        .collect();
    if !missing.is_empty() {
        warn!(
            unit = unit.as_str(),
            missing = ?missing,
            "masked text dropped monetary amounts present in the input"
        );
    }

    Ok(masked)
}

/// Extract currency-marked amounts from a text: a currency symbol
/// followed by digits, or digits followed by a currency word.
pub fn monetary_amounts(text: &str) -> Vec<String> {
    const SYMBOLS: [char; 4] = ['$', '¥', '€', '£'];
    const SUFFIXES: [&str; 4] = ["yuan", "RMB", "CNY", "元"];

    let chars: Vec<char> = text.chars().collect();
    let mut amounts = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if SYMBOLS.contains(&c) {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == ',' || chars[i] == '.')
            {
                i += 1;
            }
            if i > start + 1 {
                amounts.push(chars[start..i].iter().collect());
            }
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == ',' || chars[i] == '.')
            {
                i += 1;
            }
            let rest: String = chars[i..].iter().collect();
            let trimmed = rest.trim_start();
            if SUFFIXES.iter().any(|s| trimmed.starts_with(s)) {
                amounts.push(chars[start..i].iter().collect());
            }
            continue;
        }
        i += 1;
    }

    amounts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_symbol_prefixed_amounts() {
        let amounts = monetary_amounts("damages of $12,500.00 plus costs of $300");
        assert_eq!(amounts, vec!["$12,500.00", "$300"]);
    }

    #[test]
    fn finds_suffix_marked_amounts() {
        let amounts = monetary_amounts("support of 2000 yuan per month, a fee of 150 RMB");
        assert_eq!(amounts, vec!["2000", "150"]);
    }

    #[test]
    fn ignores_plain_numbers() {
        // Dates and docket numbers are masked deliberately; only
        // currency-marked figures count.
        let amounts = monetary_amounts("filed on 2024-03-01, docket No. 6147");
        assert!(amounts.is_empty());
    }

    #[test]
    fn handles_empty_text() {
        assert!(monetary_amounts("").is_empty());
    }
}
