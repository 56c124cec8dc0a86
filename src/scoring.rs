//! Scoring engine: rubric dimension scores, severity penalties, grades.
//!
//! Turns a judge verdict (five dimension scores plus severity-tagged
//! findings) into a penalty-adjusted total, a percentage and a grade
//! bucket. Pure arithmetic; the LLM-as-judge call and its parsing live
//! in `stages::evaluate`.

use serde::{Deserialize, Serialize};

/// The fixed rubric: five scoring dimensions, in report column order.
pub const DIMENSIONS: [&str; 5] = [
    "statutory_basis",
    "subsumption_alignment",
    "value_balancing",
    "fact_coverage",
    "remedy_consistency",
];

/// Severity tier of a judge-flagged defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Moderate,
    Major,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Moderate => "moderate",
            Severity::Major => "major",
        }
    }
}

/// A judge-flagged defect in an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub description: String,
}

/// Fixed severity-to-penalty fraction mapping.
#[derive(Debug, Clone, Copy)]
pub struct PenaltyTable {
    pub minor: f64,
    pub moderate: f64,
    pub major: f64,
}

impl Default for PenaltyTable {
    fn default() -> Self {
        Self {
            minor: 0.10,
            moderate: 0.30,
            major: 0.50,
        }
    }
}

impl PenaltyTable {
    pub fn penalty(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Minor => self.minor,
            Severity::Moderate => self.moderate,
            Severity::Major => self.major,
        }
    }
}

/// How multiple findings combine into one penalty factor.
///
/// The single-worst-tier rule matches the source system's observable
/// behavior; whether same-tier findings should instead compound was left
/// open there, so both rules are first-class and tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PenaltyRule {
    /// The single highest-severity finding governs one multiplicative
    /// penalty; additional findings carry no extra weight.
    #[default]
    WorstOnly,
    /// Every finding's penalty compounds multiplicatively.
    Compound,
}

/// Ordered percentage thresholds mapping to grade labels.
///
/// Thresholds are configuration, not domain knowledge baked into the
/// engine. Pairs are kept sorted descending; the floor label applies
/// below the lowest threshold.
#[derive(Debug, Clone)]
pub struct GradeTable {
    thresholds: Vec<(f64, String)>,
    floor: String,
}

impl Default for GradeTable {
    fn default() -> Self {
        Self::new(
            vec![
                (90.0, "excellent".to_string()),
                (75.0, "good".to_string()),
                (60.0, "fair".to_string()),
            ],
            "poor",
        )
    }
}

impl GradeTable {
    pub fn new(mut thresholds: Vec<(f64, String)>, floor: impl Into<String>) -> Self {
        thresholds.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Self {
            thresholds,
            floor: floor.into(),
        }
    }

    pub fn grade(&self, percentage: f64) -> &str {
        for (threshold, label) in &self.thresholds {
            if percentage >= *threshold {
                return label;
            }
        }
        &self.floor
    }
}

/// Scoring configuration: dimension ceiling, penalties, stacking rule,
/// grade thresholds.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Maximum value of a single dimension score (D_max).
    pub dimension_max: u8,
    pub penalties: PenaltyTable,
    pub rule: PenaltyRule,
    pub grades: GradeTable,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            dimension_max: 4,
            penalties: PenaltyTable::default(),
            rule: PenaltyRule::default(),
            grades: GradeTable::default(),
        }
    }
}

/// One rubric axis's score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: String,
    pub value: f64,
}

/// Computed score for one answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub dimension_scores: Vec<DimensionScore>,
    pub raw_total: f64,
    pub penalized_total: f64,
    pub percentage: f64,
    pub grade: String,
}

/// The scoring engine proper.
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score one answer from its five dimension values (aligned with
    /// [`DIMENSIONS`]) and the judge's findings.
    pub fn score(&self, values: &[f64; 5], findings: &[Finding]) -> ScoreBreakdown {
        let dmax = f64::from(self.config.dimension_max);
        let dimension_scores: Vec<DimensionScore> = DIMENSIONS
            .iter()
            .zip(values.iter())
            .map(|(dimension, value)| DimensionScore {
                dimension: (*dimension).to_string(),
                value: value.clamp(0.0, dmax),
            })
            .collect();

        let raw_total: f64 = dimension_scores.iter().map(|d| d.value).sum();
        let factor = self.penalty_factor(findings);
        let penalized_total = (raw_total * factor).max(0.0);
        let percentage = penalized_total / (5.0 * dmax) * 100.0;
        let grade = self.config.grades.grade(percentage).to_string();

        ScoreBreakdown {
            dimension_scores,
            raw_total,
            penalized_total,
            percentage,
            grade,
        }
    }

    fn penalty_factor(&self, findings: &[Finding]) -> f64 {
        if findings.is_empty() {
            return 1.0;
        }
        match self.config.rule {
            PenaltyRule::WorstOnly => {
                let worst = findings
                    .iter()
                    .map(|f| f.severity)
                    .max()
                    .expect("non-empty findings");
                1.0 - self.config.penalties.penalty(worst)
            }
            PenaltyRule::Compound => findings
                .iter()
                .map(|f| 1.0 - self.config.penalties.penalty(f.severity))
                .product(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(severity: Severity) -> Finding {
        Finding {
            severity,
            description: "defect".to_string(),
        }
    }

    #[test]
    fn no_findings_keeps_raw_total() {
        let engine = ScoringEngine::default();
        let breakdown = engine.score(&[4.0, 3.0, 4.0, 2.0, 3.0], &[]);
        assert_eq!(breakdown.raw_total, 16.0);
        assert_eq!(breakdown.penalized_total, 16.0);
        assert_eq!(breakdown.percentage, 80.0);
        assert_eq!(breakdown.grade, "good");
    }

    #[test]
    fn single_major_halves_the_total() {
        let engine = ScoringEngine::default();
        let breakdown = engine.score(&[4.0, 3.0, 4.0, 2.0, 3.0], &[finding(Severity::Major)]);
        assert_eq!(breakdown.penalized_total, 8.0);
        assert_eq!(breakdown.percentage, 40.0);
        assert_eq!(breakdown.grade, "poor");
    }

    #[test]
    fn worst_only_ignores_lesser_findings() {
        let engine = ScoringEngine::default();
        let breakdown = engine.score(
            &[4.0, 4.0, 4.0, 4.0, 4.0],
            &[
                finding(Severity::Minor),
                finding(Severity::Moderate),
                finding(Severity::Minor),
            ],
        );
        // 20 * (1 - 0.30), not compounded.
        assert!((breakdown.penalized_total - 14.0).abs() < 1e-9);
    }

    #[test]
    fn compound_rule_stacks_multiplicatively() {
        let engine = ScoringEngine::new(ScoringConfig {
            rule: PenaltyRule::Compound,
            ..ScoringConfig::default()
        });
        let breakdown = engine.score(
            &[4.0, 4.0, 4.0, 4.0, 4.0],
            &[finding(Severity::Moderate), finding(Severity::Moderate)],
        );
        // 20 * 0.7 * 0.7 = 9.8
        assert!((breakdown.penalized_total - 9.8).abs() < 1e-9);
    }

    #[test]
    fn penalized_total_clamps_at_zero() {
        let engine = ScoringEngine::new(ScoringConfig {
            penalties: PenaltyTable {
                minor: 0.10,
                moderate: 0.30,
                major: 1.5,
            },
            ..ScoringConfig::default()
        });
        let breakdown = engine.score(&[4.0, 4.0, 4.0, 4.0, 4.0], &[finding(Severity::Major)]);
        assert_eq!(breakdown.penalized_total, 0.0);
        assert_eq!(breakdown.grade, "poor");
    }

    #[test]
    fn dimension_values_clamp_to_configured_max() {
        let engine = ScoringEngine::default();
        let breakdown = engine.score(&[9.0, -1.0, 4.0, 2.0, 3.0], &[]);
        assert_eq!(breakdown.dimension_scores[0].value, 4.0);
        assert_eq!(breakdown.dimension_scores[1].value, 0.0);
        assert_eq!(breakdown.raw_total, 13.0);
    }

    #[test]
    fn grade_thresholds_are_configuration() {
        let grades = GradeTable::new(
            vec![(50.0, "pass".to_string()), (85.0, "high".to_string())],
            "fail",
        );
        assert_eq!(grades.grade(90.0), "high");
        assert_eq!(grades.grade(60.0), "pass");
        assert_eq!(grades.grade(10.0), "fail");
    }

    #[test]
    fn severity_orders_minor_below_major() {
        assert!(Severity::Minor < Severity::Moderate);
        assert!(Severity::Moderate < Severity::Major);
    }
}
