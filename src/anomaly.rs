// Rule-based anomaly detection over district summaries.
//
// Classification is a fixed decision cascade: rules are evaluated in
// order and the first match wins. The continuous score is computed
// separately from the flag so the two can be tested on their own.
use crate::types::{AnomalyFlag, AnomalyRecord, AnomalySummary, DistrictSummary};
use crate::util::{average, clip, std_samp};
use std::collections::HashMap;

/// Rule 1: update ratio this many times the state mean is critical.
const STATE_MEAN_MULTIPLE: f64 = 10.0;
/// Rule 2: biometric compliance below this is a warning.
const LOW_COMPLIANCE: f64 = 0.1;
/// Rule 3: deviation from the state mean beyond this many standard
/// deviations is an outlier.
const OUTLIER_STD: f64 = 3.0;
/// Rule 4: a district with at least this many holders and zero updates
/// is critical.
const POPULATED_HOLDERS: f64 = 1000.0;

/// Which rule-3 form and scoring formula to use.
///
/// `Standard` is the authoritative batch variant: absolute-deviation
/// outlier rule, 0.4/0.3/0.3 deviation/compliance/extremity score.
/// `Strict` is the z-score variant used for live per-row scoring:
/// z > 3 is critical, 2 < z <= 3 a warning, 0.6/0.4 z/compliance score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    #[default]
    Standard,
    Strict,
}

/// Per-state mean and sample standard deviation of district update
/// ratios. Computed once per run from the full district population so
/// every district in a state is classified against the same statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateStats {
    pub mean: f64,
    pub std: f64,
}

pub fn compute_state_stats(summaries: &[DistrictSummary]) -> HashMap<String, StateStats> {
    let mut by_state: HashMap<&str, Vec<f64>> = HashMap::new();
    for s in summaries {
        by_state.entry(&s.state).or_default().push(s.update_ratio);
    }
    by_state
        .into_iter()
        .map(|(state, ratios)| {
            (
                state.to_string(),
                StateStats {
                    mean: average(&ratios),
                    std: std_samp(&ratios),
                },
            )
        })
        .collect()
}

/// Outcome of the rule cascade for one district.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Normal,
    Warning(&'static str),
    Critical(&'static str),
}

impl Verdict {
    pub fn flag(self) -> AnomalyFlag {
        match self {
            Verdict::Normal => AnomalyFlag::Normal,
            Verdict::Warning(_) => AnomalyFlag::Warning,
            Verdict::Critical(_) => AnomalyFlag::Critical,
        }
    }

    pub fn reason(self) -> Option<&'static str> {
        match self {
            Verdict::Normal => None,
            Verdict::Warning(r) | Verdict::Critical(r) => Some(r),
        }
    }
}

/// Run the cascade for one district. Pure: everything it looks at is in
/// its arguments, so each rule is testable on its own.
pub fn classify(summary: &DistrictSummary, stats: StateStats, strictness: Strictness) -> Verdict {
    // Rule 1: update ratio an order of magnitude above the state mean.
    if summary.update_ratio > STATE_MEAN_MULTIPLE * stats.mean {
        return Verdict::Critical("update ratio above 10x state mean");
    }

    // Rule 2: the lifecycle metric says almost nobody completed the
    // mandated biometric update.
    if summary.biometric_compliance < LOW_COMPLIANCE {
        return Verdict::Warning("biometric compliance below 0.1");
    }

    // Rule 3: statistical outlier against the state distribution.
    match strictness {
        Strictness::Standard => {
            if (summary.update_ratio - stats.mean).abs() > OUTLIER_STD * stats.std
                && stats.std > 0.0
            {
                return Verdict::Warning("update ratio outside 3 std of state mean");
            }
        }
        Strictness::Strict => {
            if stats.std > 0.0 {
                let z = (summary.update_ratio - stats.mean).abs() / stats.std;
                if z > 3.0 {
                    return Verdict::Critical("update ratio z-score above 3");
                }
                if z > 2.0 {
                    return Verdict::Warning("update ratio z-score above 2");
                }
            }
        }
    }

    // Rule 4: a populated district with no update activity at all.
    if summary.total_holders > POPULATED_HOLDERS && summary.total_updates == 0.0 {
        return Verdict::Critical("no update activity in a populated district");
    }

    Verdict::Normal
}

/// Standard score: 0.4 x normalized deviation from the state mean,
/// 0.3 x one-minus-compliance, 0.3 x ratio extremity above 5.
fn score_standard(summary: &DistrictSummary, stats: StateStats, max_deviation: f64) -> f64 {
    let mut score = 0.0;
    if max_deviation > 0.0 {
        score += 0.4 * ((summary.update_ratio - stats.mean).abs() / max_deviation);
    }
    score += 0.3 * (1.0 - clip(summary.biometric_compliance, 0.0, 1.0));
    let extremity = if summary.update_ratio > 5.0 {
        summary.update_ratio / 10.0
    } else {
        0.0
    };
    score += 0.3 * clip(extremity, 0.0, 1.0);
    clip(score, 0.0, 1.0)
}

/// Strict score: 0.6 x capped z-score fraction, 0.4 x one-minus-compliance.
fn score_strict(summary: &DistrictSummary, stats: StateStats) -> f64 {
    let mut score = 0.0;
    if stats.std > 0.0 {
        let z = (summary.update_ratio - stats.mean).abs() / stats.std;
        score += 0.6 * (z / 5.0).min(1.0);
    }
    score += 0.4 * (1.0 - summary.biometric_compliance.min(1.0));
    clip(score, 0.0, 1.0)
}

/// Classify and score every district against its state's statistics.
pub fn detect_anomalies(
    summaries: &[DistrictSummary],
    strictness: Strictness,
) -> Vec<AnomalyRecord> {
    let stats = compute_state_stats(summaries);
    let deviation = |s: &DistrictSummary| {
        let st = stats.get(&s.state).copied().unwrap_or_default();
        (s.update_ratio - st.mean).abs()
    };
    let max_deviation = summaries.iter().map(deviation).fold(0.0, f64::max);

    summaries
        .iter()
        .map(|s| {
            let st = stats.get(&s.state).copied().unwrap_or_default();
            let verdict = classify(s, st, strictness);
            let score = match strictness {
                Strictness::Standard => score_standard(s, st, max_deviation),
                Strictness::Strict => score_strict(s, st),
            };
            AnomalyRecord {
                state: s.state.clone(),
                district: s.district.clone(),
                update_ratio: s.update_ratio,
                total_holders: s.total_holders,
                total_updates: s.total_updates,
                biometric_compliance: s.biometric_compliance,
                state_mean: st.mean,
                state_std: st.std,
                anomaly_flag: verdict.flag(),
                reason: verdict.reason(),
                anomaly_score: score,
            }
        })
        .collect()
}

pub fn summarize(records: &[AnomalyRecord]) -> AnomalySummary {
    let mut summary = AnomalySummary {
        total_districts: records.len(),
        ..AnomalySummary::default()
    };
    for r in records {
        match r.anomaly_flag {
            AnomalyFlag::Normal => summary.normal += 1,
            AnomalyFlag::Warning => summary.warning += 1,
            AnomalyFlag::Critical => summary.critical += 1,
        }
    }
    summary
}

/// The `n` highest-scoring districts, most anomalous first.
pub fn top_anomalies(records: &[AnomalyRecord], n: usize) -> Vec<AnomalyRecord> {
    let mut sorted: Vec<AnomalyRecord> = records.to_vec();
    sorted.sort_by(|a, b| {
        b.anomaly_score
            .partial_cmp(&a.anomaly_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted.truncate(n);
    sorted
}
