// Temporal, spatial and behavioral pattern discovery over the metric
// table. Optional analytics: a failure here never blocks the baseline
// metrics.
use crate::types::MetricRecord;
use crate::util::{average, median, std_pop, std_samp};
use serde::Serialize;
use std::collections::BTreeMap;

const TREND_SLOPE_THRESHOLD: f64 = 0.1;
const HIGH_VOLATILITY: f64 = 2.0;
const MODERATE_VOLATILITY: f64 = 1.0;
const HIGH_HETEROGENEITY: f64 = 1.0;
const MODERATE_HETEROGENEITY: f64 = 0.5;

/// Trend of a district's update ratio over its monthly series.
#[derive(Debug, Clone, Serialize)]
pub struct TemporalPattern {
    pub state: String,
    pub district: String,
    pub temporal_pattern: &'static str,
    pub trend: &'static str,
    pub volatility: f64,
    pub trend_slope: f64,
}

/// How evenly a state's districts behave.
#[derive(Debug, Clone, Serialize)]
pub struct SpatialPattern {
    pub state: String,
    pub spatial_pattern: &'static str,
    pub cv_update_ratio: f64,
    pub cv_compliance: f64,
    pub num_districts: usize,
    pub avg_update_ratio: f64,
    pub avg_compliance: f64,
}

/// Update-mix behavior of a district against the population medians.
#[derive(Debug, Clone, Serialize)]
pub struct BehavioralPattern {
    pub state: String,
    pub district: String,
    pub demo_update_ratio: f64,
    pub bio_update_ratio: f64,
    pub update_ratio: f64,
    pub biometric_compliance: f64,
    pub total_holders: f64,
    pub behavioral_pattern: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PatternSummary {
    pub rising_districts: usize,
    pub declining_districts: usize,
    pub stable_districts: usize,
    pub volatile_districts: usize,
    pub heterogeneous_states: usize,
    pub homogeneous_states: usize,
    pub total_states: usize,
    pub migration_heavy: usize,
    pub quality_focused: usize,
    pub low_engagement: usize,
    pub high_activity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternReport {
    pub temporal: Vec<TemporalPattern>,
    pub spatial: Vec<SpatialPattern>,
    pub behavioral: Vec<BehavioralPattern>,
    pub summary: PatternSummary,
}

/// Least-squares slope of `ys` against 0..n. Zero for degenerate series.
fn trend_slope(ys: &[f64]) -> f64 {
    let n = ys.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = average(ys);
    let mut cov = 0.0;
    let mut var = 0.0;
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - x_mean;
        cov += dx * (y - y_mean);
        var += dx * dx;
    }
    if var > 0.0 {
        cov / var
    } else {
        0.0
    }
}

pub fn detect_temporal_patterns(records: &[MetricRecord]) -> Vec<TemporalPattern> {
    // BTreeMap keeps districts sorted and, with months pushed in key
    // order below, each series chronological.
    let mut series: BTreeMap<(&str, &str), Vec<(&str, f64)>> = BTreeMap::new();
    for r in records {
        series
            .entry((r.key.state.as_str(), r.key.district.as_str()))
            .or_default()
            .push((r.key.year_month.as_str(), r.update_ratio));
    }

    series
        .into_iter()
        .map(|((state, district), mut months)| {
            months.sort_by(|a, b| a.0.cmp(b.0));
            let ratios: Vec<f64> = months.iter().map(|(_, v)| *v).collect();

            if ratios.len() < 2 {
                return TemporalPattern {
                    state: state.to_string(),
                    district: district.to_string(),
                    temporal_pattern: "insufficient_data",
                    trend: "stable",
                    volatility: 0.0,
                    trend_slope: 0.0,
                };
            }

            // A perfectly flat series has no trend to fit.
            let (slope, volatility) = if ratios.iter().any(|r| *r != ratios[0]) {
                (trend_slope(&ratios), std_pop(&ratios))
            } else {
                (0.0, 0.0)
            };
            let trend = if slope > TREND_SLOPE_THRESHOLD {
                "rising"
            } else if slope < -TREND_SLOPE_THRESHOLD {
                "declining"
            } else {
                "stable"
            };
            let pattern = if volatility > HIGH_VOLATILITY {
                "highly_volatile"
            } else if volatility > MODERATE_VOLATILITY {
                "moderate_volatility"
            } else {
                "stable"
            };

            TemporalPattern {
                state: state.to_string(),
                district: district.to_string(),
                temporal_pattern: pattern,
                trend,
                volatility,
                trend_slope: slope,
            }
        })
        .collect()
}

pub fn detect_spatial_patterns(records: &[MetricRecord]) -> Vec<SpatialPattern> {
    // Mean metrics per district first, then the spread across each
    // state's districts.
    let mut per_district: BTreeMap<(&str, &str), (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for r in records {
        let e = per_district
            .entry((r.key.state.as_str(), r.key.district.as_str()))
            .or_default();
        e.0.push(r.update_ratio);
        e.1.push(r.biometric_compliance);
    }

    let mut per_state: BTreeMap<&str, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for (&(state, _), (ratios, compliance)) in &per_district {
        let e = per_state.entry(state).or_default();
        e.0.push(average(ratios));
        e.1.push(average(compliance));
    }

    per_state
        .into_iter()
        .filter(|(_, (ratios, _))| ratios.len() >= 2)
        .map(|(state, (ratios, compliance))| {
            let mean_ratio = average(&ratios);
            let mean_compliance = average(&compliance);
            let cv_update = if mean_ratio > 0.0 {
                std_samp(&ratios) / mean_ratio
            } else {
                0.0
            };
            let cv_compliance = if mean_compliance > 0.0 {
                std_samp(&compliance) / mean_compliance
            } else {
                0.0
            };
            let pattern = if cv_update > HIGH_HETEROGENEITY {
                "highly_heterogeneous"
            } else if cv_update > MODERATE_HETEROGENEITY {
                "moderately_heterogeneous"
            } else {
                "homogeneous"
            };
            SpatialPattern {
                state: state.to_string(),
                spatial_pattern: pattern,
                cv_update_ratio: cv_update,
                cv_compliance,
                num_districts: ratios.len(),
                avg_update_ratio: mean_ratio,
                avg_compliance: mean_compliance,
            }
        })
        .collect()
}

pub fn detect_behavioral_patterns(records: &[MetricRecord]) -> Vec<BehavioralPattern> {
    #[derive(Default)]
    struct Acc {
        demo_ratios: Vec<f64>,
        bio_ratios: Vec<f64>,
        update_ratios: Vec<f64>,
        compliance: Vec<f64>,
        holders: f64,
    }

    let mut per_district: BTreeMap<(String, String), Acc> = BTreeMap::new();
    for r in records {
        let e = per_district
            .entry((r.key.state.clone(), r.key.district.clone()))
            .or_default();
        e.demo_ratios.push(r.demo_update_ratio);
        e.bio_ratios.push(r.bio_update_ratio);
        e.update_ratios.push(r.update_ratio);
        e.compliance.push(r.biometric_compliance);
        e.holders += r.total_holders;
    }

    let rows: Vec<(String, String, f64, f64, f64, f64, f64)> = per_district
        .into_iter()
        .map(|((state, district), acc)| {
            (
                state,
                district,
                average(&acc.demo_ratios),
                average(&acc.bio_ratios),
                average(&acc.update_ratios),
                average(&acc.compliance),
                acc.holders,
            )
        })
        .collect();

    let demo_median = median(rows.iter().map(|r| r.2).collect());
    let bio_median = median(rows.iter().map(|r| r.3).collect());
    let compliance_median = median(rows.iter().map(|r| r.5).collect());

    rows.into_iter()
        .map(|(state, district, demo, bio, ratio, compliance, holders)| {
            let mut patterns: Vec<&str> = Vec::new();
            // High demographic churn without matching biometric activity
            // reads as population movement.
            if demo > demo_median && bio < bio_median {
                patterns.push("migration_heavy");
            }
            if bio > bio_median && compliance > compliance_median {
                patterns.push("quality_focused");
            }
            if demo < demo_median && bio < bio_median {
                patterns.push("low_engagement");
            }
            if demo > demo_median && bio > bio_median {
                patterns.push("high_activity");
            }
            let behavioral_pattern = if patterns.is_empty() {
                "balanced".to_string()
            } else {
                patterns.join(",")
            };
            BehavioralPattern {
                state,
                district,
                demo_update_ratio: demo,
                bio_update_ratio: bio,
                update_ratio: ratio,
                biometric_compliance: compliance,
                total_holders: holders,
                behavioral_pattern,
            }
        })
        .collect()
}

pub fn discover_patterns(records: &[MetricRecord]) -> PatternReport {
    let temporal = detect_temporal_patterns(records);
    let spatial = detect_spatial_patterns(records);
    let behavioral = detect_behavioral_patterns(records);

    let mut summary = PatternSummary {
        total_states: spatial.len(),
        ..PatternSummary::default()
    };
    for t in &temporal {
        match t.trend {
            "rising" => summary.rising_districts += 1,
            "declining" => summary.declining_districts += 1,
            _ => summary.stable_districts += 1,
        }
        if t.temporal_pattern == "highly_volatile" {
            summary.volatile_districts += 1;
        }
    }
    for s in &spatial {
        match s.spatial_pattern {
            "highly_heterogeneous" => summary.heterogeneous_states += 1,
            "homogeneous" => summary.homogeneous_states += 1,
            _ => {}
        }
    }
    for b in &behavioral {
        if b.behavioral_pattern.contains("migration_heavy") {
            summary.migration_heavy += 1;
        }
        if b.behavioral_pattern.contains("quality_focused") {
            summary.quality_focused += 1;
        }
        if b.behavioral_pattern.contains("low_engagement") {
            summary.low_engagement += 1;
        }
        if b.behavioral_pattern.contains("high_activity") {
            summary.high_activity += 1;
        }
    }

    PatternReport {
        temporal,
        spatial,
        behavioral,
        summary,
    }
}
