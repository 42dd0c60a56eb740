use serde::{Deserialize, Serialize};
use std::fmt;
use tabled::Tabled;

/// Composite key every table row carries from ingestion to geo linking.
///
/// Field order is load-bearing: deriving `Ord` over
/// (state, district, year_month) makes a `BTreeMap` hand back each
/// district's months contiguously and in chronological order, which the
/// lagged metrics depend on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DistrictMonthKey {
    pub state: String,
    pub district: String,
    pub year_month: String,
}

#[derive(Debug, Deserialize)]
pub struct RawEnrolmentRow {
    pub date: Option<String>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub age_0_5: Option<String>,
    pub age_5_17: Option<String>,
    pub age_18_greater: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawDemographicRow {
    pub date: Option<String>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub demo_age_5_17: Option<String>,
    #[serde(rename = "demo_age_17_")]
    pub demo_age_17_plus: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawBiometricRow {
    pub date: Option<String>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub bio_age_5_17: Option<String>,
    #[serde(rename = "bio_age_17_")]
    pub bio_age_17_plus: Option<String>,
}

/// One source's numbers for one (month, state, district) key after
/// summing all raw rows that share the key.
#[derive(Debug, Clone)]
pub struct EnrolmentMonthly {
    pub key: DistrictMonthKey,
    pub age_0_5: f64,
    pub age_5_17: f64,
    pub age_18_greater: f64,
    pub total_holders: f64,
}

#[derive(Debug, Clone)]
pub struct DemographicMonthly {
    pub key: DistrictMonthKey,
    pub demo_age_5_17: f64,
    pub demo_age_17_plus: f64,
    pub total_demo_updates: f64,
}

#[derive(Debug, Clone)]
pub struct BiometricMonthly {
    pub key: DistrictMonthKey,
    pub bio_age_5_17: f64,
    pub bio_age_17_plus: f64,
    pub total_bio_updates: f64,
}

/// Outer join of the three monthly tables; a key present in only one
/// source keeps zeros in the other sources' columns.
#[derive(Debug, Clone)]
pub struct MergedRecord {
    pub key: DistrictMonthKey,
    pub age_0_5: f64,
    pub age_5_17: f64,
    pub age_18_greater: f64,
    pub demo_age_5_17: f64,
    pub demo_age_17_plus: f64,
    pub bio_age_5_17: f64,
    pub bio_age_17_plus: f64,
}

impl MergedRecord {
    pub fn new(key: DistrictMonthKey) -> Self {
        MergedRecord {
            key,
            age_0_5: 0.0,
            age_5_17: 0.0,
            age_18_greater: 0.0,
            demo_age_5_17: 0.0,
            demo_age_17_plus: 0.0,
            bio_age_5_17: 0.0,
            bio_age_17_plus: 0.0,
        }
    }
}

/// A merged record plus every derived metric. All ratios are finite and
/// non-negative; zero denominators yield 0.
#[derive(Debug, Clone)]
pub struct MetricRecord {
    pub key: DistrictMonthKey,
    pub age_0_5: f64,
    pub age_5_17: f64,
    pub age_18_greater: f64,
    pub demo_age_5_17: f64,
    pub demo_age_17_plus: f64,
    pub bio_age_5_17: f64,
    pub bio_age_17_plus: f64,
    pub total_holders: f64,
    pub total_updates: f64,
    pub total_demo_updates: f64,
    pub total_bio_updates: f64,
    pub update_ratio: f64,
    pub demo_update_ratio: f64,
    pub bio_update_ratio: f64,
    pub biometric_compliance: f64,
    pub enrolment_growth_rate: f64,
}

/// Per-district aggregate across all months. Holders average (stock),
/// updates sum (flow), ratios average with the outlier correction applied.
#[derive(Debug, Clone, Serialize)]
pub struct DistrictSummary {
    pub state: String,
    pub district: String,
    pub total_holders: f64,
    pub total_updates: f64,
    pub total_demo_updates: f64,
    pub total_bio_updates: f64,
    pub update_ratio: f64,
    pub demo_update_ratio: f64,
    pub bio_update_ratio: f64,
    pub biometric_compliance: f64,
    pub enrolment_growth_rate: f64,
}

/// Per-(state, month) aggregate with the update ratio recomputed from the
/// summed totals rather than averaged.
#[derive(Debug, Clone, Serialize)]
pub struct StateSummary {
    pub state: String,
    pub year_month: String,
    pub total_holders: f64,
    pub total_updates: f64,
    pub total_demo_updates: f64,
    pub total_bio_updates: f64,
    pub update_ratio: f64,
    pub biometric_compliance: f64,
    pub enrolment_growth_rate: f64,
}

/// Discrete outcome of the anomaly rule cascade. Variant order gives
/// `Ord` the severity ordering the geo aggregation relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyFlag {
    Normal,
    Warning,
    Critical,
}

impl AnomalyFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyFlag::Normal => "normal",
            AnomalyFlag::Warning => "warning",
            AnomalyFlag::Critical => "critical",
        }
    }
}

impl fmt::Display for AnomalyFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One district's anomaly classification. Computed fresh from a district
/// summary snapshot; never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRecord {
    pub state: String,
    pub district: String,
    pub update_ratio: f64,
    pub total_holders: f64,
    pub total_updates: f64,
    pub biometric_compliance: f64,
    pub state_mean: f64,
    pub state_std: f64,
    pub anomaly_flag: AnomalyFlag,
    pub reason: Option<&'static str>,
    pub anomaly_score: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AnomalySummary {
    pub total_districts: usize,
    pub normal: usize,
    pub warning: usize,
    pub critical: usize,
}

// Formatted report rows. Numbers become pre-formatted strings here so the
// CSV exports and console previews agree exactly.

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct DistrictSummaryRow {
    #[serde(rename = "State")]
    #[tabled(rename = "State")]
    pub state: String,
    #[serde(rename = "District")]
    #[tabled(rename = "District")]
    pub district: String,
    #[serde(rename = "TotalHolders")]
    #[tabled(rename = "TotalHolders")]
    pub total_holders: String,
    #[serde(rename = "TotalUpdates")]
    #[tabled(rename = "TotalUpdates")]
    pub total_updates: String,
    #[serde(rename = "UpdateRatio")]
    #[tabled(rename = "UpdateRatio")]
    pub update_ratio: String,
    #[serde(rename = "BioCompliance")]
    #[tabled(rename = "BioCompliance")]
    pub biometric_compliance: String,
    #[serde(rename = "GrowthRate")]
    #[tabled(rename = "GrowthRate")]
    pub enrolment_growth_rate: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct StateSummaryRow {
    #[serde(rename = "State")]
    #[tabled(rename = "State")]
    pub state: String,
    #[serde(rename = "YearMonth")]
    #[tabled(rename = "YearMonth")]
    pub year_month: String,
    #[serde(rename = "TotalHolders")]
    #[tabled(rename = "TotalHolders")]
    pub total_holders: String,
    #[serde(rename = "TotalUpdates")]
    #[tabled(rename = "TotalUpdates")]
    pub total_updates: String,
    #[serde(rename = "UpdateRatio")]
    #[tabled(rename = "UpdateRatio")]
    pub update_ratio: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct AnomalyRow {
    #[serde(rename = "Rank")]
    #[tabled(rename = "Rank")]
    pub rank: usize,
    #[serde(rename = "State")]
    #[tabled(rename = "State")]
    pub state: String,
    #[serde(rename = "District")]
    #[tabled(rename = "District")]
    pub district: String,
    #[serde(rename = "UpdateRatio")]
    #[tabled(rename = "UpdateRatio")]
    pub update_ratio: String,
    #[serde(rename = "AnomalyScore")]
    #[tabled(rename = "AnomalyScore")]
    pub anomaly_score: String,
    #[serde(rename = "Flag")]
    #[tabled(rename = "Flag")]
    pub flag: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_order_groups_district_series() {
        let mut keys = vec![
            DistrictMonthKey {
                state: "Karnataka".into(),
                district: "Mysuru".into(),
                year_month: "2023-01".into(),
            },
            DistrictMonthKey {
                state: "Karnataka".into(),
                district: "Ballari".into(),
                year_month: "2023-02".into(),
            },
            DistrictMonthKey {
                state: "Karnataka".into(),
                district: "Ballari".into(),
                year_month: "2023-01".into(),
            },
        ];
        keys.sort();
        assert_eq!(keys[0].district, "Ballari");
        assert_eq!(keys[0].year_month, "2023-01");
        assert_eq!(keys[1].year_month, "2023-02");
        assert_eq!(keys[2].district, "Mysuru");
    }

    #[test]
    fn flag_order_matches_severity() {
        assert!(AnomalyFlag::Critical > AnomalyFlag::Warning);
        assert!(AnomalyFlag::Warning > AnomalyFlag::Normal);
        assert_eq!(AnomalyFlag::Critical.max(AnomalyFlag::Normal), AnomalyFlag::Critical);
    }
}
