// Linking district/state summaries to polygon boundary records by
// canonical name, with a fuzzy fallback for the stragglers.
//
// The join is boundary-driven: every shape survives so the rendering
// layer can draw the whole map, and shapes with no matching summary carry
// zeros and no flag. Summary rows are aggregated by canonical name
// *before* the join; a boundary must never silently inherit only one of
// several colliding source rows.
use crate::error::{PipelineError, Result};
use crate::normalize::{fuzzy_match_names, normalize_district, normalize_state, FUZZY_MATCH_THRESHOLD};
use crate::types::{AnomalyFlag, AnomalyRecord, DistrictSummary};
use crate::util::average;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// One polygon from the boundary file. Geometry stays an opaque JSON
/// value; only the two name properties matter to the core.
#[derive(Debug, Clone)]
pub struct BoundaryRecord {
    pub state: String,
    pub district: String,
    pub feature: Value,
}

/// A boundary shape joined to its (aggregated) district metrics.
#[derive(Debug, Clone, Serialize)]
pub struct LinkedDistrictRecord {
    pub state: String,
    pub district: String,
    pub total_holders: f64,
    pub total_updates: f64,
    pub update_ratio: f64,
    pub biometric_compliance: f64,
    pub enrolment_growth_rate: f64,
    pub anomaly_score: f64,
    /// `None` means "no data" for this shape, not "normal".
    pub anomaly_flag: Option<AnomalyFlag>,
    pub matched: bool,
    #[serde(skip)]
    pub feature: Value,
}

/// A boundary shape joined to its state's rolled-up metrics.
#[derive(Debug, Clone, Serialize)]
pub struct LinkedStateRecord {
    pub state: String,
    pub total_holders: f64,
    pub total_updates: f64,
    pub update_ratio: f64,
    pub biometric_compliance: f64,
    pub enrolment_growth_rate: f64,
    pub matched: bool,
    #[serde(skip)]
    pub feature: Value,
}

/// Match bookkeeping for diagnosis: a name-matching miss is a silent
/// data-quality degradation, so the counts must be observable.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LinkReport {
    pub boundaries: usize,
    pub matched: usize,
    pub unmatched_boundaries: usize,
    pub unmatched_summaries: usize,
    pub fuzzy_matched: usize,
}

pub fn load_boundaries(path: &Path) -> Result<Vec<BoundaryRecord>> {
    let text = fs::read_to_string(path).map_err(|err| PipelineError::Read {
        path: path.to_path_buf(),
        err,
    })?;
    let doc: Value = serde_json::from_str(&text).map_err(|err| PipelineError::Json {
        path: path.to_path_buf(),
        err,
    })?;
    let features = doc
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::InvalidBoundaryFile {
            path: path.to_path_buf(),
        })?;

    let records = features
        .iter()
        .map(|feature| {
            let prop = |key: &str| {
                feature
                    .get("properties")
                    .and_then(|p| p.get(key))
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string()
            };
            BoundaryRecord {
                state: prop("st_nm"),
                district: prop("district"),
                feature: feature.clone(),
            }
        })
        .collect();
    Ok(records)
}

/// Collapsed metrics for all summary rows that normalize to one canonical
/// (state, district). Worst case wins for the anomaly fields and the
/// update ratio; other metrics average.
#[derive(Default)]
struct CollapsedMetrics {
    holders: Vec<f64>,
    updates: Vec<f64>,
    compliance: Vec<f64>,
    growth: Vec<f64>,
    update_ratio: f64,
    anomaly_score: f64,
    flag: Option<AnomalyFlag>,
}

pub fn link_districts(
    summaries: &[DistrictSummary],
    anomalies: &[AnomalyRecord],
    boundaries: &[BoundaryRecord],
) -> (Vec<LinkedDistrictRecord>, LinkReport) {
    let anomaly_by_key: HashMap<(&str, &str), &AnomalyRecord> = anomalies
        .iter()
        .map(|a| ((a.state.as_str(), a.district.as_str()), a))
        .collect();

    let boundary_keys: Vec<(String, String)> = boundaries
        .iter()
        .map(|b| (normalize_state(&b.state), normalize_district(&b.district)))
        .collect();
    let boundary_districts: Vec<String> = {
        let mut seen = HashSet::new();
        boundary_keys
            .iter()
            .map(|(_, d)| d.clone())
            .filter(|d| !d.is_empty() && seen.insert(d.clone()))
            .collect()
    };

    let mut summary_keys: Vec<(String, String)> = summaries
        .iter()
        .map(|s| (normalize_state(&s.state), normalize_district(&s.district)))
        .collect();
    let summary_districts: Vec<String> = {
        let mut seen = HashSet::new();
        summary_keys
            .iter()
            .map(|(_, d)| d.clone())
            .filter(|d| !d.is_empty() && seen.insert(d.clone()))
            .collect()
    };

    // Residual mismatches get one fuzzy pass against the boundary names;
    // below-threshold names stay as they are and simply fail to join.
    let fuzzy = fuzzy_match_names(&summary_districts, &boundary_districts, FUZZY_MATCH_THRESHOLD);
    for key in summary_keys.iter_mut() {
        if let Some(target) = fuzzy.get(&key.1) {
            key.1 = target.clone();
        }
    }

    // Aggregation before merge: collapse colliding spellings first.
    let mut collapsed: HashMap<(String, String), CollapsedMetrics> = HashMap::new();
    for (summary, key) in summaries.iter().zip(summary_keys) {
        let entry = collapsed.entry(key).or_default();
        entry.holders.push(summary.total_holders);
        entry.updates.push(summary.total_updates);
        entry.compliance.push(summary.biometric_compliance);
        entry.growth.push(summary.enrolment_growth_rate);
        entry.update_ratio = entry.update_ratio.max(summary.update_ratio);
        if let Some(anomaly) =
            anomaly_by_key.get(&(summary.state.as_str(), summary.district.as_str()))
        {
            entry.anomaly_score = entry.anomaly_score.max(anomaly.anomaly_score);
            entry.flag = Some(match entry.flag {
                Some(existing) => existing.max(anomaly.anomaly_flag),
                None => anomaly.anomaly_flag,
            });
        }
    }

    let mut consumed: HashSet<(String, String)> = HashSet::new();
    let mut linked = Vec::with_capacity(boundaries.len());
    for (boundary, key) in boundaries.iter().zip(&boundary_keys) {
        match collapsed.get(key) {
            Some(metrics) => {
                consumed.insert(key.clone());
                linked.push(LinkedDistrictRecord {
                    state: key.0.clone(),
                    district: key.1.clone(),
                    total_holders: average(&metrics.holders),
                    total_updates: average(&metrics.updates),
                    update_ratio: metrics.update_ratio,
                    biometric_compliance: average(&metrics.compliance),
                    enrolment_growth_rate: average(&metrics.growth),
                    anomaly_score: metrics.anomaly_score,
                    anomaly_flag: metrics.flag,
                    matched: true,
                    feature: boundary.feature.clone(),
                });
            }
            None => linked.push(LinkedDistrictRecord {
                state: key.0.clone(),
                district: key.1.clone(),
                total_holders: 0.0,
                total_updates: 0.0,
                update_ratio: 0.0,
                biometric_compliance: 0.0,
                enrolment_growth_rate: 0.0,
                anomaly_score: 0.0,
                anomaly_flag: None,
                matched: false,
                feature: boundary.feature.clone(),
            }),
        }
    }

    let report = LinkReport {
        boundaries: boundaries.len(),
        matched: linked.iter().filter(|l| l.matched).count(),
        unmatched_boundaries: linked.iter().filter(|l| !l.matched).count(),
        unmatched_summaries: collapsed.len() - consumed.len(),
        fuzzy_matched: fuzzy.len(),
    };
    if report.unmatched_summaries > 0 {
        tracing::warn!(
            count = report.unmatched_summaries,
            "district summaries with no boundary match"
        );
    }
    tracing::info!(
        boundaries = report.boundaries,
        matched = report.matched,
        fuzzy = report.fuzzy_matched,
        "district boundaries linked"
    );
    (linked, report)
}

/// State-level link: roll the district summaries up per canonical state
/// (mean ratios, summed totals) and hand every boundary feature its
/// state's metrics.
pub fn link_states(
    summaries: &[DistrictSummary],
    boundaries: &[BoundaryRecord],
) -> (Vec<LinkedStateRecord>, LinkReport) {
    #[derive(Default)]
    struct StateAcc {
        holders: f64,
        updates: f64,
        ratios: Vec<f64>,
        compliance: Vec<f64>,
        growth: Vec<f64>,
    }

    let mut by_state: HashMap<String, StateAcc> = HashMap::new();
    for s in summaries {
        let state = normalize_state(&s.state);
        if state.is_empty() {
            continue;
        }
        let e = by_state.entry(state).or_default();
        e.holders += s.total_holders;
        e.updates += s.total_updates;
        e.ratios.push(s.update_ratio);
        e.compliance.push(s.biometric_compliance);
        e.growth.push(s.enrolment_growth_rate);
    }

    let mut consumed: HashSet<String> = HashSet::new();
    let mut linked = Vec::with_capacity(boundaries.len());
    for boundary in boundaries {
        let state = normalize_state(&boundary.state);
        match by_state.get(&state) {
            Some(acc) => {
                consumed.insert(state.clone());
                linked.push(LinkedStateRecord {
                    state,
                    total_holders: acc.holders,
                    total_updates: acc.updates,
                    update_ratio: average(&acc.ratios),
                    biometric_compliance: average(&acc.compliance),
                    enrolment_growth_rate: average(&acc.growth),
                    matched: true,
                    feature: boundary.feature.clone(),
                });
            }
            None => linked.push(LinkedStateRecord {
                state,
                total_holders: 0.0,
                total_updates: 0.0,
                update_ratio: 0.0,
                biometric_compliance: 0.0,
                enrolment_growth_rate: 0.0,
                matched: false,
                feature: boundary.feature.clone(),
            }),
        }
    }

    let report = LinkReport {
        boundaries: boundaries.len(),
        matched: linked.iter().filter(|l| l.matched).count(),
        unmatched_boundaries: linked.iter().filter(|l| !l.matched).count(),
        unmatched_summaries: by_state.len() - consumed.len(),
        fuzzy_matched: 0,
    };
    (linked, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn boundary(state: &str, district: &str) -> BoundaryRecord {
        BoundaryRecord {
            state: state.to_string(),
            district: district.to_string(),
            feature: json!({
                "type": "Feature",
                "properties": { "st_nm": state, "district": district },
                "geometry": { "type": "Polygon", "coordinates": [] }
            }),
        }
    }

    fn summary(state: &str, district: &str, update_ratio: f64) -> DistrictSummary {
        DistrictSummary {
            state: state.to_string(),
            district: district.to_string(),
            total_holders: 100.0,
            total_updates: 20.0,
            total_demo_updates: 10.0,
            total_bio_updates: 10.0,
            update_ratio,
            demo_update_ratio: 0.1,
            bio_update_ratio: 0.1,
            biometric_compliance: 0.5,
            enrolment_growth_rate: 0.1,
        }
    }

    fn anomaly(state: &str, district: &str, score: f64, flag: AnomalyFlag) -> AnomalyRecord {
        AnomalyRecord {
            state: state.to_string(),
            district: district.to_string(),
            update_ratio: 0.2,
            total_holders: 100.0,
            total_updates: 20.0,
            biometric_compliance: 0.5,
            state_mean: 0.2,
            state_std: 0.0,
            anomaly_flag: flag,
            reason: None,
            anomaly_score: score,
        }
    }

    #[test]
    fn colliding_spellings_aggregate_before_the_join() {
        // "Bangalore" and "Bengaluru" both canonicalize to
        // "Bengaluru Urban"; the shape must see the worst case of the two.
        let summaries = vec![
            summary("Karnataka", "Bangalore", 0.4),
            summary("Karnataka", "Bengaluru", 0.2),
        ];
        let anomalies = vec![
            anomaly("Karnataka", "Bangalore", 0.3, AnomalyFlag::Warning),
            anomaly("Karnataka", "Bengaluru", 0.9, AnomalyFlag::Critical),
        ];
        let boundaries = vec![boundary("Karnataka", "Bengaluru Urban")];

        let (linked, report) = link_districts(&summaries, &anomalies, &boundaries);
        assert_eq!(linked.len(), 1);
        let l = &linked[0];
        assert!(l.matched);
        assert_eq!(l.district, "Bengaluru Urban");
        assert_eq!(l.anomaly_score, 0.9);
        assert_eq!(l.anomaly_flag, Some(AnomalyFlag::Critical));
        // Max policy for the ratio, mean for the plain metrics.
        assert_eq!(l.update_ratio, 0.4);
        assert_eq!(l.total_holders, 100.0);
        assert_eq!(report.matched, 1);
        assert_eq!(report.unmatched_summaries, 0);
    }

    #[test]
    fn unmatched_boundaries_survive_with_no_data() {
        let summaries = vec![summary("Karnataka", "Mysuru", 0.2)];
        let boundaries = vec![
            boundary("Karnataka", "Mysuru"),
            boundary("Karnataka", "Kodagu"),
        ];
        let (linked, report) = link_districts(&summaries, &[], &boundaries);
        assert_eq!(linked.len(), 2);
        let kodagu = linked.iter().find(|l| l.district == "Kodagu").unwrap();
        assert!(!kodagu.matched);
        assert_eq!(kodagu.total_holders, 0.0);
        assert_eq!(kodagu.anomaly_flag, None);
        assert_eq!(report.unmatched_boundaries, 1);
    }

    #[test]
    fn fuzzy_fallback_bridges_residual_spellings() {
        // "Mysuruu" is not in the alias table but is close enough to the
        // boundary name to clear the 85 threshold.
        let summaries = vec![summary("Karnataka", "Mysuruu", 0.2)];
        let boundaries = vec![boundary("Karnataka", "Mysuru")];
        let (linked, report) = link_districts(&summaries, &[], &boundaries);
        assert!(linked[0].matched);
        assert_eq!(report.fuzzy_matched, 1);
        assert_eq!(report.unmatched_summaries, 0);
    }

    #[test]
    fn summaries_without_a_shape_are_counted() {
        let summaries = vec![
            summary("Karnataka", "Mysuru", 0.2),
            summary("Karnataka", "Nowhere Specific", 0.2),
        ];
        let boundaries = vec![boundary("Karnataka", "Mysuru")];
        let (_, report) = link_districts(&summaries, &[], &boundaries);
        assert_eq!(report.unmatched_summaries, 1);
    }

    #[test]
    fn state_link_rolls_up_and_keeps_every_feature() {
        let summaries = vec![
            summary("Karnataka", "Mysuru", 0.2),
            summary("Karnataka", "Ballari", 0.4),
            summary("Odisha", "Cuttack", 0.1),
        ];
        let boundaries = vec![
            boundary("Karnataka", "Mysuru"),
            boundary("Karnataka", "Ballari"),
            boundary("Sikkim", "East District"),
        ];
        let (linked, report) = link_states(&summaries, &boundaries);
        assert_eq!(linked.len(), 3);
        let karnataka: Vec<_> = linked.iter().filter(|l| l.state == "Karnataka").collect();
        assert_eq!(karnataka.len(), 2);
        // Summed holders, averaged ratio, for every Karnataka feature.
        for l in karnataka {
            assert_eq!(l.total_holders, 200.0);
            assert!((l.update_ratio - 0.3).abs() < 1e-12);
        }
        assert!(!linked.iter().find(|l| l.state == "Sikkim").unwrap().matched);
        assert_eq!(report.unmatched_boundaries, 1);
        // Odisha has data but no shape.
        assert_eq!(report.unmatched_summaries, 1);
    }
}
