// Derived metrics over the merged table, and the district/state rollups.
//
// Every ratio is zero-guarded and clamped non-negative; a caller can
// never observe NaN or infinity from this module. The 20 / 10 / 50
// outlier thresholds in the rollups are load-bearing: downstream anomaly
// scoring assumes ratios live in this capped range.
use crate::types::{DistrictSummary, MergedRecord, MetricRecord, StateSummary};
use crate::util::{average, clip, safe_ratio};
use std::collections::HashMap;

/// A district's mean monthly ratio above this is treated as division
/// noise and recomputed from aggregate totals.
const RATIO_SUSPECT_THRESHOLD: f64 = 20.0;
/// Cap applied to the recomputed aggregate ratio.
const RATIO_RECOMPUTED_CAP: f64 = 10.0;
/// Hard cap on all final ratios; anything above is a data error.
const RATIO_HARD_CAP: f64 = 50.0;

/// Attach all derived metrics to the merged table.
///
/// The lagged metrics (biometric compliance, enrolment growth) need each
/// district's months in order: rows are visited in
/// (state, district, year_month) order and the lag resets at every
/// district boundary, so no cohort leaks across districts. A district
/// with a single period gets 0 for both.
pub fn add_all_metrics(merged: &[MergedRecord]) -> Vec<MetricRecord> {
    let mut records: Vec<MetricRecord> = merged
        .iter()
        .map(|m| {
            let total_holders = m.age_0_5 + m.age_5_17 + m.age_18_greater;
            let total_demo_updates = m.demo_age_5_17 + m.demo_age_17_plus;
            let total_bio_updates = m.bio_age_5_17 + m.bio_age_17_plus;
            let total_updates = total_demo_updates + total_bio_updates;
            MetricRecord {
                key: m.key.clone(),
                age_0_5: m.age_0_5,
                age_5_17: m.age_5_17,
                age_18_greater: m.age_18_greater,
                demo_age_5_17: m.demo_age_5_17,
                demo_age_17_plus: m.demo_age_17_plus,
                bio_age_5_17: m.bio_age_5_17,
                bio_age_17_plus: m.bio_age_17_plus,
                update_ratio: safe_ratio(total_updates, total_holders),
                demo_update_ratio: safe_ratio(total_demo_updates, total_holders),
                bio_update_ratio: safe_ratio(total_bio_updates, total_holders),
                total_holders,
                total_updates,
                total_demo_updates,
                total_bio_updates,
                biometric_compliance: 0.0,
                enrolment_growth_rate: 0.0,
            }
        })
        .collect();

    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|&a, &b| records[a].key.cmp(&records[b].key));

    let mut prev: Option<usize> = None;
    for &i in &order {
        let same_series = prev.map_or(false, |p| {
            records[p].key.state == records[i].key.state
                && records[p].key.district == records[i].key.district
        });
        if same_series {
            let p = prev.unwrap_or(i);
            let prev_age_5_17 = records[p].age_5_17;
            let prev_holders = records[p].total_holders;
            let rec = &mut records[i];
            // Compliance: this month's 17+ biometric updates over the
            // same district's 5-17 cohort one period earlier.
            rec.biometric_compliance = safe_ratio(rec.bio_age_17_plus, prev_age_5_17);
            rec.enrolment_growth_rate =
                safe_ratio(rec.total_holders - prev_holders, prev_holders);
        }
        prev = Some(i);
    }

    records
}

/// District-level rollup across all months: holders average (stock),
/// updates sum (flow), ratios average with the outlier correction.
pub fn district_summaries(records: &[MetricRecord]) -> Vec<DistrictSummary> {
    #[derive(Default)]
    struct Acc {
        holders: Vec<f64>,
        total_updates: f64,
        total_demo_updates: f64,
        total_bio_updates: f64,
        update_ratios: Vec<f64>,
        demo_ratios: Vec<f64>,
        bio_ratios: Vec<f64>,
        compliance: Vec<f64>,
        growth: Vec<f64>,
    }

    let mut map: HashMap<(String, String), Acc> = HashMap::new();
    for r in records {
        let e = map
            .entry((r.key.state.clone(), r.key.district.clone()))
            .or_default();
        e.holders.push(r.total_holders);
        e.total_updates += r.total_updates;
        e.total_demo_updates += r.total_demo_updates;
        e.total_bio_updates += r.total_bio_updates;
        e.update_ratios.push(r.update_ratio);
        e.demo_ratios.push(r.demo_update_ratio);
        e.bio_ratios.push(r.bio_update_ratio);
        e.compliance.push(r.biometric_compliance);
        e.growth.push(r.enrolment_growth_rate);
    }

    let mut rows: Vec<DistrictSummary> = map
        .into_iter()
        .map(|((state, district), acc)| {
            let holders_mean = average(&acc.holders);
            let mut update_ratio = average(&acc.update_ratios);
            // A suspiciously high mean monthly ratio is division noise
            // from a tiny holder base; fall back to the aggregate ratio.
            if update_ratio > RATIO_SUSPECT_THRESHOLD {
                update_ratio = clip(
                    safe_ratio(acc.total_updates, holders_mean),
                    0.0,
                    RATIO_RECOMPUTED_CAP,
                );
            }
            DistrictSummary {
                state,
                district,
                total_holders: holders_mean,
                total_updates: acc.total_updates,
                total_demo_updates: acc.total_demo_updates,
                total_bio_updates: acc.total_bio_updates,
                update_ratio: clip(update_ratio, 0.0, RATIO_HARD_CAP),
                demo_update_ratio: clip(average(&acc.demo_ratios), 0.0, RATIO_HARD_CAP),
                bio_update_ratio: clip(average(&acc.bio_ratios), 0.0, RATIO_HARD_CAP),
                biometric_compliance: average(&acc.compliance),
                enrolment_growth_rate: average(&acc.growth),
            }
        })
        .collect();

    rows.sort_by(|a, b| (&a.state, &a.district).cmp(&(&b.state, &b.district)));
    rows
}

/// State-level rollup per month: totals sum, compliance and growth
/// average, the update ratio recomputed from the summed totals (the
/// correct way at this level) and capped.
pub fn state_summaries(records: &[MetricRecord]) -> Vec<StateSummary> {
    #[derive(Default)]
    struct Acc {
        total_holders: f64,
        total_updates: f64,
        total_demo_updates: f64,
        total_bio_updates: f64,
        compliance: Vec<f64>,
        growth: Vec<f64>,
    }

    let mut map: HashMap<(String, String), Acc> = HashMap::new();
    for r in records {
        let e = map
            .entry((r.key.state.clone(), r.key.year_month.clone()))
            .or_default();
        e.total_holders += r.total_holders;
        e.total_updates += r.total_updates;
        e.total_demo_updates += r.total_demo_updates;
        e.total_bio_updates += r.total_bio_updates;
        e.compliance.push(r.biometric_compliance);
        e.growth.push(r.enrolment_growth_rate);
    }

    let mut rows: Vec<StateSummary> = map
        .into_iter()
        .map(|((state, year_month), acc)| StateSummary {
            update_ratio: clip(
                safe_ratio(acc.total_updates, acc.total_holders),
                0.0,
                RATIO_HARD_CAP,
            ),
            state,
            year_month,
            total_holders: acc.total_holders,
            total_updates: acc.total_updates,
            total_demo_updates: acc.total_demo_updates,
            total_bio_updates: acc.total_bio_updates,
            biometric_compliance: average(&acc.compliance),
            enrolment_growth_rate: average(&acc.growth),
        })
        .collect();

    rows.sort_by(|a, b| (&a.state, &a.year_month).cmp(&(&b.state, &b.year_month)));
    rows
}
