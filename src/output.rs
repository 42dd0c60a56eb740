// Report writing and console previews for the computed tables.
use crate::pipeline::DashboardData;
use crate::types::{
    AnomalyRecord, AnomalyRow, DistrictSummary, DistrictSummaryRow, StateSummary, StateSummaryRow,
};
use crate::util::format_number;
use serde::Serialize;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

pub fn write_csv<T: Serialize>(path: impl AsRef<Path>, rows: &[T]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> anyhow::Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s)?;
    Ok(())
}

pub fn preview_table_rows<T>(rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().cloned().take(max_rows).collect();
    if slice.is_empty() {
        println!("(no rows)\n");
        return;
    }
    let table_str = Table::new(slice).with(Style::markdown()).to_string();
    println!("{}\n", table_str);
}

/// District summaries as formatted report rows, busiest districts first.
pub fn district_rows(summaries: &[DistrictSummary]) -> Vec<DistrictSummaryRow> {
    let mut sorted: Vec<&DistrictSummary> = summaries.iter().collect();
    sorted.sort_by(|a, b| {
        b.update_ratio
            .partial_cmp(&a.update_ratio)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted
        .into_iter()
        .map(|s| DistrictSummaryRow {
            state: s.state.clone(),
            district: s.district.clone(),
            total_holders: format_number(s.total_holders, 0),
            total_updates: format_number(s.total_updates, 0),
            update_ratio: format_number(s.update_ratio, 4),
            biometric_compliance: format_number(s.biometric_compliance, 4),
            enrolment_growth_rate: format_number(s.enrolment_growth_rate, 4),
        })
        .collect()
}

pub fn state_rows(summaries: &[StateSummary]) -> Vec<StateSummaryRow> {
    summaries
        .iter()
        .map(|s| StateSummaryRow {
            state: s.state.clone(),
            year_month: s.year_month.clone(),
            total_holders: format_number(s.total_holders, 0),
            total_updates: format_number(s.total_updates, 0),
            update_ratio: format_number(s.update_ratio, 4),
        })
        .collect()
}

/// Anomaly records as ranked report rows, highest score first.
pub fn anomaly_rows(records: &[AnomalyRecord]) -> Vec<AnomalyRow> {
    let mut sorted: Vec<&AnomalyRecord> = records.iter().collect();
    sorted.sort_by(|a, b| {
        b.anomaly_score
            .partial_cmp(&a.anomaly_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted
        .into_iter()
        .enumerate()
        .map(|(idx, r)| AnomalyRow {
            rank: idx + 1,
            state: r.state.clone(),
            district: r.district.clone(),
            update_ratio: format_number(r.update_ratio, 4),
            anomaly_score: format_number(r.anomaly_score, 3),
            flag: r.anomaly_flag.to_string(),
        })
        .collect()
}

/// The overview counts written to `overview.json`.
#[derive(Debug, Serialize)]
pub struct Overview {
    pub monthly_records: usize,
    pub districts: usize,
    pub states: usize,
    pub months: usize,
    pub normal: usize,
    pub warning: usize,
    pub critical: usize,
    pub unmatched_boundaries: usize,
    pub fuzzy_matched_districts: usize,
}

pub fn build_overview(data: &DashboardData) -> Overview {
    let mut states: Vec<&str> = data
        .district_summaries
        .iter()
        .map(|s| s.state.as_str())
        .collect();
    states.sort_unstable();
    states.dedup();
    let mut months: Vec<&str> = data
        .metrics
        .iter()
        .map(|m| m.key.year_month.as_str())
        .collect();
    months.sort_unstable();
    months.dedup();

    let (normal, warning, critical) = data
        .anomalies
        .as_ref()
        .map(|a| (a.summary.normal, a.summary.warning, a.summary.critical))
        .unwrap_or((0, 0, 0));
    let (unmatched, fuzzy) = data
        .geo
        .as_ref()
        .map(|g| {
            (
                g.district_report.unmatched_boundaries,
                g.district_report.fuzzy_matched,
            )
        })
        .unwrap_or((0, 0));

    Overview {
        monthly_records: data.metrics.len(),
        districts: data.district_summaries.len(),
        states: states.len(),
        months: months.len(),
        normal,
        warning,
        critical,
        unmatched_boundaries: unmatched,
        fuzzy_matched_districts: fuzzy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnomalyFlag;

    #[test]
    fn anomaly_rows_rank_by_score() {
        let records = vec![
            AnomalyRecord {
                state: "Karnataka".into(),
                district: "Mysuru".into(),
                update_ratio: 0.2,
                total_holders: 100.0,
                total_updates: 20.0,
                biometric_compliance: 0.5,
                state_mean: 0.2,
                state_std: 0.0,
                anomaly_flag: AnomalyFlag::Normal,
                reason: None,
                anomaly_score: 0.1,
            },
            AnomalyRecord {
                state: "Karnataka".into(),
                district: "Ballari".into(),
                update_ratio: 4.0,
                total_holders: 100.0,
                total_updates: 400.0,
                biometric_compliance: 0.0,
                state_mean: 0.2,
                state_std: 0.0,
                anomaly_flag: AnomalyFlag::Critical,
                reason: Some("update ratio above 10x state mean"),
                anomaly_score: 0.8,
            },
        ];
        let rows = anomaly_rows(&records);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[0].district, "Ballari");
        assert_eq!(rows[0].flag, "critical");
        assert_eq!(rows[1].district, "Mysuru");
    }
}
