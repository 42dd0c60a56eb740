// One-shot pipeline orchestration and the process-wide result handle.
//
// The whole computation runs synchronously: load -> normalize -> merge ->
// metrics -> summaries, then the optional analytics. The baseline tables
// are mandatory; each optional stage is caught independently so a failure
// in one degrades that output to `None` without touching the rest.
use crate::anomaly::{detect_anomalies, summarize, Strictness};
use crate::cluster::{cluster_districts, ClusterReport};
use crate::dataset::{DatasetLoader, MergeReport};
use crate::error::Result;
use crate::geo::{
    link_districts, link_states, load_boundaries, LinkReport, LinkedDistrictRecord,
    LinkedStateRecord,
};
use crate::metrics::{add_all_metrics, district_summaries, state_summaries};
use crate::patterns::{discover_patterns, PatternReport};
use crate::types::{AnomalyRecord, AnomalySummary, DistrictSummary, MetricRecord, StateSummary};
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    /// GeoJSON boundary file; geo linking is skipped when absent.
    pub boundary_file: Option<PathBuf>,
    pub strictness: Strictness,
}

impl PipelineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        PipelineConfig {
            data_dir: data_dir.into(),
            boundary_file: None,
            strictness: Strictness::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnomalyReport {
    pub records: Vec<AnomalyRecord>,
    pub summary: AnomalySummary,
}

#[derive(Debug, Clone)]
pub struct GeoLinks {
    pub districts: Vec<LinkedDistrictRecord>,
    pub district_report: LinkReport,
    pub states: Vec<LinkedStateRecord>,
    pub state_report: LinkReport,
}

/// Immutable result snapshot of one pipeline run. Optional analytics that
/// failed (or were not configured) are `None`; the baseline tables are
/// always present.
#[derive(Debug, Clone)]
pub struct DashboardData {
    pub merge_report: MergeReport,
    pub metrics: Vec<MetricRecord>,
    pub district_summaries: Vec<DistrictSummary>,
    pub state_summaries: Vec<StateSummary>,
    pub anomalies: Option<AnomalyReport>,
    pub patterns: Option<PatternReport>,
    pub clusters: Option<ClusterReport>,
    pub geo: Option<GeoLinks>,
}

/// Run the full pipeline once. Fails only on the mandatory stages.
pub fn build(config: &PipelineConfig) -> Result<DashboardData> {
    let loader = DatasetLoader::new(&config.data_dir);
    let (merged, merge_report) = loader.merge_all_datasets()?;
    let metrics = add_all_metrics(&merged);
    let district_summaries = district_summaries(&metrics);
    let state_summaries = state_summaries(&metrics);
    tracing::info!(
        rows = metrics.len(),
        districts = district_summaries.len(),
        states = state_summaries.len(),
        "baseline metrics computed"
    );

    let anomalies = if district_summaries.is_empty() {
        tracing::warn!("no district summaries; anomaly detection skipped");
        None
    } else {
        let records = detect_anomalies(&district_summaries, config.strictness);
        let summary = summarize(&records);
        tracing::info!(
            warning = summary.warning,
            critical = summary.critical,
            "anomaly detection finished"
        );
        Some(AnomalyReport { records, summary })
    };

    let patterns = Some(discover_patterns(&metrics));

    let clusters = match cluster_districts(&metrics) {
        Ok(report) => Some(report),
        Err(err) => {
            tracing::warn!(error = %err, "clustering failed; continuing without it");
            None
        }
    };

    let geo = match &config.boundary_file {
        None => None,
        Some(path) => match load_boundaries(path) {
            Ok(boundaries) => {
                let anomaly_records: &[AnomalyRecord] = anomalies
                    .as_ref()
                    .map(|a| a.records.as_slice())
                    .unwrap_or(&[]);
                let (districts, district_report) =
                    link_districts(&district_summaries, anomaly_records, &boundaries);
                let (states, state_report) = link_states(&district_summaries, &boundaries);
                Some(GeoLinks {
                    districts,
                    district_report,
                    states,
                    state_report,
                })
            }
            Err(err) => {
                tracing::warn!(error = %err, "boundary load failed; geo linking skipped");
                None
            }
        },
    };

    Ok(DashboardData {
        merge_report,
        metrics,
        district_summaries,
        state_summaries,
        anomalies,
        patterns,
        clusters,
        geo,
    })
}

/// Lifecycle of the shared result set.
#[derive(Debug, Clone, Default)]
pub enum LoadState {
    #[default]
    NotLoaded,
    Ready(Arc<DashboardData>),
    Failed(String),
}

/// Process-wide handle for the computed tables.
///
/// A reload builds the complete snapshot first and only then swaps it in,
/// so a reader never observes a half-built result. A failed rebuild
/// leaves a previously ready snapshot untouched.
#[derive(Default)]
pub struct DataHandle {
    state: Mutex<LoadState>,
}

impl DataHandle {
    pub fn new() -> Self {
        DataHandle::default()
    }

    pub fn snapshot(&self) -> LoadState {
        self.state.lock().unwrap().clone()
    }

    /// The current snapshot, if one is ready.
    pub fn get(&self) -> Option<Arc<DashboardData>> {
        match &*self.state.lock().unwrap() {
            LoadState::Ready(data) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn reload(&self, config: &PipelineConfig) -> Result<Arc<DashboardData>> {
        match build(config) {
            Ok(data) => {
                let data = Arc::new(data);
                *self.state.lock().unwrap() = LoadState::Ready(data.clone());
                Ok(data)
            }
            Err(err) => {
                let mut state = self.state.lock().unwrap();
                if !matches!(*state, LoadState::Ready(_)) {
                    *state = LoadState::Failed(err.to_string());
                }
                Err(err)
            }
        }
    }
}

/// The handle the serving layer reads from.
pub static SHARED: Lazy<DataHandle> = Lazy::new(DataHandle::new);
