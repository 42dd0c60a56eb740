// K-means clustering of districts on activity, compliance and growth.
// Optional analytics: failures degrade to "no clusters", never block the
// baseline metrics.
use crate::error::{PipelineError, Result};
use crate::types::MetricRecord;
use crate::util::{average, std_pop};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

pub const CLUSTER_COUNT: usize = 4;
const RESTARTS: usize = 10;
const MAX_ITERATIONS: usize = 300;
/// Fixed seed keeps cluster assignments reproducible across runs.
const SEED: u64 = 42;

const FEATURES: usize = 3;

/// One district's aggregated feature row plus its assigned cluster.
#[derive(Debug, Clone, Serialize)]
pub struct ClusteredDistrict {
    pub state: String,
    pub district: String,
    pub update_ratio: f64,
    pub biometric_compliance: f64,
    pub enrolment_growth_rate: f64,
    pub total_holders: f64,
    pub demo_update_ratio: f64,
    pub bio_update_ratio: f64,
    pub cluster: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterCharacteristics {
    pub cluster: usize,
    pub label: String,
    pub size: usize,
    pub avg_update_ratio: f64,
    pub avg_compliance: f64,
    pub avg_growth_rate: f64,
    pub total_population: f64,
    pub states: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub districts: Vec<ClusteredDistrict>,
    pub clusters: Vec<ClusterCharacteristics>,
}

/// Cluster districts on standardized
/// [update_ratio, biometric_compliance, enrolment_growth_rate] features.
/// Non-finite feature values become 0 before scaling.
pub fn cluster_districts(records: &[MetricRecord]) -> Result<ClusterReport> {
    let mut rows = prepare_features(records);
    if rows.len() < CLUSTER_COUNT {
        return Err(PipelineError::TooFewDistricts {
            k: CLUSTER_COUNT,
            n: rows.len(),
        });
    }

    let matrix: Vec<[f64; FEATURES]> = standardize(
        rows.iter()
            .map(|r| {
                [
                    r.update_ratio,
                    r.biometric_compliance,
                    r.enrolment_growth_rate,
                ]
            })
            .collect(),
    );

    let assignments = kmeans(&matrix, CLUSTER_COUNT);
    for (row, cluster) in rows.iter_mut().zip(&assignments) {
        row.cluster = *cluster;
    }

    let clusters = characterize(&rows);
    Ok(ClusterReport {
        districts: rows,
        clusters,
    })
}

fn prepare_features(records: &[MetricRecord]) -> Vec<ClusteredDistrict> {
    #[derive(Default)]
    struct Acc {
        update_ratios: Vec<f64>,
        compliance: Vec<f64>,
        growth: Vec<f64>,
        demo_ratios: Vec<f64>,
        bio_ratios: Vec<f64>,
        holders: f64,
    }

    let mut per_district: BTreeMap<(String, String), Acc> = BTreeMap::new();
    for r in records {
        let e = per_district
            .entry((r.key.state.clone(), r.key.district.clone()))
            .or_default();
        e.update_ratios.push(r.update_ratio);
        e.compliance.push(r.biometric_compliance);
        e.growth.push(r.enrolment_growth_rate);
        e.demo_ratios.push(r.demo_update_ratio);
        e.bio_ratios.push(r.bio_update_ratio);
        e.holders += r.total_holders;
    }

    let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
    per_district
        .into_iter()
        .map(|((state, district), acc)| ClusteredDistrict {
            state,
            district,
            update_ratio: finite(average(&acc.update_ratios)),
            biometric_compliance: finite(average(&acc.compliance)),
            enrolment_growth_rate: finite(average(&acc.growth)),
            total_holders: acc.holders,
            demo_update_ratio: finite(average(&acc.demo_ratios)),
            bio_update_ratio: finite(average(&acc.bio_ratios)),
            cluster: 0,
        })
        .collect()
}

/// Z-score scaling per feature; a constant feature scales to all zeros.
fn standardize(rows: Vec<[f64; FEATURES]>) -> Vec<[f64; FEATURES]> {
    let mut means = [0.0; FEATURES];
    let mut stds = [0.0; FEATURES];
    for f in 0..FEATURES {
        let column: Vec<f64> = rows.iter().map(|r| r[f]).collect();
        means[f] = average(&column);
        stds[f] = std_pop(&column);
    }
    rows.into_iter()
        .map(|row| {
            let mut scaled = [0.0; FEATURES];
            for f in 0..FEATURES {
                if stds[f] > 0.0 {
                    scaled[f] = (row[f] - means[f]) / stds[f];
                }
            }
            scaled
        })
        .collect()
}

fn squared_distance(a: &[f64; FEATURES], b: &[f64; FEATURES]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

/// Lloyd's algorithm with several random restarts; the lowest-inertia
/// run wins. Deterministic via the fixed seed.
fn kmeans(points: &[[f64; FEATURES]], k: usize) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut best: Option<(f64, Vec<usize>)> = None;

    for _ in 0..RESTARTS {
        let mut centroids: Vec<[f64; FEATURES]> = sample(&mut rng, points.len(), k)
            .into_iter()
            .map(|i| points[i])
            .collect();
        let mut assignments = vec![0usize; points.len()];

        for _ in 0..MAX_ITERATIONS {
            let mut changed = false;
            for (i, p) in points.iter().enumerate() {
                let nearest = centroids
                    .iter()
                    .enumerate()
                    .map(|(c, centroid)| (c, squared_distance(p, centroid)))
                    .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(c, _)| c)
                    .unwrap_or(0);
                if assignments[i] != nearest {
                    assignments[i] = nearest;
                    changed = true;
                }
            }

            let mut sums = vec![[0.0; FEATURES]; k];
            let mut counts = vec![0usize; k];
            for (p, &c) in points.iter().zip(&assignments) {
                counts[c] += 1;
                for f in 0..FEATURES {
                    sums[c][f] += p[f];
                }
            }
            for c in 0..k {
                if counts[c] > 0 {
                    for f in 0..FEATURES {
                        centroids[c][f] = sums[c][f] / counts[c] as f64;
                    }
                }
            }

            if !changed {
                break;
            }
        }

        let inertia: f64 = points
            .iter()
            .zip(&assignments)
            .map(|(p, &c)| squared_distance(p, &centroids[c]))
            .sum();
        if best.as_ref().map_or(true, |(i, _)| inertia < *i) {
            best = Some((inertia, assignments));
        }
    }

    best.map(|(_, a)| a).unwrap_or_default()
}

fn characterize(rows: &[ClusteredDistrict]) -> Vec<ClusterCharacteristics> {
    let mut clusters = Vec::new();
    for cluster in 0..CLUSTER_COUNT {
        let members: Vec<&ClusteredDistrict> =
            rows.iter().filter(|r| r.cluster == cluster).collect();
        if members.is_empty() {
            continue;
        }
        let ratios: Vec<f64> = members.iter().map(|m| m.update_ratio).collect();
        let compliance: Vec<f64> = members.iter().map(|m| m.biometric_compliance).collect();
        let growth: Vec<f64> = members.iter().map(|m| m.enrolment_growth_rate).collect();
        let avg_update_ratio = average(&ratios);
        let avg_compliance = average(&compliance);
        let states: HashSet<&str> = members.iter().map(|m| m.state.as_str()).collect();

        clusters.push(ClusterCharacteristics {
            cluster,
            label: label_for(avg_update_ratio, avg_compliance).to_string(),
            size: members.len(),
            avg_update_ratio,
            avg_compliance,
            avg_growth_rate: average(&growth),
            total_population: members.iter().map(|m| m.total_holders).sum(),
            states: states.len(),
        });
    }
    clusters
}

fn label_for(avg_update_ratio: f64, avg_compliance: f64) -> &'static str {
    if avg_update_ratio > 2.0 {
        if avg_compliance > 0.8 {
            "High Activity & Quality"
        } else {
            "High Activity"
        }
    } else if avg_update_ratio > 1.0 {
        if avg_compliance > 0.6 {
            "Moderate Activity & Quality"
        } else {
            "Moderate Activity"
        }
    } else if avg_compliance > 0.6 {
        "Quality Focused"
    } else {
        "Low Engagement"
    }
}
