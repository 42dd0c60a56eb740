// End-to-end pipeline scenario over a temporary dataset: raw CSVs in,
// linked metric tables out.
use aadhaar_insight::dataset::{BIOMETRIC_DIR, DEMOGRAPHIC_DIR, ENROLMENT_DIR};
use aadhaar_insight::pipeline::{build, PipelineConfig};
use std::fs;
use std::path::Path;

fn write_file(dir: &Path, name: &str, contents: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), contents).unwrap();
}

/// Two months of data for two Karnataka districts, with "Bangalore"
/// spelled the way the enrolment exports spell it, plus a second file in
/// the enrolment source to exercise concatenation.
fn seed_dataset(root: &Path) {
    write_file(
        &root.join(ENROLMENT_DIR),
        "jan.csv",
        "date,state,district,age_0_5,age_5_17,age_18_greater\n\
         15-01-2023,Karnataka,Bangalore,10,20,70\n\
         15-01-2023,Karnataka,Mysuru,100,200,700\n",
    );
    write_file(
        &root.join(ENROLMENT_DIR),
        "feb.csv",
        "date,state,district,age_0_5,age_5_17,age_18_greater\n\
         15-02-2023,Karnataka,Bangalore,20,30,100\n\
         15-02-2023,Karnataka,Mysuru,100,200,700\n",
    );
    write_file(
        &root.join(DEMOGRAPHIC_DIR),
        "demo.csv",
        "date,state,district,demo_age_5_17,demo_age_17_\n\
         15-01-2023,Karnataka,Bangalore,4,6\n\
         15-02-2023,Karnataka,Bangalore,2,3\n\
         15-01-2023,Karnataka,Mysuru,10,10\n",
    );
    write_file(
        &root.join(BIOMETRIC_DIR),
        "bio.csv",
        "date,state,district,bio_age_5_17,bio_age_17_\n\
         15-01-2023,Karnataka,Bangalore,3,5\n\
         15-02-2023,Karnataka,Bangalore,1,4\n\
         15-01-2023,Karnataka,Mysuru,5,15\n",
    );
}

fn seed_boundaries(path: &Path) {
    let geojson = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "st_nm": "Karnataka", "district": "Bengaluru Urban" },
                "geometry": { "type": "Polygon", "coordinates": [] }
            },
            {
                "type": "Feature",
                "properties": { "st_nm": "Karnataka", "district": "Mysuru" },
                "geometry": { "type": "Polygon", "coordinates": [] }
            },
            {
                "type": "Feature",
                "properties": { "st_nm": "Karnataka", "district": "Kodagu" },
                "geometry": { "type": "Polygon", "coordinates": [] }
            }
        ]
    }"#;
    fs::write(path, geojson).unwrap();
}

#[test]
fn full_pipeline_from_raw_files_to_linked_tables() {
    let tmp = tempfile::tempdir().unwrap();
    seed_dataset(tmp.path());
    let boundary_path = tmp.path().join("india.geojson");
    seed_boundaries(&boundary_path);

    let mut config = PipelineConfig::new(tmp.path());
    config.boundary_file = Some(boundary_path);
    let data = build(&config).unwrap();

    // Merge round-trip: January Bangalore keeps the per-source sums.
    let jan_bangalore = data
        .metrics
        .iter()
        .find(|m| m.key.district == "Bangalore" && m.key.year_month == "2023-01")
        .expect("merged record for Bangalore January");
    assert_eq!(jan_bangalore.total_holders, 100.0);
    assert_eq!(jan_bangalore.total_demo_updates, 10.0);
    assert_eq!(jan_bangalore.total_bio_updates, 8.0);
    assert_eq!(jan_bangalore.total_updates, 18.0);
    assert!((jan_bangalore.update_ratio - 0.18).abs() < 1e-12);

    // First period per district: lagged metrics are zero.
    assert_eq!(jan_bangalore.biometric_compliance, 0.0);
    assert_eq!(jan_bangalore.enrolment_growth_rate, 0.0);

    // Second period: compliance against January's 5-17 cohort (4 / 20),
    // growth from 100 to 150 holders.
    let feb_bangalore = data
        .metrics
        .iter()
        .find(|m| m.key.district == "Bangalore" && m.key.year_month == "2023-02")
        .unwrap();
    assert!((feb_bangalore.biometric_compliance - 0.2).abs() < 1e-12);
    assert!((feb_bangalore.enrolment_growth_rate - 0.5).abs() < 1e-12);

    // Every derived ratio is finite and non-negative, everywhere.
    for m in &data.metrics {
        for v in [
            m.update_ratio,
            m.demo_update_ratio,
            m.bio_update_ratio,
            m.biometric_compliance,
            m.enrolment_growth_rate,
        ] {
            assert!(v.is_finite() && v >= 0.0);
        }
    }

    // Baseline rollups cover both districts and both months.
    assert_eq!(data.district_summaries.len(), 2);
    assert_eq!(data.state_summaries.len(), 2);
    let anomalies = data.anomalies.as_ref().expect("anomalies computed");
    assert_eq!(anomalies.summary.total_districts, 2);

    // Geo linking: "Bangalore" reaches the "Bengaluru Urban" shape via
    // the alias table; the shape with no data survives zero-filled.
    let geo = data.geo.as_ref().expect("geo links computed");
    assert_eq!(geo.district_report.boundaries, 3);
    let bengaluru = geo
        .districts
        .iter()
        .find(|l| l.district == "Bengaluru Urban")
        .unwrap();
    assert!(bengaluru.matched);
    assert!(bengaluru.update_ratio > 0.0);
    assert!(bengaluru.anomaly_flag.is_some());
    let kodagu = geo.districts.iter().find(|l| l.district == "Kodagu").unwrap();
    assert!(!kodagu.matched);
    assert_eq!(kodagu.anomaly_flag, None);
    assert_eq!(kodagu.update_ratio, 0.0);
    assert_eq!(geo.district_report.unmatched_boundaries, 1);
    assert_eq!(geo.district_report.unmatched_summaries, 0);

    // State-level link carries the rolled-up state metrics to every
    // Karnataka feature.
    assert_eq!(geo.states.len(), 3);
    assert!(geo.states.iter().all(|s| s.state == "Karnataka"));
    assert!(geo.states.iter().all(|s| s.matched));
}

#[test]
fn colliding_district_spellings_collapse_to_the_worst_case() {
    // "Bangalore" and "Bengaluru" are distinct rows all the way through
    // the merged table, and only collapse at geo linking, where the max
    // and severity policies keep the worst case.
    let tmp = tempfile::tempdir().unwrap();
    write_file(
        &tmp.path().join(ENROLMENT_DIR),
        "e.csv",
        "date,state,district,age_0_5,age_5_17,age_18_greater\n\
         15-01-2023,Karnataka,Bangalore,10,20,70\n\
         15-01-2023,Karnataka,Bengaluru,1000,2000,7000\n\
         15-01-2023,Karnataka,Mysuru,100,200,700\n",
    );
    write_file(
        &tmp.path().join(DEMOGRAPHIC_DIR),
        "d.csv",
        "date,state,district,demo_age_5_17,demo_age_17_\n\
         15-01-2023,Karnataka,Bangalore,400,500\n\
         15-01-2023,Karnataka,Bengaluru,10,10\n\
         15-01-2023,Karnataka,Mysuru,10,10\n",
    );
    write_file(
        &tmp.path().join(BIOMETRIC_DIR),
        "b.csv",
        "date,state,district,bio_age_5_17,bio_age_17_\n\
         15-01-2023,Karnataka,Bangalore,100,800\n\
         15-01-2023,Karnataka,Bengaluru,5,5\n\
         15-01-2023,Karnataka,Mysuru,5,5\n",
    );
    let boundary_path = tmp.path().join("india.geojson");
    fs::write(
        &boundary_path,
        r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "st_nm": "Karnataka", "district": "Bengaluru Urban" },
                    "geometry": { "type": "Polygon", "coordinates": [] }
                },
                {
                    "type": "Feature",
                    "properties": { "st_nm": "Karnataka", "district": "Mysuru" },
                    "geometry": { "type": "Polygon", "coordinates": [] }
                }
            ]
        }"#,
    )
    .unwrap();

    let mut config = PipelineConfig::new(tmp.path());
    config.boundary_file = Some(boundary_path);
    let data = build(&config).unwrap();

    // Still three distinct rows before linking.
    assert_eq!(data.district_summaries.len(), 3);

    let anomalies = data.anomalies.as_ref().unwrap();
    let score_of = |district: &str| {
        anomalies
            .records
            .iter()
            .find(|r| r.district == district)
            .unwrap()
            .anomaly_score
    };
    let flag_of = |district: &str| {
        anomalies
            .records
            .iter()
            .find(|r| r.district == district)
            .unwrap()
            .anomaly_flag
    };
    let max_score = score_of("Bangalore").max(score_of("Bengaluru"));
    let max_flag = flag_of("Bangalore").max(flag_of("Bengaluru"));

    let geo = data.geo.as_ref().unwrap();
    let linked = geo
        .districts
        .iter()
        .find(|l| l.district == "Bengaluru Urban")
        .unwrap();
    assert!(linked.matched);
    assert_eq!(linked.anomaly_score, max_score);
    assert_eq!(linked.anomaly_flag, Some(max_flag));
    // Two summary rows collapsed into one shape, none left dangling.
    assert_eq!(geo.district_report.unmatched_summaries, 0);
}

#[test]
fn empty_source_directory_fails_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    // Enrolment present, the other two missing entirely.
    write_file(
        &tmp.path().join(ENROLMENT_DIR),
        "e.csv",
        "date,state,district,age_0_5,age_5_17,age_18_greater\n\
         15-01-2023,Karnataka,Mysuru,10,20,70\n",
    );
    let config = PipelineConfig::new(tmp.path());
    let err = build(&config).unwrap_err();
    assert!(err.to_string().contains("no"));
    assert!(err.to_string().contains("data files found"));
}
