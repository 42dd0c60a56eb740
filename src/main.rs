// Entry point and high-level CLI flow.
//
// The binary is a thin wrapper over the library pipeline:
// - run the full pipeline once through the shared data handle,
// - print markdown previews of the main tables,
// - write the district/state/anomaly CSVs and a JSON overview.
//
// Usage: aadhaar_insight [data_dir] [boundary.geojson]
use aadhaar_insight::output;
use aadhaar_insight::pipeline::{PipelineConfig, SHARED};
use aadhaar_insight::util::format_int;
use anyhow::Context;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let data_dir = args.next().unwrap_or_else(|| ".".to_string());
    let mut config = PipelineConfig::new(data_dir);
    config.boundary_file = args.next().map(PathBuf::from);

    println!("Processing Aadhaar datasets...");
    let data = SHARED.reload(&config).context("pipeline run failed")?;

    let report = &data.merge_report;
    let total_rows =
        report.enrolment.total_rows + report.demographic.total_rows + report.biometric.total_rows;
    let parse_errors =
        report.enrolment.parse_errors + report.demographic.parse_errors + report.biometric.parse_errors;
    let dropped = report.enrolment.dropped_dates
        + report.demographic.dropped_dates
        + report.biometric.dropped_dates
        + report.enrolment.dropped_names
        + report.demographic.dropped_names
        + report.biometric.dropped_names;
    println!(
        "Processed {} source rows into {} monthly district records.",
        format_int(total_rows as i64),
        format_int(report.merged_rows as i64)
    );
    if parse_errors + dropped > 0 {
        println!(
            "Note: {} rows skipped due to parse errors, {} dropped for bad dates or names.",
            format_int(parse_errors as i64),
            format_int(dropped as i64)
        );
    }
    println!();

    let district_rows = output::district_rows(&data.district_summaries);
    output::write_csv("district_summary.csv", &district_rows)
        .context("writing district_summary.csv")?;
    println!("District Activity Summary");
    println!("(All months, busiest districts first)\n");
    output::preview_table_rows(&district_rows, 10);
    println!("(Full table exported to district_summary.csv)\n");

    let state_rows = output::state_rows(&data.state_summaries);
    output::write_csv("state_summary.csv", &state_rows).context("writing state_summary.csv")?;
    println!("State Monthly Summary");
    output::preview_table_rows(&state_rows, 10);
    println!("(Full table exported to state_summary.csv)\n");

    if let Some(anomalies) = &data.anomalies {
        let rows = output::anomaly_rows(&anomalies.records);
        output::write_csv("anomalies.csv", &rows).context("writing anomalies.csv")?;
        println!("Anomalous Districts");
        println!(
            "({} normal, {} warning, {} critical)\n",
            format_int(anomalies.summary.normal as i64),
            format_int(anomalies.summary.warning as i64),
            format_int(anomalies.summary.critical as i64)
        );
        output::preview_table_rows(&rows, 10);
        println!("(Full table exported to anomalies.csv)\n");
    } else {
        println!("Anomaly detection unavailable for this run.\n");
    }

    if let Some(geo) = &data.geo {
        println!(
            "Geo linking: {} of {} boundary shapes matched ({} via fuzzy names, {} without data).",
            format_int(geo.district_report.matched as i64),
            format_int(geo.district_report.boundaries as i64),
            format_int(geo.district_report.fuzzy_matched as i64),
            format_int(geo.district_report.unmatched_boundaries as i64)
        );
    }

    let overview = output::build_overview(&data);
    output::write_json("overview.json", &overview).context("writing overview.json")?;
    println!(
        "Overview stats written to overview.json ({} districts across {} states).",
        format_int(overview.districts as i64),
        format_int(overview.states as i64)
    );

    Ok(())
}
