// Loading, cleaning and merging of the three source datasets.
//
// Each source is a directory of CSV exports. Files within a source are
// concatenated without deduplication; per-row problems are recovered with
// counters rather than errors. A source with zero files aborts the run —
// an empty-looking-valid merge is worse than a crash here.
use crate::error::{PipelineError, Result};
use crate::normalize::{clean_name, normalize_state};
use crate::types::{
    BiometricMonthly, DemographicMonthly, DistrictMonthKey, EnrolmentMonthly, MergedRecord,
    RawBiometricRow, RawDemographicRow, RawEnrolmentRow,
};
use crate::util::{parse_date_safe, parse_f64_safe, year_month};
use csv::ReaderBuilder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENROLMENT_DIR: &str = "api_data_aadhar_enrolment";
pub const DEMOGRAPHIC_DIR: &str = "api_data_aadhar_demographic";
pub const BIOMETRIC_DIR: &str = "api_data_aadhar_biometric";

/// What happened while loading one source: how much came in, how much was
/// dropped, and why. Dropped rows are a tolerated loss, not a failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub files: usize,
    pub total_rows: usize,
    pub parse_errors: usize,
    pub dropped_dates: usize,
    pub dropped_names: usize,
    pub aggregated_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub enrolment: LoadReport,
    pub demographic: LoadReport,
    pub biometric: LoadReport,
    pub merged_rows: usize,
}

pub struct DatasetLoader {
    data_dir: PathBuf,
}

impl DatasetLoader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        DatasetLoader {
            data_dir: data_dir.into(),
        }
    }

    /// All CSV files under the source directory, recursively, in a stable
    /// order. Zero files is a configuration error, not an empty result.
    fn collect_csv_files(&self, dataset: &'static str) -> Result<Vec<PathBuf>> {
        let dir = self.data_dir.join(dataset);
        let mut files = Vec::new();
        collect_csv_into(&dir, &mut files)?;
        if files.is_empty() {
            return Err(PipelineError::NoDataFound { dataset, dir });
        }
        files.sort();
        Ok(files)
    }

    pub fn process_enrolment(&self) -> Result<(Vec<EnrolmentMonthly>, LoadReport)> {
        let files = self.collect_csv_files(ENROLMENT_DIR)?;
        let mut report = LoadReport {
            files: files.len(),
            ..LoadReport::default()
        };
        let aggregated = load_and_aggregate::<RawEnrolmentRow, _>(
            &files,
            3,
            |row| {
                let values = [
                    parse_f64_safe(row.age_0_5.as_deref()).unwrap_or(0.0),
                    parse_f64_safe(row.age_5_17.as_deref()).unwrap_or(0.0),
                    parse_f64_safe(row.age_18_greater.as_deref()).unwrap_or(0.0),
                ];
                (row.date, row.state, row.district, values.to_vec())
            },
            &mut report,
        )?;
        let rows: Vec<EnrolmentMonthly> = aggregated
            .into_iter()
            .map(|(key, v)| EnrolmentMonthly {
                total_holders: v[0] + v[1] + v[2],
                key,
                age_0_5: v[0],
                age_5_17: v[1],
                age_18_greater: v[2],
            })
            .collect();
        report.aggregated_rows = rows.len();
        tracing::info!(
            files = report.files,
            rows = report.total_rows,
            aggregated = report.aggregated_rows,
            "enrolment data loaded"
        );
        Ok((rows, report))
    }

    pub fn process_demographic(&self) -> Result<(Vec<DemographicMonthly>, LoadReport)> {
        let files = self.collect_csv_files(DEMOGRAPHIC_DIR)?;
        let mut report = LoadReport {
            files: files.len(),
            ..LoadReport::default()
        };
        let aggregated = load_and_aggregate::<RawDemographicRow, _>(
            &files,
            2,
            |row| {
                let values = [
                    parse_f64_safe(row.demo_age_5_17.as_deref()).unwrap_or(0.0),
                    parse_f64_safe(row.demo_age_17_plus.as_deref()).unwrap_or(0.0),
                ];
                (row.date, row.state, row.district, values.to_vec())
            },
            &mut report,
        )?;
        let rows: Vec<DemographicMonthly> = aggregated
            .into_iter()
            .map(|(key, v)| DemographicMonthly {
                total_demo_updates: v[0] + v[1],
                key,
                demo_age_5_17: v[0],
                demo_age_17_plus: v[1],
            })
            .collect();
        report.aggregated_rows = rows.len();
        tracing::info!(
            files = report.files,
            rows = report.total_rows,
            aggregated = report.aggregated_rows,
            "demographic update data loaded"
        );
        Ok((rows, report))
    }

    pub fn process_biometric(&self) -> Result<(Vec<BiometricMonthly>, LoadReport)> {
        let files = self.collect_csv_files(BIOMETRIC_DIR)?;
        let mut report = LoadReport {
            files: files.len(),
            ..LoadReport::default()
        };
        let aggregated = load_and_aggregate::<RawBiometricRow, _>(
            &files,
            2,
            |row| {
                let values = [
                    parse_f64_safe(row.bio_age_5_17.as_deref()).unwrap_or(0.0),
                    parse_f64_safe(row.bio_age_17_plus.as_deref()).unwrap_or(0.0),
                ];
                (row.date, row.state, row.district, values.to_vec())
            },
            &mut report,
        )?;
        let rows: Vec<BiometricMonthly> = aggregated
            .into_iter()
            .map(|(key, v)| BiometricMonthly {
                total_bio_updates: v[0] + v[1],
                key,
                bio_age_5_17: v[0],
                bio_age_17_plus: v[1],
            })
            .collect();
        report.aggregated_rows = rows.len();
        tracing::info!(
            files = report.files,
            rows = report.total_rows,
            aggregated = report.aggregated_rows,
            "biometric update data loaded"
        );
        Ok((rows, report))
    }

    /// Outer join of the three aggregated sources on the full
    /// (state, district, month) key. Numeric gaps fill with zero; the key
    /// itself is carried whole, so no identity column can go missing.
    pub fn merge_all_datasets(&self) -> Result<(Vec<MergedRecord>, MergeReport)> {
        let (enrolment, enrolment_report) = self.process_enrolment()?;
        let (demographic, demographic_report) = self.process_demographic()?;
        let (biometric, biometric_report) = self.process_biometric()?;

        let mut merged: BTreeMap<DistrictMonthKey, MergedRecord> = BTreeMap::new();
        for e in enrolment {
            let rec = merged
                .entry(e.key.clone())
                .or_insert_with(|| MergedRecord::new(e.key));
            rec.age_0_5 += e.age_0_5;
            rec.age_5_17 += e.age_5_17;
            rec.age_18_greater += e.age_18_greater;
        }
        for d in demographic {
            let rec = merged
                .entry(d.key.clone())
                .or_insert_with(|| MergedRecord::new(d.key));
            rec.demo_age_5_17 += d.demo_age_5_17;
            rec.demo_age_17_plus += d.demo_age_17_plus;
        }
        for b in biometric {
            let rec = merged
                .entry(b.key.clone())
                .or_insert_with(|| MergedRecord::new(b.key));
            rec.bio_age_5_17 += b.bio_age_5_17;
            rec.bio_age_17_plus += b.bio_age_17_plus;
        }

        let merged: Vec<MergedRecord> = merged.into_values().collect();
        let report = MergeReport {
            enrolment: enrolment_report,
            demographic: demographic_report,
            biometric: biometric_report,
            merged_rows: merged.len(),
        };
        tracing::info!(rows = report.merged_rows, "datasets merged");
        Ok((merged, report))
    }
}

fn collect_csv_into(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let entries = fs::read_dir(dir).map_err(|err| PipelineError::Read {
        path: dir.to_path_buf(),
        err,
    })?;
    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::Read {
            path: dir.to_path_buf(),
            err,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_csv_into(&path, out)?;
        } else if path.extension().map_or(false, |ext| ext == "csv") {
            out.push(path);
        }
    }
    Ok(())
}

/// Shared per-source pass: read every file, clean each row, sum the
/// numeric columns by (state, district, month).
///
/// Rows are dropped (and counted) when the date does not parse or the
/// state/district name is null-like or known-invalid; unparseable numeric
/// cells count as 0. State names are canonicalized here; district names
/// only get whitespace cleanup — their aliasing belongs to geo linking.
fn load_and_aggregate<R, F>(
    files: &[PathBuf],
    ncols: usize,
    split: F,
    report: &mut LoadReport,
) -> Result<BTreeMap<DistrictMonthKey, Vec<f64>>>
where
    R: DeserializeOwned,
    F: Fn(R) -> (Option<String>, Option<String>, Option<String>, Vec<f64>),
{
    let mut aggregated: BTreeMap<DistrictMonthKey, Vec<f64>> = BTreeMap::new();

    for file in files {
        let mut rdr = ReaderBuilder::new().flexible(true).from_path(file)?;
        for result in rdr.deserialize::<R>() {
            report.total_rows += 1;
            let row = match result {
                Ok(r) => r,
                Err(_) => {
                    report.parse_errors += 1;
                    continue;
                }
            };
            let (date, state, district, values) = split(row);

            let date = match parse_date_safe(date.as_deref()) {
                Some(d) => d,
                None => {
                    report.dropped_dates += 1;
                    continue;
                }
            };
            let state = normalize_state(state.as_deref().unwrap_or(""));
            if state.is_empty() {
                report.dropped_names += 1;
                continue;
            }
            let district = clean_name(district.as_deref().unwrap_or(""));
            if district.is_empty() {
                report.dropped_names += 1;
                continue;
            }

            let key = DistrictMonthKey {
                state,
                district,
                year_month: year_month(date),
            };
            let slot = aggregated.entry(key).or_insert_with(|| vec![0.0; ncols]);
            for (acc, v) in slot.iter_mut().zip(values) {
                *acc += v;
            }
        }
    }

    Ok(aggregated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        fs::create_dir_all(dir).unwrap();
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn missing_source_fails_loudly() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = DatasetLoader::new(tmp.path());
        let err = loader.process_enrolment().unwrap_err();
        assert!(matches!(err, PipelineError::NoDataFound { dataset, .. } if dataset == ENROLMENT_DIR));
    }

    #[test]
    fn rows_aggregate_by_month_state_district() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(
            &tmp.path().join(ENROLMENT_DIR),
            "jan.csv",
            "date,state,district,age_0_5,age_5_17,age_18_greater\n\
             15-01-2023,Karnataka,Mysuru,1,2,3\n\
             20-01-2023,Karnataka,Mysuru,10,20,30\n\
             15-01-2023,Orissa,Cuttack,5,5,5\n\
             bad-date,Karnataka,Mysuru,1,1,1\n\
             15-01-2023,100000,Mysuru,1,1,1\n",
        );
        let loader = DatasetLoader::new(tmp.path());
        let (rows, report) = loader.process_enrolment().unwrap();

        assert_eq!(report.total_rows, 5);
        assert_eq!(report.dropped_dates, 1);
        assert_eq!(report.dropped_names, 1);
        assert_eq!(rows.len(), 2);

        let mysuru = rows
            .iter()
            .find(|r| r.key.district == "Mysuru")
            .unwrap();
        assert_eq!(mysuru.key.year_month, "2023-01");
        assert_eq!(mysuru.age_0_5, 11.0);
        assert_eq!(mysuru.total_holders, 66.0);

        // State alias applied during load.
        assert!(rows.iter().any(|r| r.key.state == "Odisha"));
    }

    #[test]
    fn merge_fills_missing_sources_with_zero() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(
            &tmp.path().join(ENROLMENT_DIR),
            "e.csv",
            "date,state,district,age_0_5,age_5_17,age_18_greater\n\
             15-01-2023,Karnataka,Mysuru,10,20,70\n",
        );
        write_file(
            &tmp.path().join(DEMOGRAPHIC_DIR),
            "d.csv",
            "date,state,district,demo_age_5_17,demo_age_17_\n\
             15-01-2023,Karnataka,Mysuru,4,6\n\
             15-01-2023,Karnataka,Ballari,1,2\n",
        );
        write_file(
            &tmp.path().join(BIOMETRIC_DIR),
            "b.csv",
            "date,state,district,bio_age_5_17,bio_age_17_\n\
             15-01-2023,Karnataka,Mysuru,3,5\n",
        );
        let loader = DatasetLoader::new(tmp.path());
        let (merged, report) = loader.merge_all_datasets().unwrap();

        assert_eq!(report.merged_rows, 2);
        let mysuru = merged.iter().find(|r| r.key.district == "Mysuru").unwrap();
        assert_eq!(mysuru.age_0_5 + mysuru.age_5_17 + mysuru.age_18_greater, 100.0);
        assert_eq!(mysuru.demo_age_5_17 + mysuru.demo_age_17_plus, 10.0);
        assert_eq!(mysuru.bio_age_5_17 + mysuru.bio_age_17_plus, 8.0);

        // Ballari exists only in the demographic source: full key kept,
        // other sources zero.
        let ballari = merged.iter().find(|r| r.key.district == "Ballari").unwrap();
        assert_eq!(ballari.key.state, "Karnataka");
        assert_eq!(ballari.age_0_5, 0.0);
        assert_eq!(ballari.bio_age_17_plus, 0.0);
        assert_eq!(ballari.demo_age_17_plus, 2.0);
    }
}
