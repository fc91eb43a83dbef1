use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use ndarray::Array2;
use polars::prelude::*;

pub const DST_COL: &str = "Dst-index, nT";
pub const SPEED_COL: &str = "SW Plasma Speed, km/s";
pub const BZ_COL: &str = "BZ, nT (GSM)";
pub const DENSITY_COL: &str = "SW Proton Density, N/cm^3";
pub const B_MAG_COL: &str = "Vector B Magnitude,nT";

pub const DERIVATIVE_COL: &str = "dDst_dt";
pub const E_FIELD_COL: &str = "Ey";
pub const DYN_PRESSURE_COL: &str = "P_dyn";
pub const MAG_PRESSURE_COL: &str = "P_B";

/// Permeability of free space, for the magnetic pressure term.
pub const MU_0: f64 = 4.0 * std::f64::consts::PI * 1e-7;

/// Source column / short alias pairs fed to the lag builder. The aliases are
/// the variable names that end up inside discovered equations.
pub const LAG_VARIABLES: [(&str, &str); 4] = [
    (DST_COL, "DST"),
    (E_FIELD_COL, "Ey"),
    (DYN_PRESSURE_COL, "P_dyn"),
    (MAG_PRESSURE_COL, "P_B"),
];

/// Columnar daily time series. Missing values are NaN.
#[derive(Debug, Clone)]
pub struct DataTable {
    pub dates: Vec<NaiveDate>,
    pub names: Vec<String>,
    pub columns: Vec<Vec<f64>>,
}

impl DataTable {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        let idx = self.names.iter().position(|n| n == name)?;
        Some(&self.columns[idx])
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Vec<f64>> {
        let idx = self.names.iter().position(|n| n == name)?;
        Some(&mut self.columns[idx])
    }

    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.names.push(name.into());
        self.columns.push(values);
    }
}

/// Final model inputs: lag columns ordered by variable then lag depth, and
/// the dDst/dt target vector.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub names: Vec<String>,
    pub data: Array2<f64>,
    pub target: Vec<f64>,
}

impl FeatureSet {
    pub fn n_rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }
}

fn find_series(df: &DataFrame, candidates: &[&str]) -> Option<Series> {
    for name in df.get_column_names() {
        let lower = name.to_ascii_lowercase();
        if candidates.iter().any(|c| lower == *c) {
            return df
                .column(name)
                .ok()
                .map(|col| col.as_materialized_series().clone());
        }
    }
    None
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    // Timestamps like "1995-01-01 00:00:00" keep only the calendar part.
    let day = trimmed.split_whitespace().next().unwrap_or(trimmed);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(day, "%m/%d/%Y"))
        .with_context(|| format!("unparseable date: {raw:?}"))
}

fn extract_dates(df: &DataFrame) -> Result<(String, Vec<NaiveDate>)> {
    let series = find_series(df, &["date", "datetime", "day", "time"])
        .context("missing date column")?;
    let name = series.name().to_string();
    let casted = series.cast(&DataType::String)?;
    let chunked = casted.str().context("date column cast to string failed")?;
    let mut out = Vec::with_capacity(chunked.len());
    for value in chunked {
        let raw = value.context("missing value in date column")?;
        out.push(parse_date(raw)?);
    }
    Ok((name, out))
}

fn series_to_f64(series: &Series) -> Option<Vec<f64>> {
    let casted = series.cast(&DataType::Float64).ok()?;
    let chunked = casted.f64().ok()?;
    Some(chunked.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn sorted_by_date(mut table: DataTable) -> Result<DataTable> {
    let sorted = table.dates.windows(2).all(|w| w[0] <= w[1]);
    if !sorted {
        let mut idx: Vec<usize> = (0..table.dates.len()).collect();
        idx.sort_by_key(|&i| table.dates[i]);
        table.dates = idx.iter().map(|&i| table.dates[i]).collect();
        table.columns = table
            .columns
            .iter()
            .map(|col| idx.iter().map(|&i| col[i]).collect())
            .collect();
    }
    if let Some(w) = table.dates.windows(2).find(|w| w[0] == w[1]) {
        bail!("duplicate date in dataset: {}", w[0]);
    }
    Ok(table)
}

/// Load a delimited table with a date column and named numeric columns.
/// Rows come back sorted by date; duplicate dates are rejected. Null cells
/// and non-numeric cells become NaN.
pub fn load_csv(path: impl AsRef<Path>) -> Result<DataTable> {
    let path = path.as_ref();
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .with_context(|| format!("failed to open csv file: {}", path.display()))?
        .finish()
        .with_context(|| format!("failed to read csv file: {}", path.display()))?;

    let (date_name, dates) = extract_dates(&df)?;

    let mut names = Vec::new();
    let mut columns = Vec::new();
    for col in df.get_columns() {
        let series = col.as_materialized_series();
        if series.name().as_str() == date_name {
            continue;
        }
        let Some(values) = series_to_f64(series) else {
            continue;
        };
        names.push(series.name().to_string());
        columns.push(values);
    }

    if names.is_empty() {
        bail!("no numeric columns found in {}", path.display());
    }

    sorted_by_date(DataTable {
        dates,
        names,
        columns,
    })
}

/// Keep only rows with start <= date <= end (inclusive on both ends).
pub fn filter_window(table: &DataTable, start: NaiveDate, end: NaiveDate) -> DataTable {
    let keep: Vec<usize> = table
        .dates
        .iter()
        .enumerate()
        .filter(|(_, d)| **d >= start && **d <= end)
        .map(|(i, _)| i)
        .collect();

    DataTable {
        dates: keep.iter().map(|&i| table.dates[i]).collect(),
        names: table.names.clone(),
        columns: table
            .columns
            .iter()
            .map(|col| keep.iter().map(|&i| col[i]).collect())
            .collect(),
    }
}

fn interpolate_linear(values: &mut [f64]) {
    let n = values.len();
    let mut i = 0;
    while i < n {
        if !values[i].is_nan() {
            i += 1;
            continue;
        }
        let start = i;
        let mut end = i;
        while end < n && values[end].is_nan() {
            end += 1;
        }
        // Only gaps bounded on both sides are interpolated.
        if start > 0 && end < n {
            let left = values[start - 1];
            let right = values[end];
            let span = (end - start + 1) as f64;
            for k in start..end {
                let t = (k - start + 1) as f64 / span;
                values[k] = left + (right - left) * t;
            }
        }
        i = end;
    }
}

fn forward_fill(values: &mut [f64]) {
    let mut last = f64::NAN;
    for v in values.iter_mut() {
        if v.is_nan() {
            if !last.is_nan() {
                *v = last;
            }
        } else {
            last = *v;
        }
    }
}

fn backward_fill(values: &mut [f64]) {
    let mut next = f64::NAN;
    for v in values.iter_mut().rev() {
        if v.is_nan() {
            if !next.is_nan() {
                *v = next;
            }
        } else {
            next = *v;
        }
    }
}

fn repair_series(values: &mut [f64]) {
    interpolate_linear(values);
    forward_fill(values);
    backward_fill(values);
}

/// Repair the listed columns in place: linear interpolation for inner gaps,
/// then forward-fill for trailing gaps, then backward-fill for leading gaps.
/// Listed columns absent from the table are skipped; a column with no finite
/// value at all stays entirely NaN. Unlisted columns pass through untouched.
pub fn fill_missing(table: &mut DataTable, columns: &[String]) {
    for name in columns {
        if let Some(values) = table.column_mut(name) {
            repair_series(values);
        }
    }
}

/// dDst/dt by centered difference, with one-sided differences at the edges.
pub fn dst_derivative(dst: &[f64]) -> Result<Vec<f64>> {
    let n = dst.len();
    if n < 3 {
        bail!("need at least 3 rows to compute dDst/dt, got {n}");
    }
    let mut out = Vec::with_capacity(n);
    out.push(dst[1] - dst[0]);
    for i in 1..n - 1 {
        out.push((dst[i + 1] - dst[i - 1]) / 2.0);
    }
    out.push(dst[n - 1] - dst[n - 2]);
    Ok(out)
}

/// Convective electric field in mV/m.
pub fn convective_e_field(speed: &[f64], bz: &[f64]) -> Vec<f64> {
    speed
        .iter()
        .zip(bz.iter())
        .map(|(v, b)| -v * b * 1e-3)
        .collect()
}

/// Solar wind dynamic pressure.
pub fn dynamic_pressure(density: &[f64], speed: &[f64]) -> Vec<f64> {
    density
        .iter()
        .zip(speed.iter())
        .map(|(n, v)| 1.6726e-6 * n * v * v)
        .collect()
}

/// Magnetic pressure from the field magnitude.
pub fn magnetic_pressure(b_mag: &[f64]) -> Vec<f64> {
    b_mag.iter().map(|b| b * b / (2.0 * MU_0)).collect()
}

fn require_column<'a>(table: &'a DataTable, name: &str) -> Result<&'a [f64]> {
    let values = table
        .column(name)
        .with_context(|| format!("required column '{name}' missing from dataset"))?;
    if values.iter().all(|v| v.is_nan()) {
        bail!("required column '{name}' has no usable values");
    }
    Ok(values)
}

/// Append dDst_dt, Ey, P_dyn and P_B to a cleaned table. Fails fast on an
/// absent or entirely-missing source column and on tables too short for the
/// boundary differences.
pub fn derive_features(table: &mut DataTable) -> Result<()> {
    let dst = require_column(table, DST_COL)?;
    let speed = require_column(table, SPEED_COL)?;
    let bz = require_column(table, BZ_COL)?;
    let density = require_column(table, DENSITY_COL)?;
    let b_mag = require_column(table, B_MAG_COL)?;

    let derivative = dst_derivative(dst)?;
    let ey = convective_e_field(speed, bz);
    let p_dyn = dynamic_pressure(density, speed);
    let p_b = magnetic_pressure(b_mag);

    table.push_column(DERIVATIVE_COL, derivative);
    table.push_column(E_FIELD_COL, ey);
    table.push_column(DYN_PRESSURE_COL, p_dyn);
    table.push_column(MAG_PRESSURE_COL, p_b);
    Ok(())
}

fn lagged(values: &[f64], lag: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in lag..values.len() {
        out[i] = values[i - lag];
    }
    out
}

/// Build the lagged feature matrix and target vector. Lag columns are
/// ordered by variable then lag depth; the leading NaN rows introduced by
/// shifting are repaired with the forward-fill / backward-fill pair.
pub fn build_lagged_features(table: &DataTable, n_lags: usize) -> Result<FeatureSet> {
    if n_lags == 0 {
        bail!("lag depth must be at least 1");
    }
    let target = table
        .column(DERIVATIVE_COL)
        .context("target column dDst_dt missing; derive features first")?
        .to_vec();

    let mut names = Vec::new();
    let mut feature_columns: Vec<Vec<f64>> = Vec::new();
    for (source, alias) in LAG_VARIABLES {
        let values = table
            .column(source)
            .with_context(|| format!("lag source column '{source}' missing"))?;
        for lag in 1..=n_lags {
            let mut col = lagged(values, lag);
            forward_fill(&mut col);
            backward_fill(&mut col);
            // With a single lag the short alias alone matches what readers
            // expect to see inside equations.
            let name = if n_lags == 1 {
                alias.to_string()
            } else {
                format!("{alias}_lag{lag}")
            };
            names.push(name);
            feature_columns.push(col);
        }
    }

    let n_rows = table.len();
    let n_cols = feature_columns.len();
    let mut data = Array2::<f64>::zeros((n_rows, n_cols));
    for (col_idx, col) in feature_columns.iter().enumerate() {
        for (row, v) in col.iter().enumerate() {
            data[(row, col_idx)] = *v;
        }
    }

    Ok(FeatureSet {
        names,
        data,
        target,
    })
}

/// Full preprocessing pipeline: window filter, missing-value repair, derived
/// quantities, lagged features.
pub fn prepare_feature_set(
    table: DataTable,
    start: NaiveDate,
    end: NaiveDate,
    fill_columns: &[String],
    n_lags: usize,
) -> Result<FeatureSet> {
    let mut table = filter_window(&table, start, end);
    fill_missing(&mut table, fill_columns);
    derive_features(&mut table)?;
    build_lagged_features(&table, n_lags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn table_with(names: &[&str], columns: Vec<Vec<f64>>) -> DataTable {
        let n = columns[0].len();
        DataTable {
            dates: (0..n as u32)
                .map(|i| date(2000, 1, 1 + i))
                .collect(),
            names: names.iter().map(|s| s.to_string()).collect(),
            columns,
        }
    }

    #[test]
    fn interpolation_fills_inner_gap() {
        let mut values = vec![1.0, f64::NAN, 3.0];
        repair_series(&mut values);
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn interpolation_fills_multi_step_gap() {
        let mut values = vec![0.0, f64::NAN, f64::NAN, 3.0];
        repair_series(&mut values);
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn leading_gap_uses_backward_fill() {
        let mut values = vec![f64::NAN, 2.0, 3.0];
        repair_series(&mut values);
        assert_eq!(values, vec![2.0, 2.0, 3.0]);
    }

    #[test]
    fn trailing_gap_uses_forward_fill() {
        let mut values = vec![1.0, 2.0, f64::NAN];
        repair_series(&mut values);
        assert_eq!(values, vec![1.0, 2.0, 2.0]);
    }

    #[test]
    fn entirely_missing_column_stays_missing() {
        let mut values = vec![f64::NAN, f64::NAN];
        repair_series(&mut values);
        assert!(values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn repaired_columns_have_no_missing_values() {
        let mut table = table_with(
            &["a", "b"],
            vec![
                vec![f64::NAN, 5.0, f64::NAN, 7.0, f64::NAN],
                vec![1.0, f64::NAN, 1.0, 1.0, 1.0],
            ],
        );
        fill_missing(&mut table, &["a".to_string(), "b".to_string()]);
        for col in &table.columns {
            assert!(col.iter().all(|v| v.is_finite()));
        }
        assert_eq!(table.column("a").unwrap(), &[5.0, 5.0, 6.0, 7.0, 7.0]);
    }

    #[test]
    fn unlisted_columns_pass_through() {
        let mut table = table_with(&["a"], vec![vec![1.0, f64::NAN, 3.0]]);
        fill_missing(&mut table, &[]);
        assert!(table.column("a").unwrap()[1].is_nan());
    }

    #[test]
    fn derivative_boundaries_use_one_sided_differences() {
        let out = dst_derivative(&[10.0, 12.0, 15.0, 11.0]).unwrap();
        assert_eq!(out, vec![2.0, 2.5, -0.5, -4.0]);
    }

    #[test]
    fn derivative_rejects_short_series() {
        assert!(dst_derivative(&[10.0, 12.0]).is_err());
    }

    #[test]
    fn derived_quantity_formulas() {
        let ey = convective_e_field(&[400.0], &[-5.0]);
        assert!((ey[0] - 2.0).abs() < 1e-12);

        let p_dyn = dynamic_pressure(&[5.0], &[400.0]);
        assert!((p_dyn[0] - 1.6726e-6 * 5.0 * 160_000.0).abs() < 1e-9);

        let p_b = magnetic_pressure(&[2.0]);
        assert!((p_b[0] - 4.0 / (2.0 * MU_0)).abs() < 1e-6);
    }

    #[test]
    fn derive_rejects_missing_required_column() {
        let mut table = table_with(&[DST_COL], vec![vec![1.0, 2.0, 3.0]]);
        let err = derive_features(&mut table).unwrap_err();
        assert!(err.to_string().contains(SPEED_COL));
    }

    #[test]
    fn derive_rejects_all_nan_column() {
        let mut table = table_with(
            &[DST_COL, SPEED_COL, BZ_COL, DENSITY_COL, B_MAG_COL],
            vec![
                vec![1.0, 2.0, 3.0],
                vec![f64::NAN, f64::NAN, f64::NAN],
                vec![1.0, 1.0, 1.0],
                vec![1.0, 1.0, 1.0],
                vec![1.0, 1.0, 1.0],
            ],
        );
        let err = derive_features(&mut table).unwrap_err();
        assert!(err.to_string().contains("no usable values"));
    }

    #[test]
    fn window_filter_is_inclusive() {
        let table = table_with(&["a"], vec![vec![1.0, 2.0, 3.0, 4.0]]);
        let filtered = filter_window(&table, date(2000, 1, 2), date(2000, 1, 3));
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.dates[0], date(2000, 1, 2));
        assert_eq!(filtered.column("a").unwrap(), &[2.0, 3.0]);
    }

    #[test]
    fn duplicate_dates_are_rejected() {
        let table = DataTable {
            dates: vec![date(2000, 1, 1), date(2000, 1, 1)],
            names: vec!["a".to_string()],
            columns: vec![vec![1.0, 2.0]],
        };
        assert!(sorted_by_date(table).is_err());
    }

    #[test]
    fn unsorted_dates_are_sorted() {
        let table = DataTable {
            dates: vec![date(2000, 1, 2), date(2000, 1, 1)],
            names: vec!["a".to_string()],
            columns: vec![vec![2.0, 1.0]],
        };
        let sorted = sorted_by_date(table).unwrap();
        assert_eq!(sorted.column("a").unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn lag_builder_shifts_and_fills_leading_rows() {
        let mut table = table_with(
            &[DST_COL, SPEED_COL, BZ_COL, DENSITY_COL, B_MAG_COL],
            vec![
                vec![10.0, 12.0, 15.0, 11.0],
                vec![400.0, 410.0, 420.0, 430.0],
                vec![-5.0, -4.0, -3.0, -2.0],
                vec![5.0, 5.0, 5.0, 5.0],
                vec![2.0, 2.0, 2.0, 2.0],
            ],
        );
        derive_features(&mut table).unwrap();
        let features = build_lagged_features(&table, 1).unwrap();

        assert_eq!(features.names, vec!["DST", "Ey", "P_dyn", "P_B"]);
        assert_eq!(features.n_rows(), 4);
        // Row 0 borrows the first available lagged value.
        assert_eq!(features.data[(0, 0)], 10.0);
        assert_eq!(features.data[(1, 0)], 10.0);
        assert_eq!(features.data[(2, 0)], 12.0);
        assert_eq!(features.data[(3, 0)], 15.0);
        assert_eq!(features.target, vec![2.0, 2.5, -0.5, -4.0]);
    }

    #[test]
    fn lag_builder_names_deeper_lags() {
        let mut table = table_with(
            &[DST_COL, SPEED_COL, BZ_COL, DENSITY_COL, B_MAG_COL],
            vec![
                vec![10.0, 12.0, 15.0, 11.0],
                vec![400.0, 410.0, 420.0, 430.0],
                vec![-5.0, -4.0, -3.0, -2.0],
                vec![5.0, 5.0, 5.0, 5.0],
                vec![2.0, 2.0, 2.0, 2.0],
            ],
        );
        derive_features(&mut table).unwrap();
        let features = build_lagged_features(&table, 2).unwrap();
        assert_eq!(features.n_features(), 8);
        assert_eq!(features.names[0], "DST_lag1");
        assert_eq!(features.names[1], "DST_lag2");
        assert!(features.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn load_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("omni.csv");
        std::fs::write(
            &path,
            "DATE,\"Dst-index, nT\",\"SW Plasma Speed, km/s\"\n\
             1995-01-02,-12,410\n\
             1995-01-01,-10,\n\
             1995-01-03,-15,420\n",
        )
        .unwrap();

        let table = load_csv(&path).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.dates[0], date(1995, 1, 1));
        let dst = table.column(DST_COL).unwrap();
        assert_eq!(dst, &[-10.0, -12.0, -15.0]);
        let speed = table.column(SPEED_COL).unwrap();
        assert!(speed[0].is_nan());
        assert_eq!(speed[1], 410.0);
    }

    #[test]
    fn load_csv_missing_file_is_fatal() {
        let err = load_csv("does/not/exist.csv").unwrap_err();
        assert!(format!("{err:#}").contains("failed to open csv file"));
    }

    #[test]
    fn load_csv_without_date_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_dates.csv");
        std::fs::write(&path, "\"Dst-index, nT\",\"BZ, nT (GSM)\"\n-10,1.5\n").unwrap();

        let err = load_csv(&path).unwrap_err();
        assert!(format!("{err:#}").contains("missing date column"));
    }

    #[test]
    fn load_csv_with_unparseable_date_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad_date.csv");
        std::fs::write(
            &path,
            "DATE,\"Dst-index, nT\"\n1995-01-01,-10\nsomeday,-12\n",
        )
        .unwrap();

        let err = load_csv(&path).unwrap_err();
        assert!(format!("{err:#}").contains("unparseable date"));
    }
}
