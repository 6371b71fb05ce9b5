//! Schema profiling for tabular datasets.
//!
//! [`profile`] partitions every column into exactly one of the numeric or
//! categorical lists and computes the statistics the agent and the dashboard
//! work from. Profiling is a pure function of the table: running it twice on
//! an unchanged file yields identical output.
//!
//! A column is numeric when it has at least one value and every non-missing
//! cell parses as a number. Columns whose values are all ISO-8601 dates are
//! reported as temporal but stay on the categorical side.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use crate::config::ProfilerConfig;
use crate::error::Result;
use crate::table::{self, is_missing, parse_number, Table};

/// Distinct values listed per categorical column.
pub const MAX_REPORTED_DISTINCT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InferredType {
    Numeric,
    Categorical,
    Temporal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericProfile {
    pub name: String,
    /// Position of the column in the table.
    pub index: usize,
    pub inferred_type: InferredType,
    /// Non-missing values.
    pub count: usize,
    pub missing: usize,
    pub cardinality: usize,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoricalProfile {
    pub name: String,
    pub index: usize,
    /// `Categorical` or `Temporal`.
    pub inferred_type: InferredType,
    pub count: usize,
    pub missing: usize,
    pub cardinality: usize,
    /// Up to [`MAX_REPORTED_DISTINCT`] values in order of first appearance.
    pub distinct_values: Vec<String>,
    pub top_value: Option<String>,
    pub top_count: usize,
}

impl CategoricalProfile {
    /// Eligible as the category axis of a bar chart.
    pub fn bar_candidate(&self, config: &ProfilerConfig) -> bool {
        self.cardinality > 0 && self.cardinality <= config.bar_max_cardinality
    }

    /// Eligible for a pie chart of its value distribution.
    pub fn pie_candidate(&self, config: &ProfilerConfig) -> bool {
        self.cardinality > 0 && self.cardinality <= config.pie_max_cardinality
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabularSchema {
    pub row_count: usize,
    pub column_count: usize,
    pub numeric: Vec<NumericProfile>,
    pub categorical: Vec<CategoricalProfile>,
}

impl TabularSchema {
    /// Every column with its inferred type, in table order.
    pub fn columns(&self) -> Vec<(&str, InferredType)> {
        let mut all: Vec<(usize, &str, InferredType)> = self
            .numeric
            .iter()
            .map(|c| (c.index, c.name.as_str(), c.inferred_type))
            .chain(
                self.categorical
                    .iter()
                    .map(|c| (c.index, c.name.as_str(), c.inferred_type)),
            )
            .collect();
        all.sort_by_key(|(i, _, _)| *i);
        all.into_iter().map(|(_, n, t)| (n, t)).collect()
    }

    pub fn numeric_column(&self, name: &str) -> Option<&NumericProfile> {
        self.numeric.iter().find(|c| c.name == name)
    }

    pub fn categorical_column(&self, name: &str) -> Option<&CategoricalProfile> {
        self.categorical.iter().find(|c| c.name == name)
    }

    /// One line per column, used in prompts and canned answers.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "{} rows x {} columns\n",
            self.row_count, self.column_count
        );
        for (name, kind) in self.columns() {
            match kind {
                InferredType::Numeric => {
                    if let Some(c) = self.numeric_column(name) {
                        out.push_str(&format!(
                            "- {} (numeric): min={}, max={}, mean={}, sum={}\n",
                            c.name,
                            format_number(c.min),
                            format_number(c.max),
                            format_number(c.mean),
                            format_number(c.sum)
                        ));
                    }
                }
                InferredType::Categorical | InferredType::Temporal => {
                    if let Some(c) = self.categorical_column(name) {
                        let kind = if c.inferred_type == InferredType::Temporal {
                            "temporal"
                        } else {
                            "categorical"
                        };
                        out.push_str(&format!(
                            "- {} ({}): {} distinct, top={}\n",
                            c.name,
                            kind,
                            c.cardinality,
                            c.top_value.as_deref().unwrap_or("-")
                        ));
                    }
                }
            }
        }
        out
    }
}

/// Loads and profiles a tabular file.
pub fn profile_path(path: &Path) -> Result<TabularSchema> {
    let table = table::load_table(path)?;
    Ok(profile(&table))
}

pub fn profile(table: &Table) -> TabularSchema {
    let mut numeric = Vec::new();
    let mut categorical = Vec::new();

    for (index, name) in table.columns.iter().enumerate() {
        let present: Vec<&str> = table.cells(index).filter(|c| !is_missing(c)).collect();
        let missing = table.row_count() - present.len();
        let numbers: Option<Vec<f64>> = present.iter().map(|c| parse_number(c)).collect();

        match numbers {
            Some(values) if !values.is_empty() => {
                // Present and all-numeric implies a summary exists.
                if let Some(s) = summarize(&values) {
                    numeric.push(NumericProfile {
                        name: name.clone(),
                        index,
                        inferred_type: InferredType::Numeric,
                        count: s.count,
                        missing,
                        cardinality: distinct_numbers(&values),
                        sum: s.sum,
                        mean: s.mean,
                        min: s.min,
                        max: s.max,
                    });
                }
            }
            _ => {
                let counts = value_counts(present.iter().copied());
                let inferred_type = if !present.is_empty() && present.iter().all(|c| is_temporal(c))
                {
                    InferredType::Temporal
                } else {
                    InferredType::Categorical
                };
                let (top_value, top_count) = match counts.first() {
                    Some((v, n)) => (Some(v.clone()), *n),
                    None => (None, 0),
                };
                categorical.push(CategoricalProfile {
                    name: name.clone(),
                    index,
                    inferred_type,
                    count: present.len(),
                    missing,
                    cardinality: counts.len(),
                    distinct_values: first_seen(present.iter().copied()),
                    top_value,
                    top_count,
                });
            }
        }
    }

    TabularSchema {
        row_count: table.row_count(),
        column_count: table.column_count(),
        numeric,
        categorical,
    }
}

fn first_seen<'a>(cells: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for cell in cells {
        let cell = cell.trim();
        if seen.insert(cell) {
            out.push(cell.to_string());
            if out.len() == MAX_REPORTED_DISTINCT {
                break;
            }
        }
    }
    out
}

fn is_temporal(cell: &str) -> bool {
    let cell = cell.trim();
    NaiveDate::parse_from_str(cell, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(cell, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(cell, "%Y-%m-%dT%H:%M:%S").is_ok()
        || DateTime::parse_from_rfc3339(cell).is_ok()
}

fn distinct_numbers(values: &[f64]) -> usize {
    let mut bits: Vec<u64> = values
        .iter()
        .map(|v| (if *v == 0.0 { 0.0f64 } else { *v }).to_bits())
        .collect();
    bits.sort_unstable();
    bits.dedup();
    bits.len()
}

/// One-pass statistics over the non-missing values of a column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub sum: f64,
    /// Population mean.
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

pub fn summarize(values: &[f64]) -> Option<Summary> {
    let first = *values.first()?;
    let mut sum = 0.0;
    let mut min = first;
    let mut max = first;
    for &v in values {
        sum += v;
        min = min.min(v);
        max = max.max(v);
    }
    Some(Summary {
        count: values.len(),
        sum,
        mean: sum / values.len() as f64,
        min,
        max,
    })
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Frequency of each distinct value, most frequent first.
///
/// Ties keep the order in which the values were first encountered, so the
/// first entry is always the earliest of the modal values.
pub fn value_counts<'a>(cells: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut order: Vec<(String, usize)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for cell in cells {
        if is_missing(cell) {
            continue;
        }
        let cell = cell.trim();
        match positions.get(cell) {
            Some(&i) => order[i].1 += 1,
            None => {
                positions.insert(cell.to_string(), order.len());
                order.push((cell.to_string(), 1));
            }
        }
    }
    // Stable sort preserves first-seen order among equal counts.
    order.sort_by(|a, b| b.1.cmp(&a.1));
    order
}

/// Numeric values of `value_col` grouped by the key in `key_col`.
///
/// Groups appear in order of first appearance. Rows with a missing key are
/// dropped; rows with a missing value still create their group.
pub fn group_values(table: &Table, key_col: usize, value_col: usize) -> Vec<(String, Vec<f64>)> {
    let mut groups: Vec<(String, Vec<f64>)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for row in &table.rows {
        let key = row[key_col].trim();
        if is_missing(key) {
            continue;
        }
        let i = match positions.get(key) {
            Some(&i) => i,
            None => {
                positions.insert(key.to_string(), groups.len());
                groups.push((key.to_string(), Vec::new()));
                groups.len() - 1
            }
        };
        if let Some(v) = parse_number(&row[value_col]) {
            groups[i].1.push(v);
        }
    }
    groups
}

/// Formats a value the way answers quote it: integers without a decimal
/// point, everything else with at most four decimals and no trailing zeros.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let s = format!("{:.4}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[&[&str]]) -> Table {
        Table::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
        .unwrap()
    }

    fn sales() -> Table {
        table(
            &["region", "revenue", "units", "date"],
            &[
                &["north", "100", "1", "2024-01-01"],
                &["south", "250.5", "2", "2024-01-02"],
                &["north", "", "3", "2024-01-03"],
                &["east", "49.5", "NA", "2024-01-04"],
            ],
        )
    }

    #[test]
    fn every_column_lands_in_exactly_one_partition() {
        let schema = profile(&sales());
        let numeric: Vec<_> = schema.numeric.iter().map(|c| c.name.as_str()).collect();
        let categorical: Vec<_> = schema.categorical.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(numeric, vec!["revenue", "units"]);
        assert_eq!(categorical, vec!["region", "date"]);
        assert_eq!(schema.columns().len(), schema.column_count);
    }

    #[test]
    fn numeric_statistics_skip_missing_cells() {
        let schema = profile(&sales());
        let revenue = schema.numeric_column("revenue").unwrap();
        assert_eq!(revenue.count, 3);
        assert_eq!(revenue.missing, 1);
        assert!((revenue.sum - 400.0).abs() < 1e-9);
        assert!((revenue.mean - 400.0 / 3.0).abs() < 1e-9);
        assert_eq!(revenue.min, 49.5);
        assert_eq!(revenue.max, 250.5);
        assert_eq!(revenue.cardinality, 3);
    }

    #[test]
    fn dates_are_temporal_but_categorical() {
        let schema = profile(&sales());
        let date = schema.categorical_column("date").unwrap();
        assert_eq!(date.inferred_type, InferredType::Temporal);
        assert_eq!(date.cardinality, 4);
    }

    #[test]
    fn top_value_ties_keep_first_encountered() {
        let t = table(&["c"], &[&["b"], &["a"], &["a"], &["b"], &["c"]]);
        let schema = profile(&t);
        let c = &schema.categorical[0];
        assert_eq!(c.top_value.as_deref(), Some("b"));
        assert_eq!(c.top_count, 2);
        assert_eq!(c.distinct_values, vec!["b", "a", "c"]);
    }

    #[test]
    fn all_missing_column_is_categorical() {
        let t = table(&["x", "y"], &[&["", "1"], &["NA", "2"]]);
        let schema = profile(&t);
        assert_eq!(schema.categorical[0].name, "x");
        assert_eq!(schema.categorical[0].cardinality, 0);
        assert_eq!(schema.categorical[0].top_value, None);
    }

    #[test]
    fn chart_candidacy_respects_ceilings() {
        let config = ProfilerConfig::default();
        let many: Vec<Vec<String>> = (0..50).map(|i| vec![format!("v{}", i)]).collect();
        let t = Table::new(vec!["c".into()], many).unwrap();
        let c = &profile(&t).categorical[0];
        assert!(!c.bar_candidate(&config));
        assert!(!c.pie_candidate(&config));
        assert_eq!(c.distinct_values.len(), MAX_REPORTED_DISTINCT);

        let few = table(&["c"], &[&["a"], &["b"]]);
        let c = &profile(&few).categorical[0];
        assert!(c.bar_candidate(&config));
        assert!(c.pie_candidate(&config));
    }

    #[test]
    fn profiling_is_deterministic() {
        assert_eq!(profile(&sales()), profile(&sales()));
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn group_values_in_first_seen_order() {
        let groups = group_values(&sales(), 0, 1);
        assert_eq!(groups[0], ("north".to_string(), vec![100.0]));
        assert_eq!(groups[1].0, "south");
        assert_eq!(groups[2].0, "east");
    }

    #[test]
    fn numbers_format_without_noise() {
        assert_eq!(format_number(1500.0), "1500");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(1.0 / 3.0), "0.3333");
        assert_eq!(format_number(-0.00001), "0");
    }
}
