//! Chart descriptions built from table columns.
//!
//! Shared by the dashboard and the agent's `chart` step. Builders return
//! `None` when the columns yield nothing to draw.

use crate::models::{ChartKind, ChartSpec, Series};
use crate::profile::{group_values, value_counts};
use crate::table::{parse_number, Table};

/// Categories shown on a bar chart, largest first.
pub const BAR_TOP_CATEGORIES: usize = 10;

/// Sum of `num` per value of `cat`, largest groups first.
pub fn bar_by_category(table: &Table, cat: usize, num: usize) -> Option<ChartSpec> {
    let mut groups: Vec<(String, f64)> = group_values(table, cat, num)
        .into_iter()
        .map(|(key, values)| (key, values.iter().sum()))
        .collect();
    if groups.is_empty() {
        return None;
    }
    groups.sort_by(|a, b| b.1.total_cmp(&a.1));
    groups.truncate(BAR_TOP_CATEGORIES);

    let cat_name = &table.columns[cat];
    let num_name = &table.columns[num];
    Some(ChartSpec {
        kind: ChartKind::Bar,
        title: format!("{} by {}", num_name, cat_name),
        labels: groups.iter().map(|(k, _)| k.clone()).collect(),
        series: vec![Series {
            name: num_name.clone(),
            values: groups.iter().map(|(_, v)| *v).collect(),
        }],
        x_label: Some(cat_name.clone()),
        y_label: Some(num_name.clone()),
        data_ref: None,
    })
}

/// Row count per value of `cat`, largest first.
pub fn count_bar(table: &Table, cat: usize) -> Option<ChartSpec> {
    let counts = value_counts(table.cells(cat));
    if counts.is_empty() {
        return None;
    }
    let top: Vec<_> = counts.into_iter().take(BAR_TOP_CATEGORIES).collect();
    let cat_name = &table.columns[cat];
    Some(ChartSpec {
        kind: ChartKind::Bar,
        title: format!("Count by {}", cat_name),
        labels: top.iter().map(|(k, _)| k.clone()).collect(),
        series: vec![Series {
            name: "count".into(),
            values: top.iter().map(|(_, n)| *n as f64).collect(),
        }],
        x_label: Some(cat_name.clone()),
        y_label: Some("count".into()),
        data_ref: None,
    })
}

/// Share of the `top` most frequent values of `cat`.
pub fn pie_distribution(table: &Table, cat: usize, top: usize) -> Option<ChartSpec> {
    let counts: Vec<_> = value_counts(table.cells(cat)).into_iter().take(top).collect();
    if counts.is_empty() {
        return None;
    }
    let cat_name = &table.columns[cat];
    Some(ChartSpec {
        kind: ChartKind::Pie,
        title: format!("Distribution of {}", cat_name),
        labels: counts.iter().map(|(k, _)| k.clone()).collect(),
        series: vec![Series {
            name: cat_name.clone(),
            values: counts.iter().map(|(_, n)| *n as f64).collect(),
        }],
        x_label: None,
        y_label: None,
        data_ref: None,
    })
}

/// First `max_points` row values of each column, in row order.
///
/// Missing cells are drawn as zero.
pub fn line_trend(table: &Table, columns: &[usize], max_points: usize) -> Option<ChartSpec> {
    let points = table.row_count().min(max_points);
    if columns.is_empty() || points == 0 {
        return None;
    }
    let series = columns
        .iter()
        .map(|&c| Series {
            name: table.columns[c].clone(),
            values: table
                .cells(c)
                .take(points)
                .map(|cell| parse_number(cell).unwrap_or(0.0))
                .collect(),
        })
        .collect();
    Some(ChartSpec {
        kind: ChartKind::Line,
        title: "Trend Analysis".into(),
        labels: (0..points).map(|i| i.to_string()).collect(),
        series,
        x_label: Some("Index".into()),
        y_label: Some("Value".into()),
        data_ref: None,
    })
}
