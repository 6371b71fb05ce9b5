//! Dashboard synthesis from tabular schemas, without any question.
//!
//! Per source: headline KPIs, a fixed-priority set of charts, and a short
//! statistical insight block. Sources that cannot be analyzed are skipped
//! and never abort the batch.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::charts;
use crate::config::{DashboardConfig, ProfilerConfig};
use crate::models::{ChartSpec, DataSource, Kpi, KpiFormat, SourceKind};
use crate::profile::{self, format_number, TabularSchema};
use crate::render::ChartRenderer;
use crate::table::{self, Table};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub total_files: usize,
    pub total_rows: usize,
    pub charts_count: usize,
    pub insights_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub source: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dashboard {
    pub summary: DashboardSummary,
    pub kpis: Vec<Kpi>,
    pub charts: Vec<ChartSpec>,
    pub insights: Vec<Insight>,
}

pub struct DashboardSynthesizer {
    profiler: ProfilerConfig,
    dashboard: DashboardConfig,
    renderer: Option<Arc<dyn ChartRenderer>>,
}

impl DashboardSynthesizer {
    pub fn new(profiler: &ProfilerConfig, dashboard: &DashboardConfig) -> Self {
        Self {
            profiler: profiler.clone(),
            dashboard: dashboard.clone(),
            renderer: None,
        }
    }

    /// Also render every chart and record its URL in `data_ref`.
    pub fn with_renderer(mut self, renderer: Arc<dyn ChartRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// `total_files` counts every source handed in; the other totals only
    /// cover the sources that could be analyzed.
    pub fn synthesize(&self, sources: &[DataSource]) -> Dashboard {
        let mut out = Dashboard::default();
        out.summary.total_files = sources.len();

        for source in sources {
            if !matches!(
                SourceKind::from_filename(&source.filename),
                Ok(SourceKind::Tabular)
            ) {
                debug!(source = %source.filename, "not tabular, skipped");
                continue;
            }
            let table = match table::load_table(&source.path) {
                Ok(t) => t,
                Err(e) => {
                    warn!(source = %source.filename, error = %e, "source skipped");
                    continue;
                }
            };

            let schema = profile::profile(&table);
            out.kpis.extend(self.kpis(&schema));
            out.charts.extend(self.charts(&table, &schema));
            out.insights.push(Insight {
                source: source.filename.clone(),
                text: insight_text(&source.filename, &schema, &self.dashboard),
            });
            out.summary.total_rows += schema.row_count;
        }

        out.summary.charts_count = out.charts.len();
        out.summary.insights_count = out.insights.len();
        info!(
            files = out.summary.total_files,
            kpis = out.kpis.len(),
            charts = out.summary.charts_count,
            "dashboard synthesized"
        );
        out
    }

    /// Total and average of the leading numeric columns.
    pub fn kpis(&self, schema: &TabularSchema) -> Vec<Kpi> {
        schema
            .numeric
            .iter()
            .take(self.dashboard.max_kpi_columns)
            .flat_map(|c| {
                [
                    Kpi {
                        title: format!("Total {}", c.name),
                        value: c.sum,
                        format: KpiFormat::Number,
                    },
                    Kpi {
                        title: format!("Avg {}", c.name),
                        value: c.mean,
                        format: KpiFormat::Decimal,
                    },
                ]
            })
            .take(self.dashboard.max_kpis_per_source)
            .collect()
    }

    /// Charts in priority order: bar, pie, line.
    ///
    /// The category axis is the first categorical column under the relevant
    /// cardinality ceiling; wider columns are never used as an axis.
    pub fn charts(&self, table: &Table, schema: &TabularSchema) -> Vec<ChartSpec> {
        let mut specs = Vec::new();

        let first_numeric = schema.numeric.first();
        if let Some(num) = first_numeric {
            let candidate = schema
                .categorical
                .iter()
                .find(|c| c.bar_candidate(&self.profiler));
            if let Some(spec) =
                candidate.and_then(|cat| charts::bar_by_category(table, cat.index, num.index))
            {
                specs.push(spec);
            }
        }

        if let Some(cat) = schema
            .categorical
            .iter()
            .find(|c| c.pie_candidate(&self.profiler))
        {
            if let Some(spec) =
                charts::pie_distribution(table, cat.index, self.profiler.pie_top_values)
            {
                specs.push(spec);
            }
        }

        let line_columns: Vec<usize> = schema
            .numeric
            .iter()
            .take(self.profiler.line_max_series)
            .map(|c| c.index)
            .collect();
        if let Some(spec) = charts::line_trend(table, &line_columns, self.profiler.line_max_points)
        {
            specs.push(spec);
        }

        specs.truncate(self.dashboard.max_charts_per_source);

        if let Some(renderer) = &self.renderer {
            for spec in specs.iter_mut() {
                match renderer.render(spec) {
                    Ok(url) => spec.data_ref = Some(url),
                    Err(e) => warn!(chart = %spec.title, error = %e, "chart not rendered"),
                }
            }
        }
        specs
    }
}

/// Statistical summary of one source. No generative model involved.
pub fn insight_text(filename: &str, schema: &TabularSchema, config: &DashboardConfig) -> String {
    let mut lines = vec![
        format!("Data Summary for {}", filename),
        format!("- Total records: {}", schema.row_count),
        format!("- Number of columns: {}", schema.column_count),
    ];
    for c in schema.numeric.iter().take(config.insight_numeric_columns) {
        lines.push(format!(
            "- {}: Min={}, Max={}, Avg={}",
            c.name,
            format_number(c.min),
            format_number(c.max),
            format_number(c.mean)
        ));
    }
    for c in schema
        .categorical
        .iter()
        .take(config.insight_categorical_columns)
    {
        if let Some(top) = &c.top_value {
            lines.push(format!(
                "- Top {}: {} ({} records)",
                c.name, top, c.top_count
            ));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChartKind;

    fn wide_table() -> Table {
        // 3 numeric columns, a 50-value categorical first and a 5-value one second.
        let rows = (0..100)
            .map(|i| {
                vec![
                    format!("customer{}", i % 50),
                    format!("{}", i),
                    format!("{}.5", i),
                    format!("{}", i * 2),
                    format!("region{}", i % 5),
                ]
            })
            .collect();
        Table::new(
            vec![
                "customer".into(),
                "revenue".into(),
                "cost".into(),
                "units".into(),
                "region".into(),
            ],
            rows,
        )
        .unwrap()
    }

    fn synthesizer() -> DashboardSynthesizer {
        DashboardSynthesizer::new(&ProfilerConfig::default(), &DashboardConfig::default())
    }

    #[test]
    fn selects_low_cardinality_axis_and_one_of_each_chart() {
        let table = wide_table();
        let schema = profile::profile(&table);
        let charts = synthesizer().charts(&table, &schema);

        let kinds: Vec<ChartKind> = charts.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ChartKind::Bar, ChartKind::Pie, ChartKind::Line]);
        assert_eq!(charts[0].title, "revenue by region");
        assert_eq!(charts[0].x_label.as_deref(), Some("region"));
        assert!(charts.iter().all(|c| c.x_label.as_deref() != Some("customer")));
        assert_eq!(charts[2].series.len(), 3);
        assert_eq!(charts[2].labels.len(), 50);
    }

    #[test]
    fn kpis_are_capped_per_source() {
        let schema = profile::profile(&wide_table());
        let kpis = synthesizer().kpis(&schema);
        assert_eq!(kpis.len(), 6);
        assert_eq!(kpis[0].title, "Total revenue");
        assert_eq!(kpis[0].format, KpiFormat::Number);
        assert_eq!(kpis[1].title, "Avg revenue");
        assert_eq!(kpis[1].format, KpiFormat::Decimal);
    }

    #[test]
    fn insight_lists_statistics() {
        let schema = profile::profile(&wide_table());
        let text = insight_text("data.csv", &schema, &DashboardConfig::default());
        assert!(text.starts_with("Data Summary for data.csv"));
        assert!(text.contains("- Total records: 100"));
        assert!(text.contains("- revenue: Min=0, Max=99, Avg=49.5"));
        assert!(text.contains("- Top customer: customer0 (2 records)"));
        assert!(text.contains("- Top region: region0 (20 records)"));
    }

    #[test]
    fn unreadable_and_document_sources_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.csv");
        std::fs::write(&good, "k,v\na,1\nb,2\n").unwrap();
        let bad = dir.path().join("bad.csv");
        std::fs::write(&bad, "k,v\na,1,9\n").unwrap();
        let doc = dir.path().join("notes.txt");
        std::fs::write(&doc, "text").unwrap();

        let sources: Vec<DataSource> = [&good, &bad, &doc]
            .iter()
            .map(|p| DataSource::from_path(p, "t").unwrap())
            .collect();
        let dash = synthesizer().synthesize(&sources);
        assert_eq!(dash.summary.total_files, 3);
        assert_eq!(dash.summary.total_rows, 2);
        assert_eq!(dash.summary.insights_count, 1);
        assert_eq!(dash.summary.charts_count, dash.charts.len());
    }
}
