//! Tabular reasoning agent.
//!
//! An explicit plan-execute-observe loop. Each iteration asks the generation
//! provider for one JSON step, executes it against the in-memory table and
//! records the observation; the loop ends on a `final` step or when a budget
//! runs out.
//!
//! Bounds: at most `agent.max_iterations` steps (never more than 50) and
//! `agent.max_execution_secs` of wall-clock time (never more than 300). The
//! in-flight generation call is abandoned when the deadline passes.
//!
//! The agent always produces an answer:
//! - a step that fails to parse or execute is fed back as an observation
//! - an unavailable provider switches to the deterministic heuristics
//! - an exhausted budget yields a partial answer

use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::charts;
use crate::config::{AgentConfig, ProfilerConfig, MAX_AGENT_ITERATIONS, MAX_AGENT_SECS};
use crate::generation::GenerationProvider;
use crate::heuristic;
use crate::models::{AnalysisResult, ChartKind};
use crate::profile::{self, format_number, value_counts, TabularSchema};
use crate::render::ChartRenderer;
use crate::table::{is_missing, parse_number, Table};

/// Rows an observation lists at most.
const MAX_OBSERVATION_ROWS: usize = 20;

// ============ Step language ============

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Describe,
    Head {
        #[serde(default = "default_head_rows")]
        n: usize,
    },
    Aggregate {
        column: String,
        op: AggregateOp,
        #[serde(default)]
        group_by: Option<String>,
        #[serde(default)]
        filter: Option<Filter>,
    },
    ValueCounts {
        column: String,
        #[serde(default)]
        n: Option<usize>,
    },
    FilterCount {
        filter: Filter,
    },
    Chart {
        kind: ChartKind,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        x: Option<String>,
        #[serde(default)]
        y: Option<String>,
        #[serde(default)]
        columns: Vec<String>,
    },
    Final {
        answer: String,
    },
}

fn default_head_rows() -> usize {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    Median,
    Nunique,
}

impl AggregateOp {
    fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::Sum => "sum",
            AggregateOp::Mean => "mean",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Count => "count",
            AggregateOp::Median => "median",
            AggregateOp::Nunique => "nunique",
        }
    }

    fn needs_numbers(&self) -> bool {
        !matches!(self, AggregateOp::Count | AggregateOp::Nunique)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

// ============ Outcomes ============

/// Why a step could not be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    Parse(String),
    UnknownColumn(String),
    TypeMismatch(String),
    Render(String),
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFailure::Parse(m) => write!(f, "could not parse step: {}", m),
            StepFailure::UnknownColumn(c) => write!(f, "unknown column '{}'", c),
            StepFailure::TypeMismatch(m) => write!(f, "type mismatch: {}", m),
            StepFailure::Render(m) => write!(f, "chart rendering failed: {}", m),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Final answer for the user.
    Success(String),
    /// The step failed; the message becomes the next observation.
    Failure(StepFailure),
    /// The step ran; the observation feeds the next iteration.
    Continue(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Answered,
    ProviderUnavailable,
    IterationBudget,
    TimeBudget,
}

#[derive(Debug, Clone)]
pub struct AgentRun {
    pub result: AnalysisResult,
    pub iterations: usize,
    pub stop: StopReason,
}

// ============ Agent ============

pub struct TabularAgent {
    generator: Arc<dyn GenerationProvider>,
    renderer: Arc<dyn ChartRenderer>,
    config: AgentConfig,
    profiler: ProfilerConfig,
}

impl TabularAgent {
    pub fn new(
        generator: Arc<dyn GenerationProvider>,
        renderer: Arc<dyn ChartRenderer>,
        config: &AgentConfig,
        profiler: &ProfilerConfig,
    ) -> Self {
        Self {
            generator,
            renderer,
            config: config.clone(),
            profiler: profiler.clone(),
        }
    }

    pub async fn run(&self, table: &Table, question: &str) -> AgentRun {
        let schema = profile::profile(table);
        let max_iterations = self.config.max_iterations.clamp(1, MAX_AGENT_ITERATIONS);
        let budget = Duration::from_secs(self.config.max_execution_secs.clamp(1, MAX_AGENT_SECS));
        let deadline = Instant::now() + budget;
        let preview = preview_rows(table, self.config.preview_rows);

        let mut transcript: Vec<(String, String)> = Vec::new();
        let mut chart_refs = Vec::new();
        let mut iterations = 0;
        let mut stop = StopReason::IterationBudget;

        while iterations < max_iterations {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                stop = StopReason::TimeBudget;
                break;
            }
            iterations += 1;

            let prompt = build_prompt(&schema, &preview, question, &transcript);
            let reply = match tokio::time::timeout(
                remaining,
                self.generator.generate(&prompt, self.config.max_tokens),
            )
            .await
            {
                Err(_) => {
                    stop = StopReason::TimeBudget;
                    break;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, iteration = iterations, "generation unavailable, using heuristics");
                    stop = StopReason::ProviderUnavailable;
                    break;
                }
                Ok(Ok(text)) => text,
            };

            let outcome = match parse_step(&reply) {
                Ok(step) => {
                    debug!(iteration = iterations, ?step, "executing step");
                    self.execute(&step, table, &schema, &mut chart_refs)
                }
                Err(failure) => StepOutcome::Failure(failure),
            };

            match outcome {
                StepOutcome::Success(answer) => {
                    info!(iterations, charts = chart_refs.len(), "agent answered");
                    return AgentRun {
                        result: AnalysisResult {
                            answer_text: answer,
                            citations: Vec::new(),
                            chart_refs,
                        },
                        iterations,
                        stop: StopReason::Answered,
                    };
                }
                StepOutcome::Failure(failure) => {
                    debug!(iteration = iterations, %failure, "step failed");
                    transcript.push((reply, format!("Error: {}", failure)));
                }
                StepOutcome::Continue(observation) => {
                    transcript.push((reply, observation));
                }
            }
        }

        let fallback = heuristic::answer(table, &schema, question);
        let answer_text = match stop {
            StopReason::ProviderUnavailable if transcript.is_empty() => fallback,
            _ => {
                let last = transcript
                    .last()
                    .map(|(_, obs)| obs.as_str())
                    .unwrap_or("none");
                warn!(iterations, ?stop, "agent stopped without a final answer");
                format!(
                    "Partial answer: stopped after {} step(s) ({}). Last observation: {}\n\n{}",
                    iterations,
                    describe_stop(stop),
                    last,
                    fallback
                )
            }
        };

        AgentRun {
            result: AnalysisResult {
                answer_text,
                citations: Vec::new(),
                chart_refs,
            },
            iterations,
            stop,
        }
    }

    /// Executes one step against the table.
    pub fn execute(
        &self,
        step: &Step,
        table: &Table,
        schema: &TabularSchema,
        chart_refs: &mut Vec<String>,
    ) -> StepOutcome {
        match step {
            Step::Describe => StepOutcome::Continue(schema.describe()),
            Step::Head { n } => {
                StepOutcome::Continue(preview_rows(table, (*n).clamp(1, MAX_OBSERVATION_ROWS)))
            }
            Step::Aggregate {
                column,
                op,
                group_by,
                filter,
            } => outcome(aggregate(table, column, *op, group_by.as_deref(), filter.as_ref())),
            Step::ValueCounts { column, n } => outcome(column_index(table, column).map(|idx| {
                let counts = value_counts(table.cells(idx));
                let shown = n.unwrap_or(10).clamp(1, MAX_OBSERVATION_ROWS);
                counts
                    .iter()
                    .take(shown)
                    .map(|(v, c)| format!("{}: {}", v, c))
                    .collect::<Vec<_>>()
                    .join("\n")
            })),
            Step::FilterCount { filter } => outcome(matching_rows(table, Some(filter)).map(|rows| {
                format!("{} rows match", rows.len())
            })),
            Step::Chart {
                kind,
                title,
                x,
                y,
                columns,
            } => match self.chart(table, schema, *kind, x.as_deref(), y.as_deref(), columns) {
                Ok(mut spec) => {
                    if let Some(title) = title {
                        spec.title = title.clone();
                    }
                    match self.renderer.render(&spec) {
                        Ok(url) => {
                            chart_refs.push(url.clone());
                            StepOutcome::Continue(format!("Chart saved to {}", url))
                        }
                        Err(e) => StepOutcome::Failure(StepFailure::Render(e.to_string())),
                    }
                }
                Err(failure) => StepOutcome::Failure(failure),
            },
            Step::Final { answer } => StepOutcome::Success(answer.trim().to_string()),
        }
    }

    fn chart(
        &self,
        table: &Table,
        schema: &TabularSchema,
        kind: ChartKind,
        x: Option<&str>,
        y: Option<&str>,
        columns: &[String],
    ) -> Result<crate::models::ChartSpec, StepFailure> {
        let no_data = || StepFailure::Render("nothing to draw".to_string());
        match kind {
            ChartKind::Bar => {
                let cat = match x {
                    Some(name) => column_index(table, name)?,
                    None => schema
                        .categorical
                        .first()
                        .map(|c| c.index)
                        .ok_or_else(|| StepFailure::TypeMismatch("no categorical column".into()))?,
                };
                match y {
                    Some(name) => {
                        let num = numeric_column(table, schema, name)?;
                        charts::bar_by_category(table, cat, num).ok_or_else(no_data)
                    }
                    None => charts::count_bar(table, cat).ok_or_else(no_data),
                }
            }
            ChartKind::Pie => {
                let cat = match x.or(y) {
                    Some(name) => column_index(table, name)?,
                    None => schema
                        .categorical
                        .first()
                        .map(|c| c.index)
                        .ok_or_else(|| StepFailure::TypeMismatch("no categorical column".into()))?,
                };
                charts::pie_distribution(table, cat, self.profiler.pie_top_values)
                    .ok_or_else(no_data)
            }
            ChartKind::Line => {
                let names: Vec<&str> = if columns.is_empty() {
                    y.into_iter().collect()
                } else {
                    columns.iter().map(String::as_str).collect()
                };
                let indices: Vec<usize> = if names.is_empty() {
                    schema
                        .numeric
                        .iter()
                        .take(self.profiler.line_max_series)
                        .map(|c| c.index)
                        .collect()
                } else {
                    names
                        .iter()
                        .map(|n| numeric_column(table, schema, n))
                        .collect::<Result<_, _>>()?
                };
                charts::line_trend(table, &indices, self.profiler.line_max_points)
                    .ok_or_else(no_data)
            }
        }
    }
}

fn outcome(result: Result<String, StepFailure>) -> StepOutcome {
    match result {
        Ok(observation) => StepOutcome::Continue(observation),
        Err(failure) => StepOutcome::Failure(failure),
    }
}

fn describe_stop(stop: StopReason) -> &'static str {
    match stop {
        StopReason::Answered => "answered",
        StopReason::ProviderUnavailable => "language model unavailable",
        StopReason::IterationBudget => "iteration limit reached",
        StopReason::TimeBudget => "time limit reached",
    }
}

fn column_index(table: &Table, name: &str) -> Result<usize, StepFailure> {
    table
        .column_index(name)
        .ok_or_else(|| StepFailure::UnknownColumn(name.to_string()))
}

fn numeric_column(table: &Table, schema: &TabularSchema, name: &str) -> Result<usize, StepFailure> {
    let idx = column_index(table, name)?;
    if schema.numeric.iter().any(|c| c.index == idx) {
        Ok(idx)
    } else {
        Err(StepFailure::TypeMismatch(format!(
            "column '{}' is not numeric",
            table.columns[idx]
        )))
    }
}

/// Indices of rows passing the filter (all rows without one).
fn matching_rows(table: &Table, filter: Option<&Filter>) -> Result<Vec<usize>, StepFailure> {
    let Some(filter) = filter else {
        return Ok((0..table.row_count()).collect());
    };
    let col = column_index(table, &filter.column)?;
    let target_text = match &filter.value {
        serde_json::Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    let target_num = match &filter.value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_number(s),
        _ => None,
    };
    let ordered = matches!(
        filter.op,
        FilterOp::Gt | FilterOp::Ge | FilterOp::Lt | FilterOp::Le
    );
    if ordered && target_num.is_none() {
        return Err(StepFailure::TypeMismatch(format!(
            "'{}' needs a numeric value",
            filter.column
        )));
    }

    Ok(table
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            let cell = row[col].trim();
            let num = parse_number(cell);
            match filter.op {
                FilterOp::Contains => cell
                    .to_lowercase()
                    .contains(&target_text.to_lowercase()),
                FilterOp::Eq | FilterOp::Ne => {
                    let equal = match (num, target_num) {
                        (Some(a), Some(b)) => a == b,
                        _ => cell == target_text,
                    };
                    equal == (filter.op == FilterOp::Eq)
                }
                _ => match (num, target_num) {
                    (Some(a), Some(b)) => match filter.op {
                        FilterOp::Gt => a > b,
                        FilterOp::Ge => a >= b,
                        FilterOp::Lt => a < b,
                        _ => a <= b,
                    },
                    _ => false,
                },
            }
        })
        .map(|(i, _)| i)
        .collect())
}

fn aggregate(
    table: &Table,
    column: &str,
    op: AggregateOp,
    group_by: Option<&str>,
    filter: Option<&Filter>,
) -> Result<String, StepFailure> {
    let col = column_index(table, column)?;
    let rows = matching_rows(table, filter)?;
    let name = &table.columns[col];

    match group_by {
        None => {
            let cells: Vec<&str> = rows.iter().map(|&r| table.rows[r][col].as_str()).collect();
            let value = apply(op, &cells, name)?;
            Ok(format!("{}({}) = {}", op.as_str(), name, value))
        }
        Some(key) => {
            let key_col = column_index(table, key)?;
            let mut groups: Vec<(String, Vec<&str>)> = Vec::new();
            for &r in &rows {
                let k = table.rows[r][key_col].trim();
                if is_missing(k) {
                    continue;
                }
                match groups.iter_mut().find(|(g, _)| g == k) {
                    Some((_, cells)) => cells.push(table.rows[r][col].as_str()),
                    None => groups.push((k.to_string(), vec![table.rows[r][col].as_str()])),
                }
            }
            let mut lines = Vec::new();
            for (key_value, cells) in groups.iter().take(MAX_OBSERVATION_ROWS) {
                lines.push(format!("{}: {}", key_value, apply(op, cells, name)?));
            }
            if groups.len() > MAX_OBSERVATION_ROWS {
                lines.push(format!("... {} groups in total", groups.len()));
            }
            Ok(format!(
                "{}({}) by {}:\n{}",
                op.as_str(),
                name,
                table.columns[key_col],
                lines.join("\n")
            ))
        }
    }
}

/// Applies an aggregate to raw cells, skipping missing values.
fn apply(op: AggregateOp, cells: &[&str], column: &str) -> Result<String, StepFailure> {
    let present: Vec<&str> = cells.iter().copied().filter(|c| !is_missing(c)).collect();
    if !op.needs_numbers() {
        let n = match op {
            AggregateOp::Count => present.len(),
            _ => value_counts(present.iter().copied()).len(),
        };
        return Ok(n.to_string());
    }

    let values: Vec<f64> = present
        .iter()
        .map(|c| parse_number(c))
        .collect::<Option<_>>()
        .ok_or_else(|| {
            StepFailure::TypeMismatch(format!(
                "{} needs numbers but '{}' has text values",
                op.as_str(),
                column
            ))
        })?;
    if values.is_empty() {
        return Ok(if op == AggregateOp::Sum {
            "0".to_string()
        } else {
            "no values".to_string()
        });
    }
    let value = match op {
        AggregateOp::Median => profile::median(&values),
        _ => profile::summarize(&values).map(|s| match op {
            AggregateOp::Sum => s.sum,
            AggregateOp::Mean => s.mean,
            AggregateOp::Min => s.min,
            _ => s.max,
        }),
    };
    Ok(value.map(format_number).unwrap_or_else(|| "no values".into()))
}

/// Extracts and parses the JSON step in a model reply.
///
/// Accepts a bare object, an object inside a fenced block, or an object
/// surrounded by prose.
pub fn parse_step(reply: &str) -> Result<Step, StepFailure> {
    let start = reply
        .find('{')
        .ok_or_else(|| StepFailure::Parse("no JSON object in reply".into()))?;
    let end = reply
        .rfind('}')
        .filter(|&e| e > start)
        .ok_or_else(|| StepFailure::Parse("unterminated JSON object".into()))?;
    serde_json::from_str(&reply[start..=end]).map_err(|e| StepFailure::Parse(e.to_string()))
}

fn preview_rows(table: &Table, n: usize) -> String {
    let mut out = table.columns.join(",");
    for row in table.rows.iter().take(n) {
        out.push('\n');
        out.push_str(&row.join(","));
    }
    out
}

fn build_prompt(
    schema: &TabularSchema,
    preview: &str,
    question: &str,
    transcript: &[(String, String)],
) -> String {
    let mut prompt = String::from(
        "You are working with a table of data to answer a question. \
         Reply with exactly one JSON object describing the next step.\n\n\
         Actions:\n\
         {\"action\": \"describe\"}\n\
         {\"action\": \"head\", \"n\": 5}\n\
         {\"action\": \"aggregate\", \"column\": \"<col>\", \"op\": \"sum|mean|min|max|count|median|nunique\", \
         \"group_by\": \"<col, optional>\", \"filter\": {\"column\": \"<col>\", \"op\": \"eq|ne|gt|ge|lt|le|contains\", \"value\": \"<value>\"}}\n\
         {\"action\": \"value_counts\", \"column\": \"<col>\", \"n\": 10}\n\
         {\"action\": \"filter_count\", \"filter\": {\"column\": \"<col>\", \"op\": \"eq\", \"value\": \"<value>\"}}\n\
         {\"action\": \"chart\", \"kind\": \"bar|pie|line\", \"title\": \"<title>\", \"x\": \"<category col>\", \"y\": \"<numeric col>\", \"columns\": [\"<numeric col>\"]}\n\
         {\"action\": \"final\", \"answer\": \"<answer for the user>\"}\n\n",
    );
    prompt.push_str("Schema:\n");
    prompt.push_str(&schema.describe());
    prompt.push_str("\nFirst rows:\n");
    prompt.push_str(preview);
    prompt.push_str(&format!("\n\nQuestion: {}\n", question));
    for (i, (step, observation)) in transcript.iter().enumerate() {
        prompt.push_str(&format!(
            "\nStep {}: {}\nObservation: {}\n",
            i + 1,
            step.trim(),
            observation
        ));
    }
    prompt.push_str("\nNext step:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AnalysisError, ProviderError};
    use crate::models::ChartSpec;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Script(Mutex<Vec<String>>);

    impl Script {
        fn new(steps: &[&str]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                steps.iter().rev().map(|s| s.to_string()).collect(),
            )))
        }
    }

    #[async_trait]
    impl GenerationProvider for Script {
        fn model_name(&self) -> &str {
            "script"
        }
        async fn generate(&self, _p: &str, _m: usize) -> Result<String, ProviderError> {
            let next = self.0.lock().unwrap().pop();
            next.ok_or_else(|| ProviderError::unreachable("script", "exhausted"))
        }
    }

    struct Repeat(&'static str);

    #[async_trait]
    impl GenerationProvider for Repeat {
        fn model_name(&self) -> &str {
            "repeat"
        }
        async fn generate(&self, _p: &str, _m: usize) -> Result<String, ProviderError> {
            Ok(self.0.to_string())
        }
    }

    struct Slow;

    #[async_trait]
    impl GenerationProvider for Slow {
        fn model_name(&self) -> &str {
            "slow"
        }
        async fn generate(&self, _p: &str, _m: usize) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("{\"action\": \"describe\"}".into())
        }
    }

    struct FakeRenderer(Mutex<usize>);

    impl ChartRenderer for FakeRenderer {
        fn render(&self, spec: &ChartSpec) -> crate::error::Result<String> {
            if spec.series.is_empty() {
                return Err(AnalysisError::format("empty"));
            }
            let mut n = self.0.lock().unwrap();
            *n += 1;
            Ok(format!("/static/plots/chart-{}.svg", n))
        }
    }

    fn table() -> Table {
        Table::new(
            vec!["region".into(), "revenue".into()],
            vec![
                vec!["north".into(), "100".into()],
                vec!["south".into(), "250.5".into()],
                vec!["north".into(), "49.5".into()],
            ],
        )
        .unwrap()
    }

    fn agent(generator: Arc<dyn GenerationProvider>, config: AgentConfig) -> TabularAgent {
        TabularAgent::new(
            generator,
            Arc::new(FakeRenderer(Mutex::new(0))),
            &config,
            &ProfilerConfig::default(),
        )
    }

    fn exec(step: &str) -> StepOutcome {
        let t = table();
        let a = agent(Arc::new(Repeat("")), AgentConfig::default());
        let mut charts = Vec::new();
        a.execute(&parse_step(step).unwrap(), &t, &profile::profile(&t), &mut charts)
    }

    #[test]
    fn parses_fenced_and_wrapped_steps() {
        let step = parse_step("Sure!\n```json\n{\"action\": \"head\"}\n```").unwrap();
        assert_eq!(step, Step::Head { n: 5 });
        assert!(matches!(
            parse_step("no json here"),
            Err(StepFailure::Parse(_))
        ));
        assert!(matches!(
            parse_step("{\"action\": \"explode\"}"),
            Err(StepFailure::Parse(_))
        ));
    }

    #[test]
    fn aggregate_sum_matches_column_total() {
        assert_eq!(
            exec(r#"{"action": "aggregate", "column": "revenue", "op": "sum"}"#),
            StepOutcome::Continue("sum(revenue) = 400".into())
        );
    }

    #[test]
    fn aggregate_with_group_and_filter() {
        assert_eq!(
            exec(r#"{"action": "aggregate", "column": "revenue", "op": "mean", "group_by": "region"}"#),
            StepOutcome::Continue("mean(revenue) by region:\nnorth: 74.75\nsouth: 250.5".into())
        );
        assert_eq!(
            exec(r#"{"action": "aggregate", "column": "revenue", "op": "count", "filter": {"column": "revenue", "op": "gt", "value": 60}}"#),
            StepOutcome::Continue("count(revenue) = 2".into())
        );
    }

    #[test]
    fn unknown_column_and_type_mismatch_are_failures() {
        assert_eq!(
            exec(r#"{"action": "aggregate", "column": "profit", "op": "sum"}"#),
            StepOutcome::Failure(StepFailure::UnknownColumn("profit".into()))
        );
        assert!(matches!(
            exec(r#"{"action": "aggregate", "column": "region", "op": "sum"}"#),
            StepOutcome::Failure(StepFailure::TypeMismatch(_))
        ));
    }

    #[test]
    fn filter_count_and_value_counts() {
        assert_eq!(
            exec(r#"{"action": "filter_count", "filter": {"column": "region", "op": "eq", "value": "north"}}"#),
            StepOutcome::Continue("2 rows match".into())
        );
        assert_eq!(
            exec(r#"{"action": "value_counts", "column": "region"}"#),
            StepOutcome::Continue("north: 2\nsouth: 1".into())
        );
    }

    #[tokio::test]
    async fn scripted_run_recovers_from_bad_step_and_answers_with_chart() {
        let script = Script::new(&[
            "I think we should look at profit",
            r#"{"action": "aggregate", "column": "profit", "op": "sum"}"#,
            r#"{"action": "chart", "kind": "bar", "x": "region", "y": "revenue"}"#,
            r#"{"action": "final", "answer": "Revenue totals 400."}"#,
        ]);
        let run = agent(script, AgentConfig::default())
            .run(&table(), "chart revenue by region")
            .await;
        assert_eq!(run.stop, StopReason::Answered);
        assert_eq!(run.iterations, 4);
        assert_eq!(run.result.answer_text, "Revenue totals 400.");
        assert_eq!(run.result.chart_refs, vec!["/static/plots/chart-1.svg"]);
    }

    #[tokio::test]
    async fn unavailable_provider_falls_back_to_heuristics() {
        let run = agent(Script::new(&[]), AgentConfig::default())
            .run(&table(), "what is the total revenue?")
            .await;
        assert_eq!(run.stop, StopReason::ProviderUnavailable);
        assert_eq!(run.result.answer_text, "The total of revenue is 400.");
    }

    #[tokio::test]
    async fn iteration_budget_yields_partial_answer() {
        let config = AgentConfig {
            max_iterations: 3,
            ..Default::default()
        };
        let run = agent(Arc::new(Repeat(r#"{"action": "describe"}"#)), config)
            .run(&table(), "total revenue")
            .await;
        assert_eq!(run.stop, StopReason::IterationBudget);
        assert_eq!(run.iterations, 3);
        assert!(run.result.answer_text.starts_with("Partial answer"));
        assert!(run.result.answer_text.contains("400"));
    }

    #[tokio::test]
    async fn iteration_budget_is_capped_at_ceiling() {
        let config = AgentConfig {
            max_iterations: 500,
            ..Default::default()
        };
        let run = agent(Arc::new(Repeat("not json")), config)
            .run(&table(), "anything")
            .await;
        assert_eq!(run.iterations, MAX_AGENT_ITERATIONS);
    }

    #[tokio::test]
    async fn time_budget_abandons_slow_step() {
        let config = AgentConfig {
            max_execution_secs: 1,
            ..Default::default()
        };
        let started = Instant::now();
        let run = agent(Arc::new(Slow), config).run(&table(), "total revenue").await;
        assert_eq!(run.stop, StopReason::TimeBudget);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(run.result.answer_text.contains("time limit"));
    }
}
