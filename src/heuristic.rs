//! Deterministic answers computed without a language model.
//!
//! Matches the intent words of a question against a fixed vocabulary and the
//! column names of the dataset, then computes the statistic directly. Used when
//! the generation provider is unavailable and to close out an agent run that
//! ran out of budget.

use crate::embedding::tokenize;
use crate::profile::{self, format_number, TabularSchema};
use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Mean,
    Median,
    Sum,
    Min,
    Max,
    Count,
    Mode,
}

const INTENTS: &[(Intent, &[&str])] = &[
    (Intent::Mode, &["most common", "most frequent", "mode", "top"]),
    (Intent::Mean, &["average", "avg", "mean"]),
    (Intent::Median, &["median"]),
    (Intent::Sum, &["total", "sum"]),
    (Intent::Min, &["minimum", "lowest", "smallest", "min"]),
    (Intent::Max, &["maximum", "highest", "largest", "biggest", "max"]),
    (Intent::Count, &["how many", "count", "number of"]),
];

/// Keywords match whole words; a multi-word keyword matches consecutive words.
pub fn detect_intent(question: &str) -> Option<Intent> {
    let words: Vec<String> = tokenize(question).collect();
    let has = |keyword: &str| {
        let phrase: Vec<&str> = keyword.split_whitespace().collect();
        words
            .windows(phrase.len())
            .any(|w| w.iter().zip(&phrase).all(|(a, b)| a == b))
    };
    INTENTS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| has(k)))
        .map(|(intent, _)| *intent)
}

/// The column named in the question, preferring the longest match.
fn mentioned<'a>(names: impl Iterator<Item = &'a str>, question: &str) -> Option<&'a str> {
    let q = question.to_lowercase();
    names
        .filter(|name| {
            let lower = name.to_lowercase();
            q.contains(&lower) || q.contains(&lower.replace('_', " "))
        })
        .max_by_key(|name| name.len())
}

pub fn answer(table: &Table, schema: &TabularSchema, question: &str) -> String {
    match try_answer(table, schema, question) {
        Some(text) => text,
        None => canned(schema),
    }
}

/// A computed answer, or `None` when the question cannot be matched.
pub fn try_answer(table: &Table, schema: &TabularSchema, question: &str) -> Option<String> {
    let intent = detect_intent(question)?;
    let numeric_names = || schema.numeric.iter().map(|c| c.name.as_str());
    let categorical_names = || schema.categorical.iter().map(|c| c.name.as_str());

    let numeric = mentioned(numeric_names(), question).or_else(|| {
        // A lone numeric column is unambiguous.
        if schema.numeric.len() == 1 && intent != Intent::Mode && intent != Intent::Count {
            numeric_names().next()
        } else {
            None
        }
    });

    match intent {
        Intent::Mode => {
            let name = mentioned(categorical_names(), question)
                .or_else(|| categorical_names().next())?;
            let col = schema.categorical_column(name)?;
            let top = col.top_value.as_ref()?;
            Some(format!(
                "The most common {} is {} ({} records).",
                name, top, col.top_count
            ))
        }
        Intent::Count => match mentioned(categorical_names(), question).or(numeric) {
            Some(name) => {
                let idx = table.column_index(name)?;
                let n = table.cells(idx).filter(|c| !crate::table::is_missing(c)).count();
                Some(format!("There are {} records with a value for {}.", n, name))
            }
            None => Some(format!("The dataset has {} records.", schema.row_count)),
        },
        Intent::Median => {
            let name = numeric?;
            let values = table.numeric_values(table.column_index(name)?);
            let m = profile::median(&values)?;
            Some(format!("The median of {} is {}.", name, format_number(m)))
        }
        Intent::Sum | Intent::Mean | Intent::Min | Intent::Max => {
            let name = numeric?;
            let col = schema.numeric_column(name)?;
            let (label, value) = match intent {
                Intent::Sum => ("total", col.sum),
                Intent::Mean => ("average", col.mean),
                Intent::Min => ("minimum", col.min),
                _ => ("maximum", col.max),
            };
            Some(format!(
                "The {} of {} is {}.",
                label,
                name,
                format_number(value)
            ))
        }
    }
}

/// Fixed reply for questions the heuristics cannot answer.
pub fn canned(schema: &TabularSchema) -> String {
    format!(
        "I could not compute an answer to that question automatically. \
         Here is an overview of the dataset:\n{}",
        schema.describe().trim_end()
    )
}
