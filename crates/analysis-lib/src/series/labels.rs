//! Prometheus-style label text parsing
//!
//! Range query results identify each series by label text such as
//! `{container="app",pod="app-5f6d"}`. The text is tokenized into a typed
//! map; it is never evaluated.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::Chars;

use crate::error::{AnalysisError, Result};
use crate::models::MetricSample;

/// Observations of one column keyed by label text
pub type LabelledColumn = BTreeMap<String, Vec<(DateTime<Utc>, Option<f64>)>>;

/// Parse `name{key="value",...}` into a map
///
/// The metric name before the braces is optional and ignored. Values may be
/// quoted (with `\"`, `\\` and `\n` escapes) or bare.
pub fn parse_labels(text: &str) -> Result<BTreeMap<String, String>> {
    let err = |reason: &str| AnalysisError::LabelParse {
        text: text.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = text.trim();
    let body = match trimmed.find('{') {
        Some(open) => {
            let rest = &trimmed[open + 1..];
            rest.strip_suffix('}').ok_or_else(|| err("missing closing brace"))?
        }
        None => trimmed,
    };

    let mut labels = BTreeMap::new();
    let mut chars = body.chars().peekable();
    loop {
        skip_whitespace(&mut chars);
        if chars.peek().is_none() {
            break;
        }

        let key: String = take_while(&mut chars, |c| c != '=' && c != ',');
        let key = key.trim().trim_end_matches('!').to_string();
        if key.is_empty() {
            return Err(err("empty label name"));
        }
        if chars.next() != Some('=') {
            return Err(err(&format!("label '{key}' has no value")));
        }
        // tolerate the matcher forms =~ and !=, only the value matters here
        if chars.peek() == Some(&'~') {
            chars.next();
        }

        skip_whitespace(&mut chars);
        let value = if chars.peek() == Some(&'"') {
            chars.next();
            read_quoted(&mut chars).ok_or_else(|| err("unterminated quoted value"))?
        } else {
            take_while(&mut chars, |c| c != ',').trim().to_string()
        };

        if labels.insert(key.clone(), value).is_some() {
            return Err(err(&format!("duplicate label '{key}'")));
        }

        skip_whitespace(&mut chars);
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(c) => return Err(err(&format!("unexpected '{c}' after value of '{key}'"))),
        }
    }
    Ok(labels)
}

/// Parse label text and keep the `group_by` labels only
///
/// Every group-by key must be present, otherwise the rule table and the
/// query result disagree.
pub fn parse_group_labels(text: &str, group_by: &[String]) -> Result<BTreeMap<String, String>> {
    let mut labels = parse_labels(text)?;
    labels.retain(|k, _| group_by.contains(k));
    if labels.len() != group_by.len() {
        let missing: Vec<&String> = group_by.iter().filter(|k| !labels.contains_key(*k)).collect();
        return Err(AnalysisError::LabelParse {
            text: text.to_string(),
            reason: format!("group by labels {missing:?} not present"),
        });
    }
    Ok(labels)
}

/// Convert column-wise labelled observations into row samples
///
/// Observations of different columns with the same labels and timestamp are
/// merged into one sample.
pub fn matrix_to_samples(
    matrix: &BTreeMap<String, LabelledColumn>,
    group_by: &[String],
) -> Result<Vec<MetricSample>> {
    let mut rows: BTreeMap<(BTreeMap<String, String>, DateTime<Utc>), MetricSample> =
        BTreeMap::new();

    for (column, series) in matrix {
        for (label_text, points) in series {
            let labels = parse_group_labels(label_text, group_by)?;
            for (timestamp, value) in points {
                let sample = rows
                    .entry((labels.clone(), *timestamp))
                    .or_insert_with(|| MetricSample {
                        timestamp: *timestamp,
                        labels: labels.clone(),
                        values: BTreeMap::new(),
                    });
                if sample.values.insert(column.clone(), *value).is_some() {
                    return Err(AnalysisError::DuplicateSample {
                        entity: label_text.clone(),
                        timestamp: *timestamp,
                    });
                }
            }
        }
    }
    Ok(rows.into_values().collect())
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn take_while(chars: &mut Peekable<Chars<'_>>, pred: impl Fn(char) -> bool) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if !pred(c) {
            break;
        }
        out.push(c);
        chars.next();
    }
    out
}

fn read_quoted(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let mut out = String::new();
    loop {
        match chars.next()? {
            '"' => return Some(out),
            '\\' => match chars.next()? {
                'n' => out.push('\n'),
                other => out.push(other),
            },
            c => out.push(c),
        }
    }
}
