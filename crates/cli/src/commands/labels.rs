//! Label text inspection command

use analysis_lib::series::parse_labels;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use tabled::Tabled;

use super::RunContext;
use crate::output::{print_error, print_heading, print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct ParsedLabels {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Tabled)]
struct LabelRow {
    #[tabled(rename = "Label")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Parse each label text; returns the number that failed
pub fn run(ctx: &RunContext, texts: &[String]) -> Result<usize> {
    let parsed: Vec<ParsedLabels> = texts
        .iter()
        .map(|text| match parse_labels(text) {
            Ok(labels) => ParsedLabels {
                text: text.clone(),
                labels: Some(labels),
                error: None,
            },
            Err(err) => ParsedLabels {
                text: text.clone(),
                labels: None,
                error: Some(err.to_string()),
            },
        })
        .collect();
    let failures = parsed.iter().filter(|p| p.error.is_some()).count();

    match ctx.format {
        OutputFormat::Json => print_json(&parsed)?,
        OutputFormat::Table => {
            for entry in &parsed {
                print_heading(&entry.text);
                if let Some(error) = &entry.error {
                    print_error(error);
                }
                if let Some(labels) = &entry.labels {
                    let rows: Vec<LabelRow> = labels
                        .iter()
                        .map(|(key, value)| LabelRow {
                            key: key.clone(),
                            value: value.clone(),
                        })
                        .collect();
                    print_table(&rows, "No labels");
                }
            }
        }
    }
    Ok(failures)
}
