//! Right-sizing command

use analysis_lib::sizing::{
    merge_sizings, percentile_label, to_ini, PercentileRow, CPU_RESOURCE, MEMORY_RESOURCE,
};
use analysis_lib::source::SampleSource;
use analysis_lib::{EntityKeyedSeries, PercentileSizingCalculator, SizingResult};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tabled::Tabled;

use super::{select_namespaces, RunContext};
use crate::input::{label_dimensions, JsonFileSource};
use crate::output::{
    format_configured, format_cpu, format_mib, print_heading, print_json, print_records,
    print_success, print_table, OutputFormat,
};

/// Arguments of `rightsize size`
pub struct SizeArgs {
    pub data: Vec<PathBuf>,
    pub namespace: Option<String>,
    pub percentiles: bool,
    pub ini: Option<PathBuf>,
}

/// Per-namespace report in JSON output
#[derive(Serialize)]
struct NamespaceSizing {
    namespace: String,
    sizing: Vec<SizingResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cpu_percentiles: Vec<PercentileRow>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    memory_percentiles: Vec<PercentileRow>,
}

/// Row for the sizing table
#[derive(Tabled)]
struct SizingRow {
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "CPU Request")]
    cpu_request: String,
    #[tabled(rename = "CPU Limit")]
    cpu_limit: String,
    #[tabled(rename = "Memory Request")]
    memory_request: String,
    #[tabled(rename = "Memory Limit")]
    memory_limit: String,
    #[tabled(rename = "Current CPU")]
    current_cpu: String,
    #[tabled(rename = "Current Memory")]
    current_memory: String,
}

impl From<&SizingResult> for SizingRow {
    fn from(s: &SizingResult) -> Self {
        Self {
            container: s.container.clone(),
            cpu_request: format_cpu(s.cpu_millis.request as f64),
            cpu_limit: format_cpu(s.cpu_millis.limit as f64),
            memory_request: format_mib(s.memory_mib.request as f64),
            memory_limit: format_mib(s.memory_mib.limit as f64),
            current_cpu: format!(
                "{} / {}",
                format_configured(s.current_cpu_millis.request, format_cpu),
                format_configured(s.current_cpu_millis.limit, format_cpu)
            ),
            current_memory: format!(
                "{} / {}",
                format_configured(s.current_memory_mib.request, format_mib),
                format_configured(s.current_memory_mib.limit, format_mib)
            ),
        }
    }
}

/// Size every selected namespace across all data windows
pub async fn run(ctx: &RunContext, args: SizeArgs) -> Result<usize> {
    if args.data.is_empty() {
        bail!("at least one --data file is required");
    }
    ctx.logger.log_run_started("size", &format!("{} window(s)", args.data.len()));

    let calculator = PercentileSizingCalculator::new(ctx.settings.sizing.clone())?;
    let namespace = args
        .namespace
        .as_deref()
        .or(ctx.settings.default_namespace.as_deref());

    let mut windows: BTreeMap<String, Vec<Vec<SizingResult>>> = BTreeMap::new();
    let mut tables: BTreeMap<String, (Vec<PercentileRow>, Vec<PercentileRow>)> = BTreeMap::new();
    for path in &args.data {
        let source = JsonFileSource::new(path);
        let samples = source.load(None).await?;
        let dimensions = label_dimensions(&samples);
        let series = EntityKeyedSeries::from_samples(&dimensions, samples)
            .with_context(|| format!("Invalid data in {}", source.name()))?;

        for (namespace, series) in select_namespaces(&series, namespace)? {
            let started = Instant::now();
            let sizing = calculator
                .size(&series, &series)
                .with_context(|| format!("Sizing failed for {} in {}", namespace, source.name()))?;
            ctx.metrics
                .observe_sizing_latency(started.elapsed().as_secs_f64());
            ctx.logger.log_sizing_computed(
                &format!("{}:{}", source.name(), namespace),
                sizing.len(),
            );

            if args.percentiles {
                let entry = tables.entry(namespace.clone()).or_default();
                entry
                    .0
                    .extend(calculator.percentile_table(&series, CPU_RESOURCE)?);
                entry
                    .1
                    .extend(calculator.percentile_table(&series, MEMORY_RESOURCE)?);
            }
            windows.entry(namespace).or_default().push(sizing);
        }
    }

    let reports: Vec<NamespaceSizing> = windows
        .into_iter()
        .map(|(namespace, sizings)| {
            let (cpu_percentiles, memory_percentiles) =
                tables.remove(&namespace).unwrap_or_default();
            NamespaceSizing {
                sizing: merge_sizings(sizings),
                namespace,
                cpu_percentiles,
                memory_percentiles,
            }
        })
        .collect();
    ctx.metrics
        .set_containers_sized(reports.iter().map(|r| r.sizing.len()).sum::<usize>() as i64);

    if let Some(path) = &args.ini {
        let [report] = reports.as_slice() else {
            bail!(
                "--ini needs exactly one namespace, found {}; select one with --namespace",
                reports.len()
            );
        };
        let ini = to_ini(&report.sizing, ctx.settings.sizing.ini_min_cpu_request_millis);
        std::fs::write(path, ini)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if ctx.format == OutputFormat::Table {
            print_success(&format!("Sizing written to {}", path.display()));
        }
    }

    match ctx.format {
        OutputFormat::Json => print_json(&reports)?,
        OutputFormat::Table => {
            for report in &reports {
                print_report(report, &ctx.settings.sizing.percentiles);
            }
        }
    }
    Ok(0)
}

fn print_report(report: &NamespaceSizing, percentiles: &[f64]) {
    print_heading(&format!("Sizing | {}", report.namespace));
    let rows: Vec<SizingRow> = report.sizing.iter().map(SizingRow::from).collect();
    print_table(&rows, "No container could be sized");

    for (title, rows, format) in [
        ("CPU percentiles", &report.cpu_percentiles, format_cpu as fn(f64) -> String),
        ("Memory percentiles", &report.memory_percentiles, format_mib),
    ] {
        if rows.is_empty() {
            continue;
        }
        print_heading(&format!("{} | {}", title, report.namespace));
        let mut header = vec!["Entity".to_string(), "Count".to_string(), "Min".to_string()];
        header.extend(percentiles.iter().map(|p| percentile_label(*p)));
        header.extend(["Max", "Request", "Limit"].map(String::from));

        let records = rows
            .iter()
            .map(|row| {
                let d = &row.distribution;
                let mut record = vec![row.entity.to_string(), d.count.to_string(), format(d.min)];
                record.extend(d.percentiles.iter().map(|q| format(q.value)));
                record.push(format(d.max));
                record.push(format_configured(row.configured.request, format));
                record.push(format_configured(row.configured.limit, format));
                record
            })
            .collect();
        print_records(header, records);
    }
}
