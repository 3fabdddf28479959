use anyhow::{Context, Result};
use clap::Parser;
use racimo::cli::{Cli, Command, OutputFormat};
use racimo::config::DetectionConfig;
use racimo::detector::{DetectionReport, MetaOperationDetector};
use racimo::record::{OperationId, OperationRecord, SubOperationRecord};
use racimo::strategy::default_params;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<DetectionConfig> {
    match path {
        Some(path) => DetectionConfig::from_toml(path),
        None => DetectionConfig::embedded().context("Embedded strategy defaults are invalid"),
    }
}

/// Read a recorded operation, or a bare sub-operation list wrapped as one
fn load_record(path: &Path) -> Result<OperationRecord> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read record: {}", path.display()))?;

    if let Ok(record) = serde_json::from_str::<OperationRecord>(&content) {
        return Ok(record);
    }

    let sub_operations: Vec<SubOperationRecord> = serde_json::from_str(&content).with_context(|| {
        format!(
            "{} is neither an operation record nor a sub-operation list",
            path.display()
        )
    })?;

    let start = sub_operations.iter().map(|s| s.start_nanos).min().unwrap_or(0);
    let mut record = OperationRecord::new(OperationId(0), "input", None, start);
    record.sub_operations = sub_operations;
    Ok(record)
}

/// Detection result for one operation of the recorded tree
#[derive(Serialize)]
struct OperationReport<'a> {
    operation: OperationId,
    name: &'a str,
    depth: usize,
    report: DetectionReport,
}

fn collect_reports<'a>(
    detector: &MetaOperationDetector,
    record: &'a OperationRecord,
    depth: usize,
    out: &mut Vec<OperationReport<'a>>,
) {
    out.push(OperationReport {
        operation: record.id,
        name: &record.name,
        depth,
        report: detector.report(&record.sub_operations),
    });
    for child in &record.children {
        collect_reports(detector, child, depth + 1, out);
    }
}

fn run_detect(input: &Path, config: &DetectionConfig, format: OutputFormat) -> Result<()> {
    let detector = MetaOperationDetector::from_config(config)?;
    let record = load_record(input)?;
    tracing::debug!(
        operation = %record.id,
        sub_operations = record.sub_operations.len(),
        children = record.children.len(),
        "record loaded"
    );

    let mut reports = Vec::new();
    collect_reports(&detector, &record, 0, &mut reports);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        OutputFormat::Text => {
            for entry in &reports {
                let indent = "  ".repeat(entry.depth);
                println!("{}{} ({})", indent, entry.name, entry.operation);
                for line in entry.report.to_string().lines() {
                    println!("{}{}", indent, line);
                }
            }
        }
    }
    Ok(())
}

fn run_strategies(config: &DetectionConfig, format: OutputFormat) -> Result<()> {
    // validated up front so an invalid file fails the command
    config.validate()?;

    #[derive(Serialize)]
    struct StrategyEntry<'a> {
        name: &'a str,
        priority: usize,
        parameters: serde_json::Value,
    }

    let entries: Vec<StrategyEntry> = config
        .enabled
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut parameters = default_params(name).unwrap_or(serde_json::Value::Null);
            if let (Some(target), Some(overrides)) =
                (parameters.as_object_mut(), config.params(name).as_object())
            {
                for (key, value) in overrides {
                    target.insert(key.clone(), value.clone());
                }
            }
            StrategyEntry {
                name,
                priority: i + 1,
                parameters,
            }
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text => {
            for entry in &entries {
                println!("{}. {} {}", entry.priority, entry.name, entry.parameters);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let config = load_config(args.config.as_deref())?;

    match &args.command {
        Command::Detect { input } => run_detect(input, &config, args.format),
        Command::Strategies => run_strategies(&config, args.format),
    }
}
