//! datamap - declarative field mapping for data migration
//!
//! CLI entry point for inspecting mappings and mapping JSON records.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use serde_json::Value;
use tracing::info;

use datamap::cli::{Cli, Command};
use datamap::config::Config;
use datamap::{DefinitionStore, LuaEvaluator, MappingLoader, MappingResolver, StaticSchema};

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("datamap")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Setup tracing subscriber - write to log file, stdout carries mapped records
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("datamap.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(paths = ?config.mappings.paths, "datamap loaded config");

    let loader = Arc::new(MappingLoader::new(&config.mappings).context("Failed to load mapping definitions")?);

    match cli.command {
        Command::List => cmd_list(&loader),
        Command::Check => cmd_check(&loader),
        Command::Fields { mapping } => cmd_fields(&config, loader, &mapping),
        Command::Map { mapping, input, pretty } => cmd_map(&config, loader, &mapping, input, pretty),
    }
}

fn build_resolver(config: &Config, loader: Arc<MappingLoader>) -> Result<MappingResolver> {
    let schema = match config.schema_path() {
        Some(path) => StaticSchema::load(&path)?,
        None => StaticSchema::new(),
    };
    let evaluator = LuaEvaluator::from_config(&config.evaluator);
    Ok(MappingResolver::new(loader, Arc::new(schema), Arc::new(evaluator)))
}

/// List loaded mapping definitions
fn cmd_list(loader: &MappingLoader) -> Result<()> {
    if loader.is_empty() {
        println!("No mapping definitions found");
        return Ok(());
    }

    for name in loader.names() {
        if let Some(def) = loader.get(name) {
            println!(
                "{} {} {} ({} rules)",
                name.cyan(),
                def.mapping_type.to_string().yellow(),
                def.local_doctype,
                def.fields.len()
            );
        }
    }
    Ok(())
}

/// Report unresolved or cyclic child table references
fn cmd_check(loader: &MappingLoader) -> Result<()> {
    let problems = loader.check_references();
    if problems.is_empty() {
        println!("{} {} mapping definitions OK", "✓".green(), loader.len());
        return Ok(());
    }

    for problem in &problems {
        println!("{} {}", "✗".red(), problem);
    }
    Err(eyre::eyre!("{} problem(s) found", problems.len()))
}

/// Print the source field list for a mapping
fn cmd_fields(config: &Config, loader: Arc<MappingLoader>, mapping: &str) -> Result<()> {
    let definition = loader.load_mapping_by_name(mapping)?;
    let resolver = build_resolver(config, loader)?;

    for field in resolver.derive_field_list(&definition) {
        println!("{}", field);
    }
    if let Some(filters) = resolver.filters(&definition)? {
        println!("{} {}", "filters:".dimmed(), filters);
    }
    Ok(())
}

/// Map JSON records from a file or stdin
fn cmd_map(
    config: &Config,
    loader: Arc<MappingLoader>,
    mapping: &str,
    input: Option<PathBuf>,
    pretty: bool,
) -> Result<()> {
    let definition = loader.load_mapping_by_name(mapping)?;
    let resolver = build_resolver(config, loader)?;

    let content = match &input {
        Some(path) => fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };
    let records: Value = serde_json::from_str(&content).context("Input is not valid JSON")?;

    let output = match records {
        Value::Array(rows) => Value::Array(
            resolver
                .map_records(&definition, &rows)?
                .into_iter()
                .map(Value::from)
                .collect(),
        ),
        record @ Value::Object(_) => resolver.map_record(&definition, &record)?.into_value(),
        other => return Err(eyre::eyre!("Expected a JSON object or array, got: {}", other)),
    };

    let rendered = if pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", rendered);
    Ok(())
}
