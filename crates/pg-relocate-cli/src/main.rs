//! pg-relocate CLI - PostgreSQL schema and data relocation.

use clap::{Parser, Subcommand};
use pg_relocate::error::EXIT_MIGRATION_ERROR;
use pg_relocate::{Config, MigrationResult, Orchestrator, RelocateError, RunOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "pg-relocate")]
#[command(about = "PostgreSQL schema and data relocation")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recreate the schema on the target and optionally copy data
    Run {
        /// Override source schema
        #[arg(long)]
        source_schema: Option<String>,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,

        /// Do not create schema objects
        #[arg(long)]
        skip_schema: bool,

        /// Copy row data even if migration.migrate_data is off
        #[arg(long)]
        include_data: bool,

        /// Drop target tables, views, sequences and types first
        #[arg(long)]
        clean: bool,
    },

    /// Print the DDL a run would apply, without executing it
    Plan {
        /// Override source schema
        #[arg(long)]
        source_schema: Option<String>,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,

        /// Write the script to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate row counts between source and target
    Validate,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, RelocateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            source_schema,
            target_schema,
            skip_schema,
            include_data,
            clean,
        } => {
            let options = RunOptions {
                source_schema,
                target_schema,
                skip_schema,
                include_data,
                clean,
            };

            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.run(&options).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_run_summary(&result);
            }

            if result.has_errors() {
                return Ok(ExitCode::from(EXIT_MIGRATION_ERROR));
            }
        }

        Commands::Plan {
            source_schema,
            target_schema,
            output,
        } => {
            let options = RunOptions {
                source_schema,
                target_schema,
                ..Default::default()
            };

            let orchestrator = Orchestrator::new(config).await?;
            let plan = orchestrator.plan(&options).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                let script = plan.script();
                match output {
                    Some(path) => {
                        std::fs::write(&path, script)?;
                        println!(
                            "Wrote {} statements to {}",
                            plan.statements.len(),
                            path.display()
                        );
                    }
                    None => print!("{}", script),
                }
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config).await?;
            let results = orchestrator.validate().await?;
            let mismatches = results.iter().filter(|r| !r.matches).count();

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("Row Count Validation:");
                for r in &results {
                    let target = r
                        .target_rows
                        .map_or_else(|| "missing".to_string(), |n| n.to_string());
                    println!(
                        "  {} {}: source={} target={}",
                        if r.matches { "OK  " } else { "DIFF" },
                        r.table,
                        r.source_rows,
                        target
                    );
                }
                println!("\n  {} tables, {} mismatched", results.len(), mismatches);
            }

            if mismatches > 0 {
                return Ok(ExitCode::from(EXIT_MIGRATION_ERROR));
            }
        }

        Commands::HealthCheck => {
            let result = Orchestrator::health_check(&config).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source: {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref version) = result.source_version {
                    println!("    Version: {}", version);
                }
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target: {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref version) = result.target_version {
                    println!("    Version: {}", version);
                }
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                if !result.missing_extensions.is_empty() {
                    println!(
                        "  Extensions missing on target: {}",
                        result.missing_extensions.join(", ")
                    );
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(RelocateError::connection(
                    "Health check failed",
                    "connecting to source and target",
                ));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_run_summary(result: &MigrationResult) {
    println!("\nMigration {}!", result.status.replace('_', " "));
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Schema: {} -> {}", result.source_schema, result.target_schema);
    if let Some(cleaned) = result.cleaned_objects {
        println!("  Cleaned objects: {}", cleaned);
    }
    if let Some(ref schema) = result.schema {
        println!(
            "  DDL: {} applied, {} failed, {} manual",
            schema.succeeded, schema.failed, schema.manual
        );
        for failure in &schema.failures {
            println!("    {} {}: {}", failure.phase, failure.object, failure.error);
        }
    }
    if !result.tables.is_empty() {
        println!("  Tables: {}", result.tables.len());
        println!("  Rows: {}", result.rows_transferred);
        for table in result.tables.iter().filter(|t| t.error.is_some()) {
            println!(
                "    {}: {}",
                table.table,
                table.error.as_deref().unwrap_or_default()
            );
        }
    }
    if !result.cyclic_tables.is_empty() {
        println!("  Foreign key cycle: {}", result.cyclic_tables.join(", "));
    }
    for failure in &result.introspection_failures {
        println!("  Could not read {}: {}", failure.object, failure.message);
    }
    if !result.review.is_empty() {
        println!("  Review:");
        for item in &result.review {
            println!("    {}", item);
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
