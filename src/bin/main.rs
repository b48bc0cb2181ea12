//! modelforge CLI
//!
//! Usage:
//!   modelforge serve [--bind 127.0.0.1:8700]
//!   modelforge introspect <source>...
//!   modelforge suggest-joins <source>
//!   modelforge query --source <id>... [--cap N] "<sql>"
//!   modelforge models --user <user>

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use modelforge::config::Settings;
use modelforge::engine::ModelingEngine;
use modelforge::executor::{QueryExecutor, SourceBinding};
use modelforge::logging::LoggingConfig;
use modelforge::schema::{format_schema, suggest_joins, SchemaCollector, SchemaWarning};
use modelforge::source::SourceRegistry;
use modelforge::storage::{DurableStore, SqliteDurableStore};

#[derive(Parser)]
#[command(name = "modelforge")]
#[command(about = "AI-assisted data modelling over live database schemas")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the standard search path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the JSON API
    Serve {
        /// Address to bind (overrides [server] bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Print the merged schema markdown for one or more sources
    Introspect {
        #[arg(required = true)]
        sources: Vec<String>,
    },

    /// List ranked join candidates within a source
    SuggestJoins { source: String },

    /// Run a read-only query
    Query {
        /// Source id; repeat for a cross-source query
        #[arg(short, long = "source", required = true)]
        sources: Vec<String>,

        /// Row cap
        #[arg(long)]
        cap: Option<usize>,

        #[arg(short, long, default_value = "table")]
        output: OutputFormat,

        sql: String,
    },

    /// List saved data models
    Models {
        #[arg(short, long)]
        user: String,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Tab-separated rows with a header
    Table,
    /// The result as JSON
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };
    LoggingConfig::from_settings(&settings.logging).init();

    let result = match cli.command {
        Commands::Serve { bind } => cmd_serve(settings, bind).await,
        Commands::Introspect { sources } => cmd_introspect(&settings, &sources).await,
        Commands::SuggestJoins { source } => cmd_suggest_joins(&settings, &source).await,
        Commands::Query {
            sources,
            cap,
            output,
            sql,
        } => cmd_query(&settings, &sources, cap, output, &sql).await,
        Commands::Models { user } => cmd_models(&settings, &user),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

async fn cmd_serve(settings: Settings, bind: Option<String>) -> CliResult {
    let bind = bind.unwrap_or_else(|| settings.server.bind.clone());
    let engine = ModelingEngine::builder(settings).build()?;
    modelforge::web::serve(engine, &bind).await
}

async fn cmd_introspect(settings: &Settings, ids: &[String]) -> CliResult {
    let registry = SourceRegistry::from_settings(settings)?;
    let sources = registry.resolve(ids)?;
    let collected = SchemaCollector::new(settings.query.collect_timeout())
        .collect_all(&sources)
        .await?;

    for warning in &collected.warnings {
        match warning {
            SchemaWarning::EmptySchema { source_id } => {
                eprintln!("warning: {} has no tables", source_id)
            }
            SchemaWarning::SourceDropped { source_id, reason } => {
                eprintln!("warning: {} dropped: {}", source_id, reason)
            }
        }
    }
    print!("{}", format_schema(&collected.sources));
    Ok(())
}

async fn cmd_suggest_joins(settings: &Settings, id: &str) -> CliResult {
    let registry = SourceRegistry::from_settings(settings)?;
    let source = registry.get(id)?;
    let (schema, _) = SchemaCollector::new(settings.query.collect_timeout())
        .collect(source.as_ref())
        .await?;

    let suggestions = suggest_joins(&schema);
    if suggestions.is_empty() {
        println!("No join candidates found.");
    }
    for s in suggestions {
        println!(
            "{:.2}  {}.{} -> {}.{}",
            s.confidence, s.from_table, s.from_column, s.to_table, s.to_column
        );
    }
    Ok(())
}

async fn cmd_query(
    settings: &Settings,
    ids: &[String],
    cap: Option<usize>,
    output: OutputFormat,
    sql: &str,
) -> CliResult {
    let registry = Arc::new(SourceRegistry::from_settings(settings)?);
    let executor = QueryExecutor::new(registry, settings.query.clone());
    let result = executor
        .execute(sql, &SourceBinding::sources(ids), cap)
        .await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Table => {
            println!("{}", result.columns.join("\t"));
            for row in &result.rows {
                let cells: Vec<String> = row
                    .iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        serde_json::Value::Null => "NULL".into(),
                        other => other.to_string(),
                    })
                    .collect();
                println!("{}", cells.join("\t"));
            }
            if result.row_cap_applied {
                eprintln!("(partial results: row cap of {} reached)", result.row_cap);
            }
        }
    }
    Ok(())
}

fn cmd_models(settings: &Settings, user: &str) -> CliResult {
    let store = SqliteDurableStore::open(settings.storage.resolved_path()?)?;
    let models = store.list_data_models(user)?;
    if models.is_empty() {
        println!("No saved models for {}.", user);
    }
    for model in models {
        println!(
            "{}  {}  [{}]  {}",
            model.id,
            model.created_at.format("%Y-%m-%d %H:%M"),
            model.source_ids.join(", "),
            model.title
        );
    }
    Ok(())
}
