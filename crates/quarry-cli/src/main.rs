use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use quarry_core::{Config, Credentials, TableSelector};
use quarry_warehouses::{create_client, WarehouseClient};

const DEFAULT_CONFIG: &str = "quarry.toml";

/// Quarry - one client for every data warehouse
#[derive(Parser)]
#[command(name = "quarry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: quarry.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the warehouse accepts the configured credentials
    Test,

    /// Run a SQL statement and print the result as JSON
    Query {
        /// SQL text to run
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        sql: Option<String>,

        /// Read the SQL text from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print column types for tables as JSON
    Catalog {
        /// Tables as database.schema.table
        #[arg(required = true)]
        tables: Vec<String>,
    },

    /// Print the configured first day of the week
    StartOfWeek,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    dotenvy::dotenv().ok();

    let config = load_config(cli.config.as_deref(), cli.verbose)?;
    let credentials = config
        .credentials()?
        .ok_or_else(|| anyhow::anyhow!(
            "No warehouse configuration found in {}. \
             Add a [warehouse] section with type and connection settings.",
            cli.config.as_deref().unwrap_or(Path::new(DEFAULT_CONFIG)).display()
        ))?;

    if cli.verbose {
        if config.redact_sensitive_data {
            eprintln!("{} {}", "Warehouse:".cyan(), credentials.warehouse_type());
        } else {
            eprintln!("{} {} ({})", "Warehouse:".cyan(), credentials.warehouse_type(), describe(&credentials));
        }
    }

    let client = create_client(credentials);

    match cli.command {
        Commands::Test => test_command(client.as_ref(), cli.verbose).await,
        Commands::Query { sql, file } => query_command(client.as_ref(), sql, file.as_deref()).await,
        Commands::Catalog { tables } => catalog_command(client.as_ref(), &tables).await,
        Commands::StartOfWeek => {
            match client.start_of_week() {
                Some(day) => println!("{}", day),
                None => println!("none"),
            }
            Ok(())
        }
    }
}

/// Where the credentials point, without any secret
fn describe(credentials: &Credentials) -> String {
    match credentials {
        Credentials::BigQuery(c) => format!("{}.{}", c.project, c.dataset),
        Credentials::Databricks(c) => format!("{}{}", c.server_host_name, c.http_path),
        Credentials::Duckdb(c) => c
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string()),
        Credentials::Postgres(c) => format!("{}@{}:{}/{}", c.user, c.host, c.port, c.dbname),
        Credentials::Redshift(c) => format!("{}@{}:{}/{}", c.user, c.host, c.port, c.dbname),
        Credentials::Snowflake(c) => format!("{}@{}/{}", c.user, c.account, c.database),
    }
}

fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => Config::from_file(Path::new(DEFAULT_CONFIG))?,
        None => {
            if verbose {
                eprintln!("{}", "No config file found, using defaults".yellow());
            }
            Config::default()
        }
    };
    config.expand_env()?;
    Ok(config)
}

/// Test command - open a session and run a trivial statement
async fn test_command(client: &dyn WarehouseClient, verbose: bool) -> Result<()> {
    if verbose {
        eprintln!("{} {}...", "Connecting to".cyan(), client.name());
    }

    client
        .test()
        .await
        .with_context(|| format!("Failed to connect to {}", client.name()))?;

    println!("{} {} connection successful", "✓".green(), client.name());
    Ok(())
}

/// Query command - run SQL and print the normalized result
async fn query_command(client: &dyn WarehouseClient, sql: Option<String>, file: Option<&Path>) -> Result<()> {
    let sql = match (sql, file) {
        (Some(sql), _) => sql,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read SQL from {}", path.display()))?,
        (None, None) => anyhow::bail!("Provide SQL text or --file"),
    };

    let result = client.run_query(&sql).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Catalog command - look up column types for the requested tables
async fn catalog_command(client: &dyn WarehouseClient, tables: &[String]) -> Result<()> {
    let selectors = tables
        .iter()
        .map(|fqn| {
            TableSelector::parse(fqn)
                .ok_or_else(|| anyhow::anyhow!("Invalid table '{}'. Expected database.schema.table", fqn))
        })
        .collect::<Result<Vec<_>>>()?;

    let catalog = client.get_catalog(&selectors).await?;

    for selector in &selectors {
        if catalog.table(selector).is_none() {
            eprintln!("{} {} not found", "⚠".yellow(), selector);
        }
    }

    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(())
}
