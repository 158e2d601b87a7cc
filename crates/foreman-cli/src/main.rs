mod config;
mod run_cmd;
mod status_cmd;
mod test_util;

use clap::{Parser, Subcommand};

use foreman_db::pool;

use config::ForemanConfig;

#[derive(Parser)]
#[command(name = "foreman", about = "Autonomous agent orchestrator")]
struct Cli {
    /// Database URL (overrides FOREMAN_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a foreman config file (no database required)
    Init {
        /// SQLite database URL
        #[arg(long, default_value = foreman_db::config::DbConfig::DEFAULT_URL)]
        db_url: String,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the database and run migrations
    DbInit,
    /// Parse a roster file and report dependency errors
    Validate {
        /// Path to the roster TOML file
        file: String,
    },
    /// Run a project: seed agents from a roster and supervise workers
    Run {
        /// Path to the roster TOML file
        file: String,
        /// Project working directory (defaults to the current directory)
        #[arg(long)]
        working_dir: Option<String>,
    },
    /// Show project phase and the per-agent table
    Status,
}

/// Execute the `foreman init` command: write the config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let mut cfg = config::ConfigFile::default();
    cfg.database.url = db_url.to_string();
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `foreman db-init` to create and migrate the database.");
    Ok(())
}

/// Execute the `foreman db-init` command: create the database file and run
/// migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = ForemanConfig::resolve(cli_db_url)?;

    println!("Initializing foreman database...");
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool, pool::default_migrations_path()).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("foreman db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Validate { file } => {
            run_cmd::validate_roster(&file)?;
        }
        Commands::Run { file, working_dir } => {
            let resolved = ForemanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            pool::run_migrations(&db_pool, pool::default_migrations_path()).await?;
            let result = run_cmd::run_project(
                &db_pool,
                resolved.engine,
                &file,
                working_dir.as_deref(),
            )
            .await;
            db_pool.close().await;
            result?;
        }
        Commands::Status => {
            let resolved = ForemanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
