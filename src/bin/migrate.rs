use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use fellowship::migrate::{discover, MigrationTarget, Migrator, Outcome, DEFAULT_DIR};

#[derive(Parser)]
#[command(name = "migrate")]
#[command(about = "Apply SQL migrations to the community database")]
#[command(
    after_help = "Environment:\n  DATABASE_URL               Direct Postgres connection (tried first)\n  SUPABASE_URL               Project URL for the exec_sql RPC and run-migration function\n  SUPABASE_SERVICE_ROLE_KEY  Privileged key for both HTTP strategies"
)]
struct Cli {
    /// Directory holding `<name>.sql` files.
    #[arg(long, default_value = DEFAULT_DIR)]
    dir: PathBuf,
    /// Migrations to apply; every file in `--dir` when omitted.
    names: Vec<String>,
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let migrations = discover(&cli.dir, &cli.names)
        .with_context(|| format!("loading migrations from {}", cli.dir.display()))?;
    if migrations.is_empty() {
        println!("No migrations found in {}", cli.dir.display());
        return Ok(true);
    }
    let migrator = Migrator::new(MigrationTarget::from_env()).context("preparing database connection")?;

    let mut all_applied = true;
    for (m, outcome) in migrator.run(&migrations).await {
        match outcome {
            Outcome::Direct => println!("✓ {} (direct connection)", m.name),
            Outcome::Rpc => println!("✓ {} (exec_sql)", m.name),
            Outcome::EdgeFunction => println!("✓ {} (run-migration function)", m.name),
            Outcome::Manual => {
                all_applied = false;
                println!("✗ {} could not be applied automatically. Run this SQL manually:", m.name);
                println!("-- {}\n{}\n", m.name, m.sql.trim_end());
            }
        }
    }
    Ok(all_applied)
}

#[tokio::main]
async fn main() -> ExitCode {
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("migrate: {e:#}");
            ExitCode::FAILURE
        }
    }
}
