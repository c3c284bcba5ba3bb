//! Applies maintenance SQL files against the hosted database.
//!
//! Each file goes through the first strategy that works: a direct Postgres
//! connection, the privileged `exec_sql` RPC, the `run-migration` edge
//! function. When none is available the SQL is handed back for manual runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use tracing::{info, warn};

pub const DEFAULT_DIR: &str = "migrations";

#[derive(thiserror::Error, Debug)]
pub enum MigrateError {
    #[error("io error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("migration not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub name: String,
    pub sql: String,
}

/// Where migrations may be sent. Every field is optional; missing ones only
/// disable the matching strategy.
#[derive(Debug, Clone, Default)]
pub struct MigrationTarget {
    pub database_url: Option<String>,
    pub supabase_url: Option<String>,
    pub service_role_key: Option<String>,
}

impl MigrationTarget {
    pub fn from_env() -> Self {
        let var = |n: &str| std::env::var(n).ok().filter(|v| !v.trim().is_empty());
        Self {
            database_url: var("DATABASE_URL"),
            supabase_url: var("SUPABASE_URL").map(|u| u.trim_end_matches('/').to_string()),
            service_role_key: var("SUPABASE_SERVICE_ROLE_KEY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Direct,
    Rpc,
    EdgeFunction,
    /// Nothing could run it; the caller prints the SQL.
    Manual,
}

impl Outcome {
    pub fn applied(&self) -> bool {
        !matches!(self, Outcome::Manual)
    }
}

/// Loads `names` from `dir` (a missing `.sql` suffix is added), or every
/// `.sql` file in name order when `names` is empty.
pub fn discover(dir: &Path, names: &[String]) -> Result<Vec<Migration>, MigrateError> {
    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source| MigrateError::Io { path, source }
    };
    let files: Vec<PathBuf> = if names.is_empty() {
        let mut all: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(io(dir))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|x| x == "sql"))
            .collect();
        all.sort();
        all
    } else {
        names
            .iter()
            .map(|n| {
                let file = if n.ends_with(".sql") { n.clone() } else { format!("{n}.sql") };
                let path = dir.join(file);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(MigrateError::NotFound(n.clone()))
                }
            })
            .collect::<Result<_, _>>()?
    };

    files
        .into_iter()
        .map(|path| -> Result<Migration, MigrateError> {
            let sql = std::fs::read_to_string(&path).map_err(io(&path))?;
            let name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
            Ok(Migration { name, sql })
        })
        .collect()
}

pub struct Migrator {
    target: MigrationTarget,
    http: reqwest::Client,
    pool: Option<PgPool>,
}

impl Migrator {
    pub fn new(target: MigrationTarget) -> Result<Self, MigrateError> {
        let pool = match &target.database_url {
            Some(url) => Some(
                PgPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect_lazy(url)
                    .map_err(|e| MigrateError::Database(e.to_string()))?,
            ),
            None => None,
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Ok(Self { target, http, pool })
    }

    pub async fn apply(&self, m: &Migration) -> Outcome {
        if let Some(pool) = &self.pool {
            match pool.execute(m.sql.as_str()).await {
                Ok(_) => {
                    info!(migration = %m.name, "applied over direct connection");
                    return Outcome::Direct;
                }
                Err(e) => warn!(migration = %m.name, error = %e, "direct connection failed"),
            }
        }
        let (Some(base), Some(key)) = (&self.target.supabase_url, &self.target.service_role_key) else {
            return Outcome::Manual;
        };

        let rpc = self
            .post(format!("{base}/rest/v1/rpc/exec_sql"), key, serde_json::json!({ "sql": m.sql }))
            .await;
        match rpc {
            Ok(()) => {
                info!(migration = %m.name, "applied through exec_sql");
                return Outcome::Rpc;
            }
            Err(e) => warn!(migration = %m.name, error = %e, "exec_sql unavailable"),
        }

        let function = self
            .post(
                format!("{base}/functions/v1/run-migration"),
                key,
                serde_json::json!({ "name": m.name, "sql": m.sql }),
            )
            .await;
        match function {
            Ok(()) => {
                info!(migration = %m.name, "applied through run-migration function");
                Outcome::EdgeFunction
            }
            Err(e) => {
                warn!(migration = %m.name, error = %e, "run-migration function unavailable");
                Outcome::Manual
            }
        }
    }

    async fn post(&self, url: String, key: &str, body: serde_json::Value) -> Result<(), String> {
        let resp = self
            .http
            .post(url)
            .header("apikey", key)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = resp.text().await.unwrap_or_default();
            Err(format!("{status}: {text}"))
        }
    }

    /// Applies every migration in order; the run keeps going past failures.
    pub async fn run(&self, migrations: &[Migration]) -> Vec<(Migration, Outcome)> {
        let mut out = Vec::with_capacity(migrations.len());
        for m in migrations {
            let outcome = self.apply(m).await;
            out.push((m.clone(), outcome));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_orders_files_and_resolves_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("002_second.sql"), "select 2;").unwrap();
        std::fs::write(dir.path().join("001_first.sql"), "select 1;").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let all = discover(dir.path(), &[]).unwrap();
        let names: Vec<_> = all.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["001_first", "002_second"]);

        let picked = discover(dir.path(), &["002_second".to_string()]).unwrap();
        assert_eq!(picked[0].sql, "select 2;");

        assert!(matches!(discover(dir.path(), &["nope".to_string()]), Err(MigrateError::NotFound(_))));
    }

    #[tokio::test]
    async fn without_any_target_sql_is_left_for_manual_runs() {
        let migrator = Migrator::new(MigrationTarget::default()).unwrap();
        let m = Migration { name: "x".into(), sql: "select 1;".into() };
        assert_eq!(migrator.apply(&m).await, Outcome::Manual);
        assert!(!Outcome::Manual.applied());
    }
}
