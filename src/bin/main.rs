//! Reconciler CLI - generate rulesets and run reconciliations
//!
//! Usage:
//!   reconciler generate --source <conn> --source-table <t> --target <conn> --target-table <t>
//!   reconciler show <ruleset_id>
//!   reconciler export-sql <ruleset_id> [--dialect <dialect>]
//!   reconciler run <ruleset_id> --source <conn> --target <conn> [--landing <conn>]
//!   reconciler sweep --landing <conn>
//!
//! Connections are named in the settings file (`[connections.<name>]`).
//! Logs go to stderr (`RUST_LOG`, default `info`); results go to stdout.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use reconciler::config::{Driver, ModePreference, Settings, SettingsError};
use reconciler::db::{Database, DbError, SchemaProvider, SqliteDatabase, WorkerDatabase};
use reconciler::engine::{export_ruleset_sql, ExecutionCoordinator, JsonlResultSink};
use reconciler::rules::{
    build_ruleset, ExplicitPair, NoEnhancer, RuleEnhancer, RuleError, RulesetStore,
    SqliteRulesetStore, StaticRuleEnhancer, StoreError,
};
use reconciler::sql::Dialect;
use reconciler::staging::{sweep_expired, StagingError, StagingManager, SystemClock};
use reconciler::worker::{WorkerClient, WorkerError};

#[derive(Parser)]
#[command(name = "reconciler")]
#[command(about = "Reconciler - generate matching rules between two tables and reconcile them")]
#[command(version)]
struct Cli {
    /// Settings file (defaults: $RECONCILER_CONFIG, ./reconciler.toml, ~/.config/reconciler/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and store a ruleset for a source/target table pair
    Generate {
        /// Source connection name
        #[arg(long)]
        source: String,
        #[arg(long)]
        source_table: String,

        /// Target connection name
        #[arg(long)]
        target: String,
        #[arg(long)]
        target_table: String,

        /// Explicit column pair, e.g. `invoice_no,vendor=doc_ref,supplier`
        #[arg(long = "pair")]
        pairs: Vec<String>,

        /// JSON file of enhancer-proposed rules
        #[arg(long)]
        enhancer_file: Option<PathBuf>,
    },

    /// Print a stored ruleset
    Show {
        ruleset_id: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored rulesets
    List,

    /// Print the matched/unmatched/summary SQL of every rule
    ExportSql {
        ruleset_id: String,

        #[arg(short, long, default_value = "postgres")]
        dialect: DialectArg,
    },

    /// Execute a stored ruleset and print the execution record
    Run {
        ruleset_id: String,

        #[arg(long)]
        source: String,

        #[arg(long)]
        target: String,

        /// Landing connection for staged execution
        #[arg(long)]
        landing: Option<String>,

        #[arg(long, default_value = "auto")]
        mode: ModeArg,
    },

    /// Drop expired staging tables on a landing connection
    Sweep {
        #[arg(long)]
        landing: String,
    },
}

#[derive(Clone, ValueEnum)]
enum DialectArg {
    Postgres,
    Mysql,
    Tsql,
    Duckdb,
    Sqlite,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Tsql => Dialect::TSql,
            DialectArg::Duckdb => Dialect::DuckDb,
            DialectArg::Sqlite => Dialect::Sqlite,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum ModeArg {
    Auto,
    Federated,
    Staged,
}

impl From<ModeArg> for ModePreference {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Auto => ModePreference::Auto,
            ModeArg::Federated => ModePreference::Federated,
            ModeArg::Staged => ModePreference::Staged,
        }
    }
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Rules(#[from] RuleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

type CliResult<T> = Result<T, CliError>;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

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

    let mut ctx = Context {
        settings,
        worker: None,
    };
    let result = match cli.command {
        Commands::Generate {
            source,
            source_table,
            target,
            target_table,
            pairs,
            enhancer_file,
        } => {
            cmd_generate(&mut ctx, &source, &source_table, &target, &target_table, &pairs, enhancer_file).await
        }
        Commands::Show { ruleset_id, json } => cmd_show(&ctx, &ruleset_id, json),
        Commands::List => cmd_list(&ctx),
        Commands::ExportSql { ruleset_id, dialect } => cmd_export_sql(&ctx, &ruleset_id, dialect.into()),
        Commands::Run {
            ruleset_id,
            source,
            target,
            landing,
            mode,
        } => cmd_run(&mut ctx, &ruleset_id, &source, &target, landing.as_deref(), mode.into()).await,
        Commands::Sweep { landing } => cmd_sweep(&mut ctx, &landing).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

struct Context {
    settings: Settings,
    /// Spawned on first use of a non-embedded connection.
    worker: Option<Arc<WorkerClient>>,
}

impl Context {
    fn store(&self) -> CliResult<SqliteRulesetStore> {
        Ok(SqliteRulesetStore::open(self.settings.store_path()?)?)
    }

    async fn database(&mut self, name: &str) -> CliResult<Arc<dyn Database>> {
        let conn = self.settings.get_connection(name)?.clone();
        let driver = conn.driver_type()?;

        if driver == Driver::Sqlite {
            let path = match (&conn.connection_string, &conn.host) {
                (Some(cs), _) => reconciler::config::expand_env_vars(cs)?,
                (None, Some(host)) => reconciler::config::expand_env_vars(host)?,
                (None, None) => {
                    return Err(CliError::Usage(format!("connection '{}' has no database path", name)))
                }
            };
            return Ok(Arc::new(SqliteDatabase::open(path)?));
        }

        let client = match &self.worker {
            Some(client) => client.clone(),
            None => {
                let client = Arc::new(WorkerClient::spawn_with_settings(&self.settings).await?);
                self.worker = Some(client.clone());
                client
            }
        };
        let db = WorkerDatabase::from_connection_string(client, driver, &conn.resolved_connection_string()?);
        Ok(Arc::new(match &conn.default_schema {
            Some(schema) => db.with_default_schema(schema),
            None => db,
        }))
    }
}

async fn cmd_generate(
    ctx: &mut Context,
    source: &str,
    source_table: &str,
    target: &str,
    target_table: &str,
    pairs: &[String],
    enhancer_file: Option<PathBuf>,
) -> CliResult<ExitCode> {
    let rule_config = ctx.settings.rule_config()?;
    let explicit = pairs.iter().map(|p| parse_pair(p)).collect::<CliResult<Vec<_>>>()?;

    let source_db = ctx.database(source).await?;
    let target_db = ctx.database(target).await?;
    let source_schema = source_db.table_schema(source_table).await?;
    let target_schema = target_db.table_schema(target_table).await?;

    let enhancer: Box<dyn RuleEnhancer> = match enhancer_file {
        Some(path) => Box::new(StaticRuleEnhancer::new(path)),
        None => Box::new(NoEnhancer),
    };

    let ruleset = build_ruleset(
        &source_schema,
        &target_schema,
        &explicit,
        enhancer.as_ref(),
        Vec::new(),
        &rule_config,
    )
    .await?;
    let id = ctx.store()?.save(&ruleset)?;

    for warning in &ruleset.warnings {
        eprintln!("warning: {}", warning);
    }
    println!("{}", id);
    Ok(ExitCode::SUCCESS)
}

/// `a,b=c,d` → source `[a, b]`, target `[c, d]`.
fn parse_pair(pair: &str) -> CliResult<ExplicitPair> {
    let (source, target) = pair
        .split_once('=')
        .ok_or_else(|| CliError::Usage(format!("pair '{}' must look like src_col=tgt_col", pair)))?;
    let split = |s: &str| -> Vec<String> {
        s.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect()
    };
    let (source_columns, target_columns) = (split(source), split(target));
    if source_columns.is_empty() || source_columns.len() != target_columns.len() {
        return Err(CliError::Usage(format!(
            "pair '{}' needs the same number of source and target columns",
            pair
        )));
    }
    Ok(ExplicitPair {
        source_columns,
        target_columns,
        match_type: Default::default(),
    })
}

fn cmd_show(ctx: &Context, ruleset_id: &str, json: bool) -> CliResult<ExitCode> {
    let ruleset = ctx.store()?.load(ruleset_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ruleset)?);
    } else {
        print!("{}", ruleset);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_list(ctx: &Context) -> CliResult<ExitCode> {
    let summaries = ctx.store()?.list()?;
    if summaries.is_empty() {
        println!("No rulesets stored.");
    }
    for s in summaries {
        println!(
            "{}  {} -> {}  {} rules  {}",
            s.ruleset_id,
            s.source_schema,
            s.target_schema,
            s.rule_count,
            s.created_at.to_rfc3339()
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_export_sql(ctx: &Context, ruleset_id: &str, dialect: Dialect) -> CliResult<ExitCode> {
    let ruleset = ctx.store()?.load(ruleset_id)?;
    for sql in export_ruleset_sql(&ruleset, dialect) {
        println!("-- Rule: {} ({})", sql.rule_name, sql.rule_id);
        println!("-- matched");
        println!("{};", sql.matched);
        println!("-- unmatched source");
        println!("{};", sql.unmatched_source);
        println!("-- unmatched target");
        println!("{};", sql.unmatched_target);
        println!("-- summary");
        println!("{};", sql.summary);
        println!();
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_run(
    ctx: &mut Context,
    ruleset_id: &str,
    source: &str,
    target: &str,
    landing: Option<&str>,
    mode: ModePreference,
) -> CliResult<ExitCode> {
    let ruleset = ctx.store()?.load(ruleset_id)?;
    let config = ctx.settings.run_config()?.with_mode(mode);
    let sink = Arc::new(JsonlResultSink::new(ctx.settings.sink_path()?));

    let source_db = ctx.database(source).await?;
    let target_db = ctx.database(target).await?;
    let mut coordinator = ExecutionCoordinator::new(source_db, target_db, sink, config.clone());
    if let Some(name) = landing {
        let landing_db = ctx.database(name).await?;
        let manager = StagingManager::open(landing_db, &config, Arc::new(SystemClock)).await?;
        coordinator = coordinator.with_staging(Arc::new(manager));
    }

    match coordinator.run(&ruleset).await {
        Ok(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            println!("{}", serde_json::to_string_pretty(&failure.record)?);
            eprintln!("Error: {}", failure);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cmd_sweep(ctx: &mut Context, landing: &str) -> CliResult<ExitCode> {
    let config = ctx.settings.run_config()?;
    let landing_db = ctx.database(landing).await?;
    let manager = StagingManager::open(landing_db, &config, Arc::new(SystemClock)).await?;
    let report = sweep_expired(manager.catalog(), manager.clock().as_ref()).await?;

    println!(
        "examined {}, dropped {}, failed {}",
        report.examined,
        report.dropped.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        eprintln!("  {}: {}", failure.table, failure.reason);
    }
    Ok(if report.failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
