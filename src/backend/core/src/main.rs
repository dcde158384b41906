//! Warden CLI - administrative surface for the authorization core.
//!
//! Applies migrations, seeds the catalog, grants and revokes overrides,
//! inspects effective permissions and override history, and runs the expiry
//! sweep.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

use warden_core::{
    authz::{
        CatalogSeed, EffectivePermissionResolver, ExpirySweeper, GrantRequest, Guard,
        GuardFactory, OverrideEvent, OverrideStore, PermissionCatalog, PermissionOverride,
        Principal, PrincipalId,
    },
    config::{CatalogSource, Config},
    db::{self, Database, PgOverrideRepository, PgPrincipalDirectory},
    telemetry::{self, LogFormat},
};

// ═══════════════════════════════════════════════════════════════════════════════
// CLI Structure
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Parser)]
#[command(
    name = "warden",
    author = "Aezi <aezi.zhu@icloud.com>",
    version,
    about = "Warden - authorization decision core administration",
    propagate_version = true
)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log format, overriding configuration
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,

    /// Write a catalog seed into the database
    Seed {
        /// TOML seed file; the built-in catalog when omitted
        path: Option<String>,
    },

    /// Grant a permission override to a principal
    Grant {
        #[arg(short, long)]
        principal: String,

        #[arg(short = 'P', long)]
        permission: String,

        /// Administrator performing the grant
        #[arg(short, long)]
        by: String,

        /// Relative expiry, e.g. `7d` or `12h`
        #[arg(long, value_parser = parse_duration, conflicts_with = "expires_at")]
        expires_in: Option<Duration>,

        /// Absolute expiry (RFC 3339)
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,

        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Revoke a permission override
    Revoke {
        #[arg(short, long)]
        principal: String,

        #[arg(short = 'P', long)]
        permission: String,

        /// Administrator performing the revoke
        #[arg(short, long)]
        by: Option<String>,
    },

    /// Show effective permissions, or decide a single permission
    Check {
        #[arg(short, long)]
        principal: String,

        #[arg(short, long)]
        role: String,

        #[arg(short = 'P', long)]
        permission: Option<String>,
    },

    /// List all overrides of a principal
    List {
        #[arg(short, long)]
        principal: String,
    },

    /// Show override history of a principal
    History {
        #[arg(short, long)]
        principal: String,

        #[arg(short = 'P', long)]
        permission: Option<String>,
    },

    /// Flip expired overrides to not granted
    Sweep {
        /// Keep sweeping on the configured interval until interrupted
        #[arg(short, long)]
        watch: bool,
    },

    /// Print the permission catalog
    Catalog,
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Output
// ═══════════════════════════════════════════════════════════════════════════════

struct OutputHelper {
    format: OutputFormat,
}

impl OutputHelper {
    fn new(format: OutputFormat, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format }
    }

    fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    fn print_success(&self, message: &str) {
        if self.is_json() {
            self.print_json(&serde_json::json!({ "status": "success", "message": message }));
        } else {
            println!("{} {}", "[OK]".green().bold(), message);
        }
    }

    fn print_error(&self, message: &str) {
        if self.is_json() {
            eprintln!("{}", serde_json::json!({ "status": "error", "message": message }));
        } else {
            eprintln!("{} {}", "[ERROR]".red().bold(), message);
        }
    }

    fn print_table<T: Tabled>(&self, items: &[T]) {
        if items.is_empty() {
            println!("{}", "No results found.".dimmed());
            return;
        }
        let table = Table::new(items)
            .with(Style::rounded())
            .with(Modify::new(Columns::first()).with(Alignment::left()))
            .to_string();
        println!("{}", table);
    }

    fn print_json<T: Serialize>(&self, data: &T) {
        match serde_json::to_string_pretty(data) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("failed to serialize output: {}", e),
        }
    }

    fn print_header(&self, title: &str) {
        if !self.is_json() {
            println!();
            println!("{}", title.bold().underline());
            println!();
        }
    }
}

#[derive(Tabled)]
struct OverrideView {
    #[tabled(rename = "Permission")]
    permission: String,
    #[tabled(rename = "Granted")]
    granted: String,
    #[tabled(rename = "Expires")]
    expires: String,
    #[tabled(rename = "By")]
    by: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl OverrideView {
    fn new(row: &PermissionOverride, now: DateTime<Utc>) -> Self {
        let granted = if row.is_active_at(now) {
            "yes".green().to_string()
        } else if row.is_expired_at(now) || (!row.is_granted && row.revoked_at.is_none()) {
            "expired".yellow().to_string()
        } else {
            "revoked".red().to_string()
        };
        Self {
            permission: row.permission.clone(),
            granted,
            expires: row
                .expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string()),
            by: row
                .revoked_by
                .as_ref()
                .or(row.granted_by.as_ref())
                .map(ToString::to_string)
                .unwrap_or_default(),
            reason: row.reason.clone().unwrap_or_default(),
        }
    }
}

#[derive(Tabled)]
struct EventView {
    #[tabled(rename = "At")]
    at: String,
    #[tabled(rename = "Permission")]
    permission: String,
    #[tabled(rename = "Event")]
    kind: String,
    #[tabled(rename = "Actor")]
    actor: String,
    #[tabled(rename = "Expires")]
    expires: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl From<&OverrideEvent> for EventView {
    fn from(event: &OverrideEvent) -> Self {
        Self {
            at: event.at.to_rfc3339(),
            permission: event.permission.clone(),
            kind: event.kind.to_string(),
            actor: event
                .actor
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "system".to_string()),
            expires: event.expires_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            reason: event.reason.clone().unwrap_or_default(),
        }
    }
}

#[derive(Tabled, Serialize)]
struct PermissionView {
    #[tabled(rename = "Permission")]
    name: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Active")]
    active: bool,
    #[tabled(rename = "Roles")]
    roles: String,
    #[tabled(rename = "Description")]
    description: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Wiring
// ═══════════════════════════════════════════════════════════════════════════════

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path).with_context(|| format!("loading config {}", path)),
        None => Ok(Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: Could not load config: {}. Using defaults.", e);
            Config::default()
        })),
    }
}

async fn connect(config: &Config) -> Result<Database> {
    let db = Database::connect(&config.database).await?;
    db.ping().await.context("database is not reachable")?;
    Ok(db)
}

async fn load_catalog(config: &Config, db: Option<&Database>) -> Result<PermissionCatalog> {
    let catalog = match (config.catalog.source, &config.catalog.seed_path) {
        (CatalogSource::Database, _) => {
            let db = db.context("catalog.source = database requires a database connection")?;
            PermissionCatalog::from_seed(db::catalog::load_seed(db.pool()).await?)?
        }
        (CatalogSource::File, Some(path)) => PermissionCatalog::from_toml_file(path)?,
        (CatalogSource::File, None) => PermissionCatalog::default(),
    };
    Ok(catalog)
}

async fn build_store(config: &Config, db: &Database) -> Result<Arc<OverrideStore>> {
    let catalog = Arc::new(load_catalog(config, Some(db)).await?);
    let repository = Arc::new(PgOverrideRepository::new(db.pool().clone()));
    let directory = Arc::new(PgPrincipalDirectory::new(db.pool().clone(), &config.database)?);

    let mut store = OverrideStore::new(repository, directory, catalog);
    if config.overrides.cache_enabled {
        store = store.with_cache(config.overrides.cache_ttl_chrono());
    }
    Ok(Arc::new(store))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Command Handlers
// ═══════════════════════════════════════════════════════════════════════════════

async fn handle_migrate(config: &Config, output: &OutputHelper) -> Result<()> {
    let db = connect(config).await?;
    db.migrate().await?;
    db.close().await;
    output.print_success("Migrations applied");
    Ok(())
}

async fn handle_seed(config: &Config, path: Option<String>, output: &OutputHelper) -> Result<()> {
    let seed = match path.or_else(|| config.catalog.seed_path.clone()) {
        Some(path) => CatalogSeed::from_toml_file(&path)?,
        None => warden_core::authz::roles::default_seed(),
    };
    // Validate before touching the database.
    PermissionCatalog::from_seed(seed.clone())?;

    let db = connect(config).await?;
    let (permissions, roles, grants) = db::catalog::write_seed(db.pool(), &seed).await?;
    db.close().await;
    output.print_success(&format!(
        "Seeded {} permissions, {} roles, {} role grants",
        permissions, roles, grants
    ));
    Ok(())
}

async fn handle_grant(
    store: &OverrideStore,
    request: GrantRequest,
    output: &OutputHelper,
) -> Result<()> {
    let record = store.grant(request).await?;
    if output.is_json() {
        output.print_json(&record);
    } else {
        output.print_success(&format!(
            "Granted {} to {}{}",
            record.permission,
            record.principal_id,
            record
                .expires_at
                .map(|t| format!(" until {}", t.to_rfc3339()))
                .unwrap_or_default()
        ));
    }
    Ok(())
}

async fn handle_revoke(
    store: &OverrideStore,
    principal: &PrincipalId,
    permission: &str,
    by: Option<&PrincipalId>,
    output: &OutputHelper,
) -> Result<()> {
    let record = store.revoke(principal, permission, by).await?;
    if output.is_json() {
        output.print_json(&record);
    } else {
        output.print_success(&format!("Revoked {} from {}", record.permission, record.principal_id));
    }
    Ok(())
}

async fn handle_check(
    store: Arc<OverrideStore>,
    principal: Principal,
    permission: Option<String>,
    output: &OutputHelper,
) -> Result<()> {
    let resolver = Arc::new(EffectivePermissionResolver::new(store));

    if let Some(permission) = permission {
        let guard = GuardFactory::new(resolver).require_permission(permission.clone());
        let outcome = Guard::<()>::check(&guard, Some(&principal), &()).await;
        if output.is_json() {
            output.print_json(&serde_json::json!({
                "principal_id": principal.id,
                "role": principal.role,
                "permission": permission,
                "outcome": outcome.as_str(),
                "reason": outcome.deny_reason().map(ToString::to_string),
            }));
        } else if outcome.is_allowed() {
            println!("{} {} may {}", "ALLOWED".green().bold(), principal.id, permission);
        } else {
            println!(
                "{} {} may not {} ({})",
                "DENIED".red().bold(),
                principal.id,
                permission,
                outcome
                    .deny_reason()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| outcome.as_str().to_string())
            );
        }
        return Ok(());
    }

    let mut effective: Vec<String> = resolver
        .effective_permissions(Some(&principal))
        .await
        .into_iter()
        .collect();
    effective.sort();

    if output.is_json() {
        output.print_json(&effective);
    } else {
        output.print_header(&format!(
            "Effective permissions of {} ({})",
            principal.id, principal.role
        ));
        for name in effective {
            let source = if resolver.catalog().role_grants(&principal.role, &name) {
                "role".dimmed()
            } else {
                "override".cyan()
            };
            println!("  {:<28} {}", name, source);
        }
    }
    Ok(())
}

async fn handle_list(store: &OverrideStore, principal: &PrincipalId, output: &OutputHelper) -> Result<()> {
    let rows = store.overrides_for(principal).await?;
    if output.is_json() {
        output.print_json(&rows);
    } else {
        let now = store.clock().now();
        output.print_header(&format!("Overrides of {}", principal));
        let views: Vec<OverrideView> = rows.iter().map(|r| OverrideView::new(r, now)).collect();
        output.print_table(&views);
    }
    Ok(())
}

async fn handle_history(
    store: &OverrideStore,
    principal: &PrincipalId,
    permission: Option<&str>,
    output: &OutputHelper,
) -> Result<()> {
    let events = store.history_for(principal, permission).await?;
    if output.is_json() {
        output.print_json(&events);
    } else {
        output.print_header(&format!("Override history of {}", principal));
        let views: Vec<EventView> = events.iter().map(EventView::from).collect();
        output.print_table(&views);
    }
    Ok(())
}

async fn handle_sweep(
    config: &Config,
    store: Arc<OverrideStore>,
    watch: bool,
    output: &OutputHelper,
) -> Result<()> {
    if !watch {
        let count = store.sweep_expired().await?;
        output.print_success(&format!("Swept {} expired overrides", count));
        return Ok(());
    }

    if !config.overrides.sweep_enabled {
        bail!("overrides.sweep_enabled is false");
    }
    let sweeper = ExpirySweeper::spawn(store, config.overrides.sweep_interval);
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    sweeper.shutdown().await;
    output.print_success("Sweeper stopped");
    Ok(())
}

async fn handle_catalog(config: &Config, output: &OutputHelper) -> Result<()> {
    let db = match config.catalog.source {
        CatalogSource::Database => Some(connect(config).await?),
        CatalogSource::File => None,
    };
    let catalog = load_catalog(config, db.as_ref()).await?;

    let views: Vec<PermissionView> = catalog
        .permissions()
        .into_iter()
        .map(|p| {
            let roles: Vec<&str> = catalog
                .roles()
                .into_iter()
                .filter(|r| catalog.role_grants(&r.name, &p.name))
                .map(|r| r.name.as_str())
                .collect();
            PermissionView {
                name: p.name.clone(),
                category: p.category.clone(),
                active: p.is_active,
                roles: roles.join(", "),
                description: p.description.clone(),
            }
        })
        .collect();

    match output.format {
        OutputFormat::Json => output.print_json(&views),
        OutputFormat::Table => output.print_table(&views),
        OutputFormat::Text => {
            for (category, perms) in catalog.permissions_by_category() {
                output.print_header(&category);
                for p in perms {
                    println!("  {:<28} {}", p.name, p.description.dimmed());
                }
            }
            output.print_header("Roles");
            for role in catalog.roles() {
                println!(
                    "  {:<12} {} permissions",
                    role.name.as_str().cyan(),
                    catalog.permissions_for_role(&role.name).len()
                );
            }
        }
    }
    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<OverrideStore>> {
    let db = connect(config).await?;
    build_store(config, &db).await
}

async fn run(cli: Cli, config: Config, output: &OutputHelper) -> Result<()> {
    match cli.command {
        Commands::Migrate => handle_migrate(&config, output).await,
        Commands::Seed { path } => handle_seed(&config, path, output).await,
        Commands::Catalog => handle_catalog(&config, output).await,
        Commands::Grant {
            principal,
            permission,
            by,
            expires_in,
            expires_at,
            reason,
        } => {
            let store = open_store(&config).await?;
            let mut request = GrantRequest::new(principal, permission, by);
            let expires_in = expires_in
                .map(chrono::Duration::from_std)
                .transpose()
                .context("expiry too far in the future")?;
            if let Some(at) = expires_at.or_else(|| expires_in.map(|d| store.clock().now() + d)) {
                request = request.expires_at(at);
            }
            if let Some(reason) = reason {
                request = request.reason(reason);
            }
            handle_grant(&store, request, output).await
        }
        Commands::Revoke {
            principal,
            permission,
            by,
        } => {
            let store = open_store(&config).await?;
            let by = by.map(PrincipalId::from);
            handle_revoke(&store, &principal.into(), &permission, by.as_ref(), output).await
        }
        Commands::Check {
            principal,
            role,
            permission,
        } => {
            let store = open_store(&config).await?;
            handle_check(store, Principal::new(principal, role), permission, output).await
        }
        Commands::List { principal } => {
            let store = open_store(&config).await?;
            handle_list(&store, &principal.into(), output).await
        }
        Commands::History {
            principal,
            permission,
        } => {
            let store = open_store(&config).await?;
            handle_history(&store, &principal.into(), permission.as_deref(), output).await
        }
        Commands::Sweep { watch } => {
            let store = open_store(&config).await?;
            handle_sweep(&config, store, watch, output).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let output = OutputHelper::new(cli.format, cli.no_color);

    let mut config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            output.print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    };
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    if let Err(e) = telemetry::init_logging(&config.logging) {
        eprintln!("Warning: logging not initialized: {}", e);
    }
    telemetry::describe_metrics();

    if let Err(e) = run(cli, config, &output).await {
        output.print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
