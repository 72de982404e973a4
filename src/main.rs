use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use forkupdate::health::CheckResult;
use forkupdate::{Config, Credentials, HealthCheck, SyncEngine, SyncResult};

#[derive(Parser)]
#[command(name = "forkupdate")]
#[command(about = "Keep GitHub forks in sync with their upstream repositories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// GitHub username, used when GITHUB_USERNAME is not set
    #[arg(long, global = true)]
    username: Option<String>,

    /// GitHub access token, used when GITHUB_TOKEN is not set
    #[arg(long, global = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reset every fork onto its parent's default branch (default)
    Sync {
        /// Show what would be done without running git
        #[arg(long)]
        dry_run: bool,
    },

    /// List the forks that would be synced
    List {
        /// Show default branches
        #[arg(long)]
        details: bool,
    },

    /// Offline preflight checks
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    init_logging(cli.verbose, &config.logging.level);
    info!("Starting forkupdate v{}", env!("CARGO_PKG_VERSION"));

    let credentials = Credentials::resolve(cli.username.as_deref(), cli.token.as_deref(), &config);

    match cli.command.unwrap_or(Commands::Sync { dry_run: false }) {
        Commands::Sync { dry_run } => cmd_sync(dry_run, config, credentials?).await,
        Commands::List { details } => cmd_list(details, config, credentials?).await,
        Commands::Doctor => cmd_doctor(&config, &credentials),
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool, default_level: &str) {
    let level = if verbose { "debug" } else { default_level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Synchronize every fork, or preview the plan
async fn cmd_sync(dry_run: bool, config: Config, credentials: Credentials) -> Result<()> {
    let engine = SyncEngine::connect(config, &credentials)?;

    if dry_run {
        println!("🔍 Dry run - no git commands will be executed");

        for planned in engine.dry_run().await? {
            match planned.plan {
                Ok(plan) => {
                    println!("📁 {} ← {}", plan.fork, plan.parent);
                    println!("   clone:  {}", plan.clone_url);
                    println!("   fetch:  {} {}", plan.upstream_url, plan.upstream_branch);
                    println!("   push:   origin {} (force)", plan.fork_branch);
                }
                Err(e) => println!("❌ {}: {:#}", planned.repo, e),
            }
        }

        return Ok(());
    }

    let summary = engine.run().await?;

    println!("\n🎉 Fork synchronization complete");
    println!("   📊 Repositories: {}", summary.total_repositories);
    println!("   🍴 Forks: {}", summary.forks);
    println!("   ✅ Updated: {}", summary.updated);
    println!("   ❌ Failed: {}", summary.failed);
    println!("   ⏭️  Skipped: {}", summary.skipped);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    if summary.failed > 0 {
        println!("\n🔍 Failed forks:");
        for result in &summary.results {
            if let SyncResult::Failed { repo, stage, error } = result {
                println!("   ❌ {} (after {:?}): {}", repo, stage, error);
            }
        }
    }

    Ok(())
}

/// List the forks that would be synced
async fn cmd_list(details: bool, config: Config, credentials: Credentials) -> Result<()> {
    let engine = SyncEngine::connect(config, &credentials)?;
    let forks = engine.list_forks().await?;

    println!("Forks ({}):", forks.len());

    for fork in forks {
        if details {
            println!("📁 {}", fork.full_name);
            if let Some(branch) = &fork.default_branch {
                println!("   🌿 Default branch: {}", branch);
            }
        } else {
            println!("  📁 {}", fork.full_name);
        }
    }

    Ok(())
}

/// Offline diagnostics
fn cmd_doctor(config: &Config, credentials: &Result<Credentials>) -> Result<()> {
    let health = HealthCheck::run(config, credentials);
    print_health_report(&health);

    if !health.all_passed() {
        anyhow::bail!("preflight checks failed");
    }
    Ok(())
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 forkupdate System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    let warnings = health.warnings().len();
    if health.all_passed() && warnings > 0 {
        println!("✅ All checks passed ({} warning(s))", warnings);
    } else if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
