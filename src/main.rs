use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use repomirror::config::{Config, Overrides};
use repomirror::daemon::{CheckpointStore, History, SchedulerHandle, UpdateScheduler, now_millis};
use repomirror::mirror::{GitCli, MirrorLock, RemoteProbe, RepositoryMirror};
use repomirror::paths::StatePaths;
use repomirror::protocol::{CheckResult, Envelope};

type Scheduler = UpdateScheduler<RepositoryMirror, RemoteProbe>;
type CmdResult = Result<(), Box<dyn Error>>;

#[derive(Parser)]
#[command(
    name = "repomirror",
    about = "Keep a local git working copy in sync with its upstream"
)]
struct Cli {
    /// Config file (default: <config dir>/repomirror/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Upstream repository URL
    #[arg(long, global = true)]
    source: Option<String>,

    /// Local mirror path
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    /// Tracked branch
    #[arg(long, global = true)]
    branch: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone if needed, then check periodically until interrupted
    Daemon,

    /// Run one check, honoring the staleness window unless forced
    Check {
        #[arg(long)]
        force: bool,
    },

    /// Probe the remote and update now
    Sync,

    /// Clone if missing, otherwise run a normal check
    Ensure,

    /// Show mirror and checkpoint status
    Status,

    /// Show update counters
    Stats,

    /// List files in the mirror
    Files,

    /// Show recent synchronization passes
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Check dependencies and configuration
    Doctor,
}

struct App {
    config: Config,
    paths: StatePaths,
    json: bool,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let json = cli.json;

    let result = load_app(&cli).and_then(|app| match cli.command {
        Commands::Daemon => cmd_daemon(&app),
        Commands::Check { force } => cmd_check(&app, force),
        Commands::Sync => cmd_check(&app, true),
        Commands::Ensure => cmd_ensure(&app),
        Commands::Status => cmd_status(&app),
        Commands::Stats => cmd_stats(&app),
        Commands::Files => cmd_files(&app),
        Commands::History { limit } => cmd_history(&app, limit),
        Commands::Doctor => cmd_doctor(&app),
    });

    if let Err(e) = result {
        if json {
            print_json(&Envelope::<()>::err(e.to_string()));
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

fn load_app(cli: &Cli) -> Result<App, Box<dyn Error>> {
    let defaults = StatePaths::platform_default()
        .ok_or("cannot determine config and data directories")?;
    let (config_file, required) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (defaults.config_file().to_path_buf(), false),
    };
    let paths = StatePaths::new(config_file, defaults.data_dir());

    let mut config = Config::load(paths.config_file(), required)?;
    config.apply(Overrides {
        source_url: cli.source.clone(),
        local_path: cli.path.clone(),
        branch: cli.branch.clone(),
    });

    Ok(App {
        config,
        paths,
        json: cli.json,
    })
}

fn build_scheduler(app: &App) -> Result<Scheduler, Box<dyn Error>> {
    let config = &app.config;
    config.validate()?;

    let mirror = RepositoryMirror::new(&config.source_url, config.local_path(), &config.branch)
        .with_git_timeout(config.git_timeout());
    let probe =
        RemoteProbe::new(&config.source_url, &config.branch).with_timeout(config.probe_timeout());
    let checkpoints = CheckpointStore::new(config.checkpoint_path(&app.paths));

    let scheduler = UpdateScheduler::new(mirror, probe, checkpoints)
        .with_staleness_ceiling(config.staleness_ceiling());

    Ok(match open_history(app) {
        Ok(history) => scheduler.with_history(history),
        Err(e) => {
            log::warn!("Pass history disabled: {}", e);
            scheduler
        }
    })
}

fn open_history(app: &App) -> Result<History, Box<dyn Error>> {
    let path = app.config.history_path(&app.paths);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let history = History::open(&path)?.with_retention(app.config.history_retention);
    Ok(history)
}

fn cmd_daemon(app: &App) -> CmdResult {
    let scheduler = Arc::new(build_scheduler(app)?);
    let state = Arc::new(scheduler.initial_state());

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })?;

    log::info!(
        "Mirroring {} ({}) into {}",
        app.config.source_url,
        app.config.branch,
        app.config.local_path().display()
    );

    let initial = scheduler.ensure_repository(&state);
    report_check(app, &initial);

    let mut handle = SchedulerHandle::spawn(
        Arc::clone(&scheduler),
        Arc::clone(&state),
        app.config.check_interval(),
    )?;

    let _ = shutdown_rx.recv();
    log::info!("Shutdown requested, waiting for in-flight pass");
    handle.shutdown();

    let stats = scheduler.statistics(&state);
    log::info!(
        "Stopped after {}: {} updates, {} errors",
        format_duration(stats.uptime_secs),
        stats.successful_updates,
        stats.errors
    );
    Ok(())
}

fn cmd_check(app: &App, force: bool) -> CmdResult {
    let scheduler = build_scheduler(app)?;
    let state = scheduler.initial_state();
    let result = scheduler.check_for_updates(&state, force);
    finish_check(app, result)
}

fn cmd_ensure(app: &App) -> CmdResult {
    let scheduler = build_scheduler(app)?;
    let state = scheduler.initial_state();
    let result = scheduler.ensure_repository(&state);
    finish_check(app, result)
}

fn finish_check(app: &App, result: CheckResult) -> CmdResult {
    report_check(app, &result);
    if result.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

fn report_check(app: &App, result: &CheckResult) {
    if app.json {
        print_json(&Envelope::from_check(result.clone()));
        return;
    }

    println!("Result: {}", result.reason);
    if let Some(state) = result.state {
        println!("  State:   {}", state);
    }
    if let Some(local) = &result.local {
        println!("  Local:   {}", local.short());
    }
    if let Some(remote) = &result.remote {
        println!("  Remote:  {}", remote.short());
    }
    println!("  Updated: {}", if result.pulled { "yes" } else { "no" });
    if let Some(err) = &result.error {
        println!("  Error:   {}", err);
    }
}

fn cmd_status(app: &App) -> CmdResult {
    let scheduler = build_scheduler(app)?;
    let state = scheduler.initial_state();
    let status = scheduler.status(&state);

    if app.json {
        print_json(&Envelope::ok(status));
        return Ok(());
    }

    let now = now_millis();
    println!("Mirror Status");
    println!("  Source:     {}", app.config.source_url);
    println!("  Branch:     {}", app.config.branch);
    println!("  Path:       {}", status.local_path);
    println!(
        "  Valid:      {}",
        match scheduler.mirror().validate() {
            Ok(()) => "yes".to_string(),
            Err(e) => format!("no ({})", e),
        }
    );
    if let Ok(fp) = scheduler.mirror().local_fingerprint() {
        println!("  Commit:     {}", fp.short());
    }
    println!("  Checking:   {}", if status.is_checking { "yes" } else { "no" });
    println!(
        "  Last check: {}",
        status
            .last_checkpoint
            .map(|ts| format_ago(now, ts))
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "  Next check: {}",
        match status.next_check_due {
            Some(due) if due > now => format!("in {}", format_duration((due - now) / 1000)),
            _ => "due now".to_string(),
        }
    );

    Ok(())
}

fn cmd_stats(app: &App) -> CmdResult {
    let scheduler = build_scheduler(app)?;
    let state = scheduler.initial_state();
    let stats = scheduler.statistics(&state);

    if app.json {
        print_json(&Envelope::ok(stats));
        return Ok(());
    }

    println!("Scheduler Statistics");
    println!("  Updates:      {}", stats.successful_updates);
    println!("  Errors:       {}", stats.errors);
    println!("  Success rate: {:.1}%", stats.success_rate);
    println!("  Updates/hour: {:.2}", stats.updates_per_hour);
    println!("  Uptime:       {}", format_duration(stats.uptime_secs));

    Ok(())
}

fn cmd_files(app: &App) -> CmdResult {
    let scheduler = build_scheduler(app)?;
    let listing = scheduler.list_files()?;

    if app.json {
        print_json(&Envelope::ok(listing));
        return Ok(());
    }

    for file in &listing.files {
        println!("{}", file);
    }
    Ok(())
}

fn cmd_history(app: &App, limit: u32) -> CmdResult {
    let history = open_history(app)?;
    let passes = history.recent(limit)?;

    if app.json {
        print_json(&Envelope::ok(passes));
        return Ok(());
    }

    if passes.is_empty() {
        println!("No passes recorded");
        return Ok(());
    }

    let now = now_millis();
    println!(
        "{:<12} {:<16} {:>6} {:>10} {:<12}",
        "WHEN", "REASON", "FORCED", "DURATION", "COMMIT"
    );
    println!("{}", "-".repeat(60));

    for pass in passes {
        let commit = pass
            .local
            .as_deref()
            .map(|fp| fp.chars().take(12).collect::<String>())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<16} {:>6} {:>10} {:<12}",
            format_ago(now, pass.started_at),
            pass.reason,
            if pass.forced { "yes" } else { "no" },
            format!("{}ms", pass.finished_at.saturating_sub(pass.started_at)),
            commit
        );
        if let Some(err) = pass.error {
            println!("    {}", err);
        }
    }

    Ok(())
}

fn cmd_doctor(app: &App) -> CmdResult {
    println!("repomirror System Check\n");

    let git_ok = GitCli::new().is_available();
    println!(
        "[{}] git: {}",
        if git_ok { "OK" } else { "FAIL" },
        if git_ok { "available" } else { "not found" }
    );

    let config_ok = match app.config.validate() {
        Ok(()) => {
            println!("[OK] Config: {}", app.paths.config_file().display());
            true
        }
        Err(e) => {
            println!("[FAIL] Config: {}", e);
            false
        }
    };

    if config_ok {
        let scheduler = build_scheduler(app)?;
        match scheduler.mirror().validate() {
            Ok(()) => println!("[OK] Mirror: {}", app.config.local_path().display()),
            Err(e) => println!("[INFO] Mirror: {} (run `repomirror ensure`)", e),
        }

        match MirrorLock::try_acquire(scheduler.mirror().local_path()) {
            Ok(Some(lock)) => println!("[OK] Mirror lock: free ({})", lock.path().display()),
            Ok(None) => println!("[INFO] Mirror lock: held by another process"),
            Err(e) => println!("[FAIL] Mirror lock: {}", e),
        }

        let checkpoint = app.config.checkpoint_path(&app.paths);
        match CheckpointStore::new(&checkpoint).load() {
            Some(ts) => println!("[OK] Last check: {}", format_ago(now_millis(), ts)),
            None => println!("[INFO] Last check: never ({})", checkpoint.display()),
        }
    }

    if !git_ok || !config_ok {
        std::process::exit(1);
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error: failed to serialize result: {}", e),
    }
}

fn format_ago(now_ms: u64, then_ms: u64) -> String {
    format!("{} ago", format_duration(now_ms.saturating_sub(then_ms) / 1000))
}

fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
