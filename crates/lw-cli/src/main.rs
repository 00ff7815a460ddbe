//! Listwarden CLI
//!
//! Manages filter list subscriptions, the allow-list and the content
//! blocker they are merged into.

mod config;
mod http;
mod local_host;
mod snapshot;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use lw_core::{DirCache, ExtensionRequestHandler, FileStore, ListSelection, Settings, Subscription};
use lw_merger::{merge, parse_rule_list};
use lw_sync::{
    ActivationProbe, CheckOutcome, SyncError, UpdateCoordinator, UpdateEvent, UpdateRequest,
};

use crate::config::{hours, Config};
use crate::http::HttpTransport;
use crate::local_host::LocalHost;
use crate::snapshot::Snapshot;

#[derive(Parser)]
#[command(name = "listwarden")]
#[command(about = "Listwarden filter list subscriptions and content blocker tools")]
struct Cli {
    /// Config file (default: <config dir>/listwarden/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show subscriptions, allow-list and activation state
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download subscriptions and rebuild the content blocker
    Update {
        /// Treat as a user request: failures are reported
        #[arg(short, long)]
        user: bool,

        /// Subscriptions to update (default: all outdated)
        names: Vec<String>,
    },

    /// List subscriptions whose content has expired
    Outdated,

    /// Add a subscription
    Subscribe {
        name: String,
        url: String,

        /// Hours before the downloaded list is considered outdated
        #[arg(long, default_value_t = 24)]
        expires_hours: u64,
    },

    /// Remove a subscription and rebuild the content blocker
    Unsubscribe { name: String },

    /// Manage hosts exempt from blocking
    Allow {
        #[command(subcommand)]
        action: AllowAction,
    },

    /// Use the default list variant that shows acceptable ads
    AcceptableAds {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Use the plain default list when acceptable ads are off
    DefaultList {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Probe whether the content-blocker extension is active
    CheckActivation,

    /// Merge rule list files into a ruleset offline
    Merge {
        /// Input rule list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Allow-listed hosts
        #[arg(short, long)]
        allow: Vec<String>,

        /// Output ruleset file
        #[arg(short, long, default_value = "ruleset.json")]
        output: String,

        /// Maximum number of rules in the output
        #[arg(long)]
        max_rules: Option<usize>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Run one content-blocker extension request
    Extension,

    /// Keep subscriptions current until interrupted
    Watch {
        /// Minutes between update checks
        #[arg(long, default_value_t = 60)]
        interval_mins: u64,
    },
}

#[derive(Subcommand)]
enum AllowAction {
    /// Exempt a host from blocking
    Add { host: String },
    /// Remove a host from the allow-list
    Remove { host: String },
    /// List allow-listed hosts
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        matches!(self, Self::On)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = Config::load(cli.config.as_deref()).and_then(|config| run(cli.command, config));

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(command: Commands, config: Config) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;

    runtime.block_on(async move {
        match command {
            Commands::Status { json } => cmd_status(&App::open(config)?, json),
            Commands::Update { user, names } => cmd_update(&App::open(config)?, user, &names).await,
            Commands::Outdated => cmd_outdated(&App::open(config)?),
            Commands::Subscribe {
                name,
                url,
                expires_hours,
            } => cmd_subscribe(&App::open(config)?, &name, &url, expires_hours),
            Commands::Unsubscribe { name } => cmd_unsubscribe(&App::open(config)?, &name).await,
            Commands::Allow { action } => cmd_allow(&App::open(config)?, action).await,
            Commands::AcceptableAds { state } => {
                cmd_select(&App::open(config)?, Selection::AcceptableAds, state).await
            }
            Commands::DefaultList { state } => {
                cmd_select(&App::open(config)?, Selection::DefaultList, state).await
            }
            Commands::CheckActivation => cmd_check_activation(&App::open(config)?).await,
            Commands::Merge {
                input,
                allow,
                output,
                max_rules,
                verbose,
            } => cmd_merge(&config, &input, &allow, &output, max_rules, verbose),
            Commands::Extension => cmd_extension(&App::open(config)?),
            Commands::Watch { interval_mins } => cmd_watch(&App::open(config)?, interval_mins).await,
        }
    })
}

// =============================================================================
// Shared Container
// =============================================================================

/// The settings store and list cache shared with the extension, plus the
/// in-process host that stands in for the platform.
struct App {
    config: Config,
    settings: Settings,
    cache: Arc<DirCache>,
    host: Arc<LocalHost>,
}

impl App {
    fn open(config: Config) -> Result<Self, String> {
        let lists_dir = config.lists_dir();
        fs::create_dir_all(&lists_dir)
            .map_err(|e| format!("Failed to create '{}': {}", lists_dir.display(), e))?;

        let settings = Settings::new(Arc::new(FileStore::new(config.settings_path())));
        let cache = Arc::new(DirCache::new(lists_dir));
        let host = Arc::new(LocalHost::new(settings.clone(), cache.clone()));

        Ok(Self {
            config,
            settings,
            cache,
            host,
        })
    }

    fn snapshot(&self) -> Result<Snapshot, String> {
        Snapshot::load(&self.settings).map_err(|e| format!("Failed to read settings: {}", e))
    }

    fn coordinator(&self) -> Result<UpdateCoordinator, String> {
        let updater = self.config.updater_config();
        let transport = HttpTransport::new(updater.download_timeout)?;
        UpdateCoordinator::new(
            updater,
            self.settings.clone(),
            self.cache.clone(),
            Arc::new(transport),
            self.host.clone(),
        )
        .map_err(|e| format!("Failed to load subscriptions: {}", e))
    }

    fn probe(&self) -> Result<ActivationProbe, String> {
        ActivationProbe::new(self.config.probe_config(), self.settings.clone(), self.host.clone())
            .map_err(|e| format!("Failed to load activation state: {}", e))
    }
}

// =============================================================================
// Commands
// =============================================================================

fn cmd_status(app: &App, json: bool) -> Result<(), String> {
    let snapshot = app.snapshot()?;

    if json {
        let text = serde_json::to_string_pretty(&snapshot.to_json())
            .map_err(|e| format!("Failed to encode status: {}", e))?;
        println!("{}", text);
        return Ok(());
    }

    let now = Utc::now();
    println!("Subscriptions: {}", snapshot.subscriptions.len());
    for sub in &snapshot.subscriptions {
        let state = if snapshot.is_active(sub) {
            subscription_state(sub, now)
        } else {
            format!("inactive {}", sub.role.as_str())
        };
        println!("  {:<20} {}", sub.name, state);
        println!("  {:<20} {}", "", sub.url());
    }
    println!("  Acceptable ads: {}", on_off(snapshot.selection.acceptable_ads));
    println!("  Default list:   {}", on_off(snapshot.selection.default_list_enabled));
    println!();

    println!("Allow-list: {} hosts", snapshot.allow_list.len());
    for host in snapshot.allow_list.iter() {
        println!("  {}", host);
    }
    println!();

    let activation = &snapshot.activation;
    println!("Content blocker:");
    match snapshot.last_update {
        Some(at) => println!("  Last merge:  {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last merge:  never"),
    }
    match app.host.installed_rule_count()? {
        Some(count) => println!("  Installed:   {} rules", count),
        None => println!("  Installed:   nothing"),
    }
    println!("  Activated:   {}", if activation.activated { "yes" } else { "no" });
    if let Some(at) = activation.last_activity {
        println!("  Confirmed:   {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn subscription_state(sub: &Subscription, now: chrono::DateTime<Utc>) -> String {
    if sub.updating {
        return "updating".to_string();
    }
    let mut state = match (sub.downloaded, sub.last_update) {
        (false, _) | (_, None) => "never downloaded".to_string(),
        (true, Some(at)) if sub.is_expired(now) => {
            format!("outdated (updated {})", at.format("%Y-%m-%d %H:%M"))
        }
        (true, Some(at)) => format!("current (updated {})", at.format("%Y-%m-%d %H:%M")),
    };
    if let (true, Some(kind)) = (sub.last_update_failed, sub.last_failure) {
        state.push_str(&format!(", last attempt failed ({})", kind.as_str()));
    }
    state
}

async fn cmd_update(app: &App, user: bool, names: &[String]) -> Result<(), String> {
    let coordinator = app.coordinator()?;
    let mut events = coordinator.subscribe_events();
    let start = Instant::now();

    let request = if names.is_empty() {
        coordinator.update_active_subscriptions(user)
    } else {
        for name in names {
            if coordinator.subscription(name).is_none() {
                return Err(SyncError::UnknownSubscription(name.clone()).to_string());
            }
        }
        coordinator.update_subscriptions(names, user)
    };

    let (generation, members) = match request {
        UpdateRequest::NothingToDo => {
            println!("All subscriptions are up to date");
            return Ok(());
        }
        UpdateRequest::Started {
            generation,
            mut started,
            joined,
        } => {
            started.extend(joined);
            (generation, started)
        }
    };
    println!("Updating {} subscriptions ({})", members.len(), generation);

    let mut problems = Vec::new();
    let changed = loop {
        match events.recv().await {
            Ok(UpdateEvent::Settled {
                generation: settled,
                changed,
                ..
            }) if settled == generation => break changed,
            Ok(UpdateEvent::UpdateFailed(report)) => {
                for failure in &report.failures {
                    problems.push(format!(
                        "'{}' failed to update ({}): {}",
                        failure.name,
                        failure.kind.as_str(),
                        failure.detail
                    ));
                }
            }
            Ok(UpdateEvent::MergeFailed { message, capacity, .. }) => {
                let hint = if capacity { " (too many rules, remove a subscription)" } else { "" };
                problems.push(format!("Failed to build ruleset{}: {}", hint, message));
            }
            Ok(UpdateEvent::ReloadFailed { message }) => {
                problems.push(format!("Failed to reload content blocker: {}", message));
            }
            Ok(UpdateEvent::Settled { .. }) => {}
            Err(RecvError::Lagged(skipped)) => log::warn!("Missed {} coordinator events", skipped),
            Err(RecvError::Closed) => return Err("Coordinator stopped before the update settled".to_string()),
        }
    };

    let now = Utc::now();
    for name in &members {
        if let Some(sub) = coordinator.subscription(name) {
            println!("  {:<20} {}", sub.name, subscription_state(&sub, now));
        }
    }
    println!(
        "Finished in {:.1}s, ruleset {}",
        start.elapsed().as_secs_f64(),
        if changed { "rebuilt" } else { "unchanged" }
    );

    if problems.is_empty() {
        return Ok(());
    }
    coordinator.dismiss_failure();
    Err(problems.join("\n  "))
}

fn cmd_outdated(app: &App) -> Result<(), String> {
    let snapshot = app.snapshot()?;
    let outdated = snapshot.outdated(Utc::now());
    if outdated.is_empty() {
        println!("No outdated subscriptions");
    }
    for sub in outdated {
        println!("{}", sub.name);
    }
    Ok(())
}

fn cmd_subscribe(app: &App, name: &str, url: &str, expires_hours: u64) -> Result<(), String> {
    let coordinator = app.coordinator()?;
    coordinator
        .subscribe(name, url, hours(expires_hours))
        .map_err(|e| e.to_string())?;
    println!("Subscribed to '{}', run `listwarden update` to download it", name);
    Ok(())
}

async fn cmd_unsubscribe(app: &App, name: &str) -> Result<(), String> {
    let coordinator = app.coordinator()?;
    coordinator.unsubscribe(name).await.map_err(|e| e.to_string())?;
    println!("Unsubscribed from '{}'", name);
    Ok(())
}

async fn cmd_allow(app: &App, action: AllowAction) -> Result<(), String> {
    if let AllowAction::List = action {
        for host in app.snapshot()?.allow_list.iter() {
            println!("{}", host);
        }
        return Ok(());
    }

    let coordinator = app.coordinator()?;
    match action {
        AllowAction::Add { host } => {
            if coordinator.allow_host(&host).await.map_err(|e| e.to_string())? {
                println!("Allowed '{}'", host);
            } else {
                println!("'{}' is already allowed", host);
            }
        }
        AllowAction::Remove { host } => {
            if !coordinator.disallow_host(&host).await.map_err(|e| e.to_string())? {
                return Err(format!("'{}' is not on the allow-list", host));
            }
            println!("Removed '{}' from the allow-list", host);
        }
        AllowAction::List => {}
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Selection {
    AcceptableAds,
    DefaultList,
}

async fn cmd_select(app: &App, selection: Selection, state: Toggle) -> Result<(), String> {
    let coordinator = app.coordinator()?;
    let mut events = coordinator.subscribe_events();
    let enabled = state.enabled();
    let request = match selection {
        Selection::AcceptableAds => coordinator.set_acceptable_ads(enabled).await,
        Selection::DefaultList => coordinator.set_default_list_enabled(enabled).await,
    }
    .map_err(|e| e.to_string())?;

    let ListSelection {
        acceptable_ads,
        default_list_enabled,
    } = coordinator.list_selection();
    println!(
        "Acceptable ads {}, default list {}",
        on_off(acceptable_ads),
        on_off(default_list_enabled)
    );

    // Downloads stop with the process, so wait for them here.
    if let UpdateRequest::Started { generation, started, .. } = request {
        println!("Updating {} outdated subscriptions ({})", started.len(), generation);
        loop {
            match events.recv().await {
                Ok(UpdateEvent::Settled { generation: settled, .. }) if settled == generation => break,
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => log::warn!("Missed {} coordinator events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}

async fn cmd_check_activation(app: &App) -> Result<(), String> {
    let probe = app.probe()?;
    match probe.check_activation().await {
        CheckOutcome::Fresh => {
            let confirmed = probe
                .state()
                .last_activity
                .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_default();
            println!("Extension active (confirmed {})", confirmed);
        }
        CheckOutcome::AlreadyRunning => println!("An activity test is already running"),
        CheckOutcome::Confirmed { follow_up_reload } => {
            println!("Extension active");
            if let Err(e) = follow_up_reload {
                eprintln!("Warning: ruleset reload after the activity test failed: {}", e);
            }
        }
        CheckOutcome::TimedOut(failure) => {
            let previously = if probe.is_activated() { "last known active" } else { "never confirmed" };
            return Err(format!("Extension not confirmed ({}): {}", previously, failure));
        }
    }
    Ok(())
}

fn cmd_merge(
    config: &Config,
    inputs: &[String],
    allow: &[String],
    output: &str,
    max_rules: Option<usize>,
    verbose: bool,
) -> Result<(), String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    let start = Instant::now();
    let mut payloads = Vec::with_capacity(inputs.len());
    for (index, path) in inputs.iter().enumerate() {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {}", path, e))?;
        if verbose {
            println!(
                "  [{}] {} - {} bytes",
                index,
                Path::new(path).file_name().unwrap_or_default().to_string_lossy(),
                content.len()
            );
        }
        payloads.push(content);
    }

    let mut limits = config.merge_limits();
    if let Some(max_rules) = max_rules {
        limits.max_rules = max_rules;
    }

    let ruleset = merge(&payloads, allow, &limits).map_err(|e| match e {
        lw_merger::MergeError::InvalidPayload { index, source } => {
            format!("Invalid rule list '{}': {}", inputs[index], source)
        }
        other => other.to_string(),
    })?;

    fs::write(output, &ruleset.json)
        .map_err(|e| format!("Failed to write '{}': {}", output, e))?;

    println!("Merged {} rule lists to '{}'", inputs.len(), output);
    println!(
        "  Rules:    {} (lists: {}, exceptions: {}, dedupe removed {})",
        ruleset.rule_count, ruleset.subscription_rules, ruleset.exception_rules, ruleset.deduped
    );
    println!("  Size:     {} bytes ({:.1} KB)", ruleset.json.len(), ruleset.json.len() as f64 / 1024.0);
    println!("  Digest:   {:016x}", ruleset.digest);
    println!("  Time:     {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    Ok(())
}

fn cmd_extension(app: &App) -> Result<(), String> {
    let handler = ExtensionRequestHandler::new(app.settings.clone(), app.cache.clone());
    match handler.begin_request() {
        Ok(ruleset) => {
            let rules = parse_rule_list(&ruleset).map_err(|e| format!("Ruleset is invalid: {}", e))?;
            println!("Served {} rules ({} bytes)", rules.len(), ruleset.len());
            Ok(())
        }
        Err(e) if e.is_activity_test_sentinel() => {
            println!("Aborted for activity test");
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    }
}

async fn cmd_watch(app: &App, interval_mins: u64) -> Result<(), String> {
    if interval_mins == 0 {
        return Err("Interval must be at least one minute".to_string());
    }

    let coordinator = app.coordinator()?;
    let probe = app.probe()?;
    coordinator.attach_probe(&probe);

    let mut events = coordinator.subscribe_events();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => log::warn!("Missed {} coordinator events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    match probe.check_activation().await {
        CheckOutcome::TimedOut(failure) => log::warn!("Extension not confirmed: {}", failure),
        outcome => log::info!("Activation check: {:?}", outcome),
    }

    let updates = coordinator.spawn_periodic_updates(Duration::from_secs(interval_mins * 60));
    log::info!("Watching subscriptions every {} minutes", interval_mins);

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to wait for Ctrl-C: {}", e))?;

    log::info!("Shutting down");
    updates.abort();
    logger.abort();
    Ok(())
}

fn log_event(event: &UpdateEvent) {
    match event {
        UpdateEvent::Settled {
            generation,
            changed,
            failed,
        } => log::info!("{} settled (changed: {}, failed: {})", generation, changed, failed),
        UpdateEvent::UpdateFailed(report) => {
            log::warn!("{} failed: {}", report.generation, report.names().collect::<Vec<_>>().join(", "))
        }
        UpdateEvent::MergeFailed { message, .. } => log::error!("Failed to build ruleset: {}", message),
        UpdateEvent::ReloadFailed { message } => log::error!("Failed to reload content blocker: {}", message),
    }
}
