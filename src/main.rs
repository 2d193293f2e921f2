use civic_ledger::cli::{Cli, Commands, ConfigAction};
use civic_ledger::clustering;
use civic_ledger::complaints::{Actor, ComplaintStatus, GeoPoint, NewComplaint};
use civic_ledger::config::{expand_path, Config};
use civic_ledger::daemon::{
    status_of, Daemon, DaemonInfo, DaemonStatus, IpcClient, IpcMessage, IpcResponse,
    ProcessManager,
};
use civic_ledger::department::Department;
use civic_ledger::error::{CivicError, Result};
use civic_ledger::ledger::LedgerQuery;
use civic_ledger::pipeline::Submission;
use civic_ledger::reconcile;
use civic_ledger::storage::{format_timestamp, StorageManager, StorageStats};
use serde::Serialize;
use std::path::PathBuf;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Start {
            foreground,
            profile,
        } => cmd_start(cli.config, foreground, profile),
        Commands::Stop => cmd_stop(cli.config),
        Commands::Status => cmd_status(cli.config),
        Commands::Submit {
            category,
            description,
            lat,
            lng,
            user,
            role,
            tags,
        } => {
            let mut complaint = NewComplaint::new(category, description);
            if let Some(location) = GeoPoint::from_parts(lat, lng)? {
                complaint = complaint.at(location);
            }
            complaint.tags = tags;

            let mut actor = Actor::new(user);
            if let Some(role) = role {
                actor = actor.with_role(role);
            }
            cmd_submit(cli.config, actor, complaint)
        }
        Commands::SetStatus { id, status, user } => {
            let status: ComplaintStatus = status.parse()?;
            let response = send(
                cli.config,
                IpcMessage::UpdateStatus {
                    actor: Actor::new(user),
                    id,
                    status,
                },
            )?;
            print_message(&response);
            Ok(())
        }
        Commands::Assign {
            id,
            department,
            user,
        } => {
            let response = send(
                cli.config,
                IpcMessage::Assign {
                    actor: Actor::new(user),
                    id,
                    department: Department::from_label(&department),
                },
            )?;
            print_message(&response);
            Ok(())
        }
        Commands::Delete { ids, user } => {
            let actor = Actor::new(user);
            let message = match ids.as_slice() {
                [id] => IpcMessage::Delete { actor, id: *id },
                _ => IpcMessage::BulkDelete { actor, ids },
            };
            let response = send(cli.config, message)?;
            print_message(&response);
            Ok(())
        }
        Commands::Complaints { department, json } => cmd_complaints(cli.config, department, json),
        Commands::Hotspots { threshold, json } => cmd_hotspots(cli.config, threshold, json),
        Commands::Ledger {
            department,
            complaint,
            limit,
            ascending,
            json,
        } => {
            let query = LedgerQuery {
                department,
                complaint_id: complaint,
                limit,
                ascending,
            };
            cmd_ledger(cli.config, &query, json)
        }
        Commands::Verify => cmd_verify(cli.config),
        Commands::Repair => cmd_repair(cli.config),
        Commands::Config { action } => cmd_config(cli.config, action),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "civic_ledger=debug"
    } else {
        "civic_ledger=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn cmd_start(config_path: Option<PathBuf>, foreground: bool, profile: Option<String>) -> Result<()> {
    let config = load_config(config_path, profile)?;
    tracing::info!("Configuration loaded successfully");

    let socket = expand_path(&config.daemon.socket_path);
    let mut daemon = Daemon::new(config)?;

    if foreground {
        println!("✓ Starting civic-ledger daemon in the foreground");
        println!("  Socket: {}", socket.display());
        return runtime()?.block_on(daemon.run_foreground());
    }

    println!("✓ Starting civic-ledger daemon...");
    println!("  Socket: {}", socket.display());

    // Forks; only the child returns from here, once the daemon exits
    daemon.start_daemon()
}

fn cmd_stop(config_path: Option<PathBuf>) -> Result<()> {
    use std::thread::sleep;
    use std::time::Duration;

    let config = load_config(config_path, None)?;
    let pm = ProcessManager::new(expand_path(&config.daemon.pid_file));
    if !pm.is_running() {
        println!("Daemon is not running");
        return Ok(());
    }

    // The daemon drains pending classifications on SIGTERM
    println!("Sending SIGTERM to daemon...");
    pm.signal(nix::sys::signal::Signal::SIGTERM)?;

    for i in 0..10 {
        sleep(Duration::from_millis(500));
        if !pm.is_running() {
            println!("✓ Daemon stopped gracefully");
            return Ok(());
        }
        if i < 9 {
            print!(".");
            use std::io::Write;
            std::io::stdout().flush().ok();
        }
    }

    println!("\nDaemon not responding, sending SIGKILL...");
    pm.signal(nix::sys::signal::Signal::SIGKILL)?;
    sleep(Duration::from_millis(500));

    if !pm.is_running() {
        println!("✓ Daemon force killed");
        // A killed daemon cannot clean up after itself
        pm.release()?;
    } else {
        println!("⚠ Warning: Daemon may still be running (PID file stale)");
    }

    Ok(())
}

fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path, None)?;
    let pm = ProcessManager::new(expand_path(&config.daemon.pid_file));

    println!("Civic Ledger Status");
    println!("===================");

    match status_of(&pm) {
        DaemonStatus::Stopped => {
            println!("\nDaemon: Stopped");
            let storage = open_storage(&config)?;
            let stats = storage.stats()?;
            println!("\nComplaints: {}", stats.db.complaint_count);
            println!("Ledger blocks: {}", stats.db.block_count);
            println!(
                "Data size: {}",
                StorageStats::format_size(stats.data_dir_size)
            );
        }
        DaemonStatus::Running { pid } => {
            match pid {
                Some(pid) => println!("\nDaemon: Running (PID: {})", pid),
                None => println!("\nDaemon: Running"),
            }

            let client = IpcClient::new(expand_path(&config.daemon.socket_path));
            let response = runtime()?.block_on(client.send(&IpcMessage::Status))?;
            let info: DaemonInfo = response.data_as()?;

            println!("  Started: {}", format_timestamp(&info.started_at));
            println!("  Uptime: {}s", info.uptime_secs);
            println!("\nComplaints: {}", info.storage.complaint_count);
            println!("Ledger blocks: {}", info.storage.block_count);
            println!("\nPipeline:");
            println!("  Submitted:  {}", info.pipeline.submitted);
            println!("  Verified:   {}", info.pipeline.verified);
            println!("  Reassigned: {}", info.pipeline.reassigned);
            println!("  Confirmed:  {}", info.pipeline.confirmed);
            println!("  Fallback:   {}", info.pipeline.fallback);
            println!("  Unchanged:  {}", info.pipeline.unchanged);
            println!("  Dropped:    {}", info.pipeline.dropped);
            if info.pipeline.ledger_errors > 0 {
                println!(
                    "  ⚠ Ledger write failures: {} (run `civic-ledger repair`)",
                    info.pipeline.ledger_errors
                );
            }
            if info.pipeline.store_errors > 0 {
                println!(
                    "  ⚠ Classifications not stored: {}",
                    info.pipeline.store_errors
                );
            }
        }
    }

    Ok(())
}

fn cmd_submit(config_path: Option<PathBuf>, actor: Actor, complaint: NewComplaint) -> Result<()> {
    let response = send(config_path, IpcMessage::Submit { actor, complaint })?;
    let submission: Submission = response.data_as()?;
    let complaint = &submission.complaint;

    println!("✓ Complaint #{} filed", complaint.id);
    if let Some(dept) = &complaint.assigned_dept {
        println!("  Department: {}", dept);
    }
    if let Some(receipt) = &submission.filed {
        println!("  Ledger block: {} ({})", receipt.index, short_hash(&receipt.hash));
    }
    if submission.awaiting_classification {
        println!("  Classification pending");
    }

    Ok(())
}

fn cmd_complaints(config_path: Option<PathBuf>, department: Option<String>, json: bool) -> Result<()> {
    let config = load_config(config_path, None)?;
    let storage = open_storage(&config)?;

    let complaints = match department {
        Some(label) => storage
            .complaints
            .list_by_department(&Department::from_label(&label))?,
        None => storage.complaints.list()?,
    };

    if json {
        return print_json(&complaints);
    }

    if complaints.is_empty() {
        println!("No complaints");
        return Ok(());
    }

    for c in &complaints {
        let dept = c
            .assigned_dept
            .as_ref()
            .map(|d| d.label().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "#{:<5} {:<12} {:<16} {:<12} {}",
            c.id,
            c.status.as_str(),
            dept,
            c.category,
            c.description
        );
    }

    Ok(())
}

fn cmd_hotspots(config_path: Option<PathBuf>, threshold: Option<f64>, json: bool) -> Result<()> {
    let config = load_config(config_path, None)?;
    let storage = open_storage(&config)?;

    let threshold = threshold.unwrap_or(config.clustering.threshold_degrees);
    let groups = clustering::group(&storage.complaints.list_located()?, threshold);

    if json {
        return print_json(&groups);
    }

    if groups.is_empty() {
        println!("No located complaints");
        return Ok(());
    }

    for g in &groups {
        println!(
            "{:<10} ({:.5}, {:.5})  {} complaint(s){}",
            g.id,
            g.center.lat,
            g.center.lng,
            g.count,
            if g.is_group { "  ⚑ hotspot" } else { "" }
        );
    }

    Ok(())
}

fn cmd_ledger(config_path: Option<PathBuf>, query: &LedgerQuery, json: bool) -> Result<()> {
    let config = load_config(config_path, None)?;
    let storage = open_storage(&config)?;
    let blocks = storage.ledger.query(query)?;

    if json {
        return print_json(&blocks);
    }

    for b in &blocks {
        let complaint = b
            .payload
            .complaint_id
            .map(|id| format!("#{}", id))
            .unwrap_or_default();
        println!(
            "{:>5}  {}  {:<16} {:<18} {:<6} {}",
            b.index,
            format_timestamp(&b.timestamp),
            b.department,
            b.payload.action.as_str(),
            complaint,
            short_hash(&b.hash)
        );
    }

    Ok(())
}

fn cmd_verify(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path, None)?;
    let storage = open_storage(&config)?;

    match storage.ledger.verify() {
        Ok(report) => {
            println!("✓ Ledger intact: {} blocks", report.blocks_checked);
            if let Some(tip) = report.tip_hash {
                println!("  Tip: {}", tip);
            }
            Ok(())
        }
        Err(e) if e.is_integrity_failure() => {
            println!("✗ {}", e);
            Err(e)
        }
        Err(e) => Err(e),
    }
}

fn cmd_repair(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path, None)?;
    let storage = open_storage(&config)?;

    let report = reconcile::repair(
        &storage.complaints,
        &storage.ledger,
        &config.default_department(),
    )?;
    println!(
        "✓ Scanned {} complaints, added {} blocks",
        report.scanned, report.blocks_added
    );
    for failure in &report.failed {
        println!("  ✗ #{}: {}", failure.complaint_id, failure.error);
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, None)?;
            let text = toml::to_string_pretty(&config)?;
            println!("{}", text);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let mut config = Config::load_or_default(config_path.as_deref())?;
    if let Some(profile) = profile {
        config.apply_profile(&profile)?;
        tracing::info!("Using profile: {}", profile);
    }
    Ok(config)
}

fn open_storage(config: &Config) -> Result<StorageManager> {
    StorageManager::new(expand_path(&config.storage.data_dir))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| CivicError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

/// Send one request to the daemon; an error response becomes an error
fn send(config_path: Option<PathBuf>, message: IpcMessage) -> Result<IpcResponse> {
    let config = load_config(config_path, None)?;
    let client = IpcClient::new(expand_path(&config.daemon.socket_path));

    let response = runtime()?
        .block_on(client.send(&message))
        .map_err(|e| match e {
            CivicError::DaemonNotRunning => {
                eprintln!("Start the daemon first: civic-ledger start");
                e
            }
            other => other,
        })?;

    if !response.success {
        return Err(CivicError::Daemon(
            response
                .message
                .unwrap_or_else(|| "Request failed".to_string()),
        ));
    }
    Ok(response)
}

fn print_message(response: &IpcResponse) {
    if let Some(message) = &response.message {
        println!("✓ {}", message);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| CivicError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
