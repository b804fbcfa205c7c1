use tracing::info;
use vikingd::config::Config;
use vikingd::daemon::{self, Daemon, Shutdown};
use vikingd::logging;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("vikingd {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return;
    }
    if !args.is_empty() {
        eprintln!("vikingd: unexpected argument '{}'", args[0]);
        eprintln!("Run 'vikingd --help' for usage.");
        std::process::exit(1);
    }

    let cfg = Config::from_env();
    if let Err(err) = cfg.validate() {
        eprintln!("vikingd: {err}");
        std::process::exit(2);
    }

    // Everything the daemon creates is owner-only.
    unsafe {
        libc::umask(0o077);
    }

    if let Err(err) = logging::init(&cfg.log_dir) {
        eprintln!("vikingd: logging setup failed: {err:#}");
        std::process::exit(2);
    }

    info!("starting vikingd {}", env!("CARGO_PKG_VERSION"));
    info!("index url: {}", cfg.base_url);
    info!("storage root: {}", cfg.storage_root.display());
    info!("codex sessions: {}", cfg.codex_sessions.display());
    info!("antigravity brain: {}", cfg.antigravity_brain.display());
    info!(
        "idle={}s poll={}s fast_poll={}s pending_retry={}s heartbeat={}s shell_monitor={}",
        cfg.idle_timeout_sec,
        cfg.poll_interval_sec,
        cfg.fast_poll_interval_sec,
        cfg.pending_retry_interval_sec,
        cfg.heartbeat_interval_sec,
        if cfg.shell_monitor { "on" } else { "off" },
    );

    let shutdown = Shutdown::new();
    tokio::spawn(daemon::watch_signals(shutdown.clone()));

    let mut daemon = Daemon::new(cfg);
    daemon.run(shutdown).await;
}

fn print_help() {
    println!("vikingd — real-time context sync daemon");
    println!();
    println!("Tails AI assistant and shell history files, aggregates them into");
    println!("sessions, and syncs completed sessions to the OpenViking index.");
    println!();
    println!("USAGE: vikingd [--version] [--help]");
    println!();
    println!("Configuration is environment-only: OPENVIKING_URL,");
    println!("UNIFIED_CONTEXT_STORAGE_ROOT, and the VIKING_* tuning");
    println!("variables (idle timeout, poll intervals, caps, timeouts).");
}
