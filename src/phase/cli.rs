// =============================================================================
// Phase CLI & Bootstrap — shared flags, logging, config, state directory
// =============================================================================
//
// Every phase binary exposes --help, --headless, and --config. Exit codes:
//   0    clean stop
//   1    configuration / validation error
//   2    unrecoverable runtime error (e.g. IPC failed beyond max attempts)
//   130  SIGINT
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::audit::AuditLog;
use crate::bus::EventBus;
use crate::config::ConfigRegistry;
use crate::metrics::EngineMetrics;
use crate::secrets;

pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_RUNTIME: i32 = 2;
pub const EXIT_SIGINT: i32 = 130;

/// Flags shared by every phase binary.
#[derive(Debug, Parser)]
pub struct CommonArgs {
    /// Disable interactive output and emit JSON logs.
    #[arg(long, env = "HEADLESS_MODE")]
    pub headless: bool,

    /// Path to the runtime config file (default: <state dir>/config.json).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address for the health/metrics endpoints.
    #[arg(long, env = "TITAN_HEALTH_ADDR", default_value = "127.0.0.1:9090")]
    pub health_addr: String,

    /// Address of the signed-intent execution service.
    #[arg(long, env = "TITAN_INTENT_ADDR", default_value = "127.0.0.1:7891")]
    pub intent_addr: String,
}

/// Install the single structured logger. Headless mode switches the
/// subscriber to JSON lines for log shippers.
pub fn init_logging(headless: bool) {
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    if headless {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

/// Everything a phase runner needs, wired once.
pub struct PhaseContext {
    /// Service name for logs ("scavenger", "hunter", "sentinel", "executor").
    pub name: String,
    pub registry: Arc<ConfigRegistry>,
    pub bus: Arc<EventBus>,
    pub metrics: Arc<EngineMetrics>,
    pub audit: Arc<AuditLog>,
    pub config_path: PathBuf,
}

/// Load env, logging, config, audit log, metrics, and the event bus.
pub fn bootstrap(name: &str, args: &CommonArgs) -> Result<PhaseContext> {
    let _ = dotenv::dotenv();
    init_logging(args.headless);

    info!(service = name, "service starting");

    let state_dir = secrets::state_dir();
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;

    let bus = EventBus::new();
    let registry = Arc::new(ConfigRegistry::new(bus.clone(), intent_mac_key()));

    registry.load_env();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| state_dir.join("config.json"));
    if config_path.exists() {
        registry
            .load_file(&config_path)
            .with_context(|| format!("invalid config at {}", config_path.display()))?;
    } else {
        warn!(path = %config_path.display(), "no config file — using catalog defaults");
    }

    let snapshot = registry.snapshot();
    let audit = Arc::new(AuditLog::open(
        state_dir.join("logs"),
        snapshot.i64("audit.rotate_bytes").unwrap_or(10 * 1024 * 1024) as u64,
        snapshot.i64("audit.compress_after_days").unwrap_or(30),
    )?);

    let metrics = EngineMetrics::new()?;

    Ok(PhaseContext {
        name: name.to_string(),
        registry,
        bus,
        metrics,
        audit,
        config_path,
    })
}

/// Key for the signed-intent MAC and config receipts. Prefers a dedicated
/// key, falls back to the master password, and finally to a dev key with a
/// loud warning.
pub fn intent_mac_key() -> Vec<u8> {
    if let Ok(key) = std::env::var("TITAN_INTENT_KEY") {
        if !key.is_empty() {
            return key.into_bytes();
        }
    }
    if let Ok(password) = std::env::var("TITAN_MASTER_PASSWORD") {
        if !password.is_empty() {
            return password.into_bytes();
        }
    }
    warn!("TITAN_INTENT_KEY and TITAN_MASTER_PASSWORD unset — using development MAC key");
    b"titan-dev-mac-key".to_vec()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_defaults() {
        let args = CommonArgs::parse_from(["phase"]);
        assert!(!args.headless);
        assert!(args.config.is_none());
        assert_eq!(args.intent_addr, "127.0.0.1:7891");
    }

    #[test]
    fn args_parse_flags() {
        let args = CommonArgs::parse_from([
            "phase",
            "--headless",
            "--config",
            "/tmp/titan.json",
            "--intent-addr",
            "10.0.0.5:7000",
        ]);
        assert!(args.headless);
        assert_eq!(args.config.as_deref(), Some(std::path::Path::new("/tmp/titan.json")));
        assert_eq!(args.intent_addr, "10.0.0.5:7000");
    }

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(EXIT_OK, 0);
        assert_eq!(EXIT_CONFIG, 1);
        assert_eq!(EXIT_RUNTIME, 2);
        assert_eq!(EXIT_SIGINT, 130);
    }
}
