//! solterm - serial-over-LAN console for Intel AMT management controllers
//!
//! solterm connects to the redirection service of a management controller,
//! authenticates, and attaches the local terminal to the remote machine's
//! virtual serial port. Keystrokes go to the remote console and console
//! output appears locally, until the operator presses `^]`.
//!
//! # Quick Start
//!
//! ```text
//! solterm amt-host                 # user "admin", password prompted
//! solterm -u ops -q amt-host 16994 # quiet, explicit user and port
//! AMT_PASSWORD=secret solterm host # password from the environment
//! ```
//!
//! Settings live in `~/.solterm/config.toml`, the log in
//! `~/.solterm/solterm.log`.

mod cli;
mod config;
mod core;
mod driver;
mod net;
#[cfg(unix)]
mod tty;

use std::env;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::cli::{Command, Options};
use crate::config::Config;
use crate::core::scrub;

/// Password source consulted when `-p` is not given
const PASSWORD_ENV: &str = "AMT_PASSWORD";

/// Settings after merging the command line over the config file.
struct Settings {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    verbose: bool,
    heartbeat_interval_ms: u64,
}

impl Settings {
    fn merge(options: Options, config: &Config, env_password: Option<String>) -> Self {
        Self {
            host: options.host,
            port: options.port.unwrap_or(config.port),
            user: options.user.unwrap_or_else(|| config.user.clone()),
            password: pick_password(options.password, env_password),
            verbose: options.verbose.unwrap_or(config.verbose),
            heartbeat_interval_ms: config.heartbeat_interval_ms,
        }
    }
}

/// `-p` wins over the environment. The losing copy is scrubbed, and an
/// empty password counts as none given, so the prompt runs.
fn pick_password(cli: Option<String>, env: Option<String>) -> Option<String> {
    let (chosen, unused) = match (cli, env) {
        (Some(cli), env) => (Some(cli), env),
        (None, env) => (env, None),
    };
    if let Some(mut unused) = unused {
        scrub(&mut unused);
    }
    chosen.filter(|password| !password.is_empty())
}

fn init_logging(config: &Config) {
    let log_path = Config::dir()
        .map(|dir| dir.join("solterm.log"))
        .unwrap_or_else(|| PathBuf::from("solterm.log"));

    // Create log directory if needed
    if let Some(parent) = log_path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) else {
        return;
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let options = match cli::parse_args(env::args().skip(1)) {
        Ok(Command::Run(options)) => options,
        Ok(Command::Help) => {
            let _ = cli::print_help(&mut io::stdout());
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("solterm: {}", e);
            let _ = cli::print_help(&mut io::stderr());
            std::process::exit(1);
        }
    };

    let loaded = Config::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();
    init_logging(&config);
    info!("solterm {} starting", env!("CARGO_PKG_VERSION"));

    let settings = Settings::merge(options, &config, env::var(PASSWORD_ENV).ok());
    if let Err(e) = loaded {
        warn!("{}, using defaults", e);
        if settings.verbose {
            eprintln!("solterm: {}, using defaults", e);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = settings;
        eprintln!("solterm needs a Unix terminal (termios and poll).");
        std::process::exit(1);
    }

    #[cfg(unix)]
    {
        let verbose = settings.verbose;
        match unix::run(settings) {
            Ok(end) => info!(?end, "session ended"),
            Err(e) => {
                error!("{:#}", e);
                if verbose {
                    eprintln!("solterm: {:#}", e);
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

#[cfg(unix)]
mod unix {
    use std::io;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use anyhow::Context;
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use tracing::info;

    use super::Settings;
    use crate::core::{scrub, Session, SessionKind};
    use crate::driver::{EventLoop, FdPoller, SessionEnd};
    use crate::net;
    use crate::tty::{self, RawStdin, TerminalGuard, TtyHandler};

    pub fn run(settings: Settings) -> anyhow::Result<SessionEnd> {
        let mut password = match settings.password {
            Some(password) => password,
            None => tty::prompt_password(&settings.host).context("failed to read password")?,
        };

        let configured = Session::configure(
            SessionKind::SOL.as_bytes(),
            &settings.user,
            &password,
            TtyHandler::new(settings.verbose),
        );
        scrub(&mut password);
        let mut session = configured?.with_heartbeat_interval(settings.heartbeat_interval_ms)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        for signal in [SIGTERM, SIGHUP, SIGINT] {
            signal_hook::flag::register(signal, Arc::clone(&shutdown))
                .context("failed to register signal handler")?;
        }

        if settings.verbose {
            eprintln!("solterm: connecting to {} port {}", settings.host, settings.port);
        }
        let stream = net::connect(&settings.host, settings.port)?;
        let poller = FdPoller::new(
            stream.try_clone().context("failed to duplicate socket")?,
            io::stdin(),
        );

        let guard = TerminalGuard::stdin().context("failed to set up terminal")?;
        info!(raw = guard.is_active(), "terminal ready");

        session.open(stream)?;
        let end = EventLoop::new(RawStdin, poller, shutdown)
            .verbose(settings.verbose)
            .run(&mut session);
        drop(guard);
        Ok(end?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(host: &str) -> Options {
        Options {
            host: host.to_string(),
            ..Options::default()
        }
    }

    #[test]
    fn test_command_line_overrides_config() {
        let config = Config {
            user: "ops".to_string(),
            port: 16995,
            verbose: false,
            ..Config::default()
        };
        let cli = Options {
            user: Some("root".to_string()),
            verbose: Some(true),
            ..options("amt")
        };

        let settings = Settings::merge(cli, &config, None);
        assert_eq!(settings.user, "root");
        assert_eq!(settings.port, 16995);
        assert!(settings.verbose);
    }

    #[test]
    fn test_password_precedence() {
        let config = Config::default();
        let env_password = || Some("from-env".to_string());

        let cli = Options {
            password: Some("from-cli".to_string()),
            ..options("amt")
        };
        let settings = Settings::merge(cli, &config, env_password());
        assert_eq!(settings.password.as_deref(), Some("from-cli"));

        let settings = Settings::merge(options("amt"), &config, env_password());
        assert_eq!(settings.password.as_deref(), Some("from-env"));

        // Nothing usable means prompting.
        let cli = Options {
            password: Some(String::new()),
            ..options("amt")
        };
        let settings = Settings::merge(cli, &config, None);
        assert_eq!(settings.password, None);
    }
}
