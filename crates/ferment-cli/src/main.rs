//! `fermentctl` – operator command line for fermentation actuators.
//!
//! Loads `~/.ferment/config.toml` (or `--config`), builds an
//! [`ActuatorRouter`] from it and runs one command against the configured
//! backends.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use ferment_hal::{ActuatorControl, ActuatorRouter, Scheme};
use ferment_types::{DeviceInfo, FermentError, SwitchState};
use serde_json::json;
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "fermentctl",
    about = "Inspect and switch fermentation heaters and coolers",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ~/.ferment/config.toml)
    #[arg(long, global = true, env = "FERMENT_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read an actuator's state
    State {
        /// e.g. hub://switch.ferm_heater or direct://192.168.1.40/0
        address: String,
    },

    /// Switch an actuator on or off
    Set {
        address: String,
        /// on | off
        state: SwitchState,
    },

    /// Read an actuator's power draw in watts
    Power { address: String },

    /// List switchable devices
    Discover {
        /// hub | direct (default: every enabled backend)
        #[arg(long)]
        scheme: Option<String>,
    },

    /// Check that the backends are reachable
    Ping {
        /// hub | direct (default: both)
        #[arg(long)]
        scheme: Option<String>,
    },

    /// Manage the config file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

#[derive(Subcommand)]
enum ConfigSubcommand {
    /// Print the effective configuration (token redacted)
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _guard = ferment_control::telemetry::init_tracing("fermentctl");
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), FermentError> {
    let path = cli.config.clone().unwrap_or_else(config::config_path);

    if let Commands::Config { subcommand } = &cli.command {
        return run_config(subcommand, &path, cli.json);
    }

    let cfg = config::load_or_default(&path)?;
    debug!(path = %path.display(), "configuration loaded");
    let router = ActuatorRouter::new(cfg.router_config());

    let result = match cli.command {
        Commands::State { address } => {
            let state = router.get_state(&address).await?;
            if cli.json {
                print_json(&json!({ "address": address, "state": state }));
            } else {
                println!("{address}  {}", state_label(state));
            }
            Ok(())
        }
        Commands::Set { address, state } => {
            let confirmed = router.set_state(&address, state).await?;
            if cli.json {
                print_json(&json!({ "address": address, "state": state, "confirmed": confirmed }));
                Ok(())
            } else if confirmed {
                println!("{} {address} → {}", "✓".green().bold(), state_label(Some(state)));
                Ok(())
            } else {
                Err(FermentError::Source(format!(
                    "{address} did not confirm the write"
                )))
            }
        }
        Commands::Power { address } => {
            let watts = router.get_power_usage(&address).await?;
            if cli.json {
                print_json(&json!({ "address": address, "power_w": watts }));
            } else {
                match watts {
                    Some(w) => println!("{address}  {w:.1} W"),
                    None => println!("{address}  {}", "no power reading".dimmed()),
                }
            }
            Ok(())
        }
        Commands::Discover { scheme } => {
            let scheme = scheme.as_deref().map(parse_scheme).transpose()?;
            let devices = router.discover_devices(scheme).await?;
            if cli.json {
                print_json(&devices);
            } else {
                print_devices(&devices);
            }
            Ok(())
        }
        Commands::Ping { scheme } => {
            let schemes = match scheme.as_deref() {
                Some(name) => vec![parse_scheme(name)?],
                None => vec![Scheme::Hub, Scheme::Direct],
            };
            let mut results = Vec::new();
            for scheme in schemes {
                let outcome = router.test_connection(scheme).await;
                results.push((scheme, outcome));
            }
            print_ping(&results, cli.json);
            Ok(())
        }
        Commands::Config { .. } => Ok(()),
    };

    router.close().await;
    result
}

fn run_config(
    subcommand: &ConfigSubcommand,
    path: &std::path::Path,
    as_json: bool,
) -> Result<(), FermentError> {
    match subcommand {
        ConfigSubcommand::Path => println!("{}", path.display()),
        ConfigSubcommand::Show => {
            let cfg = config::load_or_default(path)?;
            if as_json {
                let mut redacted = cfg.clone();
                if !redacted.hub.token.is_empty() {
                    redacted.hub.token = "<redacted>".into();
                }
                print_json(&redacted);
            } else {
                println!("{cfg:#?}");
            }
        }
        ConfigSubcommand::Init => {
            if path.exists() {
                println!("  Config already exists at {}", path.display().to_string().bold());
            } else {
                config::save_to(&config::Config::default(), path)?;
                println!(
                    "  {} Config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                );
            }
        }
    }
    Ok(())
}

fn parse_scheme(name: &str) -> Result<Scheme, FermentError> {
    Scheme::from_name(name).ok_or_else(|| FermentError::NoAdapter {
        scheme: name.to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("{}: {e}", "error".red()),
    }
}

fn state_label(state: Option<SwitchState>) -> colored::ColoredString {
    match state {
        Some(SwitchState::On) => "on".green().bold(),
        Some(SwitchState::Off) => "off".normal(),
        None => "unavailable".yellow(),
    }
}

fn print_devices(devices: &[DeviceInfo]) {
    if devices.is_empty() {
        println!("  {}", "No devices found.".dimmed());
        return;
    }
    for d in devices {
        let power = d
            .power_w
            .map(|w| format!("{w:.1} W"))
            .unwrap_or_default();
        println!(
            "  {:<40} {:<24} {:<12} {}",
            d.entity_id.bold(),
            d.name,
            state_label(d.state),
            power.dimmed()
        );
    }
}

fn print_ping(results: &[(Scheme, Result<bool, FermentError>)], as_json: bool) {
    if as_json {
        let rows: Vec<_> = results
            .iter()
            .map(|(scheme, outcome)| match outcome {
                Ok(ok) => json!({ "scheme": scheme.as_str(), "reachable": ok }),
                Err(e) => json!({ "scheme": scheme.as_str(), "error": e.to_string() }),
            })
            .collect();
        print_json(&rows);
        return;
    }
    for (scheme, outcome) in results {
        let label = match outcome {
            Ok(true) => "online".green(),
            Ok(false) => "offline".yellow(),
            Err(_) => "not configured".dimmed(),
        };
        println!("  {:<8} {label}", scheme.as_str());
    }
}
