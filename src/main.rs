//! proxtag command line
//!
//! `proxtag broker [addr]` runs the TCP relay broker, `proxtag coordinator
//! [config.json]` runs the session coordinator with console controls and
//! `proxtag config` prints the default configuration.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use proxtag::core::{Config, RuleField, DEFAULT_BROKER_PORT};
use proxtag::device::Input;
use proxtag::network::{Broker, TcpBus};
use proxtag::session::{SessionRunner, SCREEN_WIDTH};
use proxtag::{Result, VERSION};

/// Operator commands typed on stdin
enum Command {
    Toggle,
    Start,
    End,
    Rule(RuleField),
}

/// Console stand-in for the operator button and touch screen
struct ConsoleInput {
    commands: mpsc::UnboundedReceiver<Command>,
    pending: Option<Command>,
}

impl ConsoleInput {
    /// Spawns the stdin reader
    fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let command = match line.trim() {
                    "" => Command::Toggle,
                    "s" | "start" => Command::Start,
                    "e" | "end" => Command::End,
                    "r" | "runners" => Command::Rule(RuleField::Runners),
                    "t" | "taggers" => Command::Rule(RuleField::Taggers),
                    "b" | "beacons" => Command::Rule(RuleField::Beacons),
                    "m" | "minutes" => Command::Rule(RuleField::DurationMinutes),
                    other => {
                        warn!(
                            "Unknown command {:?} (enter, start, end, runners, taggers, beacons, minutes)",
                            other
                        );
                        continue;
                    }
                };
                if tx.send(command).is_err() {
                    break;
                }
            }
        });
        ConsoleInput {
            commands: rx,
            pending: None,
        }
    }

    fn next(&mut self) -> Option<Command> {
        self.pending.take().or_else(|| self.commands.try_recv().ok())
    }
}

impl Input for ConsoleInput {
    fn read_button(&mut self) -> bool {
        match self.next() {
            Some(Command::Toggle) => true,
            other => {
                self.pending = other;
                false
            }
        }
    }

    fn read_touch(&mut self) -> Option<(u16, u16)> {
        match self.next()? {
            Command::Start => Some((SCREEN_WIDTH / 4, 0)),
            Command::End => Some((SCREEN_WIDTH / 4 * 3, 0)),
            other => {
                self.pending = Some(other);
                None
            }
        }
    }

    fn read_rule(&mut self) -> Option<RuleField> {
        match self.next()? {
            Command::Rule(field) => Some(field),
            other => {
                self.pending = Some(other);
                None
            }
        }
    }
}

fn usage() {
    eprintln!("usage: proxtag broker [addr] | coordinator [config.json] | config");
}

async fn run_broker(addr: Option<String>) -> Result<()> {
    let addr = addr.unwrap_or_else(|| format!("0.0.0.0:{}", DEFAULT_BROKER_PORT));
    let broker = Broker::bind(addr).await?;
    tokio::select! {
        result = broker.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Broker shutting down");
            Ok(())
        }
    }
}

async fn run_coordinator(path: Option<String>) -> Result<()> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    info!("Broker at {}, rules {:?}", config.bus.broker_addr, config.rules);
    info!("Press enter to start or end a game, or type start / end");
    info!("Between games, type runners / taggers / beacons / minutes to step a rule");

    let bus = TcpBus::new(&config.bus);
    let mut runner = SessionRunner::new(&config, bus, ConsoleInput::spawn());
    tokio::select! {
        result = runner.run() => result,
        _ = tokio::signal::ctrl_c() => {
            if runner.coordinator().is_active() {
                runner.coordinator_mut().end()?;
                runner.tick().await?;
            }
            info!("Coordinator shutting down");
            Ok(())
        }
    }
}

fn print_config() -> Result<()> {
    let json = serde_json::to_string_pretty(&Config::default())?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let mut args = std::env::args().skip(1);
    let mode = args.next();
    let arg = args.next();

    info!("proxtag v{}", VERSION);
    let result = match mode.as_deref() {
        Some("broker") => run_broker(arg).await,
        Some("coordinator") => run_coordinator(arg).await,
        Some("config") => print_config(),
        _ => {
            usage();
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
