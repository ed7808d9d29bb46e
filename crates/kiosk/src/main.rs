//! Binary entrypoint for the kiosk shell.
use std::{path::PathBuf, process, sync::Arc};

use clap::{Parser, Subcommand};
use kiosk_core::{
    Classifier, Config, FileStore, KeyValueStore, Launcher, PersistedTargets, Submission,
};
use logging::{self as logshared, LogArgs};
use tokio::{
    io::{BufReader, stdin},
    runtime::Builder,
};
use tracing::{debug, error};

/// JSON-lines request and event types.
mod protocol;
/// Shell event loop.
mod runtime;
/// Shell capabilities written to stdout.
mod stdio;

use crate::stdio::StdioShell;

#[derive(Parser, Debug)]
#[command(
    name = "kiosk",
    about = "Show a web page, a static site or a local script full-screen",
    version,
    subcommand_precedence_over_arg = true
)]
/// Command-line interface for the `kiosk` binary.
struct Cli {
    /// Optional subcommand.
    #[command(subcommand)]
    command: Option<Command>,

    /// URL, file or directory to launch at startup
    target: Option<String>,

    /// Port for static sites and scripts (defaults to the configured port)
    #[arg(long, value_name = "PORT")]
    port: Option<String>,

    /// Do not remember TARGET for the next launch
    #[arg(long)]
    no_persist: bool,

    /// Logging controls
    #[command(flatten)]
    log: LogArgs,

    /// Optional path to the config file
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Optional path to the key-value store file
    #[arg(long, value_name = "PATH", global = true)]
    store: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
/// Top-level CLI subcommands.
enum Command {
    /// Load and validate the configuration then exit.
    Check {
        /// Dump the resolved configuration
        #[arg(long)]
        dump: bool,
    },
    /// Print how RAW would be launched, as JSON.
    Classify {
        /// URL, file or directory
        raw: String,
    },
    /// Forget the persisted target.
    Forget,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logshared::init_stderr(&cli.log) {
        eprintln!("Failed to install logger: {e}");
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e.pretty());
            process::exit(1);
        }
    };
    let store_path = cli.store.clone().unwrap_or_else(|| config.store_path());
    debug!(store = %store_path.display(), "store_path");

    match &cli.command {
        Some(Command::Check { dump }) => {
            if *dump {
                println!("{config:#?}");
            } else {
                println!("OK");
            }
        }
        Some(Command::Classify { raw }) => classify(&config, raw),
        Some(Command::Forget) => {
            let targets = PersistedTargets::new(Arc::new(FileStore::new(store_path)));
            if let Err(e) = targets.clear(config.port) {
                eprintln!("{e}");
                process::exit(1);
            }
            println!("OK");
        }
        None => {
            let initial = cli.target.clone().map(|raw| Submission {
                raw,
                port: cli.port.clone(),
                persist: !cli.no_persist,
            });
            let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(store_path));
            if let Err(e) = serve(config, store, initial) {
                error!(error = %e, "kiosk_exit");
                eprintln!("{e}");
                process::exit(1);
            }
        }
    }
}

/// Print the descriptor for `raw`, or the classification error.
fn classify(config: &Config, raw: &str) {
    let classifier = Classifier::new().with_entry_points(config.entry_points.iter().cloned());
    match classifier.classify(raw) {
        Ok(d) => match serde_json::to_string_pretty(&d) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Failed to serialize descriptor: {e}");
                process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("{:?}: {}", e.kind, e.message);
            process::exit(1);
        }
    }
}

/// Run the stdio shell on a single-threaded runtime.
fn serve(
    config: Config,
    store: Arc<dyn KeyValueStore>,
    initial: Option<Submission>,
) -> kiosk_core::Result<()> {
    let rt = Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(async move {
        let shell = Arc::new(StdioShell::stdout());
        let (launcher, events) =
            Launcher::new(config, shell.clone(), shell.clone(), shell, store)?;
        let input = BufReader::new(stdin());
        runtime::run(&launcher, events, input, initial).await
    })
}
