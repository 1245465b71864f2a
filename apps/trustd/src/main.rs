//! # trustd
//!
//! Command-line front end for the decision engine:
//! - `trustd simulate`: evaluate one policy body against one input
//! - `trustd verify`: load a fixture (policies, tuples, contracts) and run
//!   its verify requests through the full decision path
//! - `trustd verify-ledger`: check an audit ledger's hash chains
//! - `trustd keygen`: create an Ed25519 trust-token signing key

mod commands;
mod fixture;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use trust_decision::EngineConfig;

/// Authorization decisions for agent requests.
#[derive(Parser)]
#[command(name = "trustd", version, about)]
struct Cli {
    /// Engine configuration (TOML). Built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a policy body against an input document.
    Simulate {
        /// Policy body (JSON).
        #[arg(long)]
        policy: PathBuf,
        /// Evaluation input (JSON).
        #[arg(long)]
        input: PathBuf,
        /// Engine that compiles the body.
        #[arg(long, default_value = "aurajson")]
        engine: String,
    },
    /// Run the verify requests of a fixture and print one decision per line.
    Verify {
        /// Fixture file (JSON).
        #[arg(long)]
        fixture: PathBuf,
        /// Append audit entries to this ledger.
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// PKCS#8 Ed25519 key used to sign trust tokens.
        #[arg(long)]
        signing_key: Option<PathBuf>,
        /// Key id placed in token headers.
        #[arg(long, default_value = "trustd-1")]
        kid: String,
    },
    /// Verify the hash chains of an audit ledger.
    VerifyLedger {
        #[arg(long)]
        ledger: PathBuf,
    },
    /// Generate a signing key and print its public JWK.
    Keygen {
        /// Where to write the PKCS#8 key.
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = "trustd-1")]
        kid: String,
    },
}

fn init_logging(json: bool) -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries decisions.
    let filter = EnvFilter::from_default_env()
        .add_directive("trust_decision=info".parse()?)
        .add_directive("trustd=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Simulate {
            policy,
            input,
            engine,
        } => commands::simulate::execute(&policy, &input, &engine),
        Commands::Verify {
            fixture,
            ledger,
            signing_key,
            kid,
        } => {
            commands::verify::execute(
                config,
                &fixture,
                ledger.as_deref(),
                signing_key.as_deref(),
                &kid,
            )
            .await
        }
        Commands::VerifyLedger { ledger } => commands::ledger::execute(&ledger),
        Commands::Keygen { out, kid } => commands::keygen::execute(&out, &kid).await,
    }
}
