mod commands;
mod prompt;
mod session;
mod view;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use kbchat::client::{ChatClient, RedrawPolicy, DEFAULT_ENDPOINT};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The gateway's streaming chat endpoint
    #[arg(long, env = "KBCHAT_URL", default_value = DEFAULT_ENDPOINT)]
    url: String,

    /// Conversation to continue on the gateway (a fresh one by default)
    #[arg(long, env = "KBCHAT_SESSION_ID")]
    session_id: Option<String>,

    /// Seconds to wait for a connection to the gateway
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Redraw the screen after this many frames
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..))]
    redraw_every: u64,

    /// Log to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat interactively (the default)
    Session,

    /// Ask a single question and print the answer
    Run {
        /// The question; asked for when left out
        query: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .init();
    }

    let session_id = cli
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let client = ChatClient::new(cli.url.clone(), session_id, Duration::from_secs(cli.timeout))?;
    let policy = RedrawPolicy::every(cli.redraw_every as usize);

    match cli.command {
        Some(Command::Run { query }) => {
            if !commands::run::execute(client, policy, query).await? {
                std::process::exit(1);
            }
        }
        Some(Command::Session) | None => commands::session::execute(client, policy).await?,
    }
    Ok(())
}
