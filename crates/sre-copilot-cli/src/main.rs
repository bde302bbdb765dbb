use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use sre_copilot::client::StreamClient;
use tracing_subscriber::EnvFilter;

mod prompt;
mod render;
mod session;

use prompt::cliclack::CliclackPrompt;
use session::Session;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the SRE Copilot server
    #[arg(long, env = "SRE_COPILOT_URL", default_value = "http://localhost:8000")]
    url: String,

    /// Continue an existing conversation thread
    #[arg(long)]
    thread: Option<String>,

    /// Do not request declarative UI panels
    #[arg(long)]
    no_a2ui: bool,

    /// Ask a single question and exit
    #[arg(short, long)]
    message: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show which integrations the server has configured
    Status,
}

async fn show_status(client: &StreamClient) -> Result<()> {
    let health = client.health().await?;
    let status = client.status().await?;
    println!("{}", style("SRE Copilot status").bold());
    println!(
        "Server: {} ({})",
        client.base_url(),
        health["status"].as_str().unwrap_or("unknown")
    );
    print!("{}", render::status(&status));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let client = StreamClient::new(cli.url);

    if let Some(Command::Status) = cli.command {
        return show_status(&client).await;
    }

    let mut session = Session::new(
        client,
        Box::new(CliclackPrompt::new()),
        cli.thread,
        !cli.no_a2ui,
    );
    match cli.message {
        Some(message) => session.headless_start(message).await,
        None => session.start().await,
    }
}
