use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use tokio::io::AsyncBufReadExt;

use kernel_session::{discovery, KernelChannels, KernelSession};
use taskdeck::{execute_snippet, AppSettings, ConsoleSink, InputQueue, TaskOutcome};

#[derive(Parser)]
#[command(author, version, about = "Run code in persistent Jupyter kernels", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List running kernels reachable from this machine
    Ps {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Start a kernel and leave it running for later attachment
    Start {
        /// Kernelspec name (defaults to the configured kernel)
        name: Option<String>,
    },
    /// Interrupt the current evaluation of a kernel
    Interrupt {
        /// Kernel ID or path to its connection file
        id: String,
    },
    /// Execute code in a kernel and stream its output to the console
    Exec {
        /// Kernel ID or path to its connection file
        id: String,
        /// The code to execute (reads from stdin if not provided)
        code: Option<String>,
    },
    /// Remove stale connection files for kernels that are no longer running
    Clean {
        /// Heartbeat timeout in seconds per candidate
        #[arg(long, default_value = "2")]
        timeout: u64,
        /// Report what would be removed without removing anything
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main(cli.command))
}

async fn async_main(command: Commands) -> Result<()> {
    let settings = AppSettings::load();

    match command {
        Commands::Ps { json } => list_kernels(json).await,
        Commands::Start { name } => {
            start_kernel(name.as_deref().unwrap_or(&settings.kernel_name), &settings).await
        }
        Commands::Interrupt { id } => interrupt_kernel(&id).await,
        Commands::Exec { id, code } => exec_code(&id, code, &settings).await,
        Commands::Clean { timeout, dry_run } => clean_kernels(timeout, dry_run).await,
    }
}

#[derive(Tabled)]
struct KernelRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "KERNEL")]
    kernel: String,
    #[tabled(rename = "CONNECTION FILE")]
    connection_file: String,
}

#[derive(Serialize)]
struct KernelEntry {
    id: String,
    kernel_name: Option<String>,
    connection_file: PathBuf,
}

async fn list_kernels(json_output: bool) -> Result<()> {
    let sessions = discovery::list_candidate_sessions().await?;

    if json_output {
        let entries: Vec<KernelEntry> = sessions
            .iter()
            .map(|s| KernelEntry {
                id: s.kernel_id().to_string(),
                kernel_name: s.connection_info().kernel_name.clone(),
                connection_file: s.connection_file().to_path_buf(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No running kernels found.");
        return Ok(());
    }

    let rows: Vec<KernelRow> = sessions
        .iter()
        .map(|s| KernelRow {
            id: s.kernel_id().to_string(),
            kernel: s
                .connection_info()
                .kernel_name
                .clone()
                .unwrap_or_else(|| "-".to_string()),
            connection_file: shorten_path(s.connection_file()),
        })
        .collect();
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);

    Ok(())
}

async fn start_kernel(name: &str, settings: &AppSettings) -> Result<()> {
    let session = KernelSession::start(name, settings.startup_timeout()).await?;
    println!("Kernel started with ID: {}", session.kernel_id());

    let connection_file = session.detach();
    println!("Connection file: {}", connection_file.display());
    Ok(())
}

async fn interrupt_kernel(id: &str) -> Result<()> {
    let session = resolve_session(id).await?;
    session.interrupt().await?;
    println!("Interrupt sent to kernel {}", session.kernel_id());
    Ok(())
}

async fn exec_code(id: &str, code: Option<String>, settings: &AppSettings) -> Result<()> {
    let code = match code {
        Some(code) => code,
        None => {
            use tokio::io::AsyncReadExt;
            let mut buffer = String::new();
            tokio::io::stdin().read_to_string(&mut buffer).await?;
            buffer
        }
    };

    let session = resolve_session(id).await?;
    let mut channels = KernelChannels::connect(&session, settings.startup_timeout()).await?;

    // Operator answers to input() prompts come from the terminal.
    let input_queue = InputQueue::new();
    let feeder = {
        let queue = input_queue.clone();
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                queue.put(line).await;
            }
        })
    };

    let sink = ConsoleSink;
    let outcome = execute_snippet(
        &mut channels,
        &code,
        &settings.execute_options(),
        &input_queue,
        &sink,
    )
    .await;
    feeder.abort();
    channels.disconnect();

    match outcome? {
        TaskOutcome::Completed { .. } => Ok(()),
        TaskOutcome::Failed { .. } => std::process::exit(1),
    }
}

async fn clean_kernels(timeout_secs: u64, dry_run: bool) -> Result<()> {
    let removed =
        discovery::sweep_stale_connection_files(Duration::from_secs(timeout_secs), dry_run).await?;

    for path in &removed {
        if dry_run {
            println!("Would remove: {}", path.display());
        } else {
            println!("Removed: {}", path.display());
        }
    }
    println!("{} stale connection file(s)", removed.len());
    Ok(())
}

/// Resolve a kernel ID or connection file path to an attached session.
async fn resolve_session(locator: &str) -> Result<KernelSession> {
    let direct = Path::new(locator);
    if direct.exists() {
        return Ok(KernelSession::attach(direct).await?);
    }

    let runtime_dir = discovery::runtime_dir();
    for candidate in [
        runtime_dir.join(format!("taskdeck-kernel-{locator}.json")),
        runtime_dir.join(format!("kernel-{locator}.json")),
    ] {
        if candidate.exists() {
            return Ok(KernelSession::attach(&candidate).await?);
        }
    }

    anyhow::bail!("no kernel found for '{}'; try 'taskdeck ps'", locator)
}

/// Shorten a path for display by replacing the home directory with ~.
fn shorten_path(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(relative) = path.strip_prefix(&home) {
            return format!("~/{}", relative.display());
        }
    }
    path.display().to_string()
}
