//! CloudNest CLI - Google Drive browsing from the terminal
//!
//! Usage:
//!   cloudnest-cli login                  Link a Google Drive account
//!   cloudnest-cli ls [folder] [--all]    List a folder (default: My Drive)
//!   cloudnest-cli upload <file> [folder] Upload a local file
//!   cloudnest-cli share <id> [--private] Make a file public or private again
//!   cloudnest-cli featured               Show featured files

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

use cloudnest::{CloudNest, CloudNestConfig, FileEntry, NoticeLevel, ROOT_FOLDER_ID};

#[derive(Parser)]
#[command(
    name = "cloudnest-cli",
    about = "CloudNest CLI - Google Drive browser",
    version,
    long_about = "Browse and manage a linked Google Drive.\nRun `cloudnest-cli login` once to link an account."
)]
struct Cli {
    /// Config file (default: ~/.config/cloudnest/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep the session in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link a Google Drive account through the browser
    Login,
    /// Revoke the token and forget local session state
    Logout,
    /// Show whether an account is linked
    Status,
    /// List a folder
    Ls {
        /// Folder id (default: My Drive)
        #[arg(default_value = ROOT_FOLDER_ID)]
        folder: String,
        /// Follow pagination until the folder is fully listed
        #[arg(long)]
        all: bool,
    },
    /// Create a folder
    Mkdir {
        name: String,
        /// Parent folder id
        #[arg(long, default_value = ROOT_FOLDER_ID)]
        parent: String,
    },
    /// Upload a local file
    Upload {
        file: PathBuf,
        /// Target folder id
        #[arg(default_value = ROOT_FOLDER_ID)]
        folder: String,
    },
    /// Delete a file or folder
    Rm { id: String },
    /// Make a file public (prints the link) or private again
    Share {
        id: String,
        #[arg(long)]
        private: bool,
    },
    /// Toggle the featured flag of a file
    Feature { id: String },
    /// List featured files
    Featured,
    /// Show storage usage
    Quota,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

fn print_entries(entries: &[FileEntry]) {
    for file in entries {
        let kind = if file.entry.is_folder() { "d" } else { "-" };
        let star = if file.featured { "*" } else { " " };
        let size = file.entry.size.map(format_size).unwrap_or_default();
        let modified = file
            .entry
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "{}{} {:>10}  {:16}  {}  ({})",
            kind, star, size, modified, file.entry.name, file.entry.id
        );
    }
}

async fn ensure_linked(nest: &CloudNest) -> Result<()> {
    if !nest.restore().await.context("Failed to restore session")? {
        bail!("No Google Drive account linked. Run `cloudnest-cli login` first.");
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match cli.config {
        Some(ref path) => CloudNestConfig::load(path),
        None => CloudNestConfig::load_default(),
    };
    if cli.config.is_some() {
        config.apply_env_overrides(|key| std::env::var(key).ok());
    }

    let nest = CloudNest::from_config(&config, cli.ephemeral).context("Invalid configuration")?;

    let mut notices = nest.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            match notice.level {
                NoticeLevel::Error => eprintln!("error: {}", notice.message),
                _ => eprintln!("{}", notice.message),
            }
        }
    });

    let result = execute(&nest, &config, cli.command).await;

    // Closing every sender ends the printer once the queue is empty
    drop(nest);
    let _ = printer.await;
    result
}

async fn execute(nest: &CloudNest, config: &CloudNestConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Login => {
            config.require_client()?;
            println!("Opening the browser for Google sign-in...");
            nest.sign_in().await.context("Sign-in failed")?;
            println!("Google Drive linked.");
        }
        Commands::Logout => {
            nest.sign_out().await.context("Sign-out failed")?;
            println!("Signed out.");
        }
        Commands::Status => {
            if nest.restore().await.context("Failed to restore session")? {
                println!("Linked to Google Drive");
            } else {
                println!("Not linked");
            }
        }
        Commands::Ls { folder, all } => {
            ensure_linked(nest).await?;
            let browser = nest.browser();
            browser.list_files(&folder, None).await?;
            while all && browser.snapshot().await.has_more {
                browser.load_more_files().await?;
            }

            let snapshot = browser.snapshot().await;
            let path: Vec<_> = snapshot.breadcrumbs.iter().map(|b| b.name.as_str()).collect();
            println!("/{}", path.join("/"));
            print_entries(&snapshot.files);
            if snapshot.has_more {
                println!("... more entries available (use --all)");
            }
        }
        Commands::Mkdir { name, parent } => {
            ensure_linked(nest).await?;
            let folder = nest.browser().create_folder(&parent, &name).await?;
            println!("{}", folder.id);
        }
        Commands::Upload { file, folder } => {
            ensure_linked(nest).await?;
            let entry = nest
                .browser()
                .upload_local_file(&folder, &file)
                .await
                .with_context(|| format!("Failed to upload {}", file.display()))?;
            println!("{}", entry.id);
        }
        Commands::Rm { id } => {
            ensure_linked(nest).await?;
            nest.browser().delete_file(&id).await?;
        }
        Commands::Share { id, private } => {
            ensure_linked(nest).await?;
            match nest.browser().set_file_permission(&id, !private).await? {
                Some(link) => println!("{}", link),
                None if !private => println!("Shared, but Drive returned no link"),
                None => {}
            }
        }
        Commands::Feature { id } => {
            let linked = nest.restore().await.unwrap_or(false);
            let featured = nest.browser().toggle_featured(&id).await.with_context(|| {
                if linked {
                    format!("Could not feature {}", id)
                } else {
                    format!("{} is not featured and no account is linked", id)
                }
            })?;
            println!("{}", if featured { "featured" } else { "not featured" });
        }
        Commands::Featured => {
            print_entries(&nest.browser().featured_files());
        }
        Commands::Quota => {
            ensure_linked(nest).await?;
            let info = nest.browser().quota().await?;
            match info.total {
                Some(total) => println!(
                    "{} used of {} ({} free)",
                    format_size(info.used),
                    format_size(total),
                    format_size(info.free().unwrap_or(0))
                ),
                None => println!("{} used (unlimited)", format_size(info.used)),
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
