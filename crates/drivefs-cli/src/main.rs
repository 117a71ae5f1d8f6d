//! drivefs command-line client.
//!
//! Mounts the configured drives, runs one command against them, and
//! unmounts (flushing persistent drives) on the way out.
//!
//! Usage:
//!   drivefs mounts
//!   drivefs write c:/docs/a.txt "hello"
//!   drivefs ls c:/docs
//!   drivefs mv c:/docs/a.txt d:/archive/a.txt
//!   drivefs --config drives.ron tree w:/

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

use drivefs_kernel::{BatchOutcome, DriverConfig, Filetype, MountConfig, Vfs, VfsConfig};

/// Drive-letter virtual file system.
#[derive(Parser, Debug)]
#[command(name = "drivefs")]
#[command(about = "Browse and edit drivefs drives")]
struct Args {
    /// Drive configuration (RON). Defaults to the user config dir.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List mounted drives
    Mounts,
    /// List a directory
    Ls { path: String },
    /// List everything below a directory
    Tree { path: String },
    /// Print a file
    Cat { path: String },
    /// Write a file from inline text or a host file
    Write {
        path: String,
        text: Option<String>,
        /// Read content from this host file instead
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
    },
    /// Create an empty file or bump its modification time
    Touch { path: String },
    /// Create a directory and its parents
    Mkdir { path: String },
    /// Remove a file
    Rm { path: String },
    /// Remove a directory recursively
    Rmdir { path: String },
    /// Copy a file or directory
    Cp { src: String, dest: String },
    /// Move a file or directory
    Mv { src: String, dest: String },
    /// Rename within the same directory
    Rename { path: String, name: String },
    /// Show metadata
    Stat { path: String },
    /// Export a file to the host
    Export { path: String, out: Option<PathBuf> },
}

fn default_config() -> Result<VfsConfig> {
    if let Some(path) = dirs::config_dir().map(|d| d.join("drivefs").join("drives.ron")) {
        if path.exists() {
            tracing::debug!(path = %path.display(), "using user config");
            return VfsConfig::load(&path).with_context(|| format!("loading {}", path.display()));
        }
    }
    let data = dirs::data_dir().context("no data directory on this platform")?;
    Ok(VfsConfig {
        mounts: vec![MountConfig {
            driver: DriverConfig::LocalStorage {
                path: data.join("drivefs").join("drives.db"),
            },
            prefix: Some("c".to_string()),
            sort_entries: true,
        }],
        ..VfsConfig::default()
    })
}

fn report(verb: &str, outcome: BatchOutcome) -> Result<()> {
    for (path, err) in &outcome.failed {
        eprintln!("{verb} {path}: {err}");
    }
    if !outcome.is_complete() {
        let total = outcome.failed.len() + outcome.done.len();
        bail!("{verb}: {} of {total} entries failed", outcome.failed.len());
    }
    Ok(())
}

async fn run(vfs: &Vfs, command: Command) -> Result<()> {
    match command {
        Command::Mounts => {
            for info in vfs.mounts() {
                let usage = vfs.usage(&info.prefix)?;
                println!(
                    "{}:\t{:?}\t{}\t{} files, {} dirs, {} bytes",
                    info.prefix,
                    info.kind,
                    if info.read_only { "ro" } else { "rw" },
                    usage.files,
                    usage.directories,
                    usage.bytes,
                );
            }
        }
        Command::Ls { path } => {
            for name in vfs.readdir(&path)? {
                println!("{name}");
            }
        }
        Command::Tree { path } => {
            for entry in vfs.walk(&path)? {
                println!("{entry}");
            }
        }
        Command::Cat { path } => {
            let data = vfs.readbin(&path).await?;
            use std::io::Write;
            std::io::stdout().write_all(&data)?;
        }
        Command::Write { path, text, file } => {
            let data = match (text, file) {
                (_, Some(file)) => std::fs::read(&file)
                    .with_context(|| format!("reading {}", file.display()))?,
                (Some(text), None) => text.into_bytes(),
                (None, None) => bail!("give inline text or --file"),
            };
            vfs.writebin(&path, &data).await?;
        }
        Command::Touch { path } => vfs.touch(&path).await?,
        Command::Mkdir { path } => vfs.mkdir(&path).await?,
        Command::Rm { path } => vfs.rm(&path).await?,
        Command::Rmdir { path } => vfs.rmdir(&path).await?,
        Command::Cp { src, dest } => match vfs.filetype(&src)? {
            Filetype::Directory => report("cp", vfs.cpdir(&src, &dest).await?)?,
            Filetype::File => vfs.cpfile(&src, &dest).await?,
            Filetype::Missing => bail!("{src}: not found"),
        },
        Command::Mv { src, dest } => match vfs.filetype(&src)? {
            Filetype::Directory => report("mv", vfs.mvdir(&src, &dest).await?)?,
            Filetype::File => vfs.mvfile(&src, &dest).await?,
            Filetype::Missing => bail!("{src}: not found"),
        },
        Command::Rename { path, name } => vfs.rename(&path, &name).await?,
        Command::Stat { path } => {
            let stat = vfs.stat(&path)?;
            println!("type:      {:?}", stat.kind);
            println!("length:    {}", stat.length);
            println!("read-only: {}", stat.read_only);
            println!("record:    {}", stat.record_id.as_deref().unwrap_or("-"));
            println!("created:   {}", stat.date_created);
            println!("modified:  {}", stat.date_modified);
            println!("accessed:  {}", stat.date_accessed);
        }
        Command::Export { path, out } => {
            let blob = vfs.to_blob(&path).await?;
            let out = out.unwrap_or_else(|| PathBuf::from(&blob.name));
            std::fs::write(&out, &blob.data)
                .with_context(|| format!("writing {}", out.display()))?;
            tracing::info!(mime = %blob.mime, bytes = blob.len(), out = %out.display(), "exported");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            VfsConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => default_config()?,
    };
    let vfs = Vfs::from_config(&config).await.context("mounting drives")?;

    let result = run(&vfs, args.command).await;
    if let Err(e) = vfs.umount_all().await {
        tracing::warn!("unmount failed: {e}");
        if result.is_ok() {
            return Err(e.into());
        }
    }
    result
}
