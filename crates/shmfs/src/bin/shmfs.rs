//! shmfs CLI - run one command against the shared file tree.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shmfs::{FsConfig, FsError, FsService, ShmFileSystem};
use tracing_subscriber::EnvFilter;

/// shmfs - a file tree living in shared memory.
#[derive(Parser)]
#[command(name = "shmfs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Existing path the segment key is derived from
    #[arg(long)]
    key_path: Option<PathBuf>,

    /// Project id used with the key path
    #[arg(long)]
    project_id: Option<u8>,

    /// Explicit segment key (overrides the key path)
    #[arg(long)]
    key: Option<i32>,

    /// Segment size in bytes when creating it
    #[arg(long)]
    size: Option<usize>,

    /// How long to wait for another process to finish initializing
    #[arg(long)]
    init_wait_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Change the current directory
    Cd {
        /// Absolute or relative path
        path: String,
    },

    /// Print the current directory
    Pwd,

    /// Create a directory
    Mkdir { name: String },

    /// Remove a directory and everything in it
    Rmdir { name: String },

    /// List the current directory
    Ls,

    /// Create a file, optionally with contents
    Touch { name: String, data: Option<String> },

    /// Replace a file's contents
    Write { name: String, data: String },

    /// Print a file's contents
    Cat { name: String },

    /// Remove a file
    Rm { name: String },

    /// Show segment usage
    Stats,

    /// Check tree invariants
    Check,

    /// Tear the segment down
    Deinit {
        /// Do not wait for the lock
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = build_config(&cli)?;
    let fs = ShmFileSystem::init(&config).context("failed to attach to the shared segment")?;

    match run(fs, cli.command) {
        Ok(code) => Ok(code),
        Err(err) if err.is_fatal() => Err(err).context("fatal filesystem error"),
        Err(err) => {
            eprintln!("shmfs: {err}");
            Ok(ExitCode::from(2))
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("SHMFS_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(cli: &Cli) -> Result<FsConfig> {
    let mut config = match &cli.config {
        Some(path) => FsConfig::load(path)?,
        None => FsConfig::default(),
    };
    if let Some(path) = &cli.key_path {
        config = config.with_key_path(path);
    }
    if let Some(id) = cli.project_id {
        config.project_id = id;
    }
    if let Some(key) = cli.key {
        config = config.with_key(key);
    }
    if let Some(size) = cli.size {
        config = config.with_segment_size(size);
    }
    if let Some(ms) = cli.init_wait_ms {
        config = config.with_init_wait_ms(ms);
    }
    config.validate()?;
    Ok(config)
}

fn run(fs: ShmFileSystem<shmfs::SharedSegment>, command: Commands) -> Result<ExitCode, FsError> {
    match command {
        Commands::Cd { path } => {
            fs.cd(&path)?;
            println!("{}", fs.pwd()?);
        }
        Commands::Pwd => println!("{}", fs.pwd()?),
        Commands::Mkdir { name } => fs.mkdir(&name)?,
        Commands::Rmdir { name } => fs.rmdir(&name)?,
        Commands::Ls => {
            for entry in fs.ls()? {
                let marker = if entry.is_directory() { "d" } else { "f" };
                println!("{marker} {}", entry.name);
            }
        }
        Commands::Touch { name, data } => {
            fs.create_file(&name, data.as_deref().map(str::as_bytes))?
        }
        Commands::Write { name, data } => fs.alter_file(&name, data.as_bytes())?,
        Commands::Cat { name } => {
            if let Some(bytes) = fs.read_file(&name)? {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&bytes).map_err(FsError::Segment)?;
                if bytes.last() != Some(&b'\n') {
                    stdout.write_all(b"\n").map_err(FsError::Segment)?;
                }
            }
        }
        Commands::Rm { name } => fs.remove_file(&name)?,
        Commands::Stats => {
            let stats = fs.stats()?;
            println!("segment size:  {}", stats.segment_size);
            println!("arena size:    {}", stats.arena.arena_size);
            println!("bump offset:   {}", stats.arena.bump_offset);
            println!("free blocks:   {}", stats.arena.free_blocks);
            println!("free bytes:    {}", stats.arena.free_bytes);
            println!("untouched:     {}", stats.arena.untouched_bytes());
        }
        Commands::Check => {
            let violations = fs.check()?;
            for violation in &violations {
                println!("{}: {}", violation.invariant, violation.description);
            }
            if !violations.is_empty() {
                return Ok(ExitCode::FAILURE);
            }
            println!("ok");
        }
        Commands::Deinit { force } => {
            if force {
                fs.force_deinit()?;
            } else {
                fs.deinit()?;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
