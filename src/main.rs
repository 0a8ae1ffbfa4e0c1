use anyhow::{bail, Context, Result};
use bytepatch::{manifest, Applied, ApplyError, ApplyFlags, PatchDescriptor, PatchEngine};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bytepatch", about = "Apply a byte patch to a game executable")]
struct Cli {
    /// Log decisions to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Path to the patch manifest (TOML)
    #[arg(long, short)]
    manifest: PathBuf,
    /// Installation directory containing the file to patch
    #[arg(long, short)]
    dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the patch can be applied, without changing anything
    Status {
        #[command(flatten)]
        target: Target,
    },
    /// Apply the patch
    Apply {
        #[command(flatten)]
        target: Target,
        /// Patch even if the bytes to replace look unexpected
        #[arg(long)]
        force: bool,
        /// Classify only, do not write
        #[arg(long)]
        dry_run: bool,
        /// Skip the whole-file checksum comparison
        #[arg(long)]
        no_verify: bool,
        /// Create a backup first if none exists
        #[arg(long)]
        backup: bool,
    },
    /// Copy the target file into the backup slot
    Backup {
        #[command(flatten)]
        target: Target,
    },
    /// Restore the target file from its backup
    Restore {
        #[command(flatten)]
        target: Target,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(target: &Target) -> Result<PatchDescriptor> {
    manifest::load(&target.manifest)
        .with_context(|| format!("Failed to load manifest: {}", target.manifest.display()))
}

fn print_status(engine: &PatchEngine, dir: &Path) {
    println!("File: {}", engine.relative_path());
    match engine.scan(dir) {
        Ok(Applied::Success) => {
            println!("Unmodified file detected.");
            println!("The patch seems to be compatible and can be installed.");
        }
        Ok(Applied::SuccessModified) => {
            println!("Warning: modified file detected.");
            println!("Either the file was modified or its version does not match the one this patch was made for.");
            println!("The patch can be applied but may not be compatible.");
        }
        Err(ApplyError::AlreadyInstalled) => println!("The patch is already installed."),
        Err(e) if e.is_forceable() => {
            println!("Warning: incompatible file detected.");
            println!("The bytes this patch would edit do not look as expected.");
            println!("Use `apply --force` to install anyway. This is not recommended.");
        }
        Err(e) => println!("Failed to scan the file: {e}"),
    }
    if engine.backup_exists(dir) {
        println!("Backup: {}", engine.backup_path(dir).display());
    } else {
        println!("No backup available.");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Status { target } => {
            let descriptor = load(&target)?;
            print_status(&PatchEngine::new(&descriptor), &target.dir);
        }
        Commands::Apply {
            target,
            force,
            dry_run,
            no_verify,
            backup,
        } => {
            let descriptor = load(&target)?;
            let engine = PatchEngine::new(&descriptor);
            let dir = &target.dir;

            if backup && !dry_run && !engine.backup_exists(dir) {
                engine
                    .backup_create(dir)
                    .context("Failed to create backup. Patch installation aborted")?;
                println!("Backup created: {}", engine.backup_path(dir).display());
            }

            let flags = ApplyFlags::NONE
                .force(force)
                .dry_run(dry_run)
                .verify_checksum(!no_verify);
            match engine.apply(dir, flags) {
                Ok(applied) if dry_run => println!("Dry run: {applied}"),
                Ok(applied) => println!("Patch installed successfully. {applied}"),
                Err(e) => bail!("Patch installation failed: {e}"),
            }
        }
        Commands::Backup { target } => {
            let descriptor = load(&target)?;
            let engine = PatchEngine::new(&descriptor);
            engine.backup_create(&target.dir)?;
            println!("Backup created: {}", engine.backup_path(&target.dir).display());
        }
        Commands::Restore { target } => {
            let descriptor = load(&target)?;
            let engine = PatchEngine::new(&descriptor);
            engine.backup_restore(&target.dir)?;
            println!("Backup restored: {}", engine.target_path(&target.dir).display());
        }
    }

    Ok(())
}
