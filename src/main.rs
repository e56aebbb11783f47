//! Calculator Vault - CLI
//!
//! Command-line interface for vault operations.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use calc_vault::{
    BatchOperation, BatchReport, BatchRequest, CalculatorVault, FileType, HiddenFileRecord,
};

#[derive(Parser)]
#[command(name = "calc-vault")]
#[command(version = calc_vault::VERSION)]
#[command(about = "Calculator Vault - hidden, encrypted files behind a calculator")]
struct Cli {
    /// Data directory (config, registry, keys, hidden root)
    #[arg(short, long, default_value = "./calc_vault_data")]
    data_dir: PathBuf,

    /// Unlock passcode
    #[arg(short, long, global = true)]
    passcode: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vault and choose its passcode
    Init {
        /// Security question for passcode recovery
        #[arg(long, requires = "answer")]
        question: Option<String>,

        #[arg(long)]
        answer: Option<String>,
    },

    /// Move files into a managed folder
    Hide {
        files: Vec<PathBuf>,

        /// Target folder (defaults to the hidden root)
        #[arg(short, long)]
        folder: Option<PathBuf>,

        /// Encrypt while hiding, regardless of the configured default
        #[arg(short, long)]
        encrypt: bool,
    },

    /// Encrypt hidden files
    Encrypt { files: Vec<PathBuf> },

    /// Decrypt hidden files
    Decrypt {
        files: Vec<PathBuf>,

        /// Type to assume for .enc files without metadata
        #[arg(long)]
        assume_type: Option<FileType>,
    },

    /// Restore files to an ordinary directory
    Unhide {
        files: Vec<PathBuf>,

        #[arg(short, long)]
        to: PathBuf,
    },

    /// Copy hidden files to another managed folder
    Copy {
        files: Vec<PathBuf>,

        #[arg(short, long)]
        to: PathBuf,
    },

    /// Move hidden files to another managed folder
    Move {
        files: Vec<PathBuf>,

        #[arg(short, long)]
        to: PathBuf,
    },

    /// Permanently delete hidden files
    Rm { files: Vec<PathBuf> },

    /// Rename one hidden file
    Rename { file: PathBuf, new_name: String },

    /// List a managed folder
    Ls { folder: Option<PathBuf> },

    /// Create a managed folder
    Mkdir {
        name: String,

        #[arg(long)]
        parent: Option<PathBuf>,
    },

    /// Delete a managed folder and its files
    Rmdir { folder: PathBuf },

    /// Rename a managed folder
    RenameFolder { folder: PathBuf, new_name: String },

    /// Show registry records
    Records,

    /// Decrypt a hidden file to the preview cache
    Preview { file: PathBuf },

    /// Use a passphrase-derived key from now on
    SetKey { passphrase: String },

    /// Return to the generated key
    ClearKey,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let vault = CalculatorVault::open_in(&cli.data_dir)
        .with_context(|| format!("opening vault in {}", cli.data_dir.display()))?;
    let passcode = cli.passcode.as_deref().context("--passcode is required")?;

    match cli.command {
        Commands::Init { question, answer } => {
            if vault.is_set_up() {
                bail!("vault in {} already has a passcode", cli.data_dir.display());
            }
            vault.set_passcode(passcode)?;
            vault.unlock(passcode)?;
            if let (Some(question), Some(answer)) = (question, answer) {
                vault.set_security_question(&question, &answer)?;
            }
            println!("🔐 Vault ready at {}", vault.hidden_root().display());
            Ok(())
        }
        command => {
            vault.unlock(passcode)?;
            run_unlocked(&vault, command)
        }
    }
}

fn run_unlocked(vault: &CalculatorVault, command: Commands) -> Result<()> {
    match command {
        Commands::Init { .. } => bail!("vault is already initialized"),

        Commands::Hide {
            files,
            folder,
            encrypt,
        } => {
            let folder = folder.unwrap_or_else(|| vault.hidden_root().to_path_buf());
            let request = BatchRequest::Hide {
                sources: files,
                folder,
                encrypt: encrypt || vault.config().encrypt_on_hide,
            };
            batch(vault, request)?;
        }

        Commands::Encrypt { files } => batch(vault, BatchRequest::Encrypt { files })?,

        Commands::Decrypt { files, assume_type } => batch(
            vault,
            BatchRequest::Decrypt {
                files,
                assumed_type: assume_type,
            },
        )?,

        Commands::Unhide { files, to } => batch(
            vault,
            BatchRequest::Unhide {
                files,
                destination: to,
            },
        )?,

        Commands::Copy { files, to } => batch(
            vault,
            BatchRequest::Copy {
                files,
                destination: to,
            },
        )?,

        Commands::Move { files, to } => batch(
            vault,
            BatchRequest::Move {
                files,
                destination: to,
            },
        )?,

        Commands::Rm { files } => batch(vault, BatchRequest::Delete { files })?,

        Commands::Rename { file, new_name } => {
            let renamed = vault.rename_file(&file, &new_name)?;
            println!("✅ Renamed to {}", renamed.display());
        }

        Commands::Ls { folder } => {
            let folder = folder.unwrap_or_else(|| vault.hidden_root().to_path_buf());
            list_folder(vault, &folder)?;
        }

        Commands::Mkdir { name, parent } => {
            let folder = vault.create_folder(parent.as_deref(), &name)?;
            println!("📁 Created {}", folder.display());
        }

        Commands::Rmdir { folder } => {
            vault.delete_folder(&folder)?;
            println!("🗑️ Deleted {}", folder.display());
        }

        Commands::RenameFolder { folder, new_name } => {
            let renamed = vault.rename_folder(&folder, &new_name)?;
            println!("✅ Renamed to {}", renamed.display());
        }

        Commands::Records => {
            let records = vault.records()?;
            if records.is_empty() {
                println!("📭 No records");
            }
            for record in records {
                let lock = if record.is_encrypted { "🔒" } else { "  " };
                println!(
                    "{} {:<8} {} ({}) added {}",
                    lock,
                    record.file_type,
                    record.file_path.display(),
                    record.file_name,
                    record.date_added.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Commands::Preview { file } => {
            let preview = vault.open_preview(&file)?;
            println!("{}", preview.display());
        }

        Commands::SetKey { passphrase } => {
            vault.set_custom_key(&passphrase)?;
            println!("🔑 Custom key active");
        }

        Commands::ClearKey => {
            vault.clear_custom_key()?;
            println!("🔑 Generated key active");
        }
    }

    Ok(())
}

fn batch(vault: &CalculatorVault, request: BatchRequest) -> Result<()> {
    let operation = request.operation();
    let report = vault.execute(&request)?;
    print_report(operation, &report);

    if !report.is_success() {
        bail!("{} of {} files failed", report.failed, report.failed + report.succeeded);
    }
    Ok(())
}

fn print_report(operation: BatchOperation, report: &BatchReport) {
    let icon = if report.is_success() { "✅" } else { "⚠️" };
    println!("{} {}", icon, report.summary(operation));
    for (from, to) in &report.remapped {
        println!("   {} -> {}", from.display(), to.display());
    }
    if report.skipped > 0 {
        println!("   {} skipped", report.skipped);
    }
}

fn list_folder(vault: &CalculatorVault, folder: &Path) -> Result<()> {
    let subfolders = vault.list_subfolders(folder)?;
    let files = vault.list_files(folder)?;

    if subfolders.is_empty() && files.is_empty() {
        println!("📭 {} is empty", folder.display());
        return Ok(());
    }

    for sub in subfolders {
        println!("📁 {}", name_of(&sub));
    }
    let show_names = vault.config().show_file_names;
    for file in files {
        let record = vault.record(&file)?;
        println!("{}", listing_line(&file, record.as_ref(), show_names));
    }
    Ok(())
}

/// One `ls` line; without names only the lock and the file type are shown
fn listing_line(file: &Path, record: Option<&HiddenFileRecord>, show_names: bool) -> String {
    let lock = match record {
        Some(record) if record.is_encrypted => "🔒",
        _ => "  ",
    };
    if show_names {
        format!("{} {}", lock, name_of(file))
    } else {
        let file_type = record.map_or_else(|| FileType::of_path(file), |r| r.file_type);
        format!("{} {}", lock, file_type)
    }
}

fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_hides_names_on_request() {
        let file = Path::new("/vault/Trips/beach.enc");
        let record = HiddenFileRecord::new(
            file.to_path_buf(),
            "beach.jpg",
            "beach.enc",
            FileType::Image,
            ".jpg",
            true,
        );

        assert_eq!(listing_line(file, Some(&record), true), "🔒 beach.enc");
        assert_eq!(listing_line(file, Some(&record), false), "🔒 IMAGE");
        assert_eq!(listing_line(Path::new("/vault/memo.txt"), None, false), "   DOCUMENT");
    }
}
