//! Vaultic CLI - Command line interface for restoring and storing files.
//!
//! Presentation only: every operation is delegated to `VaultEngine`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vaultic_common::{Error as VaultError, SensitiveBytes};
use vaultic_vault::{EngineSettings, IndexSource, ProviderSettings, VaultEngine};

#[derive(Parser)]
#[command(name = "vaultic")]
#[command(about = "Vaultic - Encrypted, content-addressed backup vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command.
#[derive(Args)]
struct VaultArgs {
    /// Engine settings file (JSON).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage provider to use instead of the one in the settings file.
    #[arg(long)]
    provider: Option<String>,

    /// Passphrase; prompted for when omitted.
    #[arg(long)]
    passphrase: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore a file from a vault.
    Restore {
        /// Vault identifier.
        vault_id: String,

        /// Logical path of the file inside the vault.
        filepath: String,

        /// Directory the restored file is written to.
        #[arg(short, long, default_value = "./restored")]
        output_dir: PathBuf,

        /// File name to restore as (default: last component of the path).
        #[arg(short = 'n', long)]
        output_name: Option<String>,

        #[command(flatten)]
        vault: VaultArgs,
    },

    /// Store a file in a vault.
    Store {
        /// Vault identifier.
        vault_id: String,

        /// Local file to store.
        source: PathBuf,

        /// Logical path inside the vault (default: the source file name).
        #[arg(long = "as")]
        logical_path: Option<String>,

        #[command(flatten)]
        vault: VaultArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let result = match cli.command {
        Commands::Restore {
            vault_id,
            filepath,
            output_dir,
            output_name,
            vault,
        } => cmd_restore(&vault_id, &filepath, &output_dir, output_name.as_deref(), vault).await,

        Commands::Store {
            vault_id,
            source,
            logical_path,
            vault,
        } => cmd_store(&vault_id, &source, logical_path.as_deref(), vault).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

/// Print an error chain, with hints for errors the user can act on.
fn report_error(err: &anyhow::Error) {
    eprintln!("Error: {:#}", err);

    match err.downcast_ref::<VaultError>() {
        Some(VaultError::FileNotFoundInIndex { available, .. }) if !available.is_empty() => {
            eprintln!("Available files include:");
            for path in available {
                eprintln!("  {}", path);
            }
        }
        Some(VaultError::InvalidPassphrase) => {
            eprintln!("Check the passphrase and try again.");
        }
        _ => {}
    }
}

/// Load settings and apply the `--provider` override.
///
/// The provider configuration from the file is kept only when the override
/// names the same kind.
fn load_settings(args: &VaultArgs) -> Result<EngineSettings> {
    let settings = match &args.config {
        Some(path) => EngineSettings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => EngineSettings::default(),
    };
    Ok(with_provider_override(settings, args.provider.as_deref()))
}

fn with_provider_override(mut settings: EngineSettings, kind: Option<&str>) -> EngineSettings {
    if let Some(kind) = kind {
        let config = match settings.provider.take() {
            Some(current) if current.kind == kind => current.config,
            _ => Default::default(),
        };
        settings.provider = Some(ProviderSettings {
            kind: kind.to_string(),
            config,
        });
    }
    settings
}

/// Prompt for the passphrase securely unless one was given.
fn read_passphrase(given: Option<String>) -> Result<SensitiveBytes> {
    let passphrase = match given {
        Some(passphrase) => passphrase,
        None => rpassword::prompt_password("Enter passphrase: ")
            .context("Failed to read passphrase")?,
    };
    Ok(SensitiveBytes::from(passphrase))
}

/// `<output_dir>/<output_name or last component of filepath>`.
fn destination_for(output_dir: &Path, output_name: Option<&str>, filepath: &str) -> Result<PathBuf> {
    let name = match output_name {
        Some(name) => name,
        None => filepath
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .with_context(|| format!("Cannot derive a file name from '{}'", filepath))?,
    };
    Ok(output_dir.join(name))
}

async fn cmd_restore(
    vault_id: &str,
    filepath: &str,
    output_dir: &Path,
    output_name: Option<&str>,
    args: VaultArgs,
) -> Result<()> {
    let settings = load_settings(&args)?;
    let engine = VaultEngine::from_settings(settings).context("Failed to initialize vault engine")?;
    let dest = destination_for(output_dir, output_name, filepath)?;

    info!("Restoring {} from vault {}", filepath, vault_id);
    let passphrase = read_passphrase(args.passphrase)?;

    let outcome = engine
        .restore(vault_id, filepath, &passphrase, &dest)
        .await
        .with_context(|| format!("Failed to restore '{}'", filepath))?;

    if outcome.index_source == IndexSource::Legacy {
        eprintln!("Warning: file list was read from the unauthenticated legacy index.");
    }

    println!("File restored successfully!");
    println!("  Path: {}", outcome.destination.display());
    println!("  Size: {} bytes", outcome.bytes_written);
    println!("  Hash: {}", outcome.hash);
    if !outcome.origin.is_local() {
        println!("  Fetched from remote storage");
    }

    Ok(())
}

async fn cmd_store(
    vault_id: &str,
    source: &Path,
    logical_path: Option<&str>,
    args: VaultArgs,
) -> Result<()> {
    let logical_path = match logical_path {
        Some(path) => path.to_string(),
        None => source
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .with_context(|| format!("Cannot derive a logical path from {}", source.display()))?,
    };

    let settings = load_settings(&args)?;
    let engine = VaultEngine::from_settings(settings).context("Failed to initialize vault engine")?;

    info!("Storing {} in vault {} as {}", source.display(), vault_id, logical_path);
    let passphrase = read_passphrase(args.passphrase)?;

    let outcome = engine
        .store(vault_id, &logical_path, source, &passphrase)
        .await
        .with_context(|| format!("Failed to store {}", source.display()))?;

    println!("File stored successfully: {} ({} bytes)", logical_path, outcome.size);
    println!("  Hash: {}", outcome.hash);
    if !outcome.newly_stored {
        println!("  Identical content was already in the vault");
    }
    if outcome.uploaded {
        println!("  Uploaded to remote storage");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_uses_basename() {
        let dest = destination_for(Path::new("./restored"), None, "docs/2024/report.pdf").unwrap();
        assert_eq!(dest, PathBuf::from("./restored/report.pdf"));
    }

    #[test]
    fn test_destination_override_name() {
        let dest = destination_for(Path::new("out"), Some("copy.pdf"), "docs/report.pdf").unwrap();
        assert_eq!(dest, PathBuf::from("out/copy.pdf"));
    }

    #[test]
    fn test_destination_rejects_trailing_slash() {
        assert!(destination_for(Path::new("out"), None, "docs/").is_err());
    }

    #[test]
    fn test_provider_override() {
        let from_file = EngineSettings::from_json(
            r#"{ "provider": { "kind": "local", "config": { "root": "/mnt/backup" } } }"#,
        )
        .unwrap();

        let unchanged = with_provider_override(from_file.clone(), None);
        assert_eq!(unchanged, from_file);

        let same_kind = with_provider_override(from_file.clone(), Some("local"));
        assert_eq!(same_kind.provider.unwrap().config["root"], "/mnt/backup");

        let switched = with_provider_override(from_file, Some("memory")).provider.unwrap();
        assert_eq!(switched.kind, "memory");
        assert!(switched.config.is_null());
    }

    #[test]
    fn test_provider_flag_parses() {
        let cli = Cli::try_parse_from(["vaultic", "store", "v1", "notes.txt", "--provider", "memory"])
            .unwrap();
        match cli.command {
            Commands::Store { vault, .. } => assert_eq!(vault.provider.as_deref(), Some("memory")),
            Commands::Restore { .. } => panic!("expected store"),
        }
    }

    #[test]
    fn test_restore_arguments() {
        let cli = Cli::try_parse_from(["vaultic", "restore", "v1", "test.txt", "--passphrase", "pw"])
            .unwrap();
        match cli.command {
            Commands::Restore {
                vault_id,
                filepath,
                output_dir,
                vault,
                ..
            } => {
                assert_eq!(vault_id, "v1");
                assert_eq!(filepath, "test.txt");
                assert_eq!(output_dir, PathBuf::from("./restored"));
                assert_eq!(vault.passphrase.as_deref(), Some("pw"));
            }
            Commands::Store { .. } => panic!("expected restore"),
        }
    }
}
