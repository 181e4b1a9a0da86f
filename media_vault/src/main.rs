//! Media Vault - CLI
//!
//! Command-line interface for vault operations.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use secrecy::SecretString;

use media_vault::{RotationPhase, UnlockOutcome, Vault, VaultConfig};

#[derive(Parser)]
#[command(name = "media-vault")]
#[command(version = media_vault::VERSION)]
#[command(about = "Media Vault - envelope-encrypted media storage")]
struct Cli {
    /// Vault path
    #[arg(short, long, env = "MEDIA_VAULT_PATH", default_value = "./vault")]
    vault: PathBuf,

    /// Log debug output
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault and print its recovery phrase
    Create {
        #[arg(short, long, env = "MEDIA_VAULT_PASSWORD", hide_env_values = true)]
        password: String,

        /// Cheaper key derivation for small devices
        #[arg(long)]
        low_memory: bool,
    },

    /// Check a password
    Unlock {
        #[arg(short, long, env = "MEDIA_VAULT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Import a file; the plaintext source is securely deleted
    Import {
        path: PathBuf,

        /// MIME type (detected from content if omitted)
        #[arg(long)]
        mime: Option<String>,

        #[arg(short, long, env = "MEDIA_VAULT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Decrypt a file out of the vault
    Export {
        /// Envelope name or path
        file: PathBuf,

        /// Output path
        output: PathBuf,

        #[arg(short, long, env = "MEDIA_VAULT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// List all files
    List {
        #[arg(short, long, env = "MEDIA_VAULT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Securely delete a file
    Delete {
        /// Envelope name or path
        file: PathBuf,

        #[arg(short, long, env = "MEDIA_VAULT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Change the password
    ChangePassword {
        #[arg(long, env = "MEDIA_VAULT_PASSWORD", hide_env_values = true)]
        old: String,

        #[arg(long, env = "MEDIA_VAULT_NEW_PASSWORD", hide_env_values = true)]
        new: String,
    },

    /// Finish an interrupted password change
    Resume {
        #[arg(long, env = "MEDIA_VAULT_PASSWORD", hide_env_values = true)]
        old: String,

        #[arg(long, env = "MEDIA_VAULT_NEW_PASSWORD", hide_env_values = true)]
        new: String,
    },

    /// Roll an interrupted password change back to the old password
    Abort {
        #[arg(long, env = "MEDIA_VAULT_PASSWORD", hide_env_values = true)]
        old: String,

        #[arg(long, env = "MEDIA_VAULT_NEW_PASSWORD", hide_env_values = true)]
        new: String,
    },

    /// Show an unfinished password change
    Status,

    /// Print the recovery phrase again
    RecoveryPhrase {
        #[arg(short, long, env = "MEDIA_VAULT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Set a new password using the recovery phrase
    Recover {
        /// The 24 recovery words
        #[arg(long, env = "MEDIA_VAULT_RECOVERY_PHRASE", hide_env_values = true)]
        phrase: String,

        #[arg(long, env = "MEDIA_VAULT_NEW_PASSWORD", hide_env_values = true)]
        new: String,
    },

    /// Manage the panic PIN
    Panic {
        #[arg(short, long, env = "MEDIA_VAULT_PASSWORD", hide_env_values = true)]
        password: String,

        #[command(subcommand)]
        command: PanicCommands,
    },

    /// Destroy the vault
    Wipe {
        #[arg(short, long, env = "MEDIA_VAULT_PASSWORD", hide_env_values = true)]
        password: String,

        /// Confirm destruction
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum PanicCommands {
    /// Set the panic PIN
    Set {
        #[arg(long, env = "MEDIA_VAULT_PANIC_PIN", hide_env_values = true)]
        pin: String,
    },

    /// Remove the panic PIN and its switches
    Clear,

    /// Wipe the vault when the PIN is entered as password
    Wipe {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },

    /// Let the PIN reveal the vault from a disguised entry
    Disguise {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<media_vault::VaultError>() {
            Some(vault_error) => eprintln!("Error: {}", vault_error.user_message()),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Create { password, low_memory } => {
            println!("🔐 Creating new Media Vault...");
            let config = if low_memory {
                VaultConfig::low_memory()
            } else {
                VaultConfig::default()
            };
            let (_vault, _session, phrase) =
                Vault::create(&cli.vault, &secret(password), config)?;
            println!("✅ Vault created at: {}", cli.vault.display());
            println!();
            println!("📝 Recovery phrase (write it down, it is shown once):");
            print_phrase(phrase.words());
        }

        Commands::Unlock { password } => {
            println!("🔓 Unlocking vault...");
            let vault = Vault::open(&cli.vault)?;
            match vault.unlock_or_panic(&secret(password))? {
                UnlockOutcome::Unlocked(_) => println!("✅ Vault unlocked!"),
                // Indistinguishable from a typo.
                UnlockOutcome::Wiped => bail!("Incorrect password or corrupted data"),
            }
        }

        Commands::Import { path, mime, password } => {
            println!("📥 Importing: {}", path.display());
            let vault = Vault::open(&cli.vault)?;
            let session = vault.unlock(&secret(password))?;
            let imported = vault.import_file(&session, &path, mime.as_deref())?;
            let action = if imported.adopted { "adopted" } else { "encrypted" };
            println!("✅ File {} as: {}", action, display_name(&imported.path));
        }

        Commands::Export { file, output, password } => {
            let vault = Vault::open(&cli.vault)?;
            let session = vault.unlock(&secret(password))?;
            let path = resolve(&vault, &file);
            println!("📤 Exporting: {}", display_name(&path));

            let mut stream = vault.decrypt_to_stream(&session, &path)?;
            let out = File::create(&output)
                .with_context(|| format!("cannot create {}", output.display()))?;
            let mut writer = BufWriter::new(out);
            if let Err(e) = io::copy(&mut stream, &mut writer) {
                drop(writer);
                let _ = std::fs::remove_file(&output);
                return Err(media_vault::VaultError::from(e).into());
            }
            writer.flush()?;

            println!(
                "✅ {} ({}) exported to: {}",
                stream.metadata().filename,
                stream.metadata().mime_type,
                output.display()
            );
        }

        Commands::List { password } => {
            let vault = Vault::open(&cli.vault)?;
            let session = vault.unlock(&secret(password))?;
            let files = vault.list_files()?;

            if files.is_empty() {
                println!("📭 No files in vault");
            } else {
                println!("🗂️ Files in vault ({}):", files.len());
                println!("{:-<72}", "");
                for path in files {
                    match vault.peek_metadata(&session, &path) {
                        Ok(meta) => println!(
                            "{}  {}  {}  {}",
                            display_name(&path),
                            meta.created_at.format("%Y-%m-%d %H:%M"),
                            meta.mime_type,
                            meta.filename
                        ),
                        Err(e) => println!("{}  ⚠️ {}", display_name(&path), e.user_message()),
                    }
                }
            }
        }

        Commands::Delete { file, password } => {
            let vault = Vault::open(&cli.vault)?;
            let _session = vault.unlock(&secret(password))?;
            let path = resolve(&vault, &file);
            println!("🗑️ Deleting: {}", display_name(&path));
            if vault.delete_file(&path)? {
                println!("✅ File destroyed!");
            } else {
                println!("📭 Nothing to delete");
            }
        }

        Commands::ChangePassword { old, new } => {
            println!("🔑 Changing password...");
            let vault = Vault::open(&cli.vault)?;
            let report = vault.change_secret(&secret(old), &secret(new), print_progress)?;
            println!(
                "✅ Password changed! {} of {} files rewrapped in {:.1}s",
                report.files_rewrapped,
                report.files_total,
                report.elapsed.as_secs_f64()
            );
        }

        Commands::Resume { old, new } => {
            println!("🔄 Resuming password change...");
            let vault = Vault::open(&cli.vault)?;
            let report = vault.resume_rotation(&secret(old), &secret(new), print_progress)?;
            println!(
                "✅ Password change finished ({} files rewrapped)",
                report.files_rewrapped
            );
        }

        Commands::Abort { old, new } => {
            println!("↩️ Rolling back password change...");
            let vault = Vault::open(&cli.vault)?;
            if vault.abort_rotation(&secret(old), &secret(new))? {
                println!("✅ Old password restored");
            } else {
                println!("⚠️ Change had already been committed; the new password stays");
            }
        }

        Commands::Status => {
            let vault = Vault::open(&cli.vault)?;
            match vault.rotation_status()? {
                None => println!("💚 No password change in progress"),
                Some(status) => {
                    println!("⚠️ Unfinished password change");
                    println!("   Started:  {}", status.started_at.format("%Y-%m-%d %H:%M:%S"));
                    println!("   Phase:    {:?}", status.phase);
                    println!("   Progress: {} of {} items", status.rotated, status.total);
                }
            }
        }

        Commands::RecoveryPhrase { password } => {
            let vault = Vault::open(&cli.vault)?;
            let session = vault.unlock(&secret(password))?;
            let phrase = vault.export_recovery_artifact(&session)?;
            println!("📝 Recovery phrase:");
            print_phrase(phrase.words());
        }

        Commands::Recover { phrase, new } => {
            println!("🛟 Recovering vault...");
            let vault = Vault::open(&cli.vault)?;
            vault.recover(&secret(new), &phrase)?;
            println!("✅ New password set");
        }

        Commands::Panic { password, command } => {
            let vault = Vault::open(&cli.vault)?;
            let session = vault.unlock(&secret(password))?;
            match command {
                PanicCommands::Set { pin } => {
                    vault.set_panic_pin(&session, &pin)?;
                    println!("✅ Panic PIN set");
                }
                PanicCommands::Clear => {
                    vault.clear_panic_pin(&session)?;
                    println!("✅ Panic PIN cleared");
                }
                PanicCommands::Wipe { enabled } => {
                    vault.enable_panic_wipe(&session, enabled)?;
                    println!("✅ Panic wipe {}", on_off(enabled));
                }
                PanicCommands::Disguise { enabled } => {
                    vault.enable_disguised_entry(&session, enabled)?;
                    println!("✅ Disguised entry {}", on_off(enabled));
                }
            }
        }

        Commands::Wipe { password, yes } => {
            if !yes {
                bail!("refusing to wipe without --yes");
            }
            let vault = Vault::open(&cli.vault)?;
            let session = vault.unlock(&secret(password))?;
            drop(session);
            let destroyed = vault.wipe()?;
            println!("💥 Vault wiped ({} files destroyed)", destroyed);
        }
    }

    Ok(())
}

fn secret(value: String) -> SecretString {
    SecretString::from(value)
}

/// Accept a bare envelope name as well as a path
fn resolve(vault: &Vault, file: &Path) -> PathBuf {
    if file.exists() {
        return file.to_path_buf();
    }
    vault.root().join(media_vault::vault::FILES_DIR).join(file)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_phrase(words: Vec<&str>) {
    for (row, chunk) in words.chunks(6).enumerate() {
        let line: Vec<String> = chunk
            .iter()
            .enumerate()
            .map(|(i, w)| format!("{:>2}. {:<10}", row * 6 + i + 1, w))
            .collect();
        println!("   {}", line.join(" "));
    }
}

fn print_progress(phase: RotationPhase) -> ControlFlow<()> {
    match phase {
        RotationPhase::RewrappingFiles { done, total } => {
            print!("\r   Rewrapping files: {}/{}", done, total);
            let _ = io::stdout().flush();
            if done == total {
                println!();
            }
        }
        RotationPhase::Done => {}
        other => println!("   {:?}", other),
    }
    ControlFlow::Continue(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}
