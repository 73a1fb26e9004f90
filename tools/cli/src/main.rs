//! PassBox CLI - Command line interface for the credential vault.
//!
//! Every command opens the vault of one user in a data directory, unlocks it
//! with the master password when needed, and exits. `passbox shell` keeps a
//! session open with the inactivity auto-lock running.

mod shell;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;
use zeroize::Zeroizing;

use passbox_common::UserId;
use passbox_crypto::{CipherCore, DEFAULT_ITERATIONS};
use passbox_storage::LocalBlobStore;
use passbox_vault::{
    BlobVaultStorage, CredentialEntry, EntryInput, EntrySummary, LocalIdentity, SessionState,
    VaultSession, VaultStorage,
};

/// User id used when neither `--user` nor `$USER` is available.
const FALLBACK_USER: &str = "local-user";

#[derive(Parser)]
#[command(name = "passbox")]
#[command(about = "PassBox - Local encrypted credential vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding vault files (default: platform data dir).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// User whose vault to open (default: $USER).
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up the master password for a new vault.
    Init {
        /// PBKDF2 iteration count.
        #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
        iterations: u32,
    },

    /// Add a credential. The secret is prompted for.
    Add {
        /// Entry title.
        title: String,

        #[arg(short = 'n', long, default_value = "")]
        username: String,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// List all credentials.
    List,

    /// Show one credential.
    Show {
        /// Entry id or unique id prefix.
        id: String,

        /// Print the secret instead of a mask.
        #[arg(short, long)]
        reveal: bool,
    },

    /// Change fields of a credential. Unspecified fields are kept.
    Edit {
        /// Entry id or unique id prefix.
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short = 'n', long)]
        username: Option<String>,

        /// New url; pass an empty string to remove it.
        #[arg(long)]
        url: Option<String>,

        /// New notes; pass an empty string to remove them.
        #[arg(long)]
        notes: Option<String>,

        /// Prompt for a new secret.
        #[arg(long)]
        secret: bool,
    },

    /// Remove a credential.
    Remove {
        /// Entry id or unique id prefix.
        id: String,
    },

    /// Search titles, usernames and urls.
    Search { query: String },

    /// Set the inactivity auto-lock timeout.
    SetTimeout {
        /// Timeout in milliseconds.
        ms: u64,
    },

    /// Show vault information.
    Info,

    /// Erase the vault of the current user.
    Clear {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },

    /// Open an interactive session with auto-lock.
    Shell,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let iterations = match cli.command {
        Commands::Init { iterations } => iterations,
        _ => DEFAULT_ITERATIONS,
    };
    let app = App::open(cli.data_dir, cli.user, iterations)?;

    match cli.command {
        Commands::Init { .. } => cmd_init(&app).await,
        Commands::Add {
            title,
            username,
            url,
            notes,
        } => cmd_add(&app, title, username, url, notes).await,
        Commands::List => cmd_list(&app).await,
        Commands::Show { id, reveal } => cmd_show(&app, &id, reveal).await,
        Commands::Edit {
            id,
            title,
            username,
            url,
            notes,
            secret,
        } => cmd_edit(&app, &id, title, username, url, notes, secret).await,
        Commands::Remove { id } => cmd_remove(&app, &id).await,
        Commands::Search { query } => cmd_search(&app, &query).await,
        Commands::SetTimeout { ms } => cmd_set_timeout(&app, ms).await,
        Commands::Info => cmd_info(&app).await,
        Commands::Clear { yes } => cmd_clear(&app, yes).await,
        Commands::Shell => shell::run(&app).await,
    }
}

/// Session plus the pieces the commands report on.
pub(crate) struct App {
    pub(crate) session: VaultSession,
    storage: Arc<BlobVaultStorage<LocalBlobStore>>,
    user: UserId,
    data_dir: PathBuf,
}

impl App {
    fn open(data_dir: Option<PathBuf>, user: Option<String>, iterations: u32) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => dirs::data_dir()
                .context("Cannot determine data directory; pass --data-dir")?
                .join("passbox"),
        };
        let user = user
            .or_else(|| std::env::var("USER").ok())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_USER.to_string());
        let user = UserId::new(user).context("Invalid user id")?;

        let blobs = LocalBlobStore::new(&data_dir).context("Failed to open data directory")?;
        let storage = Arc::new(BlobVaultStorage::new(blobs));
        let identity = Arc::new(LocalIdentity::new(user.clone()));
        let cipher = CipherCore::with_iterations(iterations).context("Invalid iteration count")?;
        let session = VaultSession::with_cipher(cipher, storage.clone(), identity);

        debug!(user = %user, dir = %data_dir.display(), "Opened vault directory");
        Ok(Self {
            session,
            storage,
            user,
            data_dir,
        })
    }

    /// Load the vault and unlock it with a prompted master password.
    pub(crate) async fn unlock(&self) -> Result<()> {
        let state = self
            .session
            .initialize()
            .await
            .context("Failed to load vault")?;
        if state == SessionState::NotConfigured {
            anyhow::bail!(
                "No vault for user '{}'. Run `passbox init` first.",
                self.user
            );
        }

        let password = prompt_password("Master password: ")?;
        let unlocked = self
            .session
            .unlock(&password)
            .await
            .context("Failed to unlock vault")?;
        if !unlocked {
            anyhow::bail!("Wrong master password");
        }
        Ok(())
    }
}

/// Prompt for a password or secret without echo.
pub(crate) fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

/// Resolve a full id or a unique id prefix against the listed entries.
pub(crate) fn match_id(summaries: &[EntrySummary], text: &str) -> Result<Uuid> {
    if let Ok(id) = Uuid::parse_str(text) {
        return Ok(id);
    }

    let prefix = text.trim().to_lowercase();
    if prefix.is_empty() {
        anyhow::bail!("Entry id cannot be empty");
    }
    let mut matches = summaries
        .iter()
        .filter(|summary| summary.id.to_string().starts_with(&prefix));
    match (matches.next(), matches.next()) {
        (Some(summary), None) => Ok(summary.id),
        (None, _) => anyhow::bail!("No entry matches '{}'", text),
        (Some(_), Some(_)) => anyhow::bail!("Id prefix '{}' is ambiguous", text),
    }
}

pub(crate) async fn resolve_id(app: &App, text: &str) -> Result<Uuid> {
    match_id(&app.session.summaries().await, text)
}

pub(crate) fn short_id(id: &Uuid) -> String {
    id.to_string()[..8].to_string()
}

pub(crate) fn print_summaries(summaries: &[EntrySummary]) {
    if summaries.is_empty() {
        println!("No entries.");
        return;
    }
    for summary in summaries {
        let url = summary.url.as_deref().unwrap_or("");
        println!(
            "  {}  {:<24} {:<28} {}",
            short_id(&summary.id),
            summary.title,
            summary.username,
            url
        );
    }
}

pub(crate) fn print_entry(entry: &CredentialEntry, reveal: bool) {
    println!("{}", entry.title);
    println!("  ID: {}", entry.id);
    println!("  Username: {}", entry.username);
    if reveal {
        println!("  Secret: {}", entry.secret);
    } else {
        println!("  Secret: ********");
    }
    if let Some(url) = &entry.url {
        println!("  URL: {}", url);
    }
    if let Some(notes) = &entry.notes {
        println!("  Notes: {}", notes);
    }
    println!("  Created: {}", entry.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Modified: {}", entry.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
}

/// Set up the master password.
async fn cmd_init(app: &App) -> Result<()> {
    info!("Creating vault for {}", app.user);

    let state = app
        .session
        .initialize()
        .await
        .context("Failed to load vault")?;
    if state != SessionState::NotConfigured {
        anyhow::bail!(
            "A vault already exists for user '{}'. Use `passbox clear` to start over.",
            app.user
        );
    }

    let password = prompt_password("New master password: ")?;
    let confirm = prompt_password("Confirm master password: ")?;
    if *password != *confirm {
        anyhow::bail!("Passwords do not match");
    }

    app.session
        .setup_master_password(&password)
        .await
        .context("Failed to set up master password")?;

    println!("Vault created successfully!");
    println!("  User: {}", app.user);
    println!("  Location: {}", app.data_dir.display());

    Ok(())
}

/// Add a credential.
async fn cmd_add(
    app: &App,
    title: String,
    username: String,
    url: Option<String>,
    notes: Option<String>,
) -> Result<()> {
    app.unlock().await?;

    let secret = prompt_password("Secret: ")?;
    let mut input = EntryInput::new(title, username, secret.as_str());
    if let Some(url) = url {
        input = input.with_url(url);
    }
    if let Some(notes) = notes {
        input = input.with_notes(notes);
    }

    let entry = app
        .session
        .create_entry(input)
        .await
        .context("Failed to add entry")?;

    println!("Entry added: {} ({})", entry.title, short_id(&entry.id));
    Ok(())
}

/// List all credentials.
async fn cmd_list(app: &App) -> Result<()> {
    app.unlock().await?;
    print_summaries(&app.session.summaries().await);
    Ok(())
}

/// Show one credential.
async fn cmd_show(app: &App, id: &str, reveal: bool) -> Result<()> {
    app.unlock().await?;

    let id = resolve_id(app, id).await?;
    let entry = app.session.entry(id).await.context("Entry not found")?;
    print_entry(&entry, reveal);
    Ok(())
}

/// Edit a credential, keeping unspecified fields.
async fn cmd_edit(
    app: &App,
    id: &str,
    title: Option<String>,
    username: Option<String>,
    url: Option<String>,
    notes: Option<String>,
    new_secret: bool,
) -> Result<()> {
    app.unlock().await?;

    let id = resolve_id(app, id).await?;
    let current = app.session.entry(id).await.context("Entry not found")?;

    let secret = if new_secret {
        prompt_password("New secret: ")?
    } else {
        Zeroizing::new(current.secret.clone())
    };
    let mut input = EntryInput::new(
        title.unwrap_or_else(|| current.title.clone()),
        username.unwrap_or_else(|| current.username.clone()),
        secret.as_str(),
    );
    input = match url {
        Some(url) => input.with_url(url),
        None => {
            input.url.clone_from(&current.url);
            input
        }
    };
    input = match notes {
        Some(notes) => input.with_notes(notes),
        None => {
            input.notes.clone_from(&current.notes);
            input
        }
    };

    let entry = app
        .session
        .update_entry(id, input)
        .await
        .context("Failed to update entry")?;

    println!("Entry updated: {} ({})", entry.title, short_id(&entry.id));
    Ok(())
}

/// Remove a credential.
async fn cmd_remove(app: &App, id: &str) -> Result<()> {
    app.unlock().await?;

    let id = resolve_id(app, id).await?;
    app.session
        .delete_entry(id)
        .await
        .context("Failed to remove entry")?;

    println!("Entry removed: {}", short_id(&id));
    Ok(())
}

/// Search titles, usernames and urls.
async fn cmd_search(app: &App, query: &str) -> Result<()> {
    app.unlock().await?;
    print_summaries(&app.session.search(query).await);
    Ok(())
}

/// Change the inactivity timeout. Works without unlocking.
async fn cmd_set_timeout(app: &App, ms: u64) -> Result<()> {
    app.session
        .set_inactivity_timeout_ms(ms)
        .await
        .context("Failed to set timeout")?;

    println!("Inactivity timeout set to {} ms", ms);
    Ok(())
}

/// Show vault information without unlocking.
async fn cmd_info(app: &App) -> Result<()> {
    let state = app
        .session
        .initialize()
        .await
        .context("Failed to load vault")?;
    let config = app.session.config().await;

    println!("Vault Information:");
    println!("  User: {}", app.user);
    println!("  Location: {}", app.storage.blobs().root().display());
    println!("  State: {:?}", state);
    println!("  Inactivity timeout: {} ms", config.inactivity_timeout_ms());

    let Some(envelope) = app
        .storage
        .load(&app.user)
        .await
        .context("Failed to read vault")?
    else {
        return Ok(());
    };

    let kdf = envelope.master.kdf();
    println!("  KDF Parameters:");
    println!("    Algorithm: {:?} / {:?}", kdf.algorithm(), kdf.hash());
    println!("    Iterations: {}", kdf.iterations());
    match &envelope.vault {
        Some(record) => {
            println!("  Schema version: {}", record.version);
            println!("  Modified: {}", record.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        None => println!("  Credentials: none stored yet"),
    }

    Ok(())
}

/// Erase the vault.
async fn cmd_clear(app: &App, yes: bool) -> Result<()> {
    if !yes {
        print!(
            "This permanently erases the vault of '{}'. Type 'yes' to continue: ",
            app.user
        );
        std::io::stdout().flush()?;

        let mut answer = String::new();
        std::io::stdin()
            .read_line(&mut answer)
            .context("Failed to read confirmation")?;
        if answer.trim() != "yes" {
            println!("Aborted.");
            return Ok(());
        }
    }

    app.session
        .clear_all_data()
        .await
        .context("Failed to clear vault")?;

    println!("Vault erased.");
    Ok(())
}
