use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rpassword::prompt_password;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;
use zeroize::Zeroizing;

use hostvault_core::{
    sync::state, AuthState, ConflictInfo, CredentialCache, DeviceIdentity, MetaValue,
    SessionToken, SyncClient, SyncEngine, SyncOutcome, VaultData, VaultHost, VaultIdentity,
    VaultSnippet, VaultStore,
};

/// HostVault - encrypted SSH credential vault with multi-device sync
#[derive(Parser)]
#[command(name = "hostvault", version)]
#[command(about = "Encrypted SSH credential vault with multi-device sync", long_about = None)]
struct Cli {
    /// Vault file (defaults to the platform data directory)
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault
    Init {
        /// Name for this device in sync listings
        #[arg(long)]
        device_name: Option<String>,
    },

    /// Show vault revision, contents summary, and sync state
    Info,

    /// Manage connection targets
    #[command(subcommand)]
    Host(HostCommand),

    /// Manage SSH identities
    #[command(subcommand)]
    Identity(IdentityCommand),

    /// Manage command snippets
    #[command(subcommand)]
    Snippet(SnippetCommand),

    /// Read or write extensible metadata entries
    #[command(subcommand)]
    Meta(MetaCommand),

    /// Synchronize with the account service
    #[command(subcommand)]
    Sync(SyncCommand),
}

#[derive(Subcommand)]
enum HostCommand {
    /// Add a connection target, or update the one with the same label
    Add {
        #[arg(long)]
        label: String,

        #[arg(long)]
        hostname: String,

        #[arg(long, default_value_t = 22)]
        port: u16,

        #[arg(long)]
        username: String,

        /// Identity to connect with, by name
        #[arg(long)]
        identity: Option<String>,

        #[arg(long)]
        group: Option<String>,
    },

    /// List connection targets
    List,

    /// Remove a connection target by label or id
    Remove { target: String },
}

#[derive(Subcommand)]
enum IdentityCommand {
    /// Add an SSH identity from a private key file
    Add {
        #[arg(long)]
        name: String,

        /// Key algorithm, e.g. "ed25519" or "rsa"
        #[arg(long, default_value = "ed25519")]
        key_type: String,

        /// File containing the PEM-encoded private key
        #[arg(long)]
        key_file: PathBuf,

        /// Prompt for the key passphrase and store it alongside the key
        #[arg(long)]
        passphrase: bool,
    },

    /// List identities (never prints key material)
    List,

    /// Remove an identity by name or id
    Remove { target: String },
}

#[derive(Subcommand)]
enum SnippetCommand {
    /// Add a command snippet, or update the one with the same name
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        script: String,
    },

    /// List snippets
    List,

    /// Remove a snippet by name or id
    Remove { target: String },
}

#[derive(Subcommand)]
enum MetaCommand {
    /// Set a metadata value
    Set {
        key: String,
        value: String,

        #[arg(long, value_enum, default_value_t = MetaKind::Text)]
        kind: MetaKind,
    },

    /// Print a metadata value as JSON
    Get { key: String },

    /// Remove a metadata entry
    Remove { key: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum MetaKind {
    Text,
    Bool,
    Int,
}

#[derive(Subcommand)]
enum SyncCommand {
    /// Sign in to the account service
    Login {
        #[arg(long)]
        server: String,

        #[arg(long)]
        email: String,
    },

    /// Create an account on the service
    Register {
        #[arg(long)]
        server: String,

        #[arg(long)]
        email: String,
    },

    /// Show session and last-sync state
    Status,

    /// Run one sync cycle
    Run,

    /// Resolve a reported conflict
    Resolve {
        /// Overwrite the remote vault with this device's state
        #[arg(long, conflicts_with = "keep_remote")]
        keep_local: bool,

        /// Adopt the remote vault, discarding local changes
        #[arg(long)]
        keep_remote: bool,
    },

    /// Forget the cached session
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let cli = Cli::parse();
    let path = cli
        .vault
        .clone()
        .unwrap_or_else(hostvault_core::default_vault_path);

    match cli.command {
        Commands::Init { device_name } => cmd_init(&path, device_name.as_deref()).await,
        Commands::Info => cmd_info(&path).await,
        Commands::Host(command) => cmd_host(&path, command).await,
        Commands::Identity(command) => cmd_identity(&path, command).await,
        Commands::Snippet(command) => cmd_snippet(&path, command).await,
        Commands::Meta(command) => cmd_meta(&path, command).await,
        Commands::Sync(command) => cmd_sync(&path, command).await,
    }
}

// --- Vault commands ---

async fn cmd_init(path: &Path, device_name: Option<&str>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let password = Zeroizing::new(prompt_password("New vault password: ")?);
    let confirm = Zeroizing::new(prompt_password("Confirm vault password: ")?);
    if *password != *confirm {
        bail!("Passwords do not match");
    }
    if password.is_empty() {
        bail!("Vault password must not be empty");
    }

    let device = device_identity(device_name)?;
    let store = VaultStore::create(
        path,
        CredentialCache::new(&password),
        VaultData::new(device.id),
    )
    .await?;

    println!("Created vault at {}", store.path().display());
    println!("Device id: {} ({})", device.id, device.name);
    Ok(())
}

async fn cmd_info(path: &Path) -> Result<()> {
    let store = open_vault(path).await?;
    let meta = store.local_meta().await;
    let model = store.model().await;

    println!("Vault:      {}", path.display());
    println!("Revision:   {}", meta.revision_id());
    println!("Updated:    {}", meta.updated_at);
    println!("Hosts:      {}", model.hosts().len());
    println!("Identities: {}", model.identities().len());
    println!("Snippets:   {}", model.snippets().len());
    print_sync_point(path);
    Ok(())
}

async fn cmd_host(path: &Path, command: HostCommand) -> Result<()> {
    match command {
        HostCommand::Add {
            label,
            hostname,
            port,
            username,
            identity,
            group,
        } => {
            let store = open_vault(path).await?;

            let identity_id = match &identity {
                Some(name) => Some(
                    store
                        .model()
                        .await
                        .identities()
                        .iter()
                        .find(|i| i.name == *name)
                        .map(|i| i.id)
                        .with_context(|| format!("no identity named '{name}'"))?,
                ),
                None => None,
            };
            let existing = store
                .model()
                .await
                .hosts()
                .iter()
                .find(|h| h.label == label)
                .map(|h| h.id);

            store.model_mut().await.upsert_host(VaultHost {
                id: existing.unwrap_or_else(Uuid::new_v4),
                label: label.clone(),
                hostname,
                port,
                username,
                identity_id,
                group,
                tmux: Default::default(),
            });
            let meta = store.save().await?;
            println!("Saved host '{}' (revision {})", label, meta.revision);
        }
        HostCommand::List => {
            let store = open_vault(path).await?;
            let model = store.model().await;
            if model.hosts().is_empty() {
                println!("No hosts");
                return Ok(());
            }
            for host in model.hosts() {
                let identity = model
                    .resolve_identity(host)
                    .map(|i| i.name.as_str())
                    .unwrap_or("-");
                println!(
                    "{}  {:<20} {}@{}:{}  identity={}  group={}",
                    host.id,
                    host.label,
                    host.username,
                    host.hostname,
                    host.port,
                    identity,
                    host.group.as_deref().unwrap_or("-"),
                );
            }
        }
        HostCommand::Remove { target } => {
            let store = open_vault(path).await?;
            let id = match Uuid::parse_str(&target) {
                Ok(id) => id,
                Err(_) => store
                    .model()
                    .await
                    .hosts()
                    .iter()
                    .find(|h| h.label == target)
                    .map(|h| h.id)
                    .with_context(|| format!("no host matching '{target}'"))?,
            };
            store.model_mut().await.remove_host(id)?;
            let meta = store.save().await?;
            println!("Removed host (revision {})", meta.revision);
        }
    }
    Ok(())
}

async fn cmd_identity(path: &Path, command: IdentityCommand) -> Result<()> {
    match command {
        IdentityCommand::Add {
            name,
            key_type,
            key_file,
            passphrase,
        } => {
            let private_key = std::fs::read_to_string(&key_file)
                .with_context(|| format!("reading {}", key_file.display()))?;
            let passphrase = if passphrase {
                Some(prompt_password("Key passphrase: ")?)
            } else {
                None
            };

            let store = open_vault(path).await?;
            let existing = store
                .model()
                .await
                .identities()
                .iter()
                .find(|i| i.name == name)
                .map(|i| i.id);

            store.model_mut().await.upsert_identity(VaultIdentity {
                id: existing.unwrap_or_else(Uuid::new_v4),
                name: name.clone(),
                key_type,
                private_key,
                passphrase,
            });
            let meta = store.save().await?;
            println!("Saved identity '{}' (revision {})", name, meta.revision);
        }
        IdentityCommand::List => {
            let store = open_vault(path).await?;
            let model = store.model().await;
            if model.identities().is_empty() {
                println!("No identities");
                return Ok(());
            }
            for identity in model.identities() {
                let locked = if identity.passphrase.is_some() {
                    "passphrase"
                } else {
                    "no passphrase"
                };
                println!(
                    "{}  {:<20} {} ({})",
                    identity.id, identity.name, identity.key_type, locked
                );
            }
        }
        IdentityCommand::Remove { target } => {
            let store = open_vault(path).await?;
            let id = match Uuid::parse_str(&target) {
                Ok(id) => id,
                Err(_) => store
                    .model()
                    .await
                    .identities()
                    .iter()
                    .find(|i| i.name == target)
                    .map(|i| i.id)
                    .with_context(|| format!("no identity matching '{target}'"))?,
            };
            store.model_mut().await.remove_identity(id)?;
            let meta = store.save().await?;
            println!("Removed identity (revision {})", meta.revision);
        }
    }
    Ok(())
}

async fn cmd_snippet(path: &Path, command: SnippetCommand) -> Result<()> {
    match command {
        SnippetCommand::Add { name, script } => {
            let store = open_vault(path).await?;
            let existing = store
                .model()
                .await
                .snippets()
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.id);

            store.model_mut().await.upsert_snippet(VaultSnippet {
                id: existing.unwrap_or_else(Uuid::new_v4),
                name: name.clone(),
                script,
            });
            let meta = store.save().await?;
            println!("Saved snippet '{}' (revision {})", name, meta.revision);
        }
        SnippetCommand::List => {
            let store = open_vault(path).await?;
            let model = store.model().await;
            if model.snippets().is_empty() {
                println!("No snippets");
                return Ok(());
            }
            for snippet in model.snippets() {
                println!("{}  {:<20} {}", snippet.id, snippet.name, snippet.script);
            }
        }
        SnippetCommand::Remove { target } => {
            let store = open_vault(path).await?;
            let id = match Uuid::parse_str(&target) {
                Ok(id) => id,
                Err(_) => store
                    .model()
                    .await
                    .snippets()
                    .iter()
                    .find(|s| s.name == target)
                    .map(|s| s.id)
                    .with_context(|| format!("no snippet matching '{target}'"))?,
            };
            store.model_mut().await.remove_snippet(id)?;
            let meta = store.save().await?;
            println!("Removed snippet (revision {})", meta.revision);
        }
    }
    Ok(())
}

async fn cmd_meta(path: &Path, command: MetaCommand) -> Result<()> {
    match command {
        MetaCommand::Set { key, value, kind } => {
            let value = match kind {
                MetaKind::Text => MetaValue::Text(value),
                MetaKind::Bool => MetaValue::Bool(
                    value
                        .parse()
                        .with_context(|| format!("'{value}' is not a bool"))?,
                ),
                MetaKind::Int => MetaValue::Int(
                    value
                        .parse()
                        .with_context(|| format!("'{value}' is not an integer"))?,
                ),
            };
            let store = open_vault(path).await?;
            store.model_mut().await.set_meta(&key, value);
            let meta = store.save().await?;
            println!("Set '{}' (revision {})", key, meta.revision);
        }
        MetaCommand::Get { key } => {
            let store = open_vault(path).await?;
            let model = store.model().await;
            let value = model
                .meta(&key)
                .with_context(|| format!("no metadata entry '{key}'"))?;
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        MetaCommand::Remove { key } => {
            let store = open_vault(path).await?;
            store.model_mut().await.remove_meta(&key)?;
            let meta = store.save().await?;
            println!("Removed '{}' (revision {})", key, meta.revision);
        }
    }
    Ok(())
}

// --- Sync commands ---

async fn cmd_sync(path: &Path, command: SyncCommand) -> Result<()> {
    match command {
        SyncCommand::Login { server, email } => cmd_sign_in(&server, &email, false).await,
        SyncCommand::Register { server, email } => cmd_sign_in(&server, &email, true).await,
        SyncCommand::Status => cmd_sync_status(path).await,
        SyncCommand::Run => cmd_sync_run(path).await,
        SyncCommand::Resolve {
            keep_local,
            keep_remote,
        } => cmd_sync_resolve(path, keep_local, keep_remote).await,
        SyncCommand::Logout => cmd_sync_logout(),
    }
}

async fn cmd_sign_in(server: &str, email: &str, register: bool) -> Result<()> {
    let client = SyncClient::new()?;
    client.configure(server).await?;

    let password = Zeroizing::new(prompt_password("Account password: ")?);
    let mut auth = if register {
        client.register(email, &password).await?
    } else {
        client.login(email, &password).await?
    };

    loop {
        match auth {
            AuthState::Authenticated => break,
            AuthState::TotpRequired { .. } => {
                let code = prompt_password("TOTP code: ")?;
                auth = client.verify_totp(code.trim()).await?;
            }
            AuthState::PendingApproval { ref ticket } => {
                println!("Approval pending (ticket {ticket}); waiting for an existing device...");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                auth = client.refresh_auth_status().await?;
            }
            other => bail!("Authentication did not complete (state: {})", other.name()),
        }
    }

    let token = client
        .session_token()
        .await
        .context("no session token after authentication")?;
    let server = client
        .base_url()
        .await
        .context("no server after authentication")?;
    store_session(&SessionCache { server, token })?;
    println!("Signed in");
    Ok(())
}

async fn cmd_sync_status(path: &Path) -> Result<()> {
    match load_session()? {
        Some(cache) => {
            println!("Server:  {}", cache.server);
            if cache.token.is_expired() {
                println!("Session: expired at {}", cache.token.expires_at);
            } else {
                println!("Session: valid until {}", cache.token.expires_at);
            }
        }
        None => println!("Not signed in"),
    }
    print_sync_point(path);
    Ok(())
}

async fn cmd_sync_run(path: &Path) -> Result<()> {
    let client = Arc::new(restored_client().await?);
    let store = Arc::new(open_vault(path).await?);
    let engine = SyncEngine::new(store, client);

    match engine.sync_vault().await? {
        SyncOutcome::InSync => println!("Already in sync"),
        SyncOutcome::Uploaded(meta) => println!("Uploaded revision {}", meta.revision_id()),
        SyncOutcome::Downloaded(meta) => println!("Downloaded revision {}", meta.revision_id()),
        SyncOutcome::Conflict(info) => {
            print_conflict(&info);
            bail!(
                "Sync conflict; resolve with `hostvault sync resolve --keep-local` \
                 or `--keep-remote`"
            );
        }
    }
    Ok(())
}

async fn cmd_sync_resolve(path: &Path, keep_local: bool, keep_remote: bool) -> Result<()> {
    if keep_local == keep_remote {
        bail!("Pass exactly one of --keep-local or --keep-remote");
    }

    let client = Arc::new(restored_client().await?);
    let store = Arc::new(open_vault(path).await?);
    let engine = SyncEngine::new(store, client);

    // Re-detect against the current remote state before forcing anything.
    match engine.sync_vault().await? {
        SyncOutcome::Conflict(info) => {
            print_conflict(&info);
            let meta = if keep_local {
                engine.force_upload().await?
            } else {
                engine.force_download().await?
            };
            engine.clear_conflict().await?;
            println!("Resolved at revision {}", meta.revision_id());
        }
        SyncOutcome::InSync => println!("Nothing to resolve, already in sync"),
        SyncOutcome::Uploaded(meta) => {
            println!("No conflict found; uploaded revision {}", meta.revision_id())
        }
        SyncOutcome::Downloaded(meta) => println!(
            "No conflict found; downloaded revision {}",
            meta.revision_id()
        ),
    }
    Ok(())
}

fn cmd_sync_logout() -> Result<()> {
    let path = session_file()?;
    match std::fs::remove_file(&path) {
        Ok(()) => println!("Signed out"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => println!("Not signed in"),
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

// --- Helpers ---

fn device_identity(name: Option<&str>) -> Result<DeviceIdentity> {
    let dir = hostvault_core::ensure_data_dir()?;
    let fallback = format!("hostvault-{}", DeviceIdentity::current_platform());
    Ok(DeviceIdentity::load_or_generate(
        &dir,
        name.unwrap_or(&fallback),
    )?)
}

async fn open_vault(path: &Path) -> Result<VaultStore> {
    if !path.exists() {
        bail!(
            "No vault at {}; create one with `hostvault init`",
            path.display()
        );
    }
    let password = Zeroizing::new(prompt_password("Vault password: ")?);
    let device = device_identity(None)?;
    let store = VaultStore::open(path, CredentialCache::new(&password), device.id).await?;
    Ok(store)
}

fn print_sync_point(path: &Path) {
    match state::load(path) {
        Ok(Some(point)) => println!("Last sync:  {} at {}", point.revision_id(), point.synced_at),
        Ok(None) => println!("Last sync:  never"),
        Err(err) => warn!("unreadable sync state: {}", err),
    }
}

fn print_conflict(info: &ConflictInfo) {
    println!("Conflict detected:");
    println!(
        "  local:       {} (updated {})",
        info.local, info.local_updated_at
    );
    println!(
        "  remote:      {} (updated {})",
        info.remote, info.remote_updated_at
    );
    match info.sync_point {
        Some(base) => println!("  last agreed: {}", base),
        None => println!("  last agreed: never"),
    }
}

async fn restored_client() -> Result<SyncClient> {
    let cache = load_session()?.context("Not signed in; run `hostvault sync login` first")?;
    let client = SyncClient::new()?;
    client.restore_session(&cache.server, cache.token).await?;
    Ok(client)
}

/// Cached session written after a successful sign-in.
#[derive(serde::Serialize, serde::Deserialize)]
struct SessionCache {
    server: String,
    token: SessionToken,
}

fn session_file() -> Result<PathBuf> {
    Ok(hostvault_core::ensure_config_dir()?.join("session.json"))
}

fn load_session() -> Result<Option<SessionCache>> {
    let path = session_file()?;
    match std::fs::read(&path) {
        Ok(bytes) => Ok(Some(
            serde_json::from_slice(&bytes).context("corrupt session cache")?,
        )),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn store_session(cache: &SessionCache) -> Result<()> {
    let path = session_file()?;
    let bytes = serde_json::to_vec_pretty(cache)?;
    write_private(&path, &bytes)?;
    Ok(())
}

/// The session token is a credential; keep the cache file owner-only.
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)
}
