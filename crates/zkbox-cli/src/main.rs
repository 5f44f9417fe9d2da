//! zkbox: zero-knowledge file client
//!
//! Commands:
//!   init                          - generate the account salt
//!   push <file>                   - encrypt and upload a file
//!   pull <file-id> [<out>]        - download and decrypt a file
//!   share <file-id>               - print a share-link fragment
//!   open-share <file-id> <frag>   - decrypt a shared file without an account
//!   delete <file-id>              - remove a file from the backend
//!   config show                   - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use zkbox_core::config::ZkboxConfig;
use zkbox_crypto::encoding::{decode_hex, encode_hex};
use zkbox_crypto::{derive_master_key_async, generate_salt, KdfParams, MasterKeySession, ShareFragment};
use zkbox_transfer::{build_operator, OperatorBackend, ProgressFn, UploadOptions};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "zkbox",
    version,
    about = "Zero-knowledge encrypted file client",
    long_about = "zkbox: files and file names are encrypted on this device; the backend only stores ciphertext"
)]
struct Cli {
    /// Path to zkbox.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "ZKBOX_CONFIG",
        default_value = "~/.config/zkbox/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "ZKBOX_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "ZKBOX_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate the account salt and write it to the config file
    Init {
        /// Replace an existing salt (files sealed under the old one become unreadable)
        #[arg(long)]
        force: bool,
    },

    /// Encrypt a local file and upload it
    ///
    /// The password is read from ZKBOX_PASSWORD or prompted for.
    Push {
        /// Local file
        local: PathBuf,
        /// Destination folder id
        #[arg(long)]
        folder: Option<String>,
        /// Upload as a hidden file
        #[arg(long)]
        hidden: bool,
        /// Upload as a new version of this file id
        #[arg(long)]
        replaces: Option<String>,
    },

    /// Download and decrypt a file
    Pull {
        file_id: String,
        /// Output path (default: the decrypted file name in the current dir)
        out: Option<PathBuf>,
    },

    /// Print a share-link fragment for a file
    ///
    /// Anyone holding the fragment can decrypt the file.
    Share { file_id: String },

    /// Decrypt a shared file using only its fragment
    #[command(name = "open-share")]
    OpenShare {
        file_id: String,
        /// Fragment as printed by `zkbox share` (leading '#' optional)
        fragment: String,
        /// Output path (default: the decrypted file name in the current dir)
        out: Option<PathBuf>,
    },

    /// Delete a file from the backend
    Delete { file_id: String },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    config
        .validate()
        .with_context(|| format!("invalid config: {}", config_path.display()))?;

    match cli.command {
        Commands::Init { force } => cmd_init(config, &config_path, force).await,
        Commands::Push {
            local,
            folder,
            hidden,
            replaces,
        } => {
            let opts = UploadOptions {
                folder_id: folder,
                is_hidden: hidden,
                replaces,
            };
            cmd_push(&config, &local, &opts).await
        }
        Commands::Pull { file_id, out } => cmd_pull(&config, &file_id, out.as_deref()).await,
        Commands::Share { file_id } => cmd_share(&config, &file_id).await,
        Commands::OpenShare {
            file_id,
            fragment,
            out,
        } => cmd_open_share(&config, &file_id, &fragment, out.as_deref()).await,
        Commands::Delete { file_id } => cmd_delete(&config, &file_id).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<ZkboxConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(ZkboxConfig::default())
    }
}

async fn save_config(config: &ZkboxConfig, path: &Path) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating dir: {}", parent.display()))?;
    }
    tokio::fs::write(path, rendered)
        .await
        .with_context(|| format!("writing config: {}", path.display()))
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(format!("{home}/{rest}"))
        }
        None => path.to_path_buf(),
    }
}

// ── Backend and session ───────────────────────────────────────────────────────

/// Build the configured backend with `~` in the fs root expanded.
fn open_backend(config: &ZkboxConfig) -> Result<OperatorBackend> {
    let mut storage = config.storage.clone();
    storage.root = expand_tilde(&storage.root);

    if storage.backend == "memory" {
        warn!("memory backend: nothing outlives this process");
    }

    let op = build_operator(&storage).context("building storage operator")?;
    Ok(OperatorBackend::new(op, storage.prefix))
}

fn read_password() -> Result<SecretString> {
    if let Ok(pw) = std::env::var("ZKBOX_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password("Password: ").context("reading password")?;
    Ok(SecretString::from(pw))
}

/// Derive the master key and start a session holding it.
async fn unlock(config: &ZkboxConfig) -> Result<MasterKeySession> {
    let salt_hex = config
        .account
        .salt
        .as_deref()
        .context("no account salt configured; run `zkbox init` first")?;
    let salt = decode_hex("account.salt", salt_hex)?;
    let password = read_password()?;

    let pb = make_spinner("unlock");
    pb.set_message("deriving key...");
    let key = derive_master_key_async(password, salt, KdfParams::from(&config.kdf)).await;
    pb.finish_and_clear();

    let session = MasterKeySession::from_config(&config.session);
    session.set_master_key(key?);
    info!(timeout_secs = session.timeout().as_secs(), "session unlocked");
    Ok(session)
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Output path for a decrypted file: the caller's choice, or the decrypted
/// name reduced to its last component so a crafted name cannot escape cwd.
fn output_path(out: Option<&Path>, decrypted_name: &str) -> PathBuf {
    if let Some(p) = out {
        return p.to_path_buf();
    }
    Path::new(decrypted_name)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("zkbox-download"))
}

// ── `zkbox init` ──────────────────────────────────────────────────────────────

async fn cmd_init(mut config: ZkboxConfig, config_path: &Path, force: bool) -> Result<()> {
    if config.account.salt.is_some() && !force {
        anyhow::bail!(
            "account salt already set in {} (use --force to replace it)",
            config_path.display()
        );
    }

    let salt = generate_salt(config.kdf.salt_len)?;
    config.account.salt = Some(encode_hex(&salt));
    save_config(&config, config_path).await?;

    info!(config = %config_path.display(), "account salt generated");
    println!("Account salt written to {}", config_path.display());
    println!("  kdf:  PBKDF2-HMAC-SHA256, {} iterations", config.kdf.iterations);
    Ok(())
}

// ── `zkbox push` ──────────────────────────────────────────────────────────────

async fn cmd_push(config: &ZkboxConfig, local: &Path, opts: &UploadOptions) -> Result<()> {
    if !local.is_file() {
        anyhow::bail!("not a file: {}", local.display());
    }
    let filename = local
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .context("path has no file name")?;
    let bytes = tokio::fs::read(local)
        .await
        .with_context(|| format!("reading {}", local.display()))?;

    let backend = open_backend(config)?;
    let session = unlock(config).await?;

    let pb = make_progress_bar("push");
    let pb_clone = pb.clone();
    let progress: ProgressFn = Box::new(move |done, total, msg| {
        pb_clone.set_length(total);
        pb_clone.set_position(done);
        pb_clone.set_message(msg.to_string());
    });

    let result = zkbox_transfer::upload_file(
        &backend,
        &session,
        &bytes,
        &filename,
        opts,
        Some(&progress),
    )
    .await
    .with_context(|| format!("uploading {}", local.display()))?;
    pb.finish_with_message("done");
    session.clear();

    println!("  file id: {}", result.file_id);
    println!("  bytes:   {}", fmt_bytes(result.bytes));
    if let Some(prev) = result.previous_version {
        println!("  replaces: {prev}");
    }
    Ok(())
}

// ── `zkbox pull` ──────────────────────────────────────────────────────────────

async fn cmd_pull(config: &ZkboxConfig, file_id: &str, out: Option<&Path>) -> Result<()> {
    let backend = open_backend(config)?;
    let session = unlock(config).await?;

    let pb = make_spinner("pull");
    pb.set_message(file_id.to_string());
    let opened = zkbox_transfer::download_file(&backend, &session, file_id).await;
    pb.finish_and_clear();
    session.clear();
    let opened = opened.with_context(|| format!("downloading {file_id}"))?;

    let path = output_path(out, &opened.filename);
    zkbox_transfer::write_output(&path, &opened.plaintext).await?;

    println!("Downloaded:");
    println!("  local:  {}", path.display());
    println!("  bytes:  {}", fmt_bytes(opened.plaintext.len() as u64));
    Ok(())
}

// ── `zkbox share` / `zkbox open-share` ────────────────────────────────────────

async fn cmd_share(config: &ZkboxConfig, file_id: &str) -> Result<()> {
    let backend = open_backend(config)?;
    let session = unlock(config).await?;

    let fragment = zkbox_transfer::share_file(&backend, &session, file_id)
        .await
        .with_context(|| format!("sharing {file_id}"))?;
    session.clear();

    println!("#{}", fragment.to_fragment());
    eprintln!("Anyone with this fragment can read the file. Keep it out of server-visible URLs.");
    Ok(())
}

async fn cmd_open_share(
    config: &ZkboxConfig,
    file_id: &str,
    fragment: &str,
    out: Option<&Path>,
) -> Result<()> {
    let fragment = ShareFragment::parse(fragment).context("parsing share fragment")?;
    let backend = open_backend(config)?;

    let opened = zkbox_transfer::open_shared_file(&backend, file_id, &fragment)
        .await
        .with_context(|| format!("opening shared file {file_id}"))?;

    let path = output_path(out, &opened.filename);
    zkbox_transfer::write_output(&path, &opened.plaintext).await?;
    println!("Saved shared file to {}", path.display());
    Ok(())
}

// ── `zkbox delete` ────────────────────────────────────────────────────────────

async fn cmd_delete(config: &ZkboxConfig, file_id: &str) -> Result<()> {
    let backend = open_backend(config)?;
    zkbox_transfer::delete_file(&backend, file_id)
        .await
        .with_context(|| format!("deleting {file_id}"))?;
    println!("Deleted {file_id}");
    Ok(())
}

// ── `zkbox config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &ZkboxConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
