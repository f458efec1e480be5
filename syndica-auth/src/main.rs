//! syndica-auth - Platform connection management for Syndica
//!
//! Drives the OAuth connect flow from the command line: print the
//! authorization URL, complete the flow with the returned code, list and
//! disconnect stored connections.

use anyhow::Result;
use clap::{Parser, Subcommand};
use libsyndica::credentials::CredentialManager;
use libsyndica::drivers::DriverRegistry;
use libsyndica::types::CredentialStatus;
use libsyndica::{Config, Database, PlatformId};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

#[derive(Parser)]
#[command(name = "syndica-auth")]
#[command(version)]
#[command(about = "Manage Syndica platform connections", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Owner the connection belongs to
    #[arg(long, global = true, default_value = "default")]
    owner: String,

    /// Path to the configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the authorization URL that starts the connect flow
    Connect {
        /// Platform name (mastodon, linkedin)
        platform: String,

        /// Redirect URI registered with the platform application
        #[arg(long)]
        redirect_uri: String,
    },

    /// Complete the connect flow with the authorization code
    Complete {
        /// Platform name (mastodon, linkedin)
        platform: String,

        /// Authorization code returned to the redirect URI
        code: String,

        /// Redirect URI used in the connect step
        #[arg(long)]
        redirect_uri: String,

        /// PKCE code verifier printed by the connect step
        #[arg(long)]
        code_verifier: Option<String>,

        /// Tenant the connection belongs to
        #[arg(long, default_value = "default")]
        tenant: String,
    },

    /// List stored connections (without showing tokens)
    List,

    /// Disconnect a platform and revoke its token
    Disconnect {
        /// Platform name (mastodon, linkedin)
        platform: String,

        /// Skip upstream token revocation (local disconnect only)
        #[arg(long)]
        no_revoke: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    libsyndica::logging::init(cli.verbose);

    if let Err(e) = run_command(&cli).await {
        error!("{}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run_command(cli: &Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let db = Database::new(&config.database.path).await?;
    let drivers = Arc::new(DriverRegistry::from_config(&config)?);
    let manager = CredentialManager::new(db, drivers);

    match &cli.command {
        Commands::Connect {
            platform,
            redirect_uri,
        } => connect(&manager, platform, redirect_uri),
        Commands::Complete {
            platform,
            code,
            redirect_uri,
            code_verifier,
            tenant,
        } => {
            complete(
                &manager,
                &cli.owner,
                tenant,
                platform,
                code,
                redirect_uri,
                code_verifier.as_deref(),
            )
            .await
        }
        Commands::List => list(&manager, &cli.owner).await,
        Commands::Disconnect {
            platform,
            no_revoke,
        } => disconnect(&manager, &cli.owner, platform, !no_revoke).await,
    }
}

fn parse_platform(name: &str) -> Result<PlatformId> {
    name.parse().map_err(|e: String| anyhow::anyhow!(e))
}

fn connect(manager: &CredentialManager, platform: &str, redirect_uri: &str) -> Result<()> {
    let platform = parse_platform(platform)?;
    let pending = manager.generate_auth_url(platform, redirect_uri, None, None)?;

    println!("Open this URL in a browser to authorize {}:", platform);
    println!();
    println!("  {}", pending.url);
    println!();
    println!("State: {}", pending.state);
    if let Some(verifier) = &pending.code_verifier {
        println!("Code verifier: {}", verifier);
        println!();
        println!(
            "After authorizing, run:\n  syndica-auth complete {} <code> --redirect-uri {} --code-verifier {}",
            platform, redirect_uri, verifier
        );
    } else {
        println!();
        println!(
            "After authorizing, run:\n  syndica-auth complete {} <code> --redirect-uri {}",
            platform, redirect_uri
        );
    }

    Ok(())
}

async fn complete(
    manager: &CredentialManager,
    owner: &str,
    tenant: &str,
    platform: &str,
    code: &str,
    redirect_uri: &str,
    code_verifier: Option<&str>,
) -> Result<()> {
    let platform = parse_platform(platform)?;
    let outcome = manager
        .complete_auth(owner, tenant, platform, code, redirect_uri, code_verifier)
        .await?;

    if outcome.success {
        let credential = outcome
            .credential
            .ok_or_else(|| anyhow::anyhow!("connection succeeded but no credential returned"))?;
        println!(
            "✓ Connected {} as {}",
            platform,
            credential.account_username.as_deref().unwrap_or("unknown")
        );
    } else {
        anyhow::bail!(
            "Failed to connect {}: {}",
            platform,
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    Ok(())
}

async fn list(manager: &CredentialManager, owner: &str) -> Result<()> {
    let credentials = manager.list(owner).await?;

    if credentials.is_empty() {
        println!("No connections found for '{}'.", owner);
        println!();
        println!("Use 'syndica-auth connect <platform> --redirect-uri <uri>' to connect one.");
        return Ok(());
    }

    println!("Connections for '{}':", owner);
    println!();
    for credential in credentials {
        let marker = match credential.status {
            CredentialStatus::Connected => "✓",
            CredentialStatus::Expired => "⚠",
            _ => "✗",
        };
        let expiry = match credential.expires_at {
            Some(ts) => chrono::DateTime::from_timestamp(ts, 0)
                .map(|dt| format!("expires {}", dt.format("%Y-%m-%d %H:%M UTC")))
                .unwrap_or_else(|| "invalid expiry".to_string()),
            None => "non-expiring token".to_string(),
        };
        println!(
            "  {} {} ({}): {} [{}]",
            marker,
            credential.platform,
            credential.account_username.as_deref().unwrap_or("unknown"),
            credential.status.as_str(),
            expiry
        );
    }

    Ok(())
}

async fn disconnect(
    manager: &CredentialManager,
    owner: &str,
    platform: &str,
    revoke: bool,
) -> Result<()> {
    let platform = parse_platform(platform)?;
    manager.disconnect(owner, platform, revoke).await?;
    println!("✓ Disconnected {}", platform);
    Ok(())
}
