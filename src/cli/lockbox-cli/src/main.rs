//! Lockbox CLI - Command line interface.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde::{Deserialize, Serialize};

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "lockbox")]
#[command(about = "Lockbox CLI - Manage a password-protected keychain")]
#[command(version)]
struct Cli {
    /// Lockbox server address
    #[arg(long, default_value = "http://localhost:3000", env = "LOCKBOX_ADDR")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new keychain on the server
    Init {
        /// Keychain password (prompted on stdin if not provided)
        #[arg(long)]
        password: Option<String>,
    },
    /// Unlock a keychain from its exported representation
    Load {
        /// Keychain password (prompted on stdin if not provided)
        #[arg(long)]
        password: Option<String>,
        /// Exported representation; the server falls back to its store file
        #[arg(long)]
        repr: Option<String>,
        /// Out-of-band trusted digest to verify against
        #[arg(long)]
        digest: Option<String>,
    },
    /// Store an entry
    Set {
        /// Entry name (e.g. a domain)
        name: String,
        /// Secret value
        value: String,
    },
    /// Read an entry
    Get {
        /// Entry name
        name: String,
    },
    /// Delete an entry
    Remove {
        /// Entry name
        name: String,
    },
    /// Export the keychain and print the representation and digest
    Dump,
    /// Check server status
    Status,
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    unlocked: bool,
}

#[derive(Serialize)]
struct InitRequest {
    password: String,
}

#[derive(Debug, Deserialize)]
struct InitResponse {
    digest: String,
}

#[derive(Serialize)]
struct LoadRequest {
    password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    repr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trusted_digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoadResponse {
    entries: usize,
}

#[derive(Serialize)]
struct SetRequest {
    name: String,
    value: String,
}

#[derive(Serialize)]
struct RemoveRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RemoveResponse {
    removed: bool,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    value: String,
}

#[derive(Debug, Deserialize)]
struct DumpResponse {
    repr: String,
    digest: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// HTTP Client
// ============================================================================

struct LockboxClient {
    client: Client,
    base_url: String,
}

impl LockboxClient {
    fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
        action: &str,
    ) -> Result<T> {
        if !resp.status().is_success() {
            let error: ErrorResponse = resp.json().await.unwrap_or(ErrorResponse {
                error: "Unknown error".into(),
            });
            bail!("{} failed: {}", action, error.error);
        }

        resp.json().await.context("Failed to parse response")
    }

    async fn health(&self) -> Result<HealthResponse> {
        let resp = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .context("Failed to connect to server")?;

        Self::parse(resp, "Status").await
    }

    async fn init(&self, password: String) -> Result<InitResponse> {
        let resp = self
            .client
            .post(self.url("/init"))
            .json(&InitRequest { password })
            .send()
            .await
            .context("Failed to connect to server")?;

        Self::parse(resp, "Init").await
    }

    async fn load(&self, req: LoadRequest) -> Result<LoadResponse> {
        let resp = self
            .client
            .post(self.url("/load"))
            .json(&req)
            .send()
            .await
            .context("Failed to connect to server")?;

        Self::parse(resp, "Load").await
    }

    async fn set(&self, name: String, value: String) -> Result<()> {
        let resp = self
            .client
            .post(self.url("/set"))
            .json(&SetRequest { name, value })
            .send()
            .await
            .context("Failed to connect to server")?;

        Self::parse::<serde_json::Value>(resp, "Set").await?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<GetResponse> {
        let resp = self
            .client
            .get(self.url(&format!("/get/{}", name)))
            .send()
            .await
            .context("Failed to connect to server")?;

        Self::parse(resp, "Get").await
    }

    async fn remove(&self, name: String) -> Result<RemoveResponse> {
        let resp = self
            .client
            .post(self.url("/remove"))
            .json(&RemoveRequest { name })
            .send()
            .await
            .context("Failed to connect to server")?;

        Self::parse(resp, "Remove").await
    }

    async fn dump(&self) -> Result<DumpResponse> {
        let resp = self
            .client
            .get(self.url("/dump"))
            .send()
            .await
            .context("Failed to connect to server")?;

        Self::parse(resp, "Dump").await
    }
}

// ============================================================================
// Command Handlers
// ============================================================================

/// Reads the keychain password from the flag, or prompts on stdin.
fn resolve_password(password: Option<String>) -> Result<String> {
    let password = match password {
        Some(p) => p,
        None => {
            print!("Enter keychain password: ");
            io::stdout().flush()?;
            let stdin = io::stdin();
            let mut line = String::new();
            stdin.lock().read_line(&mut line)?;
            line.trim_end_matches(['\r', '\n']).to_string()
        },
    };

    if password.is_empty() {
        bail!("Password cannot be empty");
    }

    Ok(password)
}

async fn cmd_status(client: &LockboxClient) -> Result<()> {
    let health = client.health().await?;

    println!("Lockbox server status:");
    println!("  Status:   {}", health.status);
    println!("  Version:  {}", health.version);
    println!("  Unlocked: {}", health.unlocked);

    Ok(())
}

async fn cmd_init(client: &LockboxClient, password: Option<String>) -> Result<()> {
    let password = resolve_password(password)?;

    let result = client.init(password).await?;

    println!("Keychain initialized.");
    println!();
    println!("Digest: {}", result.digest);
    println!();
    println!("Save this digest securely - pass it to `lockbox load` to detect");
    println!("substitution of the stored keychain.");

    Ok(())
}

async fn cmd_load(
    client: &LockboxClient,
    password: Option<String>,
    repr: Option<String>,
    digest: Option<String>,
) -> Result<()> {
    let password = resolve_password(password)?;

    let result = client
        .load(LoadRequest {
            password,
            repr,
            trusted_digest: digest,
        })
        .await?;

    println!("Keychain loaded ({} entries).", result.entries);

    Ok(())
}

async fn cmd_set(client: &LockboxClient, name: String, value: String) -> Result<()> {
    client.set(name.clone(), value).await?;
    println!("Entry '{}' stored.", name);
    Ok(())
}

async fn cmd_get(client: &LockboxClient, name: &str) -> Result<()> {
    let result = client.get(name).await?;
    println!("{}", result.value);
    Ok(())
}

async fn cmd_remove(client: &LockboxClient, name: String) -> Result<()> {
    let result = client.remove(name.clone()).await?;

    if result.removed {
        println!("Entry '{}' removed.", name);
    } else {
        println!("Entry '{}' not found.", name);
    }

    Ok(())
}

async fn cmd_dump(client: &LockboxClient) -> Result<()> {
    let result = client.dump().await?;

    println!("{}", result.repr);
    println!();
    println!("Digest: {}", result.digest);

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = LockboxClient::new(&cli.addr)?;

    match cli.command {
        Commands::Status => cmd_status(&client).await,
        Commands::Init { password } => cmd_init(&client, password).await,
        Commands::Load {
            password,
            repr,
            digest,
        } => cmd_load(&client, password, repr, digest).await,
        Commands::Set { name, value } => cmd_set(&client, name, value).await,
        Commands::Get { name } => cmd_get(&client, &name).await,
        Commands::Remove { name } => cmd_remove(&client, name).await,
        Commands::Dump => cmd_dump(&client).await,
    }
}
