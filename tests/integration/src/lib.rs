//! Integration tests for the Lockbox server.
//!
//! These tests verify the complete workflow from initialization through
//! export, reload, and tamper detection, against a real server process.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub unlocked: bool,
}

#[derive(Debug, Serialize)]
pub struct InitRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct InitResponse {
    pub digest: String,
}

#[derive(Debug, Serialize)]
pub struct LoadRequest {
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_digest: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoadResponse {
    pub entries: usize,
}

#[derive(Debug, Serialize)]
pub struct SetRequest {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct RemoveRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveResponse {
    pub removed: bool,
}

#[derive(Debug, Deserialize)]
pub struct GetResponse {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct DumpResponse {
    pub repr: String,
    pub digest: String,
}

// ============================================================================
// Test Server
// ============================================================================

/// A test server instance that manages its own store file and process.
pub struct TestServer {
    process: Child,
    pub base_url: String,
    _store_dir: Option<TempDir>,
}

impl TestServer {
    /// Start a new test server on the specified port with its own
    /// temporary store file.
    pub async fn start(port: u16) -> Result<Self> {
        let store_dir = TempDir::new().context("Failed to create temp dir")?;
        let store_path = store_dir.path().join("keychain.json");

        let mut server = Self::start_at(port, &store_path).await?;
        server._store_dir = Some(store_dir);

        Ok(server)
    }

    /// Start a new test server against an existing store path.
    pub async fn start_at(port: u16, store_path: &Path) -> Result<Self> {
        let server_binary = find_server_binary()?;

        let process = Command::new(&server_binary)
            .arg("--bind")
            .arg(format!("127.0.0.1:{}", port))
            .arg("--store")
            .arg(store_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start server: {:?}", server_binary))?;

        let base_url = format!("http://127.0.0.1:{}", port);

        let server = Self {
            process,
            base_url,
            _store_dir: None,
        };

        // Wait for server to be ready
        server.wait_for_ready().await?;

        Ok(server)
    }

    /// Wait for the server to be ready to accept connections.
    async fn wait_for_ready(&self) -> Result<()> {
        let client = Client::new();
        let url = format!("{}/health", self.base_url);

        for _ in 0..50 {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                _ => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }

        bail!("Server failed to start within 5 seconds")
    }

    /// Get a configured HTTP client for this server.
    pub fn client(&self) -> LockboxClient {
        LockboxClient::new(&self.base_url)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

/// Find the server binary in the target directory.
fn find_server_binary() -> Result<PathBuf> {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());

    // Try debug build first, then release
    let candidates = [
        Path::new(&manifest_dir).join("../../target/debug/lockbox-server"),
        Path::new(&manifest_dir).join("../../target/debug/lockbox-server.exe"),
        Path::new(&manifest_dir).join("../../target/release/lockbox-server"),
        Path::new(&manifest_dir).join("../../target/release/lockbox-server.exe"),
    ];

    for candidate in &candidates {
        if candidate.exists() {
            return Ok(candidate.canonicalize()?);
        }
    }

    bail!(
        "Could not find lockbox-server binary. Run 'cargo build -p lockbox-server' first. Searched in: {:?}",
        candidates
    )
}

// ============================================================================
// Test Client
// ============================================================================

/// HTTP client for testing the Lockbox API.
pub struct LockboxClient {
    client: Client,
    base_url: String,
}

impl LockboxClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let resp = self.client.get(self.url("/health")).send().await?;
        Ok(resp.json().await?)
    }

    pub async fn init(&self, password: &str) -> Result<InitResponse> {
        let req = InitRequest {
            password: password.to_string(),
        };
        let resp = self
            .client
            .post(self.url("/init"))
            .json(&req)
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("Init failed: {}", resp.text().await?);
        }
        Ok(resp.json().await?)
    }

    pub async fn load(&self, req: &LoadRequest) -> Result<LoadResponse> {
        let resp = self
            .client
            .post(self.url("/load"))
            .json(req)
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("Load failed: {}", resp.text().await?);
        }
        Ok(resp.json().await?)
    }

    /// Load that is expected to fail; returns the response status.
    pub async fn load_err(&self, req: &LoadRequest) -> Result<StatusCode> {
        let resp = self
            .client
            .post(self.url("/load"))
            .json(req)
            .send()
            .await?;
        if resp.status().is_success() {
            bail!("Expected load to fail");
        }
        Ok(resp.status())
    }

    pub async fn set(&self, name: &str, value: &str) -> Result<()> {
        let req = SetRequest {
            name: name.to_string(),
            value: value.to_string(),
        };
        let resp = self.client.post(self.url("/set")).json(&req).send().await?;
        if !resp.status().is_success() {
            bail!("Set failed: {}", resp.text().await?);
        }
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<GetResponse> {
        let resp = self
            .client
            .get(self.url(&format!("/get/{}", name)))
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("Get failed: {}", resp.text().await?);
        }
        Ok(resp.json().await?)
    }

    /// Get returning the raw status, for absence and error checks.
    pub async fn get_status(&self, name: &str) -> Result<StatusCode> {
        let resp = self
            .client
            .get(self.url(&format!("/get/{}", name)))
            .send()
            .await?;
        Ok(resp.status())
    }

    pub async fn remove(&self, name: &str) -> Result<RemoveResponse> {
        let req = RemoveRequest {
            name: name.to_string(),
        };
        let resp = self
            .client
            .post(self.url("/remove"))
            .json(&req)
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("Remove failed: {}", resp.text().await?);
        }
        Ok(resp.json().await?)
    }

    pub async fn dump(&self) -> Result<DumpResponse> {
        let resp = self.client.get(self.url("/dump")).send().await?;
        if !resp.status().is_success() {
            bail!("Dump failed: {}", resp.text().await?);
        }
        Ok(resp.json().await?)
    }

    /// Dump returning the raw status, for uninitialized checks.
    pub async fn dump_status(&self) -> Result<StatusCode> {
        let resp = self.client.get(self.url("/dump")).send().await?;
        Ok(resp.status())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU16, Ordering};

    // Port counter to avoid conflicts between parallel tests
    static PORT_COUNTER: AtomicU16 = AtomicU16::new(13300);

    fn next_port() -> u16 {
        PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
    }

    const PASSWORD: &str = "correct horse";

    #[tokio::test]
    async fn test_server_health_before_init() {
        let server = TestServer::start(next_port()).await.unwrap();
        let client = server.client();

        let health = client.health().await.unwrap();

        assert_eq!(health.status, "ok");
        assert!(!health.version.is_empty());
        assert!(!health.unlocked, "No keychain should be active yet");
    }

    #[tokio::test]
    async fn test_full_keychain_workflow() {
        let server = TestServer::start(next_port()).await.unwrap();
        let client = server.client();

        // 1. Initialize
        let init = client.init(PASSWORD).await.unwrap();
        assert_eq!(init.digest.len(), 64);

        let health = client.health().await.unwrap();
        assert!(health.unlocked);

        // 2. Store entries
        client.set("example.com", "s3cr3t").await.unwrap();
        client.set("other.org", "hunter2").await.unwrap();

        // 3. Read back
        let got = client.get("example.com").await.unwrap();
        assert_eq!(got.value, "s3cr3t");

        // 4. Missing entry is 404, not a failure of the keychain
        let status = client.get_status("missing.example").await.unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);

        // 5. Upsert
        client.set("example.com", "rotated").await.unwrap();
        let got = client.get("example.com").await.unwrap();
        assert_eq!(got.value, "rotated");

        // 6. Remove semantics
        let removed = client.remove("other.org").await.unwrap();
        assert!(removed.removed);
        let removed = client.remove("other.org").await.unwrap();
        assert!(!removed.removed);

        // 7. Export and reload through the untrusted channel
        let dump = client.dump().await.unwrap();

        let load = client
            .load(&LoadRequest {
                password: PASSWORD.to_string(),
                repr: Some(dump.repr.clone()),
                trusted_digest: Some(dump.digest.clone()),
            })
            .await
            .unwrap();
        assert_eq!(load.entries, 1);

        let got = client.get("example.com").await.unwrap();
        assert_eq!(got.value, "rotated");
    }

    #[tokio::test]
    async fn test_load_from_store_file_across_restart() {
        let port1 = next_port();
        let port2 = next_port();

        let store_dir = TempDir::new().unwrap();
        let store_path = store_dir.path().join("keychain.json");

        // First server: initialize and persist
        {
            let server = TestServer::start_at(port1, &store_path).await.unwrap();
            let client = server.client();

            client.init(PASSWORD).await.unwrap();
            client.set("example.com", "s3cr3t").await.unwrap();
            client.dump().await.unwrap();
        }

        // Second server: reload from the persisted envelope
        let server = TestServer::start_at(port2, &store_path).await.unwrap();
        let client = server.client();

        let load = client
            .load(&LoadRequest {
                password: PASSWORD.to_string(),
                repr: None,
                trusted_digest: None,
            })
            .await
            .unwrap();
        assert_eq!(load.entries, 1);

        let got = client.get("example.com").await.unwrap();
        assert_eq!(got.value, "s3cr3t");
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let server = TestServer::start(next_port()).await.unwrap();
        let client = server.client();

        client.init(PASSWORD).await.unwrap();
        client.set("example.com", "s3cr3t").await.unwrap();
        let dump = client.dump().await.unwrap();

        let status = client
            .load_err(&LoadRequest {
                password: "incorrect donkey".to_string(),
                repr: Some(dump.repr),
                trusted_digest: None,
            })
            .await
            .unwrap();

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_tampered_repr_rejected() {
        let server = TestServer::start(next_port()).await.unwrap();
        let client = server.client();

        client.init(PASSWORD).await.unwrap();
        client.set("example.com", "s3cr3t").await.unwrap();
        let dump = client.dump().await.unwrap();

        // Flip one character deep inside the opaque blob (past the clear
        // salt region) without breaking the JSON pair.
        let (mut opaque, digest): (String, String) = serde_json::from_str(&dump.repr).unwrap();
        let middle = opaque.len() / 2;
        let original = opaque.remove(middle);
        let replacement = if original == 'A' { 'B' } else { 'A' };
        opaque.insert(middle, replacement);

        let tampered = serde_json::to_string(&(opaque, digest)).unwrap();

        let status = client
            .load_err(&LoadRequest {
                password: PASSWORD.to_string(),
                repr: Some(tampered),
                trusted_digest: None,
            })
            .await
            .unwrap();

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_digest_substitution_rejected() {
        let server = TestServer::start(next_port()).await.unwrap();
        let client = server.client();

        client.init(PASSWORD).await.unwrap();
        client.set("example.com", "s3cr3t").await.unwrap();
        let dump = client.dump().await.unwrap();

        let (opaque, _digest): (String, String) = serde_json::from_str(&dump.repr).unwrap();
        let substituted = serde_json::to_string(&(opaque, "0".repeat(64))).unwrap();

        let status = client
            .load_err(&LoadRequest {
                password: PASSWORD.to_string(),
                repr: Some(substituted),
                trusted_digest: None,
            })
            .await
            .unwrap();

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_operations_require_initialized_keychain() {
        let server = TestServer::start(next_port()).await.unwrap();
        let client = server.client();

        let result = client.set("example.com", "s3cr3t").await;
        assert!(result.is_err());

        let status = client.get_status("example.com").await.unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let status = client.dump_status().await.unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
