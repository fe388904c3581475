use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, SpawnError};
use crate::process::{CommandRunner, LocalCommand};
use crate::types::{KeyPair, PrivateKey, PublicKey};

/// Issues overlay identities. Every call must return a fresh keypair.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn generate(&self, label: &str) -> Result<KeyPair>;
}

/// Generates WireGuard keypairs with the `wg` tool
pub struct WgKeyGenerator {
    runner: Arc<dyn CommandRunner>,
}

impl WgKeyGenerator {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl IdentityProvider for WgKeyGenerator {
    async fn generate(&self, label: &str) -> Result<KeyPair> {
        let failed = |reason: String| SpawnError::KeyGeneration {
            label: label.to_string(),
            reason,
        };

        let raw_private = self
            .runner
            .run(&LocalCommand::new("wg").arg("genkey"))
            .await
            .map_err(|e| failed(e.to_string()))?;
        let private = PrivateKey::parse(&raw_private).map_err(|e| failed(format!("private {}", e)))?;

        let raw_public = self
            .runner
            .run(&LocalCommand::new("wg").arg("pubkey").stdin(private.expose()))
            .await
            .map_err(|e| failed(e.to_string()))?;
        let public = PublicKey::parse(&raw_public).map_err(|e| failed(format!("public {}", e)))?;

        debug!("Generated keypair for {} (public key {})", label, public);
        Ok(KeyPair { private, public })
    }
}
