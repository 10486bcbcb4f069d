//! CLI command implementations.

pub mod decide;
pub mod entitlements;
pub mod obligations;
pub mod validate;
pub mod version;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use keystone_config::KeystoneConfig;
use keystone_pdp::{InMemoryPolicyStore, JustInTimePdp, PolicyStore};
use keystone_types::{
    Entity, EntityChain, EntityIdentifier, RequestContext, Resource, Token,
};
use serde_json::Value;
use tracing::debug;

/// Settings shared by every command.
pub struct Session {
    pub config: KeystoneConfig,
    policy: Option<PathBuf>,
    pub json: bool,
}

impl Session {
    pub fn new(config: KeystoneConfig, policy: Option<PathBuf>, json: bool) -> Self {
        Self {
            config,
            policy,
            json,
        }
    }

    pub fn policy_path(&self) -> Result<PathBuf> {
        Ok(self.config.policy_fixture(self.policy.as_deref())?)
    }

    pub fn store(&self) -> Result<Arc<dyn PolicyStore>> {
        let path = self.policy_path()?;
        let store = InMemoryPolicyStore::load(&path)
            .with_context(|| format!("Failed to load policy document {}", path.display()))?;
        Ok(Arc::new(store))
    }

    /// Opens a decision point over a snapshot of the policy document.
    ///
    /// Each invocation answers one query, so `[cache]` is not consulted here;
    /// it configures long-running embedders of [`keystone_pdp::PolicyCache`].
    pub fn pdp(&self) -> Result<JustInTimePdp> {
        if self.config.cache.enabled {
            debug!("Policy cache setting ignored for a one-shot invocation");
        }
        JustInTimePdp::builder()
            .store(self.store()?)
            .skip_environment_entities(self.config.decision.skip_environment_entities)
            .build()
            .context("Failed to build decision point")
    }

    /// Configured fulfillable obligations plus the ones given on the command line.
    pub fn fulfillable(&self, extra: Vec<String>) -> Vec<String> {
        let mut all = self.config.decision.fulfillable_obligations.clone();
        for fqn in extra {
            if !all.contains(&fqn) {
                all.push(fqn);
            }
        }
        all
    }
}

/// The requesting party as given on the command line.
pub enum Requester {
    Claims(PathBuf),
    Token(PathBuf),
}

impl Requester {
    pub fn identifier(&self) -> Result<EntityIdentifier> {
        match self {
            Requester::Claims(path) => claims_chain(path).map(EntityIdentifier::EntityChain),
            Requester::Token(path) => {
                let jwt = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read token file {}", path.display()))?;
                Ok(EntityIdentifier::Token(Token::new(
                    ephemeral_id(path),
                    jwt.trim().to_string(),
                )))
            }
        }
    }
}

fn claims_chain(path: &Path) -> Result<EntityChain> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read entity file {}", path.display()))?;
    let document: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse entity file {}", path.display()))?;

    let documents = match document {
        Value::Array(items) => items,
        single => vec![single],
    };
    if documents.is_empty() {
        anyhow::bail!("entity file {} holds no entities", path.display());
    }

    let entities: Vec<Entity> = documents
        .into_iter()
        .enumerate()
        .map(|(i, claims)| Entity::subject_claims(format!("entity-{i}"), claims))
        .collect();
    debug!(entities = entities.len(), "Loaded entity chain");
    Ok(EntityChain::new(ephemeral_id(path), entities))
}

fn ephemeral_id(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "requester".to_string(), |s| s.to_string_lossy().into_owned())
}

pub fn request_context(client_id: Option<String>) -> RequestContext {
    client_id.map_or_else(RequestContext::default, RequestContext::for_client)
}

/// One resource per attribute value FQN, identified by the FQN.
pub fn resources(fqns: &[String]) -> Vec<Resource> {
    fqns.iter()
        .map(|fqn| Resource::attribute_values(fqn.clone(), [fqn.clone()]))
        .collect()
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
