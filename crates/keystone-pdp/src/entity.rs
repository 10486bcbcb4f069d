//! Entity resolution.
//!
//! Turns entity chains and bearer tokens into [`EntityRepresentation`]s whose
//! claim documents the subject mapping resolver can select over.
//!
//! Tokens are never verified here and their contents are never logged; only
//! the token's ephemeral id appears in logs and errors.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use keystone_types::{
    Entity, EntityCategory, EntityChain, EntityKind, EntityRepresentation, Token,
};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{PdpError, Result};

/// Resolves entities for the decision point.
pub trait EntityResolver: Send + Sync {
    /// Resolves every entity in `chain`, preserving order.
    fn resolve_entities(&self, chain: &EntityChain) -> Result<Vec<EntityRepresentation>>;

    /// Builds an entity chain from the claims carried by `token`.
    fn create_entity_chain_from_token(&self, token: &Token) -> Result<EntityChain>;
}

/// Resolves entities from the data on the request alone.
///
/// - Claim entities resolve to their claim document.
/// - Email, user name, client id, and UUID entities resolve to a one-field
///   document (`emailAddress`, `userName`, `clientId`, `uuid`).
/// - A token yields a client entity (from `azp` or `client_id`) and, when
///   the token names a user (`preferred_username` or `sub`), a user entity
///   carrying the full token claims. When both are present the client is
///   categorised as environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimsEntityResolver;

impl EntityResolver for ClaimsEntityResolver {
    fn resolve_entities(&self, chain: &EntityChain) -> Result<Vec<EntityRepresentation>> {
        if chain.entities.is_empty() {
            return Err(PdpError::InvalidEntityChain {
                reason: format!("entity chain '{}' has no entities", chain.ephemeral_id),
            });
        }

        chain
            .entities
            .iter()
            .map(|entity| {
                let claims = match &entity.kind {
                    EntityKind::EmailAddress(v) => json!({ "emailAddress": v }),
                    EntityKind::UserName(v) => json!({ "userName": v }),
                    EntityKind::ClientId(v) => json!({ "clientId": v }),
                    EntityKind::Uuid(v) => json!({ "uuid": v }),
                    EntityKind::Claims(doc @ Value::Object(_)) => doc.clone(),
                    EntityKind::Claims(_) => {
                        return Err(PdpError::InvalidEntityType {
                            entity_id: entity.ephemeral_id.clone(),
                            reason: "claims must be a JSON object".to_string(),
                        });
                    }
                };
                let category = match entity.category {
                    EntityCategory::Environment => EntityCategory::Environment,
                    EntityCategory::Subject | EntityCategory::Unspecified => EntityCategory::Subject,
                };
                Ok(EntityRepresentation::new(entity.ephemeral_id.clone(), vec![claims])
                    .with_category(category))
            })
            .collect()
    }

    fn create_entity_chain_from_token(&self, token: &Token) -> Result<EntityChain> {
        let claims = decode_claims(token)?;
        let claim = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| claims.get(*name).and_then(Value::as_str))
                .filter(|v| !v.is_empty())
                .map(ToString::to_string)
        };

        let client_id = claim(&["azp", "client_id"]);
        let username = claim(&["preferred_username", "sub"]);

        let mut entities = Vec::with_capacity(2);
        if let Some(client_id) = client_id {
            let category = if username.is_some() {
                EntityCategory::Environment
            } else {
                EntityCategory::Subject
            };
            entities.push(Entity::new(
                format!("jwtentity-0-clientid-{client_id}"),
                category,
                EntityKind::ClientId(client_id),
            ));
        }
        if let Some(username) = username {
            entities.push(Entity::new(
                format!("jwtentity-1-username-{username}"),
                EntityCategory::Subject,
                EntityKind::Claims(Value::Object(claims.clone())),
            ));
        }

        if entities.is_empty() {
            return Err(PdpError::InvalidEntityChain {
                reason: format!("token '{}' names no client or user", token.ephemeral_id),
            });
        }

        debug!(
            token_id = %token.ephemeral_id,
            entities = entities.len(),
            "Created entity chain from token"
        );
        Ok(EntityChain::new(token.ephemeral_id.clone(), entities))
    }
}

/// Decodes the payload segment of a JWT without verifying it.
fn decode_claims(token: &Token) -> Result<Map<String, Value>> {
    let invalid = |reason: &str| PdpError::InvalidEntityChain {
        reason: format!("token '{}' {reason}", token.ephemeral_id),
    };

    let payload = token
        .jwt
        .split('.')
        .nth(1)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| invalid("is not a JWT"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| invalid("has an undecodable payload"))?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(claims)) => Ok(claims),
        _ => Err(invalid("payload is not a JSON object")),
    }
}
