// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::collections::HashMap;

use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How the server decides whether a request may touch a mount.
pub enum AuthMode {
    /// Bearer tokens (header or `?token=`), verified against a per-VFS
    /// shared secret with a whitelisted set of algorithms. The subject
    /// claim must equal `vfs.<name>`.
    Jwt {
        algorithms: Vec<Algorithm>,
        keys: HashMap<String, String>,
    },
    /// The TLS acceptor verified a client certificate; the request is
    /// allowed iff one of its SAN URIs equals `vfs://<name>`. The acceptor
    /// is external and installs a [`ClientIdentity`] request extension.
    MtlsSan,
}

/// The verified identity of an mTLS peer, as installed by the TLS
/// acceptor in front of the router.
#[derive(Clone, Debug, Default)]
pub struct ClientIdentity {
    pub san_uris: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Option<String>,
    exp: Option<u64>,
}

pub(super) fn authorize(
    mode: &AuthMode,
    vfs: &str,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    identity: Option<&ClientIdentity>,
) -> Result<()> {
    match mode {
        AuthMode::MtlsSan => {
            let wanted = format!("vfs://{vfs}");
            let identity =
                identity.ok_or_else(|| Error::Unauthorized("no client certificate".to_owned()))?;
            if identity.san_uris.iter().any(|uri| *uri == wanted) {
                Ok(())
            } else {
                Err(Error::Unauthorized(format!("no access to vfs '{vfs}'")))
            }
        }
        AuthMode::Jwt { algorithms, keys } => {
            let token = bearer_token(headers, query)
                .ok_or_else(|| Error::Unauthorized("no token".to_owned()))?;
            let header = jsonwebtoken::decode_header(&token)
                .map_err(|err| Error::Unauthorized(format!("cannot parse token: {err}")))?;
            if !algorithms.contains(&header.alg) {
                return Err(Error::Unauthorized(format!(
                    "alg {:?} not supported",
                    header.alg
                )));
            }
            let key = keys
                .get(vfs)
                .ok_or_else(|| Error::Unauthorized(format!("no jwt key for vfs '{vfs}'")))?;

            let mut validation = Validation::new(header.alg);
            validation.validate_exp = false;
            validation.set_required_spec_claims::<&str>(&[]);
            let data = jsonwebtoken::decode::<Claims>(
                &token,
                &DecodingKey::from_secret(key.as_bytes()),
                &validation,
            )
            .map_err(|err| Error::Unauthorized(format!("invalid token: {err}")))?;

            // expiry is honored when the token carries one
            if let Some(exp) = data.claims.exp {
                if (exp as i64) < Utc::now().timestamp() {
                    return Err(Error::Unauthorized("token expired".to_owned()));
                }
            }
            let expected = format!("vfs.{vfs}");
            match data.claims.sub.as_deref() {
                Some(sub) if sub == expected => Ok(()),
                other => Err(Error::Unauthorized(format!(
                    "invalid subject {other:?} in token"
                ))),
            }
        }
    }
}

fn bearer_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(token) = query.get("token") {
        if !token.is_empty() {
            return Some(token.clone());
        }
    }
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_owned)
}

/// Mint a bearer token accepted by [`AuthMode::Jwt`] for the given mount.
pub fn mint_token(
    secret: &str,
    vfs: &str,
    algorithm: Algorithm,
    ttl: std::time::Duration,
) -> Result<String> {
    let claims = Claims {
        sub: Some(format!("vfs.{vfs}")),
        exp: Some((Utc::now().timestamp() as u64) + ttl.as_secs()),
    };
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(algorithm),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

#[cfg(test)]
#[path = "./auth_test.rs"]
mod auth_test;
