// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

//! Exposes any mounted filesystem over HTTP as `METHOD /<vfs>/<path>`:
//! GET reads (or stats with `?stat`), PUT creates, DELETE removes.
//! Failures are JSON `{"error": …}` with the matching status code.

mod auth;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::json;

pub use auth::{mint_token, AuthMode, ClientIdentity};

use crate::fs::SharedFs;
use crate::{Error, Result};

pub struct VfsServer {
    vfs: SharedFs,
    auth: AuthMode,
}

impl VfsServer {
    /// Serve `vfs` (usually a [`MuxFs`](crate::storage::MuxFs)) under the
    /// given authentication mode.
    pub fn new(vfs: SharedFs, auth: AuthMode) -> Self {
        Self { vfs, auth }
    }
}

pub fn router(server: Arc<VfsServer>) -> Router {
    Router::new()
        .route(
            "/{vfs}/{*path}",
            get(read_handler).put(create_handler).delete(remove_handler),
        )
        .with_state(server)
}

/// Run the server on an already-bound listener until it fails.
pub async fn serve(listener: tokio::net::TcpListener, server: Arc<VfsServer>) -> Result<()> {
    axum::serve(listener, router(server))
        .await
        .map_err(|err| Error::io("server ended".to_owned(), err))
}

fn status_for(err: &Error) -> StatusCode {
    if err.is_not_exist() {
        return StatusCode::NOT_FOUND;
    }
    match err {
        Error::Exists(_) => StatusCode::CONFLICT,
        Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        Error::NotConfigured(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn deny(err: Error) -> Response {
    error_response(status_for(&err), err.to_string())
}

fn authorize(
    server: &VfsServer,
    vfs: &str,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    identity: Option<&ClientIdentity>,
) -> std::result::Result<(), Response> {
    auth::authorize(&server.auth, vfs, headers, query, identity).map_err(deny)
}

async fn read_handler(
    State(server): State<Arc<VfsServer>>,
    UrlPath((vfs, path)): UrlPath<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    identity: Option<Extension<ClientIdentity>>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&server, &vfs, &headers, &query, identity.as_deref()) {
        return resp;
    }
    let vfs_path = format!("vfs://{vfs}/{}", path.trim_matches('/'));
    tracing::debug!(%vfs_path, "read");

    if query.contains_key("stat") {
        return match server.vfs.stat(&vfs_path).await {
            Ok(info) => (StatusCode::OK, Json(info)).into_response(),
            Err(err) => error_response(
                status_for(&err),
                format!("cannot stat '{vfs_path}': {err}"),
            ),
        };
    }

    let file = match server.vfs.open(&vfs_path).await {
        Ok(file) => file,
        Err(err) => {
            return error_response(
                status_for(&err),
                format!("cannot open '{vfs_path}': {err}"),
            )
        }
    };
    let stream = futures::stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let mut buf = vec![0u8; 64 * 1024];
        match file.read(&mut buf).await {
            Ok(0) => {
                if let Err(err) = file.close().await {
                    tracing::warn!(%err, "failed to close streamed file");
                }
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(file)))
            }
            Err(err) => Some((Err(std::io::Error::other(err.to_string())), None)),
        }
    });
    Body::from_stream(stream).into_response()
}

async fn create_handler(
    State(server): State<Arc<VfsServer>>,
    UrlPath((vfs, path)): UrlPath<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    identity: Option<Extension<ClientIdentity>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if let Err(resp) = authorize(&server, &vfs, &headers, &query, identity.as_deref()) {
        return resp;
    }
    let vfs_path = format!("vfs://{vfs}/{}", path.trim_matches('/'));
    tracing::debug!(%vfs_path, "create");

    // creation never overwrites
    match server.vfs.stat(&vfs_path).await {
        Err(err) if err.is_not_exist() => {}
        _ => {
            return error_response(
                StatusCode::CONFLICT,
                format!("'{vfs_path}' already exists"),
            )
        }
    }

    let mut file = match server.vfs.create(&vfs_path).await {
        Ok(file) => file,
        Err(err) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("cannot create '{vfs_path}': {err}"),
            )
        }
    };

    let mut written = 0u64;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = file.close().await;
                let _ = server.vfs.remove(&vfs_path).await;
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("cannot read request body for '{vfs_path}': {err}"),
                );
            }
        };
        if let Err(err) = file.write_all(&chunk).await {
            let _ = file.close().await;
            let _ = server.vfs.remove(&vfs_path).await;
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("cannot write '{vfs_path}': {err}"),
            );
        }
        written += chunk.len() as u64;
    }
    if let Err(err) = file.close().await {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("cannot close '{vfs_path}': {err}"),
        );
    }

    (
        StatusCode::OK,
        Json(json!({ "path": vfs_path, "written": written })),
    )
        .into_response()
}

async fn remove_handler(
    State(server): State<Arc<VfsServer>>,
    UrlPath((vfs, path)): UrlPath<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    identity: Option<Extension<ClientIdentity>>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&server, &vfs, &headers, &query, identity.as_deref()) {
        return resp;
    }
    let vfs_path = format!("vfs://{vfs}/{}", path.trim_matches('/'));
    tracing::debug!(%vfs_path, "remove");

    if let Err(err) = server.vfs.remove(&vfs_path).await {
        return error_response(status_for(&err), format!("cannot remove '{vfs_path}': {err}"));
    }
    (
        StatusCode::OK,
        Json(json!({ "path": vfs_path, "removed": "ok" })),
    )
        .into_response()
}

#[cfg(test)]
#[path = "./server_test.rs"]
mod server_test;
