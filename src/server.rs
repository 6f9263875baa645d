//! HTTP front end: the git clone discovery endpoint.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;

use crate::protocol;
use crate::storage::{Collection, CollectionDirectory, SqliteStorage};

const ADVERTISEMENT_TYPE: &str = "application/x-git-upload-pack-advertisement";

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<SqliteStorage>,
    pub auth_realm: String,
}

/// Build the router. A single route: ref discovery for clone.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/{account}/{collection}/info/refs", get(info_refs))
        .with_state(state)
}

#[derive(Deserialize)]
struct InfoRefsQuery {
    service: Option<String>,
}

/// `GET /<account>/<collection>.git/info/refs?service=git-upload-pack`
async fn info_refs(
    State(state): State<AppState>,
    Path((account, collection)): Path<(String, String)>,
    Query(query): Query<InfoRefsQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(name) = collection.strip_suffix(".git") else {
        return StatusCode::NOT_FOUND.into_response();
    };

    // Only upload-pack discovery is served; receive-pack and anything else
    // is refused outright.
    if query.service.as_deref() != Some(protocol::UPLOAD_PACK_SERVICE) {
        return (StatusCode::FORBIDDEN, "service not supported\n").into_response();
    }

    let collection = match state.storage.find_collection(&account, name) {
        Ok(Some(collection)) => collection,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => return internal_error(e),
    };

    if collection.private {
        if let Some(response) = check_access(&state, &collection, &headers) {
            return response;
        }
    }

    match protocol::advertise_refs(state.storage.as_ref(), collection.repo) {
        Ok(body) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, ADVERTISEMENT_TYPE),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            body,
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// Enforce access-key auth on a private collection. `None` means the request
/// may proceed.
fn check_access(state: &AppState, collection: &Collection, headers: &HeaderMap) -> Option<Response> {
    let Some(token) = basic_auth_token(headers) else {
        let challenge = format!("Basic realm=\"{}\"", state.auth_realm);
        return Some(
            (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, challenge)],
                "authentication required\n",
            )
                .into_response(),
        );
    };

    match state.storage.authorize(collection.repo, &token) {
        Ok(true) => None,
        Ok(false) => Some((StatusCode::FORBIDDEN, "access denied\n").into_response()),
        Err(e) => Some(internal_error(e)),
    }
}

/// Extract the access key from Basic credentials. Git sends the token as the
/// password field; the username is ignored.
fn basic_auth_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (_user, password) = credentials.split_once(':')?;
    Some(password.to_string())
}

fn internal_error(e: crate::error::Error) -> Response {
    tracing::error!(error = %e, "info/refs request failed");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}
