// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::time::Duration;

use super::*;

fn jwt_mode() -> AuthMode {
    AuthMode::Jwt {
        algorithms: vec![Algorithm::HS256],
        keys: HashMap::from([("data".to_owned(), "secret".to_owned())]),
    }
}

fn query_with(token: Option<&str>) -> HashMap<String, String> {
    match token {
        Some(token) => HashMap::from([("token".to_owned(), token.to_owned())]),
        None => HashMap::new(),
    }
}

#[test]
fn test_jwt_accepts_valid_token() {
    let token = mint_token("secret", "data", Algorithm::HS256, Duration::from_secs(60)).unwrap();
    let headers = HeaderMap::new();
    authorize(&jwt_mode(), "data", &headers, &query_with(Some(&token)), None).unwrap();
}

#[test]
fn test_jwt_accepts_bearer_header() {
    let token = mint_token("secret", "data", Algorithm::HS256, Duration::from_secs(60)).unwrap();
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    authorize(&jwt_mode(), "data", &headers, &HashMap::new(), None).unwrap();
}

#[test]
fn test_jwt_rejects_missing_token() {
    let err = authorize(&jwt_mode(), "data", &HeaderMap::new(), &HashMap::new(), None)
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}

#[test]
fn test_jwt_rejects_wrong_subject() {
    // a token for one mount must not open another
    let token = mint_token("secret", "data", Algorithm::HS256, Duration::from_secs(60)).unwrap();
    let mode = AuthMode::Jwt {
        algorithms: vec![Algorithm::HS256],
        keys: HashMap::from([
            ("data".to_owned(), "secret".to_owned()),
            ("other".to_owned(), "secret".to_owned()),
        ]),
    };
    let err = authorize(&mode, "other", &HeaderMap::new(), &query_with(Some(&token)), None)
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}

#[test]
fn test_jwt_rejects_wrong_key() {
    let token = mint_token("not-the-key", "data", Algorithm::HS256, Duration::from_secs(60))
        .unwrap();
    let err = authorize(&jwt_mode(), "data", &HeaderMap::new(), &query_with(Some(&token)), None)
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}

#[test]
fn test_jwt_rejects_unlisted_algorithm() {
    let token = mint_token("secret", "data", Algorithm::HS512, Duration::from_secs(60)).unwrap();
    let err = authorize(&jwt_mode(), "data", &HeaderMap::new(), &query_with(Some(&token)), None)
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}

#[test]
fn test_mtls_requires_matching_san_uri() {
    let identity = ClientIdentity {
        san_uris: vec!["vfs://data".to_owned()],
    };
    authorize(
        &AuthMode::MtlsSan,
        "data",
        &HeaderMap::new(),
        &HashMap::new(),
        Some(&identity),
    )
    .unwrap();

    let err = authorize(
        &AuthMode::MtlsSan,
        "other",
        &HeaderMap::new(),
        &HashMap::new(),
        Some(&identity),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));

    let err = authorize(
        &AuthMode::MtlsSan,
        "data",
        &HeaderMap::new(),
        &HashMap::new(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}
