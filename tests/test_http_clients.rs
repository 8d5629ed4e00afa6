//! Integration tests for the HTTP clients against a local mock server
//!
//! Tests cover:
//! - `alchemy_getAssetTransfers` request shape and pagination
//! - JSON-RPC error objects surfaced as fetch errors
//! - non-JSON gateway failures vs. malformed results
//! - rip.fun profile status mapping and retries

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use transfer_leaderboard::profile_enricher::{
    ProfileEnricher, ProfileError, ProfileLookup, RetryPolicy, RipProfileClient,
};
use transfer_leaderboard::recipient_counter::count_recipients;
use transfer_leaderboard::transfer_fetcher::{
    AlchemyTransferSource, FetchError, TransferQuery, TransferSource,
};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const CONTRACT: &str = "0x6292bf78996e189bAd8f9CF3e3Cb31017bb70540";
const MINTER: &str = "0xeBeA10BCd609d3F6fb2Ea104baB638396C037388";
const A: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
const B: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

fn rpc_body(req: &Request) -> Value {
    serde_json::from_slice(&req.body).unwrap()
}

/// Two pages keyed by `pageKey`, echoing the request id.
fn paged_ledger(req: &Request) -> ResponseTemplate {
    let body = rpc_body(req);
    let result = match body["params"][0].get("pageKey").and_then(Value::as_str) {
        None => json!({
            "transfers": [
                { "to": A.to_lowercase(), "from": MINTER, "category": "erc721" },
                { "to": B, "from": MINTER, "category": "erc721" }
            ],
            "pageKey": "cursor-2"
        }),
        Some("cursor-2") => json!({
            "transfers": [
                { "to": A, "from": MINTER, "category": "erc1155" },
                { "to": null, "from": MINTER, "category": "erc721" }
            ]
        }),
        Some(other) => panic!("unexpected pageKey {}", other),
    };
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": body["id"],
        "result": result
    }))
}

async fn ledger_source(server: &MockServer, page_size: u32) -> AlchemyTransferSource {
    let endpoint = Url::parse(&format!("{}/v2/test-key", server.uri())).unwrap();
    AlchemyTransferSource::new(endpoint, page_size, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_alchemy_pagination_and_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/test-key"))
        .respond_with(paged_ledger)
        .expect(2)
        .mount(&server)
        .await;

    let source = ledger_source(&server, 5000).await;
    assert_eq!(source.page_size(), 1000, "clamped to the provider max");

    let (counts, summary) = count_recipients(&source, CONTRACT, MINTER).await.unwrap();
    assert_eq!(summary.pages, 2);
    assert_eq!(counts.get(A), Some(2));
    assert_eq!(counts.get(B), Some(1));
    assert_eq!(summary.missing_recipient, 1);

    let requests = server.received_requests().await.unwrap();
    let first = rpc_body(&requests[0]);
    assert_eq!(first["method"], "alchemy_getAssetTransfers");
    assert_eq!(
        first["params"][0],
        json!({
            "fromBlock": "0x0",
            "fromAddress": MINTER,
            "contractAddresses": [CONTRACT],
            "category": ["erc721", "erc1155"],
            "withMetadata": false,
            "excludeZeroValue": true,
            "maxCount": "0x3e8"
        })
    );
    let second = rpc_body(&requests[1]);
    assert_eq!(second["params"][0]["pageKey"], "cursor-2");
}

#[tokio::test]
async fn test_alchemy_rpc_error_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(|req: &Request| {
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": rpc_body(req)["id"],
                "error": { "code": -32602, "message": "invalid fromAddress" }
            }))
        })
        .mount(&server)
        .await;

    let source = ledger_source(&server, 100).await;
    let query = TransferQuery {
        contract_address: CONTRACT.to_string(),
        from_address: MINTER.to_string(),
        page_key: None,
    };
    let err = source.fetch_page(&query).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::Rpc {
            code: -32602,
            message: "invalid fromAddress".to_string()
        }
    );
}

#[tokio::test]
async fn test_alchemy_failure_aborts_count() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let source = ledger_source(&server, 100).await;
    let query = TransferQuery {
        contract_address: CONTRACT.to_string(),
        from_address: MINTER.to_string(),
        page_key: None,
    };
    let err = source.fetch_page(&query).await.unwrap_err();
    assert!(matches!(err, FetchError::Transport(_)), "got {:?}", err);
    assert!(count_recipients(&source, CONTRACT, MINTER).await.is_err());
}

#[tokio::test]
async fn test_alchemy_unexpected_result_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(|req: &Request| {
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": rpc_body(req)["id"],
                "result": { "transfers": "none" }
            }))
        })
        .mount(&server)
        .await;

    let source = ledger_source(&server, 100).await;
    let query = TransferQuery {
        contract_address: CONTRACT.to_string(),
        from_address: MINTER.to_string(),
        page_key: None,
    };
    let err = source.fetch_page(&query).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)), "got {:?}", err);
}

fn profile_client(server: &MockServer, timeout: Duration) -> RipProfileClient {
    RipProfileClient::new(format!("{}/api/auth/", server.uri()), timeout).unwrap()
}

#[tokio::test]
async fn test_rip_profile_status_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/auth/{}", A)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "username": "alice",
            "avatar": "https://cdn.rip.fun/alice.png",
            "bio": "ignored"
        })))
        .mount(&server)
        .await;
    for (address, status) in [("0x404", 404u16), ("0x429", 429), ("0x500", 500), ("0x400", 400)] {
        Mock::given(method("GET"))
            .and(path(format!("/api/auth/{}", address)))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/api/auth/0xbad"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let client = profile_client(&server, Duration::from_secs(5));

    let record = client.lookup(A).await.unwrap();
    assert_eq!(record.username.as_deref(), Some("alice"));
    assert_eq!(record.avatar.as_deref(), Some("https://cdn.rip.fun/alice.png"));

    assert_eq!(client.lookup("0x404").await, Err(ProfileError::NotFound));
    assert_eq!(client.lookup("0x429").await, Err(ProfileError::RateLimited));
    assert_eq!(client.lookup("0x500").await, Err(ProfileError::Server(500)));
    assert_eq!(client.lookup("0x400").await, Err(ProfileError::Rejected(400)));
    assert!(matches!(
        client.lookup("0xbad").await,
        Err(ProfileError::Malformed(_))
    ));
}

#[tokio::test]
async fn test_rip_profile_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "username": "slow" }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = profile_client(&server, Duration::from_millis(50));
    assert_eq!(client.lookup(A).await, Err(ProfileError::Timeout));
}

#[tokio::test]
async fn test_enricher_retries_against_live_client() {
    let server = MockServer::start().await;
    // A: two 503s, then a profile
    Mock::given(method("GET"))
        .and(path(format!("/api/auth/{}", A)))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/auth/{}", A)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "username": "alice" })))
        .expect(1)
        .mount(&server)
        .await;
    // B: no profile, asked exactly once
    Mock::given(method("GET"))
        .and(path(format!("/api/auth/{}", B)))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let enricher = ProfileEnricher::new(
        Arc::new(profile_client(&server, Duration::from_secs(5))),
        RetryPolicy::new(3, Duration::from_millis(5)),
        "https://www.rip.fun/profile/",
    );
    let profiles = enricher.enrich(&[A.to_string(), B.to_string()]).await;

    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[A].username.as_deref(), Some("alice"));
    assert_eq!(profiles[A].profile_url, "https://www.rip.fun/profile/alice");
    assert!(!profiles.contains_key(B));
    // expectations are verified when the server drops
}
