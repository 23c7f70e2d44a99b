//! The HTTP client against a canned local server.

use std::collections::HashMap;

use m2m_client::InventoryClient;
use m2m_core::{
    DatasetName, EntityId, InventoryApi, InventoryConfig, M2mError, ProductType, RemoteError,
    SceneId, SessionToken,
};
use m2m_test_utils::fixtures::*;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One request as the server saw it.
#[derive(Debug)]
struct Received {
    path: String,
    json_request: Value,
}

/// Answer one connection per canned `(status, body)` in order, returning the
/// base URL and a handle yielding the received requests.
async fn serve(responses: Vec<(u16, String)>) -> (String, JoinHandle<Vec<Received>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut received = Vec::new();
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            received.push(read_request(&mut stream).await);
            let response = format!(
                "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        }
        received
    });

    (format!("http://{}/inventory/json/v/1.4.1/", addr), handle)
}

async fn read_request(stream: &mut TcpStream) -> Received {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed mid-request");
        buf.extend_from_slice(&chunk[..n]);

        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).into_owned();
        let length: usize = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse().ok())
            .unwrap_or(0);
        if buf.len() < end + 4 + length {
            continue;
        }

        let path = head.split_whitespace().nth(1).unwrap_or_default().to_string();
        let body = &buf[end + 4..end + 4 + length];
        let json_request = url::form_urlencoded::parse(body)
            .find(|(name, _)| name == "jsonRequest")
            .map(|(_, value)| serde_json::from_str(&value).unwrap())
            .unwrap_or(Value::Null);
        return Received { path, json_request };
    }
}

fn client_for(base_url: &str) -> InventoryClient {
    let config = InventoryConfig::new(base_url, test_credentials(), test_rewrite())
        .unwrap()
        .with_api_version("1.4.1");
    InventoryClient::new(config).unwrap()
}

fn ok(data: Value) -> (u16, String) {
    (200, json!({ "data": data, "api_version": "1.4.1" }).to_string())
}

fn token() -> SessionToken {
    SessionToken::new("api-key-7")
}

// ============================================================================
// SESSION
// ============================================================================

#[tokio::test]
async fn test_login_posts_credentials_without_api_key() {
    let (base, server) = serve(vec![ok(json!("api-key-7"))]).await;
    let client = client_for(&base);

    let token = client.login().await.unwrap();
    assert_eq!(token.expose(), "api-key-7");

    let received = server.await.unwrap();
    assert_eq!(received[0].path, "/inventory/json/v/1.4.1/login");
    assert_eq!(
        received[0].json_request,
        json!({
            "username": "espa_admin",
            "password": "not-a-real-password",
            "authType": "EROS",
        })
    );
}

#[tokio::test]
async fn test_login_rejections_are_authentication_errors() {
    let (base, server) = serve(vec![
        ok(json!({"unexpected": true})),
        (200, json!({"data": null, "error": "Invalid username/password", "errorCode": "AUTH_INVALID"}).to_string()),
        (503, "maintenance".to_string()),
    ])
    .await;
    let client = client_for(&base);

    for _ in 0..3 {
        let err = client.login().await.unwrap_err();
        assert!(err.is_authentication(), "{:?}", err);
    }
    server.await.unwrap();
}

#[tokio::test]
async fn test_available_compares_reported_version() {
    let (base, server) = serve(vec![
        ok(json!("api-key-7")),
        (200, json!({"data": "api-key-8", "api_version": "1.3.0"}).to_string()),
    ])
    .await;
    let client = client_for(&base);

    assert!(client.available().await.unwrap());
    assert!(!client.available().await.unwrap());
    server.await.unwrap();
}

#[tokio::test]
async fn test_falsy_acknowledgements_are_context_errors() {
    let (base, server) = serve(vec![ok(json!(false)), ok(json!(null)), ok(json!(0))]).await;
    let client = client_for(&base);

    let logout = client.logout(&token()).await.unwrap_err();
    let set = client
        .set_user_context(&token(), 42, Some("10.0.0.1"))
        .await
        .unwrap_err();
    let clear = client.clear_user_context(&token()).await.unwrap_err();
    for err in [logout, set, clear] {
        assert!(
            matches!(err, M2mError::Remote(RemoteError::Context { .. })),
            "{:?}",
            err
        );
    }

    let received = server.await.unwrap();
    let paths: Vec<&str> = received.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "/inventory/json/v/1.4.1/logout",
            "/inventory/json/v/1.4.1/userContext",
            "/inventory/json/v/1.4.1/clearUserContext",
        ]
    );
    assert_eq!(
        received[1].json_request,
        json!({
            "contactId": 42,
            "ipAddress": "10.0.0.1",
            "applicationContext": "ESPA",
            "apiKey": "api-key-7",
        })
    );
}

// ============================================================================
// LOOKUPS
// ============================================================================

#[tokio::test]
async fn test_id_lookup_sends_key_and_maps_response() {
    let (base, server) = serve(vec![ok(json!({ L8_SCENE: L8_ENTITY }))]).await;
    let client = client_for(&base);

    let found = client
        .lookup_entity_ids(
            &token(),
            &DatasetName::from("LANDSAT_8_C1"),
            &[SceneId::from(L8_SCENE)],
        )
        .await
        .unwrap();
    assert_eq!(found[&SceneId::from(L8_SCENE)].as_str(), L8_ENTITY);

    let received = server.await.unwrap();
    assert_eq!(received[0].path, "/inventory/json/v/1.4.1/idLookup");
    assert_eq!(
        received[0].json_request,
        json!({
            "idList": [L8_SCENE],
            "inputField": "displayId",
            "datasetName": "LANDSAT_8_C1",
            "apiKey": "api-key-7",
        })
    );
}

#[tokio::test]
async fn test_partial_id_lookup_is_unresolved() {
    let (base, server) = serve(vec![ok(json!({ L8_SCENE: L8_ENTITY, L7_SCENE: null }))]).await;
    let client = client_for(&base);

    let err = client
        .lookup_entity_ids(
            &token(),
            &DatasetName::from("LANDSAT_8_C1"),
            &[SceneId::from(L8_SCENE), SceneId::from(L7_SCENE)],
        )
        .await
        .unwrap_err();
    assert_eq!(err.unresolved_ids(), Some(&[L7_SCENE.to_string()][..]));
    server.await.unwrap();
}

#[tokio::test]
async fn test_download_request_and_host_rewrite() {
    let external = format!("http://{}/download/{}.tar.gz", EXTERNAL_HOST, L8_ENTITY);
    let (base, server) = serve(vec![ok(json!([external]))]).await;
    let client = client_for(&base);

    let found: HashMap<EntityId, _> = client
        .fetch_download_urls(
            &token(),
            &DatasetName::from("LANDSAT_8_C1"),
            &[EntityId::from(L8_ENTITY)],
            &ProductType::STANDARD,
        )
        .await
        .unwrap();
    assert_eq!(
        found[&EntityId::from(L8_ENTITY)].as_str(),
        download_url(L8_ENTITY)
    );

    let received = server.await.unwrap();
    assert_eq!(received[0].path, "/inventory/json/v/1.4.1/download");
    assert_eq!(
        received[0].json_request,
        json!({
            "datasetName": "LANDSAT_8_C1",
            "products": "STANDARD",
            "node": "EE",
            "entityIds": [L8_ENTITY],
            "apiKey": "api-key-7",
        })
    );
}

#[tokio::test]
async fn test_server_errors_surface_as_transport_errors() {
    let (base, server) = serve(vec![(502, "bad gateway".to_string())]).await;
    let client = client_for(&base);

    let err = client
        .lookup_entity_ids(
            &token(),
            &DatasetName::from("LANDSAT_8_C1"),
            &[SceneId::from(L8_SCENE)],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        M2mError::Remote(RemoteError::Transport { status: 502, .. })
    ));
    server.await.unwrap();
}
