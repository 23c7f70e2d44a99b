//! HTTP client for the M2M JSON API.
//!
//! Every endpoint goes through [`InventoryClient::request`]: the payload is
//! JSON-encoded into a single `jsonRequest` form field and the response
//! envelope is checked by [`parse_envelope`] before any endpoint looks at
//! `data`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use m2m_core::{
    ConfigError, DatasetName, DownloadUrl, EntityId, HostRewrite, InventoryApi, InventoryConfig,
    M2mError, M2mResult, ProductType, RemoteError, ResolutionError, SceneId, SessionToken,
};
use reqwest::Client;
use serde_json::{json, Map, Value};

/// Decoded response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// The `data` member; present on every successful response, possibly null.
    pub data: Value,
    /// Version the service reports alongside login responses.
    pub api_version: Option<String>,
}

/// Check a raw HTTP response against the envelope contract.
///
/// # Errors
/// * `RemoteError::Transport` - non-2xx status
/// * `RemoteError::Protocol` - body is not a JSON object, or has no `data`
/// * `RemoteError::Service` - the body carries a truthy `error`
pub fn parse_envelope(endpoint: &str, status: u16, body: &str) -> M2mResult<ApiResponse> {
    if !(200..300).contains(&status) {
        return Err(RemoteError::Transport {
            endpoint: endpoint.to_string(),
            status,
            message: truncate(body, 512),
        }
        .into());
    }

    let parsed: Value = serde_json::from_str(body).map_err(|e| RemoteError::Protocol {
        endpoint: endpoint.to_string(),
        reason: format!("unable to parse JSON response: {}", e),
    })?;
    let Value::Object(mut envelope) = parsed else {
        return Err(RemoteError::Protocol {
            endpoint: endpoint.to_string(),
            reason: "response is not a JSON object".to_string(),
        }
        .into());
    };

    if let Some(error) = envelope.get("error").filter(|e| is_truthy(e)) {
        let code = envelope
            .get("errorCode")
            .map(value_to_string)
            .unwrap_or_else(|| "UNKNOWN".to_string());
        return Err(RemoteError::Service {
            endpoint: endpoint.to_string(),
            code,
            message: value_to_string(error),
        }
        .into());
    }

    let data = envelope.remove("data").ok_or_else(|| RemoteError::Protocol {
        endpoint: endpoint.to_string(),
        reason: "no data found".to_string(),
    })?;
    let api_version = envelope.get("api_version").map(value_to_string);

    Ok(ApiResponse { data, api_version })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Pick exactly one download URL per entity id.
///
/// A candidate belongs to an id when it contains the id as a substring.
/// Candidates are rewritten to the internal host first. Ids with zero or
/// several matching candidates are returned in the second element.
pub fn select_download_urls(
    entity_ids: &[EntityId],
    candidates: &[String],
    rewrite: &HostRewrite,
) -> (HashMap<EntityId, DownloadUrl>, Vec<EntityId>) {
    let rewritten: Vec<String> = candidates.iter().map(|c| rewrite.apply(c)).collect();

    let mut selected = HashMap::with_capacity(entity_ids.len());
    let mut unmatched = Vec::new();
    for id in entity_ids {
        let mut matches = rewritten.iter().filter(|url| url.contains(id.as_str()));
        match (matches.next(), matches.next()) {
            (Some(url), None) => {
                selected.insert(id.clone(), DownloadUrl::new(url.clone()));
            }
            _ => unmatched.push(id.clone()),
        }
    }
    (selected, unmatched)
}

/// Payload as it may appear in logs; `None` when it carries a password.
fn loggable_payload(payload: &Map<String, Value>) -> Option<String> {
    if payload.contains_key("password") {
        None
    } else {
        Some(serde_json::Value::Object(payload.clone()).to_string())
    }
}

/// Form fields for one request: the payload, plus `apiKey` when a token is
/// given, JSON-encoded into `jsonRequest`.
pub fn request_form(
    mut payload: Map<String, Value>,
    token: Option<&SessionToken>,
) -> [(&'static str, String); 1] {
    if let Some(token) = token {
        payload.insert("apiKey".to_string(), Value::String(token.expose().to_string()));
    }
    [("jsonRequest", Value::Object(payload).to_string())]
}

/// `login` data must be a non-empty string token.
pub fn decode_login(data: Value) -> M2mResult<SessionToken> {
    match data {
        Value::String(token) if !token.is_empty() => Ok(SessionToken::new(token)),
        other => Err(RemoteError::Authentication {
            reason: format!("login returned {} instead of a token", shape_name(&other)),
        }
        .into()),
    }
}

/// Calls that only acknowledge (`logout`, `userContext`, `clearUserContext`)
/// fail with `RemoteError::Context` when `data` is falsy.
pub fn decode_acknowledgement(data: &Value, reason: impl FnOnce() -> String) -> M2mResult<()> {
    if is_truthy(data) {
        Ok(())
    } else {
        Err(RemoteError::Context { reason: reason() }.into())
    }
}

/// Map an `idLookup` response onto the requested ids.
///
/// # Errors
/// * `ResolutionError::UnexpectedShape` - `data` is not a mapping
/// * `ResolutionError::Unresolved` - some id is absent or null in the mapping
pub fn decode_id_lookup(
    dataset: &DatasetName,
    ids: &[SceneId],
    data: Value,
) -> M2mResult<HashMap<SceneId, EntityId>> {
    let results = match data {
        Value::Object(results) => results,
        other => {
            return Err(ResolutionError::UnexpectedShape {
                operation: "idLookup".to_string(),
                dataset: dataset.to_string(),
                expected: "mapping".to_string(),
                found: shape_name(&other).to_string(),
            }
            .into())
        }
    };

    let mut resolved = HashMap::with_capacity(ids.len());
    let mut missing = Vec::new();
    for id in ids {
        match results.get(id.as_str()) {
            Some(Value::Null) | None => missing.push(id.as_str()),
            Some(entity) => {
                resolved.insert(id.clone(), EntityId::new(value_to_string(entity)));
            }
        }
    }

    if !missing.is_empty() {
        tracing::debug!(dataset = %dataset, requested = ids.len(), missing = missing.len(), "ID lookup incomplete");
        return Err(ResolutionError::unresolved("idLookup", missing).into());
    }
    Ok(resolved)
}

/// Collapse a `download` response to one URL per entity id.
///
/// # Errors
/// * `ResolutionError::UnexpectedShape` - `data` is not a list
/// * `ResolutionError::Unresolved` - some id matched zero or several URLs
pub fn decode_download(
    dataset: &DatasetName,
    entity_ids: &[EntityId],
    data: Value,
    rewrite: &HostRewrite,
) -> M2mResult<HashMap<EntityId, DownloadUrl>> {
    let results = match data {
        Value::Array(results) => results,
        other => {
            return Err(ResolutionError::UnexpectedShape {
                operation: "download".to_string(),
                dataset: dataset.to_string(),
                expected: "list".to_string(),
                found: shape_name(&other).to_string(),
            }
            .into())
        }
    };
    let candidates: Vec<String> = results
        .into_iter()
        .filter_map(|r| match r {
            Value::String(url) => Some(url),
            _ => None,
        })
        .collect();

    let unique: Vec<EntityId> = {
        let mut seen = HashSet::new();
        entity_ids
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect()
    };
    let (selected, unmatched) = select_download_urls(&unique, &candidates, rewrite);
    if !unmatched.is_empty() {
        tracing::debug!(dataset = %dataset, candidates = candidates.len(), unmatched = unmatched.len(), "Download URLs incomplete");
        return Err(ResolutionError::unresolved("download", unmatched).into());
    }
    Ok(selected)
}

/// reqwest-backed [`InventoryApi`].
pub struct InventoryClient {
    client: Client,
    config: InventoryConfig,
}

impl InventoryClient {
    /// Build a client with the configured request timeout.
    pub fn new(config: InventoryConfig) -> M2mResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "request_timeout".to_string(),
                value: format!("{:?}", config.request_timeout),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }

    /// POST `payload` to `endpoint` and return the checked envelope.
    ///
    /// When a token is given it is added as `apiKey` after the payload has
    /// been logged. Payloads carrying a password are never logged.
    pub async fn request(
        &self,
        endpoint: &str,
        token: Option<&SessionToken>,
        payload: Map<String, Value>,
    ) -> M2mResult<ApiResponse> {
        let url = self.config.endpoint_url(endpoint)?;
        tracing::debug!(method = "POST", url = %url, "Sending inventory request");
        if let Some(shown) = loggable_payload(&payload) {
            tracing::debug!(endpoint, payload = %shown, "Request payload");
        }

        let response = self
            .client
            .post(url)
            .form(&request_form(payload, token))
            .send()
            .await
            .map_err(|e| RemoteError::Transport {
                endpoint: endpoint.to_string(),
                status: 0,
                message: format!("HTTP request failed: {}", e),
            })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| RemoteError::Transport {
            endpoint: endpoint.to_string(),
            status,
            message: format!("failed to read response body: {}", e),
        })?;
        tracing::debug!(endpoint, status, bytes = text.len(), "Received inventory response");

        parse_envelope(endpoint, status, &text)
    }

    fn login_payload(&self) -> Map<String, Value> {
        let credentials = &self.config.credentials;
        object(json!({
            "username": credentials.username(),
            "password": credentials.password(),
            "authType": "EROS",
        }))
    }

    async fn login_response(&self) -> M2mResult<ApiResponse> {
        self.request("login", None, self.login_payload())
            .await
            .map_err(|e| match e {
                M2mError::Remote(remote) => RemoteError::Authentication {
                    reason: remote.to_string(),
                }
                .into(),
                other => other,
            })
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

#[async_trait]
impl InventoryApi for InventoryClient {
    async fn login(&self) -> M2mResult<SessionToken> {
        let response = self.login_response().await?;
        decode_login(response.data)
    }

    async fn logout(&self, token: &SessionToken) -> M2mResult<()> {
        let response = self.request("logout", Some(token), Map::new()).await?;
        decode_acknowledgement(&response.data, || {
            format!("{} logout failed", self.config.credentials.username())
        })
    }

    async fn available(&self) -> M2mResult<bool> {
        let response = self.login_response().await?;
        let Some(expected) = &self.config.api_version else {
            return Ok(true);
        };
        let available = response.api_version.as_deref() == Some(expected.as_str());
        if !available {
            tracing::warn!(
                expected = %expected,
                reported = ?response.api_version,
                "Inventory service reports a different API version"
            );
        }
        Ok(available)
    }

    async fn lookup_entity_ids(
        &self,
        token: &SessionToken,
        dataset: &DatasetName,
        ids: &[SceneId],
    ) -> M2mResult<HashMap<SceneId, EntityId>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let payload = object(json!({
            "idList": ids,
            "inputField": "displayId",
            "datasetName": dataset,
        }));
        let response = self.request("idLookup", Some(token), payload).await?;
        decode_id_lookup(dataset, ids, response.data)
    }

    async fn fetch_download_urls(
        &self,
        token: &SessionToken,
        dataset: &DatasetName,
        entity_ids: &[EntityId],
        product: &ProductType,
    ) -> M2mResult<HashMap<EntityId, DownloadUrl>> {
        if entity_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let payload = object(json!({
            "datasetName": dataset,
            "products": product.as_str(),
            "node": self.config.node,
            "entityIds": entity_ids,
        }));
        let response = self.request("download", Some(token), payload).await?;
        decode_download(dataset, entity_ids, response.data, &self.config.host_rewrite)
    }

    async fn set_user_context(
        &self,
        token: &SessionToken,
        contact_id: u64,
        ip_address: Option<&str>,
    ) -> M2mResult<()> {
        let payload = object(json!({
            "contactId": contact_id,
            "ipAddress": ip_address,
            "applicationContext": self.config.application_context,
        }));
        let response = self.request("userContext", Some(token), payload).await?;
        decode_acknowledgement(&response.data, || {
            format!(
                "set user context {} failed for user {} (ip: {})",
                self.config.application_context,
                contact_id,
                ip_address.unwrap_or("none")
            )
        })
    }

    async fn clear_user_context(&self, token: &SessionToken) -> M2mResult<()> {
        let response = self
            .request("clearUserContext", Some(token), Map::new())
            .await?;
        decode_acknowledgement(&response.data, || "failed to clear user context".to_string())
    }
}

impl std::fmt::Debug for InventoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryClient")
            .field("base_url", &self.config.base_url.as_str())
            .field("username", &self.config.credentials.username())
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use m2m_core::Credentials;

    fn rewrite() -> HostRewrite {
        HostRewrite::new("dds.cr.usgs.gov", "invalid.host").unwrap()
    }

    #[test]
    fn test_envelope_returns_data() {
        let response = parse_envelope("login", 200, r#"{"data": "abc", "api_version": "1.4.1"}"#)
            .unwrap();
        assert_eq!(response.data, json!("abc"));
        assert_eq!(response.api_version.as_deref(), Some("1.4.1"));
    }

    #[test]
    fn test_envelope_accepts_null_data() {
        let response = parse_envelope("logout", 200, r#"{"data": null}"#).unwrap();
        assert_eq!(response.data, Value::Null);
    }

    #[test]
    fn test_envelope_non_2xx_is_transport_error() {
        let err = parse_envelope("idLookup", 503, "Service Unavailable").unwrap_err();
        assert!(matches!(
            err,
            M2mError::Remote(RemoteError::Transport { status: 503, .. })
        ));
    }

    #[test]
    fn test_envelope_unparseable_body_is_protocol_error() {
        let err = parse_envelope("idLookup", 200, "<html>").unwrap_err();
        assert!(matches!(err, M2mError::Remote(RemoteError::Protocol { .. })));
    }

    #[test]
    fn test_envelope_error_field_is_service_error() {
        let err = parse_envelope(
            "idLookup",
            200,
            r#"{"data": null, "error": "Invalid API key", "errorCode": "AUTH_UNAUTHROIZED"}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            M2mError::Remote(RemoteError::Service {
                endpoint: "idLookup".to_string(),
                code: "AUTH_UNAUTHROIZED".to_string(),
                message: "Invalid API key".to_string(),
            })
        );
    }

    #[test]
    fn test_envelope_empty_error_is_ignored() {
        let response =
            parse_envelope("download", 200, r#"{"data": [], "error": "", "errorCode": null}"#)
                .unwrap();
        assert_eq!(response.data, json!([]));
    }

    #[test]
    fn test_envelope_missing_data_is_protocol_error() {
        let err = parse_envelope("download", 200, r#"{"api_version": "1.4.1"}"#).unwrap_err();
        assert!(matches!(err, M2mError::Remote(RemoteError::Protocol { .. })));
    }

    #[test]
    fn test_select_rewrites_host_and_matches_by_id() {
        let ids = vec![EntityId::from("LC80440342013089LGN01")];
        let candidates = vec![
            "http://dds.cr.usgs.gov/ltaauth/LC80440342013089LGN01.tar.gz?id=1".to_string(),
            "http://dds.cr.usgs.gov/ltaauth/LE70440342013089EDC00.tar.gz?id=2".to_string(),
        ];
        let (selected, unmatched) = select_download_urls(&ids, &candidates, &rewrite());
        assert!(unmatched.is_empty());
        assert_eq!(
            selected[&ids[0]].as_str(),
            "http://invalid.host/ltaauth/LC80440342013089LGN01.tar.gz?id=1"
        );
    }

    #[test]
    fn test_select_excludes_ambiguous_and_absent_ids() {
        let ids = vec![EntityId::from("AAA"), EntityId::from("BBB")];
        let candidates = vec![
            "http://dds.cr.usgs.gov/AAA/1".to_string(),
            "http://dds.cr.usgs.gov/AAA/2".to_string(),
        ];
        let (selected, unmatched) = select_download_urls(&ids, &candidates, &rewrite());
        assert!(selected.is_empty());
        assert_eq!(unmatched, ids);
    }

    fn dataset() -> DatasetName {
        DatasetName::from("LANDSAT_8_C1")
    }

    fn jsonrequest(form: &[(&'static str, String); 1]) -> Value {
        assert_eq!(form[0].0, "jsonRequest");
        serde_json::from_str(&form[0].1).unwrap()
    }

    #[test]
    fn test_request_form_adds_api_key_only_with_token() {
        let payload = object(json!({"idList": ["A"], "datasetName": "LANDSAT_8_C1"}));

        let anonymous = jsonrequest(&request_form(payload.clone(), None));
        assert_eq!(anonymous, json!({"idList": ["A"], "datasetName": "LANDSAT_8_C1"}));

        let token = SessionToken::new("api-key-1");
        let keyed = jsonrequest(&request_form(payload, Some(&token)));
        assert_eq!(keyed["apiKey"], json!("api-key-1"));
        assert_eq!(keyed["idList"], json!(["A"]));
    }

    #[test]
    fn test_loggable_payload_hides_credentials_and_key() {
        let login = object(json!({"username": "espa", "password": "hunter2", "authType": "EROS"}));
        assert!(loggable_payload(&login).is_none());

        let lookup = object(json!({"idList": ["A"]}));
        let shown = loggable_payload(&lookup).unwrap();
        assert!(shown.contains("idList"));
        assert!(!shown.contains("apiKey"));
    }

    #[test]
    fn test_decode_login() {
        assert_eq!(decode_login(json!("tok")).unwrap().expose(), "tok");
        for data in [json!(""), json!(null), json!(42), json!({"token": "tok"})] {
            let err = decode_login(data.clone()).unwrap_err();
            assert!(err.is_authentication(), "{}", data);
        }
    }

    #[test]
    fn test_decode_acknowledgement_falsy_is_context_error() {
        assert!(decode_acknowledgement(&json!(true), || unreachable!()).is_ok());
        for data in [json!(false), json!(null), json!(0), json!("")] {
            let err = decode_acknowledgement(&data, || "logout failed".to_string()).unwrap_err();
            assert_eq!(
                err,
                M2mError::Remote(RemoteError::Context {
                    reason: "logout failed".to_string()
                })
            );
        }
    }

    #[test]
    fn test_decode_id_lookup_complete() {
        let ids = vec![SceneId::from("A"), SceneId::from("B")];
        let found = decode_id_lookup(&dataset(), &ids, json!({"A": "1", "B": 2})).unwrap();
        assert_eq!(found[&ids[0]].as_str(), "1");
        assert_eq!(found[&ids[1]].as_str(), "2");
    }

    #[test]
    fn test_decode_id_lookup_absent_and_null_are_unresolved() {
        let ids = vec![SceneId::from("A"), SceneId::from("B"), SceneId::from("C")];
        let err = decode_id_lookup(&dataset(), &ids, json!({"A": "1", "B": null})).unwrap_err();
        assert_eq!(
            err,
            M2mError::from(ResolutionError::unresolved("idLookup", ["B", "C"]))
        );
    }

    #[test]
    fn test_decode_id_lookup_rejects_non_mapping() {
        let ids = vec![SceneId::from("A")];
        let err = decode_id_lookup(&dataset(), &ids, json!(["1"])).unwrap_err();
        assert_eq!(
            err,
            M2mError::from(ResolutionError::UnexpectedShape {
                operation: "idLookup".to_string(),
                dataset: "LANDSAT_8_C1".to_string(),
                expected: "mapping".to_string(),
                found: "list".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_download_rewrites_and_deduplicates() {
        let ids = vec![EntityId::from("AAA"), EntityId::from("AAA")];
        let found = decode_download(
            &dataset(),
            &ids,
            json!(["http://dds.cr.usgs.gov/AAA.tar.gz", 7, null]),
            &rewrite(),
        )
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&ids[0]].as_str(), "http://invalid.host/AAA.tar.gz");
    }

    #[test]
    fn test_decode_download_unmatched_and_shape_errors() {
        let ids = vec![EntityId::from("AAA"), EntityId::from("BBB")];
        let err = decode_download(
            &dataset(),
            &ids,
            json!(["http://dds.cr.usgs.gov/AAA.tar.gz"]),
            &rewrite(),
        )
        .unwrap_err();
        assert_eq!(err.unresolved_ids(), Some(&["BBB".to_string()][..]));

        let err = decode_download(&dataset(), &ids, json!({"AAA": "x"}), &rewrite()).unwrap_err();
        assert!(matches!(
            err,
            M2mError::Resolution(ResolutionError::UnexpectedShape { ref found, .. }) if found == "mapping"
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = InventoryConfig::new(
            "https://m2m.example.test/api/json/v1.4.1/",
            Credentials::new("espa", "hunter2"),
            rewrite(),
        )
        .unwrap();
        let client = InventoryClient::new(config).unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }
}
