use std::path::PathBuf;
use std::time::Duration;

use human_bytes::human_bytes;
use logging_timer::stimer;
use reqwest::{Certificate, Client, Method, RequestBuilder};
use serde_json::Value;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use crate::conf::Endpoint;
use crate::error::{Error, Result};
use crate::models::server_info::ServerInfo;
use crate::query::{parse_query, SearchRequest};

const RETRY_FACTOR_MILLIS: u64 = 50;
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct EsClient {
    endpoint: Endpoint,
    http_client: Client,
    retries: usize,
}

/// 100ms, 200ms, 400ms ... never longer than `RETRY_MAX_DELAY`.
fn retry_delays(retries: usize) -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(RETRY_FACTOR_MILLIS)
        .max_delay(RETRY_MAX_DELAY)
        .take(retries)
}

fn inject_auth(request_builder: RequestBuilder, endpoint: &Endpoint) -> RequestBuilder {
    if endpoint.has_basic_auth() {
        request_builder.basic_auth(endpoint.get_username(), endpoint.get_password())
    } else {
        request_builder
    }
}

pub fn build_reqwest_client(
    ca_path: Option<&PathBuf>,
    insecure: bool,
    timeout: Duration,
) -> Result<Client> {
    let mut builder = Client::builder().timeout(timeout);
    if insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(path) = ca_path {
        for cert in load_certificates(path)? {
            builder = builder.add_root_certificate(cert);
        }
    }
    Ok(builder.build()?)
}

/// Every readable PEM file in `path` becomes a root certificate.
fn load_certificates(path: &PathBuf) -> Result<Vec<Certificate>> {
    let mut certs = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let file_path = entry?.path();
        if !file_path.is_file() {
            continue;
        }
        match std::fs::read(&file_path).map(|content| Certificate::from_pem(&content)) {
            Ok(Ok(cert)) => certs.push(cert),
            _ => warn!("Skipping {:?}, not a PEM certificate", file_path),
        }
    }
    Ok(certs)
}

impl EsClient {
    pub fn new(endpoint: Endpoint, http_client: Client) -> Self {
        Self {
            endpoint,
            http_client,
            retries: 0,
        }
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        params: &[(&str, String)],
    ) -> Result<Value> {
        let url = format!("{}{}", self.endpoint.get_url(), path);
        let target = format!("{} {}", method, url);
        let _tmr = stimer!(log::Level::Debug; "ES_CALL", "{}", target);

        let mut request_builder = self.http_client.request(method, &url).query(params);
        if let Some(body) = body {
            request_builder = request_builder.json(body);
        }
        request_builder = inject_auth(request_builder, &self.endpoint);

        let response = request_builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        debug!("{} answered {} with {}", url, status, human_bytes(bytes.len() as f64));

        if !status.is_success() {
            return Err(Error::Status {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Retries transport failures only; answers from the cluster are final.
    async fn call_with_retry(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        params: &[(&str, String)],
    ) -> Result<Value> {
        let strategy = retry_delays(self.retries).map(jitter);
        RetryIf::start(
            strategy,
            move || self.call(method.clone(), path, body, params),
            |err: &Error| {
                let retry = err.is_retryable();
                if retry {
                    warn!("Request to {} failed, retrying: {}", path, err);
                }
                retry
            },
        )
        .await
    }

    /// Sends `body` to `<index>/_search`. `size` goes out as a URL parameter
    /// and takes precedence over any `size` inside the body.
    pub async fn search(&self, index: &str, body: &Value, size: Option<u64>) -> Result<Value> {
        let params: Vec<(&str, String)> = size
            .map(|size| vec![("size", size.to_string())])
            .unwrap_or_default();
        info!("Searching index={} size={:?}", index, size);
        self.call_with_retry(Method::POST, &format!("/{}/_search", index), Some(body), &params)
            .await
    }

    pub async fn search_str(&self, index: &str, query: &str, max_hits: Option<u64>) -> Result<Value> {
        let body = parse_query(query)?;
        self.search(index, &body, max_hits).await
    }

    pub async fn execute(
        &self,
        index: &str,
        request: &SearchRequest,
        size: Option<u64>,
    ) -> Result<Value> {
        let body = request.to_value()?;
        self.search(index, &body, size).await
    }

    pub async fn server_info(&self) -> Result<ServerInfo> {
        let value = self.call_with_retry(Method::GET, "/", None, &[]).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn mapping(&self, index: &str) -> Result<Value> {
        self.call_with_retry(Method::GET, &format!("/{}/_mapping", index), None, &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{sample, Query};
    use axum::extract::{Path, Query as Params};
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Echoes everything it received back inside a single hit.
    fn echo_router() -> Router {
        Router::new()
            .route(
                "/:index/_search",
                post(
                    |Path(index): Path<String>,
                     Params(params): Params<HashMap<String, String>>,
                     headers: HeaderMap,
                     Json(body): Json<Value>| async move {
                        let auth = headers
                            .get(header::AUTHORIZATION)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        Json(json!({
                            "took": 1,
                            "hits": {
                                "total": { "value": 1, "relation": "eq" },
                                "hits": [{
                                    "_index": index,
                                    "_source": { "body": body, "size": params.get("size"), "auth": auth }
                                }]
                            }
                        }))
                    },
                ),
            )
            .route(
                "/",
                get(|| async {
                    Json(json!({
                        "name": "node-1",
                        "cluster_name": "docker-cluster",
                        "cluster_uuid": "abc",
                        "version": { "number": "8.13.4", "lucene_version": "9.10.0" }
                    }))
                }),
            )
    }

    fn client(url: &str) -> EsClient {
        let http = build_reqwest_client(None, false, Duration::from_secs(5)).unwrap();
        EsClient::new(Endpoint::new(url), http)
    }

    #[tokio::test]
    async fn test_search_returns_response_unchanged_and_sends_size() {
        let url = spawn(echo_router()).await;
        let body = json!({ "query": { "match_all": {} } });
        let res = client(&url).search("utexas", &body, Some(10)).await.unwrap();

        let hit = &res["hits"]["hits"][0];
        assert_eq!(hit["_index"], "utexas");
        assert_eq!(hit["_source"]["body"], body);
        assert_eq!(hit["_source"]["size"], "10");
        assert_eq!(hit["_source"]["auth"], Value::Null);
        assert_eq!(res["took"], 1);
    }

    #[tokio::test]
    async fn test_literal_and_builder_send_same_body() {
        let url = spawn(echo_router()).await;
        let client = client(&url);
        let sample = sample("query_and_sort").unwrap();

        let literal = client.search_str("utexas", sample.literal, None).await.unwrap();
        let built = client.execute("utexas", &sample.request(), None).await.unwrap();
        assert_eq!(literal, built);
        assert_eq!(literal["hits"]["hits"][0]["_source"]["size"], Value::Null);
    }

    #[tokio::test]
    async fn test_basic_auth_is_injected() {
        let url = spawn(echo_router()).await;
        let http = build_reqwest_client(None, false, Duration::from_secs(5)).unwrap();
        let client = EsClient::new(Endpoint::new(&url).with_basic_auth("elastic", "changeme"), http);
        let request = SearchRequest::new().query(Query::MatchAll);
        let res = client.execute("utexas", &request, None).await.unwrap();
        assert_eq!(
            res["hits"]["hits"][0]["_source"]["auth"],
            "Basic ZWxhc3RpYzpjaGFuZ2VtZQ=="
        );
    }

    #[tokio::test]
    async fn test_invalid_literal_never_hits_the_wire() {
        let client = client("http://127.0.0.1:9");
        let err = client.search_str("utexas", "[]", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_server_info() {
        let url = spawn(echo_router()).await;
        let info = client(&url).server_info().await.unwrap();
        assert_eq!(info.get_name(), "docker-cluster");
        assert_eq!(info.get_version_major(), Some(8));
    }

    #[test]
    fn test_retry_delays_stay_short() {
        let delays: Vec<Duration> = retry_delays(6).collect();
        assert_eq!(
            delays,
            [100, 200, 400, 800, 1600, 2000]
                .into_iter()
                .map(Duration::from_millis)
                .collect::<Vec<_>>()
        );
        assert_eq!(retry_delays(0).count(), 0);
    }

    #[tokio::test]
    async fn test_error_status_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let app = Router::new().route(
            "/missing/_mapping",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::NOT_FOUND, "index_not_found_exception")
                }
            }),
        );
        let url = spawn(app).await;

        let err = client(&url)
            .with_retries(3)
            .mapping("missing")
            .await
            .unwrap_err();
        match err {
            Error::Status { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "index_not_found_exception");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retried_until_answered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let app = Router::new().route(
            "/utexas/_mapping",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                    Json(json!({ "utexas": { "mappings": {} } }))
                }
            }),
        );
        let url = spawn(app).await;
        let http = build_reqwest_client(None, false, Duration::from_millis(300)).unwrap();
        let client = EsClient::new(Endpoint::new(&url), http).with_retries(2);

        let mapping = client.mapping("utexas").await.unwrap();
        assert!(mapping["utexas"]["mappings"].is_object());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connection_refused_gives_up_after_retries() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{}", addr))
            .with_retries(2)
            .server_info()
            .await
            .unwrap_err();
        match &err {
            Error::Http(inner) => assert!(inner.is_connect(), "unexpected error {err:?}"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
