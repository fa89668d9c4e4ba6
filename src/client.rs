//! API Client Module
//!
//! Facade that routes every outbound call through the response cache, the
//! retry manager and, for GraphQL, the query planner. The HTTP transport and
//! credential source are injected.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::cache::{CacheEntry, CacheLookup, CacheManager, Method};
use crate::clock::{Clock, JitterSource, RandomJitter, SystemClock};
use crate::config::Config;
use crate::error::{ResilienceError, Result, UpstreamError};
use crate::query::{BatchEntry, BatchOptions, OptimizeOptions, QueryPlanner, QueryVariant};
use crate::retry::{BreakerRegistry, RetryManager};
use crate::tasks::{spawn_refresh, RefreshJob};

// == Transport Boundary ==
/// Performs one HTTP request.
///
/// Implementations return `Ok` for 2xx and 304 responses and an
/// [`UpstreamError`] carrying the status and headers for everything else.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform_request(
        &self,
        request: &ApiRequest,
    ) -> std::result::Result<ApiResponse, UpstreamError>;
}

/// Source of the current bearer credential. Tokens are passed through as-is.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> String;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> String + Send + Sync,
{
    fn bearer_token(&self) -> String {
        self()
    }
}

/// Outbound request. Header names are lowercase.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub params: Value,
    pub headers: HashMap<String, String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Value::Object(Map::new()),
            headers: HashMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Response handed back to callers, either from upstream or from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    /// Served from the cache without a fresh body from upstream
    pub from_cache: bool,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
            from_cache: false,
        }
    }

    /// 200 response with a JSON body.
    pub fn json_body(value: &Value) -> Self {
        Self::new(200, value.to_string())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    /// `PermanentUpstream` when the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| ResilienceError::PermanentUpstream {
            status: Some(self.status),
            attempts: 1,
            message: format!("invalid JSON body: {}", e),
        })
    }

    fn cached(entry: &CacheEntry) -> Self {
        let mut response = Self::new(200, entry.data.clone());
        if let Some(etag) = &entry.etag {
            response = response.with_header("etag", etag.clone());
        }
        response.from_cache = true;
        response
    }
}

/// Sends `request` under the retry manager.
///
/// Statuses of 400 and above that reach here as `Ok` are turned into
/// upstream errors so they are classified like any other failure.
pub(crate) async fn dispatch(
    retry: &RetryManager,
    transport: &dyn Transport,
    request: &ApiRequest,
) -> Result<ApiResponse> {
    retry
        .execute_with_retry(move |_attempt| async move {
            let response = transport.perform_request(request).await?;
            if response.status >= 400 {
                let mut err = UpstreamError::http(
                    response.status,
                    String::from_utf8_lossy(&response.body).into_owned(),
                );
                err.headers = response.headers;
                return Err(err);
            }
            Ok::<_, UpstreamError>(response)
        })
        .await
}

// == Builder ==
/// Assembles an [`ApiClient`] from configuration and injected collaborators.
pub struct ApiClientBuilder {
    config: Config,
    transport: Arc<dyn Transport>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    clock: Option<Arc<dyn Clock>>,
    jitter: Option<Arc<dyn JitterSource>>,
    breakers: Option<Arc<BreakerRegistry>>,
    target: String,
    graphql_path: String,
}

impl ApiClientBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Shares breakers with other clients talking to the same targets.
    pub fn breaker_registry(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Name of the upstream target, used to pick the breaker.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn graphql_path(mut self, path: impl Into<String>) -> Self {
        self.graphql_path = path.into();
        self
    }

    /// # Errors
    /// Returns a configuration error if any section of the config is invalid.
    pub fn build(self) -> Result<ApiClient> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let jitter = self.jitter.unwrap_or_else(|| Arc::new(RandomJitter));
        let breakers = self.breakers.unwrap_or_else(|| {
            Arc::new(BreakerRegistry::with_clock(
                self.config.retry.circuit_breaker,
                clock.clone(),
            ))
        });

        let cache = Arc::new(CacheManager::with_clock(self.config.cache.clone(), clock.clone())?);
        let retry = RetryManager::with_breaker(
            self.config.retry.clone(),
            breakers.get_or_create(&self.target),
        )?
        .with_clock(clock)
        .with_jitter(jitter);
        let planner = QueryPlanner::new(self.config.planner.clone())?;

        info!(
            upstream = %self.target,
            cache_enabled = cache.is_enabled(),
            max_retries = retry.get_config().max_retries,
            "api client ready"
        );

        Ok(ApiClient {
            transport: self.transport,
            credentials: self.credentials,
            cache,
            retry,
            planner,
            graphql_path: self.graphql_path,
        })
    }
}

// == Api Client ==
/// Cache-aware, retrying client for one upstream API.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    cache: Arc<CacheManager>,
    retry: RetryManager,
    planner: QueryPlanner,
    graphql_path: String,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .field("planner", &self.planner)
            .field("graphql_path", &self.graphql_path)
            .finish()
    }
}

impl ApiClient {
    pub fn builder(transport: Arc<dyn Transport>) -> ApiClientBuilder {
        ApiClientBuilder {
            config: Config::default(),
            transport,
            credentials: None,
            clock: None,
            jitter: None,
            breakers: None,
            target: "default".to_string(),
            graphql_path: "/graphql".to_string(),
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn retry(&self) -> &RetryManager {
        &self.retry
    }

    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    // == REST ==
    /// Sends a request, serving safe reads from the cache where possible.
    ///
    /// - fresh hit: returned immediately; an aging entry also gets a
    ///   detached background refresh
    /// - expired entry with an ETag: revalidated with `If-None-Match`, a 304
    ///   re-stores the old body
    /// - successful writes delete the cached GET of the same path
    ///
    /// # Errors
    /// Whatever the retry manager surfaces; cache failures only when the
    /// cache is misconfigured.
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse> {
        let request = self.authorize(request);

        if !(request.method.is_cacheable() && self.cache.is_enabled()) {
            let response = self.send(&request).await?;
            if request.method.is_mutation() && self.cache.is_enabled() {
                self.invalidate(&request.path)?;
            }
            return Ok(response);
        }

        let key = self
            .cache
            .generate_key(request.method, &request.path, &request.params)?;
        let stale = match self.cache.lookup(&key)? {
            CacheLookup::Fresh(entry) => {
                if self.cache.should_background_refresh(&entry) {
                    self.refresh_in_background(key, &request, &entry);
                }
                return Ok(ApiResponse::cached(&entry));
            }
            CacheLookup::Expired(entry) => Some(entry),
            CacheLookup::Missing => None,
        };

        let outbound = match stale.as_ref().and_then(|e| e.etag.as_deref()) {
            Some(etag) => request.clone().with_header("if-none-match", etag),
            None => request,
        };
        let response = self.send(&outbound).await?;

        match stale {
            Some(entry) if response.is_not_modified() => {
                debug!(key = %key, "stale entry revalidated");
                self.cache
                    .set(&key, entry.data.clone(), entry.etag.clone(), None)?;
                Ok(ApiResponse::cached(&entry))
            }
            _ => {
                if response.is_success() {
                    let etag = response.header("etag").map(str::to_string);
                    self.cache.set(&key, response.body.clone(), etag, None)?;
                }
                Ok(response)
            }
        }
    }

    /// Sends a GET and decodes the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, params: Value) -> Result<T> {
        self.request(ApiRequest::get(path).with_params(params))
            .await?
            .json()
    }

    // == GraphQL ==
    /// Runs a GraphQL query, paging through an over-budget connection.
    ///
    /// Pages are requested in order, each chained from the previous page's
    /// cursor, and merged into one response: `nodes` and `edges` are
    /// concatenated and the last `pageInfo` wins.
    ///
    /// # Errors
    /// - `QueryTooExpensive` when any variant exceeds the point or node ceiling
    /// - `PermanentUpstream` when the response carries GraphQL errors
    pub async fn graphql(&self, query: &str, variables: Value) -> Result<Value> {
        let variants = self.planner.split(query)?;
        for variant in &variants {
            self.planner.validate_point_limit(&variant.query)?;
        }

        let mut merged: Option<Value> = None;
        let mut cursor: Option<String> = None;
        for (index, variant) in variants.iter().enumerate() {
            let mut vars = match &variables {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };
            if let Some(name) = &variant.cursor_variable {
                match cursor.take() {
                    Some(value) => {
                        vars.insert(name.clone(), Value::String(value));
                    }
                    None => break,
                }
            }

            let page = self.post_graphql(&variant.query, Value::Object(vars)).await?;
            if variant.page_size.is_none() {
                return Ok(page);
            }

            let (more, next_cursor) = page_state(&page, variant);
            debug!(
                page = index + 1,
                of = variants.len(),
                more,
                "received split page"
            );
            cursor = next_cursor;
            match merged.as_mut() {
                Some(base) => merge_page(base, page, &variant.connection_path),
                None => merged = Some(page),
            }
            if !more {
                break;
            }
        }

        Ok(merged.unwrap_or(Value::Null))
    }

    /// Runs independent aliased queries in as few requests as the batch
    /// budget allows, returning each alias's data.
    pub async fn graphql_batch(
        &self,
        entries: &[BatchEntry],
        options: &BatchOptions,
    ) -> Result<Map<String, Value>> {
        let requests = self.planner.batch(entries, options)?;
        let mut results = Map::new();
        for request in &requests {
            self.planner.validate_point_limit(&request.query)?;
            let data = self
                .post_graphql(&request.query, Value::Object(Map::new()))
                .await?;
            for alias in &request.aliases {
                let value = data.get(alias).cloned().unwrap_or(Value::Null);
                results.insert(alias.clone(), value);
            }
        }
        Ok(results)
    }

    /// Optimizes a query with the default rewrites before sending it.
    pub async fn graphql_optimized(&self, query: &str, variables: Value) -> Result<Value> {
        let optimized = self.planner.optimize(query, &OptimizeOptions::default());
        self.graphql(&optimized, variables).await
    }

    async fn post_graphql(&self, query: &str, variables: Value) -> Result<Value> {
        let request = self.authorize(
            ApiRequest::new(Method::Post, self.graphql_path.clone())
                .with_params(json!({ "query": query, "variables": variables })),
        );
        let response = self.send(&request).await?;
        let mut body: Value = response.json()?;

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let message = errors
                    .iter()
                    .map(|e| {
                        e.get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown GraphQL error")
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ResilienceError::PermanentUpstream {
                    status: Some(response.status),
                    attempts: 1,
                    message,
                });
            }
        }
        Ok(body
            .get_mut("data")
            .map(std::mem::take)
            .unwrap_or(Value::Null))
    }

    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        dispatch(&self.retry, self.transport.as_ref(), request).await
    }

    fn authorize(&self, request: ApiRequest) -> ApiRequest {
        match &self.credentials {
            Some(credentials) => request.with_header(
                "authorization",
                format!("Bearer {}", credentials.bearer_token()),
            ),
            None => request,
        }
    }

    fn invalidate(&self, path: &str) -> Result<()> {
        let key = self
            .cache
            .generate_key(Method::Get, path, &Value::Object(Map::new()))?;
        debug!(key = %key, "invalidating cached read after write");
        self.cache.delete(&key)
    }

    fn refresh_in_background(&self, key: String, request: &ApiRequest, entry: &CacheEntry) {
        let request = match &entry.etag {
            Some(etag) => request.clone().with_header("if-none-match", etag.clone()),
            None => request.clone(),
        };
        debug!(key = %key, "scheduling background refresh");
        spawn_refresh(
            self.cache.clone(),
            self.retry.clone(),
            self.transport.clone(),
            RefreshJob { key, request },
        );
    }
}

/// `(has_more, cursor)` for a received page of a split query.
fn page_state(page: &Value, variant: &QueryVariant) -> (bool, Option<String>) {
    let pointer = connection_pointer(&variant.connection_path);
    let Some(connection) = page.pointer(&pointer) else {
        return (false, None);
    };

    match variant.direction.page_info_fields() {
        Some((has_more, cursor)) => {
            let info = connection.get("pageInfo");
            let more = info
                .and_then(|i| i.get(has_more))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let next = info
                .and_then(|i| i.get(cursor))
                .and_then(Value::as_str)
                .map(str::to_string);
            (more && next.is_some(), next)
        }
        None => {
            let received = ["nodes", "edges"]
                .iter()
                .find_map(|k| connection.get(*k).and_then(Value::as_array))
                .or_else(|| connection.as_array())
                .map(|items| items.len() as u64)
                .unwrap_or(0);
            (received >= variant.page_size.unwrap_or(0), None)
        }
    }
}

fn connection_pointer(path: &[String]) -> String {
    path.iter().map(|key| format!("/{}", key)).collect()
}

/// Appends `page`'s items at `path` onto `base`.
fn merge_page(base: &mut Value, mut page: Value, path: &[String]) {
    let pointer = connection_pointer(path);
    let Some(incoming) = page.pointer_mut(&pointer).map(std::mem::take) else {
        return;
    };
    let Some(target) = base.pointer_mut(&pointer) else {
        return;
    };

    match (target, incoming) {
        (Value::Array(existing), Value::Array(items)) => existing.extend(items),
        (Value::Object(existing), Value::Object(mut incoming)) => {
            for list in ["nodes", "edges"] {
                if let Some(Value::Array(items)) = incoming.remove(list) {
                    match existing.get_mut(list) {
                        Some(Value::Array(current)) => current.extend(items),
                        _ => {
                            existing.insert(list.to_string(), Value::Array(items));
                        }
                    }
                }
            }
            if let Some(page_info) = incoming.remove("pageInfo") {
                existing.insert("pageInfo".to_string(), page_info);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::PageDirection;

    fn forward_variant(path: &[&str]) -> QueryVariant {
        QueryVariant {
            query: String::new(),
            page_size: Some(2),
            cursor_variable: None,
            connection_path: path.iter().map(|s| s.to_string()).collect(),
            direction: PageDirection::Forward,
            estimated_points: 3,
        }
    }

    #[test]
    fn test_request_headers_are_lowercase() {
        let request = ApiRequest::get("/repos").with_header("If-None-Match", "\"v1\"");
        assert_eq!(request.header("if-none-match"), Some("\"v1\""));
        assert_eq!(request.header("IF-NONE-MATCH"), Some("\"v1\""));
    }

    #[test]
    fn test_cached_response_carries_etag() {
        let entry = CacheEntry::new(
            "GET /x".to_string(),
            Bytes::from_static(b"{}"),
            Some("\"abc\"".to_string()),
            0,
            1_000,
        );
        let response = ApiResponse::cached(&entry);
        assert!(response.from_cache);
        assert_eq!(response.status, 200);
        assert_eq!(response.header("ETag"), Some("\"abc\""));
    }

    #[test]
    fn test_json_decode_error_is_permanent() {
        let response = ApiResponse::new(200, "not json");
        let err = response.json::<Value>().unwrap_err();
        assert_eq!(err.status(), Some(200));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_page_state_reads_page_info() {
        let page = json!({
            "repository": {"issues": {
                "nodes": [1, 2],
                "pageInfo": {"hasNextPage": true, "endCursor": "c2"}
            }}
        });
        let variant = forward_variant(&["repository", "issues"]);
        assert_eq!(page_state(&page, &variant), (true, Some("c2".to_string())));

        let last = json!({"repository": {"issues": {"pageInfo": {"hasNextPage": false, "endCursor": "c9"}}}});
        assert!(!page_state(&last, &variant).0);
    }

    #[test]
    fn test_merge_page_appends_and_replaces_page_info() {
        let mut base = json!({
            "repository": {"name": "r", "issues": {
                "nodes": [{"id": 1}, {"id": 2}],
                "pageInfo": {"hasNextPage": true, "endCursor": "c2"}
            }}
        });
        let page = json!({
            "repository": {"name": "r", "issues": {
                "nodes": [{"id": 3}],
                "pageInfo": {"hasNextPage": false, "endCursor": "c3"}
            }}
        });
        merge_page(
            &mut base,
            page,
            &["repository".to_string(), "issues".to_string()],
        );

        assert_eq!(
            base["repository"]["issues"]["nodes"],
            json!([{"id": 1}, {"id": 2}, {"id": 3}])
        );
        assert_eq!(base["repository"]["issues"]["pageInfo"]["endCursor"], "c3");
        assert_eq!(base["repository"]["name"], "r");
    }
}
