//! API Client Module
//!
//! Handles HTTP communication with a Legadilo instance. Every call except
//! the token exchange goes through [`ApiClient::call`], which attaches the
//! bearer token and recovers once from an expired access token.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::auth::{Credentials, TokenExchange, TokenResponse};
use crate::models::{
    Article, ArticleCapture, ArticleUpdate, Category, Feed, FeedSubscription, FeedUpdate, Page,
    Tag,
};
use crate::options::{Options, OptionsForm, OptionsStore};
use crate::storage::StorageError;

const TOKENS_PATH: &str = "/api/users/tokens/";
const ARTICLES_PATH: &str = "/api/reading/articles/";
const TAGS_PATH: &str = "/api/reading/tags/";
const FEEDS_PATH: &str = "/api/feeds/";
const CATEGORIES_PATH: &str = "/api/feeds/categories/";

/// API client for a Legadilo instance
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    store: Arc<dyn OptionsStore>,
}

/// A single call against the instance, replayable for the auth retry.
struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(&'static str, String)>,
    body: Option<Value>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    fn with_body<T: Serialize>(
        method: Method,
        path: impl Into<String>,
        body: &T,
    ) -> Result<Self, ApiError> {
        let body = serde_json::to_value(body).map_err(|e| ApiError::Parse(e.to_string()))?;
        Ok(Self {
            body: Some(body),
            ..Self::new(method, path)
        })
    }

    fn query(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.query.push((key, value.into()));
        self
    }
}

impl ApiClient {
    /// Create a client reading its configuration from `store`
    pub fn new(store: Arc<dyn OptionsStore>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("legadilo-host/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self { client, store })
    }

    pub fn store(&self) -> &Arc<dyn OptionsStore> {
        &self.store
    }

    /// Save the captured page as an article.
    ///
    /// A 400 usually means the page content was too big, so the article is
    /// saved again from its URL alone and the server fetches the page itself.
    pub async fn save_article(&self, capture: &ArticleCapture) -> Result<Article, ApiError> {
        if !has_http_scheme(&capture.url) {
            return Err(ApiError::InvalidInput(format!("Invalid url: {}", capture.url)));
        }

        let request = ApiRequest::with_body(Method::POST, ARTICLES_PATH, &capture.to_body())?;
        match self.call_json(&request).await {
            Err(err) if err.status() == Some(400) => {
                warn!("Article rejected with 400, retrying with its URL only");
                let body = ArticleCapture::url_only(capture.url.clone()).to_body();
                self.call_json(&ApiRequest::with_body(Method::POST, ARTICLES_PATH, &body)?)
                    .await
            }
            other => other,
        }
    }

    pub async fn update_article(
        &self,
        article_id: i64,
        update: &ArticleUpdate,
    ) -> Result<Article, ApiError> {
        let path = format!("{ARTICLES_PATH}{article_id}/");
        let request = ApiRequest::with_body(Method::PATCH, path, update)?;
        self.call_json(&request).await
    }

    pub async fn delete_article(&self, article_id: i64) -> Result<Value, ApiError> {
        self.call(&ApiRequest::delete(format!("{ARTICLES_PATH}{article_id}/")))
            .await
    }

    /// List articles, or only those saved from `article_urls`.
    ///
    /// Each URL is its own search query; pages are concatenated in query
    /// order and their counts added up. One failing query fails the lot.
    pub async fn list_articles(&self, article_urls: &[String]) -> Result<Page<Article>, ApiError> {
        if article_urls.is_empty() {
            return self.call_json(&ApiRequest::get(ARTICLES_PATH)).await;
        }

        let mut merged = Page::default();
        for url in article_urls {
            let request = ApiRequest::get(ARTICLES_PATH)
                .query("q", url.as_str())
                .query("search_type", "url");
            let page: Page<Article> = self.call_json(&request).await?;
            merged = merged.merge(page);
        }
        Ok(merged)
    }

    pub async fn subscribe_to_feed(&self, feed_url: &str) -> Result<Feed, ApiError> {
        let body = FeedSubscription { feed_url };
        let request = ApiRequest::with_body(Method::POST, FEEDS_PATH, &body)?;
        self.call_json(&request).await
    }

    pub async fn update_feed(&self, feed_id: i64, update: &FeedUpdate) -> Result<Feed, ApiError> {
        let path = format!("{FEEDS_PATH}{feed_id}/");
        let request = ApiRequest::with_body(Method::PATCH, path, update)?;
        self.call_json(&request).await
    }

    pub async fn delete_feed(&self, feed_id: i64) -> Result<Value, ApiError> {
        self.call(&ApiRequest::delete(format!("{FEEDS_PATH}{feed_id}/")))
            .await
    }

    /// List feeds. Filtering by URL is a single query restricted to enabled
    /// feeds.
    pub async fn list_feeds(&self, feed_urls: &[String]) -> Result<Page<Feed>, ApiError> {
        let mut request = ApiRequest::get(FEEDS_PATH);
        if !feed_urls.is_empty() {
            for url in feed_urls {
                request = request.query("feed_urls", url.as_str());
            }
            request = request.query("enabled", "true");
        }
        self.call_json(&request).await
    }

    pub async fn list_tags(&self) -> Result<Vec<Tag>, ApiError> {
        let page: Page<Tag> = self.call_json(&ApiRequest::get(TAGS_PATH)).await?;
        Ok(page.items)
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>, ApiError> {
        let page: Page<Category> = self.call_json(&ApiRequest::get(CATEGORIES_PATH)).await?;
        Ok(page.items)
    }

    /// Check credentials from the options page before they are saved.
    ///
    /// Never fails: any problem, including an unreachable instance, reads
    /// as `false`. Nothing is written to the store.
    pub async fn test_credentials(&self, form: &OptionsForm) -> bool {
        let options = Options::from_form(form.clone());
        let Credentials::Exchange(exchange) = Credentials::from_options(&options) else {
            debug!("Testing application token against {}", options.base_url());
            return self
                .execute(&options, form.application_token.trim(), &ApiRequest::get(TAGS_PATH))
                .await
                .is_ok();
        };

        let url = format!("{}{}", options.base_url(), TOKENS_PATH);
        debug!("Testing credentials at: {}", url);

        let response = match self.client.post(&url).json(&exchange).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Credentials test failed: {}", e);
                return false;
            }
        };

        let status = response.status();
        match response.json::<TokenResponse>().await {
            Ok(_) => status == reqwest::StatusCode::OK,
            Err(e) => {
                warn!("Credentials test returned an unreadable body ({}): {}", status, e);
                false
            }
        }
    }

    /// Exchange the stored credentials for a new access token and cache it.
    async fn refresh_access_token(
        &self,
        options: &Options,
        exchange: &TokenExchange<'_>,
    ) -> Result<String, ApiError> {
        let url = format!("{}{}", options.base_url(), TOKENS_PATH);
        debug!("Requesting access token at: {}", url);

        let response = self
            .client
            .post(&url)
            .json(exchange)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let response = check_status(response)?;
        let data = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;

        self.store.store_access_token(&data.access_token)?;
        info!("Access token refreshed");
        Ok(data.access_token)
    }

    async fn call_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let value = self.call(request).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Parse(e.to_string()))
    }

    /// Run `request` with the bearer token, refreshing it and retrying once
    /// on 401/403 when the credentials allow a refresh.
    async fn call(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        let options = self.store.load()?;
        let credentials = Credentials::from_options(&options);

        let token = match credentials {
            Credentials::ApplicationToken(token) => token.to_string(),
            Credentials::Exchange(exchange) => match options.cached_access_token() {
                Some(token) => token.to_string(),
                None => self.refresh_access_token(&options, &exchange).await?,
            },
        };

        let first = self.execute(&options, &token, request).await;
        let exchange = match (first, credentials) {
            (Err(err), Credentials::Exchange(exchange)) if err.is_unauthorized() => {
                warn!(
                    "{} {} was refused ({}), refreshing access token",
                    request.method, request.path, err
                );
                exchange
            }
            (result, _) => return result,
        };

        let token = self.refresh_access_token(&options, &exchange).await?;
        self.execute(&options, &token, request).await
    }

    async fn execute(
        &self,
        options: &Options,
        token: &str,
        request: &ApiRequest,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", options.base_url(), request.path);
        debug!("{} {}", request.method, url);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header(AUTHORIZATION, format!("Bearer {}", token));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let response = check_status(response)?;

        if request.method == Method::DELETE {
            return Ok(json!({}));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    Err(ApiError::HttpStatus {
        status: status.as_u16(),
        message: format!(
            "Response status: {} ({})",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        ),
    })
}

fn has_http_scheme(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// API errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{message}")]
    HttpStatus { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// HTTP status behind the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}
