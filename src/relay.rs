//! Message Relay Module
//!
//! Runs API operations on behalf of the extension's UI surfaces. Requests
//! and responses are named JSON envelopes; each request gets exactly one
//! response, except requests with an unknown name, which get none.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::models::{Article, ArticleCapture, ArticleUpdate, Category, Feed, FeedUpdate, Tag};
use crate::options::OptionsForm;
use crate::transport::{Port, TransportError};

/// Returned from [`Relay::on_message`]: the response is sent later, so the
/// host must keep the call open.
pub const KEEP_CHANNEL_OPEN: bool = true;

/// Request envelope sent by a UI surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum Request {
    SaveArticle {
        payload: ArticleCapture,
    },
    UpdateArticle {
        #[serde(rename = "articleId")]
        article_id: i64,
        #[serde(default)]
        payload: ArticleUpdate,
    },
    DeleteArticle {
        #[serde(rename = "articleId")]
        article_id: i64,
    },
    SubscribeToFeed {
        payload: FeedLink,
    },
    UpdateFeed {
        #[serde(rename = "feedId")]
        feed_id: i64,
        #[serde(default)]
        payload: FeedUpdate,
    },
    DeleteFeed {
        #[serde(rename = "feedId")]
        feed_id: i64,
    },
    GetOptions,
    StoreOptions {
        payload: OptionsForm,
    },
    TestCredentials {
        payload: OptionsForm,
    },
}

impl Request {
    pub const NAMES: &'static [&'static str] = &[
        "save-article",
        "update-article",
        "delete-article",
        "subscribe-to-feed",
        "update-feed",
        "delete-feed",
        "get-options",
        "store-options",
        "test-credentials",
    ];

    pub fn is_known(name: &str) -> bool {
        Self::NAMES.contains(&name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedLink {
    pub link: String,
}

/// Successful response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum Reply {
    SavedArticle {
        article: Article,
        tags: Vec<Tag>,
    },
    UpdatedArticle {
        article: Article,
        tags: Vec<Tag>,
    },
    DeletedArticle,
    SubscribedToFeed {
        feed: Feed,
        tags: Vec<Tag>,
        categories: Vec<Category>,
    },
    UpdatedFeed {
        feed: Feed,
        tags: Vec<Tag>,
        categories: Vec<Category>,
    },
    DeletedFeed,
    Options {
        options: OptionsForm,
    },
    StoredOptions,
    TestedCredentials {
        success: bool,
    },
}

/// What goes back over the channel: a named reply or `{error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Error { error: String },
    Reply(Reply),
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            error: message.into(),
        }
    }
}

/// The privileged end of the extension: owns the API client (and through
/// it the options store) and answers UI requests.
pub struct Relay {
    api: ApiClient,
}

impl Relay {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Handle one raw message. `None` means nothing must be sent back.
    pub async fn handle_message(&self, message: Value) -> Option<Response> {
        let name = message
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if !Request::is_known(&name) {
            warn!("Unknown action {}", name);
            return None;
        }

        match serde_json::from_value::<Request>(message) {
            Ok(request) => Some(self.handle(request).await),
            Err(e) => {
                warn!("Malformed {} request: {}", name, e);
                Some(Response::error(format!("Invalid {} request: {}", name, e)))
            }
        }
    }

    /// Run a request; failures become an `{error}` envelope.
    pub async fn handle(&self, request: Request) -> Response {
        match self.dispatch(request).await {
            Ok(reply) => Response::Reply(reply),
            Err(err) => {
                error!("Request failed: {}", err);
                Response::error(err.to_string())
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Reply, ApiError> {
        match request {
            Request::SaveArticle { payload } => {
                let article = self.api.save_article(&payload).await?;
                let tags = self.api.list_tags().await?;
                Ok(Reply::SavedArticle { article, tags })
            }
            Request::UpdateArticle { article_id, payload } => {
                let article = self.api.update_article(article_id, &payload).await?;
                let tags = self.api.list_tags().await?;
                Ok(Reply::UpdatedArticle { article, tags })
            }
            Request::DeleteArticle { article_id } => {
                self.api.delete_article(article_id).await?;
                Ok(Reply::DeletedArticle)
            }
            Request::SubscribeToFeed { payload } => {
                let feed = self.api.subscribe_to_feed(&payload.link).await?;
                let (tags, categories) =
                    tokio::try_join!(self.api.list_tags(), self.api.list_categories())?;
                Ok(Reply::SubscribedToFeed { feed, tags, categories })
            }
            Request::UpdateFeed { feed_id, payload } => {
                let feed = self.api.update_feed(feed_id, &payload).await?;
                let (tags, categories) =
                    tokio::try_join!(self.api.list_tags(), self.api.list_categories())?;
                Ok(Reply::UpdatedFeed { feed, tags, categories })
            }
            Request::DeleteFeed { feed_id } => {
                self.api.delete_feed(feed_id).await?;
                Ok(Reply::DeletedFeed)
            }
            Request::GetOptions => {
                let options = self.api.store().load()?;
                Ok(Reply::Options {
                    options: options.to_form(),
                })
            }
            Request::StoreOptions { payload } => {
                self.api.store().store_options(payload)?;
                Ok(Reply::StoredOptions)
            }
            Request::TestCredentials { payload } => {
                let success = self.api.test_credentials(&payload).await;
                Ok(Reply::TestedCredentials { success })
            }
        }
    }

    /// Serve a persistent port until the other side goes away. Requests are
    /// handled strictly one after the other.
    pub async fn serve<P: Port>(&self, port: &mut P) -> Result<(), TransportError> {
        info!("Port connected");
        while let Some(message) = Self::next_message(port).await? {
            if let Some(response) = self.handle_message(message).await {
                port.post(&response).await?;
            }
        }
        info!("Port disconnected");
        Ok(())
    }

    /// Serve a single message, then stop.
    pub async fn serve_once<P: Port>(&self, port: &mut P) -> Result<(), TransportError> {
        let message = match port.recv().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("Port closed before any message");
                return Ok(());
            }
            Err(e) if e.is_per_message() => return Self::reject(port, e).await,
            Err(e) => return Err(e),
        };
        if let Some(response) = self.handle_message(message).await {
            port.post(&response).await?;
        }
        Ok(())
    }

    /// Next message that decodes. Undecodable ones are answered with an
    /// `{error}` in place; only a broken or closed channel ends the wait.
    async fn next_message<P: Port>(port: &mut P) -> Result<Option<Value>, TransportError> {
        loop {
            match port.recv().await {
                Err(e) if e.is_per_message() => Self::reject(port, e).await?,
                other => return other,
            }
        }
    }

    async fn reject<P: Port>(port: &mut P, e: TransportError) -> Result<(), TransportError> {
        warn!("Rejected inbound message: {}", e);
        port.post(&Response::error(e.to_string())).await
    }

    /// One-shot entry point: answer on `respond` once the work is done and
    /// tell the host to keep the call open meanwhile. If no response is
    /// produced, `respond` is dropped, which closes the call.
    pub fn on_message(
        self: &Arc<Self>,
        message: Value,
        respond: oneshot::Sender<Response>,
    ) -> bool {
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(response) = relay.handle_message(message).await {
                if respond.send(response).is_err() {
                    debug!("Caller went away before the response was ready");
                }
            }
        });
        KEEP_CHANNEL_OPEN
    }
}
