//! Popup session
//!
//! State a popup keeps for as long as it is open: the article or feed it is
//! showing, the tag and category lists for its selectors, and the last error
//! to display. Built once per popup, on top of whichever [`Transport`] the
//! host supports.

use crate::models::{Article, ArticleCapture, ArticleUpdate, Category, Feed, FeedUpdate, Tag};
use crate::relay::{FeedLink, Reply, Request, Response};
use crate::transport::{Transport, TransportError};

pub struct PopupSession<T> {
    transport: T,
    article: Option<Article>,
    feed: Option<Feed>,
    tags: Vec<Tag>,
    categories: Vec<Category>,
    last_error: Option<String>,
}

impl<T: Transport> PopupSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            article: None,
            feed: None,
            tags: Vec::new(),
            categories: Vec::new(),
            last_error: None,
        }
    }

    pub fn article(&self) -> Option<&Article> {
        self.article.as_ref()
    }

    pub fn feed(&self) -> Option<&Feed> {
        self.feed.as_ref()
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub async fn save_article(&mut self, capture: ArticleCapture) -> Result<(), SessionError> {
        self.exchange(Request::SaveArticle { payload: capture }).await
    }

    /// Update the article currently shown.
    pub async fn update_article(&mut self, update: ArticleUpdate) -> Result<(), SessionError> {
        let article_id = self.current_article_id()?;
        self.exchange(Request::UpdateArticle {
            article_id,
            payload: update,
        })
        .await
    }

    pub async fn delete_article(&mut self) -> Result<(), SessionError> {
        let article_id = self.current_article_id()?;
        self.exchange(Request::DeleteArticle { article_id }).await
    }

    pub async fn subscribe_to_feed(&mut self, link: impl Into<String>) -> Result<(), SessionError> {
        self.exchange(Request::SubscribeToFeed {
            payload: FeedLink { link: link.into() },
        })
        .await
    }

    /// Update the feed currently shown.
    pub async fn update_feed(&mut self, update: FeedUpdate) -> Result<(), SessionError> {
        let feed_id = self.current_feed_id()?;
        self.exchange(Request::UpdateFeed {
            feed_id,
            payload: update,
        })
        .await
    }

    pub async fn delete_feed(&mut self) -> Result<(), SessionError> {
        let feed_id = self.current_feed_id()?;
        self.exchange(Request::DeleteFeed { feed_id }).await
    }

    fn current_article_id(&self) -> Result<i64, SessionError> {
        self.article
            .as_ref()
            .map(|article| article.id)
            .ok_or(SessionError::NothingSelected("article"))
    }

    fn current_feed_id(&self) -> Result<i64, SessionError> {
        self.feed
            .as_ref()
            .map(|feed| feed.id)
            .ok_or(SessionError::NothingSelected("feed"))
    }

    async fn exchange(&mut self, request: Request) -> Result<(), SessionError> {
        let result = match self.transport.send(&request).await {
            Ok(Some(Response::Reply(reply))) => {
                self.apply(reply);
                Ok(())
            }
            Ok(Some(Response::Error { error })) => Err(SessionError::Relay(error)),
            Ok(None) => Err(SessionError::NoResponse),
            Err(e) => Err(SessionError::Transport(e)),
        };

        self.last_error = result.as_ref().err().map(ToString::to_string);
        result
    }

    fn apply(&mut self, reply: Reply) {
        match reply {
            Reply::SavedArticle { article, tags } | Reply::UpdatedArticle { article, tags } => {
                self.article = Some(article);
                self.tags = tags;
            }
            Reply::DeletedArticle => self.article = None,
            Reply::SubscribedToFeed {
                feed,
                tags,
                categories,
            }
            | Reply::UpdatedFeed {
                feed,
                tags,
                categories,
            } => {
                self.feed = Some(feed);
                self.tags = tags;
                self.categories = categories;
            }
            Reply::DeletedFeed => self.feed = None,
            Reply::Options { .. } | Reply::StoredOptions | Reply::TestedCredentials { .. } => {}
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Relay(String),

    #[error("No response from the extension host")]
    NoResponse,

    #[error("No {0} is open in this popup")]
    NothingSelected(&'static str),
}
