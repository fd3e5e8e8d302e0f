//! Authentication Module
//!
//! Credential shapes and the token exchange payloads.

use serde::{Deserialize, Serialize};

use crate::options::{non_empty, Options};

/// How requests against the instance are authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credentials<'a> {
    /// Long-lived application token sent as the bearer credential as is.
    ApplicationToken(&'a str),
    /// Email, token id and token secret exchanged for a short-lived access
    /// token.
    Exchange(TokenExchange<'a>),
}

impl<'a> Credentials<'a> {
    /// Pick the credential shape configured in `options`.
    pub fn from_options(options: &'a Options) -> Self {
        match non_empty(&options.application_token) {
            Some(token) => Credentials::ApplicationToken(token),
            None => Credentials::Exchange(TokenExchange {
                email: &options.user_email,
                application_token_uuid: &options.token_id,
                application_token_secret: &options.token_secret,
            }),
        }
    }
}

/// Body of `POST /api/users/tokens/`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenExchange<'a> {
    pub email: &'a str,
    pub application_token_uuid: &'a str,
    pub application_token_secret: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_token_takes_precedence() {
        let options = Options {
            application_token: "app-token".into(),
            user_email: "me@example.com".into(),
            token_id: "id".into(),
            token_secret: "secret".into(),
            ..Options::default()
        };

        let credentials = Credentials::from_options(&options);
        assert_eq!(credentials, Credentials::ApplicationToken("app-token"));
    }

    #[test]
    fn blank_application_token_means_exchange() {
        let options = Options {
            application_token: "   ".into(),
            user_email: "me@example.com".into(),
            token_id: "id".into(),
            token_secret: "secret".into(),
            ..Options::default()
        };

        let Credentials::Exchange(exchange) = Credentials::from_options(&options) else {
            panic!("expected token exchange");
        };
        let body = serde_json::to_value(exchange).unwrap();
        assert_eq!(body["email"], "me@example.com");
        assert_eq!(body["application_token_uuid"], "id");
        assert_eq!(body["application_token_secret"], "secret");
    }
}
