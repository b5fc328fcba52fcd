//! Authorization request construction
//!
//! Builds the front-channel URL that starts an authorization-code + PKCE
//! flow. Persisting the verifier and `state`, and redeeming the code, are
//! handled by [`TokenManager`](super::TokenManager).

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, AuthResult};

/// Parameters of an authorization request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeParams {
    /// Authorization endpoint (e.g. `https://issuer.example.com/oauth2/auth`)
    pub authorization_endpoint: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub audience: Option<String>,
    /// `login`, `create`, `none`, ...
    #[serde(default)]
    pub prompt: Option<String>,
    /// Organization to sign into
    #[serde(default)]
    pub org_code: Option<String>,
    /// Additional query parameters, appended in order
    #[serde(default)]
    pub extra: Vec<(String, String)>,
}

fn default_scopes() -> Vec<String> {
    ["openid", "profile", "email", "offline"].iter().map(ToString::to_string).collect()
}

impl AuthorizeParams {
    /// Parameters with the default `openid profile email offline` scopes
    #[must_use]
    pub fn new(
        authorization_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            authorization_endpoint: authorization_endpoint.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes: default_scopes(),
            audience: None,
            prompt: None,
            org_code: None,
            extra: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn with_org_code(mut self, org_code: impl Into<String>) -> Self {
        self.org_code = Some(org_code.into());
        self
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((name.into(), value.into()));
        self
    }
}

/// URL to send the user agent to, and the `state` it carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// Build the authorization URL for a PKCE challenge and CSRF state
///
/// # Errors
/// Returns [`AuthError::Config`] if the endpoint is not an absolute URL
pub fn build_authorization_url(
    params: &AuthorizeParams,
    code_challenge: &str,
    state: &str,
) -> AuthResult<String> {
    let mut url = Url::parse(&params.authorization_endpoint).map_err(|e| {
        AuthError::Config(format!(
            "invalid authorization endpoint '{}': {e}",
            params.authorization_endpoint
        ))
    })?;

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &params.client_id)
            .append_pair("redirect_uri", &params.redirect_uri)
            .append_pair("scope", &params.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");
        if let Some(audience) = &params.audience {
            query.append_pair("audience", audience);
        }
        if let Some(prompt) = &params.prompt {
            query.append_pair("prompt", prompt);
        }
        if let Some(org_code) = &params.org_code {
            query.append_pair("org_code", org_code);
        }
        for (name, value) in &params.extra {
            query.append_pair(name, value);
        }
    }

    Ok(url.into())
}
