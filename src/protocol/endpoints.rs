/// Endpoint URLs of the bridge server
use url::Url;

use crate::config::ConfigError;
use crate::protocol::{ConnectionError, ConnectionResult};

const AUTH_PARAM: &str = "auth";

/// Builds control and data endpoint URLs under a `ws://` or `wss://` base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: reason.to_string(),
        };

        let base = Url::parse(base_url).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(base.scheme(), "ws" | "wss") {
            return Err(invalid("scheme must be ws or wss"));
        }
        if base.cannot_be_a_base() {
            return Err(invalid("URL cannot be a base"));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `<base>/bridge/ctrl/{host}?auth={token}`
    pub fn control(&self, host: &str, token: &str) -> ConnectionResult<String> {
        self.build(&["bridge", "ctrl", host], token)
    }

    /// `<base>/bridge/data/{host}/{channel_id}?auth={token}`
    pub fn data(&self, host: &str, channel_id: &str, token: &str) -> ConnectionResult<String> {
        self.build(&["bridge", "data", host, channel_id], token)
    }

    fn build(&self, segments: &[&str], token: &str) -> ConnectionResult<String> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ConnectionError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().clear().append_pair(AUTH_PARAM, token);
        Ok(url.into())
    }
}

/// Copy of `url` safe to log: the auth token is masked
pub fn redact_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return "<invalid url>".to_string();
    };
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == AUTH_PARAM { "***".into() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if !pairs.is_empty() {
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    }
    parsed.into()
}
