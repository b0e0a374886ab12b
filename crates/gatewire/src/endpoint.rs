//! Gateway endpoint resolution and URL building.

use std::future::Future;
use std::time::Duration;

use gatewire_proto::{GatewayEndpoint, COMPRESS_ZLIB_STREAM, ENCODING_JSON};
use reqwest::header::AUTHORIZATION;
use tracing::debug;
use url::Url;

use crate::error::{GatewayError, GatewayResult};

const QUERY_KEYS: [&str; 3] = ["v", "encoding", "compress"];

/// Produces the base gateway URL for a new connection.
pub trait EndpointResolver: Send + Sync {
    /// Resolve the base URL, without the protocol query parameters.
    fn resolve(&self) -> impl Future<Output = GatewayResult<Url>> + Send;
}

/// Asks the REST API where the gateway lives: `GET {api_base}/gateway`.
#[derive(Clone)]
pub struct HttpEndpointResolver {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl std::fmt::Debug for HttpEndpointResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEndpointResolver")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl HttpEndpointResolver {
    /// Create a resolver against `api_base`, authenticating with `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("gatewire/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            api_base: api_base.into(),
            token: token.into(),
        })
    }

    fn gateway_route(&self) -> String {
        format!("{}/gateway", self.api_base.trim_end_matches('/'))
    }
}

impl EndpointResolver for HttpEndpointResolver {
    async fn resolve(&self) -> GatewayResult<Url> {
        let route = self.gateway_route();
        debug!(%route, "resolving gateway endpoint");

        let endpoint: GatewayEndpoint = self
            .http
            .get(&route)
            .header(AUTHORIZATION, format!("Bot {}", self.token))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Url::parse(&endpoint.url).map_err(|e| {
            GatewayError::EndpointResolution(format!("invalid gateway url '{}': {e}", endpoint.url))
        })
    }
}

/// A fixed endpoint; no network round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticEndpoint(pub Url);

impl StaticEndpoint {
    /// Parse a fixed endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not a valid URL.
    pub fn parse(url: &str) -> GatewayResult<Self> {
        Url::parse(url)
            .map(Self)
            .map_err(|e| GatewayError::Config(format!("invalid gateway url '{url}': {e}")))
    }
}

impl EndpointResolver for StaticEndpoint {
    async fn resolve(&self) -> GatewayResult<Url> {
        Ok(self.0.clone())
    }
}

/// Either kind of resolver, picked from configuration.
#[derive(Debug, Clone)]
pub enum EndpointSource {
    /// Fixed URL.
    Static(StaticEndpoint),
    /// REST lookup.
    Http(HttpEndpointResolver),
}

impl EndpointResolver for EndpointSource {
    async fn resolve(&self) -> GatewayResult<Url> {
        match self {
            Self::Static(endpoint) => endpoint.resolve().await,
            Self::Http(resolver) => resolver.resolve().await,
        }
    }
}

/// Append `v`, `encoding` and `compress` to a base gateway URL, replacing any
/// values already present.
#[must_use]
pub fn build_gateway_url(base: &Url, version: u8) -> Url {
    let mut url = base.clone();
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| !QUERY_KEYS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    url.set_query(None);
    url.query_pairs_mut()
        .extend_pairs(kept)
        .append_pair("v", &version.to_string())
        .append_pair("encoding", ENCODING_JSON)
        .append_pair("compress", COMPRESS_ZLIB_STREAM);
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("valid url")
    }

    #[test]
    fn test_build_gateway_url() {
        let built = build_gateway_url(&url("wss://gateway.example.com"), 6);
        assert_eq!(
            built.as_str(),
            "wss://gateway.example.com/?v=6&encoding=json&compress=zlib-stream"
        );
    }

    #[test]
    fn test_build_gateway_url_replaces_existing_parameters() {
        let built = build_gateway_url(&url("wss://gw.example.com/?v=9&shard=1&compress=none"), 6);
        let pairs: Vec<(String, String)> = built
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert_eq!(
            pairs,
            vec![
                ("shard".to_string(), "1".to_string()),
                ("v".to_string(), "6".to_string()),
                ("encoding".to_string(), "json".to_string()),
                ("compress".to_string(), "zlib-stream".to_string()),
            ]
        );
    }

    #[test]
    fn test_gateway_route_trims_slash() {
        let resolver = HttpEndpointResolver::new("https://api.example.com/v6/", "t", Duration::from_secs(1))
            .expect("client");
        assert_eq!(resolver.gateway_route(), "https://api.example.com/v6/gateway");
    }

    #[test]
    fn test_static_endpoint_rejects_garbage() {
        assert!(StaticEndpoint::parse("not a url").is_err());
    }

    #[tokio::test]
    async fn test_static_endpoint_resolves_to_itself() {
        let endpoint = StaticEndpoint::parse("ws://127.0.0.1:9000").expect("valid");
        let resolved = EndpointSource::Static(endpoint.clone())
            .resolve()
            .await
            .expect("resolve");
        assert_eq!(resolved, endpoint.0);
    }

    #[test]
    fn test_resolver_debug_hides_token() {
        let resolver =
            HttpEndpointResolver::new("https://api.example.com", "secret-token", Duration::from_secs(1))
                .expect("client");
        assert!(!format!("{resolver:?}").contains("secret-token"));
    }
}
