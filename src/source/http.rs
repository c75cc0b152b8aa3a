//! JSON-over-HTTPS implementations of the source traits.
//!
//! Retries follow the same schedule for both upstreams: 429 and 5xx responses
//! back off exponentially, other non-2xx statuses fail immediately, and bodies
//! are read as a stream with a hard size cap.

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::{
    decode_records, AuctionSource, CounterBody, FetchError, ForumSource, Page, RawForumItem,
    RawOffer,
};
use crate::feed::{Cursor, FeedFilter};

const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Retry and timeout settings shared by the HTTP sources.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry.
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
struct Endpoint {
    client: reqwest::Client,
    base: Url,
    token: Option<Arc<SecretString>>,
    policy: RetryPolicy,
}

impl Endpoint {
    fn url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        let joined = format!("{}/{}", self.base.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let mut retry_count = 0;

        let bytes = loop {
            let mut request = self.client.get(url.clone());
            if let Some(token) = &self.token {
                request = request.header(
                    reqwest::header::AUTHORIZATION,
                    format!("Bearer {}", token.expose_secret()),
                );
            }

            let response = tokio::time::timeout(self.policy.timeout, request.send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= self.policy.max_retries {
                    return Err(if status.is_server_error() {
                        FetchError::HttpStatus(status.as_u16())
                    } else {
                        FetchError::RateLimited(self.policy.max_retries)
                    });
                }

                let delay = self.policy.base_delay * 2u32.pow(retry_count);
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Upstream busy, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            break read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
        };

        serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

// ============================================================================
// Forum
// ============================================================================

/// Forum item source served at `{base}/items` and `{base}/counter`.
#[derive(Clone)]
pub struct HttpForumSource {
    endpoint: Endpoint,
}

impl HttpForumSource {
    /// `base` should already have passed [`validate_endpoint`](crate::util::validate_endpoint).
    pub fn new(
        client: reqwest::Client,
        base: Url,
        token: Option<SecretString>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            endpoint: Endpoint {
                client,
                base,
                token: token.map(Arc::new),
                policy,
            },
        }
    }
}

#[async_trait]
impl ForumSource for HttpForumSource {
    async fn fetch_page(
        &self,
        cursor: Option<Cursor>,
        length: usize,
        filter: Option<&FeedFilter>,
    ) -> Result<Page<RawForumItem>, FetchError> {
        let mut url = self.endpoint.url("items");
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("length", &length.to_string());
            if let Some(Cursor(c)) = cursor {
                query.append_pair("cursor", &c.to_string());
            }
            if let Some(filter) = filter {
                if let Some(creator) = &filter.creator {
                    query.append_pair("creator", creator);
                }
                if !filter.roots.is_empty() {
                    let roots: Vec<&str> = filter.roots.iter().map(String::as_str).collect();
                    query.append_pair("roots", &roots.join(","));
                }
                if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
                    query.append_pair("q", search.trim());
                }
            }
        }

        tracing::debug!(url = %url, "Fetching forum page");
        let page: Page<serde_json::Value> = self.endpoint.get_json(url).await?;
        Ok(Page {
            items: decode_records(page.items, "forum"),
            has_more: page.has_more,
            next_cursor: page.next_cursor,
        })
    }

    async fn fetch_counter(&self) -> Result<u64, FetchError> {
        let body: CounterBody = self.endpoint.get_json(self.endpoint.url("counter")).await?;
        Ok(body.next_id)
    }
}

// ============================================================================
// Auctions
// ============================================================================

/// Auction side-channel served at `{base}/offers`.
#[derive(Clone)]
pub struct HttpAuctionSource {
    endpoint: Endpoint,
}

impl HttpAuctionSource {
    pub fn new(
        client: reqwest::Client,
        base: Url,
        token: Option<SecretString>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            endpoint: Endpoint {
                client,
                base,
                token: token.map(Arc::new),
                policy,
            },
        }
    }
}

#[async_trait]
impl AuctionSource for HttpAuctionSource {
    async fn fetch_active_offers(&self, page_size: usize) -> Result<Vec<RawOffer>, FetchError> {
        let mut url = self.endpoint.url("offers");
        url.query_pairs_mut()
            .append_pair("page_size", &page_size.to_string());
        let offers: Vec<serde_json::Value> = self.endpoint.get_json(url).await?;
        Ok(decode_records(offers, "offer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    fn forum(server: &MockServer, token: Option<&str>) -> HttpForumSource {
        HttpForumSource::new(
            reqwest::Client::new(),
            Url::parse(&format!("{}/api", server.uri())).unwrap(),
            token.map(|t| SecretString::from(t.to_string())),
            fast_policy(),
        )
    }

    const PAGE: &str = r#"{
        "items": [
            {"id": 12, "timestamp": 1200, "root": ["aaaaa-aa"], "kind": "post", "body": "hi"},
            {"id": 11, "timestamp": 1100}
        ],
        "has_more": true,
        "next_cursor": 10
    }"#;

    #[tokio::test]
    async fn test_fetch_page_sends_cursor_and_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/items"))
            .and(query_param("length", "2"))
            .and(query_param("cursor", "12"))
            .and(query_param("roots", "aaaaa-aa,bbbbb-bb"))
            .and(query_param("q", "governance"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let filter = FeedFilter {
            roots: ["aaaaa-aa".to_string(), "bbbbb-bb".to_string()]
                .into_iter()
                .collect(),
            search: Some(" governance ".to_string()),
            ..FeedFilter::default()
        };
        let page = forum(&server, None)
            .fetch_page(Some(Cursor(12)), 2, Some(&filter))
            .await
            .unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].root, vec!["aaaaa-aa".to_string()]);
        assert!(page.has_more);
        assert_eq!(page.next_cursor, Some(Cursor(10)));
    }

    #[tokio::test]
    async fn test_fetch_counter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/counter"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"next_id": 106}"#))
            .mount(&server)
            .await;

        assert_eq!(forum(&server, None).fetch_counter().await.unwrap(), 106);
    }

    #[tokio::test]
    async fn test_bearer_token_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"next_id": 1}"#))
            .expect(1)
            .mount(&server)
            .await;

        assert!(forum(&server, Some("s3cret")).fetch_counter().await.is_ok());
    }

    #[tokio::test]
    async fn test_404_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        match forum(&server, None).fetch_counter().await {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_500_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&server)
            .await;

        match forum(&server, None).fetch_page(None, 20, None).await {
            Err(FetchError::HttpStatus(500)) => {}
            other => panic!("Expected HttpStatus(500), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_503_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let page = forum(&server, None).fetch_page(None, 2, None).await.unwrap();
        assert_eq!(page.items[0].id, 12);
    }

    #[tokio::test]
    async fn test_429_exhausts_into_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        match forum(&server, None).fetch_counter().await {
            Err(FetchError::RateLimited(3)) => {}
            other => panic!("Expected RateLimited(3), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"items\": 3"))
            .mount(&server)
            .await;

        assert!(matches!(
            forum(&server, None).fetch_page(None, 20, None).await,
            Err(FetchError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_forum_record_does_not_fail_the_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/items"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{
                    "items": [
                        {"id": 12, "timestamp": 1200},
                        {"id": 11, "timestamp": "yesterday", "root": ["aaaaa-aa"]},
                        {"id": "ten"}
                    ],
                    "has_more": true,
                    "next_cursor": 9
                }"#,
            ))
            .mount(&server)
            .await;

        let page = forum(&server, None).fetch_page(None, 3, None).await.unwrap();

        let ids: Vec<u64> = page.items.iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![12, 11]);
        assert_eq!(page.items[1].timestamp, None);
        assert_eq!(page.items[1].root, vec!["aaaaa-aa".to_string()]);
        assert_eq!(page.next_cursor, Some(Cursor(9)));
    }

    #[tokio::test]
    async fn test_bad_offer_keeps_the_others() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/offers"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[
                    {"id": "o-1", "price": "12.5"},
                    {"id": "o-2", "price": 7, "seller": "s"}
                ]"#,
            ))
            .mount(&server)
            .await;

        let source = HttpAuctionSource::new(
            reqwest::Client::new(),
            Url::parse(&server.uri()).unwrap(),
            None,
            fast_policy(),
        );
        let offers = source.fetch_active_offers(50).await.unwrap();

        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].price.as_deref(), Some("12.5"));
        assert_eq!(offers[1].price, None);
        assert_eq!(offers[1].seller.as_deref(), Some("s"));
    }

    #[tokio::test]
    async fn test_fetch_active_offers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/offers"))
            .and(query_param("page_size", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"id": "o-1", "assets": [{"kind": "token", "ledger": "ryjl3"}], "price": "12.5"}]"#,
            ))
            .mount(&server)
            .await;

        let source = HttpAuctionSource::new(
            reqwest::Client::new(),
            Url::parse(&server.uri()).unwrap(),
            None,
            fast_policy(),
        );
        let offers = source.fetch_active_offers(50).await.unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].price.as_deref(), Some("12.5"));
    }
}
