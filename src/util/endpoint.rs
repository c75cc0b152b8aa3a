use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors from validating an upstream base URL.
#[derive(Error, Debug)]
pub enum EndpointError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// Plain HTTP to a non-loopback host would leak the bearer token.
    #[error("Insecure endpoint {0}: HTTPS required (except localhost)")]
    Insecure(String),
    /// The URL carries a query or fragment that would be clobbered by request building.
    #[error("Endpoint must not contain a query or fragment: {0}")]
    HasQuery(String),
}

/// Validate the base URL of a forum or auction upstream.
///
/// - Scheme must be `https`, or `http` for `localhost` / loopback addresses
/// - No query string or fragment (paths and query pairs are appended per request)
///
/// A trailing slash is stripped from the path so `base/items` joins cleanly.
pub fn validate_endpoint(url_str: &str) -> Result<Url, EndpointError> {
    let mut url = Url::parse(url_str)?;

    match url.scheme() {
        "https" => {}
        "http" if is_loopback_host(&url) => {
            tracing::warn!(endpoint = %url, "Using plain HTTP endpoint (loopback only)");
        }
        "http" => return Err(EndpointError::Insecure(url_str.to_string())),
        scheme => return Err(EndpointError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(EndpointError::HasQuery(url_str.to_string()));
    }

    let trimmed = url.path().trim_end_matches('/').to_string();
    url.set_path(&trimmed);
    Ok(url)
}

fn is_loopback_host(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_accepted() {
        let url = validate_endpoint("https://forum.example.org/api/").unwrap();
        assert_eq!(url.path(), "/api");
    }

    #[test]
    fn test_http_loopback_accepted() {
        assert!(validate_endpoint("http://127.0.0.1:8080").is_ok());
        assert!(validate_endpoint("http://localhost/api").is_ok());
        assert!(validate_endpoint("http://[::1]:9000").is_ok());
    }

    #[test]
    fn test_http_public_rejected() {
        assert!(matches!(
            validate_endpoint("http://forum.example.org/api"),
            Err(EndpointError::Insecure(_))
        ));
    }

    #[test]
    fn test_other_schemes_rejected() {
        assert!(matches!(
            validate_endpoint("ftp://example.org"),
            Err(EndpointError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_query_rejected() {
        assert!(matches!(
            validate_endpoint("https://example.org/api?x=1"),
            Err(EndpointError::HasQuery(_))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            validate_endpoint("not a url"),
            Err(EndpointError::InvalidUrl(_))
        ));
    }
}
