//! CORS policy built from `[server.cors]`.

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use ob_domain::config::CorsConfig;

const METHODS: [Method; 4] = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];

/// Parsed origin rules: exact origins plus `scheme://host:` prefixes that
/// accept any numeric port.
#[derive(Debug, Clone, Default)]
struct OriginRules {
    exact: Vec<HeaderValue>,
    any_port: Vec<String>,
}

impl OriginRules {
    fn parse(origins: &[String]) -> Self {
        let mut rules = Self::default();
        for origin in origins {
            if let Some(prefix) = origin.strip_suffix('*').filter(|p| p.ends_with(':')) {
                rules.any_port.push(prefix.to_owned());
            } else if let Ok(value) = origin.parse::<HeaderValue>() {
                rules.exact.push(value);
            } else {
                tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
            }
        }
        rules
    }

    fn allows(&self, origin: &HeaderValue) -> bool {
        if self.exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
            return true;
        }
        let Ok(origin) = origin.to_str() else {
            return false;
        };
        self.any_port.iter().any(|prefix| {
            origin
                .strip_prefix(prefix.as_str())
                .is_some_and(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
        })
    }
}

pub fn layer(cors: &CorsConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods(METHODS)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if cors.is_wildcard() {
        tracing::warn!("CORS configured with wildcard \"*\", all origins allowed");
        return base.allow_origin(Any);
    }

    let rules = OriginRules::parse(&cors.allowed_origins);
    let allow_origin = if rules.any_port.is_empty() {
        AllowOrigin::list(rules.exact)
    } else {
        AllowOrigin::predicate(move |origin, _| rules.allows(origin))
    };

    base.allow_origin(allow_origin).allow_credentials(true)
}
