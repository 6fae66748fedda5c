//! CORS for the admin API. Origins come from an explicit whitelist.

use axum::http::header;
use axum::http::{HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

/// Origins allowed when none are configured
const LOCAL_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

/// Build the CORS layer. An empty list allows local development origins only;
/// unparseable entries are skipped.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = if allowed_origins.is_empty() {
        debug!("CORS: No origins specified, allowing localhost only");
        LOCAL_ORIGINS
            .into_iter()
            .map(HeaderValue::from_static)
            .collect()
    } else {
        debug!("CORS: Allowing origins: {:?}", allowed_origins);
        allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("CORS: Ignoring invalid origin {:?}", origin);
                    None
                }
            })
            .collect()
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}
