//! Endpoint — inbound webhook receiver that fans out to forward URLs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::id::new_id;

/// Hop-by-hop headers dropped when forwarding an inbound request.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Endpoint {
    #[builder(default = new_id())]
    pub id: Uuid,
    pub organization_id: Uuid,
    pub slug: String,
    #[builder(default)]
    pub enabled: bool,
    pub forward_urls: Vec<String>,
    #[builder(default = 3)]
    pub retry_attempts: i32,
    #[builder(default, setter(strip_option))]
    pub queue_name: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

/// Filter a raw header map down to what's safe to forward downstream.
pub fn filter_forward_headers(
    headers: &std::collections::HashMap<String, String>,
) -> std::collections::HashMap<String, String> {
    headers
        .iter()
        .filter(|(k, _)| !HOP_BY_HOP_HEADERS.contains(&k.to_ascii_lowercase().as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn filters_hop_by_hop_headers() {
        let mut headers = HashMap::new();
        headers.insert("Connection".to_string(), "keep-alive".to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Host".to_string(), "example.com".to_string());

        let filtered = filter_forward_headers(&headers);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("Content-Type"));
    }
}
