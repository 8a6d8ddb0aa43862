//! Resource Fetcher
//!
//! Retrieves complete result sets from GCP list APIs, following page tokens.

use crate::gcp::client::GcpClient;
use anyhow::{Context, Result};
use serde_json::Value;

/// Where the items of a list response live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Items {
    /// A plain array field, e.g. `items` or `clusters`
    Field(&'static str),
    /// A Compute Engine aggregated list: `items: { "zones/x": { <field>: [...] } }`
    Aggregated(&'static str),
}

/// One page of a list response
pub struct Page {
    pub items: Vec<Value>,
    pub next_token: Option<String>,
}

/// Fetch all resources (auto-paginate)
pub async fn fetch_all(
    client: &GcpClient,
    url: &str,
    query: &[(&str, &str)],
    items: Items,
) -> Result<Vec<Value>> {
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = fetch_page(client, url, query, items, page_token.as_deref()).await?;
        pages += 1;
        all_items.extend(page.items);

        match page.next_token {
            Some(token) if page_token.as_deref() == Some(token.as_str()) => {
                anyhow::bail!("{} returned the same page token twice", url);
            },
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    tracing::debug!("{}: {} items in {} pages", url, all_items.len(), pages);
    Ok(all_items)
}

/// Fetch one page of resources
pub async fn fetch_page(
    client: &GcpClient,
    url: &str,
    query: &[(&str, &str)],
    items: Items,
    page_token: Option<&str>,
) -> Result<Page> {
    let mut params: Vec<(&str, &str)> = query.to_vec();
    if let Some(token) = page_token {
        params.push(("pageToken", token));
    }

    let response = client
        .get_with_query(url, &params)
        .await
        .with_context(|| format!("Failed to list {}", url))?;

    Ok(parse_page(&response, items))
}

/// Split a list response into its items and continuation token
pub fn parse_page(response: &Value, items: Items) -> Page {
    let items = match items {
        Items::Field(field) => response
            .get(field)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default(),
        Items::Aggregated(field) => flatten_aggregated(response, field),
    };

    let next_token = response
        .get("nextPageToken")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    Page { items, next_token }
}

/// Flatten an aggregated API response.
/// Aggregated responses have format: { "items": { "zones/us-central1-a": { "instances": [...] }, ... } }
/// Scopes without resources carry a `warning` instead of the field and are skipped.
fn flatten_aggregated(response: &Value, field: &str) -> Vec<Value> {
    let Some(scopes) = response.get("items").and_then(|v| v.as_object()) else {
        return Vec::new();
    };

    scopes
        .values()
        .filter_map(|scope| scope.get(field).and_then(|v| v.as_array()))
        .flat_map(|arr| arr.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_page() {
        let page = parse_page(
            &json!({ "items": [{"name": "a"}, {"name": "b"}], "nextPageToken": "t2" }),
            Items::Field("items"),
        );
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_token.as_deref(), Some("t2"));
    }

    #[test]
    fn test_parse_page_without_items_is_empty() {
        let page = parse_page(&json!({ "kind": "compute#networkList" }), Items::Field("items"));
        assert!(page.items.is_empty());
        assert!(page.next_token.is_none());
    }

    #[test]
    fn test_empty_token_ends_pagination() {
        let page = parse_page(&json!({ "items": [], "nextPageToken": "" }), Items::Field("items"));
        assert!(page.next_token.is_none());
    }

    #[test]
    fn test_flatten_aggregated_skips_warnings() {
        let response = json!({
            "items": {
                "zones/us-central1-a": { "instances": [{"name": "vm-1"}, {"name": "vm-2"}] },
                "zones/us-central1-b": { "warning": { "code": "NO_RESULTS_ON_PAGE" } },
                "zones/europe-west1-b": { "instances": [{"name": "vm-3"}] }
            }
        });
        let page = parse_page(&response, Items::Aggregated("instances"));
        assert_eq!(page.items.len(), 3);
    }
}
