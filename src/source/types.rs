use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::feed::Cursor;

/// Deserialize a field, falling back to its default when the upstream sent
/// the wrong shape. The normalizer fills in whatever is missing.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Malformed field in upstream record, using default");
        T::default()
    }))
}

/// Decode records one at a time. A record without a usable id is skipped;
/// everything else about it is tolerated by [`lenient`] fields.
pub(crate) fn decode_records<T: DeserializeOwned>(
    values: Vec<serde_json::Value>,
    kind: &'static str,
) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(kind, error = %e, "Skipping upstream record without usable id");
                None
            }
        })
        .collect()
}

// ============================================================================
// Wire Records
// ============================================================================
//
// Upstream payloads encode optional values as zero-or-one element lists
// (`"root": []` / `"root": ["abc"]`). They stay that way here and are turned
// into `Option` by the normalizer; nothing past it sees the list encoding.

/// A forum record as delivered by the item source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawForumItem {
    pub id: u64,
    /// Creation time in nanoseconds.
    #[serde(default, deserialize_with = "lenient")]
    pub timestamp: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub creator: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub root: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub parent: Vec<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub kind: Option<String>,
}

/// One asset bundled into an auction offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawAsset {
    Token {
        ledger: String,
        #[serde(default)]
        amount: Option<String>,
    },
    Nft {
        collection: String,
        #[serde(default)]
        token_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// An active offer from the auction side-channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOffer {
    pub id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub seller: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub assets: Vec<RawAsset>,
    #[serde(default, deserialize_with = "lenient")]
    pub price: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub price_token: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub created_at: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub activated_at: Vec<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub expires_at: Vec<u64>,
}

// ============================================================================
// Pages
// ============================================================================

/// One page of forum items, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<Cursor>,
}

/// Response body of the forum counter endpoint.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub(crate) struct CounterBody {
    pub next_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forum_item_missing_optionals_deserialize() {
        let item: RawForumItem = serde_json::from_str(r#"{"id": 4}"#).unwrap();
        assert_eq!(item.id, 4);
        assert!(item.root.is_empty());
        assert!(item.timestamp.is_none());
    }

    #[test]
    fn test_unknown_asset_kind_is_tolerated() {
        let offer: RawOffer = serde_json::from_str(
            r#"{"id": "o1", "assets": [{"kind": "land_parcel", "plot": 3}, {"kind": "token", "ledger": "L"}]}"#,
        )
        .unwrap();
        assert_eq!(offer.assets[0], RawAsset::Unknown);
        assert!(matches!(offer.assets[1], RawAsset::Token { .. }));
    }

    #[test]
    fn test_wrongly_typed_fields_are_defaulted() {
        let item: RawForumItem = serde_json::from_str(
            r#"{"id": 11, "timestamp": "yesterday", "root": "aaaaa-aa", "title": ["T"]}"#,
        )
        .unwrap();
        assert_eq!(item.id, 11);
        assert_eq!(item.timestamp, None);
        assert!(item.root.is_empty());
        assert_eq!(item.title, vec!["T".to_string()]);

        let offer: RawOffer =
            serde_json::from_str(r#"{"id": "o-2", "price": 7, "assets": [{"kind": "token"}]}"#)
                .unwrap();
        assert_eq!(offer.price, None);
        assert!(offer.assets.is_empty());
    }

    #[test]
    fn test_records_without_id_are_skipped() {
        let values = serde_json::from_str(r#"[{"id": 3}, {"id": "three"}, "junk", {"id": 2}]"#)
            .unwrap();
        let items: Vec<RawForumItem> = decode_records(values, "forum");
        let ids: Vec<u64> = items.iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn test_page_cursor_is_plain_number() {
        let page: Page<RawForumItem> =
            serde_json::from_str(r#"{"items": [], "has_more": true, "next_cursor": 41}"#).unwrap();
        assert_eq!(page.next_cursor, Some(Cursor(41)));
    }
}
