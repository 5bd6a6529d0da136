//! Ordered collections and cursor pages

use serde_json::Value;

use super::ACTIVITYSTREAMS_CONTEXT;
use super::kind::ObjectType;
use super::object::{Node, VocabularyObject};

/// One page of items produced by an application dispatcher
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub prev_cursor: Option<String>,
    pub next_cursor: Option<String>,
    pub items: Vec<T>,
}

/// `{collection_uri}?cursor={cursor}` with the cursor form-encoded.
pub fn cursor_uri(collection_uri: &str, cursor: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(cursor.as_bytes()).collect();
    format!("{}?cursor={}", collection_uri, encoded)
}

/// Unpaged collection holding every item inline.
pub fn ordered_collection(
    id: &str,
    total_items: Option<u64>,
    items: Vec<VocabularyObject>,
) -> VocabularyObject {
    let mut collection = VocabularyObject::new(ObjectType::OrderedCollection)
        .with_context(Value::String(ACTIVITYSTREAMS_CONTEXT.to_string()))
        .with_id(id);
    if let Some(total) = total_items {
        collection.set_scalar("totalItems", total);
    }
    collection.set_nodes("orderedItems", items);
    collection
}

/// Paged collection pointing at its first and last pages.
pub fn paged_collection(
    id: &str,
    total_items: Option<u64>,
    first_cursor: &str,
    last_cursor: Option<&str>,
) -> VocabularyObject {
    let mut collection = VocabularyObject::new(ObjectType::OrderedCollection)
        .with_context(Value::String(ACTIVITYSTREAMS_CONTEXT.to_string()))
        .with_id(id)
        .with_node("first", cursor_uri(id, first_cursor));
    if let Some(last) = last_cursor {
        collection.set_node("last", cursor_uri(id, last));
    }
    if let Some(total) = total_items {
        collection.set_scalar("totalItems", total);
    }
    collection
}

/// A single page of a paged collection.
pub fn collection_page(
    collection_uri: &str,
    cursor: &str,
    page: Page<VocabularyObject>,
) -> VocabularyObject {
    let mut document = VocabularyObject::new(ObjectType::OrderedCollectionPage)
        .with_context(Value::String(ACTIVITYSTREAMS_CONTEXT.to_string()))
        .with_id(cursor_uri(collection_uri, cursor))
        .with_node("partOf", collection_uri);
    if let Some(prev) = &page.prev_cursor {
        document.set_node("prev", cursor_uri(collection_uri, prev));
    }
    if let Some(next) = &page.next_cursor {
        document.set_node("next", cursor_uri(collection_uri, next));
    }
    document.set_nodes("orderedItems", page.items.into_iter().map(Node::from));
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OUTBOX: &str = "https://a.example/users/alice/outbox";

    #[test]
    fn paged_collection_links_first_and_last() {
        let collection = paged_collection(OUTBOX, Some(42), "0", Some("40"));
        let json = collection.to_json();
        assert_eq!(json["type"], "OrderedCollection");
        assert_eq!(json["totalItems"], 42);
        assert_eq!(json["first"], format!("{}?cursor=0", OUTBOX));
        assert_eq!(json["last"], format!("{}?cursor=40", OUTBOX));
    }

    #[test]
    fn page_links_neighbours_and_parent() {
        let note = VocabularyObject::new(ObjectType::Note).with_id("https://a.example/notes/1");
        let page = collection_page(
            OUTBOX,
            "20",
            Page {
                prev_cursor: Some("0".to_string()),
                next_cursor: None,
                items: vec![note],
            },
        );
        let json = page.to_json();
        assert_eq!(json["partOf"], OUTBOX);
        assert_eq!(json["prev"], format!("{}?cursor=0", OUTBOX));
        assert!(json.get("next").is_none());
        assert_eq!(json["orderedItems"][0]["id"], json!("https://a.example/notes/1"));
    }

    #[test]
    fn cursors_are_form_encoded() {
        assert_eq!(
            cursor_uri(OUTBOX, "a b&c"),
            format!("{}?cursor=a+b%26c", OUTBOX)
        );
    }
}
