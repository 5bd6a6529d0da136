//! Extensible Activity Vocabulary record
//!
//! A `VocabularyObject` keeps the properties it understands in a typed
//! form and every other property verbatim, so documents from servers with
//! vendor extensions survive a parse/serialize round trip.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

use super::kind::ObjectType;
use crate::error::{AppError, Result};

/// How a recognized property is shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Exactly one scalar value
    Functional,
    /// Ordered sequence of links or objects, always serialized as an array
    Ordered,
    /// One or more inline objects; references are not accepted
    Embedded,
    /// One or more values, each either a URI reference or an inline object
    LinkOrObject,
    /// One or more plain strings
    Terms,
    /// Language tag to string, as in `contentMap`
    LanguageMap,
}

/// Look up the shape of a recognized property.
pub fn property_kind(name: &str) -> Option<PropertyKind> {
    use PropertyKind::*;

    let kind = match name {
        "content" | "name" | "summary" | "published" | "updated" | "startTime" | "endTime"
        | "duration" | "mediaType" | "preferredUsername" | "inbox" | "outbox" | "followers"
        | "following" | "liked" | "href" | "hreflang" | "totalItems" | "startIndex"
        | "manuallyApprovesFollowers" | "sensitive" | "publicKeyPem" | "owner"
        | "sharedInbox" | "deleted" | "formerType" => Functional,
        "to" | "cc" | "bto" | "bcc" | "audience" | "tag" | "attachment" | "items"
        | "orderedItems" => Ordered,
        "publicKey" | "endpoints" => Embedded,
        "rel" => Terms,
        "contentMap" | "nameMap" | "summaryMap" => LanguageMap,
        "actor" | "object" | "target" | "origin" | "result" | "instrument" | "inReplyTo"
        | "attributedTo" | "url" | "icon" | "image" | "generator" | "context" | "location"
        | "preview" | "replies" | "first" | "last" | "next" | "prev" | "partOf" | "current"
        | "describes" | "subject" | "relationship" => LinkOrObject,
        _ => return None,
    };
    Some(kind)
}

/// A single JSON scalar
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    String(String),
    Number(Number),
    Bool(bool),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Scalar::String(s) => Value::String(s.clone()),
            Scalar::Number(n) => Value::Number(n.clone()),
            Scalar::Bool(b) => Value::Bool(*b),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Scalar::Number(Number::from(value))
    }
}

/// Either a reference to an object by URI or the object itself.
///
/// Both forms of a link-or-object property normalize to this shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Link(String),
    Object(Box<VocabularyObject>),
}

impl Node {
    /// URI of the referenced object, if it has one
    pub fn id(&self) -> Option<&str> {
        match self {
            Node::Link(uri) => Some(uri),
            Node::Object(object) => object.id(),
        }
    }

    pub fn as_object(&self) -> Option<&VocabularyObject> {
        match self {
            Node::Object(object) => Some(object),
            Node::Link(_) => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Node::Link(uri) => Value::String(uri.clone()),
            Node::Object(object) => object.to_json(),
        }
    }
}

impl From<&str> for Node {
    fn from(uri: &str) -> Self {
        Node::Link(uri.to_string())
    }
}

impl From<String> for Node {
    fn from(uri: String) -> Self {
        Node::Link(uri)
    }
}

impl From<VocabularyObject> for Node {
    fn from(object: VocabularyObject) -> Self {
        Node::Object(Box::new(object))
    }
}

/// Value of a recognized property
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Functional(Scalar),
    Nodes(Vec<Node>),
    Embedded(Vec<VocabularyObject>),
    Terms(Vec<String>),
    LanguageMap(BTreeMap<String, String>),
}

/// Tagged, extensible Activity Streams record.
///
/// Equality is structural: property order in the source document does not
/// matter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VocabularyObject {
    context: Option<Value>,
    id: Option<String>,
    types: Vec<String>,
    properties: BTreeMap<String, Property>,
    extra: BTreeMap<String, Value>,
}

impl VocabularyObject {
    /// Create an empty object of the given type.
    pub fn new(kind: ObjectType) -> Self {
        Self {
            types: vec![kind.as_str().to_string()],
            ..Self::default()
        }
    }

    /// Parse a top-level document, enforcing required properties.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = Self::from_json_nested(value)?;
        if object.types.is_empty() {
            return Err(malformed("document has no `type`"));
        }
        object.validate()?;
        Ok(object)
    }

    /// Parse raw bytes as a top-level document.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::MalformedVocabulary(format!("invalid JSON: {}", e)))?;
        Self::from_json(&value)
    }

    /// Parse an embedded object. Only property shapes are checked; the
    /// object may be untyped.
    fn from_json_nested(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| malformed("expected a JSON object"))?;

        let mut object = VocabularyObject::default();

        for (name, value) in map {
            match name.as_str() {
                "@context" => object.context = Some(value.clone()),
                "id" | "@id" => {
                    let id = value
                        .as_str()
                        .ok_or_else(|| malformed("`id` must be a string"))?;
                    if object.id.as_deref().is_some_and(|seen| seen != id) {
                        return Err(malformed("`id` and `@id` disagree"));
                    }
                    object.id = Some(id.to_string());
                }
                "type" | "@type" => {
                    let types = parse_types(value)?;
                    if !object.types.is_empty() && object.types != types {
                        return Err(malformed("`type` and `@type` disagree"));
                    }
                    object.types = types;
                }
                _ => match property_kind(name) {
                    // A null recognized property means "absent".
                    Some(_) if value.is_null() => {}
                    Some(kind) => {
                        let property = parse_property(name, kind, value)?;
                        object.properties.insert(name.clone(), property);
                    }
                    None => {
                        object.extra.insert(name.clone(), value.clone());
                    }
                },
            }
        }

        Ok(object)
    }

    /// Serialize back to a JSON document.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();

        if let Some(context) = &self.context {
            map.insert("@context".to_string(), context.clone());
        }
        if let Some(id) = &self.id {
            map.insert("id".to_string(), Value::String(id.clone()));
        }
        match self.types.as_slice() {
            [] => {}
            [single] => {
                map.insert("type".to_string(), Value::String(single.clone()));
            }
            many => {
                map.insert(
                    "type".to_string(),
                    Value::Array(many.iter().cloned().map(Value::String).collect()),
                );
            }
        }

        for (name, property) in &self.properties {
            let value = match property {
                Property::Functional(scalar) => scalar.to_json(),
                Property::Nodes(nodes) => {
                    let always_array = property_kind(name) == Some(PropertyKind::Ordered);
                    match nodes.as_slice() {
                        [single] if !always_array => single.to_json(),
                        _ => Value::Array(nodes.iter().map(Node::to_json).collect()),
                    }
                }
                Property::Embedded(objects) => match objects.as_slice() {
                    [single] => single.to_json(),
                    _ => Value::Array(objects.iter().map(VocabularyObject::to_json).collect()),
                },
                Property::Terms(terms) => match terms.as_slice() {
                    [single] => Value::String(single.clone()),
                    _ => Value::Array(terms.iter().cloned().map(Value::String).collect()),
                },
                Property::LanguageMap(map) => Value::Object(
                    map.iter()
                        .map(|(tag, text)| (tag.clone(), Value::String(text.clone())))
                        .collect(),
                ),
            };
            map.insert(name.clone(), value);
        }

        for (name, value) in &self.extra {
            map.insert(name.clone(), value.clone());
        }

        Value::Object(map)
    }

    /// Check the properties required by the object's recognized type.
    pub fn validate(&self) -> Result<()> {
        let Some(kind) = self.kind() else {
            return Ok(());
        };

        if kind.is_actor() {
            if self.id.is_none() {
                return Err(malformed(format!("{} requires `id`", kind)));
            }
            self.require_str("inbox", &kind)?;
        }

        if kind.is_activity() {
            self.require_nodes("actor", &kind)?;
            if !kind.is_intransitive() {
                self.require_nodes("object", &kind)?;
            }
        }

        if kind.is_link() {
            self.require_str("href", &kind)?;
        }

        Ok(())
    }

    fn require_str(&self, name: &str, kind: &ObjectType) -> Result<()> {
        match self.get_str(name) {
            Some(value) if !value.is_empty() => Ok(()),
            _ => Err(malformed(format!("{} requires `{}`", kind, name))),
        }
    }

    fn require_nodes(&self, name: &str, kind: &ObjectType) -> Result<()> {
        if self.nodes(name).is_empty() {
            Err(malformed(format!("{} requires `{}`", kind, name)))
        } else {
            Ok(())
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.set_id(id);
        self
    }

    pub fn context(&self) -> Option<&Value> {
        self.context.as_ref()
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Raw type tags in document order
    pub fn types(&self) -> &[String] {
        &self.types
    }

    /// The first recognized type tag, or the first tag if none is recognized.
    pub fn kind(&self) -> Option<ObjectType> {
        self.types
            .iter()
            .map(|name| ObjectType::from_name(name))
            .find(ObjectType::is_recognized)
            .or_else(|| self.types.first().map(|name| ObjectType::from_name(name)))
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.properties.get(name) {
            Some(Property::Functional(scalar)) => scalar.as_str(),
            _ => None,
        }
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.properties.get(name) {
            Some(Property::Functional(Scalar::Number(n))) => n.as_u64(),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.properties.get(name) {
            Some(Property::Functional(Scalar::Bool(b))) => Some(*b),
            _ => None,
        }
    }

    /// Parse a date-time property such as `published`. Values that are not
    /// RFC 3339 timestamps read as absent.
    pub fn get_datetime(&self, name: &str) -> Option<DateTime<Utc>> {
        let raw = self.get_str(name)?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|parsed| parsed.with_timezone(&Utc))
    }

    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.get_datetime("published")
    }

    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.get_datetime("updated")
    }

    /// Values of a multi-valued string property such as `rel`.
    pub fn terms(&self, name: &str) -> &[String] {
        match self.properties.get(name) {
            Some(Property::Terms(terms)) => terms,
            _ => &[],
        }
    }

    /// Language map property such as `contentMap`
    pub fn language_map(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        match self.properties.get(name) {
            Some(Property::LanguageMap(map)) => Some(map),
            _ => None,
        }
    }

    /// Text of a natural-language property (`content`, `name`, `summary`)
    /// in the given language.
    ///
    /// Looks in the matching `...Map` first, comparing tags without regard
    /// to case, then falls back to the plain property.
    pub fn localized(&self, name: &str, language: &str) -> Option<&str> {
        let from_map = self
            .language_map(&format!("{}Map", name))
            .and_then(|map| {
                map.iter()
                    .find(|(tag, _)| tag.eq_ignore_ascii_case(language))
                    .map(|(_, text)| text.as_str())
            });
        from_map.or_else(|| self.get_str(name))
    }

    /// Values of a link-or-object or ordered property; empty when absent.
    pub fn nodes(&self, name: &str) -> &[Node] {
        match self.properties.get(name) {
            Some(Property::Nodes(nodes)) => nodes,
            _ => &[],
        }
    }

    pub fn first_node(&self, name: &str) -> Option<&Node> {
        self.nodes(name).first()
    }

    /// Values of an embedded-object property; empty when absent.
    pub fn embedded(&self, name: &str) -> &[VocabularyObject] {
        match self.properties.get(name) {
            Some(Property::Embedded(objects)) => objects,
            _ => &[],
        }
    }

    /// Properties this model does not recognize, kept verbatim
    pub fn extra(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    pub fn set(&mut self, name: impl Into<String>, property: Property) {
        self.properties.insert(name.into(), property);
    }

    pub fn set_scalar(&mut self, name: impl Into<String>, value: impl Into<Scalar>) {
        self.set(name, Property::Functional(value.into()));
    }

    pub fn set_nodes<N: Into<Node>>(
        &mut self,
        name: impl Into<String>,
        nodes: impl IntoIterator<Item = N>,
    ) {
        self.set(
            name,
            Property::Nodes(nodes.into_iter().map(Into::into).collect()),
        );
    }

    pub fn set_node(&mut self, name: impl Into<String>, node: impl Into<Node>) {
        self.set(name, Property::Nodes(vec![node.into()]));
    }

    pub fn set_embedded(&mut self, name: impl Into<String>, object: VocabularyObject) {
        self.set(name, Property::Embedded(vec![object]));
    }

    pub fn set_language_map<K, V>(
        &mut self,
        name: impl Into<String>,
        entries: impl IntoIterator<Item = (K, V)>,
    ) where
        K: Into<String>,
        V: Into<String>,
    {
        self.set(
            name,
            Property::LanguageMap(
                entries
                    .into_iter()
                    .map(|(tag, text)| (tag.into(), text.into()))
                    .collect(),
            ),
        );
    }

    pub fn set_extra(&mut self, name: impl Into<String>, value: Value) {
        self.extra.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Property> {
        self.properties.remove(name)
    }

    /// Builder-style `set_scalar`
    pub fn with(mut self, name: &str, value: impl Into<Scalar>) -> Self {
        self.set_scalar(name, value);
        self
    }

    /// Builder-style `set_node`
    pub fn with_node(mut self, name: &str, node: impl Into<Node>) -> Self {
        self.set_node(name, node);
        self
    }

    /// Builder-style `set_nodes`
    pub fn with_nodes<N: Into<Node>>(mut self, name: &str, nodes: impl IntoIterator<Item = N>) -> Self {
        self.set_nodes(name, nodes);
        self
    }
}

fn malformed(message: impl Into<String>) -> AppError {
    AppError::MalformedVocabulary(message.into())
}

fn parse_types(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(name) => Ok(vec![name.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| malformed("`type` entries must be strings"))
            })
            .collect(),
        _ => Err(malformed("`type` must be a string or an array of strings")),
    }
}

fn parse_property(name: &str, kind: PropertyKind, value: &Value) -> Result<Property> {
    match kind {
        PropertyKind::Functional => {
            let scalar = match value {
                Value::String(s) => Scalar::String(s.clone()),
                Value::Number(n) => Scalar::Number(n.clone()),
                Value::Bool(b) => Scalar::Bool(*b),
                _ => return Err(malformed(format!("`{}` must be a single scalar value", name))),
            };
            Ok(Property::Functional(scalar))
        }
        PropertyKind::Ordered | PropertyKind::LinkOrObject => {
            let nodes = one_or_many(value)
                .into_iter()
                .map(|item| parse_node(name, item))
                .collect::<Result<Vec<_>>>()?;
            Ok(Property::Nodes(nodes))
        }
        PropertyKind::Embedded => {
            let objects = one_or_many(value)
                .into_iter()
                .map(|item| {
                    if !item.is_object() {
                        return Err(malformed(format!("`{}` must hold inline objects", name)));
                    }
                    VocabularyObject::from_json_nested(item)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Property::Embedded(objects))
        }
        PropertyKind::Terms => {
            let terms = one_or_many(value)
                .into_iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| malformed(format!("`{}` must hold strings", name)))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Property::Terms(terms))
        }
        PropertyKind::LanguageMap => {
            let entries = value
                .as_object()
                .ok_or_else(|| malformed(format!("`{}` must map language tags to strings", name)))?;
            let map = entries
                .iter()
                .map(|(tag, text)| {
                    text.as_str()
                        .map(|text| (tag.clone(), text.to_string()))
                        .ok_or_else(|| malformed(format!("`{}` values must be strings", name)))
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok(Property::LanguageMap(map))
        }
    }
}

fn parse_node(name: &str, value: &Value) -> Result<Node> {
    match value {
        Value::String(uri) => Ok(Node::Link(uri.clone())),
        Value::Object(_) => Ok(Node::Object(Box::new(
            VocabularyObject::from_json_nested(value)?,
        ))),
        _ => Err(malformed(format!(
            "`{}` must hold URI references or objects",
            name
        ))),
    }
}

fn one_or_many(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    }
}

impl Serialize for VocabularyObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VocabularyObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        VocabularyObject::from_json(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn link_and_inline_object_normalize_to_nodes() {
        let by_reference = VocabularyObject::from_json(&json!({
            "type": "Like",
            "id": "https://a.example/likes/1",
            "actor": "https://a.example/users/alice",
            "object": "https://b.example/notes/1"
        }))
        .expect("valid like");
        let inline = VocabularyObject::from_json(&json!({
            "type": "Like",
            "id": "https://a.example/likes/2",
            "actor": {"id": "https://a.example/users/alice", "type": "Person", "inbox": "https://a.example/inbox"},
            "object": {"id": "https://b.example/notes/1", "type": "Note"}
        }))
        .expect("valid like");

        assert_eq!(
            by_reference.first_node("object").and_then(Node::id),
            Some("https://b.example/notes/1")
        );
        assert_eq!(
            inline.first_node("object").and_then(Node::id),
            Some("https://b.example/notes/1")
        );
        assert!(matches!(inline.first_node("object"), Some(Node::Object(_))));
    }

    #[test]
    fn unknown_properties_round_trip_verbatim() {
        let document = json!({
            "@context": ["https://www.w3.org/ns/activitystreams", {"toot": "http://joinmastodon.org/ns#"}],
            "type": "Note",
            "id": "https://a.example/notes/1",
            "content": "hello",
            "contentMap": {"en": "hello"},
            "toot:discoverable": true,
            "to": ["https://www.w3.org/ns/activitystreams#Public"]
        });

        let object = VocabularyObject::from_json(&document).expect("valid note");
        assert_eq!(object.extra()["toot:discoverable"], json!(true));
        assert_eq!(object.to_json(), document);
    }

    #[test]
    fn round_trip_is_equal_regardless_of_property_order() {
        let first = VocabularyObject::from_slice(
            br#"{"type":"Note","id":"https://a.example/n/1","content":"x","cc":"https://a.example/f"}"#,
        )
        .expect("parse");
        let second = VocabularyObject::from_slice(
            br#"{"cc":["https://a.example/f"],"content":"x","id":"https://a.example/n/1","type":"Note"}"#,
        )
        .expect("parse");

        assert_eq!(first, second);
        assert_eq!(
            VocabularyObject::from_json(&first.to_json()).expect("reparse"),
            first
        );
    }

    #[test]
    fn ordered_properties_serialize_as_arrays() {
        let object = VocabularyObject::new(ObjectType::Note)
            .with_node("to", "https://a.example/users/bob")
            .with_node("attributedTo", "https://a.example/users/alice");
        let json = object.to_json();
        assert_eq!(json["to"], json!(["https://a.example/users/bob"]));
        assert_eq!(json["attributedTo"], json!("https://a.example/users/alice"));
    }

    #[test]
    fn missing_required_activity_property_is_malformed() {
        let result = VocabularyObject::from_json(&json!({
            "type": "Follow",
            "id": "https://a.example/follows/1",
            "actor": "https://a.example/users/alice"
        }));
        match result {
            Err(AppError::MalformedVocabulary(msg)) => assert!(msg.contains("object")),
            other => panic!("expected malformed vocabulary, got: {other:?}"),
        }
    }

    #[test]
    fn intransitive_activity_needs_no_object() {
        let result = VocabularyObject::from_json(&json!({
            "type": "Arrive",
            "actor": "https://a.example/users/alice",
            "location": "https://a.example/places/home"
        }));
        assert!(result.is_ok());
    }

    #[test]
    fn wrong_shape_is_malformed() {
        let result = VocabularyObject::from_json(&json!({
            "type": "Note",
            "content": ["a", "b"]
        }));
        assert!(matches!(result, Err(AppError::MalformedVocabulary(_))));

        let result = VocabularyObject::from_json(&json!({
            "type": "Person",
            "id": "https://a.example/users/alice",
            "inbox": "https://a.example/users/alice/inbox",
            "publicKey": "https://a.example/users/alice#main-key"
        }));
        assert!(matches!(result, Err(AppError::MalformedVocabulary(_))));
    }

    #[test]
    fn actor_without_inbox_is_malformed() {
        let result = VocabularyObject::from_json(&json!({
            "type": "Person",
            "id": "https://a.example/users/alice"
        }));
        assert!(matches!(result, Err(AppError::MalformedVocabulary(_))));
    }

    #[test]
    fn unknown_type_is_accepted_opaquely() {
        let object = VocabularyObject::from_json(&json!({
            "type": "EmojiReact",
            "id": "https://m.example/reactions/1",
            "actor": "https://m.example/users/carol",
            "object": "https://a.example/notes/1",
            "content": ":blobcat:"
        }))
        .expect("unknown types are accepted");
        assert_eq!(
            object.kind(),
            Some(ObjectType::Other("EmojiReact".to_string()))
        );
    }

    #[test]
    fn multiple_type_tags_pick_first_recognized() {
        let object = VocabularyObject::from_json(&json!({
            "type": ["schema:Thing", "Note"],
            "id": "https://a.example/notes/1"
        }))
        .expect("parse");
        assert_eq!(object.kind(), Some(ObjectType::Note));
        assert_eq!(object.types().len(), 2);
    }

    #[test]
    fn null_recognized_property_is_absent() {
        let object = VocabularyObject::from_json(&json!({
            "type": "Note",
            "inReplyTo": null
        }))
        .expect("parse");
        assert!(object.get("inReplyTo").is_none());
    }

    #[test]
    fn document_without_type_is_malformed() {
        let result = VocabularyObject::from_json(&json!({"id": "https://a.example/x"}));
        assert!(matches!(result, Err(AppError::MalformedVocabulary(_))));
    }

    #[test]
    fn conflicting_id_aliases_are_malformed() {
        let result = VocabularyObject::from_json(&json!({
            "type": "Note",
            "id": "https://a.example/notes/1",
            "@id": "https://evil.example/notes/1"
        }));
        assert!(matches!(result, Err(AppError::MalformedVocabulary(_))));

        let result = VocabularyObject::from_json(&json!({
            "type": "Note",
            "@type": "Tombstone",
            "id": "https://a.example/notes/1"
        }));
        assert!(matches!(result, Err(AppError::MalformedVocabulary(_))));
    }

    #[test]
    fn agreeing_id_aliases_are_accepted() {
        let object = VocabularyObject::from_json(&json!({
            "type": "Note",
            "@type": "Note",
            "id": "https://a.example/notes/1",
            "@id": "https://a.example/notes/1"
        }))
        .expect("same values under both spellings");
        assert_eq!(object.id(), Some("https://a.example/notes/1"));
        assert_eq!(object.kind(), Some(ObjectType::Note));
    }

    #[test]
    fn link_rel_accepts_several_values() {
        let mention = VocabularyObject::from_json(&json!({
            "type": "Link",
            "href": "https://a.example/notes/1",
            "rel": ["canonical", "alternate"],
            "mediaType": "text/html"
        }))
        .expect("valid link");
        assert_eq!(mention.terms("rel"), ["canonical", "alternate"]);

        let single = VocabularyObject::from_json(&json!({
            "type": "Link",
            "href": "https://a.example/notes/1",
            "rel": "canonical"
        }))
        .expect("valid link");
        assert_eq!(single.terms("rel"), ["canonical"]);
        assert_eq!(single.to_json()["rel"], json!("canonical"));

        let result = VocabularyObject::from_json(&json!({
            "type": "Link",
            "href": "https://a.example/notes/1",
            "rel": [{"id": "https://a.example/rel"}]
        }));
        assert!(matches!(result, Err(AppError::MalformedVocabulary(_))));
    }

    #[test]
    fn language_maps_pick_the_requested_language() {
        let note = VocabularyObject::from_json(&json!({
            "type": "Note",
            "id": "https://a.example/notes/1",
            "content": "hello",
            "contentMap": {"en": "hello", "ja": "こんにちは"},
            "nameMap": {"fr": "bonjour"}
        }))
        .expect("valid note");

        assert_eq!(note.localized("content", "ja"), Some("こんにちは"));
        assert_eq!(note.localized("content", "EN"), Some("hello"));
        // Falls back to the plain property.
        assert_eq!(note.localized("content", "de"), Some("hello"));
        assert_eq!(note.localized("name", "fr"), Some("bonjour"));
        assert_eq!(note.localized("summary", "fr"), None);
        assert_eq!(
            note.language_map("contentMap").map(BTreeMap::len),
            Some(2)
        );

        let result = VocabularyObject::from_json(&json!({
            "type": "Note",
            "contentMap": {"en": 1}
        }));
        assert!(matches!(result, Err(AppError::MalformedVocabulary(_))));
    }

    #[test]
    fn language_map_serializes_as_an_object() {
        let mut note = VocabularyObject::new(ObjectType::Note);
        note.set_language_map("summaryMap", [("en", "cw"), ("de", "inhaltswarnung")]);
        assert_eq!(
            note.to_json()["summaryMap"],
            json!({"de": "inhaltswarnung", "en": "cw"})
        );
    }

    #[test]
    fn timestamps_parse_to_utc() {
        let note = VocabularyObject::from_json(&json!({
            "type": "Note",
            "published": "2024-03-01T12:00:00+09:00",
            "updated": "yesterday"
        }))
        .expect("valid note");

        let published = note.published().expect("published");
        assert_eq!(published.to_rfc3339(), "2024-03-01T03:00:00+00:00");
        assert_eq!(note.updated(), None);
        assert_eq!(note.get_str("updated"), Some("yesterday"));
    }
}
