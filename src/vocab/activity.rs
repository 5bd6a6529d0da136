//! Activity view over a vocabulary document

use super::kind::ObjectType;
use super::object::{Node, VocabularyObject};
use super::{PUBLIC_COLLECTION, is_public_collection};
use crate::error::{AppError, Result};

/// Addressing properties, in the order recipients are collected
const ADDRESSING: [&str; 5] = ["to", "cc", "bto", "bcc", "audience"];

/// A validated activity
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    kind: ObjectType,
    document: VocabularyObject,
}

impl Activity {
    /// Build a view from a parsed document.
    ///
    /// Recognized activity types and unrecognized extension types carrying
    /// an `actor` are accepted. Recognized non-activity types are not.
    pub fn from_object(document: VocabularyObject) -> Result<Self> {
        let kind = document
            .kind()
            .ok_or_else(|| AppError::MalformedVocabulary("activity has no `type`".to_string()))?;

        let accepted = kind.is_activity() || (!kind.is_recognized() && document.first_node("actor").is_some());
        if !accepted {
            return Err(AppError::MalformedVocabulary(format!(
                "expected an activity, got {}",
                kind
            )));
        }
        document.validate()?;

        Ok(Self { kind, document })
    }

    pub fn id(&self) -> Option<&str> {
        self.document.id()
    }

    pub fn kind(&self) -> &ObjectType {
        &self.kind
    }

    /// URI of the performing actor
    pub fn actor_id(&self) -> Option<&str> {
        self.document.first_node("actor").and_then(Node::id)
    }

    pub fn object(&self) -> Option<&Node> {
        self.document.first_node("object")
    }

    pub fn object_id(&self) -> Option<&str> {
        self.object().and_then(Node::id)
    }

    pub fn target_id(&self) -> Option<&str> {
        self.document.first_node("target").and_then(Node::id)
    }

    /// Every addressed URI, deduplicated, in addressing order.
    ///
    /// The public collection is included when addressed; callers decide
    /// whether to skip it.
    pub fn recipients(&self) -> Vec<String> {
        let mut recipients: Vec<String> = Vec::new();
        for property in ADDRESSING {
            for uri in self.document.nodes(property).iter().filter_map(Node::id) {
                if !recipients.iter().any(|existing| existing == uri) {
                    recipients.push(uri.to_string());
                }
            }
        }
        recipients
    }

    /// Whether the activity is addressed to the public collection
    pub fn is_public(&self) -> bool {
        ADDRESSING.iter().any(|property| {
            self.document
                .nodes(property)
                .iter()
                .filter_map(Node::id)
                .any(is_public_collection)
        })
    }

    /// Copy of the document with blind recipients removed, as sent on the wire.
    pub fn without_blind_recipients(&self) -> VocabularyObject {
        let mut document = self.document.clone();
        document.remove("bto");
        document.remove("bcc");
        document
    }

    pub fn as_object(&self) -> &VocabularyObject {
        &self.document
    }

    pub fn into_object(self) -> VocabularyObject {
        self.document
    }
}

impl TryFrom<VocabularyObject> for Activity {
    type Error = AppError;

    fn try_from(document: VocabularyObject) -> Result<Self> {
        Activity::from_object(document)
    }
}

/// Visibility presets for addressing, matching the common fediverse scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Unlisted,
    FollowersOnly,
    Direct,
}

/// Build `(to, cc)` for a visibility scope.
pub fn audience_for_visibility(actor_uri: &str, visibility: Visibility) -> (Vec<String>, Vec<String>) {
    let public_audience = PUBLIC_COLLECTION.to_string();
    let followers_audience = format!("{}/followers", actor_uri);

    match visibility {
        Visibility::Public => (vec![public_audience], vec![followers_audience]),
        Visibility::Unlisted => (vec![followers_audience], vec![public_audience]),
        Visibility::FollowersOnly => (vec![followers_audience], Vec::new()),
        Visibility::Direct => (Vec::new(), Vec::new()),
    }
}
