//! Actor view over a vocabulary document

use super::kind::ObjectType;
use super::object::VocabularyObject;
use crate::error::{AppError, Result};

/// Public key advertised by an actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Key identifier, usually `{actor}#main-key`
    pub id: String,
    /// Owning actor URI
    pub owner: String,
    /// SPKI PEM
    pub public_key_pem: String,
}

/// A validated actor document
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub id: String,
    pub kind: ObjectType,
    pub inbox: String,
    pub shared_inbox: Option<String>,
    pub outbox: Option<String>,
    pub preferred_username: Option<String>,
    pub public_keys: Vec<PublicKey>,
    document: VocabularyObject,
}

impl Actor {
    /// Build a view from a parsed document.
    ///
    /// # Errors
    /// `MalformedVocabulary` if the document is not an actor, lacks an
    /// id or inbox, or advertises an incomplete public key.
    pub fn from_object(document: VocabularyObject) -> Result<Self> {
        let kind = document
            .kind()
            .ok_or_else(|| AppError::MalformedVocabulary("actor has no `type`".to_string()))?;
        if !kind.is_actor() {
            return Err(AppError::MalformedVocabulary(format!(
                "expected an actor type, got {}",
                kind
            )));
        }
        document.validate()?;

        let id = document
            .id()
            .ok_or_else(|| AppError::MalformedVocabulary("actor requires `id`".to_string()))?
            .to_string();
        let inbox = document
            .get_str("inbox")
            .ok_or_else(|| AppError::MalformedVocabulary("actor requires `inbox`".to_string()))?
            .to_string();

        let shared_inbox = document
            .embedded("endpoints")
            .iter()
            .find_map(|endpoints| endpoints.get_str("sharedInbox"))
            .map(str::to_string);

        let public_keys = document
            .embedded("publicKey")
            .iter()
            .map(|key| {
                let key_id = key.id().ok_or_else(|| {
                    AppError::MalformedVocabulary("publicKey requires `id`".to_string())
                })?;
                let pem = key.get_str("publicKeyPem").ok_or_else(|| {
                    AppError::MalformedVocabulary("publicKey requires `publicKeyPem`".to_string())
                })?;
                Ok(PublicKey {
                    id: key_id.to_string(),
                    owner: key.get_str("owner").unwrap_or(&id).to_string(),
                    public_key_pem: pem.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            kind,
            inbox,
            shared_inbox,
            outbox: document.get_str("outbox").map(str::to_string),
            preferred_username: document.get_str("preferredUsername").map(str::to_string),
            public_keys,
            id,
            document,
        })
    }

    /// Find an advertised key by its identifier.
    pub fn public_key(&self, key_id: &str) -> Option<&PublicKey> {
        self.public_keys.iter().find(|key| key.id == key_id)
    }

    /// Inbox to deliver to, preferring the shared inbox when allowed.
    pub fn delivery_inbox(&self, use_shared_inbox: bool) -> &str {
        match (&self.shared_inbox, use_shared_inbox) {
            (Some(shared), true) => shared,
            _ => &self.inbox,
        }
    }

    pub fn as_object(&self) -> &VocabularyObject {
        &self.document
    }

    pub fn into_object(self) -> VocabularyObject {
        self.document
    }
}

impl TryFrom<VocabularyObject> for Actor {
    type Error = AppError;

    fn try_from(document: VocabularyObject) -> Result<Self> {
        Actor::from_object(document)
    }
}
