//! Activity Vocabulary model
//!
//! Typed, extensible representation of Activity Streams 2.0 documents:
//! - `VocabularyObject`: open-world record with recognized property shapes
//! - `Actor` / `Activity`: validated views used by the federation engine
//! - `builder` / `collection`: constructors for outgoing documents

pub mod activity;
pub mod actor;
pub mod builder;
pub mod collection;
pub mod kind;
pub mod object;

pub use activity::{Activity, Visibility, audience_for_visibility};
pub use actor::{Actor, PublicKey};
pub use collection::Page;
pub use kind::ObjectType;
pub use object::{Node, Property, PropertyKind, Scalar, VocabularyObject, property_kind};

pub const ACTIVITYSTREAMS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
pub const SECURITY_CONTEXT: &str = "https://w3id.org/security/v1";

/// Public addressing collection
pub const PUBLIC_COLLECTION: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Whether a URI names the public collection, in any of its spellings.
pub fn is_public_collection(uri: &str) -> bool {
    uri == PUBLIC_COLLECTION || uri == "as:Public" || uri == "Public"
}
