//! Builders for common activities and objects

use serde_json::{Value, json};

use super::activity::Activity;
use super::kind::ObjectType;
use super::object::{Node, VocabularyObject};
use super::{ACTIVITYSTREAMS_CONTEXT, SECURITY_CONTEXT};
use crate::error::Result;

/// Mint a fresh activity URI under `{base_url}/activities/`.
pub fn new_activity_id(base_url: &str) -> String {
    format!(
        "{}/activities/{}",
        base_url.trim_end_matches('/'),
        ulid::Ulid::new().to_string().to_lowercase()
    )
}

fn activity(kind: ObjectType, id: &str, actor: &str, object: impl Into<Node>) -> VocabularyObject {
    VocabularyObject::new(kind)
        .with_context(Value::String(ACTIVITYSTREAMS_CONTEXT.to_string()))
        .with_id(id)
        .with_node("actor", actor)
        .with_node("object", object)
}

fn addressed(mut object: VocabularyObject, to: &[String], cc: &[String]) -> VocabularyObject {
    object.set_nodes("to", to.iter().map(String::as_str));
    object.set_nodes("cc", cc.iter().map(String::as_str));
    object
}

/// Build a Follow activity
///
/// # Arguments
/// * `id` - Activity ID (unique URI)
/// * `actor` - Actor URI (follower)
/// * `object` - Object URI (followee)
pub fn follow(id: &str, actor: &str, object: &str) -> Result<Activity> {
    let mut follow = activity(ObjectType::Follow, id, actor, object);
    follow.set_nodes("to", [object]);
    Activity::from_object(follow)
}

/// Build an Accept activity
///
/// # Arguments
/// * `id` - Activity ID (unique URI)
/// * `actor` - Actor URI (accepter)
/// * `object` - Activity being accepted (usually a Follow)
pub fn accept(id: &str, actor: &str, object: &Activity) -> Result<Activity> {
    let mut accept = activity(ObjectType::Accept, id, actor, object.as_object().clone());
    if let Some(follower) = object.actor_id() {
        accept.set_nodes("to", [follower]);
    }
    Activity::from_object(accept)
}

/// Build a Reject activity.
pub fn reject(id: &str, actor: &str, object: &Activity) -> Result<Activity> {
    let mut reject = activity(ObjectType::Reject, id, actor, object.as_object().clone());
    if let Some(follower) = object.actor_id() {
        reject.set_nodes("to", [follower]);
    }
    Activity::from_object(reject)
}

/// Build a Create activity
///
/// Addressing is copied from the object so recipients of the activity and
/// of the created object agree.
pub fn create(id: &str, actor: &str, object: VocabularyObject) -> Result<Activity> {
    let to: Vec<Node> = object.nodes("to").to_vec();
    let cc: Vec<Node> = object.nodes("cc").to_vec();
    let published = object
        .get_str("published")
        .map(str::to_string)
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

    let mut create = activity(ObjectType::Create, id, actor, object)
        .with("published", published);
    create.set_nodes("to", to);
    create.set_nodes("cc", cc);
    Activity::from_object(create)
}

/// Build an Update activity for a changed object.
pub fn update(id: &str, actor: &str, object: VocabularyObject) -> Result<Activity> {
    let to: Vec<Node> = object.nodes("to").to_vec();
    let cc: Vec<Node> = object.nodes("cc").to_vec();

    let mut update = activity(ObjectType::Update, id, actor, object)
        .with("published", chrono::Utc::now().to_rfc3339());
    update.set_nodes("to", to);
    update.set_nodes("cc", cc);
    Activity::from_object(update)
}

/// Build a Delete activity carrying a Tombstone
///
/// # Arguments
/// * `id` - Activity ID (unique URI)
/// * `actor` - Actor URI (deleter)
/// * `object` - Object URI being deleted
pub fn delete(id: &str, actor: &str, object: &str, to: &[String], cc: &[String]) -> Result<Activity> {
    let tombstone = VocabularyObject::new(ObjectType::Tombstone).with_id(object);
    Activity::from_object(addressed(
        activity(ObjectType::Delete, id, actor, tombstone),
        to,
        cc,
    ))
}

/// Build a Like activity
pub fn like(id: &str, actor: &str, object: &str) -> Result<Activity> {
    Activity::from_object(activity(ObjectType::Like, id, actor, object))
}

/// Build an Announce activity (boost/reblog)
pub fn announce(id: &str, actor: &str, object: &str, to: &[String], cc: &[String]) -> Result<Activity> {
    let announce = activity(ObjectType::Announce, id, actor, object)
        .with("published", chrono::Utc::now().to_rfc3339());
    Activity::from_object(addressed(announce, to, cc))
}

/// Build an Undo activity
///
/// # Arguments
/// * `id` - Activity ID (unique URI)
/// * `actor` - Actor URI (undoer)
/// * `object` - Original activity being undone
pub fn undo(id: &str, actor: &str, object: &Activity) -> Result<Activity> {
    let mut undo = activity(ObjectType::Undo, id, actor, object.as_object().clone());
    undo.set_nodes("to", object.as_object().nodes("to").to_vec());
    undo.set_nodes("cc", object.as_object().nodes("cc").to_vec());
    Activity::from_object(undo)
}

/// Build a Note object
///
/// # Arguments
/// * `id` - Note ID (unique URI)
/// * `attributed_to` - Actor URI (author)
/// * `content` - HTML content
/// * `published` - Publication timestamp (RFC3339)
/// * `to` - Primary recipients
/// * `cc` - CC recipients
pub fn note(
    id: &str,
    attributed_to: &str,
    content: &str,
    published: &str,
    to: &[String],
    cc: &[String],
) -> VocabularyObject {
    let note = VocabularyObject::new(ObjectType::Note)
        .with_id(id)
        .with_node("attributedTo", attributed_to)
        .with("content", content)
        .with("published", published)
        .with("sensitive", false);
    addressed(note, to, cc)
}

/// Build a Note object replying to another object
pub fn note_reply(
    id: &str,
    attributed_to: &str,
    content: &str,
    published: &str,
    in_reply_to: &str,
    to: &[String],
    cc: &[String],
) -> VocabularyObject {
    note(id, attributed_to, content, published, to, cc).with_node("inReplyTo", in_reply_to)
}

/// Build a local actor document with one public key.
pub fn actor(
    kind: ObjectType,
    actor_uri: &str,
    handle: &str,
    name: &str,
    public_key_pem: &str,
    shared_inbox: Option<&str>,
) -> VocabularyObject {
    let public_key = VocabularyObject::default()
        .with_id(format!("{}#main-key", actor_uri))
        .with("owner", actor_uri)
        .with("publicKeyPem", public_key_pem);

    let mut actor = VocabularyObject::new(kind)
        .with_context(json!([ACTIVITYSTREAMS_CONTEXT, SECURITY_CONTEXT]))
        .with_id(actor_uri)
        .with("preferredUsername", handle)
        .with("name", name)
        .with("inbox", format!("{}/inbox", actor_uri))
        .with("outbox", format!("{}/outbox", actor_uri))
        .with("followers", format!("{}/followers", actor_uri))
        .with("following", format!("{}/following", actor_uri))
        .with_node("url", actor_uri);
    actor.set_embedded("publicKey", public_key);

    if let Some(shared_inbox) = shared_inbox {
        actor.set_embedded(
            "endpoints",
            VocabularyObject::default().with("sharedInbox", shared_inbox),
        );
    }

    actor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::{Actor, PUBLIC_COLLECTION, Visibility, audience_for_visibility};

    const ALICE: &str = "https://a.example/users/alice";
    const BOB: &str = "https://b.example/users/bob";

    #[test]
    fn follow_addresses_the_followee() {
        let follow = follow("https://a.example/activities/1", ALICE, BOB).expect("follow");
        assert_eq!(follow.kind(), &ObjectType::Follow);
        assert_eq!(follow.object_id(), Some(BOB));
        assert_eq!(follow.recipients(), vec![BOB.to_string()]);
    }

    #[test]
    fn accept_embeds_the_follow_and_addresses_the_follower() {
        let follow = follow("https://b.example/activities/9", BOB, ALICE).expect("follow");
        let accept = accept("https://a.example/activities/2", ALICE, &follow).expect("accept");
        assert!(matches!(accept.object(), Some(Node::Object(_))));
        assert_eq!(accept.object_id(), Some("https://b.example/activities/9"));
        assert_eq!(accept.recipients(), vec![BOB.to_string()]);
    }

    #[test]
    fn create_copies_note_addressing() {
        let (to, cc) = audience_for_visibility(ALICE, Visibility::Public);
        let note = note(
            "https://a.example/notes/1",
            ALICE,
            "<p>hello</p>",
            "2026-01-01T00:00:00Z",
            &to,
            &cc,
        );
        let create = create("https://a.example/activities/3", ALICE, note).expect("create");

        assert_eq!(create.actor_id(), Some(ALICE));
        assert!(create.is_public());
        assert_eq!(
            create.recipients(),
            vec![
                PUBLIC_COLLECTION.to_string(),
                format!("{}/followers", ALICE)
            ]
        );
        assert_eq!(
            create.as_object().get_str("published"),
            Some("2026-01-01T00:00:00Z")
        );
    }

    #[test]
    fn delete_wraps_a_tombstone() {
        let delete = delete(
            "https://a.example/activities/4",
            ALICE,
            "https://a.example/notes/1",
            &[PUBLIC_COLLECTION.to_string()],
            &[],
        )
        .expect("delete");
        let tombstone = delete.object().and_then(Node::as_object).expect("inline");
        assert_eq!(tombstone.kind(), Some(ObjectType::Tombstone));
    }

    #[test]
    fn actor_document_parses_back_into_an_actor() {
        let document = actor(
            ObjectType::Service,
            "https://a.example/users/relay",
            "relay",
            "Relay",
            "-----BEGIN PUBLIC KEY-----\n...\n-----END PUBLIC KEY-----",
            Some("https://a.example/inbox"),
        );
        let reparsed = VocabularyObject::from_json(&document.to_json()).expect("reparse");
        let actor = Actor::from_object(reparsed).expect("actor");
        assert_eq!(actor.shared_inbox.as_deref(), Some("https://a.example/inbox"));
        assert_eq!(actor.public_keys[0].id, "https://a.example/users/relay#main-key");
    }

    #[test]
    fn activity_ids_are_unique() {
        let first = new_activity_id("https://a.example/");
        let second = new_activity_id("https://a.example/");
        assert!(first.starts_with("https://a.example/activities/"));
        assert_ne!(first, second);
    }
}
