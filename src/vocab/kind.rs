//! Activity Vocabulary type tags

use std::fmt;

macro_rules! object_types {
    ($($variant:ident),+ $(,)?) => {
        /// A recognized Activity Vocabulary type, or an opaque extension type.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum ObjectType {
            $($variant,)+
            /// Any type outside the core and extended vocabulary
            Other(String),
        }

        impl ObjectType {
            /// Parse a type tag. Compact IRIs (`as:Note`) and full IRIs
            /// in the ActivityStreams namespace are accepted.
            pub fn from_name(name: &str) -> Self {
                let local = name
                    .strip_prefix("as:")
                    .or_else(|| name.strip_prefix("https://www.w3.org/ns/activitystreams#"))
                    .unwrap_or(name);
                match local {
                    $(stringify!($variant) => ObjectType::$variant,)+
                    _ => ObjectType::Other(name.to_string()),
                }
            }

            pub fn as_str(&self) -> &str {
                match self {
                    $(ObjectType::$variant => stringify!($variant),)+
                    ObjectType::Other(name) => name,
                }
            }
        }
    };
}

object_types! {
    // Objects
    Object, Note, Article, Document, Image, Video, Audio, Page, Event, Place,
    Profile, Relationship, Tombstone, Question,
    // Links
    Link, Mention,
    // Collections
    Collection, OrderedCollection, CollectionPage, OrderedCollectionPage,
    // Actors
    Application, Group, Organization, Person, Service,
    // Activities
    Activity, IntransitiveActivity, Accept, Add, Announce, Arrive, Block, Create,
    Delete, Dislike, Flag, Follow, Ignore, Invite, Join, Leave, Like, Listen, Move,
    Offer, Read, Reject, Remove, TentativeAccept, TentativeReject, Travel, Undo,
    Update, View,
}

impl ObjectType {
    pub fn is_recognized(&self) -> bool {
        !matches!(self, ObjectType::Other(_))
    }

    pub fn is_actor(&self) -> bool {
        matches!(
            self,
            ObjectType::Application
                | ObjectType::Group
                | ObjectType::Organization
                | ObjectType::Person
                | ObjectType::Service
        )
    }

    pub fn is_link(&self) -> bool {
        matches!(self, ObjectType::Link | ObjectType::Mention)
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            ObjectType::Collection
                | ObjectType::OrderedCollection
                | ObjectType::CollectionPage
                | ObjectType::OrderedCollectionPage
        )
    }

    /// Activities without an `object` (Arrive, Travel, IntransitiveActivity).
    pub fn is_intransitive(&self) -> bool {
        matches!(
            self,
            ObjectType::IntransitiveActivity | ObjectType::Arrive | ObjectType::Travel
        )
    }

    /// Question is an intransitive activity in the vocabulary, but in
    /// practice it is delivered as a poll object, so it is not listed here.
    pub fn is_activity(&self) -> bool {
        self.is_intransitive()
            || matches!(
                self,
                ObjectType::Activity
                    | ObjectType::Accept
                    | ObjectType::Add
                    | ObjectType::Announce
                    | ObjectType::Block
                    | ObjectType::Create
                    | ObjectType::Delete
                    | ObjectType::Dislike
                    | ObjectType::Flag
                    | ObjectType::Follow
                    | ObjectType::Ignore
                    | ObjectType::Invite
                    | ObjectType::Join
                    | ObjectType::Leave
                    | ObjectType::Like
                    | ObjectType::Listen
                    | ObjectType::Move
                    | ObjectType::Offer
                    | ObjectType::Read
                    | ObjectType::Reject
                    | ObjectType::Remove
                    | ObjectType::TentativeAccept
                    | ObjectType::TentativeReject
                    | ObjectType::Undo
                    | ObjectType::Update
                    | ObjectType::View
            )
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
