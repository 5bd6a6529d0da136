//! Application-side publication of local actors and their outboxes

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::vocab::collection::{collection_page, ordered_collection, paged_collection};
use crate::vocab::{Page, VocabularyObject};

/// Supplies local actor documents and outbox contents to the HTTP layer.
///
/// Cursor methods default to `None`, which serves the outbox as a single
/// unpaged collection built from `dispatch_outbox(handle, None)`.
#[async_trait]
pub trait ActorDispatcher: Send + Sync {
    /// Actor document for a local handle, or `None` if unknown.
    async fn dispatch_actor(&self, handle: &str) -> Result<Option<VocabularyObject>>;

    /// Outbox items starting at `cursor`, or `None` if the handle is unknown.
    async fn dispatch_outbox(
        &self,
        handle: &str,
        cursor: Option<&str>,
    ) -> Result<Option<Page<VocabularyObject>>>;

    async fn outbox_first_cursor(&self, _handle: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn outbox_last_cursor(&self, _handle: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn count_outbox(&self, _handle: &str) -> Result<Option<u64>> {
        Ok(None)
    }
}

/// Render the outbox collection (no cursor) or one of its pages.
///
/// # Errors
/// `NotFound` if the dispatcher does not know the handle.
pub async fn outbox_document(
    dispatcher: &dyn ActorDispatcher,
    handle: &str,
    outbox_uri: &str,
    cursor: Option<&str>,
) -> Result<VocabularyObject> {
    if let Some(cursor) = cursor {
        let page = dispatcher
            .dispatch_outbox(handle, Some(cursor))
            .await?
            .ok_or(AppError::NotFound)?;
        return Ok(collection_page(outbox_uri, cursor, page));
    }

    let total = dispatcher.count_outbox(handle).await?;
    match dispatcher.outbox_first_cursor(handle).await? {
        Some(first) => {
            let last = dispatcher.outbox_last_cursor(handle).await?;
            Ok(paged_collection(outbox_uri, total, &first, last.as_deref()))
        }
        None => {
            let page = dispatcher
                .dispatch_outbox(handle, None)
                .await?
                .ok_or(AppError::NotFound)?;
            let total = total.or(Some(page.items.len() as u64));
            Ok(ordered_collection(outbox_uri, total, page.items))
        }
    }
}
