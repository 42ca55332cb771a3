use std::sync::Arc;

use feed_core::{
    DisplayState, EventStream, FeedError, FeedEvent, ListSnapshot, ListSynchronizer, NotificationId,
    PageOutcome, PageRequest, StatusFilter,
};
use tokio::{
    sync::{Mutex, broadcast::error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{api::NotificationApi, connection::ConnectionHandle};

/// Drives a [`ListSynchronizer`] against a [`NotificationApi`].
///
/// The synchronizer lock is never held across an API call, so pushes and
/// other requests are merged while a page or mutation is in flight. A page
/// future dropped before it completes releases its loading flag.
pub struct NotificationFeed<A> {
    api: A,
    list: Mutex<ListSynchronizer>,
    connection: Option<ConnectionHandle>,
}

impl<A: NotificationApi + 'static> NotificationFeed<A> {
    pub fn new(api: A, page_size: u16) -> Self {
        Self {
            api,
            list: Mutex::new(ListSynchronizer::new(page_size)),
            connection: None,
        }
    }

    /// Ask `connection` for fresh stats after every confirmed mutation.
    pub fn with_connection(mut self, connection: ConnectionHandle) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub async fn snapshot(&self) -> ListSnapshot {
        self.list.lock().await.snapshot()
    }

    pub async fn display_state(&self) -> DisplayState {
        self.list.lock().await.display_state()
    }

    /// Reload the first page for the current filter and search.
    pub async fn load_first_page(&self) -> PageOutcome {
        let request = self.list.lock().await.load_first_page();
        self.fetch(request).await
    }

    /// Load the next page; `None` when a load is in flight or nothing is left.
    pub async fn load_next_page(&self) -> Option<PageOutcome> {
        let request = self.list.lock().await.load_next_page()?;
        Some(self.fetch(request).await)
    }

    pub async fn set_filter(&self, filter: StatusFilter) -> Option<PageOutcome> {
        let request = self.list.lock().await.set_filter(filter)?;
        Some(self.fetch(request).await)
    }

    pub async fn set_search(&self, search: impl Into<String>) -> Option<PageOutcome> {
        let request = self.list.lock().await.set_search(search)?;
        Some(self.fetch(request).await)
    }

    /// Clear the list and load the first page again.
    pub async fn refresh(&self) -> PageOutcome {
        let request = self.list.lock().await.reset();
        self.fetch(request).await
    }

    /// Mark one notification read; the list changes only once the API
    /// confirmed. Entries already shown as read are left alone.
    pub async fn mark_as_read(&self, id: &NotificationId) -> Result<(), FeedError> {
        if self
            .list
            .lock()
            .await
            .find(id)
            .is_some_and(|notification| notification.is_read)
        {
            debug!(%id, "already read, skipping");
            return Ok(());
        }
        self.api.mark_read(id).await.inspect_err(|err| {
            warn!(%id, error = %err, "mark read failed");
        })?;
        self.list.lock().await.confirm_read(id);
        self.after_mutation().await;
        Ok(())
    }

    pub async fn bulk_mark_as_read(&self, ids: &[NotificationId]) -> Result<(), FeedError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.api.bulk_mark_read(ids).await.inspect_err(|err| {
            warn!(count = ids.len(), error = %err, "bulk mark read failed");
        })?;
        let changed = self.list.lock().await.confirm_bulk_read(ids);
        debug!(requested = ids.len(), changed, "bulk mark read confirmed");
        self.after_mutation().await;
        Ok(())
    }

    pub async fn bulk_delete(&self, ids: &[NotificationId]) -> Result<(), FeedError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.api.bulk_delete(ids).await.inspect_err(|err| {
            warn!(count = ids.len(), error = %err, "bulk delete failed");
        })?;
        let removed = self.list.lock().await.confirm_bulk_delete(ids);
        debug!(requested = ids.len(), removed, "bulk delete confirmed");
        self.after_mutation().await;
        Ok(())
    }

    /// Seed demo data on the server, then reload the list.
    pub async fn generate_mock_data(&self, count: u32) -> Result<PageOutcome, FeedError> {
        self.api.generate_mock_data(count).await.inspect_err(|err| {
            warn!(count, error = %err, "mock data generation failed");
        })?;
        let outcome = self.refresh().await;
        self.after_mutation().await;
        Ok(outcome)
    }

    /// Apply one live event. Returns `true` when the list changed.
    pub async fn ingest_event(&self, event: &FeedEvent) -> bool {
        match event {
            FeedEvent::NotificationPushed(notification) => {
                let inserted = self.list.lock().await.ingest_pushed(notification.clone());
                if !inserted {
                    debug!(id = %notification.id, "ignoring duplicate push");
                }
                inserted
            }
            _ => false,
        }
    }

    /// Feed pushed notifications from `events` into the list until the stream
    /// closes.
    ///
    /// If the subscriber lags behind and pushes were lost, the first page is
    /// reloaded to catch up.
    pub fn spawn_push_ingest(self: &Arc<Self>, mut events: EventStream) -> JoinHandle<()> {
        let feed = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        feed.ingest_event(&event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "push ingest lagged, reloading first page");
                        feed.load_first_page().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn fetch(&self, request: PageRequest) -> PageOutcome {
        let mut in_flight = InFlight {
            list: &self.list,
            request: Some(&request),
        };
        let result = self.api.list_notifications(&request.query).await;
        if let Err(err) = &result {
            warn!(page = request.query.page, error = %err, "page fetch failed");
        }

        let mut list = self.list.lock().await;
        in_flight.request = None;
        let outcome = list.apply_page(&request, result);
        drop(list);
        if outcome == PageOutcome::Stale {
            debug!(
                generation = request.generation,
                page = request.query.page,
                "discarding stale page"
            );
        }
        outcome
    }

    async fn after_mutation(&self) {
        if let Some(connection) = &self.connection
            && let Err(err) = connection.refresh_stats().await
        {
            debug!(error = %err, "stats refresh skipped");
        }
    }
}

/// Releases the loading flag of a page request whose future was dropped
/// before its response was applied.
struct InFlight<'a> {
    list: &'a Mutex<ListSynchronizer>,
    request: Option<&'a PageRequest>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let Some(request) = self.request.take() else {
            return;
        };
        match self.list.try_lock() {
            Ok(mut list) => {
                if list.abandon(request) {
                    debug!(page = request.query.page, "page request dropped before completion");
                }
            }
            Err(_) => warn!(
                page = request.query.page,
                "page request dropped while the list was busy; loading flag kept"
            ),
        }
    }
}
