use std::collections::HashSet;

use crate::{
    error::FeedError,
    types::{
        DEFAULT_ORDERING, DEFAULT_PAGE_SIZE, ListQuery, Notification, NotificationId,
        NotificationPage, StatusFilter,
    },
};

/// Whether a page request replaces or extends the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// First page; replaces the list wholesale.
    First,
    /// Subsequent page; appended with duplicate IDs skipped.
    Next,
}

/// Page request issued by the synchronizer, tagged with its generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Filter/search epoch the request belongs to.
    pub generation: u64,
    /// First or next page.
    pub kind: PageKind,
    /// Query to send to the list endpoint.
    pub query: ListQuery,
}

/// Result of handing a page completion back to the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page was merged; `added` entries were inserted.
    Applied { added: usize },
    /// The request belonged to an older generation and was discarded.
    Stale,
    /// The request failed; the error is kept in `last_error`.
    Failed,
}

/// Coarse list state for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    /// Empty list while the first page is loading.
    Loading,
    /// Loaded, nothing matches.
    Empty,
    /// Empty list and the last load failed.
    EmptyWithError,
    /// At least one notification to show.
    Populated,
}

/// Cloneable view of the synchronizer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSnapshot {
    pub notifications: Vec<Notification>,
    pub page: u32,
    pub total_pages: u32,
    pub has_more: bool,
    pub filter: StatusFilter,
    pub search: String,
    pub is_loading_initial: bool,
    pub is_loading_more: bool,
    pub last_error: Option<FeedError>,
}

/// Canonical notification list merging fetched pages, pushes and confirmed
/// mutations.
///
/// Entries are unique by [`NotificationId`]. Fetched pages keep server order,
/// pushed notifications are inserted at the front, and nothing is re-sorted.
#[derive(Debug, Clone)]
pub struct ListSynchronizer {
    items: Vec<Notification>,
    ids: HashSet<NotificationId>,
    page: u32,
    total_pages: u32,
    has_more: bool,
    filter: StatusFilter,
    search: String,
    is_loading_initial: bool,
    is_loading_more: bool,
    last_error: Option<FeedError>,
    generation: u64,
    page_size: u16,
}

impl Default for ListSynchronizer {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl ListSynchronizer {
    /// Create an empty synchronizer with a page size (`page_size >= 1`).
    pub fn new(page_size: u16) -> Self {
        Self {
            items: Vec::new(),
            ids: HashSet::new(),
            page: 0,
            total_pages: 0,
            has_more: true,
            filter: StatusFilter::All,
            search: String::new(),
            is_loading_initial: false,
            is_loading_more: false,
            last_error: None,
            generation: 0,
            page_size: page_size.max(1),
        }
    }

    /// Current notifications in display order.
    pub fn notifications(&self) -> &[Notification] {
        &self.items
    }

    pub fn find(&self, id: &NotificationId) -> Option<&Notification> {
        self.items.iter().find(|n| &n.id == id)
    }

    pub fn filter(&self) -> StatusFilter {
        self.filter
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading_initial || self.is_loading_more
    }

    pub fn last_error(&self) -> Option<&FeedError> {
        self.last_error.as_ref()
    }

    pub fn display_state(&self) -> DisplayState {
        if !self.items.is_empty() {
            DisplayState::Populated
        } else if self.is_loading_initial {
            DisplayState::Loading
        } else if self.last_error.is_some() {
            DisplayState::EmptyWithError
        } else {
            DisplayState::Empty
        }
    }

    pub fn snapshot(&self) -> ListSnapshot {
        ListSnapshot {
            notifications: self.items.clone(),
            page: self.page,
            total_pages: self.total_pages,
            has_more: self.has_more,
            filter: self.filter,
            search: self.search.clone(),
            is_loading_initial: self.is_loading_initial,
            is_loading_more: self.is_loading_more,
            last_error: self.last_error.clone(),
        }
    }

    /// Change the read-state filter. Returns the fresh first-page request when
    /// the value actually changed.
    pub fn set_filter(&mut self, filter: StatusFilter) -> Option<PageRequest> {
        if self.filter == filter {
            return None;
        }
        self.filter = filter;
        Some(self.reset())
    }

    /// Change the search term. Returns the fresh first-page request when the
    /// value actually changed.
    pub fn set_search(&mut self, search: impl Into<String>) -> Option<PageRequest> {
        let search = search.into();
        if self.search == search {
            return None;
        }
        self.search = search;
        Some(self.reset())
    }

    /// Start a new generation with an empty list and request its first page.
    pub fn reset(&mut self) -> PageRequest {
        self.items.clear();
        self.ids.clear();
        self.page = 0;
        self.total_pages = 0;
        self.has_more = true;
        self.last_error = None;
        self.load_first_page()
    }

    /// Request the first page for a new generation, keeping the current list
    /// on screen until the response replaces it.
    pub fn load_first_page(&mut self) -> PageRequest {
        self.generation += 1;
        self.is_loading_initial = true;
        self.is_loading_more = false;
        self.request(PageKind::First, 1)
    }

    /// Request the next page, or `None` while a load is in flight or no more
    /// pages exist.
    pub fn load_next_page(&mut self) -> Option<PageRequest> {
        if self.is_loading() || !self.has_more {
            return None;
        }
        self.is_loading_more = true;
        Some(self.request(PageKind::Next, self.page.saturating_add(1)))
    }

    /// Merge the completion of `request` into the list.
    pub fn apply_page(
        &mut self,
        request: &PageRequest,
        result: Result<NotificationPage, FeedError>,
    ) -> PageOutcome {
        if request.generation != self.generation {
            return PageOutcome::Stale;
        }

        self.is_loading_initial = false;
        self.is_loading_more = false;

        let page = match result {
            Ok(page) => page,
            Err(err) => {
                self.last_error = Some(err);
                return PageOutcome::Failed;
            }
        };

        self.last_error = None;
        if request.kind == PageKind::First {
            self.items.clear();
            self.ids.clear();
        }

        let before = self.items.len();
        for notification in page.notifications.iter().cloned() {
            self.push_back_unique(notification);
        }

        self.page = page.page.unwrap_or(request.query.page);
        self.total_pages = page
            .total_pages
            .unwrap_or_else(|| total_pages_for(page.count.unwrap_or(0), request.query.limit));
        self.has_more = match (page.has_more, &page.next) {
            (Some(explicit), _) => explicit,
            (None, Some(next)) => next.is_some(),
            (None, None) => self.page < self.total_pages,
        };

        PageOutcome::Applied {
            added: self.items.len() - before,
        }
    }

    /// Insert a pushed notification at the front unless its ID is known.
    ///
    /// Pushed notifications are not matched against the active filter or search.
    pub fn ingest_pushed(&mut self, notification: Notification) -> bool {
        if !self.ids.insert(notification.id.clone()) {
            return false;
        }
        self.items.insert(0, notification);
        true
    }

    /// Forget an in-flight `request` whose completion will never be applied,
    /// so later loads are not blocked by its loading flag. Returns `false` for
    /// requests of an older generation.
    pub fn abandon(&mut self, request: &PageRequest) -> bool {
        if request.generation != self.generation {
            return false;
        }
        match request.kind {
            PageKind::First => self.is_loading_initial = false,
            PageKind::Next => self.is_loading_more = false,
        }
        true
    }

    /// Mark one notification read after the API confirmed it.
    pub fn confirm_read(&mut self, id: &NotificationId) -> bool {
        self.confirm_bulk_read(std::slice::from_ref(id)) > 0
    }

    /// Mark every listed notification read after the API confirmed it. IDs not
    /// in the list are ignored. Returns the number of entries that changed.
    pub fn confirm_bulk_read(&mut self, ids: &[NotificationId]) -> usize {
        let targets: HashSet<&NotificationId> = ids.iter().collect();
        let mut changed = 0;
        for item in self.items.iter_mut() {
            if !item.is_read && targets.contains(&item.id) {
                item.is_read = true;
                changed += 1;
            }
        }
        changed
    }

    /// Remove every listed notification after the API confirmed the delete.
    /// Returns the number of removed entries.
    pub fn confirm_bulk_delete(&mut self, ids: &[NotificationId]) -> usize {
        let before = self.items.len();
        for id in ids {
            self.ids.remove(id);
        }
        let remaining = &self.ids;
        self.items.retain(|item| remaining.contains(&item.id));
        before - self.items.len()
    }

    fn request(&self, kind: PageKind, page: u32) -> PageRequest {
        PageRequest {
            generation: self.generation,
            kind,
            query: ListQuery {
                page,
                limit: self.page_size,
                status: self.filter,
                search: self.search.clone(),
                ordering: DEFAULT_ORDERING,
            },
        }
    }

    fn push_back_unique(&mut self, notification: Notification) {
        if self.ids.insert(notification.id.clone()) {
            self.items.push(notification);
        }
    }
}

fn total_pages_for(count: u64, limit: u16) -> u32 {
    let limit = u64::from(limit.max(1));
    u32::try_from(count.div_ceil(limit)).unwrap_or(u32::MAX)
}
