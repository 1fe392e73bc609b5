//! Live session list of one tenant.
//!
//! [`SessionFeed`] owns the cached session snapshot, keeps it fresh from the
//! change channel and guarantees at most one list request in flight. Every
//! notification triggers a full re-fetch: change events do not carry enough
//! data to patch the list, and the fetch result reflects the backend state
//! at the time it runs, so ordering between notifications does not matter.
//! A notification arriving while a fetch is running joins that fetch.
//!
//! When the change stream ends without a dispose, the feed reports
//! [`ChannelError::Closed`] through `last_error` until `initialize`
//! subscribes again.

pub mod backend;
pub mod error;
pub mod filter;

pub use backend::{
    ChangeChannel, ChangeEvent, EventSink, NullChannel, SessionSource, SubscriptionHandle,
};
pub use error::{ApiError, ChannelError, FeedError};
pub use filter::visible_items;

use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};

use crate::core::{FeedSummary, Session, SessionFilter};

type RefreshFuture = Shared<BoxFuture<'static, Result<(), FeedError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    Uninitialized,
    Ready,
    Disposed,
}

/// Observable state of a feed, published on every change
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub phase: FeedPhase,
    pub tenant_id: Option<String>,
    pub items: Arc<Vec<Session>>,
    pub filter: SessionFilter,
    pub search_text: String,
    pub is_refreshing: bool,
    pub last_error: Option<FeedError>,
}

impl FeedSnapshot {
    pub fn visible_items(&self) -> Vec<Session> {
        visible_items(&self.items, self.filter, &self.search_text)
    }

    pub fn summary(&self) -> FeedSummary {
        FeedSummary::from_sessions(&self.items)
    }
}

struct InFlight {
    id: u64,
    future: RefreshFuture,
    driver: AbortHandle,
}

struct FeedState {
    phase: FeedPhase,
    tenant_id: Option<String>,
    items: Arc<Vec<Session>>,
    filter: SessionFilter,
    search_text: String,
    last_error: Option<FeedError>,
    in_flight: Option<InFlight>,
    next_fetch_id: u64,
    channel_lost: bool,
}

struct Subscription {
    handle: SubscriptionHandle,
    pump: JoinHandle<()>,
}

struct FeedInner {
    source: Arc<dyn SessionSource>,
    channel: Arc<dyn ChangeChannel>,
    state: Mutex<FeedState>,
    // Async lock: subscribe/unsubscribe await the channel
    subscription: tokio::sync::Mutex<Option<Subscription>>,
    updates_tx: watch::Sender<FeedSnapshot>,
}

/// Handle to a tenant's session feed. Clones share the same feed.
#[derive(Clone)]
pub struct SessionFeed {
    inner: Arc<FeedInner>,
}

impl SessionFeed {
    pub fn new(source: Arc<dyn SessionSource>, channel: Arc<dyn ChangeChannel>) -> Self {
        let state = FeedState {
            phase: FeedPhase::Uninitialized,
            tenant_id: None,
            items: Arc::new(Vec::new()),
            filter: SessionFilter::All,
            search_text: String::new(),
            last_error: None,
            in_flight: None,
            next_fetch_id: 0,
            channel_lost: false,
        };
        let (updates_tx, _) = watch::channel(state.snapshot());

        Self {
            inner: Arc::new(FeedInner {
                source,
                channel,
                state: Mutex::new(state),
                subscription: tokio::sync::Mutex::new(None),
                updates_tx,
            }),
        }
    }

    /// Subscribe to changes of `tenant_id` and load its sessions.
    ///
    /// On fetch failure the cached items are kept and the feed stays
    /// uninitialized, so the call can be retried. Calling it again for the
    /// same tenant refreshes and re-subscribes if the change stream was lost;
    /// any other tenant is rejected.
    pub async fn initialize(&self, tenant_id: &str) -> Result<(), FeedError> {
        {
            let mut state = self.inner.lock_state();
            if state.phase == FeedPhase::Disposed {
                tracing::debug!("Ignoring initialize for '{}' on disposed feed", tenant_id);
                return Ok(());
            }
            // A feed is bound to the first tenant it was initialized for
            match state.tenant_id.clone() {
                Some(active) if active != tenant_id => {
                    return Err(FeedError::TenantMismatch {
                        active,
                        requested: tenant_id.to_string(),
                    });
                }
                Some(_) => {}
                None => state.tenant_id = Some(tenant_id.to_string()),
            }
        }

        tracing::info!("Initializing session feed for tenant {}", tenant_id);

        // Subscribe before fetching so no change between the two is lost
        self.ensure_subscribed(tenant_id).await?;

        let refresh = {
            let mut state = self.inner.lock_state();
            if state.phase == FeedPhase::Disposed {
                return Ok(());
            }
            self.inner.join_or_start_fetch(&mut state, tenant_id.to_string())
        };
        refresh.await
    }

    /// Re-fetch the active tenant's sessions, joining a fetch already in flight
    pub async fn refresh(&self) -> Result<(), FeedError> {
        match self.begin_refresh()? {
            Some(refresh) => refresh.await,
            None => Ok(()),
        }
    }

    /// Entry point for the change channel. Starts (or joins) a background
    /// refresh; failures are logged and kept in [`SessionFeed::last_error`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_change_notification(&self, event: ChangeEvent) {
        tracing::trace!(
            "Change notification: {:?} on {} at {}",
            event.kind,
            event.table,
            event.received_at
        );
        match self.begin_refresh() {
            Ok(_) => {}
            Err(FeedError::NotInitialized) => {
                tracing::debug!("Dropping change notification before feed initialization");
            }
            Err(e) => tracing::warn!("Change-triggered refresh not started: {}", e),
        }
    }

    pub fn set_filter(&self, filter: SessionFilter) {
        let mut state = self.inner.lock_state();
        if state.phase == FeedPhase::Disposed {
            return;
        }
        state.filter = filter;
        self.inner.publish(&state);
    }

    pub fn set_search_text(&self, text: impl Into<String>) {
        let mut state = self.inner.lock_state();
        if state.phase == FeedPhase::Disposed {
            return;
        }
        state.search_text = text.into();
        self.inner.publish(&state);
    }

    /// Cached sessions passing the current filter and search text
    pub fn visible_items(&self) -> Vec<Session> {
        let state = self.inner.lock_state();
        visible_items(&state.items, state.filter, &state.search_text)
    }

    /// Tear down the subscription and drop in-flight work. Idempotent.
    pub async fn dispose(&self) {
        {
            let mut state = self.inner.lock_state();
            if state.phase == FeedPhase::Disposed {
                return;
            }
            state.phase = FeedPhase::Disposed;
            if let Some(in_flight) = state.in_flight.take() {
                in_flight.driver.abort();
            }
            self.inner.publish(&state);
        }

        let subscription = self.inner.subscription.lock().await.take();
        if let Some(subscription) = subscription {
            subscription.pump.abort();
            self.inner.channel.unsubscribe(subscription.handle).await;
            tracing::debug!("Removed change subscription {}", subscription.handle);
        }

        tracing::info!(
            "Session feed disposed (tenant: {})",
            self.tenant_id().as_deref().unwrap_or("none")
        );
    }

    pub fn phase(&self) -> FeedPhase {
        self.inner.lock_state().phase
    }

    pub fn tenant_id(&self) -> Option<String> {
        self.inner.lock_state().tenant_id.clone()
    }

    /// Last fetched sessions, unfiltered
    pub fn items(&self) -> Arc<Vec<Session>> {
        Arc::clone(&self.inner.lock_state().items)
    }

    pub fn filter(&self) -> SessionFilter {
        self.inner.lock_state().filter
    }

    pub fn search_text(&self) -> String {
        self.inner.lock_state().search_text.clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.lock_state().in_flight.is_some()
    }

    pub fn last_error(&self) -> Option<FeedError> {
        self.inner.lock_state().last_error.clone()
    }

    pub fn summary(&self) -> FeedSummary {
        FeedSummary::from_sessions(&self.inner.lock_state().items)
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.inner.lock_state().snapshot()
    }

    /// Receiver notified whenever the observable state changes
    pub fn updates(&self) -> watch::Receiver<FeedSnapshot> {
        self.inner.updates_tx.subscribe()
    }

    fn begin_refresh(&self) -> Result<Option<RefreshFuture>, FeedError> {
        let mut state = self.inner.lock_state();
        if state.phase == FeedPhase::Disposed {
            return Ok(None);
        }
        if let Some(in_flight) = &state.in_flight {
            return Ok(Some(in_flight.future.clone()));
        }
        let tenant_id = match (state.phase, &state.tenant_id) {
            (FeedPhase::Ready, Some(tenant_id)) => tenant_id.clone(),
            _ => return Err(FeedError::NotInitialized),
        };
        Ok(Some(self.inner.join_or_start_fetch(&mut state, tenant_id)))
    }

    async fn ensure_subscribed(&self, tenant_id: &str) -> Result<(), FeedError> {
        let mut subscription = self.inner.subscription.lock().await;
        if subscription.is_some() || self.phase() == FeedPhase::Disposed {
            return Ok(());
        }

        let (sink, events) = mpsc::unbounded_channel();
        let handle = self.inner.channel.subscribe(tenant_id, sink).await?;
        let pump = spawn_notification_pump(Arc::downgrade(&self.inner), handle, events);
        tracing::debug!("Subscribed to changes of tenant {} ({})", tenant_id, handle);

        *subscription = Some(Subscription { handle, pump });

        let mut state = self.inner.lock_state();
        if state.channel_lost {
            state.channel_lost = false;
            if matches!(state.last_error, Some(FeedError::Subscribe(_))) {
                state.last_error = None;
            }
            self.inner.publish(&state);
        }
        Ok(())
    }
}

impl FeedInner {
    fn lock_state(&self) -> MutexGuard<'_, FeedState> {
        // State stays consistent even if a holder panicked: every update is a
        // single field assignment
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &FeedState) {
        self.updates_tx.send_replace(state.snapshot());
    }

    /// Return the in-flight fetch, or start one for `tenant_id`.
    ///
    /// The fetch is spawned so it completes even when every caller stops
    /// waiting; callers await clones of the shared future.
    fn join_or_start_fetch(
        self: &Arc<Self>,
        state: &mut FeedState,
        tenant_id: String,
    ) -> RefreshFuture {
        if let Some(in_flight) = &state.in_flight {
            return in_flight.future.clone();
        }

        state.next_fetch_id += 1;
        let id = state.next_fetch_id;
        let source = Arc::clone(&self.source);
        let feed = Arc::downgrade(self);

        let future = async move {
            tracing::debug!("Fetching sessions for tenant {} (fetch #{})", tenant_id, id);
            let result = match AssertUnwindSafe(source.list_sessions(&tenant_id))
                .catch_unwind()
                .await
            {
                Ok(result) => result.map_err(FeedError::from),
                Err(panic) => Err(FeedError::Aborted(panic_message(&*panic))),
            };
            match feed.upgrade() {
                Some(inner) => inner.complete_fetch(id, result),
                None => result.map(|_| ()),
            }
        }
        .boxed()
        .shared();

        let driver = tokio::spawn(future.clone());
        state.in_flight = Some(InFlight {
            id,
            future: future.clone(),
            driver: driver.abort_handle(),
        });
        self.publish(state);
        future
    }

    fn complete_fetch(
        &self,
        id: u64,
        result: Result<Vec<Session>, FeedError>,
    ) -> Result<(), FeedError> {
        let mut state = self.lock_state();
        if state.in_flight.as_ref().map(|f| f.id) == Some(id) {
            state.in_flight = None;
        }

        if state.phase == FeedPhase::Disposed {
            tracing::debug!("Discarding fetch #{} result for disposed feed", id);
            return result.map(|_| ());
        }

        match result {
            Ok(sessions) => {
                tracing::debug!("Fetch #{} returned {} sessions", id, sessions.len());
                state.items = Arc::new(sessions);
                state.last_error = state
                    .channel_lost
                    .then_some(FeedError::Subscribe(ChannelError::Closed));
                if state.phase == FeedPhase::Uninitialized {
                    state.phase = FeedPhase::Ready;
                    tracing::info!(
                        "Session feed ready for tenant {} ({} sessions)",
                        state.tenant_id.as_deref().unwrap_or("?"),
                        state.items.len()
                    );
                }
                self.publish(&state);
                Ok(())
            }
            Err(err) => {
                tracing::warn!("Fetch #{} failed: {}", id, err);
                state.last_error = Some(err.clone());
                self.publish(&state);
                Err(err)
            }
        }
    }

    /// The change stream of `handle` ended without a dispose
    async fn on_channel_lost(&self, handle: SubscriptionHandle) {
        {
            let mut subscription = self.subscription.lock().await;
            if subscription.as_ref().map(|s| s.handle) != Some(handle) {
                return;
            }
            *subscription = None;
        }

        {
            let mut state = self.lock_state();
            if state.phase != FeedPhase::Disposed {
                tracing::warn!(
                    "Change stream for tenant {} ended, cached sessions will go stale",
                    state.tenant_id.as_deref().unwrap_or("?")
                );
                state.channel_lost = true;
                state.last_error = Some(FeedError::Subscribe(ChannelError::Closed));
                self.publish(&state);
            }
        }

        self.channel.unsubscribe(handle).await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "session source panicked".to_string())
}

impl FeedState {
    fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            phase: self.phase,
            tenant_id: self.tenant_id.clone(),
            items: Arc::clone(&self.items),
            filter: self.filter,
            search_text: self.search_text.clone(),
            is_refreshing: self.in_flight.is_some(),
            last_error: self.last_error.clone(),
        }
    }
}

fn spawn_notification_pump(
    feed: Weak<FeedInner>,
    handle: SubscriptionHandle,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(inner) = feed.upgrade() else {
                return;
            };
            SessionFeed { inner }.on_change_notification(event);
        }
        tracing::debug!("Change notification stream {} ended", handle);
        if let Some(inner) = feed.upgrade() {
            inner.on_channel_lost(handle).await;
        }
    })
}
