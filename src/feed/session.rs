//! Async driver around [`FeedEngine`].
//!
//! Fetches and detector checks run on spawned tasks and report back over an
//! mpsc channel as [`FeedEvent`]s. The session applies them on its own task,
//! so the engine is never shared. A liveness flag, cleared by
//! [`FeedSession::teardown`], turns late completions into no-ops.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use super::cursor::Trigger;
use super::detector::{Detection, NewItemCount, NewItemDetector};
use super::engine::{Applied, FeedEngine, LoadRequest, LoadResponse};
use super::model::{Direction, FeedFilter};
use super::reconcile::{ScrollReconciler, ViewportProbe};
use crate::source::{AuctionSource, FetchError, ForumSource};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Timers and thresholds for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub poll_interval: Duration,
    pub initial_poll_delay: Duration,
    pub scroll_throttle: Duration,
    pub edge_threshold: f64,
    pub detector_page_len: usize,
    pub max_detector_pages: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            initial_poll_delay: Duration::from_secs(2),
            scroll_throttle: Duration::from_millis(100),
            edge_threshold: 500.0,
            detector_page_len: 20,
            max_detector_pages: 10,
        }
    }
}

/// Completions reported by background tasks.
#[derive(Debug)]
pub enum FeedEvent {
    Loaded {
        request: LoadRequest,
        result: Result<LoadResponse, FetchError>,
    },
    Detected {
        generation: u64,
        result: Result<Detection, FetchError>,
    },
}

/// Input from the render layer or the user.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedCommand {
    /// The viewport scrolled or resized.
    Scrolled,
    ApplyFilter(FeedFilter),
    /// Explicit "load more" at the bottom.
    LoadOlder,
    /// Explicit "load more" at the top.
    LoadNewer,
    /// The "new items" banner was clicked.
    AcknowledgeNewItems,
    Shutdown,
}

/// What changed, for whoever renders the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedUpdate {
    Replaced { items: usize, anchored: bool },
    Appended(usize),
    Prepended(usize),
    NewItemsAvailable(NewItemCount),
    LoadFailed { direction: Direction, error: String },
}

pub struct FeedSession<P: ViewportProbe> {
    engine: FeedEngine,
    forum: Arc<dyn ForumSource>,
    auction: Arc<dyn AuctionSource>,
    detector: NewItemDetector,
    reconciler: ScrollReconciler,
    probe: P,
    options: SessionOptions,
    alive: Arc<AtomicBool>,
    event_tx: mpsc::Sender<FeedEvent>,
    event_rx: mpsc::Receiver<FeedEvent>,
    updates: Option<mpsc::Sender<FeedUpdate>>,
    in_flight: usize,
    detecting: bool,
    new_items: Option<NewItemCount>,
}

impl<P: ViewportProbe> FeedSession<P> {
    pub fn new(
        engine: FeedEngine,
        forum: Arc<dyn ForumSource>,
        auction: Arc<dyn AuctionSource>,
        probe: P,
        options: SessionOptions,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            engine,
            forum,
            auction,
            detector: NewItemDetector::new(options.detector_page_len, options.max_detector_pages),
            reconciler: ScrollReconciler::new(options.scroll_throttle, options.edge_threshold),
            probe,
            options,
            alive: Arc::new(AtomicBool::new(true)),
            event_tx,
            event_rx,
            updates: None,
            in_flight: 0,
            detecting: false,
            new_items: None,
        }
    }

    /// Forward every [`FeedUpdate`] to `tx`.
    pub fn with_updates(mut self, tx: mpsc::Sender<FeedUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    pub fn engine(&self) -> &FeedEngine {
        &self.engine
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn probe_mut(&mut self) -> &mut P {
        &mut self.probe
    }

    /// Pending "N new items" banner, if any.
    pub fn new_items(&self) -> Option<NewItemCount> {
        self.new_items
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight == 0 && !self.detecting
    }

    // ========================================================================
    // Spawning
    // ========================================================================

    /// Kick off the first load of the session.
    pub async fn start(&mut self, start_from: Option<u64>) {
        let request = self.engine.start(start_from).await;
        self.spawn_load(request);
    }

    fn spawn_load(&mut self, request: LoadRequest) {
        self.in_flight += 1;
        let forum = Arc::clone(&self.forum);
        let auction = Arc::clone(&self.auction);
        let alive = Arc::clone(&self.alive);
        let tx = self.event_tx.clone();

        tokio::spawn(async move {
            let result = match catch_task_panic(request.execute(&*forum, &*auction)).await {
                Ok(result) => result,
                Err(panic_msg) => {
                    tracing::error!(task = "feed_load", error = %panic_msg, "Background task panicked");
                    Err(FetchError::Unavailable(panic_msg))
                }
            };
            if !alive.load(Ordering::Acquire) {
                tracing::debug!(direction = ?request.direction, "Session gone, dropping load result");
                return;
            }
            if let Err(e) = tx.send(FeedEvent::Loaded { request, result }).await {
                tracing::warn!(error = %e, event = "Loaded", "Channel send failed (receiver dropped)");
            }
        });
    }

    /// Start a detector check unless one is already running.
    pub fn spawn_detection(&mut self) {
        if self.detecting {
            tracing::debug!("Detector tick skipped, previous check still running");
            return;
        }
        self.detecting = true;

        let detector = self.detector.clone();
        let forum = Arc::clone(&self.forum);
        let store = self.engine.store().clone();
        let filter = self.engine.filter().clone();
        let generation = self.engine.generation();
        let alive = Arc::clone(&self.alive);
        let tx = self.event_tx.clone();

        tokio::spawn(async move {
            let check = detector.check(&*forum, &store, &filter);
            let result = match catch_task_panic(check).await {
                Ok(result) => result,
                Err(panic_msg) => {
                    tracing::error!(task = "detector", error = %panic_msg, "Background task panicked");
                    Err(FetchError::Unavailable(panic_msg))
                }
            };
            if !alive.load(Ordering::Acquire) {
                return;
            }
            if let Err(e) = tx.send(FeedEvent::Detected { generation, result }).await {
                tracing::warn!(error = %e, event = "Detected", "Channel send failed (receiver dropped)");
            }
        });
    }

    // ========================================================================
    // Applying Events
    // ========================================================================

    pub async fn handle_event(&mut self, event: FeedEvent) -> Option<FeedUpdate> {
        let update = match event {
            FeedEvent::Loaded { request, result } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if !self.is_alive() {
                    return None;
                }
                self.apply_load(request, result).await
            }
            FeedEvent::Detected { generation, result } => {
                self.detecting = false;
                if !self.is_alive() {
                    return None;
                }
                self.apply_detection(generation, result).await
            }
        }?;
        if let Some(tx) = self.updates.clone() {
            if let Err(e) = tx.send(update.clone()).await {
                tracing::debug!(error = %e, "Update receiver dropped");
            }
        }
        Some(update)
    }

    async fn apply_load(
        &mut self,
        request: LoadRequest,
        result: Result<LoadResponse, FetchError>,
    ) -> Option<FeedUpdate> {
        let error = result.as_ref().err().map(ToString::to_string);
        let snapshot = self.reconciler.capture(&self.probe);

        match self.engine.complete(&request, result).await {
            Applied::Replaced => {
                if !request.anchored {
                    self.new_items = None;
                }
                self.probe.layout(&self.engine.visible_items());
                let scroll_top = self.probe.metrics().scroll_top;
                self.probe.adjust_scroll(-scroll_top);
                Some(FeedUpdate::Replaced {
                    items: self.engine.items().len(),
                    anchored: request.anchored,
                })
            }
            Applied::Appended(count) => {
                self.probe.layout(&self.engine.visible_items());
                Some(FeedUpdate::Appended(count))
            }
            Applied::Prepended(count) => {
                self.probe.layout(&self.engine.visible_items());
                // Measure once the render layer has had its turn.
                tokio::task::yield_now().await;
                let delta = self.reconciler.settle(&mut self.probe, snapshot);
                tracing::debug!(count, delta, "Compensated scroll for prepend");
                Some(FeedUpdate::Prepended(count))
            }
            Applied::Failed => Some(FeedUpdate::LoadFailed {
                direction: request.direction,
                error: error.unwrap_or_default(),
            }),
            Applied::Stale => None,
        }
    }

    async fn apply_detection(
        &mut self,
        generation: u64,
        result: Result<Detection, FetchError>,
    ) -> Option<FeedUpdate> {
        match result {
            Ok(Detection::NewItems(count)) if generation == self.engine.generation() => {
                self.engine.on_new_items_detected();
                self.new_items = Some(count);
                Some(FeedUpdate::NewItemsAvailable(count))
            }
            Ok(Detection::NewItems(_)) => {
                // The check already advanced the watermark; let the next tick recount.
                tracing::debug!(generation, "Ignoring detection for a superseded filter");
                self.engine.store().clear_highest_checked().await;
                None
            }
            Ok(detection) => {
                tracing::debug!(?detection, "No new items");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "New-item check failed");
                None
            }
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Evaluate the viewport after a scroll or resize.
    pub async fn on_scroll(&mut self, now: Instant) {
        let Some(decision) = self
            .reconciler
            .evaluate(&self.probe, now, self.engine.cursors())
        else {
            return;
        };
        if let Some(anchor) = &decision.anchor {
            self.engine.record_anchor(anchor).await;
        }
        for direction in decision.loads() {
            if let Some(request) = self.engine.begin(direction, Trigger::Auto) {
                self.spawn_load(request);
            }
        }
    }

    /// Apply a command. Returns `false` once the session should stop.
    pub async fn handle_command(&mut self, command: FeedCommand) -> bool {
        match command {
            FeedCommand::Scrolled => self.on_scroll(Instant::now()).await,
            FeedCommand::ApplyFilter(filter) => {
                self.new_items = None;
                let request = self.engine.set_filter(filter).await;
                self.spawn_load(request);
            }
            FeedCommand::LoadOlder => {
                if let Some(request) = self.engine.begin_older(Trigger::Manual) {
                    self.spawn_load(request);
                }
            }
            FeedCommand::LoadNewer => {
                if let Some(request) = self.engine.begin_newer(Trigger::Manual) {
                    self.spawn_load(request);
                }
            }
            FeedCommand::AcknowledgeNewItems => {
                self.new_items = None;
                let request = self.engine.acknowledge_new_items().await;
                self.spawn_load(request);
            }
            FeedCommand::Shutdown => return false,
        }
        true
    }

    /// Process events until every spawned fetch and check has reported back.
    pub async fn wait_idle(&mut self) {
        while self.is_alive() && !self.is_idle() {
            match self.event_rx.recv().await {
                Some(event) => {
                    self.handle_event(event).await;
                }
                None => break,
            }
        }
    }

    /// Drive the session until `Shutdown` or the command channel closes.
    ///
    /// Multiplexes commands, task completions and the detector interval,
    /// whose first tick fires after `initial_poll_delay`.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<FeedCommand>) {
        let first_tick = Instant::now() + self.options.initial_poll_delay;
        let mut ticks = tokio::time::interval_at(first_tick, self.options.poll_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            tracing::info!("Feed session shutting down");
                            break;
                        }
                    }
                    None => break,
                },

                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event).await;
                }

                _ = ticks.tick() => self.spawn_detection(),
            }
        }

        self.teardown();
    }

    /// Stop applying results. Tasks still in flight finish but their
    /// continuations are dropped.
    pub fn teardown(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

/// Run `future`, turning a panic into an error message.
async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|panic| {
            if let Some(s) = panic.downcast_ref::<&'static str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            }
        })
}
