//! The telemetry batcher: buffers encoded events per route key and flushes
//! them on a shared timer, on demand, and once more at teardown.

use futures::future::{join_all, BoxFuture};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::batch::{PendingBatches, ReadyBatch};
use crate::clock::{Clock, SystemClock};
use crate::event::{Event, EventContext, FieldValue, LogRequest};
use crate::impression::{self, PageInfo};
use crate::route::{batch_body, Endpoint, RouteKey};
use crate::transport::{FallbackChain, OutboundRequest, SendError, TransportKind};

/// Runtime settings of a [`Batcher`].
#[derive(Clone, Debug)]
pub struct BatcherSettings {
    pub endpoint: Endpoint,
    pub flush_interval: Duration,
    pub max_batch_len: usize,
    /// Log a `CI.Init` event ahead of the first caller event.
    pub log_init_event: bool,
    /// Target of partial impression requests.
    pub xls_url: Option<String>,
    pub client_id: Option<String>,
}

impl BatcherSettings {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            flush_interval: Duration::from_millis(2000),
            max_batch_len: 2000,
            log_init_event: true,
            xls_url: None,
            client_id: None,
        }
    }
}

/// One batch that left the process.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct SentBatch {
    pub route: String,
    pub tier: TransportKind,
    pub events: usize,
}

/// Outcome of a flush.
#[derive(Debug, Default, serde::Serialize)]
pub struct FlushReport {
    pub sent: Vec<SentBatch>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub failed: HashMap<String, String>,
    /// Events given up on during teardown.
    pub dropped: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.sent.is_empty() && self.failed.is_empty()
    }

    pub fn events_sent(&self) -> usize {
        self.sent.iter().map(|b| b.events).sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    TornDown,
}

struct State {
    batches: PendingBatches,
    phase: Phase,
    timer: Option<JoinHandle<()>>,
    pre_unload: Option<BoxFuture<'static, ()>>,
    unload: Option<BoxFuture<'static, ()>>,
}

#[derive(Default)]
struct Signals {
    /// A batch was detached by the size bound.
    ready: Notify,
    /// An event asked for an immediate flush of everything.
    flush: Notify,
    shutdown: Notify,
}

struct Inner {
    settings: BatcherSettings,
    chain: FallbackChain,
    clock: Arc<dyn Clock>,
    signals: Arc<Signals>,
    state: Mutex<State>,
}

/// Builder for [`Batcher`].
pub struct BatcherBuilder {
    settings: BatcherSettings,
    chain: FallbackChain,
    clock: Arc<dyn Clock>,
    pre_unload: Option<BoxFuture<'static, ()>>,
    unload: Option<BoxFuture<'static, ()>>,
}

impl BatcherBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Future that resolves when the host is about to go away. Everything
    /// pending is flushed once, without tearing down.
    pub fn pre_unload_signal<F>(mut self, signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pre_unload = Some(Box::pin(signal));
        self
    }

    /// Future that resolves when the host is going away; the batcher tears
    /// itself down when it fires. Armed on the first logged event.
    pub fn unload_signal<F>(mut self, signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.unload = Some(Box::pin(signal));
        self
    }

    pub fn build(self) -> Batcher {
        let max_batch_len = self.settings.max_batch_len;
        Batcher {
            inner: Arc::new(Inner {
                settings: self.settings,
                chain: self.chain,
                clock: self.clock,
                signals: Arc::new(Signals::default()),
                state: Mutex::new(State {
                    batches: PendingBatches::new(max_batch_len),
                    phase: Phase::Idle,
                    timer: None,
                    pre_unload: self.pre_unload,
                    unload: self.unload,
                }),
            }),
        }
    }
}

/// Buffers instrumentation events and ships them in per-route batches.
///
/// Cloning is cheap; clones share the same buffers and timer.
#[derive(Clone)]
pub struct Batcher {
    inner: Arc<Inner>,
}

impl Batcher {
    pub fn builder(settings: BatcherSettings, chain: FallbackChain) -> BatcherBuilder {
        BatcherBuilder {
            settings,
            chain,
            clock: Arc::new(SystemClock),
            pre_unload: None,
            unload: None,
        }
    }

    /// Log an event of `event_type` with the given fields.
    pub fn log<K, V, I>(&self, event_type: &str, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        self.submit(LogRequest::new(event_type).fields(fields));
    }

    /// Log an event with a name and service context. Context fields follow
    /// the caller's fields.
    pub fn log_fields<K, V, I>(
        &self,
        event_type: &str,
        name: Option<&str>,
        context: EventContext,
        fields: I,
    ) where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let mut request = LogRequest::new(event_type).fields(fields);
        if let Some(name) = name {
            request = request.name(name);
        }
        self.submit(request.context(context));
    }

    /// Log a filter flare carrying the given query tags.
    pub fn log_filter_flare(&self, tags: &[&str]) {
        self.submit(LogRequest::new("FilterFlare").field("queryTags", tags.join(",")));
    }

    /// Append an event to its route's batch. Never fails; problems are logged.
    ///
    /// The first call starts the flush timer and arms the unload signal.
    pub fn submit(&self, request: LogRequest) {
        let mut state = self.lock_state();

        match state.phase {
            Phase::TornDown => {
                debug!(event_type = %request.event_type, "batcher torn down, dropping event");
                return;
            }
            Phase::Idle => {
                state.phase = Phase::Running;
                if self.inner.settings.log_init_event {
                    let init = LogRequest::new("Init").feature_id("CI").name("Base");
                    self.append(&mut state, &init);
                }
                self.start_background(&mut state);
            }
            Phase::Running => {}
        }

        let detached = self.append(&mut state, &request);
        drop(state);

        if request.immediate {
            self.inner.signals.flush.notify_one();
        } else if detached {
            self.inner.signals.ready.notify_one();
        }
    }

    fn append(&self, state: &mut State, request: &LogRequest) -> bool {
        let event = Event::build(request, self.inner.clock.now_ms());
        let endpoint = &self.inner.settings.endpoint;
        let route = event
            .route_override()
            .map(RouteKey::new)
            .unwrap_or_else(|| endpoint.default_route().clone());

        match event.encode() {
            Ok(encoded) => {
                let base_len = endpoint.base_len(&route);
                let detached = state.batches.append(route.clone(), &encoded, base_len);
                if detached {
                    debug!(route = %route, "batch reached size bound, detached for flush");
                }
                detached
            }
            Err(e) => {
                warn!(event_type = %request.event_type, error = %e, "failed to encode event");
                false
            }
        }
    }

    fn start_background(&self, state: &mut State) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("no async runtime, periodic flush disabled");
                return;
            }
        };

        let period = self.inner.settings.flush_interval;
        state.timer = Some(handle.spawn(run_timer(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.signals),
            period,
        )));
        debug!(interval_ms = period.as_millis() as u64, "flush timer started");

        if let Some(signal) = state.pre_unload.take() {
            let weak = Arc::downgrade(&self.inner);
            handle.spawn(async move {
                signal.await;
                if let Some(inner) = weak.upgrade() {
                    let batcher = Batcher { inner };
                    if !batcher.is_torn_down() {
                        debug!("pre-unload signal received, flushing");
                        batcher.flush_all().await;
                    }
                }
            });
        }

        if let Some(signal) = state.unload.take() {
            let weak = Arc::downgrade(&self.inner);
            handle.spawn(async move {
                signal.await;
                if let Some(inner) = weak.upgrade() {
                    info!("unload signal received, tearing down");
                    Batcher { inner }.teardown().await;
                }
            });
        }
    }

    /// Send every pending batch, one request per batch.
    ///
    /// Batches that no transport accepted are kept for the next flush, unless
    /// the batcher was torn down meanwhile.
    pub async fn flush_all(&self) -> FlushReport {
        let batches = self.lock_state().batches.take_all();
        if batches.is_empty() {
            return FlushReport::default();
        }

        let (mut report, failed) = self.send_batches(batches).await;
        self.retain_failed(failed, &mut report);
        report
    }

    /// Send only the batches already detached by the size bound.
    pub async fn flush_ready(&self) -> FlushReport {
        let batches = self.lock_state().batches.take_ready();
        if batches.is_empty() {
            return FlushReport::default();
        }

        let (mut report, failed) = self.send_batches(batches).await;
        self.retain_failed(failed, &mut report);
        report
    }

    /// Requeue failed batches, or count them as dropped once teardown has
    /// made its final flush.
    fn retain_failed(&self, failed: Vec<ReadyBatch>, report: &mut FlushReport) {
        if failed.is_empty() {
            return;
        }

        let mut state = self.lock_state();
        if state.phase == Phase::TornDown {
            report.dropped += failed.iter().map(|b| b.events).sum::<usize>();
            warn!(
                dropped = report.dropped,
                "torn down while flushing, dropping undelivered events"
            );
        } else {
            state.batches.requeue(failed);
        }
    }

    /// Stop the timer and make one final flush attempt.
    ///
    /// Later calls are no-ops and later events are dropped.
    pub async fn teardown(&self) -> FlushReport {
        let timer = {
            let mut state = self.lock_state();
            if state.phase == Phase::TornDown {
                return FlushReport::default();
            }
            state.phase = Phase::TornDown;
            state.timer.take()
        };

        if let Some(timer) = timer {
            // Let an in-flight tick finish instead of aborting mid-send
            self.inner.signals.shutdown.notify_one();
            if let Err(e) = timer.await {
                warn!(error = %e, "flush timer ended abnormally");
            }
        }

        let batches = self.lock_state().batches.take_all();
        let (mut report, failed) = self.send_batches(batches).await;
        report.dropped = failed.iter().map(|b| b.events).sum();
        if report.dropped > 0 {
            warn!(dropped = report.dropped, "dropping events that failed the final flush");
        }
        info!(
            batches = report.sent.len(),
            events = report.events_sent(),
            "final flush complete"
        );
        report
    }

    /// Send a partial impression straight away, through beacon then XHR.
    pub async fn log_partial_impression(
        &self,
        data: &JsonValue,
        data_source: &JsonValue,
        page: &PageInfo,
    ) -> Result<TransportKind, SendError> {
        let settings = &self.inner.settings;
        let xls_url = settings.xls_url.as_deref().ok_or_else(|| {
            SendError::Unavailable("no partial impression endpoint configured".to_string())
        })?;

        let body = impression::build_request(
            settings.client_id.as_deref(),
            data,
            data_source,
            page,
            self.inner.clock.now_ms(),
        );
        let request = OutboundRequest::xml(xls_url, body);
        let chain = self
            .inner
            .chain
            .only(&[TransportKind::Beacon, TransportKind::Xhr]);

        let result = chain.dispatch(&request).await;
        if let Err(e) = &result {
            warn!(app_ns = %page.app_ns(), error = %e, "partial impression not delivered");
        }
        result
    }

    /// Number of events currently buffered.
    pub fn buffered_events(&self) -> usize {
        self.lock_state().batches.event_count()
    }

    /// Encoded pending batch for a route, if any.
    pub fn pending_batch(&self, route: &RouteKey) -> Option<String> {
        self.lock_state().batches.pending(route).map(str::to_string)
    }

    pub fn is_torn_down(&self) -> bool {
        self.lock_state().phase == Phase::TornDown
    }

    /// Send batches, routes concurrently and each route's batches in order.
    /// Returns the report and the batches that could not be delivered.
    async fn send_batches(&self, batches: Vec<ReadyBatch>) -> (FlushReport, Vec<ReadyBatch>) {
        let mut by_route: Vec<(RouteKey, Vec<ReadyBatch>)> = Vec::new();
        for batch in batches {
            match by_route.iter_mut().find(|(route, _)| *route == batch.route) {
                Some((_, queue)) => queue.push(batch),
                None => by_route.push((batch.route.clone(), vec![batch])),
            }
        }

        let results = join_all(
            by_route
                .into_iter()
                .map(|(route, queue)| self.send_route(route, queue)),
        )
        .await;

        let mut report = FlushReport::default();
        let mut failed = Vec::new();
        for (sent, failure) in results {
            report.sent.extend(sent);
            if let Some((route, error, rest)) = failure {
                report.failed.insert(route.to_string(), error.to_string());
                failed.extend(rest);
            }
        }
        (report, failed)
    }

    /// Send one route's batches in order, stopping at the first failure so
    /// later batches never overtake it.
    async fn send_route(
        &self,
        route: RouteKey,
        queue: Vec<ReadyBatch>,
    ) -> (Vec<SentBatch>, Option<(RouteKey, SendError, Vec<ReadyBatch>)>) {
        let url = self.inner.settings.endpoint.url_for(&route);
        let mut sent = Vec::new();
        let mut queue = queue.into_iter();

        while let Some(batch) = queue.next() {
            let request = OutboundRequest::form(url.clone(), batch_body(&batch.data));
            match self.inner.chain.dispatch(&request).await {
                Ok(tier) => {
                    debug!(route = %route, tier = %tier, events = batch.events, "batch sent");
                    sent.push(SentBatch {
                        route: route.to_string(),
                        tier,
                        events: batch.events,
                    });
                }
                Err(e) => {
                    warn!(route = %route, events = batch.events, error = %e, "batch not delivered");
                    let mut rest = vec![batch];
                    rest.extend(queue);
                    return (sent, Some((route, e, rest)));
                }
            }
        }

        (sent, None)
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_timer(inner: Weak<Inner>, signals: Arc<Signals>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let ready_only = tokio::select! {
            biased;
            _ = signals.shutdown.notified() => break,
            _ = ticker.tick() => false,
            _ = signals.flush.notified() => false,
            _ = signals.ready.notified() => true,
        };

        let Some(inner) = inner.upgrade() else { break };
        let batcher = Batcher { inner };
        let report = if ready_only {
            batcher.flush_ready().await
        } else {
            batcher.flush_all().await
        };
        if !report.is_empty() {
            debug!(
                batches = report.sent.len(),
                events = report.events_sent(),
                failed = report.failed.len(),
                "timer flush"
            );
        }
    }

    debug!("flush timer stopped");
}
