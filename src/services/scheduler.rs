//! Request orchestration: periodic producers, one paced consumer, outage
//! detection and recovery.
//!
//! ```text
//!  standard ─┐
//!  software ─┤  tail                       ┌──────────────┐
//!  thermostat┼──────► RequestQueue ───────►│  processor   │──► RequestExecutor
//!  mode ─────┘          ▲ head             │ (one at a    │
//!  on-demand calls ─────┘                  │  time, paced)│──► dispatch ──► listener
//!                                          └──────────────┘
//! ```
//!
//! Phases:
//! - `Dormant`: no listener registered, no task running.
//! - `Active`: producers and processor running. Entered when the first
//!   listener registers or when the alive-check succeeds; the first standard
//!   poll runs immediately.
//! - `Outage`: a server error stopped every producer and the processor; the
//!   failed request waits at the head of the queue while a slow alive-check
//!   probes the service.

use log::{debug, info, warn};
use std::mem;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cache::SystemTable;
use crate::client::RequestExecutor;
use crate::decode;
use crate::error::RequestError;
use crate::listener::{ConnectionObserver, SystemListener};
use crate::models::uplink::SystemId;
use crate::queue::{self, Position, QueuedRequest, RequestQueue};
use crate::request::Request;
use crate::services::{dispatch, polling};

pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_ALIVE_CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_SOFTWARE_CHECK_DAYS: i64 = 7;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub queue_capacity: usize,
    pub queue_warn_margin: usize,
    /// Pause between two requests; only one request is ever in flight.
    pub request_interval: Duration,
    pub alive_check_interval: Duration,
    /// Cadence of the thermostat and mode re-submission.
    pub heartbeat_interval: Duration,
    /// Standard poll cadence; zero disables periodic polling.
    pub update_interval: Duration,
    /// Software check cadence in days; zero or less disables it.
    pub software_check_days: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            queue_capacity: queue::DEFAULT_CAPACITY,
            queue_warn_margin: queue::DEFAULT_WARN_MARGIN,
            request_interval: DEFAULT_REQUEST_INTERVAL,
            alive_check_interval: DEFAULT_ALIVE_CHECK_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            software_check_days: DEFAULT_SOFTWARE_CHECK_DAYS,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SchedulerPhase {
    Dormant,
    Active,
    Outage,
}

/// Cancellation handles of one `Active` run. Cancelling `root` stops every
/// task of the run; the standard and software producers have their own
/// child token so they can be restarted alone.
struct ActiveRun {
    root: CancellationToken,
    standard: CancellationToken,
    software: CancellationToken,
}

enum Phase {
    Dormant,
    Active(ActiveRun),
    /// Holds the alive-check's token.
    Outage(CancellationToken),
}

#[derive(Debug, Copy, Clone)]
struct Intervals {
    update: Duration,
    software_days: i64,
}

type Job = fn(&SystemTable) -> Vec<Request>;

pub struct Scheduler {
    executor: RequestExecutor,
    queue: RequestQueue,
    systems: SystemTable,
    observer: Option<Arc<dyn ConnectionObserver>>,
    runtime: Handle,
    request_interval: Duration,
    alive_check_interval: Duration,
    heartbeat_interval: Duration,
    intervals: Mutex<Intervals>,
    phase: Mutex<Phase>,
}

impl Scheduler {
    /// Must be called from within a Tokio runtime; tasks are spawned on it.
    pub fn new(
        executor: RequestExecutor,
        settings: EngineSettings,
        observer: Option<Arc<dyn ConnectionObserver>>,
    ) -> Arc<Self> {
        Arc::new(Scheduler {
            executor,
            queue: RequestQueue::new(settings.queue_capacity, settings.queue_warn_margin),
            systems: SystemTable::default(),
            observer,
            runtime: Handle::current(),
            request_interval: settings.request_interval,
            alive_check_interval: settings.alive_check_interval,
            heartbeat_interval: settings.heartbeat_interval,
            intervals: Mutex::new(Intervals {
                update: settings.update_interval,
                software_days: settings.software_check_days,
            }),
            phase: Mutex::new(Phase::Dormant),
        })
    }

    fn phase_lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn intervals(&self) -> Intervals {
        *self.intervals.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> SchedulerPhase {
        match *self.phase_lock() {
            Phase::Dormant => SchedulerPhase::Dormant,
            Phase::Active(_) => SchedulerPhase::Active,
            Phase::Outage(_) => SchedulerPhase::Outage,
        }
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn systems(&self) -> &SystemTable {
        &self.systems
    }

    /// Non-blocking insert; a full queue sheds the request (already logged).
    pub fn enqueue(&self, request: Request, position: Position) -> bool {
        self.queue.push(request, position).is_ok()
    }

    fn enqueue_all(&self, requests: Vec<Request>) {
        for request in requests {
            self.enqueue(request, Position::Tail);
        }
    }

    // ---- listener lifecycle ----

    pub fn add_listener(self: &Arc<Self>, id: SystemId, listener: Arc<dyn SystemListener>) {
        let mut phase = self.phase_lock();
        if self.systems.register_listener(id, listener).is_some() {
            info!("Replaced listener for system {}", id);
        } else {
            info!("Registered listener for system {}", id);
        }
        if matches!(*phase, Phase::Dormant) {
            info!("First listener registered; starting request scheduler");
            *phase = self.start_run();
        }
    }

    pub fn remove_listener(&self, id: SystemId, listener: &Arc<dyn SystemListener>) -> bool {
        let mut phase = self.phase_lock();
        if !self.systems.remove_listener(id, listener) {
            warn!("No matching listener registered for system {}", id);
            return false;
        }
        info!("Removed listener for system {}", id);
        if self.systems.listener_count() == 0 {
            self.stop(&mut phase);
            info!("Last listener removed; request scheduler stopped");
        }
        true
    }

    /// Stop every task and discard queued work.
    pub fn shutdown(&self) {
        let mut phase = self.phase_lock();
        self.stop(&mut phase);
    }

    fn stop(&self, phase: &mut Phase) {
        match mem::replace(phase, Phase::Dormant) {
            Phase::Active(run) => run.root.cancel(),
            Phase::Outage(alive) => alive.cancel(),
            Phase::Dormant => {}
        }
        self.queue.clear();
    }

    // ---- producers ----

    fn start_run(self: &Arc<Self>) -> Phase {
        let root = CancellationToken::new();
        self.runtime
            .spawn(Arc::clone(self).process_requests(root.child_token()));

        let intervals = self.intervals();
        let standard = self.spawn_standard(&root, intervals.update);
        let software = self.spawn_software(&root, intervals.software_days);
        self.spawn_periodic(
            &root,
            "thermostat heartbeat",
            self.heartbeat_interval,
            self.heartbeat_interval,
            polling::thermostat_heartbeat,
        );
        self.spawn_periodic(
            &root,
            "mode heartbeat",
            self.heartbeat_interval,
            self.heartbeat_interval,
            polling::mode_heartbeat,
        );
        Phase::Active(ActiveRun {
            root,
            standard,
            software,
        })
    }

    fn spawn_standard(self: &Arc<Self>, root: &CancellationToken, interval: Duration) -> CancellationToken {
        if interval.is_zero() {
            info!("Periodic polling disabled (update interval 0)");
            return root.child_token();
        }
        self.spawn_periodic(root, "standard poll", Duration::ZERO, interval, polling::standard_poll)
    }

    fn spawn_software(self: &Arc<Self>, root: &CancellationToken, days: i64) -> CancellationToken {
        if days <= 0 {
            info!("Software update check disabled");
            return root.child_token();
        }
        let period = Duration::from_secs(SECONDS_PER_DAY.saturating_mul(days.unsigned_abs()));
        self.spawn_periodic(root, "software check", Duration::ZERO, period, polling::software_poll)
    }

    /// Run `job` every `period` after `first_delay` until the returned token
    /// (a child of `root`) is cancelled. Ticks never overlap.
    fn spawn_periodic(
        self: &Arc<Self>,
        root: &CancellationToken,
        name: &'static str,
        first_delay: Duration,
        period: Duration,
        job: Job,
    ) -> CancellationToken {
        let token = root.child_token();
        let cancel = token.clone();
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + first_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let requests = job(&this.systems);
                        debug!("{}: queueing {} request(s)", name, requests.len());
                        this.enqueue_all(requests);
                    }
                }
            }
            debug!("{} stopped", name);
        });
        token
    }

    pub fn run_standard_poll(&self) {
        self.enqueue_all(polling::standard_poll(&self.systems));
    }

    /// Change the standard poll cadence; a running producer restarts and
    /// polls immediately.
    pub fn set_update_interval(self: &Arc<Self>, interval: Duration) {
        self.intervals.lock().unwrap_or_else(|e| e.into_inner()).update = interval;
        info!("Update interval set to {}s", interval.as_secs());
        let mut phase = self.phase_lock();
        if let Phase::Active(run) = &mut *phase {
            run.standard.cancel();
            let root = run.root.clone();
            run.standard = self.spawn_standard(&root, interval);
        }
    }

    pub fn set_software_check_days(self: &Arc<Self>, days: i64) {
        self.intervals.lock().unwrap_or_else(|e| e.into_inner()).software_days = days;
        info!("Software update check interval set to {} day(s)", days);
        let mut phase = self.phase_lock();
        if let Phase::Active(run) = &mut *phase {
            run.software.cancel();
            let root = run.root.clone();
            run.software = self.spawn_software(&root, days);
        }
    }

    // ---- consumer ----

    async fn process_requests(self: Arc<Self>, cancel: CancellationToken) {
        debug!("Request processor started");
        loop {
            let entry = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                entry = self.queue.pop() => entry,
            };
            if self.process(entry, &cancel).await.is_break() {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = time::sleep(self.request_interval) => {}
            }
        }
        debug!("Request processor stopped");
    }

    async fn process(self: &Arc<Self>, entry: QueuedRequest, cancel: &CancellationToken) -> ControlFlow<()> {
        let QueuedRequest { request, reply, .. } = entry;
        debug!(
            "Executing {} {} ({})",
            request.method(),
            request.path(),
            request.kind().name()
        );

        match self.executor.execute(&request).await {
            Err(error) if error.is_server_error() => {
                let replay = match reply {
                    Some(reply) => {
                        let _ = reply.send(Err(error.clone()));
                        None
                    }
                    None => Some(request),
                };
                self.enter_outage(replay, &error, cancel);
                ControlFlow::Break(())
            }
            Err(error) => {
                match reply {
                    Some(reply) => {
                        let _ = reply.send(Err(error));
                    }
                    None => warn!(
                        "Dropping {} for system {}: {}",
                        request.kind().name(),
                        request.system_id().map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                        error
                    ),
                }
                ControlFlow::Continue(())
            }
            Ok(body) => {
                match reply {
                    Some(reply) => {
                        let _ = reply.send(Ok(body));
                    }
                    None => dispatch::dispatch(&self.systems, &request, &body),
                }
                ControlFlow::Continue(())
            }
        }
    }

    /// Perform a synchronous round trip. While the processor runs the request
    /// jumps the line; otherwise nothing else is sending and it goes out
    /// directly.
    pub async fn round_trip(&self, request: Request) -> Result<String, RequestError> {
        let processor_running = matches!(*self.phase_lock(), Phase::Active(_));
        if !processor_running {
            return self.executor.execute(&request).await;
        }

        let (tx, rx) = oneshot::channel();
        let entry = QueuedRequest::new(request, Some(tx));
        if self.queue.push_entry(entry, Position::Head).is_err() {
            return Err(RequestError::QueueFull(crate::error::QueueFull {
                capacity: self.queue.capacity(),
            }));
        }
        rx.await.unwrap_or(Err(RequestError::Cancelled))
    }

    // ---- outage handling ----

    fn enter_outage(self: &Arc<Self>, replay: Option<Request>, error: &RequestError, cancel: &CancellationToken) {
        {
            let mut phase = self.phase_lock();
            if cancel.is_cancelled() || !matches!(*phase, Phase::Active(_)) {
                debug!("Server error after the scheduler stopped: {}", error);
                return;
            }
            if let Phase::Active(run) = &*phase {
                run.root.cancel();
            }
            if let Some(request) = replay
                && self.queue.push_replay(request).is_err()
            {
                warn!("Failed request could not be re-queued");
            }
            for waiting in self.queue.take_waiting() {
                if let Some(reply) = waiting.reply {
                    let _ = reply.send(Err(error.clone()));
                }
            }

            let alive = CancellationToken::new();
            self.runtime
                .spawn(Arc::clone(self).check_alive(alive.clone()));
            *phase = Phase::Outage(alive);
        }

        warn!(
            "Remote service outage ({}); polling suspended, probing every {}s",
            error,
            self.alive_check_interval.as_secs()
        );
        if let Some(observer) = &self.observer {
            observer.outage(error);
        }
    }

    async fn check_alive(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = time::interval_at(
            Instant::now() + self.alive_check_interval,
            self.alive_check_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match self.executor.execute(&Request::list_systems()).await {
                Err(e) if e.is_server_error() || matches!(e, RequestError::Transport(_)) => {
                    debug!("Alive-check failed: {}", e);
                }
                outcome => {
                    if let Ok(body) = &outcome
                        && let Ok(systems) = decode::systems(body)
                    {
                        self.systems.merge_systems(&systems);
                    }
                    self.resume(&cancel);
                    return;
                }
            }
        }
    }

    fn resume(self: &Arc<Self>, alive: &CancellationToken) {
        {
            let mut phase = self.phase_lock();
            if alive.is_cancelled() || !matches!(*phase, Phase::Outage(_)) {
                return;
            }
            alive.cancel();
            *phase = self.start_run();
        }
        info!("Remote service reachable again; polling resumed");
        if let Some(observer) = &self.observer {
            observer.recovered();
        }
    }
}
