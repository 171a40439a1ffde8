use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ControllerSettings, StreamConfig};
use crate::engine::{Stats, StreamEngine};
use crate::errors::{Result, StreamError};

const EVENT_CAPACITY: usize = 64;

/// `Idle → Connecting → Connected → Stopping → Idle`, plus the error edges
/// `Connecting → Idle` and `Connected → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamStatus {
    Idle,
    Connecting,
    Connected,
    Stopping,
}

/// Snapshot of the controller's session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSession {
    pub status: StreamStatus,
    pub last_stats: Option<Stats>,
}

/// Pushed to subscribers as the session evolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Connected,
    Stats(Stats),
    Disconnected,
    Error(String),
}

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct SessionState {
    status: StreamStatus,
    last_stats: Option<Stats>,
    config: Option<StreamConfig>,
    /// Bumped on every start so a stale poll task can recognise it is stale
    generation: u64,
    poll: Option<PollTask>,
}

impl SessionState {
    fn reset(&mut self) -> Option<PollTask> {
        self.status = StreamStatus::Idle;
        self.last_stats = None;
        self.config = None;
        self.poll.take()
    }
}

struct Shared {
    session: Mutex<SessionState>,
    events: broadcast::Sender<StreamEvent>,
}

impl Shared {
    fn emit(&self, event: StreamEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Store a poll result; false once the session it belongs to has ended
    fn record_stats(&self, generation: u64, stats: Stats) -> bool {
        let mut session = self.session.lock();
        if session.generation != generation || session.status != StreamStatus::Connected {
            return false;
        }
        session.last_stats = Some(stats);
        true
    }

    /// Error edge `Connected → Idle`, taken by the poll task
    fn fail(&self, generation: u64, reason: String) {
        let detached = {
            let mut session = self.session.lock();
            if session.generation != generation || session.status != StreamStatus::Connected {
                return;
            }
            session.reset()
        };
        if let Some(poll) = detached {
            poll.cancel.cancel();
        }
        error!(generation, "Stream session lost: {}", reason);
        self.emit(StreamEvent::Error(reason));
        self.emit(StreamEvent::Disconnected);
    }
}

/// Start/stop/poll state machine around an injected [`StreamEngine`]
pub struct StreamingController {
    engine: Arc<dyn StreamEngine>,
    settings: ControllerSettings,
    shared: Arc<Shared>,
    /// Serializes start and stop so neither observes the other half-done
    gate: tokio::sync::Mutex<()>,
}

impl StreamingController {
    pub fn new(engine: Arc<dyn StreamEngine>) -> Self {
        Self::with_settings(engine, ControllerSettings::default())
    }

    pub fn with_settings(engine: Arc<dyn StreamEngine>, settings: ControllerSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            engine,
            settings,
            shared: Arc::new(Shared {
                session: Mutex::new(SessionState {
                    status: StreamStatus::Idle,
                    last_stats: None,
                    config: None,
                    generation: 0,
                    poll: None,
                }),
                events,
            }),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn status(&self) -> StreamStatus {
        self.shared.session.lock().status
    }

    pub fn session(&self) -> StreamSession {
        let session = self.shared.session.lock();
        StreamSession {
            status: session.status,
            last_stats: session.last_stats,
        }
    }

    /// Configuration of the running session
    pub fn active_config(&self) -> Option<StreamConfig> {
        self.shared.session.lock().config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.events.subscribe()
    }

    /// Validate `config`, start the engine and begin polling its stats
    #[instrument(skip(self))]
    pub async fn start_stream(&self, config: StreamConfig) -> Result<bool> {
        config.validate()?;

        let _gate = self.gate.lock().await;
        let generation = {
            let mut session = self.shared.session.lock();
            if session.status != StreamStatus::Idle {
                debug!(status = ?session.status, "Start rejected");
                return Err(StreamError::AlreadyActive);
            }
            session.status = StreamStatus::Connecting;
            session.config = Some(config);
            session.last_stats = None;
            session.generation += 1;
            session.generation
        };
        info!(generation, "Starting stream session");

        let engine = Arc::clone(&self.engine);
        let mut task = tokio::task::spawn_blocking(move || engine.start(&config));
        let mut late_start = None;
        let outcome = tokio::time::timeout(self.settings.start_timeout, &mut task).await;
        let started = match outcome {
            Ok(joined) => flatten_join("start", joined).and_then(|accepted| {
                if accepted {
                    Ok(())
                } else {
                    Err(anyhow!("engine refused to start"))
                }
            }),
            Err(_) => {
                late_start = Some(task);
                Err(anyhow!(
                    "engine start timed out after {:?}",
                    self.settings.start_timeout
                ))
            }
        };

        if let Err(source) = started {
            self.shared.session.lock().reset();
            if let Some(task) = late_start {
                self.stop_late_start(generation, task);
            }
            warn!(generation, "Engine failed to start: {:#}", source);
            self.shared.emit(StreamEvent::Error(format!("{source:#}")));
            return Err(StreamError::Engine { source });
        }

        {
            // The poll task cannot look at the session until this lock is released.
            let mut session = self.shared.session.lock();
            session.status = StreamStatus::Connected;
            session.poll = Some(self.spawn_poll(generation));
        }

        info!(generation, "Stream session connected");
        self.shared.emit(StreamEvent::Connected);
        Ok(true)
    }

    /// Most recent stats of the connected session
    pub fn get_stats(&self) -> Result<Stats> {
        let session = self.shared.session.lock();
        if session.status != StreamStatus::Connected {
            return Err(StreamError::NotActive);
        }
        Ok(session.last_stats.unwrap_or_default())
    }

    /// Stop the session. The controller always ends `Idle`; the return value
    /// is the engine's own verdict on the stop.
    #[instrument(skip(self))]
    pub async fn stop_stream(&self) -> bool {
        let _gate = self.gate.lock().await;
        let poll = {
            let mut session = self.shared.session.lock();
            if session.status == StreamStatus::Idle {
                debug!("Stop requested with no active session");
                return false;
            }
            session.status = StreamStatus::Stopping;
            session.poll.take()
        };

        if let Some(mut poll) = poll {
            poll.cancel.cancel();
            match tokio::time::timeout(self.settings.poll_interval, &mut poll.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Stats poll ended abnormally: {}", e),
                Err(_) => {
                    warn!("Stats poll did not wind down, aborting it");
                    poll.handle.abort();
                }
            }
        }

        let engine = Arc::clone(&self.engine);
        let stopped = match run_engine_call(self.settings.stop_timeout, "stop", move || engine.stop()).await {
            Ok(true) => true,
            Ok(false) => {
                warn!("Engine reported an unsuccessful stop");
                false
            }
            Err(e) => {
                warn!("Engine stop failed: {:#}", e);
                false
            }
        };

        self.shared.session.lock().reset();
        info!(engine_stopped = stopped, "Stream session stopped");
        self.shared.emit(StreamEvent::Disconnected);
        stopped
    }

    /// Stop any active session; used on application teardown
    pub async fn shutdown(&self) {
        if self.status() != StreamStatus::Idle {
            self.stop_stream().await;
        }
    }

    /// A start that outlived its deadline may still succeed. Stop the engine
    /// once it does, unless a newer session has begun in the meantime.
    fn stop_late_start(&self, generation: u64, task: JoinHandle<anyhow::Result<bool>>) {
        let engine = Arc::clone(&self.engine);
        let shared = Arc::clone(&self.shared);
        let stop_timeout = self.settings.stop_timeout;
        tokio::spawn(async move {
            if !matches!(task.await, Ok(Ok(true))) {
                return;
            }
            {
                let session = shared.session.lock();
                if session.generation != generation || session.status != StreamStatus::Idle {
                    debug!(generation, "Late engine start belongs to a superseded session");
                    return;
                }
            }
            warn!(generation, "Engine finished starting after its deadline, stopping it");
            if let Err(e) = run_engine_call(stop_timeout, "stop", move || engine.stop()).await {
                warn!(generation, "Stopping the late-started engine failed: {:#}", e);
            }
        });
    }

    fn spawn_poll(&self, generation: u64) -> PollTask {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.engine),
            Arc::clone(&self.shared),
            self.settings.clone(),
            generation,
            cancel.clone(),
        ));
        PollTask { cancel, handle }
    }
}

impl Drop for StreamingController {
    fn drop(&mut self) {
        if let Some(poll) = self.shared.session.lock().poll.take() {
            poll.cancel.cancel();
            poll.handle.abort();
        }
    }
}

async fn poll_loop(
    engine: Arc<dyn StreamEngine>,
    shared: Arc<Shared>,
    settings: ControllerSettings,
    generation: u64,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let reader = Arc::clone(&engine);
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = run_engine_call(settings.poll_interval, "stats", move || reader.stats()) => read,
        };
        if cancel.is_cancelled() {
            break;
        }

        match read {
            Ok(stats) => {
                consecutive_failures = 0;
                if !shared.record_stats(generation, stats) {
                    break;
                }
                shared.emit(StreamEvent::Stats(stats));
            }
            Err(e) => {
                consecutive_failures += 1;
                debug!(consecutive_failures, "Stats read failed: {:#}", e);

                let checker = Arc::clone(&engine);
                let running = tokio::select! {
                    _ = cancel.cancelled() => break,
                    checked = run_engine_call(settings.poll_interval, "is_running", move || {
                        Ok(checker.is_running())
                    }) => checked,
                };
                // An unanswered liveness check proves nothing; the failure streak decides.
                let running = running.unwrap_or_else(|e| {
                    debug!("Engine liveness check failed: {:#}", e);
                    true
                });

                if !running {
                    shared.fail(generation, "engine is no longer running".to_string());
                    break;
                }
                if consecutive_failures >= settings.max_consecutive_poll_failures {
                    shared.fail(
                        generation,
                        format!("{consecutive_failures} consecutive stats reads failed: {e:#}"),
                    );
                    break;
                }
            }
        }
    }
    debug!(generation, "Stats poll finished");
}

/// Run a blocking engine call with a deadline, flattening panics and
/// timeouts into errors
async fn run_engine_call<T, F>(deadline: Duration, operation: &'static str, call: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    match tokio::time::timeout(deadline, tokio::task::spawn_blocking(call)).await {
        Ok(joined) => flatten_join(operation, joined),
        Err(_) => Err(anyhow!("engine {operation} timed out after {deadline:?}")),
    }
}

fn flatten_join<T>(
    operation: &'static str,
    joined: std::result::Result<anyhow::Result<T>, JoinError>,
) -> anyhow::Result<T> {
    joined.unwrap_or_else(|join| Err(anyhow!("engine {operation} panicked: {join}")))
}
