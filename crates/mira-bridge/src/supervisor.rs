//! Sidecar process supervision.
//!
//! One supervisor owns at most one child process. Every start allocates a
//! fresh gateway port, rebuilds the environment from a settings snapshot,
//! spawns the child with piped stdio, and polls `/health` until the agent
//! reports ready. Unexpected exits and memory-limit breaches feed the
//! restart loop, which backs off exponentially and gives up after a bounded
//! number of consecutive failures.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mira_wire::{BridgeError, GatewayHealth, LifecycleEvent, Result, SidecarState, SidecarStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::env::EnvironmentDescriptor;
use crate::metrics::ProcessMetrics;
use crate::ports::PortAllocator;
use crate::settings::SettingsProvider;

/// Spawn target plus the supervision timings. Defaults match the production
/// sidecar; tests shrink them.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub health_poll_interval: Duration,
    pub health_deadline: Duration,
    pub exit_poll_interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_cap: Duration,
    pub max_restart_attempts: u32,
    pub watchdog_interval: Duration,
    pub memory_limit_bytes: u64,
    pub stop_grace: Duration,
    pub restart_pause: Duration,
}

impl SupervisorConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            health_poll_interval: Duration::from_secs(2),
            health_deadline: Duration::from_secs(30),
            exit_poll_interval: Duration::from_secs(1),
            backoff_initial: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(30_000),
            max_restart_attempts: 5,
            watchdog_interval: Duration::from_secs(60),
            memory_limit_bytes: 512 * 1024 * 1024,
            stop_grace: Duration::from_secs(5),
            restart_pause: Duration::from_millis(500),
        }
    }
}

/// Exponential backoff with a cap. `take` returns the delay to use now and
/// advances; `reset` rewinds to the initial delay after a successful start.
struct BackoffState {
    next_delay: Duration,
    initial: Duration,
    cap: Duration,
}

impl BackoffState {
    fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            next_delay: initial,
            initial,
            cap,
        }
    }

    fn take(&mut self) -> Duration {
        let delay = self.next_delay;
        self.next_delay = (delay * 2).min(self.cap);
        delay
    }

    fn reset(&mut self) {
        self.next_delay = self.initial;
    }
}

pub struct ProcessSupervisor {
    config: SupervisorConfig,
    settings: Arc<dyn SettingsProvider>,
    metrics: Arc<dyn ProcessMetrics>,
    http: reqwest::Client,

    state: RwLock<SidecarState>,
    // Serializes start/stop/restart so overlapping callers cannot race a
    // second child into existence.
    lifecycle_lock: Mutex<()>,
    child: Mutex<Option<Child>>,
    gateway_port: RwLock<u16>,
    callback_port: RwLock<u16>,
    started_at: RwLock<Option<Instant>>,
    last_error: RwLock<Option<String>>,

    backoff: Mutex<BackoffState>,
    restart_attempts: AtomicU32,
    intentionally_stopped: AtomicBool,
    watchdog_restart_pending: AtomicBool,

    restart_task: Mutex<Option<JoinHandle<()>>>,
    watchdog_task: Mutex<Option<JoinHandle<()>>>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,

    events: broadcast::Sender<LifecycleEvent>,
}

impl ProcessSupervisor {
    pub fn new(
        config: SupervisorConfig,
        settings: Arc<dyn SettingsProvider>,
        metrics: Arc<dyn ProcessMetrics>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let backoff = BackoffState::new(config.backoff_initial, config.backoff_cap);
        Self {
            config,
            settings,
            metrics,
            http: reqwest::Client::new(),
            state: RwLock::new(SidecarState::Stopped),
            lifecycle_lock: Mutex::new(()),
            child: Mutex::new(None),
            gateway_port: RwLock::new(0),
            callback_port: RwLock::new(0),
            started_at: RwLock::new(None),
            last_error: RwLock::new(None),
            backoff: Mutex::new(backoff),
            restart_attempts: AtomicU32::new(0),
            intentionally_stopped: AtomicBool::new(false),
            watchdog_restart_pending: AtomicBool::new(false),
            restart_task: Mutex::new(None),
            watchdog_task: Mutex::new(None),
            monitor_task: Mutex::new(None),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> SidecarStatus {
        SidecarStatus {
            state: *self.state.read().await,
            gateway_port: *self.gateway_port.read().await,
            uptime_seconds: self
                .started_at
                .read()
                .await
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0),
            last_error: self.last_error.read().await.clone(),
        }
    }

    /// Start the sidecar and wait until it is healthy. Returns the gateway
    /// port. A failed start emits `Error` and feeds the restart loop.
    pub async fn start(self: &Arc<Self>, callback_port: u16) -> Result<u16> {
        self.cancel_pending_restart().await;
        self.intentionally_stopped.store(false, Ordering::SeqCst);
        self.start_inner(callback_port).await
    }

    // Restart tasks re-enter this path, so the recursive future has to be
    // boxed behind `dyn` instead of living in the opaque async type.
    fn start_inner(
        self: &Arc<Self>,
        callback_port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + 'static>> {
        let supervisor = Arc::clone(self);
        Box::pin(async move { supervisor.start_inner_impl(callback_port).await })
    }

    async fn start_inner_impl(self: &Arc<Self>, callback_port: u16) -> Result<u16> {
        let _guard = self.lifecycle_lock.lock().await;

        // Tear down any previous incarnation quietly; the only state change
        // observers see is Starting.
        self.abort_task(&self.monitor_task).await;
        self.abort_task(&self.watchdog_task).await;
        self.terminate_child().await;

        self.set_state(SidecarState::Starting).await;
        *self.callback_port.write().await = callback_port;

        match self.spawn_and_wait_healthy(callback_port).await {
            Ok(gateway_port) => {
                *self.gateway_port.write().await = gateway_port;
                *self.started_at.write().await = Some(Instant::now());
                self.backoff.lock().await.reset();
                self.restart_attempts.store(0, Ordering::SeqCst);
                self.set_state(SidecarState::Connected).await;
                self.publish(LifecycleEvent::Ready { port: gateway_port });
                self.spawn_exit_monitor().await;
                self.spawn_watchdog().await;
                Ok(gateway_port)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!("Sidecar start failed: {message}");
                self.terminate_child().await;
                *self.started_at.write().await = None;
                *self.gateway_port.write().await = 0;
                *self.last_error.write().await = Some(message.clone());
                self.set_state(SidecarState::Error).await;
                self.publish(LifecycleEvent::Error { message });
                self.schedule_restart().await;
                Err(e)
            }
        }
    }

    /// Stop the sidecar and park in `Stopped`. Safe from any state; cancels
    /// any pending restart so nothing revives the process afterwards.
    pub async fn stop(&self) {
        self.intentionally_stopped.store(true, Ordering::SeqCst);
        self.cancel_pending_restart().await;
        let _guard = self.lifecycle_lock.lock().await;
        self.abort_task(&self.monitor_task).await;
        self.abort_task(&self.watchdog_task).await;
        self.terminate_child().await;
        *self.started_at.write().await = None;
        *self.gateway_port.write().await = 0;
        self.set_state(SidecarState::Stopped).await;
        self.publish(LifecycleEvent::Stopped);
    }

    /// Stop, pause briefly so the old process releases its resources, start.
    pub async fn restart(self: &Arc<Self>) -> Result<u16> {
        let callback_port = *self.callback_port.read().await;
        self.stop().await;
        tokio::time::sleep(self.config.restart_pause).await;
        self.start(callback_port).await
    }

    /// Restart cycle driven by the memory watchdog. Unlike `restart` this
    /// never touches `intentionally_stopped`, so a concurrent `stop()` wins:
    /// it either aborts the task outright or is seen by the flag check after
    /// the pause, and the child is not revived.
    async fn restart_after_overage(self: &Arc<Self>) -> Result<()> {
        let callback_port = *self.callback_port.read().await;
        {
            let _guard = self.lifecycle_lock.lock().await;
            self.abort_task(&self.monitor_task).await;
            self.abort_task(&self.watchdog_task).await;
            self.terminate_child().await;
            *self.started_at.write().await = None;
            *self.gateway_port.write().await = 0;
            self.set_state(SidecarState::Restarting).await;
            self.publish(LifecycleEvent::Stopped);
        }
        tokio::time::sleep(self.config.restart_pause).await;
        if self.intentionally_stopped.load(Ordering::SeqCst) {
            tracing::info!("Skipping watchdog restart, sidecar was stopped intentionally");
            return Ok(());
        }
        self.start_inner(callback_port).await?;
        Ok(())
    }

    pub(crate) fn publish(&self, event: LifecycleEvent) {
        let _ = self.events.send(event);
    }

    async fn set_state(&self, state: SidecarState) {
        *self.state.write().await = state;
    }

    async fn abort_task(&self, slot: &Mutex<Option<JoinHandle<()>>>) {
        if let Some(task) = slot.lock().await.take() {
            task.abort();
        }
    }

    async fn cancel_pending_restart(&self) {
        self.abort_task(&self.restart_task).await;
    }

    async fn spawn_and_wait_healthy(self: &Arc<Self>, callback_port: u16) -> Result<u16> {
        let gateway_port = PortAllocator::allocate().await?;
        let settings = self.settings.snapshot().await?;
        let env = EnvironmentDescriptor::build(&settings, callback_port, gateway_port);

        tracing::info!(
            "Starting sidecar {:?} (gateway port {gateway_port}, callback port {callback_port})",
            self.config.program
        );
        tracing::debug!("Sidecar environment: {env:?}");

        let mut command = tokio::process::Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        env.apply(&mut command);

        let mut child = command.spawn().map_err(|e| {
            BridgeError::Spawn(format!("{}: {e}", self.config.program.display()))
        })?;
        self.drain_output(&mut child);
        *self.child.lock().await = Some(child);

        self.wait_healthy(gateway_port).await?;
        Ok(gateway_port)
    }

    /// Pipe child stdout/stderr into the log. Output must always be drained
    /// or the child blocks once the pipe buffer fills.
    fn drain_output(&self, child: &mut Child) {
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::info!(target: "sidecar", "{line}");
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(target: "sidecar", "{line}");
                }
            });
        }
    }

    async fn wait_healthy(&self, gateway_port: u16) -> Result<()> {
        let url = format!("http://127.0.0.1:{gateway_port}/health");
        let deadline = Instant::now() + self.config.health_deadline;
        loop {
            // A child that died during startup will never become healthy;
            // fail fast instead of burning the whole deadline.
            if let Some(child) = self.child.lock().await.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(BridgeError::ProcessExitedEarly(format!(
                        "exit status {status} before first healthy response"
                    )));
                }
            }

            let probe = self
                .http
                .get(&url)
                .timeout(self.config.health_poll_interval)
                .send()
                .await;
            if let Ok(response) = probe {
                if response.status().is_success() {
                    if let Ok(health) = response.json::<GatewayHealth>().await {
                        if health.is_ok() {
                            tracing::info!("Sidecar healthy on port {gateway_port}");
                            return Ok(());
                        }
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(BridgeError::HealthTimeout(format!(
                    "no healthy response within {:?}",
                    self.config.health_deadline
                )));
            }
            tokio::time::sleep(self.config.health_poll_interval).await;
        }
    }

    /// Schedule the next restart cycle, or park in `Error` once the attempt
    /// budget is spent. A successful start resets the budget.
    async fn schedule_restart(self: &Arc<Self>) {
        if self.intentionally_stopped.load(Ordering::SeqCst) {
            return;
        }
        let attempt = self.restart_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.config.max_restart_attempts {
            let message = format!(
                "Sidecar failed {} consecutive restarts; giving up until restarted manually",
                self.config.max_restart_attempts
            );
            tracing::error!("{message}");
            *self.last_error.write().await = Some(message.clone());
            self.set_state(SidecarState::Error).await;
            self.publish(LifecycleEvent::Error { message });
            return;
        }

        let delay = self.backoff.lock().await.take();
        tracing::warn!(
            "Restarting sidecar in {delay:?} (attempt {attempt}/{})",
            self.config.max_restart_attempts
        );
        self.set_state(SidecarState::Restarting).await;
        self.publish(LifecycleEvent::Restarting {
            backoff_ms: delay.as_millis() as u64,
        });

        let supervisor = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if supervisor.intentionally_stopped.load(Ordering::SeqCst) {
                return;
            }
            let callback_port = *supervisor.callback_port.read().await;
            // start_inner reschedules on failure, so errors need no handling
            // beyond what it already does.
            let _ = supervisor.start_inner(callback_port).await;
        });
        *self.restart_task.lock().await = Some(task);
    }

    /// Watch for the child exiting on its own.
    async fn spawn_exit_monitor(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(supervisor.config.exit_poll_interval).await;
                let exit = {
                    let mut child = supervisor.child.lock().await;
                    match child.as_mut() {
                        None => return,
                        Some(c) => match c.try_wait() {
                            Ok(Some(status)) => {
                                child.take();
                                Some(status)
                            }
                            Ok(None) => None,
                            Err(e) => {
                                tracing::warn!("Exit poll failed: {e}");
                                None
                            }
                        },
                    }
                };
                if let Some(status) = exit {
                    if supervisor.intentionally_stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    let message = format!("Sidecar exited unexpectedly with {status}");
                    tracing::error!("{message}");
                    *supervisor.started_at.write().await = None;
                    *supervisor.last_error.write().await = Some(message.clone());
                    supervisor.set_state(SidecarState::Error).await;
                    supervisor.publish(LifecycleEvent::Error { message });
                    supervisor.schedule_restart().await;
                    return;
                }
            }
        });
        *self.monitor_task.lock().await = Some(task);
    }

    /// Periodically sample RSS and restart once if the limit is breached.
    /// `watchdog_restart_pending` keeps overlapping breaches from stacking
    /// restarts.
    async fn spawn_watchdog(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(supervisor.config.watchdog_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let pid = supervisor.child.lock().await.as_ref().and_then(|c| c.id());
                let Some(pid) = pid else { return };
                match supervisor.metrics.rss_bytes(pid).await {
                    Ok(rss) if rss > supervisor.config.memory_limit_bytes => {
                        if supervisor
                            .watchdog_restart_pending
                            .swap(true, Ordering::SeqCst)
                        {
                            continue;
                        }
                        tracing::warn!(
                            "Sidecar RSS {rss} bytes exceeds limit {} bytes, restarting",
                            supervisor.config.memory_limit_bytes
                        );
                        let restarter = Arc::clone(&supervisor);
                        let restart = tokio::spawn(async move {
                            let result = restarter.restart_after_overage().await;
                            restarter
                                .watchdog_restart_pending
                                .store(false, Ordering::SeqCst);
                            if let Err(e) = result {
                                tracing::error!("Memory watchdog restart failed: {e}");
                            }
                        });
                        // Parked in the same slot as backoff restarts so that
                        // stop() and a manual start() can cancel it.
                        *supervisor.restart_task.lock().await = Some(restart);
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("Memory probe failed for pid {pid}: {e}"),
                }
            }
        });
        *self.watchdog_task.lock().await = Some(task);
    }

    /// SIGTERM first, SIGKILL after the grace period.
    async fn terminate_child(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
        match tokio::time::timeout(self.config.stop_grace, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("Sidecar ignored the termination signal, killing");
                let _ = child.kill().await;
            }
        }
    }
}
