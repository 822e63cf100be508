use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use conduit_dns_application::ports::{MessagePipeline, ResponseSink};
use conduit_dns_domain::{ConnConfig, ForwardConfig, ForwardError};
use hickory_proto::op::Message;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::pipe::{Pipe, PipeTimeouts};

/// Total time the driver spends trying to admit one request.
const ADMISSION_DEADLINE: Duration = Duration::from_millis(500);

/// Pause between admission attempts while the pool warms up.
const ADMISSION_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Default)]
struct LoadingCounters {
    primary: usize,
    secondary: usize,
}

/// The connection pool. Maintains Ready pipes over the configured
/// upstreams, admits each request to a uniformly random pipe, reissues
/// requests bounced by a draining pipe, and lazily refills the pool on
/// demand. Primary pipes always dial `upstreams[0]`; secondary pipes
/// spread over the rest.
pub struct PipeDriver {
    me: Weak<PipeDriver>,
    upstreams: Vec<ConnConfig>,
    primary_limit: usize,
    secondary_limit: usize,
    timeouts: PipeTimeouts,
    pipes: RwLock<Vec<Arc<Pipe>>>,
    loading: Mutex<LoadingCounters>,
}

impl std::fmt::Debug for PipeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeDriver").finish_non_exhaustive()
    }
}

impl PipeDriver {
    /// Builds an empty driver; nothing is dialed until the first request
    /// arrives. At least one upstream is required.
    pub fn new(
        upstreams: Vec<ConnConfig>,
        config: &ForwardConfig,
    ) -> Result<Arc<Self>, ForwardError> {
        if upstreams.is_empty() {
            return Err(ForwardError::Config(
                "at least one upstream is required".to_string(),
            ));
        }

        info!(
            upstreams = upstreams.len(),
            primary_limit = config.primary_pipes,
            secondary_limit = config.secondary_pipes,
            "pipe driver initialized"
        );

        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            upstreams,
            primary_limit: config.primary_pipes,
            secondary_limit: config.secondary_pipes,
            timeouts: PipeTimeouts::from(config),
            pipes: RwLock::new(Vec::new()),
            loading: Mutex::new(LoadingCounters::default()),
        }))
    }

    /// Number of Ready pipes currently in the pool.
    pub fn ready_pipes(&self) -> usize {
        self.pipes.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn spawn_pipe(&self, primary: bool) {
        if let Some(me) = self.me.upgrade() {
            Pipe::spawn(
                &me,
                primary,
                self.select_upstream(primary),
                self.timeouts.clone(),
            );
        }
    }

    fn select_upstream(&self, primary: bool) -> ConnConfig {
        if primary || self.upstreams.len() == 1 {
            return self.upstreams[0].clone();
        }
        self.upstreams[fastrand::usize(1..self.upstreams.len())].clone()
    }

    /// Lazily grows the pool. Called with the pipes read guard held so
    /// the Ready counts cannot shift under the loading counters.
    /// Lock order: pipes, then loading.
    fn load_pipes(&self, ready: &[Arc<Pipe>]) {
        let mut loading = self.loading.lock().unwrap_or_else(|e| e.into_inner());
        let primary = ready.iter().filter(|p| p.is_primary()).count();
        let secondary = ready.len() - primary;

        if primary == 0 {
            // Cold start: ramp both classes to their limits at once.
            let spawn_primary = self.primary_limit.saturating_sub(loading.primary);
            for _ in 0..spawn_primary {
                self.spawn_pipe(true);
                loading.primary += 1;
            }
            let spawn_secondary = self
                .secondary_limit
                .saturating_sub(secondary + loading.secondary);
            for _ in 0..spawn_secondary {
                self.spawn_pipe(false);
                loading.secondary += 1;
            }
            if spawn_primary + spawn_secondary > 0 {
                debug!(
                    primary = spawn_primary,
                    secondary = spawn_secondary,
                    "loading pipes"
                );
            }
        } else {
            // Steady state: only top up the primary class.
            let spawn_primary = self
                .primary_limit
                .saturating_sub(primary + loading.primary);
            for _ in 0..spawn_primary {
                self.spawn_pipe(true);
                loading.primary += 1;
            }
            if spawn_primary > 0 {
                debug!(primary = spawn_primary, "topping up primary pipes");
            }
        }
    }

    /// Called by a pipe once its dial succeeded and both loops are live.
    /// Only after this returns is the pipe eligible for selection.
    pub(super) fn pipe_ready(&self, pipe: Arc<Pipe>) {
        debug!(pipe = pipe.id(), primary = pipe.is_primary(), "pipe ready");
        let mut pipes = self.pipes.write().unwrap_or_else(|e| e.into_inner());
        let mut loading = self.loading.lock().unwrap_or_else(|e| e.into_inner());
        if pipe.is_primary() {
            loading.primary = loading.primary.saturating_sub(1);
        } else {
            loading.secondary = loading.secondary.saturating_sub(1);
        }
        pipes.push(pipe);
    }

    /// Called when a dial fails; a same-class replacement keeps the
    /// in-flight target stable.
    pub(super) fn pipe_init_failed(&self, pipe: &Pipe) {
        debug!(pipe = pipe.id(), "pipe init failed, spawning replacement");
        self.spawn_pipe(pipe.is_primary());
    }

    /// Removes a draining pipe from the Ready pool. Calling twice has
    /// the same effect as once.
    pub(super) fn remove_pipe(&self, pipe: &Pipe) {
        let mut pipes = self.pipes.write().unwrap_or_else(|e| e.into_inner());
        if let Some(idx) = pipes.iter().position(|p| p.id() == pipe.id()) {
            debug!(pipe = pipe.id(), "pipe removed from pool");
            pipes.remove(idx);
        }
    }
}

#[async_trait]
impl MessagePipeline for PipeDriver {
    /// Admits the query to a random Ready pipe, retrying while pipes
    /// drain or the pool warms up, and writes the response through the
    /// sink. Everything except `WriteNotReady` is terminal.
    async fn process(
        &self,
        query: &mut Message,
        sink: &dyn ResponseSink,
    ) -> Result<(), ForwardError> {
        let deadline = Instant::now() + ADMISSION_DEADLINE;

        loop {
            let selected = {
                let pipes = self.pipes.read().unwrap_or_else(|e| e.into_inner());
                if pipes.is_empty() {
                    self.load_pipes(&pipes);
                    None
                } else {
                    Some(Arc::clone(&pipes[fastrand::usize(..pipes.len())]))
                }
            };

            let Some(pipe) = selected else {
                if Instant::now() < deadline {
                    debug!("no pipe available, retrying");
                    sleep(ADMISSION_RETRY_DELAY).await;
                    continue;
                }
                warn!("admission deadline exceeded");
                return Err(ForwardError::NoPipeAvailable);
            };

            match pipe.process(query).await {
                Ok(response) => return sink.write(response).await,
                Err(e) if e.is_retryable() => {
                    debug!(pipe = pipe.id(), "pipe bounced request, reissuing");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
