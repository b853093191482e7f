use crate::{
    cancel::CancelToken,
    config::MinerConfig,
    error::{Error, Result},
    hash::{increment_nonce, HashEngine, PowHash},
    job::Job,
    share::ShareSubmission,
    stratum::{
        rpc::{request::LoginParams, response::PoolMessage},
        Connector, Stratum,
    },
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use watch::WatchSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    LoggingIn,
    Mining,
}

/// What to do after a batch of pool messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Log in again, after the login backoff when `backoff` is set.
    Relogin { backoff: bool },
    Mine,
    Wait,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub submitted: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub relogins: u64,
    pub reconnects: u64,
}

pub type JobSender = Arc<WatchSender<Option<Arc<Job>>>>;

pub struct Session<C: Connector, H> {
    config: MinerConfig,
    connector: C,
    stratum: Option<Stratum<C::Transport>>,
    engine: HashEngine<H>,
    state: SessionState,
    job: Option<Job>,
    miner_id: Option<String>,
    seed: Option<Vec<u8>>,
    awaiting_ack: bool,
    reconnect_failures: u32,
    jobs: JobSender,
    stats: SessionStats,
}

impl<C: Connector, H: PowHash> Session<C, H> {
    pub fn new(config: MinerConfig, connector: C, hasher: H, jobs: JobSender) -> Self {
        let engine = HashEngine::new(hasher, config.check_interval);
        Self {
            config,
            connector,
            stratum: None,
            engine,
            state: SessionState::Disconnected,
            job: None,
            miner_id: None,
            seed: None,
            awaiting_ack: false,
            reconnect_failures: 0,
            jobs,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Drives the session until `cancel` fires. Only failures no reconnect
    /// or relogin can fix are returned.
    #[tracing::instrument(skip_all, fields(pool = %self.config.pool))]
    pub fn run(&mut self, cancel: &CancelToken) -> Result<()> {
        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }
            if let Err(e) = self.step(cancel) {
                break Err(e);
            }
        };
        self.disconnect();
        tracing::info!(
            submitted = self.stats.submitted,
            accepted = self.stats.accepted,
            rejected = self.stats.rejected,
            hashes = self.engine.total_hashes(),
            "session finished"
        );
        result
    }

    /// One turn of the loop: connect when disconnected, otherwise read and
    /// react to whatever the pool sent.
    pub fn step(&mut self, cancel: &CancelToken) -> Result<()> {
        let result = match self.state {
            SessionState::Disconnected => self.connect(),
            SessionState::LoggingIn | SessionState::Mining => self.poll(cancel),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => self.recover(e, cancel),
        }
    }

    fn connect(&mut self) -> Result<()> {
        let transport = self.connector.connect()?;
        self.stratum = Some(Stratum::new(transport));
        self.login()
    }

    fn login(&mut self) -> Result<()> {
        self.state = SessionState::LoggingIn;
        self.awaiting_ack = false;
        let params = LoginParams {
            login: self.config.login.clone(),
            pass: self.config.pass.clone(),
            rigid: self.config.rigid.clone(),
            agent: self.config.agent.clone(),
        };
        self.stratum_mut()?.login(params)
    }

    fn relogin(&mut self, backoff: bool, cancel: &CancelToken) -> Result<()> {
        self.stats.relogins += 1;
        if backoff && cancel.sleep(self.config.login_backoff) {
            return Ok(());
        }
        self.login()
    }

    fn poll(&mut self, cancel: &CancelToken) -> Result<()> {
        let messages = match self.stratum_mut()?.read_messages()? {
            Some(messages) => messages,
            None => return self.keep_alive_if_idle(),
        };
        match self.handle_messages(messages)? {
            Action::Relogin { backoff } => self.relogin(backoff, cancel),
            Action::Mine => self.mine(cancel),
            Action::Wait => Ok(()),
        }
    }

    /// Applies every message of one read in order. A relogin cuts the batch
    /// short; anything after it refers to the abandoned login.
    pub fn handle_messages(&mut self, messages: Vec<Value>) -> Result<Action> {
        let mut action = Action::Wait;
        for message in messages {
            let message = PoolMessage::classify(&message, self.miner_id.as_deref())?;
            match self.apply(message) {
                relogin @ Action::Relogin { .. } => return Ok(relogin),
                Action::Mine => action = Action::Mine,
                Action::Wait => {}
            }
        }
        Ok(action)
    }

    fn apply(&mut self, message: PoolMessage) -> Action {
        match message {
            PoolMessage::Error(error) => {
                if std::mem::take(&mut self.awaiting_ack) {
                    self.stats.rejected += 1;
                }
                tracing::warn!(code = error.code, "{}", error.message);
                Action::Relogin { backoff: true }
            }
            PoolMessage::LoginJob(job) => {
                tracing::info!("logged in as {}", job.miner_id);
                self.set_job(job);
                Action::Mine
            }
            PoolMessage::Job(job) => {
                tracing::info!("new job");
                self.set_job(job);
                Action::Mine
            }
            PoolMessage::Status(status) => {
                if std::mem::take(&mut self.awaiting_ack) {
                    self.stats.accepted += 1;
                    tracing::info!(status = %status, "accepted");
                } else {
                    tracing::debug!(status = %status, "status");
                }
                if self.state == SessionState::Mining && self.job.is_some() {
                    Action::Mine
                } else {
                    Action::Wait
                }
            }
            PoolMessage::Unexpected => {
                tracing::warn!("unexpected message, logging in again");
                Action::Relogin { backoff: false }
            }
        }
    }

    fn set_job(&mut self, job: Job) {
        tracing::info!(job_id = %job.job_id, target = job.target, "job");
        self.miner_id = Some(job.miner_id.clone());
        self.jobs.send(Some(Arc::new(job.clone())));
        self.job = Some(job);
        self.state = SessionState::Mining;
        self.reconnect_failures = 0;
    }

    /// Searches the current job. The pool is polled between hash batches:
    /// anything it sends abandons the search and is applied, so a pushed job
    /// takes over mid-search and acks resume the same blob.
    fn mine(&mut self, cancel: &CancelToken) -> Result<()> {
        loop {
            let Some(job) = self.job.as_mut() else {
                return Ok(());
            };
            let seed = job.seed.as_deref().unwrap_or(self.config.fallback_seed.as_slice());
            if self.seed.as_deref() != Some(seed) {
                self.engine.hasher_mut().reseed(seed)?;
                self.seed = Some(seed.to_vec());
            }

            let stratum = self.stratum.as_mut().ok_or(Error::Disconnected)?;
            let keepalive_interval = self.config.keepalive_interval;
            let miner_id = job.miner_id.clone();
            let mut incoming = Vec::new();
            let found = self
                .engine
                .search_with(&mut job.blob, job.target, cancel, || {
                    if let Some(messages) = stratum.poll_messages()? {
                        incoming = messages;
                        return Ok(true);
                    }
                    if stratum.idle_for() >= keepalive_interval {
                        stratum.keep_alive(&miner_id)?;
                    }
                    Ok(false)
                })?;

            if let Some(found) = found {
                let share = ShareSubmission::new(job, &found);
                tracing::info!(job_id = %job.job_id, nonce = %share.nonce, "share found");
                // A later ack resumes the search on a fresh nonce.
                increment_nonce(&mut job.blob);

                self.stratum_mut()?.submit(share)?;
                self.awaiting_ack = true;
                self.stats.submitted += 1;
                return Ok(());
            }
            if incoming.is_empty() {
                return Ok(());
            }
            match self.handle_messages(incoming)? {
                Action::Relogin { backoff } => return self.relogin(backoff, cancel),
                Action::Mine => {}
                Action::Wait => return Ok(()),
            }
        }
    }

    fn keep_alive_if_idle(&mut self) -> Result<()> {
        if self.state != SessionState::Mining {
            return Ok(());
        }
        let interval = self.config.keepalive_interval;
        let miner_id = self.miner_id.clone().unwrap_or_else(|| "0".into());
        let stratum = self.stratum_mut()?;
        if stratum.idle_for() >= interval {
            stratum.keep_alive(&miner_id)?;
        }
        Ok(())
    }

    fn recover(&mut self, err: Error, cancel: &CancelToken) -> Result<()> {
        if err.needs_relogin() {
            tracing::warn!(
                "{}; logging in again in {:?}",
                err,
                self.config.login_backoff
            );
            match self.relogin(true, cancel) {
                Err(e) if e.needs_reconnect() => self.reconnect_later(e, cancel),
                other => other,
            }
        } else if err.needs_reconnect() {
            self.reconnect_later(err, cancel)
        } else {
            Err(err)
        }
    }

    fn reconnect_later(&mut self, err: Error, cancel: &CancelToken) -> Result<()> {
        self.disconnect();
        self.reconnect_failures = self.reconnect_failures.saturating_add(1);
        self.stats.reconnects += 1;
        let delay = reconnect_delay(
            self.config.reconnect_backoff,
            self.config.max_reconnect_backoff,
            self.reconnect_failures,
        );
        tracing::warn!("{}; reconnecting in {:?}", err, delay);
        cancel.sleep(delay);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mut stratum) = self.stratum.take() {
            stratum.close();
        }
        self.state = SessionState::Disconnected;
        self.awaiting_ack = false;
    }

    fn stratum_mut(&mut self) -> Result<&mut Stratum<C::Transport>> {
        self.stratum.as_mut().ok_or(Error::Disconnected)
    }
}

/// Doubles `initial` for each consecutive failure after the first, capped at
/// `max`.
pub fn reconnect_delay(initial: Duration, max: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    initial.saturating_mul(1 << exponent).min(max)
}
