use crate::{
    component::{ComponentInfo, ComponentRegistry},
    config::MinerConfig,
    dat_file::{self, DAT_FILE, DEFAULT_PAYLOAD},
    error::Result,
    hash::{PowHash, RandomXHash},
    job::Job,
    policy::{AllowAll, RequestPolicy, ResourceKind},
    service::{Lifecycle, Service},
    session::{JobSender, Session},
    stratum::{Connector, TcpConnector},
    worker::Worker,
};
use std::{
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};
use watch::WatchReceiver;

/// Builds the hash function on the worker thread.
pub type HasherFactory = Arc<dyn Fn(&MinerConfig) -> Result<Box<dyn PowHash>> + Send + Sync>;

pub type JobWatch = WatchReceiver<Option<Arc<Job>>>;

struct MinerHooks<C> {
    config: MinerConfig,
    connector: C,
    hasher: HasherFactory,
    jobs: JobSender,
    worker: Option<Worker>,
}

impl<C: Connector + Clone + 'static> Lifecycle for MinerHooks<C> {
    fn init(&mut self) -> bool {
        if let Err(e) = self.config.validate() {
            tracing::error!("{e}");
            return false;
        }
        let config = self.config.clone();
        let connector = self.connector.clone();
        let hasher = self.hasher.clone();
        let jobs = self.jobs.clone();
        let spawned = Worker::spawn("pool-miner", config.cpu_core, move |cancel| {
            let hasher = match hasher(&config) {
                Ok(hasher) => hasher,
                Err(e) => {
                    tracing::error!("hash function unavailable: {e}");
                    return;
                }
            };
            let mut session = Session::new(config, connector, hasher, jobs);
            if let Err(e) = session.run(&cancel) {
                tracing::error!("mining stopped: {e}");
            }
        });
        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                true
            }
            Err(e) => {
                tracing::error!("{e}");
                false
            }
        }
    }

    fn cleanup(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

pub struct MiningClient<C: Connector + Clone + 'static = TcpConnector> {
    component: ComponentInfo,
    service: Service<MinerHooks<C>>,
    jobs: Mutex<JobWatch>,
    policy: Arc<dyn RequestPolicy>,
    aux_data: Mutex<Option<Vec<u8>>>,
}

impl MiningClient<TcpConnector> {
    /// Client for a real pool, hashing with RandomX.
    pub fn new(config: MinerConfig) -> Result<Self> {
        config.validate()?;
        let connector = TcpConnector {
            address: config.pool.clone(),
            tls: config.tls,
            read_timeout: config.read_timeout,
        };
        let hasher: HasherFactory = Arc::new(|config: &MinerConfig| -> Result<Box<dyn PowHash>> {
            let hasher = RandomXHash::new(&config.fallback_seed, config.light)?;
            Ok(Box::new(hasher))
        });
        Ok(Self::with_parts(config, connector, hasher))
    }
}

impl<C: Connector + Clone + 'static> MiningClient<C> {
    pub fn with_parts(config: MinerConfig, connector: C, hasher: HasherFactory) -> Self {
        let (tx, rx) = watch::channel(None);
        let component = config.component.clone();
        Self {
            component,
            service: Service::new(MinerHooks {
                config,
                connector,
                hasher,
                jobs: Arc::new(tx),
                worker: None,
            }),
            jobs: Mutex::new(rx),
            policy: Arc::new(AllowAll),
            aux_data: Mutex::new(None),
        }
    }

    /// Replaces the allow-all request policy.
    pub fn with_policy(mut self, policy: Arc<dyn RequestPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// See [`Service::start`]: `true` means it was already running.
    pub fn start(&self) -> bool {
        self.service.start()
    }

    pub fn stop(&self) {
        self.service.stop();
    }

    pub fn is_initialized(&self) -> bool {
        self.service.is_initialized()
    }

    /// Whether the worker thread is alive. It exits on its own only when the
    /// hash function cannot be built or fails outright.
    pub fn is_mining(&self) -> bool {
        self.service
            .with_hooks(|hooks| hooks.worker.as_ref().is_some_and(|w| !w.is_finished()))
    }

    /// Receiver for the current job, updated whenever the pool sends one.
    pub fn job_watch(&self) -> JobWatch {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn aux_data(&self) -> Option<Vec<u8>> {
        self.aux_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Registers with the host's component updater. The client starts once
    /// the component is ready.
    pub fn register(self: &Arc<Self>, registry: Arc<dyn ComponentRegistry>) -> Result<()> {
        let on_registered = {
            let client = Arc::downgrade(self);
            let registry = Arc::downgrade(&registry);
            Box::new(move || {
                if let (Some(client), Some(registry)) = (client.upgrade(), registry.upgrade()) {
                    client.on_component_registered(registry.as_ref());
                }
            })
        };
        let on_ready = {
            let client = Arc::downgrade(self);
            Box::new(move |install_dir: &Path| {
                if let Some(client) = client.upgrade() {
                    client.on_component_ready(install_dir);
                }
            })
        };
        registry.register(
            &self.component.name,
            &self.component.public_key,
            on_registered,
            on_ready,
        )
    }

    pub fn on_component_registered(&self, registry: &dyn ComponentRegistry) {
        tracing::info!(id = %self.component.id, "component registered");
        registry.request_update(&self.component.id);
    }

    pub fn on_component_ready(&self, install_dir: &Path) {
        tracing::info!(id = %self.component.id, dir = %install_dir.display(), "component ready");
        match dat_file::read_or_init(&install_dir.join(DAT_FILE), DEFAULT_PAYLOAD) {
            Ok(data) => {
                *self.aux_data.lock().unwrap_or_else(PoisonError::into_inner) = Some(data);
            }
            Err(e) => tracing::error!("could not load {DAT_FILE}: {e}"),
        }
        if self.start() {
            tracing::debug!("already running");
        }
    }
}

impl<C: Connector + Clone + 'static> RequestPolicy for MiningClient<C> {
    fn should_allow(&self, url: &str, resource_kind: ResourceKind, tab_host: &str) -> bool {
        self.policy.should_allow(url, resource_kind, tab_host)
    }
}

impl<C: Connector + Clone + 'static> Drop for MiningClient<C> {
    fn drop(&mut self) {
        self.service.stop();
    }
}
