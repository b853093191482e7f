pub mod cancel;
pub mod codec;
pub mod component;
pub mod config;
pub mod dat_file;
pub mod error;
pub mod hash;
pub mod job;
pub mod miner;
pub mod policy;
pub mod service;
pub mod session;
pub mod share;
pub mod stratum;
pub mod worker;

// Re-export main types for easy access
pub use cancel::CancelToken;
pub use component::{ComponentInfo, ComponentRegistry, InstallDirRegistry};
pub use config::{MinerConfig, PoolAddress};
pub use error::{Error, Result};
pub use hash::{HashEngine, HashResult, PowHash, RandomXHash};
pub use job::Job;
pub use miner::MiningClient;
pub use policy::{AllowAll, RequestPolicy, RequestThrottle, ResourceKind, Verdict};
pub use service::{Lifecycle, Service, ServiceState};
pub use session::{Session, SessionState};
pub use share::ShareSubmission;
pub use stratum::{Connection, Connector, Stratum, TcpConnector, Transport};
pub use worker::Worker;
