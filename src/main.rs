use clap::Parser;
use pool_miner::{InstallDirRegistry, MinerConfig, MiningClient, PoolAddress};
use std::{
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tracing_subscriber::EnvFilter;

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
struct Args {
    /// Pool address, e.g. `pool.example.com:3333` or `stratum+ssl://host:443`
    #[arg(short = 'o', long)]
    url: String,
    #[arg(short, long)]
    user: String,
    #[arg(short, long, default_value = "x")]
    pass: String,
    #[arg(long)]
    tls: bool,
    /// Hash from the RandomX cache instead of the full dataset
    #[arg(long)]
    light: bool,
    /// Pin the worker thread to this core
    #[arg(long)]
    core: Option<usize>,
    /// Component install directory holding the auxiliary data file
    #[arg(long, default_value = ".")]
    install_dir: PathBuf,
    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> pool_miner::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(filter)
        .with_file(false)
        .with_line_number(false)
        .init();

    let Args {
        url,
        user,
        pass,
        tls,
        light,
        core,
        install_dir,
        duration,
        ..
    } = args;

    let pool: PoolAddress = url.parse()?;
    let mut config = MinerConfig::new(pool, user);
    config.pass = pass;
    config.tls |= tls;
    config.light = light;
    config.cpu_core = core;

    let client = Arc::new(MiningClient::new(config)?);
    let registry = Arc::new(InstallDirRegistry::new(install_dir));
    client.register(registry)?;

    let mut jobs = client.job_watch();
    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        if let Some(Some(job)) = jobs.get_if_new() {
            tracing::info!(job_id = %job.job_id, target = format!("{:08x}", job.target), "current job");
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            client.stop();
            break;
        }

        thread::sleep(STATUS_INTERVAL);
    }
    Ok(())
}
