use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use std::thread::{self, JoinHandle};

/// An owned background thread with a stop signal.
///
/// Dropping the worker cancels and joins it.
pub struct Worker {
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns `body` on a named thread, optionally pinned to `core`.
    pub fn spawn<F>(name: &str, core: Option<usize>, body: F) -> Result<Self>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if let Some(index) = core {
                    pin_to_core(index);
                }
                body(token);
            })
            .map_err(|e| Error::Thread(format!("failed to spawn {name}: {e}")))?;
        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signals the thread and waits for it to exit.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::error!("{name} panicked");
            } else {
                tracing::debug!("{name} joined");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pin_to_core(index: usize) {
    let cores = core_affinity::get_core_ids().unwrap_or_default();
    match cores.get(index % cores.len().max(1)) {
        Some(core) if core_affinity::set_for_current(*core) => {
            tracing::info!("worker pinned to core {:?}", core.id);
        }
        _ => tracing::warn!("could not pin worker to core {index}"),
    }
}
