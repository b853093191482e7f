use std::sync::{
    atomic::{AtomicU8, Ordering},
    Mutex, MutexGuard, PoisonError,
};

/// Hooks a concrete service plugs into [`Service`].
pub trait Lifecycle: Send {
    /// Brings the service up. Returning `false` leaves it stopped.
    fn init(&mut self) -> bool;

    fn cleanup(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Stopped = 3,
}

impl ServiceState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServiceState::Uninitialized,
            1 => ServiceState::Initializing,
            2 => ServiceState::Ready,
            _ => ServiceState::Stopped,
        }
    }
}

/// Runs a [`Lifecycle`] at most once at a time.
///
/// The state word moves by compare-and-swap so concurrent `start` calls
/// cannot both reach `init`. The hooks sit behind their own lock, which also
/// orders `init` against `cleanup`.
pub struct Service<L> {
    state: AtomicU8,
    hooks: Mutex<L>,
}

impl<L: Lifecycle> Service<L> {
    pub fn new(hooks: L) -> Self {
        Self {
            state: AtomicU8::new(ServiceState::Uninitialized as u8),
            hooks: Mutex::new(hooks),
        }
    }

    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == ServiceState::Ready
    }

    /// Returns `true` when the service was already running (or being started
    /// by another caller) and nothing was done. Returns `false` after this
    /// call ran `init`, whether or not `init` succeeded.
    pub fn start(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            match ServiceState::from_u8(current) {
                ServiceState::Ready | ServiceState::Initializing => return true,
                ServiceState::Uninitialized | ServiceState::Stopped => {
                    match self.state.compare_exchange(
                        current,
                        ServiceState::Initializing as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break,
                        Err(actual) => current = actual,
                    }
                }
            }
        }

        tracing::info!("starting service");
        let mut hooks = self.lock_hooks();
        if hooks.init() {
            self.state.store(ServiceState::Ready as u8, Ordering::Release);
            tracing::info!("service initialized");
        } else {
            self.state.store(current, Ordering::Release);
            tracing::warn!("service failed to initialize");
        }
        false
    }

    /// Runs `cleanup` if the service is ready. Stopping a stopped service is
    /// a no-op.
    pub fn stop(&self) {
        let mut hooks = self.lock_hooks();
        if self
            .state
            .compare_exchange(
                ServiceState::Ready as u8,
                ServiceState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            hooks.cleanup();
            tracing::info!("service stopped");
        }
    }

    /// Gives short access to the hooks. Blocks while `init` or `cleanup` runs.
    pub fn with_hooks<R>(&self, f: impl FnOnce(&mut L) -> R) -> R {
        f(&mut self.lock_hooks())
    }

    fn lock_hooks(&self) -> MutexGuard<'_, L> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
