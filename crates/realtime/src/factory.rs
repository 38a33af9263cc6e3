// Service Factory
//
// Lazily builds the one backend instance a process talks to, falling back to
// the memory backend when the requested one cannot be initialized.

use crate::adapter::RealtimeBackend;
use crate::backends::firebase::FirebaseBackend;
use crate::backends::memory::MemoryBackend;
use focusroom_core::{BackendConfig, BackendKind, Clock, FocusRoomError, Result, SystemClock};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{error, info, warn};

pub type SharedBackend = Arc<dyn RealtimeBackend>;

type InitObserver = Arc<dyn Fn(&SharedBackend) + Send + Sync>;
type ErrorObserver = Arc<dyn Fn(&FocusRoomError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Ready,
    /// Last attempt failed; another attempt is allowed
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    pub allow_fallback: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            allow_fallback: true,
        }
    }
}

struct FactoryState {
    state: ServiceState,
    instance: Option<SharedBackend>,
    init_observers: Vec<InitObserver>,
    error_observers: Vec<ErrorObserver>,
}

pub struct ServiceFactory {
    inner: Mutex<FactoryState>,
    /// Serializes construction so concurrent callers share one instance
    creating: tokio::sync::Mutex<()>,
    clock: Arc<dyn Clock>,
}

static GLOBAL: OnceLock<ServiceFactory> = OnceLock::new();

impl ServiceFactory {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Backends built by this factory read time from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(FactoryState {
                state: ServiceState::Uninitialized,
                instance: None,
                init_observers: Vec::new(),
                error_observers: Vec::new(),
            }),
            creating: tokio::sync::Mutex::new(()),
            clock,
        }
    }

    /// Process-wide factory
    pub fn global() -> &'static ServiceFactory {
        GLOBAL.get_or_init(ServiceFactory::new)
    }

    pub fn state(&self) -> ServiceState {
        self.lock().state
    }

    pub fn current(&self) -> Option<SharedBackend> {
        self.lock().instance.clone()
    }

    pub async fn create_from_config(&self, config: &BackendConfig) -> Result<SharedBackend> {
        self.create_service(
            config.kind,
            config,
            CreateOptions {
                allow_fallback: config.allow_fallback,
            },
        )
        .await
    }

    /// Return the ready instance, or build and initialize `kind`.
    ///
    /// Once ready, the requested kind is ignored and the existing instance
    /// comes back.
    pub async fn create_service(
        &self,
        kind: BackendKind,
        config: &BackendConfig,
        options: CreateOptions,
    ) -> Result<SharedBackend> {
        let _creating = self.creating.lock().await;
        if let Some(existing) = self.current() {
            return Ok(existing);
        }

        let backend = match self.build(kind, config).await {
            Ok(backend) => backend,
            Err(e) => {
                error!("Failed to initialize {} backend: {}", kind, e);
                self.notify_error(&e);
                if !options.allow_fallback {
                    self.lock().state = ServiceState::Failed;
                    return Err(e);
                }
                warn!("Falling back to the in-memory backend");
                Arc::new(MemoryBackend::with_clock(self.clock.clone()))
            }
        };

        let observers = {
            let mut inner = self.lock();
            inner.state = ServiceState::Ready;
            inner.instance = Some(backend.clone());
            inner.init_observers.clone()
        };
        info!("Realtime service ready ({})", backend.kind());
        for observer in observers {
            observer(&backend);
        }
        Ok(backend)
    }

    async fn build(&self, kind: BackendKind, config: &BackendConfig) -> Result<SharedBackend> {
        let backend: SharedBackend = match kind {
            BackendKind::Memory => Arc::new(MemoryBackend::with_clock(self.clock.clone())),
            BackendKind::Firebase => Arc::new(FirebaseBackend::new(
                &config.firebase.resolved(),
                self.clock.clone(),
            )?),
        };
        backend.initialize().await?;
        Ok(backend)
    }

    /// Called with the instance whenever the factory becomes ready; at once
    /// if it already is.
    pub fn on_initialized(&self, observer: impl Fn(&SharedBackend) + Send + Sync + 'static) {
        let observer: InitObserver = Arc::new(observer);
        let ready = {
            let mut inner = self.lock();
            inner.init_observers.push(observer.clone());
            inner.instance.clone()
        };
        if let Some(backend) = ready {
            observer(&backend);
        }
    }

    pub fn on_error(&self, observer: impl Fn(&FocusRoomError) + Send + Sync + 'static) {
        self.lock().error_observers.push(Arc::new(observer));
    }

    /// Disconnect the current instance and start over
    pub async fn reset_service(&self) {
        let _creating = self.creating.lock().await;
        let previous = {
            let mut inner = self.lock();
            inner.state = ServiceState::Uninitialized;
            inner.instance.take()
        };
        if let Some(backend) = previous {
            if let Err(e) = backend.disconnect().await {
                warn!("Disconnect during reset failed: {}", e);
            }
        }
    }

    fn notify_error(&self, err: &FocusRoomError) {
        let observers = self.lock().error_observers.clone();
        for observer in observers {
            observer(err);
        }
    }

    fn lock(&self) -> MutexGuard<'_, FactoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ServiceFactory {
    fn default() -> Self {
        Self::new()
    }
}
