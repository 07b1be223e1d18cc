/// Vsync presenter engine - process-wide services
///
/// This module hosts the two things that are genuinely global: the logger used
/// by the `present_*` macros, and the registry of display backends that can be
/// selected at startup. Everything touched by the retrace handler lives in
/// `FramePresenter` instances instead.

use std::sync::{OnceLock, RwLock, Arc};
use std::time::SystemTime;
use rustc_hash::FxHashMap;
use crate::config::PresentConfig;
use crate::display_device::DisplayDevice;
use crate::error::{Result, Error};
use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};

// ===== INTERNAL STATE =====

/// Constructor for a display backend, keyed by name in the registry
pub type BackendFactory =
    Arc<dyn Fn(&PresentConfig) -> Result<Box<dyn DisplayDevice>> + Send + Sync>;

/// Global engine state storage
static ENGINE_STATE: OnceLock<EngineState> = OnceLock::new();

/// Global logger (initialized with DefaultLogger)
static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

/// Internal state structure
struct EngineState {
    /// Registered display backends
    backends: RwLock<FxHashMap<String, BackendFactory>>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            backends: RwLock::new(FxHashMap::default()),
        }
    }
}

// ===== PUBLIC API =====

/// Process-wide engine services
///
/// # Example
///
/// ```no_run
/// use vsync_presenter::vsync::{Engine, PresentConfig, FramePresenter};
///
/// Engine::initialize()?;
/// vsync_presenter_backends::register_backends()?;
///
/// let config = PresentConfig::default();
/// let device = Engine::create_device("console", &config)?;
/// let presenter = FramePresenter::new(device, config)?;
/// # Ok::<(), vsync_presenter::vsync::Error>(())
/// ```
pub struct Engine;

impl Engine {
    /// Helper to log errors before returning them (internal use)
    fn log_and_return_error(error: Error) -> Error {
        match &error {
            Error::InitializationFailed(msg) => {
                crate::present_error!("vsync::Engine", "Initialization failed: {}", msg);
            }
            Error::BackendError(msg) => {
                crate::present_error!("vsync::Engine", "Backend error: {}", msg);
            }
            _ => {
                crate::present_error!("vsync::Engine", "Engine error: {}", error);
            }
        }
        error
    }

    fn state() -> Result<&'static EngineState> {
        ENGINE_STATE.get().ok_or_else(|| Self::log_and_return_error(
            Error::InitializationFailed("Engine not initialized. Call Engine::initialize() first.".to_string())
        ))
    }

    /// Initialize the engine
    ///
    /// Idempotent. Must be called before registering or creating backends.
    pub fn initialize() -> Result<()> {
        ENGINE_STATE.get_or_init(EngineState::new);
        Ok(())
    }

    /// Drop every registered backend
    ///
    /// Devices already created stay alive until their presenter is dropped.
    pub fn shutdown() {
        if let Some(state) = ENGINE_STATE.get() {
            if let Ok(mut backends) = state.backends.write() {
                backends.clear();
            }
        }
    }

    /// Register a display backend under `name`
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not initialized or the name is taken.
    pub fn register_backend<F>(name: &str, factory: F) -> Result<()>
    where
        F: Fn(&PresentConfig) -> Result<Box<dyn DisplayDevice>> + Send + Sync + 'static,
    {
        let state = Self::state()?;
        let mut lock = state.backends.write()
            .map_err(|_| Self::log_and_return_error(
                Error::BackendError("Backend registry lock poisoned".to_string())
            ))?;

        if lock.contains_key(name) {
            return Err(Self::log_and_return_error(
                Error::InitializationFailed(format!("Backend '{}' already registered", name))
            ));
        }

        lock.insert(name.to_string(), Arc::new(factory));
        crate::present_info!("vsync::Engine", "Backend '{}' registered", name);
        Ok(())
    }

    /// Remove a registered backend
    pub fn unregister_backend(name: &str) -> Result<()> {
        let state = Self::state()?;
        let mut lock = state.backends.write()
            .map_err(|_| Self::log_and_return_error(
                Error::BackendError("Backend registry lock poisoned".to_string())
            ))?;

        if lock.remove(name).is_none() {
            return Err(Self::log_and_return_error(
                Error::InvalidState(format!("Backend '{}' not registered", name))
            ));
        }
        Ok(())
    }

    /// Instantiate the backend registered under `name`
    ///
    /// Startup failures of the device are fatal and surface synchronously.
    pub fn create_device(name: &str, config: &PresentConfig) -> Result<Box<dyn DisplayDevice>> {
        let state = Self::state()?;
        let factory = {
            let lock = state.backends.read()
                .map_err(|_| Self::log_and_return_error(
                    Error::BackendError("Backend registry lock poisoned".to_string())
                ))?;
            lock.get(name).cloned().ok_or_else(|| Self::log_and_return_error(
                Error::InitializationFailed(format!("Unknown display backend '{}'", name))
            ))?
        };

        let device = factory(config).map_err(Self::log_and_return_error)?;
        crate::present_info!("vsync::Engine", "Display backend '{}' created ({})", name, device.name());
        Ok(device)
    }

    /// Number of registered backends
    pub fn backend_count() -> usize {
        ENGINE_STATE.get()
            .and_then(|state| state.backends.read().ok().map(|b| b.len()))
            .unwrap_or(0)
    }

    /// Names of the registered backends, sorted
    pub fn backend_names() -> Vec<String> {
        let mut names: Vec<String> = ENGINE_STATE.get()
            .and_then(|state| state.backends.read().ok().map(|b| b.keys().cloned().collect()))
            .unwrap_or_default();
        names.sort();
        names
    }

    // ===== LOGGING API =====

    /// Replace the default logger with a custom implementation
    pub fn set_logger<L: Logger + 'static>(new_logger: L) {
        if let Ok(mut lock) = logger().write() {
            *lock = Box::new(new_logger);
        }
    }

    /// Reset logger to the default console logger
    pub fn reset_logger() {
        Self::set_logger(DefaultLogger::default());
    }

    /// Log without location (used by present_info!, present_warn!, etc.)
    pub fn log(severity: LogSeverity, source: &str, message: String) {
        dispatch(LogEntry {
            severity,
            timestamp: SystemTime::now(),
            source: source.to_string(),
            message,
            file: None,
            line: None,
        });
    }

    /// Log with file:line (used by present_error!)
    pub fn log_detailed(
        severity: LogSeverity,
        source: &str,
        message: String,
        file: &'static str,
        line: u32,
    ) {
        dispatch(LogEntry {
            severity,
            timestamp: SystemTime::now(),
            source: source.to_string(),
            message,
            file: Some(file),
            line: Some(line),
        });
    }
}

fn logger() -> &'static RwLock<Box<dyn Logger>> {
    LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger::default())))
}

fn dispatch(entry: LogEntry) {
    if let Ok(lock) = logger().read() {
        lock.log(&entry);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
