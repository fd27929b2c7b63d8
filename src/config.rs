use crate::{PoolError, Result};

/// Upper bound on worker threads a single pool may own.
pub const MAX_THREADS: usize = 1024;

const DEFAULT_THREAD_NAME_PREFIX: &str = "forcepool-worker";

/// Construction parameters for a [`ThreadPool`](crate::ThreadPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads. Fixed for the lifetime of the pool.
    pub num_threads: usize,
    /// Workers are named `<prefix>-<id>`.
    pub thread_name_prefix: String,
    /// Stack size for each worker; the platform default when `None`.
    pub stack_size: Option<usize>,
    /// Maximum number of queued tasks. `None` means unbounded.
    pub queue_capacity: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get(),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            stack_size: None,
            queue_capacity: None,
        }
    }
}

impl PoolConfig {
    /// Returns a builder starting from the default configuration.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Checks that the configuration can be used to start a pool.
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(PoolError::InvalidConfig(
                "num_threads must be at least 1".to_string(),
            ));
        }
        if self.num_threads > MAX_THREADS {
            return Err(PoolError::InvalidConfig(format!(
                "num_threads must not exceed {MAX_THREADS}, got {}",
                self.num_threads
            )));
        }
        if self.stack_size == Some(0) {
            return Err(PoolError::InvalidConfig(
                "stack_size must be non-zero".to_string(),
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(PoolError::InvalidConfig(
                "queue_capacity must be non-zero".to_string(),
            ));
        }
        if self.thread_name_prefix.contains('\0') {
            return Err(PoolError::InvalidConfig(
                "thread_name_prefix must not contain NUL bytes".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Sets the number of worker threads.
    pub fn num_threads(mut self, n: usize) -> Self {
        self.config.num_threads = n;
        self
    }

    /// Sets the worker thread name prefix.
    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the stack size of each worker thread.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    /// Bounds the task queue; `submit` blocks while it is full.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = Some(capacity);
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
