//! # Tempo worker
//!
//! The in-process execution core: polls the Core bridge for workflow
//! activations and activity tasks, runs registered user code, and reports
//! commands and results back.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Worker                              │
//! │   (registration table, config, interceptor providers)       │
//! └─────────────────────────────────────────────────────────────┘
//!               │                              │
//!               ▼                              ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │      WorkflowWorker      │   │        ActivityWorker        │
//! │ (deterministic per-run   │   │ (concurrent tasks, heartbeat │
//! │  cooperative scheduler)  │   │  coalescing, cancellation)   │
//! └──────────────────────────┘   └──────────────────────────────┘
//!               │                              │
//!               └──────────────┬───────────────┘
//!                              ▼
//!                       CoreBridge (poll / complete / heartbeat)
//! ```
//!
//! Workflow code runs under a single-threaded cooperative scheduler per run
//! and suspends only at context primitives; activities are ordinary tokio
//! tasks free to block and perform I/O.

pub mod activities;
pub mod error;
pub mod interceptors;
pub mod registry;
pub mod workflows;

use std::sync::Arc;

use tracing::info;

use tempo_core::bridge::CoreBridge;
use tempo_convert::DataConverter;

// Re-export key types at crate root
pub use activities::{ActivityCancellationReason, ActivityContext};
pub use error::{ActivityError, WorkerError, WorkflowError};
pub use interceptors::WorkerInterceptor;
pub use registry::{ActivityRegistration, Registry, WorkflowMetadata, WorkflowRegistration};
pub use workflows::{
    ActivityOptions, ChildWorkflowOptions, Replayer, WfContext, WorkflowState,
};

use activities::ActivityWorker;
use workflows::WorkflowWorker;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Namespace this worker serves
    pub namespace: String,

    /// Task queue this worker polls
    pub task_queue: String,

    /// Identity stamped on completions
    pub identity: String,

    /// Cap on concurrently running activities
    pub max_concurrent_activities: usize,
}

impl WorkerConfig {
    pub fn new(namespace: impl Into<String>, task_queue: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            task_queue: task_queue.into(),
            identity: format!("tempo-worker-{}", uuid::Uuid::now_v7()),
            max_concurrent_activities: 100,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_max_concurrent_activities(mut self, max: usize) -> Self {
        self.max_concurrent_activities = max;
        self
    }
}

/// Builder for [`Worker`]
pub struct WorkerBuilder {
    bridge: Arc<dyn CoreBridge>,
    config: WorkerConfig,
    converter: DataConverter,
    registry: Registry,
    interceptors: Vec<Arc<dyn WorkerInterceptor>>,
}

impl WorkerBuilder {
    /// Register a workflow type. Duplicate names panic: registration
    /// conflicts are configuration errors, fatal at construction.
    pub fn register_workflow(mut self, registration: WorkflowRegistration) -> Self {
        self.registry.insert_workflow(registration);
        self
    }

    /// Register an activity type. Duplicate names panic.
    pub fn register_activity(mut self, registration: ActivityRegistration) -> Self {
        self.registry.insert_activity(registration);
        self
    }

    /// Replace the data converter (payload converters, codecs, failures)
    pub fn with_data_converter(mut self, converter: DataConverter) -> Self {
        self.converter = converter;
        self
    }

    /// Append an interceptor provider; earlier providers are outermost
    pub fn with_interceptor(mut self, interceptor: Arc<dyn WorkerInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> Worker {
        let converter = Arc::new(self.converter);
        let registry = Arc::new(self.registry);
        let providers = Arc::new(self.interceptors);

        let workflow_worker = Arc::new(WorkflowWorker::new(
            self.bridge.clone(),
            registry.clone(),
            converter.clone(),
            providers.clone(),
            self.config.namespace.clone(),
        ));
        let activity_worker = Arc::new(ActivityWorker::new(
            self.bridge.clone(),
            registry.clone(),
            converter.clone(),
            providers,
            self.config.max_concurrent_activities,
        ));

        Worker {
            bridge: self.bridge,
            config: self.config,
            registry,
            workflow_worker,
            activity_worker,
        }
    }
}

/// A worker serving one task queue
pub struct Worker {
    bridge: Arc<dyn CoreBridge>,
    config: WorkerConfig,
    registry: Arc<Registry>,
    workflow_worker: Arc<WorkflowWorker>,
    activity_worker: Arc<ActivityWorker>,
}

impl Worker {
    /// Start building a worker over a bridge
    pub fn builder(bridge: Arc<dyn CoreBridge>, config: WorkerConfig) -> WorkerBuilder {
        WorkerBuilder {
            bridge,
            config,
            converter: DataConverter::default(),
            registry: Registry::new(),
            interceptors: vec![],
        }
    }

    /// The worker's configuration
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// The registration table
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Poll both task streams until shutdown completes draining
    pub async fn run(&self) -> Result<(), WorkerError> {
        info!(
            namespace = %self.config.namespace,
            task_queue = %self.config.task_queue,
            identity = %self.config.identity,
            "worker starting"
        );
        let workflow = self.workflow_worker.run();
        let activity = self.activity_worker.clone().run();
        tokio::try_join!(workflow, activity)?;
        info!("worker stopped");
        Ok(())
    }

    /// Begin graceful shutdown: stop pollers after draining, cancel running
    /// activities with the worker-shutdown reason
    pub async fn shutdown(&self) {
        info!("worker shutdown requested");
        self.bridge.initiate_shutdown().await;
        self.activity_worker.cancel_all_for_shutdown();
    }
}
