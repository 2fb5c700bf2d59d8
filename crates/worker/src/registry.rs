//! Registration table
//!
//! Maps workflow type names to run/signal/query/update handlers and activity
//! type names to activity handlers, all type-erased behind payload-level
//! closures. Built once at worker construction; immutable afterwards.
//! Duplicate names are a fatal configuration error.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use tempo_core::payload::Payload;
use tempo_convert::{DataConverter, DataConverterError};

use crate::activities::ActivityContext;
use crate::error::{ActivityError, WorkflowError};
use crate::workflows::{WfContext, WorkflowState};

/// Type-erased workflow state: an `Arc<Mutex<W>>` behind `Any`
pub type ErasedState = Arc<dyn Any + Send + Sync>;

pub(crate) type WorkflowFactory =
    Box<dyn Fn(&[Payload], &DataConverter) -> Result<ErasedState, DataConverterError> + Send + Sync>;

pub(crate) type RunMaker = Box<
    dyn Fn(ErasedState, WfContext) -> BoxFuture<'static, Result<Option<Payload>, WorkflowError>>
        + Send
        + Sync,
>;

pub(crate) type SignalHandlerFn = Box<
    dyn Fn(ErasedState, WfContext, Vec<Payload>) -> BoxFuture<'static, Result<(), WorkflowError>>
        + Send
        + Sync,
>;

pub(crate) type QueryHandlerFn = Box<
    dyn Fn(ErasedState, &[Payload], &DataConverter) -> Result<Option<Payload>, WorkflowError>
        + Send
        + Sync,
>;

pub(crate) type UpdateValidatorFn = Box<
    dyn Fn(ErasedState, &[Payload], &DataConverter) -> Result<(), WorkflowError> + Send + Sync,
>;

pub(crate) type UpdateHandlerFn = Box<
    dyn Fn(ErasedState, WfContext, Vec<Payload>)
            -> BoxFuture<'static, Result<Option<Payload>, WorkflowError>>
        + Send
        + Sync,
>;

pub(crate) type ActivityHandlerFn = Arc<
    dyn Fn(
            ActivityContext,
            Vec<Payload>,
            Arc<DataConverter>,
        ) -> BoxFuture<'static, Result<Option<Payload>, ActivityError>>
        + Send
        + Sync,
>;

fn typed_state<W: Send + 'static>(state: &ErasedState) -> Result<WorkflowState<W>, WorkflowError> {
    state
        .clone()
        .downcast::<Mutex<W>>()
        .map(WorkflowState::from_arc)
        .map_err(|_| WorkflowError::application("workflow state type mismatch", "InternalError"))
}

/// Declared handler metadata, served by the reserved metadata query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// The payload of the reserved `__temporal_workflow_metadata` query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowMetadata {
    pub workflow_type: String,
    #[serde(default)]
    pub signals: Vec<HandlerDefinition>,
    #[serde(default)]
    pub queries: Vec<HandlerDefinition>,
    #[serde(default)]
    pub updates: Vec<HandlerDefinition>,
    #[serde(default)]
    pub current_details: Option<String>,
}

/// A fully-built, type-erased workflow registration
pub struct WorkflowRegistration {
    pub(crate) name: String,
    pub(crate) factory: WorkflowFactory,
    pub(crate) run: RunMaker,
    pub(crate) signals: HashMap<String, SignalHandlerFn>,
    pub(crate) queries: HashMap<String, QueryHandlerFn>,
    pub(crate) update_handlers: HashMap<String, UpdateHandlerFn>,
    pub(crate) update_validators: HashMap<String, UpdateValidatorFn>,
    pub(crate) signal_defs: Vec<HandlerDefinition>,
    pub(crate) query_defs: Vec<HandlerDefinition>,
    pub(crate) update_defs: Vec<HandlerDefinition>,
}

impl WorkflowRegistration {
    /// Start building a registration for workflow type `name`
    ///
    /// `init` constructs the workflow state from the decoded input; `run` is
    /// the workflow body. Both run under the deterministic scheduler.
    pub fn builder<W, I, O, Init, Run, Fut>(
        name: impl Into<String>,
        init: Init,
        run: Run,
    ) -> WorkflowRegistrationBuilder<W>
    where
        W: Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        Init: Fn(I) -> W + Send + Sync + 'static,
        Run: Fn(WorkflowState<W>, WfContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
    {
        let factory: WorkflowFactory = Box::new(move |payloads, converter| {
            let input: I = converter.from_payloads(payloads)?;
            Ok(Arc::new(Mutex::new(init(input))) as ErasedState)
        });

        let run: RunMaker = Box::new(move |state, ctx| {
            let converter = ctx.converter();
            match typed_state::<W>(&state) {
                Ok(ws) => {
                    let fut = run(ws, ctx);
                    Box::pin(async move {
                        let output = fut.await?;
                        let payload = converter
                            .to_payload(&output)
                            .map_err(WorkflowError::from_convert)?;
                        Ok(Some(payload))
                    })
                }
                Err(e) => Box::pin(async move { Err(e) }),
            }
        });

        WorkflowRegistrationBuilder {
            name: name.into(),
            factory,
            run,
            signals: HashMap::new(),
            queries: HashMap::new(),
            update_handlers: HashMap::new(),
            update_validators: HashMap::new(),
            signal_defs: vec![],
            query_defs: vec![],
            update_defs: vec![],
            _marker: PhantomData,
        }
    }

    /// The registered workflow type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metadata served by the reserved query
    pub fn metadata(&self, current_details: Option<String>) -> WorkflowMetadata {
        WorkflowMetadata {
            workflow_type: self.name.clone(),
            signals: self.signal_defs.clone(),
            queries: self.query_defs.clone(),
            updates: self.update_defs.clone(),
            current_details,
        }
    }
}

/// Builder for [`WorkflowRegistration`]
pub struct WorkflowRegistrationBuilder<W> {
    name: String,
    factory: WorkflowFactory,
    run: RunMaker,
    signals: HashMap<String, SignalHandlerFn>,
    queries: HashMap<String, QueryHandlerFn>,
    update_handlers: HashMap<String, UpdateHandlerFn>,
    update_validators: HashMap<String, UpdateValidatorFn>,
    signal_defs: Vec<HandlerDefinition>,
    query_defs: Vec<HandlerDefinition>,
    update_defs: Vec<HandlerDefinition>,
    _marker: PhantomData<fn() -> W>,
}

impl<W: Send + 'static> WorkflowRegistrationBuilder<W> {
    /// Register a signal handler
    ///
    /// Signal handlers are enqueued as tasks on the run's scheduler and may
    /// suspend on engine primitives. Signals have no return value.
    pub fn signal<I, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        F: Fn(WorkflowState<W>, WfContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkflowError>> + Send + 'static,
    {
        let name = name.into();
        assert!(
            !self.signals.contains_key(&name),
            "duplicate signal handler registered: {name}"
        );

        let erased: SignalHandlerFn = Box::new(move |state, ctx, payloads| {
            let decoded: Result<I, _> = ctx.converter().from_payloads(&payloads);
            match (typed_state::<W>(&state), decoded) {
                (Ok(ws), Ok(input)) => Box::pin(handler(ws, ctx, input)),
                (Err(e), _) => Box::pin(async move { Err(e) }),
                (_, Err(e)) => Box::pin(async move { Err(WorkflowError::from_convert(e)) }),
            }
        });

        self.signal_defs.push(HandlerDefinition {
            name: name.clone(),
            description: None,
        });
        self.signals.insert(name, erased);
        self
    }

    /// Register a query handler
    ///
    /// Queries are pure reads evaluated synchronously within an activation.
    /// The handler signature makes suspension impossible; the engine
    /// additionally rejects queries that leave commands behind.
    pub fn query<I, O, F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        I: DeserializeOwned + 'static,
        O: Serialize + 'static,
        F: Fn(&W, I) -> Result<O, WorkflowError> + Send + Sync + 'static,
    {
        let name = name.into();
        assert!(
            !self.queries.contains_key(&name),
            "duplicate query handler registered: {name}"
        );

        let erased: QueryHandlerFn = Box::new(move |state, payloads, converter| {
            let ws = typed_state::<W>(&state)?;
            let input: I = converter
                .from_payloads(payloads)
                .map_err(WorkflowError::from_convert)?;
            let output = ws.with(|w| handler(w, input))?;
            let payload = converter
                .to_payload(&output)
                .map_err(WorkflowError::from_convert)?;
            Ok(Some(payload))
        });

        self.query_defs.push(HandlerDefinition {
            name: name.clone(),
            description: None,
        });
        self.queries.insert(name, erased);
        self
    }

    /// Register an update handler without a validator
    pub fn update<I, O, F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(WorkflowState<W>, WfContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
    {
        self.update_inner::<I, O, _, _>(name, None, handler)
    }

    /// Register an update handler with a synchronous validator
    ///
    /// The validator runs with no side effects; rejection keeps the update
    /// out of history entirely.
    pub fn update_with_validator<I, O, V, F, Fut>(
        self,
        name: impl Into<String>,
        validator: V,
        handler: F,
    ) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        V: Fn(&W, &I) -> Result<(), WorkflowError> + Send + Sync + 'static,
        F: Fn(WorkflowState<W>, WfContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
    {
        let erased: UpdateValidatorFn = Box::new(move |state, payloads, converter| {
            let ws = typed_state::<W>(&state)?;
            let input: I = converter
                .from_payloads(payloads)
                .map_err(WorkflowError::from_convert)?;
            ws.with(|w| validator(w, &input))
        });
        self.update_inner::<I, O, _, _>(name, Some(erased), handler)
    }

    fn update_inner<I, O, F, Fut>(
        mut self,
        name: impl Into<String>,
        validator: Option<UpdateValidatorFn>,
        handler: F,
    ) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(WorkflowState<W>, WfContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
    {
        let name = name.into();
        assert!(
            !self.update_handlers.contains_key(&name),
            "duplicate update handler registered: {name}"
        );

        let erased: UpdateHandlerFn = Box::new(move |state, ctx, payloads| {
            let converter = ctx.converter();
            let decoded: Result<I, _> = converter.from_payloads(&payloads);
            match (typed_state::<W>(&state), decoded) {
                (Ok(ws), Ok(input)) => {
                    let fut = handler(ws, ctx, input);
                    Box::pin(async move {
                        let output = fut.await?;
                        let payload = converter
                            .to_payload(&output)
                            .map_err(WorkflowError::from_convert)?;
                        Ok(Some(payload))
                    })
                }
                (Err(e), _) => Box::pin(async move { Err(e) }),
                (_, Err(e)) => Box::pin(async move { Err(WorkflowError::from_convert(e)) }),
            }
        });

        if let Some(validator) = validator {
            self.update_validators.insert(name.clone(), validator);
        }
        self.update_defs.push(HandlerDefinition {
            name: name.clone(),
            description: None,
        });
        self.update_handlers.insert(name, erased);
        self
    }

    /// Attach a description to an already-registered signal/query/update
    pub fn description_for(mut self, name: &str, description: impl Into<String>) -> Self {
        let description = Some(description.into());
        for def in self
            .signal_defs
            .iter_mut()
            .chain(self.query_defs.iter_mut())
            .chain(self.update_defs.iter_mut())
        {
            if def.name == name {
                def.description = description.clone();
            }
        }
        self
    }

    /// Finish the registration
    pub fn build(self) -> WorkflowRegistration {
        WorkflowRegistration {
            name: self.name,
            factory: self.factory,
            run: self.run,
            signals: self.signals,
            queries: self.queries,
            update_handlers: self.update_handlers,
            update_validators: self.update_validators,
            signal_defs: self.signal_defs,
            query_defs: self.query_defs,
            update_defs: self.update_defs,
        }
    }
}

/// A registered activity handler
pub struct ActivityRegistration {
    pub(crate) name: String,
    pub(crate) handler: ActivityHandlerFn,
}

impl ActivityRegistration {
    /// Register an async activity function
    pub fn new<I, O, F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(ActivityContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ActivityError>> + Send + 'static,
    {
        let erased: ActivityHandlerFn = Arc::new(move |ctx, payloads, converter| {
            let decoded: Result<I, _> = converter.from_payloads(&payloads);
            match decoded {
                Ok(input) => {
                    let fut = handler(ctx, input);
                    Box::pin(async move {
                        let output = fut.await?;
                        let payload = converter.to_payload(&output).map_err(|e| {
                            ActivityError::application(e.to_string())
                                .with_type("DataConverterError")
                                .non_retryable()
                        })?;
                        Ok(Some(payload))
                    })
                }
                Err(e) => Box::pin(async move {
                    Err(ActivityError::application(e.to_string())
                        .with_type("DataConverterError")
                        .non_retryable())
                }),
            }
        });

        Self {
            name: name.into(),
            handler: erased,
        }
    }

    /// The registered activity type name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The worker's immutable lookup table
#[derive(Default)]
pub struct Registry {
    workflows: HashMap<String, Arc<WorkflowRegistration>>,
    activities: HashMap<String, Arc<ActivityRegistration>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a workflow registration. Panics on a duplicate type name.
    pub fn insert_workflow(&mut self, registration: WorkflowRegistration) {
        let name = registration.name.clone();
        if self
            .workflows
            .insert(name.clone(), Arc::new(registration))
            .is_some()
        {
            panic!("duplicate workflow registration: {name}");
        }
    }

    /// Add an activity registration. Panics on a duplicate type name.
    pub fn insert_activity(&mut self, registration: ActivityRegistration) {
        let name = registration.name.clone();
        if self
            .activities
            .insert(name.clone(), Arc::new(registration))
            .is_some()
        {
            panic!("duplicate activity registration: {name}");
        }
    }

    pub fn workflow(&self, name: &str) -> Option<Arc<WorkflowRegistration>> {
        self.workflows.get(name).cloned()
    }

    pub fn activity(&self, name: &str) -> Option<Arc<ActivityRegistration>> {
        self.activities.get(name).cloned()
    }

    /// Registered activity names, sorted, for not-found diagnostics
    pub fn activity_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.activities.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered workflow names, sorted
    pub fn workflow_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.workflows.keys().cloned().collect();
        names.sort();
        names
    }
}
