//! # Tempo client
//!
//! The client service facade: typed workflow operations over a
//! [`WorkflowService`] transport, with payload conversion, outbound
//! interceptors, and long-poll state machines for results and updates.
//!
//! The client owns no long-lived state beyond its configuration; handles
//! (`WorkflowHandle`, `ScheduleHandle`, `AsyncActivityHandle`) borrow the
//! client and address server-side state.

pub mod async_activity;
pub mod error;
pub mod interceptor;
pub mod schedule;
pub mod update;
pub mod workflow_handle;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use tempo_core::common::{WorkflowExecutionInfo, WorkflowIdConflictPolicy, WorkflowIdReusePolicy};
use tempo_core::payload::Headers;
use tempo_core::retry::RetryPolicy;
use tempo_core::schedule::ScheduleListEntry;
use tempo_core::search::{encode_search_attributes, SearchAttributeValue};
use tempo_core::service::{
    CountWorkflowExecutionsRequest, ListSchedulesRequest, ListWorkflowExecutionsRequest,
    SignalWithStartWorkflowExecutionRequest, StartWorkflowExecutionRequest, WorkflowService,
};
use tempo_convert::DataConverter;

pub use async_activity::{AsyncActivityHandle, AsyncActivityRef};
pub use error::ClientError;
pub use interceptor::{ClientInterceptor, ClientOutboundInterceptor};
pub use schedule::{ScheduleDescription, ScheduleHandle, ScheduleOptions};
pub use update::WorkflowUpdateHandle;
pub use workflow_handle::WorkflowHandle;

use interceptor::{build_client_chain, ServiceTerminal};

/// Page size used for workflow listing
const WORKFLOW_PAGE_SIZE: i32 = 1000;

/// Page size used for schedule listing
const SCHEDULE_PAGE_SIZE: i32 = 100;

/// Client configuration
pub struct ClientOptions {
    pub namespace: String,
    pub identity: String,
    pub data_converter: DataConverter,
    pub interceptors: Vec<Arc<dyn ClientInterceptor>>,
}

impl ClientOptions {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            identity: format!("tempo-client-{}", Uuid::now_v7()),
            data_converter: DataConverter::default(),
            interceptors: vec![],
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_data_converter(mut self, converter: DataConverter) -> Self {
        self.data_converter = converter;
        self
    }

    /// Append an interceptor; earlier interceptors are outermost
    pub fn with_interceptor(mut self, interceptor: Arc<dyn ClientInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }
}

pub(crate) struct ClientInner {
    pub(crate) service: Arc<dyn WorkflowService>,
    pub(crate) namespace: String,
    pub(crate) identity: String,
    pub(crate) converter: Arc<DataConverter>,
    pub(crate) outbound: Arc<dyn ClientOutboundInterceptor>,
}

/// A client bound to one namespace
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

/// Options for starting a workflow
#[derive(Debug, Clone)]
pub struct StartWorkflowOptions {
    /// User-assigned workflow id
    pub id: String,

    /// Task queue the first workflow task is dispatched on
    pub task_queue: String,

    pub id_reuse_policy: WorkflowIdReusePolicy,
    pub id_conflict_policy: WorkflowIdConflictPolicy,
    pub execution_timeout: Option<Duration>,
    pub run_timeout: Option<Duration>,
    pub task_timeout: Option<Duration>,
    pub retry_policy: Option<RetryPolicy>,
    pub cron_schedule: Option<String>,
    pub memo: HashMap<String, serde_json::Value>,
    pub search_attributes: HashMap<String, SearchAttributeValue>,
    pub headers: Headers,
}

impl StartWorkflowOptions {
    pub fn new(id: impl Into<String>, task_queue: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_queue: task_queue.into(),
            id_reuse_policy: WorkflowIdReusePolicy::default(),
            id_conflict_policy: WorkflowIdConflictPolicy::default(),
            execution_timeout: None,
            run_timeout: None,
            task_timeout: None,
            retry_policy: None,
            cron_schedule: None,
            memo: HashMap::new(),
            search_attributes: HashMap::new(),
            headers: Headers::default(),
        }
    }

    pub fn with_id_reuse_policy(mut self, policy: WorkflowIdReusePolicy) -> Self {
        self.id_reuse_policy = policy;
        self
    }

    pub fn with_id_conflict_policy(mut self, policy: WorkflowIdConflictPolicy) -> Self {
        self.id_conflict_policy = policy;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_memo_value(
        mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.memo.insert(key.into(), value);
        self
    }

    pub fn with_search_attribute(
        mut self,
        key: impl Into<String>,
        value: SearchAttributeValue,
    ) -> Self {
        self.search_attributes.insert(key.into(), value);
        self
    }
}

impl Client {
    /// Create a client over a service transport
    pub fn new(service: Arc<dyn WorkflowService>, options: ClientOptions) -> Self {
        let converter = Arc::new(options.data_converter);
        let terminal = Arc::new(ServiceTerminal {
            service: service.clone(),
            converter: converter.clone(),
        });
        let outbound = build_client_chain(&options.interceptors, terminal);

        info!(namespace = %options.namespace, identity = %options.identity, "client created");

        Self {
            inner: Arc::new(ClientInner {
                service,
                namespace: options.namespace,
                identity: options.identity,
                converter,
                outbound,
            }),
        }
    }

    /// The namespace this client addresses
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// The identity stamped on outbound requests
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// The data converter in use
    pub fn data_converter(&self) -> Arc<DataConverter> {
        self.inner.converter.clone()
    }

    /// The underlying service transport
    pub fn service(&self) -> Arc<dyn WorkflowService> {
        self.inner.service.clone()
    }

    /// Start a workflow execution and return its handle
    pub async fn start_workflow<I: Serialize>(
        &self,
        workflow_type: impl Into<String>,
        input: &I,
        options: StartWorkflowOptions,
    ) -> Result<WorkflowHandle, ClientError> {
        let request = self.start_request(workflow_type.into(), input, &options)?;
        let response = self.inner.outbound.start_workflow(request).await?;
        Ok(WorkflowHandle::new(
            self.clone(),
            options.id,
            Some(response.run_id.clone()),
            Some(response.run_id),
        ))
    }

    /// Start a workflow and deliver a signal atomically with the start
    pub async fn signal_with_start_workflow<I: Serialize, S: Serialize>(
        &self,
        workflow_type: impl Into<String>,
        input: &I,
        signal_name: impl Into<String>,
        signal_input: &S,
        options: StartWorkflowOptions,
    ) -> Result<WorkflowHandle, ClientError> {
        let start = self.start_request(workflow_type.into(), input, &options)?;
        let request = SignalWithStartWorkflowExecutionRequest {
            start,
            signal_name: signal_name.into(),
            signal_input: vec![self.inner.converter.to_payload(signal_input)?],
        };
        let response = self
            .inner
            .outbound
            .signal_with_start_workflow(request)
            .await?;
        Ok(WorkflowHandle::new(
            self.clone(),
            options.id,
            Some(response.run_id.clone()),
            Some(response.run_id),
        ))
    }

    /// A handle to an existing workflow (latest run when `run_id` is None)
    pub fn workflow_handle(
        &self,
        workflow_id: impl Into<String>,
        run_id: Option<String>,
    ) -> WorkflowHandle {
        WorkflowHandle::new(self.clone(), workflow_id.into(), run_id, None)
    }

    /// List executions matching a visibility query, paging transparently
    ///
    /// The consumer may stop early; no further pages are fetched once the
    /// stream is dropped.
    pub fn list_workflows(
        &self,
        query: impl Into<String>,
        limit: Option<usize>,
    ) -> impl Stream<Item = Result<WorkflowExecutionInfo, ClientError>> {
        struct ListState {
            token: Vec<u8>,
            started: bool,
            buffer: VecDeque<WorkflowExecutionInfo>,
            yielded: usize,
        }

        let inner = self.inner.clone();
        let query = query.into();

        futures::stream::try_unfold(
            ListState {
                token: Vec::new(),
                started: false,
                buffer: VecDeque::new(),
                yielded: 0,
            },
            move |mut state| {
                let inner = inner.clone();
                let query = query.clone();
                async move {
                    loop {
                        if let Some(limit) = limit {
                            if state.yielded >= limit {
                                return Ok(None);
                            }
                        }
                        if let Some(item) = state.buffer.pop_front() {
                            state.yielded += 1;
                            return Ok(Some((item, state)));
                        }
                        if state.started && state.token.is_empty() {
                            return Ok(None);
                        }

                        let response = inner
                            .service
                            .list_workflow_executions(ListWorkflowExecutionsRequest {
                                namespace: inner.namespace.clone(),
                                page_size: WORKFLOW_PAGE_SIZE,
                                next_page_token: state.token.clone(),
                                query: query.clone(),
                            })
                            .await?;

                        state.started = true;
                        state.token = response.next_page_token;
                        state.buffer.extend(response.executions);

                        if state.buffer.is_empty() && state.token.is_empty() {
                            return Ok(None);
                        }
                    }
                }
            },
        )
    }

    /// Count executions matching a visibility query
    pub async fn count_workflows(&self, query: impl Into<String>) -> Result<i64, ClientError> {
        let response = self
            .inner
            .service
            .count_workflow_executions(CountWorkflowExecutionsRequest {
                namespace: self.inner.namespace.clone(),
                query: query.into(),
            })
            .await?;
        Ok(response.count)
    }

    /// List schedules, paging transparently (page size 100)
    pub fn list_schedules(
        &self,
        query: impl Into<String>,
    ) -> impl Stream<Item = Result<ScheduleListEntry, ClientError>> {
        struct ListState {
            token: Vec<u8>,
            started: bool,
            buffer: VecDeque<ScheduleListEntry>,
        }

        let inner = self.inner.clone();
        let query = query.into();

        futures::stream::try_unfold(
            ListState {
                token: Vec::new(),
                started: false,
                buffer: VecDeque::new(),
            },
            move |mut state| {
                let inner = inner.clone();
                let query = query.clone();
                async move {
                    loop {
                        if let Some(item) = state.buffer.pop_front() {
                            return Ok(Some((item, state)));
                        }
                        if state.started && state.token.is_empty() {
                            return Ok(None);
                        }

                        let response = inner
                            .service
                            .list_schedules(ListSchedulesRequest {
                                namespace: inner.namespace.clone(),
                                maximum_page_size: SCHEDULE_PAGE_SIZE,
                                next_page_token: state.token.clone(),
                                query: query.clone(),
                            })
                            .await?;

                        state.started = true;
                        state.token = response.next_page_token;
                        state.buffer.extend(response.schedules);

                        if state.buffer.is_empty() && state.token.is_empty() {
                            return Ok(None);
                        }
                    }
                }
            },
        )
    }

    fn start_request<I: Serialize>(
        &self,
        workflow_type: String,
        input: &I,
        options: &StartWorkflowOptions,
    ) -> Result<StartWorkflowExecutionRequest, ClientError> {
        if let Some(policy) = &options.retry_policy {
            policy.validate()?;
        }

        let input_payload = self.inner.converter.to_payload(input)?;
        let mut memo = tempo_core::payload::Memo::new();
        for (key, value) in &options.memo {
            memo.insert(key.clone(), self.inner.converter.to_payload(value)?);
        }

        Ok(StartWorkflowExecutionRequest {
            namespace: self.inner.namespace.clone(),
            workflow_id: options.id.clone(),
            workflow_type,
            task_queue: options.task_queue.clone(),
            input: vec![input_payload],
            identity: self.inner.identity.clone(),
            request_id: Uuid::now_v7().to_string(),
            workflow_id_reuse_policy: options.id_reuse_policy,
            workflow_id_conflict_policy: options.id_conflict_policy,
            workflow_execution_timeout: options.execution_timeout,
            workflow_run_timeout: options.run_timeout,
            workflow_task_timeout: options.task_timeout,
            retry_policy: options.retry_policy.clone(),
            cron_schedule: options.cron_schedule.clone(),
            memo,
            search_attributes: encode_search_attributes(&options.search_attributes),
            header: options.headers.clone(),
        })
    }
}
