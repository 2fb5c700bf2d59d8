//! Client outbound interceptors
//!
//! Every workflow-facing client call flows through a chain of outbound
//! interceptors built once at client construction, outermost-first. An
//! interceptor may mutate the request (headers included) before delegating;
//! the terminal encodes headers through the codec and performs the RPC.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use tempo_core::error::RpcErrorKind;
use tempo_core::service::{
    DescribeWorkflowExecutionRequest, DescribeWorkflowExecutionResponse,
    PollWorkflowExecutionUpdateRequest, PollWorkflowExecutionUpdateResponse,
    QueryWorkflowRequest, QueryWorkflowResponse, RequestCancelWorkflowExecutionRequest,
    SignalWithStartWorkflowExecutionRequest, SignalWorkflowExecutionRequest,
    StartWorkflowExecutionRequest, StartWorkflowExecutionResponse,
    TerminateWorkflowExecutionRequest, UpdateWorkflowExecutionRequest,
    UpdateWorkflowExecutionResponse, WorkflowService,
};
use tempo_convert::DataConverter;

use crate::error::ClientError;

/// The chainable outbound surface
#[async_trait]
pub trait ClientOutboundInterceptor: Send + Sync {
    async fn start_workflow(
        &self,
        request: StartWorkflowExecutionRequest,
    ) -> Result<StartWorkflowExecutionResponse, ClientError>;

    async fn signal_workflow(
        &self,
        request: SignalWorkflowExecutionRequest,
    ) -> Result<(), ClientError>;

    async fn signal_with_start_workflow(
        &self,
        request: SignalWithStartWorkflowExecutionRequest,
    ) -> Result<StartWorkflowExecutionResponse, ClientError>;

    async fn query_workflow(
        &self,
        request: QueryWorkflowRequest,
    ) -> Result<QueryWorkflowResponse, ClientError>;

    async fn update_workflow(
        &self,
        request: UpdateWorkflowExecutionRequest,
    ) -> Result<UpdateWorkflowExecutionResponse, ClientError>;

    async fn poll_workflow_update(
        &self,
        request: PollWorkflowExecutionUpdateRequest,
    ) -> Result<PollWorkflowExecutionUpdateResponse, ClientError>;

    async fn cancel_workflow(
        &self,
        request: RequestCancelWorkflowExecutionRequest,
    ) -> Result<(), ClientError>;

    async fn terminate_workflow(
        &self,
        request: TerminateWorkflowExecutionRequest,
    ) -> Result<(), ClientError>;

    async fn describe_workflow(
        &self,
        request: DescribeWorkflowExecutionRequest,
    ) -> Result<DescribeWorkflowExecutionResponse, ClientError>;
}

/// A provider of an optional client outbound wrapper
pub trait ClientInterceptor: Send + Sync {
    /// Wrap the outbound chain; return `next` to leave it untouched
    fn intercept_client(
        &self,
        next: Arc<dyn ClientOutboundInterceptor>,
    ) -> Arc<dyn ClientOutboundInterceptor> {
        next
    }
}

/// Fold providers around the terminal, outermost-first
pub(crate) fn build_client_chain(
    providers: &[Arc<dyn ClientInterceptor>],
    terminal: Arc<dyn ClientOutboundInterceptor>,
) -> Arc<dyn ClientOutboundInterceptor> {
    providers
        .iter()
        .rev()
        .fold(terminal, |next, provider| provider.intercept_client(next))
}

/// The terminal interceptor: encodes headers and performs the RPC
pub(crate) struct ServiceTerminal {
    pub(crate) service: Arc<dyn WorkflowService>,
    pub(crate) converter: Arc<DataConverter>,
}

impl ServiceTerminal {
    fn encode_headers(
        &self,
        headers: tempo_core::payload::Headers,
    ) -> Result<tempo_core::payload::Headers, ClientError> {
        Ok(self.converter.encode_headers(headers)?)
    }
}

#[async_trait]
impl ClientOutboundInterceptor for ServiceTerminal {
    async fn start_workflow(
        &self,
        mut request: StartWorkflowExecutionRequest,
    ) -> Result<StartWorkflowExecutionResponse, ClientError> {
        debug!(workflow_id = %request.workflow_id, workflow_type = %request.workflow_type,
            "starting workflow");
        request.header = self.encode_headers(request.header)?;
        let workflow_id = request.workflow_id.clone();
        let workflow_type = request.workflow_type.clone();
        self.service
            .start_workflow_execution(request)
            .await
            .map_err(|e| match e.kind {
                RpcErrorKind::AlreadyExists => ClientError::WorkflowAlreadyStarted {
                    workflow_id,
                    workflow_type,
                    run_id: e.message,
                },
                _ => ClientError::Rpc(e),
            })
    }

    async fn signal_workflow(
        &self,
        mut request: SignalWorkflowExecutionRequest,
    ) -> Result<(), ClientError> {
        request.header = self.encode_headers(request.header)?;
        Ok(self.service.signal_workflow_execution(request).await?)
    }

    async fn signal_with_start_workflow(
        &self,
        mut request: SignalWithStartWorkflowExecutionRequest,
    ) -> Result<StartWorkflowExecutionResponse, ClientError> {
        request.start.header = self.encode_headers(request.start.header)?;
        Ok(self
            .service
            .signal_with_start_workflow_execution(request)
            .await?)
    }

    async fn query_workflow(
        &self,
        mut request: QueryWorkflowRequest,
    ) -> Result<QueryWorkflowResponse, ClientError> {
        request.header = self.encode_headers(request.header)?;
        self.service
            .query_workflow(request)
            .await
            .map_err(|e| match e.kind {
                RpcErrorKind::InvalidArgument => ClientError::QueryFailed(e.message),
                _ => ClientError::Rpc(e),
            })
    }

    async fn update_workflow(
        &self,
        mut request: UpdateWorkflowExecutionRequest,
    ) -> Result<UpdateWorkflowExecutionResponse, ClientError> {
        request.header = self.encode_headers(request.header)?;
        Ok(self.service.update_workflow_execution(request).await?)
    }

    async fn poll_workflow_update(
        &self,
        request: PollWorkflowExecutionUpdateRequest,
    ) -> Result<PollWorkflowExecutionUpdateResponse, ClientError> {
        Ok(self.service.poll_workflow_execution_update(request).await?)
    }

    async fn cancel_workflow(
        &self,
        request: RequestCancelWorkflowExecutionRequest,
    ) -> Result<(), ClientError> {
        Ok(self.service.request_cancel_workflow_execution(request).await?)
    }

    async fn terminate_workflow(
        &self,
        request: TerminateWorkflowExecutionRequest,
    ) -> Result<(), ClientError> {
        Ok(self.service.terminate_workflow_execution(request).await?)
    }

    async fn describe_workflow(
        &self,
        request: DescribeWorkflowExecutionRequest,
    ) -> Result<DescribeWorkflowExecutionResponse, ClientError> {
        Ok(self.service.describe_workflow_execution(request).await?)
    }
}
