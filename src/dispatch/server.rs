use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};

use crate::{
    dispatch::{audit::audit_arguments, DispatchError, Stage},
    errors::{ErrorCode, HandlerError},
    middleware::{Middleware, MiddlewareChain, MiddlewareOutcome},
    protocol::{decode_request, Content, Request, Response, Target},
    registry::{
        CallContext, Catalog, RegistryError, ResourceDefinition, ResourceRegistry,
        ToolDefinition, ToolRegistry,
    },
    task::ScopedTask,
};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Collects capabilities and middleware. Once built, nothing can be added.
#[derive(Debug)]
pub struct ServerBuilder {
    tools: ToolRegistry,
    resources: ResourceRegistry,
    middleware: MiddlewareChain,
    call_timeout: Duration,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            tools: ToolRegistry::new(),
            resources: ResourceRegistry::new(),
            middleware: MiddlewareChain::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tool(&mut self, definition: ToolDefinition) -> Result<&mut Self, RegistryError> {
        self.tools.register(definition)?;
        Ok(self)
    }

    pub fn register_resource(
        &mut self,
        definition: ResourceDefinition,
    ) -> Result<&mut Self, RegistryError> {
        self.resources.register(definition)?;
        Ok(self)
    }

    /// Appends a middleware. Layers run in the order they are added.
    pub fn middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// Server-wide execution limit for tools without their own timeout and for resource reads.
    pub fn call_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.call_timeout = timeout;
        self
    }

    pub fn build(self) -> Dispatcher {
        let catalog = Arc::new(Catalog::collect(&self.tools, &self.resources));
        for tool in &catalog.tools {
            debug!(tool = %tool.name, arguments = tool.arguments.len(), "tool available");
        }
        for resource in &catalog.resources {
            debug!(pattern = %resource.pattern, template = resource.template, "resource available");
        }
        info!(
            tools = self.tools.len(),
            resources = self.resources.len(),
            middleware = self.middleware.len(),
            call_timeout_ms = self.call_timeout.as_millis() as u64,
            "dispatcher ready"
        );

        Dispatcher {
            context: Arc::new(ServerContext {
                tools: self.tools,
                resources: self.resources,
                middleware: self.middleware,
                call_timeout: self.call_timeout,
                catalog,
            }),
        }
    }
}

/// Everything a request needs, shared read-only by all in-flight requests.
#[derive(Debug)]
pub struct ServerContext {
    pub tools: ToolRegistry,
    pub resources: ResourceRegistry,
    pub middleware: MiddlewareChain,
    pub call_timeout: Duration,
    /// Handed to every handler through [`CallContext`].
    pub catalog: Arc<Catalog>,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    context: Arc<ServerContext>,
}

struct StageTracker {
    span: Span,
    current: Stage,
}

impl StageTracker {
    fn enter(&mut self, stage: Stage) {
        self.current = stage;
        self.span.record("stage", stage.as_str());
        debug!(stage = %stage, "stage entered");
    }
}

impl Dispatcher {
    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    /// Decodes one raw message and dispatches it. Undecodable input yields `INVALID_REQUEST`.
    pub async fn dispatch_raw(&self, raw: &str) -> Response {
        match decode_request(raw) {
            Ok(request) => self.dispatch(request).await,
            Err(err) => {
                warn!(error = %err, "undecodable request");
                err.into_response()
            }
        }
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        let span = info_span!(
            "dispatch",
            request_id = %request.id,
            kind = request.kind().as_str(),
            target = %request.target.name(),
            stage = field::Empty,
        );

        async move {
            let started_at = Instant::now();
            let id = request.id.clone();
            let arguments = audit_arguments(&request.arguments);
            let mut tracker = StageTracker {
                span: Span::current(),
                current: Stage::Received,
            };
            tracker.enter(Stage::Received);

            let (response, failed_at) = match self.run(request, &mut tracker).await {
                Ok(content) => {
                    tracker.enter(Stage::Done);
                    (Response::success(Some(id), content), None)
                }
                Err(err) => {
                    let failed_at = tracker.current;
                    log_failure(&err, failed_at);
                    tracker.enter(Stage::Errored);
                    (err.into_response(Some(id)), Some(failed_at))
                }
            };

            info!(
                arguments = %arguments,
                outcome = if response.is_success() { "success" } else { "failure" },
                code = response.code.map(ErrorCode::as_str),
                failed_at = failed_at.map(Stage::as_str),
                duration_ms = started_at.elapsed().as_millis() as u64,
                "request audited"
            );

            response
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: Request,
        tracker: &mut StageTracker,
    ) -> Result<Vec<Content>, DispatchError> {
        match request.target.clone() {
            Target::Tool(name) => self.call_tool(&name, request, tracker).await,
            Target::Resource(uri) => self.read_resource(&uri, request, tracker).await,
        }
    }

    async fn call_tool(
        &self,
        name: &str,
        request: Request,
        tracker: &mut StageTracker,
    ) -> Result<Vec<Content>, DispatchError> {
        let definition = self
            .context
            .tools
            .lookup(name)
            .ok_or_else(|| DispatchError::ToolNotFound(name.to_string()))?;

        tracker.enter(Stage::Validating);
        let args = definition.input_schema().validate(&request.arguments)?;

        tracker.enter(Stage::Authorizing);
        let request = self.authorize(request).await?;

        tracker.enter(Stage::Executing);
        let handler = definition.handler();
        let ctx = CallContext::for_request(&request, &self.context.catalog);
        let timeout = definition.timeout().unwrap_or(self.context.call_timeout);
        let content = execute(timeout, async move { handler.call(args, ctx).await }).await?;

        tracker.enter(Stage::Responding);
        Ok(content)
    }

    async fn read_resource(
        &self,
        uri: &str,
        request: Request,
        tracker: &mut StageTracker,
    ) -> Result<Vec<Content>, DispatchError> {
        let (placeholders, definition) = self
            .context
            .resources
            .resolve(uri)
            .ok_or_else(|| DispatchError::ResourceNotFound(uri.to_string()))?;

        tracker.enter(Stage::Authorizing);
        let request = self.authorize(request).await?;

        tracker.enter(Stage::Executing);
        let resolver = definition.resolver();
        let ctx = CallContext::for_request(&request, &self.context.catalog);
        let owned_uri = uri.to_string();
        let text = execute(self.context.call_timeout, async move {
            resolver.read(&owned_uri, placeholders, ctx).await
        })
        .await?;

        tracker.enter(Stage::Responding);
        let mime_type = definition.mime_type().map(str::to_string);
        Ok(vec![Content::resource(uri, mime_type, text)])
    }

    async fn authorize(&self, request: Request) -> Result<Request, DispatchError> {
        match self.context.middleware.run(request).await {
            MiddlewareOutcome::Proceed(request) => Ok(request),
            MiddlewareOutcome::Reject(rejection) => Err(DispatchError::Rejected(rejection)),
        }
    }
}

/// Runs handler work in its own task, bounded by `timeout`. The task is aborted if the limit
/// is hit or the caller goes away.
async fn execute<T, F>(timeout: Duration, work: F) -> Result<T, DispatchError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, HandlerError>> + Send + 'static,
{
    let task = ScopedTask::spawn(work);

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result.map_err(DispatchError::from),
        // a handler task is only ever aborted by us, so a join error means it panicked
        Ok(Err(_)) => Err(DispatchError::HandlerPanicked),
        Err(_) => Err(DispatchError::Timeout(timeout)),
    }
}

fn log_failure(err: &DispatchError, stage: Stage) {
    match err {
        DispatchError::Handler(HandlerError::Failed(source)) => {
            error!(failed_at = %stage, error = %source, "handler failed");
        }
        DispatchError::HandlerPanicked => {
            error!(failed_at = %stage, "handler panicked");
        }
        DispatchError::Timeout(limit) => {
            warn!(failed_at = %stage, limit_ms = limit.as_millis() as u64, "handler timed out");
        }
        other => {
            debug!(failed_at = %stage, error = %other, "request failed");
        }
    }
}
