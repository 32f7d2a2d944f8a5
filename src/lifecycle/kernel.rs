use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::action::Action;
use crate::config::DispatchConfig;
use crate::dispatch::{ActionHooks, Dispatcher, NoHooks};
use crate::framework::code::{Code, CodeRegistry};
use crate::framework::envelope::Packet;
use crate::framework::error::{ActionError, DeclarationError, DispatchError, RegistrationError, StartupError};
use crate::framework::request::{Request, RequestBuilder, Session};
use crate::framework::value::Bound;
use crate::injector::{Declaration, Injector, InjectorBuilder, InjectorRegistry, ReservedAccessor, ReservedParams};

/// The dispatch runtime: registries, configuration and the dispatcher.
///
/// `Kernel` is responsible for:
/// - **Startup validation**: code templates, unique codes, unique reserved names
/// - **Registration**: preparing actions against its injector registry
/// - **Dispatch**: running requests, one tokio task each via [`Kernel::spawn`]
///
/// Everything is read-only after [`KernelBuilder::build`], so one `Arc<Kernel>`
/// serves all request tasks without locks.
///
/// # Example
///
/// ```ignore
/// let kernel = Kernel::builder()
///     .config(DispatchConfig::from_env())
///     .codes(&OrderCode::all())
///     .build()?;
///
/// let add = kernel.register(
///     Action::builder("math", "add")
///         .param("a", TypeTag::Int)
///         .param("b", TypeTag::Int)
///         .handler(|args: Args| async move {
///             Ok(json!({"sum": args.get::<i64>("a")? + args.get::<i64>("b")?}))
///         }),
/// )?;
///
/// let request = kernel.request("math.add", session).param("a", 1).param("b", "2").build()?;
/// let packet = kernel.spawn(add, request).await??;
/// ```
pub struct Kernel {
    config: DispatchConfig,
    codes: CodeRegistry,
    injectors: InjectorRegistry,
    reserved: ReservedParams,
    dispatcher: Dispatcher,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::default()
    }

    /// Prepares `action` and hands it back ready for dispatch.
    pub fn register(&self, mut action: Action) -> Result<Arc<Action>, RegistrationError> {
        action.prepare(&self.injectors, &self.reserved)?;
        if self.config.log_registrations {
            info!(action = %action, "registered");
            for injector in action.injectors() {
                let declaration = injector.declaration();
                info!(
                    action = %action.title(),
                    param = %declaration.param,
                    alias = %declaration.alias,
                    injector = injector.kind(),
                    "bound"
                );
            }
        }
        Ok(Arc::new(action))
    }

    /// A request builder using this kernel's stream buffer.
    pub fn request(&self, cmd: impl Into<String>, session: Arc<dyn Session>) -> RequestBuilder {
        Request::builder(cmd, session).stream_buffer(self.config.stream_buffer)
    }

    pub async fn dispatch(&self, action: &Action, request: Arc<Request>) -> Result<Packet, DispatchError> {
        self.dispatcher.dispatch(action, request).await
    }

    /// Dispatches on a task of its own.
    pub fn spawn(
        self: &Arc<Self>,
        action: Arc<Action>,
        request: Arc<Request>,
    ) -> JoinHandle<Result<Packet, DispatchError>> {
        let kernel = Arc::clone(self);
        tokio::spawn(async move { kernel.dispatch(&action, request).await })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn codes(&self) -> &CodeRegistry {
        &self.codes
    }

    pub fn injectors(&self) -> &InjectorRegistry {
        &self.injectors
    }

    pub fn reserved(&self) -> &ReservedParams {
        &self.reserved
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .field("codes", &self.codes.len())
            .field("injectors", &self.injectors)
            .field("reserved", &self.reserved)
            .finish()
    }
}

/// Collects startup configuration; [`KernelBuilder::build`] validates it all at once.
pub struct KernelBuilder {
    config: DispatchConfig,
    codes: Vec<&'static Code>,
    injectors: Vec<(String, InjectorBuilder)>,
    reserved: Vec<(String, ReservedAccessor)>,
    hooks: Arc<dyn ActionHooks>,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self {
            config: DispatchConfig::default(),
            codes: Vec::new(),
            injectors: Vec::new(),
            reserved: Vec::new(),
            hooks: Arc::new(NoHooks),
        }
    }
}

impl KernelBuilder {
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Application codes, registered after the framework catalog.
    pub fn codes(mut self, codes: &[&'static Code]) -> Self {
        self.codes.extend_from_slice(codes);
        self
    }

    /// A custom injector candidate, tried after every built-in one.
    pub fn injector<F>(mut self, name: impl Into<String>, build: F) -> Self
    where
        F: Fn(Declaration) -> Result<Box<dyn Injector>, DeclarationError> + Send + Sync + 'static,
    {
        self.injectors.push((name.into(), Arc::new(build)));
        self
    }

    /// An extra reserved parameter name.
    pub fn reserved<F>(mut self, name: impl Into<String>, accessor: F) -> Self
    where
        F: Fn(&Arc<Request>) -> Result<Bound, ActionError> + Send + Sync + 'static,
    {
        self.reserved.push((name.into(), Arc::new(accessor)));
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ActionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn build(self) -> Result<Arc<Kernel>, StartupError> {
        let mut codes = CodeRegistry::with_framework_codes()?;
        codes.register_all(&self.codes)?;

        let mut injectors = InjectorRegistry::new();
        for (name, build) in self.injectors {
            injectors.register(name, move |declaration| build(declaration))?;
        }

        let mut reserved = ReservedParams::new();
        for (name, accessor) in self.reserved {
            reserved.register(name, move |request| accessor(request))?;
        }

        info!(
            codes = codes.len(),
            injectors = injectors.names().len(),
            strict = self.config.strict,
            "kernel ready"
        );
        Ok(Arc::new(Kernel {
            dispatcher: Dispatcher::new(self.config.clone(), self.hooks),
            config: self.config,
            codes,
            injectors,
            reserved,
        }))
    }
}
