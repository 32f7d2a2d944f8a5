//! # Actions
//!
//! An [`Action`] is one externally callable operation: a title
//! (`module.name`), an ordered list of parameter declarations, the injectors
//! chosen for them and an async handler.
//!
//! ```ignore
//! let action = Action::builder("user", "rename")
//!     .param("uid", TypeTag::Int)
//!     .param_default("name", TypeTag::Str, "anonymous")
//!     .nullable("note", TypeTag::Str)
//!     .param("__session", TypeTag::Named("session"))
//!     .handler(|args: Args| async move {
//!         let uid: i64 = args.get("uid")?;
//!         Ok(format!("renamed {uid}"))
//!     });
//! ```
//!
//! [`Action::prepare`] runs once at registration (and may be re-run; it
//! always rebuilds from scratch). After that the injector list is read-only
//! and binding walks it in declaration order.

use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::trace;

use crate::framework::code::{CodeArgs, FrameworkCode};
use crate::framework::envelope::Reply;
use crate::framework::error::{ActionError, RegistrationError};
use crate::framework::request::Request;
use crate::framework::value::{Scalar, TypeTag};
use crate::injector::{
    Binding, Declaration, DefaultValue, Injector, InjectorRegistry, ReservedInjector, ReservedParams,
};

pub mod args;

pub use args::{Args, FromBound};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Reply, ActionError>> + Send>>;

/// Type-erased async handler.
pub type Handler = Arc<dyn Fn(Args) -> HandlerFuture + Send + Sync>;

type InjectorFactory = Arc<dyn Fn() -> Box<dyn Injector> + Send + Sync>;

/// One declared handler parameter.
#[derive(Clone)]
pub struct ParamSpec {
    name: String,
    alias: Option<String>,
    type_tag: Option<TypeTag>,
    default: DefaultValue,
    injector: Option<InjectorFactory>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            type_tag: None,
            default: DefaultValue::Unset,
            injector: None,
        }
    }

    pub fn typed(mut self, tag: TypeTag) -> Self {
        self.type_tag = Some(tag);
        self
    }

    /// Reads the value from a differently named request parameter.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn default(mut self, default: DefaultValue) -> Self {
        self.default = default;
        self
    }

    /// Uses `injector` instead of selecting one from the registry.
    pub fn injector<I: Injector + Clone + 'static>(mut self, injector: I) -> Self {
        self.injector = Some(Arc::new(move || Box::new(injector.clone()) as Box<dyn Injector>));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("type_tag", &self.type_tag)
            .field("default", &self.default)
            .field("override", &self.injector.is_some())
            .finish()
    }
}

/// Declares an [`Action`].
#[derive(Debug)]
pub struct ActionBuilder {
    module: String,
    name: String,
    params: Vec<ParamSpec>,
    stream: bool,
}

impl ActionBuilder {
    /// A required parameter.
    pub fn param(self, name: impl Into<String>, tag: TypeTag) -> Self {
        self.declare(ParamSpec::new(name).typed(tag))
    }

    pub fn param_default(self, name: impl Into<String>, tag: TypeTag, default: impl Into<Value>) -> Self {
        let default: Value = default.into();
        self.declare(ParamSpec::new(name).typed(tag).default(DefaultValue::from(default)))
    }

    /// An optional parameter defaulting to `null`.
    pub fn nullable(self, name: impl Into<String>, tag: TypeTag) -> Self {
        self.declare(ParamSpec::new(name).typed(tag).default(DefaultValue::Null))
    }

    /// A parameter restricted to `values`.
    pub fn domain<I, S>(self, name: impl Into<String>, tag: TypeTag, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scalar>,
    {
        self.declare(ParamSpec::new(name).typed(tag).default(DefaultValue::domain(values)))
    }

    pub fn declare(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Overrides the injector of `name`, declaring the parameter if needed.
    pub fn with_injector<I: Injector + Clone + 'static>(mut self, name: &str, injector: I) -> Self {
        match self.params.iter_mut().find(|spec| spec.name == name) {
            Some(spec) => *spec = spec.clone().injector(injector),
            None => self.params.push(ParamSpec::new(name).injector(injector)),
        }
        self
    }

    /// Marks the action as producing a chunk stream.
    pub fn stream(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn handler<F, Fut, R>(self, handler: F) -> Action
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ActionError>> + Send + 'static,
        R: Into<Reply> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args: Args| -> HandlerFuture {
            let fut = handler(args);
            Box::pin(async move { fut.await.map(Into::into) })
        });
        Action {
            title: format!("{}.{}", self.module, self.name),
            module: self.module,
            name: self.name,
            params: self.params,
            stream: self.stream,
            injectors: Vec::new(),
            handler,
        }
    }
}

/// A registered operation.
pub struct Action {
    module: String,
    name: String,
    title: String,
    params: Vec<ParamSpec>,
    stream: bool,
    injectors: Vec<Arc<dyn Injector>>,
    handler: Handler,
}

impl Action {
    pub fn builder(module: impl Into<String>, name: impl Into<String>) -> ActionBuilder {
        ActionBuilder {
            module: module.into(),
            name: name.into(),
            params: Vec::new(),
            stream: false,
        }
    }

    /// `module.name`.
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_stream(&self) -> bool {
        self.stream
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Injectors in binding order; empty until prepared.
    pub fn injectors(&self) -> &[Arc<dyn Injector>] {
        &self.injectors
    }

    /// Selects one injector per parameter. Re-running rebuilds the list.
    pub fn prepare(
        &mut self,
        registry: &InjectorRegistry,
        reserved: &ReservedParams,
    ) -> Result<(), RegistrationError> {
        self.injectors.clear();
        let mut seen = HashSet::new();
        let mut injectors = Vec::with_capacity(self.params.len());
        for spec in &self.params {
            if !seen.insert(spec.name.as_str()) {
                return Err(RegistrationError::DuplicateParam {
                    title: self.title.clone(),
                    param: spec.name.clone(),
                });
            }
            let injector = select(&self.title, spec, registry, reserved)?;
            trace!(action = %self.title, param = %spec.name, injector = injector.kind(), "injector selected");
            injectors.push(Arc::from(injector));
        }
        self.injectors = injectors;
        Ok(())
    }

    /// Binds every parameter in order, stopping at the first failure.
    pub fn bind(&self, request: &Arc<Request>) -> Result<Args, ActionError> {
        let mut args = Args::with_capacity(self.injectors.len());
        for injector in &self.injectors {
            let declaration = injector.declaration();
            match injector.bind(request) {
                Binding::Value(value) => args.insert(declaration.param.clone(), value),
                Binding::Missing => {
                    return Err(FrameworkCode::missing_param()
                        .error(&CodeArgs::new().with("param", &declaration.alias))
                        .into())
                }
                Binding::Rejected(error) => return Err(error),
            }
        }
        Ok(args)
    }

    pub fn invoke(&self, args: Args) -> HandlerFuture {
        (self.handler)(args)
    }
}

fn select(
    title: &str,
    spec: &ParamSpec,
    registry: &InjectorRegistry,
    reserved: &ReservedParams,
) -> Result<Box<dyn Injector>, RegistrationError> {
    let rejected = |source| RegistrationError::Rejected {
        title: title.to_owned(),
        param: spec.name.clone(),
        source,
    };

    if let Some(accessor) = reserved.get(&spec.name) {
        return Ok(Box::new(ReservedInjector::new(&spec.name, Arc::clone(accessor))));
    }

    if let Some(factory) = &spec.injector {
        let mut injector = factory();
        let declaration = injector.declaration_mut();
        declaration.param = spec.name.clone();
        if declaration.alias.is_empty() {
            declaration.alias = spec.alias.clone().unwrap_or_else(|| spec.name.clone());
        }
        if !spec.default.is_unset() {
            declaration.default = spec.default.clone();
        }
        injector.validate().map_err(rejected)?;
        return Ok(injector);
    }

    let declaration = Declaration::resolve(
        &spec.name,
        spec.alias.as_deref(),
        spec.type_tag.clone(),
        spec.default.clone(),
    )
    .map_err(rejected)?;
    registry.resolve(&declaration).map_err(|rejections| {
        let reasons: Vec<String> = rejections
            .iter()
            .map(|(candidate, error)| format!("{candidate}: {error}"))
            .collect();
        RegistrationError::NoInjector {
            title: title.to_owned(),
            param: spec.name.clone(),
            reasons: reasons.join("; "),
        }
    })
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("title", &self.title)
            .field("params", &self.params)
            .field("stream", &self.stream)
            .field("injectors", &self.injectors)
            .finish()
    }
}

/// `Action[user.rename][<uid:int>, name:str="anonymous"]`, framework parameters hidden.
impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .injectors
            .iter()
            .map(|injector| injector.declaration())
            .filter(|declaration| !declaration.param.starts_with('_'))
            .map(ToString::to_string)
            .collect();
        write!(f, "Action[{}][{}]", self.title, params.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::request::LocalSession;
    use crate::framework::value::{Bound, ElemTag};
    use crate::injector::PatternInjector;
    use regex::Regex;

    fn prepared(mut action: Action) -> Action {
        action
            .prepare(&InjectorRegistry::new(), &ReservedParams::new())
            .unwrap();
        action
    }

    fn kinds(action: &Action) -> Vec<&'static str> {
        action.injectors().iter().map(|i| i.kind()).collect()
    }

    fn noop() -> impl Fn(Args) -> std::future::Ready<Result<(), ActionError>> + Send + Sync + 'static {
        |_| std::future::ready(Ok(()))
    }

    #[test]
    fn prepare_is_idempotent() {
        let mut action = Action::builder("user", "find")
            .param("uid", TypeTag::Int)
            .param("__session", TypeTag::Named("session"))
            .handler(noop());
        let registry = InjectorRegistry::new();
        let reserved = ReservedParams::new();
        action.prepare(&registry, &reserved).unwrap();
        let first = kinds(&action);
        action.prepare(&registry, &reserved).unwrap();
        assert_eq!(kinds(&action), first);
        assert_eq!(first, vec!["int", "reserved"]);
    }

    #[test]
    fn duplicate_parameters_are_refused() {
        let mut action = Action::builder("user", "find")
            .param("uid", TypeTag::Int)
            .param("uid", TypeTag::Str)
            .handler(noop());
        let err = action
            .prepare(&InjectorRegistry::new(), &ReservedParams::new())
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateParam { .. }));
    }

    #[test]
    fn undeclarable_parameters_report_every_candidate() {
        let mut action = Action::builder("user", "find")
            .param("uid", TypeTag::Named("uuid"))
            .handler(noop());
        match action.prepare(&InjectorRegistry::new(), &ReservedParams::new()) {
            Err(RegistrationError::NoInjector { title, param, reasons }) => {
                assert_eq!(title, "user.find");
                assert_eq!(param, "uid");
                assert!(reasons.contains("int:"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn overrides_replace_or_append_parameters() {
        let phone = PatternInjector::matching(Regex::new(r"\d{11}").unwrap());
        let action = prepared(
            Action::builder("user", "register")
                .param("phone", TypeTag::Str)
                .with_injector("phone", phone.clone())
                .with_injector("backup", phone)
                .handler(noop()),
        );
        assert_eq!(kinds(&action), vec!["pattern", "pattern"]);
        assert_eq!(action.injectors()[1].declaration().alias, "backup");
    }

    #[test]
    fn binding_stops_at_the_first_failure() {
        let action = prepared(
            Action::builder("math", "add")
                .param("a", TypeTag::Int)
                .param("b", TypeTag::Int)
                .param("ids", TypeTag::Array(ElemTag::Int))
                .handler(noop()),
        );
        let req = Request::builder("math.add", Arc::new(LocalSession::new("s")))
            .param("a", "x")
            .build()
            .unwrap();
        match action.bind(&req) {
            Err(ActionError::Business(e)) => assert_eq!(e.code, 1104),
            other => panic!("unexpected {other:?}"),
        }

        let req = Request::builder("math.add", Arc::new(LocalSession::new("s")))
            .param("a", 1)
            .build()
            .unwrap();
        match action.bind(&req) {
            Err(ActionError::Business(e)) => {
                assert_eq!(e.code, 1113);
                assert!(e.message.contains('b'));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn aliases_and_defaults_bind() {
        let action = prepared(
            Action::builder("user", "list")
                .declare(ParamSpec::new("page").typed(TypeTag::Int).alias("p"))
                .param_default("size", TypeTag::Int, 20)
                .nullable("note", TypeTag::Str)
                .handler(noop()),
        );
        let req = Request::builder("user.list", Arc::new(LocalSession::new("s")))
            .param("p", "3")
            .build()
            .unwrap();
        let args = action.bind(&req).unwrap();
        assert_eq!(args.get::<i64>("page").unwrap(), 3);
        assert_eq!(args.get::<i64>("size").unwrap(), 20);
        assert!(matches!(args.raw("note"), Some(Bound::Null)));
        assert_eq!(action.to_string(), "Action[user.list][<p:int>, size:int=20, note:str=null]");
    }
}
