//! Parameters the framework supplies itself.
//!
//! Names starting with `__` never come from the client:
//!
//! | name | strategy | binds |
//! |------|----------|-------|
//! | `__request`, `__req` | reserved | the request |
//! | `__params`, `__param` | reserved | the raw parameter map |
//! | `__session` | reserved | the caller's session |
//! | `__stream` | stream | the request's chunk writer |
//! | any other `__name` | framework | a value the transport stashed on the request |

use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::framework::error::{ActionError, DeclarationError, FrameworkException, StartupError};
use crate::framework::request::Request;
use crate::framework::value::{Bound, TypeTag};
use crate::injector::{Binding, Declaration, DefaultValue, Injector};

/// Reads a reserved value off the request.
pub type ReservedAccessor = Arc<dyn Fn(&Arc<Request>) -> Result<Bound, ActionError> + Send + Sync>;

/// The table of reserved parameter names.
#[derive(Clone)]
pub struct ReservedParams {
    accessors: IndexMap<String, ReservedAccessor>,
}

impl ReservedParams {
    /// The built-in reserved names.
    pub fn new() -> Self {
        let mut accessors: IndexMap<String, ReservedAccessor> = IndexMap::new();
        let request: ReservedAccessor = Arc::new(|req| Ok(Bound::Request(Arc::clone(req))));
        let params: ReservedAccessor = Arc::new(|req| Ok(Bound::Params(req.params().clone())));
        let session: ReservedAccessor = Arc::new(|req| Ok(Bound::Session(Arc::clone(req.session()))));
        accessors.insert("__request".to_owned(), request.clone());
        accessors.insert("__req".to_owned(), request);
        accessors.insert("__params".to_owned(), params.clone());
        accessors.insert("__param".to_owned(), params);
        accessors.insert("__session".to_owned(), session);
        Self { accessors }
    }

    pub fn empty() -> Self {
        Self {
            accessors: IndexMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, accessor: F) -> Result<(), StartupError>
    where
        F: Fn(&Arc<Request>) -> Result<Bound, ActionError> + Send + Sync + 'static,
    {
        let name = name.into();
        if !name.starts_with("__") {
            return Err(StartupError::ReservedName(name));
        }
        if self.accessors.contains_key(&name) {
            return Err(StartupError::DuplicateReserved(name));
        }
        self.accessors.insert(name, Arc::new(accessor));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ReservedAccessor> {
        self.accessors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.accessors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.accessors.keys().map(String::as_str)
    }
}

impl Default for ReservedParams {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReservedParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

fn never_from_wire(param: &str) -> ActionError {
    ActionError::assertion(format!("[{param}] is supplied by the framework, not the client"))
}

/// Binds a reserved name through its accessor.
#[derive(Clone)]
pub struct ReservedInjector {
    declaration: Declaration,
    accessor: ReservedAccessor,
}

impl ReservedInjector {
    pub fn new(name: &str, accessor: ReservedAccessor) -> Self {
        Self {
            declaration: Declaration::new(name, TypeTag::Named("reserved")),
            accessor,
        }
    }
}

impl fmt::Debug for ReservedInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReservedInjector")
            .field("param", &self.declaration.param)
            .finish()
    }
}

impl Injector for ReservedInjector {
    fn kind(&self) -> &'static str {
        "reserved"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn verify_param(&self) -> Result<(), DeclarationError> {
        Ok(())
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        Ok(())
    }

    fn default_binding(&self, _default: &DefaultValue) -> Result<Option<Bound>, DeclarationError> {
        Ok(None)
    }

    fn bind(&self, request: &Arc<Request>) -> Binding {
        (self.accessor)(request).into()
    }

    fn from_text(&self, _text: &str) -> Result<Bound, ActionError> {
        Err(never_from_wire(&self.declaration.param))
    }
}

/// Reads any other `__name` from the values the transport stashed on the request.
#[derive(Debug, Clone)]
pub struct FrameworkInjector {
    declaration: Declaration,
}

impl FrameworkInjector {
    pub fn new(declaration: Declaration) -> Self {
        Self { declaration }
    }
}

impl Injector for FrameworkInjector {
    fn kind(&self) -> &'static str {
        "framework"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn verify_param(&self) -> Result<(), DeclarationError> {
        if self.declaration.param.starts_with("__") {
            Ok(())
        } else {
            Err(DeclarationError::NotFramework(self.declaration.param.clone()))
        }
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        Ok(())
    }

    fn default_binding(&self, _default: &DefaultValue) -> Result<Option<Bound>, DeclarationError> {
        Ok(None)
    }

    fn bind(&self, request: &Arc<Request>) -> Binding {
        let param = &self.declaration.param;
        match request.framework_value(param) {
            Some(value) => Binding::Value(value.clone()),
            None => Binding::Rejected(
                FrameworkException::new(format!("framework parameter [{param}] was not supplied")).into(),
            ),
        }
    }

    fn from_text(&self, _text: &str) -> Result<Bound, ActionError> {
        Err(never_from_wire(&self.declaration.param))
    }

    fn from_native(&self, _value: &Value) -> Result<Bound, ActionError> {
        Err(never_from_wire(&self.declaration.param))
    }
}

/// `__stream`: the request's chunk writer, opened on first use.
#[derive(Debug, Clone)]
pub struct StreamInjector {
    declaration: Declaration,
}

impl StreamInjector {
    pub const PARAM: &'static str = "__stream";

    pub fn new(declaration: Declaration) -> Self {
        Self { declaration }
    }
}

impl Injector for StreamInjector {
    fn kind(&self) -> &'static str {
        "stream"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn verify_param(&self) -> Result<(), DeclarationError> {
        if self.declaration.param == Self::PARAM {
            Ok(())
        } else {
            Err(DeclarationError::NotFramework(self.declaration.param.clone()))
        }
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        Ok(())
    }

    fn default_binding(&self, _default: &DefaultValue) -> Result<Option<Bound>, DeclarationError> {
        Ok(None)
    }

    fn bind(&self, request: &Arc<Request>) -> Binding {
        Binding::Value(Bound::Stream(request.init_stream()))
    }

    fn from_text(&self, _text: &str) -> Result<Bound, ActionError> {
        Err(never_from_wire(Self::PARAM))
    }
}
