//! Structured strategies: JSON objects, arrays and sets.
//!
//! Arrays and sets accept two grammars. Text starting with `[` is parsed as
//! a JSON array; anything else is split on `,`, so `1,2,3` and a lone `7`
//! both work. Blank text is an empty collection.

use serde_json::Value;
use std::collections::BTreeSet;

use crate::framework::code::FrameworkCode;
use crate::framework::error::{ActionError, DeclarationError};
use crate::framework::value::{describe_set, Bound, ElemTag, Scalar, TypeTag};
use crate::injector::{invalid_default, reject, unsupported, Declaration, DefaultValue, Injector};

/// Splits sequence text into raw elements, or `None` for malformed JSON.
pub(crate) fn split_sequence(text: &str) -> Option<Vec<Value>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(Vec::new());
    }
    if trimmed.starts_with('[') {
        return match serde_json::from_str(trimmed) {
            Ok(Value::Array(items)) => Some(items),
            _ => None,
        };
    }
    Some(
        trimmed
            .split(',')
            .map(|item| Value::String(item.trim().to_owned()))
            .collect(),
    )
}

/// Raw elements of a native value: arrays as-is, scalars wrapped.
fn native_sequence(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::Object(_) => None,
        scalar => Some(vec![scalar.clone()]),
    }
}

fn coerce_all(elem: ElemTag, items: &[Value]) -> Option<Vec<Value>> {
    items.iter().map(|item| elem.coerce(item)).collect()
}

fn scalar_set(elem: ElemTag, items: &[Value]) -> Option<BTreeSet<Scalar>> {
    items
        .iter()
        .map(|item| elem.coerce(item).as_ref().and_then(Scalar::from_json))
        .collect()
}

/// A JSON object.
#[derive(Debug, Clone)]
pub struct ObjectInjector {
    declaration: Declaration,
}

impl ObjectInjector {
    pub fn new(declaration: Declaration) -> Self {
        Self { declaration }
    }

    fn not_json(&self, value: impl std::fmt::Display) -> ActionError {
        reject(FrameworkCode::param_not_json(), &self.declaration.alias, value)
    }
}

impl Injector for ObjectInjector {
    fn kind(&self) -> &'static str {
        "object"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        match self.declaration.type_tag {
            TypeTag::Object => Ok(()),
            ref other => Err(unsupported(self.kind(), other)),
        }
    }

    fn verify_default(&self, default: &Value) -> Result<(), DeclarationError> {
        if default.is_object() {
            Ok(())
        } else {
            Err(invalid_default(self.kind(), format!("{default} is not an object")))
        }
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(self.not_json(text));
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => Ok(Bound::Object(map)),
            _ => Err(self.not_json(text)),
        }
    }

    fn from_native(&self, value: &Value) -> Result<Bound, ActionError> {
        match value {
            Value::Object(map) => Ok(Bound::Object(map.clone())),
            other => Err(self.not_json(other)),
        }
    }
}

/// An ordered list; order and duplicates are preserved.
#[derive(Debug, Clone)]
pub struct ArrayInjector {
    declaration: Declaration,
    elem: ElemTag,
}

impl ArrayInjector {
    pub fn new(declaration: Declaration) -> Self {
        Self {
            declaration,
            elem: ElemTag::Any,
        }
    }

    fn bind_items(&self, items: Option<Vec<Value>>, raw: impl std::fmt::Display) -> Result<Bound, ActionError> {
        items
            .and_then(|items| coerce_all(self.elem, &items))
            .map(Bound::Array)
            .ok_or_else(|| reject(FrameworkCode::param_not_array(), &self.declaration.alias, raw))
    }
}

impl Injector for ArrayInjector {
    fn kind(&self) -> &'static str {
        "array"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn prepare(&mut self) -> Result<(), DeclarationError> {
        if let TypeTag::Array(elem) = self.declaration.type_tag {
            self.elem = elem;
        }
        Ok(())
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        match self.declaration.type_tag {
            TypeTag::Array(_) => Ok(()),
            ref other => Err(unsupported(self.kind(), other)),
        }
    }

    fn verify_default(&self, default: &Value) -> Result<(), DeclarationError> {
        if default.is_array() {
            Ok(())
        } else {
            Err(invalid_default(self.kind(), format!("{default} is not an array")))
        }
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError> {
        self.bind_items(split_sequence(text), text)
    }

    fn from_native(&self, value: &Value) -> Result<Bound, ActionError> {
        self.bind_items(native_sequence(value), value)
    }
}

/// A deduplicated, ordered set of scalars.
#[derive(Debug, Clone)]
pub struct SetInjector {
    declaration: Declaration,
    elem: ElemTag,
}

impl SetInjector {
    pub fn new(declaration: Declaration) -> Self {
        Self {
            declaration,
            elem: ElemTag::Any,
        }
    }

    fn bind_items(&self, items: Option<Vec<Value>>, raw: impl std::fmt::Display) -> Result<Bound, ActionError> {
        items
            .and_then(|items| scalar_set(self.elem, &items))
            .map(Bound::Set)
            .ok_or_else(|| reject(FrameworkCode::param_not_set(), &self.declaration.alias, raw))
    }
}

impl Injector for SetInjector {
    fn kind(&self) -> &'static str {
        "set"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn prepare(&mut self) -> Result<(), DeclarationError> {
        if let TypeTag::Set(elem) = self.declaration.type_tag {
            self.elem = elem;
        }
        Ok(())
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        match self.declaration.type_tag {
            TypeTag::Set(ElemTag::Float) => Err(unsupported(self.kind(), &self.declaration.type_tag)),
            TypeTag::Set(_) => Ok(()),
            ref other => Err(unsupported(self.kind(), other)),
        }
    }

    fn verify_default(&self, default: &Value) -> Result<(), DeclarationError> {
        if default.is_array() {
            Ok(())
        } else {
            Err(invalid_default(self.kind(), format!("{default} is not an array")))
        }
    }

    /// A declared domain doubles as the default set.
    fn default_binding(&self, default: &DefaultValue) -> Result<Option<Bound>, DeclarationError> {
        match default {
            DefaultValue::Domain(domain) => {
                let items: Vec<Value> = domain.iter().map(Scalar::to_json).collect();
                scalar_set(self.elem, &items)
                    .map(|set| Some(Bound::Set(set)))
                    .ok_or_else(|| {
                        invalid_default(self.kind(), format!("{} does not fit set[{}]", describe_set(domain), self.elem))
                    })
            }
            DefaultValue::Unset => Ok(None),
            DefaultValue::Null => Ok(Some(Bound::Null)),
            DefaultValue::Value(value) => {
                self.verify_default(value)?;
                self.from_native(value)
                    .map(Some)
                    .map_err(|error| invalid_default(self.kind(), error.to_string()))
            }
            DefaultValue::Pattern(_) => Err(invalid_default(self.kind(), "a pattern needs a pattern injector")),
        }
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError> {
        self.bind_items(split_sequence(text), text)
    }

    fn from_native(&self, value: &Value) -> Result<Bound, ActionError> {
        self.bind_items(native_sequence(value), value)
    }
}
