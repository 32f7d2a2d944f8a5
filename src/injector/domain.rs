//! Enumerated strategies.
//!
//! - [`DomainInjector`]: a temporary enumeration declared inline as a
//!   `Domain` default (`enum_int`, `temp_enum`, `temp_enum_set`).
//! - [`EnumInjector`], [`IntEnumInjector`], [`EnumSetInjector`]: a declared
//!   [`EnumDef`], resolved by member name, member value or its text form.

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::framework::code::{CodeArgs, FrameworkCode};
use crate::framework::error::{ActionError, DeclarationError};
use crate::framework::value::{describe_set, Bound, ElemTag, EnumDef, EnumMember, Scalar, TypeTag};
use crate::injector::json::split_sequence;
use crate::injector::{invalid_default, unsupported, Declaration, DefaultValue, Injector};

fn not_in_domain(alias: &str, value: impl std::fmt::Display, domain: String) -> ActionError {
    FrameworkCode::value_not_in_domain()
        .error(
            &CodeArgs::new()
                .with("param", alias)
                .with("value", value)
                .with("domain", domain),
        )
        .into()
}

/// Shape of a temporary enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainKind {
    /// One integer out of the domain.
    Int,
    /// One string out of the domain.
    Str,
    /// A subset of the domain.
    Set,
}

/// Values restricted to an inline domain.
#[derive(Debug, Clone)]
pub struct DomainInjector {
    declaration: Declaration,
    shape: DomainKind,
    elem: ElemTag,
    domain: BTreeSet<Scalar>,
}

impl DomainInjector {
    pub fn new(declaration: Declaration, shape: DomainKind) -> Self {
        Self {
            declaration,
            shape,
            elem: ElemTag::Any,
            domain: BTreeSet::new(),
        }
    }

    pub fn domain(&self) -> &BTreeSet<Scalar> {
        &self.domain
    }

    /// Finds the domain member a textual value stands for.
    fn admit_text(&self, text: &str) -> Option<Scalar> {
        if self.elem != ElemTag::Int {
            let candidate = Scalar::Str(text.to_owned());
            if self.domain.contains(&candidate) {
                return Some(candidate);
            }
        }
        if self.elem != ElemTag::Str {
            if let Ok(number) = text.trim().parse::<i64>() {
                let candidate = Scalar::Int(number);
                if self.domain.contains(&candidate) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    fn admit(&self, value: &Value) -> Option<Scalar> {
        match value {
            Value::String(text) => self.admit_text(text),
            Value::Number(number) => self.admit_text(&number.to_string()),
            _ => None,
        }
    }

    fn reject(&self, value: impl std::fmt::Display) -> ActionError {
        not_in_domain(&self.declaration.alias, value, describe_set(&self.domain))
    }

    fn bind_one(&self, scalar: Scalar) -> Bound {
        match scalar {
            Scalar::Int(number) => Bound::Int(number),
            Scalar::Str(text) => Bound::Str(text),
            Scalar::Bool(flag) => Bound::Bool(flag),
        }
    }

    fn bind_many(&self, items: Vec<Value>) -> Result<Bound, ActionError> {
        items
            .iter()
            .map(|item| self.admit(item).ok_or_else(|| self.reject(item)))
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Bound::Set)
    }
}

impl Injector for DomainInjector {
    fn kind(&self) -> &'static str {
        match self.shape {
            DomainKind::Int => "enum_int",
            DomainKind::Str => "temp_enum",
            DomainKind::Set => "temp_enum_set",
        }
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn prepare(&mut self) -> Result<(), DeclarationError> {
        let DefaultValue::Domain(domain) = &self.declaration.default else {
            return Err(invalid_default(self.kind(), "declare the allowed values as a domain"));
        };
        if domain.is_empty() || domain.iter().any(|s| matches!(s, Scalar::Bool(_))) {
            return Err(invalid_default(
                self.kind(),
                format!("{} must be non-empty str or int values", describe_set(domain)),
            ));
        }
        self.domain = domain.clone();
        self.declaration.default = DefaultValue::Unset;
        Ok(())
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        match (self.shape, &self.declaration.type_tag) {
            (DomainKind::Int, TypeTag::Int) | (DomainKind::Str, TypeTag::Str) => Ok(()),
            (DomainKind::Set, TypeTag::Set(ElemTag::Int | ElemTag::Str | ElemTag::Any)) => Ok(()),
            (_, other) => Err(unsupported(self.kind(), other)),
        }
    }

    fn validate(&mut self) -> Result<(), DeclarationError> {
        self.prepare()?;
        self.verify_param()?;
        self.verify_type()?;
        self.elem = match (self.shape, &self.declaration.type_tag) {
            (DomainKind::Int, _) => ElemTag::Int,
            (DomainKind::Str, _) => ElemTag::Str,
            (DomainKind::Set, TypeTag::Set(elem)) => *elem,
            (DomainKind::Set, _) => ElemTag::Any,
        };
        let fits = self.domain.iter().all(|s| match (self.elem, s) {
            (ElemTag::Int, Scalar::Int(_)) | (ElemTag::Str, Scalar::Str(_)) | (ElemTag::Any, _) => true,
            _ => false,
        });
        if !fits {
            return Err(invalid_default(
                self.kind(),
                format!("{} does not fit {}", describe_set(&self.domain), self.declaration.type_tag),
            ));
        }
        let declaration = self.declaration_mut();
        declaration.allow_none = declaration.nullable;
        declaration.fallback = None;
        Ok(())
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError> {
        match self.shape {
            DomainKind::Set => match split_sequence(text) {
                Some(items) => self.bind_many(items),
                None => Err(self.reject(text)),
            },
            _ => self
                .admit_text(text)
                .map(|scalar| self.bind_one(scalar))
                .ok_or_else(|| self.reject(text)),
        }
    }

    fn from_native(&self, value: &Value) -> Result<Bound, ActionError> {
        match (self.shape, value) {
            (DomainKind::Set, Value::Array(items)) => self.bind_many(items.clone()),
            (DomainKind::Set, other) => self.bind_many(vec![other.clone()]),
            (_, other) => self
                .admit(other)
                .map(|scalar| self.bind_one(scalar))
                .ok_or_else(|| self.reject(other)),
        }
    }
}

fn enum_def<'a>(kind: &'static str, tag: &'a TypeTag) -> Result<&'a Arc<EnumDef>, DeclarationError> {
    match (kind, tag) {
        ("enum", TypeTag::Enum(def)) | ("int_enum", TypeTag::IntEnum(def)) | ("enum_set", TypeTag::EnumSet(def)) => {
            Ok(def)
        }
        (_, other) => Err(unsupported(kind, other)),
    }
}

fn lookup<'a>(def: &'a EnumDef, alias: &str, value: &Value) -> Result<&'a EnumMember, ActionError> {
    def.lookup_value(value).ok_or_else(|| {
        let names: Vec<&str> = def.members().iter().map(|m| m.name.as_str()).collect();
        not_in_domain(alias, value, format!("{}{{{}}}", def.name(), names.join(", ")))
    })
}

/// A member of a declared enumeration.
#[derive(Debug, Clone)]
pub struct EnumInjector {
    declaration: Declaration,
}

impl EnumInjector {
    pub fn new(declaration: Declaration) -> Self {
        Self { declaration }
    }

    fn def(&self) -> Result<&Arc<EnumDef>, DeclarationError> {
        enum_def(self.kind(), &self.declaration.type_tag)
    }

    fn member(&self, value: &Value) -> Result<EnumMember, ActionError> {
        let def = self.def().map_err(|e| ActionError::assertion(e.to_string()))?;
        lookup(def, &self.declaration.alias, value).cloned()
    }
}

impl Injector for EnumInjector {
    fn kind(&self) -> &'static str {
        "enum"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        self.def().map(|_| ())
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError> {
        self.member(&Value::String(text.to_owned())).map(Bound::Member)
    }

    fn from_native(&self, value: &Value) -> Result<Bound, ActionError> {
        self.member(value).map(Bound::Member)
    }
}

/// The integer value of a member of a numeric enumeration.
#[derive(Debug, Clone)]
pub struct IntEnumInjector {
    declaration: Declaration,
}

impl IntEnumInjector {
    pub fn new(declaration: Declaration) -> Self {
        Self { declaration }
    }

    fn value(&self, value: &Value) -> Result<Bound, ActionError> {
        let def = enum_def(self.kind(), &self.declaration.type_tag)
            .map_err(|e| ActionError::assertion(e.to_string()))?;
        match &lookup(def, &self.declaration.alias, value)?.value {
            Scalar::Int(number) => Ok(Bound::Int(*number)),
            other => Err(ActionError::assertion(format!("{} member value {other} is not an integer", def.name()))),
        }
    }
}

impl Injector for IntEnumInjector {
    fn kind(&self) -> &'static str {
        "int_enum"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        let def = enum_def(self.kind(), &self.declaration.type_tag)?;
        if def.is_numeric() {
            Ok(())
        } else {
            Err(unsupported(self.kind(), &self.declaration.type_tag))
        }
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError> {
        self.value(&Value::String(text.to_owned()))
    }

    fn from_native(&self, value: &Value) -> Result<Bound, ActionError> {
        self.value(value)
    }
}

/// A set of members of a declared enumeration.
#[derive(Debug, Clone)]
pub struct EnumSetInjector {
    declaration: Declaration,
}

impl EnumSetInjector {
    pub fn new(declaration: Declaration) -> Self {
        Self { declaration }
    }

    fn members(&self, items: &[Value]) -> Result<Bound, ActionError> {
        let def = enum_def(self.kind(), &self.declaration.type_tag)
            .map_err(|e| ActionError::assertion(e.to_string()))?;
        items
            .iter()
            .map(|item| lookup(def, &self.declaration.alias, item).cloned())
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Bound::Members)
    }
}

impl Injector for EnumSetInjector {
    fn kind(&self) -> &'static str {
        "enum_set"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        enum_def(self.kind(), &self.declaration.type_tag).map(|_| ())
    }

    fn verify_default(&self, default: &Value) -> Result<(), DeclarationError> {
        if default.is_array() {
            Ok(())
        } else {
            Err(invalid_default(self.kind(), format!("{default} is not an array")))
        }
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError> {
        match split_sequence(text) {
            Some(items) => self.members(&items),
            None => self.members(&[Value::String(text.to_owned())]),
        }
    }

    fn from_native(&self, value: &Value) -> Result<Bound, ActionError> {
        match value {
            Value::Array(items) => self.members(items),
            other => self.members(std::slice::from_ref(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn color() -> Arc<EnumDef> {
        Arc::new(EnumDef::new("Color").member("Red", 1).member("Green", 2).member("Blue", 3))
    }

    fn domain_code(result: Result<Bound, ActionError>) -> i32 {
        match result {
            Err(ActionError::Business(e)) => e.code,
            other => panic!("expected a business error, got {other:?}"),
        }
    }

    fn temp(tag: TypeTag, shape: DomainKind, domain: DefaultValue) -> DomainInjector {
        let mut declaration = Declaration::new("mode", tag);
        declaration.default = domain;
        let mut injector = DomainInjector::new(declaration, shape);
        injector.validate().unwrap();
        injector
    }

    #[test]
    fn temporary_domains_restrict_values() {
        let modes = temp(TypeTag::Str, DomainKind::Str, DefaultValue::domain(["fast", "slow"]));
        assert!(modes.declaration().default.is_unset());
        assert!(matches!(modes.from_text("fast"), Ok(Bound::Str(s)) if s == "fast"));
        assert_eq!(domain_code(modes.from_text("medium")), 1120);

        let levels = temp(TypeTag::Int, DomainKind::Int, DefaultValue::domain([1, 2]));
        assert!(matches!(levels.from_native(&json!(2)), Ok(Bound::Int(2))));
        assert!(matches!(levels.from_text("1"), Ok(Bound::Int(1))));
        assert_eq!(domain_code(levels.from_native(&json!(3))), 1120);
    }

    #[test]
    fn temporary_domain_sets_check_every_element() {
        let ids = temp(TypeTag::Set(ElemTag::Int), DomainKind::Set, DefaultValue::domain([1, 2, 3]));
        match ids.from_text("1,3") {
            Ok(Bound::Set(set)) => assert_eq!(set.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(domain_code(ids.from_text("[1,4]")), 1120);
    }

    #[test]
    fn domains_must_match_the_declared_type() {
        let mut declaration = Declaration::new("mode", TypeTag::Int);
        declaration.default = DefaultValue::domain(["a"]);
        assert!(DomainInjector::new(declaration, DomainKind::Int).validate().is_err());
    }

    #[test]
    fn enums_resolve_by_name_and_value() {
        let mut injector = EnumInjector::new(Declaration::new("color", TypeTag::Enum(color())));
        injector.validate().unwrap();
        assert!(matches!(injector.from_text("Green"), Ok(Bound::Member(m)) if m.name == "Green"));
        assert!(matches!(injector.from_native(&json!(3)), Ok(Bound::Member(m)) if m.name == "Blue"));
        assert!(matches!(injector.from_text("1"), Ok(Bound::Member(m)) if m.name == "Red"));
        assert_eq!(domain_code(injector.from_text("Purple")), 1120);
    }

    #[test]
    fn int_enums_bind_the_value() {
        let mut injector = IntEnumInjector::new(Declaration::new("color", TypeTag::IntEnum(color())));
        injector.validate().unwrap();
        assert!(matches!(injector.from_text("Blue"), Ok(Bound::Int(3))));
    }

    #[test]
    fn enum_sets_accept_both_grammars() {
        let mut injector = EnumSetInjector::new(Declaration::new("colors", TypeTag::EnumSet(color())));
        injector.validate().unwrap();
        assert!(matches!(injector.from_text(""), Ok(Bound::Members(m)) if m.is_empty()));
        assert!(matches!(injector.from_text("Red,Blue,Red"), Ok(Bound::Members(m)) if m.len() == 2));
        assert!(matches!(injector.from_text(r#"["Green", 1]"#), Ok(Bound::Members(m)) if m.len() == 2));
        assert_eq!(domain_code(injector.from_text("Red,Pink")), 1120);
    }
}
