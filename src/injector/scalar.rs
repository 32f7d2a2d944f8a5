//! Scalar strategies: strings, integers, floats, booleans, base64 bytes and
//! regex-constrained strings.

use base64::engine::general_purpose::GeneralPurpose;
use base64::engine::{DecodePaddingMode, GeneralPurposeConfig};
use base64::{alphabet, Engine};
use regex::Regex;
use serde_json::Value;

use crate::framework::code::{BusinessException, CodeArgs, FrameworkCode};
use crate::framework::error::{ActionError, DeclarationError};
use crate::framework::value::{parse_bool, text_of, Blob, Bound, TypeTag};
use crate::injector::{invalid_default, reject, unsupported, Declaration, DefaultValue, Injector};

/// Plain strings; native scalars bind as their text form.
#[derive(Debug, Clone)]
pub struct StrInjector {
    declaration: Declaration,
}

impl StrInjector {
    pub fn new(declaration: Declaration) -> Self {
        Self { declaration }
    }
}

impl Injector for StrInjector {
    fn kind(&self) -> &'static str {
        "str"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        match self.declaration.type_tag {
            TypeTag::Str => Ok(()),
            ref other => Err(unsupported(self.kind(), other)),
        }
    }

    fn verify_default(&self, default: &Value) -> Result<(), DeclarationError> {
        if default.is_string() {
            Ok(())
        } else {
            Err(invalid_default(self.kind(), format!("{default} is not a string")))
        }
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError> {
        Ok(Bound::Str(text.to_owned()))
    }
}

#[derive(Debug, Clone)]
pub struct IntInjector {
    declaration: Declaration,
}

impl IntInjector {
    pub fn new(declaration: Declaration) -> Self {
        Self { declaration }
    }
}

impl Injector for IntInjector {
    fn kind(&self) -> &'static str {
        "int"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        match self.declaration.type_tag {
            TypeTag::Int => Ok(()),
            ref other => Err(unsupported(self.kind(), other)),
        }
    }

    fn verify_default(&self, default: &Value) -> Result<(), DeclarationError> {
        if default.as_i64().is_some() {
            Ok(())
        } else {
            Err(invalid_default(self.kind(), format!("{default} is not an integer")))
        }
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError> {
        text.trim()
            .parse::<i64>()
            .map(Bound::Int)
            .map_err(|_| reject(FrameworkCode::param_not_number(), &self.declaration.alias, text))
    }

    fn from_native(&self, value: &Value) -> Result<Bound, ActionError> {
        match value.as_i64() {
            Some(number) => Ok(Bound::Int(number)),
            None => self.from_text(&text_of(value)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FloatInjector {
    declaration: Declaration,
}

impl FloatInjector {
    pub fn new(declaration: Declaration) -> Self {
        Self { declaration }
    }
}

impl Injector for FloatInjector {
    fn kind(&self) -> &'static str {
        "float"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        match self.declaration.type_tag {
            TypeTag::Float => Ok(()),
            ref other => Err(unsupported(self.kind(), other)),
        }
    }

    fn verify_default(&self, default: &Value) -> Result<(), DeclarationError> {
        if default.is_number() {
            Ok(())
        } else {
            Err(invalid_default(self.kind(), format!("{default} is not a number")))
        }
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError> {
        match text.trim().parse::<f64>() {
            Ok(number) if number.is_finite() => Ok(Bound::Float(number)),
            _ => Err(reject(FrameworkCode::param_not_float(), &self.declaration.alias, text)),
        }
    }

    fn from_native(&self, value: &Value) -> Result<Bound, ActionError> {
        match value.as_f64() {
            Some(number) => Ok(Bound::Float(number)),
            None => self.from_text(&text_of(value)),
        }
    }
}

/// `true`/`false`, case-insensitive.
#[derive(Debug, Clone)]
pub struct BoolInjector {
    declaration: Declaration,
}

impl BoolInjector {
    pub fn new(declaration: Declaration) -> Self {
        Self { declaration }
    }
}

impl Injector for BoolInjector {
    fn kind(&self) -> &'static str {
        "bool"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        match self.declaration.type_tag {
            TypeTag::Bool => Ok(()),
            ref other => Err(unsupported(self.kind(), other)),
        }
    }

    fn verify_default(&self, default: &Value) -> Result<(), DeclarationError> {
        if default.is_boolean() {
            Ok(())
        } else {
            Err(invalid_default(self.kind(), format!("{default} is not a boolean")))
        }
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError> {
        parse_bool(text)
            .map(Bound::Bool)
            .ok_or_else(|| reject(FrameworkCode::param_not_bool(), &self.declaration.alias, text))
    }

    fn from_native(&self, value: &Value) -> Result<Bound, ActionError> {
        match value {
            Value::Bool(flag) => Ok(Bound::Bool(*flag)),
            other => self.from_text(&text_of(other)),
        }
    }
}

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Base64 text or raw multipart bytes.
#[derive(Debug, Clone)]
pub struct BytesInjector {
    declaration: Declaration,
}

impl BytesInjector {
    pub fn new(declaration: Declaration) -> Self {
        Self { declaration }
    }
}

impl Injector for BytesInjector {
    fn kind(&self) -> &'static str {
        "bytes"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        match self.declaration.type_tag {
            TypeTag::Bytes => Ok(()),
            ref other => Err(unsupported(self.kind(), other)),
        }
    }

    fn verify_default(&self, default: &Value) -> Result<(), DeclarationError> {
        if default.is_string() {
            Ok(())
        } else {
            Err(invalid_default(self.kind(), "bytes defaults are base64 strings"))
        }
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError> {
        LENIENT_BASE64
            .decode(text.trim())
            .map(|bytes| Bound::Bytes(Blob(bytes)))
            .map_err(|_| {
                BusinessException::new(
                    401,
                    format!("parameter [{}] is not a valid base64 string", self.declaration.alias),
                )
                .into()
            })
    }

    fn from_native(&self, value: &Value) -> Result<Bound, ActionError> {
        Err(reject(FrameworkCode::param_type_mismatch(), &self.declaration.alias, value))
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<Bound, ActionError> {
        Ok(Bound::Bytes(Blob(bytes.to_vec())))
    }
}

/// A string that must fully match a regular expression.
///
/// Selected for `Pattern` defaults, or attached explicitly:
///
/// ```ignore
/// Action::builder("user", "register")
///     .with_injector("phone", PatternInjector::matching(Regex::new(r"\d{11}")?))
/// ```
#[derive(Debug, Clone)]
pub struct PatternInjector {
    declaration: Declaration,
    pattern: Option<Regex>,
    full: Option<Regex>,
}

impl PatternInjector {
    pub fn new(declaration: Declaration) -> Self {
        Self {
            declaration,
            pattern: None,
            full: None,
        }
    }

    /// An override injector; name and alias are filled in at registration.
    pub fn matching(pattern: Regex) -> Self {
        let mut declaration = Declaration::new("", TypeTag::Str);
        declaration.alias.clear();
        Self {
            declaration,
            pattern: Some(pattern),
            full: None,
        }
    }
}

impl Injector for PatternInjector {
    fn kind(&self) -> &'static str {
        "pattern"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn prepare(&mut self) -> Result<(), DeclarationError> {
        if let DefaultValue::Pattern(pattern) = &self.declaration.default {
            self.pattern = Some(pattern.clone());
            self.declaration.default = DefaultValue::Unset;
        }
        let pattern = self
            .pattern
            .as_ref()
            .ok_or_else(|| invalid_default(self.kind(), "no regular expression declared"))?;
        let anchored = format!("^(?:{})$", pattern.as_str());
        let full = Regex::new(&anchored).map_err(|error| DeclarationError::InvalidPattern {
            pattern: pattern.as_str().to_owned(),
            reason: error.to_string(),
        })?;
        self.full = Some(full);
        Ok(())
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        match self.declaration.type_tag {
            TypeTag::Str => Ok(()),
            ref other => Err(unsupported(self.kind(), other)),
        }
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError> {
        let matched = self.full.as_ref().is_some_and(|full| full.is_match(text));
        if matched {
            return Ok(Bound::Str(text.to_owned()));
        }
        let pattern = self.pattern.as_ref().map_or("", Regex::as_str);
        Err(FrameworkCode::param_format_error()
            .error(
                &CodeArgs::new()
                    .with("param", &self.declaration.alias)
                    .with("error", format!("does not match /{pattern}/")),
            )
            .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ready<I: Injector>(mut injector: I) -> I {
        injector.validate().unwrap();
        injector
    }

    fn code_of(result: Result<Bound, ActionError>) -> i32 {
        match result {
            Err(ActionError::Business(e)) => e.code,
            other => panic!("expected a business error, got {other:?}"),
        }
    }

    #[test]
    fn int_parses_trimmed_text_only() {
        let int = ready(IntInjector::new(Declaration::new("uid", TypeTag::Int)));
        assert!(matches!(int.from_text(" 42 "), Ok(Bound::Int(42))));
        assert!(matches!(int.from_native(&json!(7)), Ok(Bound::Int(7))));
        assert_eq!(code_of(int.from_text("4x")), 1104);
        assert_eq!(code_of(int.from_native(&json!(1.0))), 1104);
    }

    #[test]
    fn float_requires_exact_type_and_accepts_int_defaults() {
        let mut declaration = Declaration::new("ratio", TypeTag::Float);
        declaration.default = DefaultValue::Value(json!(1));
        let float = ready(FloatInjector::new(declaration));
        assert!(matches!(float.declaration().fallback, Some(Bound::Float(x)) if x == 1.0));
        assert_eq!(code_of(float.from_text("abc")), 1105);
        assert!(FloatInjector::new(Declaration::new("x", TypeTag::Int)).validate().is_err());
    }

    #[test]
    fn bool_is_case_insensitive() {
        let flag = ready(BoolInjector::new(Declaration::new("on", TypeTag::Bool)));
        assert!(matches!(flag.from_text("TRUE"), Ok(Bound::Bool(true))));
        assert!(matches!(flag.from_text("False"), Ok(Bound::Bool(false))));
        assert_eq!(code_of(flag.from_text("yes")), 1106);
    }

    #[test]
    fn bytes_decode_base64_with_optional_padding() {
        let bytes = ready(BytesInjector::new(Declaration::new("file", TypeTag::Bytes)));
        assert!(matches!(bytes.from_text("aGk="), Ok(Bound::Bytes(b)) if b.0 == b"hi"));
        assert!(matches!(bytes.from_text("aGk"), Ok(Bound::Bytes(b)) if b.0 == b"hi"));
        match bytes.from_text("not base64!") {
            Err(ActionError::Business(e)) => {
                assert_eq!(e.code, 401);
                assert_eq!(e.message, "parameter [file] is not a valid base64 string");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(bytes.from_bytes(&[0xff, 0x00]), Ok(Bound::Bytes(b)) if b.0 == vec![0xff, 0x00]));
    }

    #[test]
    fn pattern_requires_a_full_match() {
        let mut declaration = Declaration::new("code", TypeTag::Str);
        declaration.default = DefaultValue::pattern(r"\d{4}").unwrap();
        let pattern = ready(PatternInjector::new(declaration));
        assert!(pattern.declaration().fallback.is_none());
        assert!(matches!(pattern.from_text("1234"), Ok(Bound::Str(_))));
        assert_eq!(code_of(pattern.from_text("12345")), 1118);
        assert_eq!(code_of(pattern.from_text("a1234")), 1118);
    }

    #[test]
    fn pattern_needs_a_regex() {
        let err = PatternInjector::new(Declaration::new("code", TypeTag::Str))
            .validate()
            .unwrap_err();
        assert!(matches!(err, DeclarationError::InvalidDefault { kind: "pattern", .. }));
    }
}
