//! Typed access to bound arguments.
//!
//! ```ignore
//! let uid: i64 = args.get("uid")?;
//! let tags: BTreeSet<String> = args.get("tags")?;
//! let note: Option<String> = args.get("note")?;
//! ```

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::framework::error::ActionError;
use crate::framework::request::{ChunkWriter, Request, Session};
use crate::framework::value::{Blob, Bound, EnumMember, ParamMap, Scalar};

/// Conversion from a [`Bound`] value to a handler-facing type.
pub trait FromBound: Sized {
    fn from_bound(bound: &Bound) -> Option<Self>;
}

/// The arguments bound for one invocation, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: IndexMap<String, Bound>,
}

impl Args {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            values: IndexMap::with_capacity(capacity),
        }
    }

    pub(crate) fn insert(&mut self, name: String, value: Bound) {
        self.values.insert(name, value);
    }

    /// Reads `name` as `T`; an undeclared name or a type mismatch is an assertion failure.
    pub fn get<T: FromBound>(&self, name: &str) -> Result<T, ActionError> {
        let bound = self
            .values
            .get(name)
            .ok_or_else(|| ActionError::assertion(format!("parameter [{name}] is not declared")))?;
        T::from_bound(bound).ok_or_else(|| {
            ActionError::assertion(format!(
                "parameter [{name}] holds a {} value, not {}",
                bound.type_name(),
                std::any::type_name::<T>()
            ))
        })
    }

    /// Downcasts a value bound by a custom reserved accessor.
    pub fn extension<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, ActionError> {
        match self.values.get(name) {
            Some(Bound::Extension(value)) => Arc::clone(value).downcast::<T>().map_err(|_| {
                ActionError::assertion(format!(
                    "parameter [{name}] is not a {}",
                    std::any::type_name::<T>()
                ))
            }),
            Some(other) => Err(ActionError::assertion(format!(
                "parameter [{name}] holds a {} value",
                other.type_name()
            ))),
            None => Err(ActionError::assertion(format!("parameter [{name}] is not declared"))),
        }
    }

    pub fn raw(&self, name: &str) -> Option<&Bound> {
        self.values.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bound)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON view of every argument, for logging and echo handlers.
    pub fn to_json(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

impl FromBound for Bound {
    fn from_bound(bound: &Bound) -> Option<Self> {
        Some(bound.clone())
    }
}

impl FromBound for Value {
    fn from_bound(bound: &Bound) -> Option<Self> {
        Some(bound.to_json())
    }
}

impl FromBound for bool {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Bool(flag) => Some(*flag),
            _ => None,
        }
    }
}

impl FromBound for i64 {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Int(number) => Some(*number),
            _ => None,
        }
    }
}

impl FromBound for i32 {
    fn from_bound(bound: &Bound) -> Option<Self> {
        i64::from_bound(bound).and_then(|n| i32::try_from(n).ok())
    }
}

impl FromBound for u64 {
    fn from_bound(bound: &Bound) -> Option<Self> {
        i64::from_bound(bound).and_then(|n| u64::try_from(n).ok())
    }
}

impl FromBound for f64 {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Float(number) => Some(*number),
            Bound::Int(number) => Some(*number as f64),
            _ => None,
        }
    }
}

impl FromBound for String {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Str(text) => Some(text.clone()),
            _ => None,
        }
    }
}

impl FromBound for Blob {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Bytes(blob) => Some(blob.clone()),
            _ => None,
        }
    }
}

impl FromBound for Map<String, Value> {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Object(map) => Some(map.clone()),
            _ => None,
        }
    }
}

impl<T: DeserializeOwned> FromBound for Vec<T> {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Array(items) => items
                .iter()
                .map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            _ => None,
        }
    }
}

impl FromBound for BTreeSet<Scalar> {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Set(items) => Some(items.clone()),
            _ => None,
        }
    }
}

impl FromBound for BTreeSet<String> {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Set(items) => items
                .iter()
                .map(|item| match item {
                    Scalar::Str(text) => Some(text.clone()),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}

impl FromBound for BTreeSet<i64> {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Set(items) => items
                .iter()
                .map(|item| match item {
                    Scalar::Int(number) => Some(*number),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}

impl FromBound for EnumMember {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Member(member) => Some(member.clone()),
            _ => None,
        }
    }
}

impl FromBound for BTreeSet<EnumMember> {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Members(members) => Some(members.clone()),
            _ => None,
        }
    }
}

impl FromBound for ChunkWriter {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Stream(writer) => Some(writer.clone()),
            _ => None,
        }
    }
}

impl FromBound for Arc<Request> {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Request(request) => Some(Arc::clone(request)),
            _ => None,
        }
    }
}

impl FromBound for Arc<dyn Session> {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Session(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }
}

impl FromBound for ParamMap {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Params(params) => Some(params.clone()),
            _ => None,
        }
    }
}

/// `Null` reads as `None`; anything else must convert to `T`.
impl<T: FromBound> FromBound for Option<T> {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Null => Some(None),
            other => T::from_bound(other).map(Some),
        }
    }
}
