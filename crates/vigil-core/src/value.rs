//! Dynamic values stored in scope state.
//!
//! Arrays and objects are shared, mutable containers: cloning a `Value`
//! clones the handle, not the contents. That is what makes the two
//! equality strategies differ:
//!
//! - [`Value::same`] is identity. Scalars compare by value (with `NaN`
//!   equal to `NaN`), containers compare by pointer.
//! - [`Value::deep_eq`] is structural and walks containers recursively.
//!
//! ```rust
//! use vigil_core::Value;
//!
//! let a = Value::array([1, 2, 3]);
//! let b = a.clone();
//! b.push(4);
//! assert!(a.same(&b));
//! assert_eq!(a.len(), Some(4));
//!
//! let c = a.deep_clone();
//! assert!(!a.same(&c));
//! assert!(a.deep_eq(&c));
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

pub type Array = Rc<RefCell<Vec<Value>>>;
pub type Object = Rc<RefCell<BTreeMap<String, Value>>>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Array),
    Object(Object),
}

/// How a watcher decides whether its value changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Equality {
    /// Identity, `NaN` equal to itself.
    #[default]
    Reference,
    /// Recursive structural comparison.
    Structural,
}

impl Equality {
    pub fn eq(self, a: &Value, b: &Value) -> bool {
        match self {
            Equality::Reference => a.same(b),
            Equality::Structural => a.deep_eq(b),
        }
    }
}

impl Value {
    pub fn array<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::Array(Rc::new(RefCell::new(
            items.into_iter().map(Into::into).collect(),
        )))
    }

    pub fn object<K: Into<String>, T: Into<Value>>(
        entries: impl IntoIterator<Item = (K, T)>,
    ) -> Self {
        Value::Object(Rc::new(RefCell::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Number(n) if n.is_nan())
    }

    /// Arrays are the only array-like values.
    pub fn is_array_like(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// Arrays and objects, i.e. anything held by reference.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Element count for arrays, key count for objects.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Array(a) => Some(a.borrow().len()),
            Value::Object(o) => Some(o.borrow().len()),
            _ => None,
        }
    }

    /// Appends to an array in place. Returns false for anything else.
    pub fn push(&self, item: impl Into<Value>) -> bool {
        match self {
            Value::Array(a) => {
                a.borrow_mut().push(item.into());
                true
            }
            _ => false,
        }
    }

    /// Removes the last element of an array in place.
    pub fn pop(&self) -> Option<Value> {
        match self {
            Value::Array(a) => a.borrow_mut().pop(),
            _ => None,
        }
    }

    pub fn index(&self, i: usize) -> Value {
        match self {
            Value::Array(a) => a.borrow().get(i).cloned().unwrap_or_default(),
            _ => Value::Undefined,
        }
    }

    pub fn set_index(&self, i: usize, item: impl Into<Value>) -> bool {
        match self {
            Value::Array(a) => {
                let mut a = a.borrow_mut();
                if i >= a.len() {
                    a.resize(i + 1, Value::Undefined);
                }
                a[i] = item.into();
                true
            }
            _ => false,
        }
    }

    pub fn key(&self, key: &str) -> Value {
        match self {
            Value::Object(o) => o.borrow().get(key).cloned().unwrap_or_default(),
            _ => Value::Undefined,
        }
    }

    pub fn set_key(&self, key: impl Into<String>, item: impl Into<Value>) -> bool {
        match self {
            Value::Object(o) => {
                o.borrow_mut().insert(key.into(), item.into());
                true
            }
            _ => false,
        }
    }

    pub fn remove_key(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(o) => o.borrow_mut().remove(key),
            _ => None,
        }
    }

    /// Identity equality.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Structural equality. Self-referencing containers are not supported.
    pub fn deep_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.deep_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.deep_eq(other)))
            }
            _ => self.same(other),
        }
    }

    /// Copies containers recursively so the result shares nothing with `self`.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::Array(a) => Value::Array(Rc::new(RefCell::new(
                a.borrow().iter().map(Value::deep_clone).collect(),
            ))),
            Value::Object(o) => Value::Object(Rc::new(RefCell::new(
                o.borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone()))
                    .collect(),
            ))),
            other => other.clone(),
        }
    }

    /// Copies the outermost container only; elements keep their identity.
    pub fn shallow_clone(&self) -> Value {
        match self {
            Value::Array(a) => Value::Array(Rc::new(RefCell::new(a.borrow().clone()))),
            Value::Object(o) => Value::Object(Rc::new(RefCell::new(o.borrow().clone()))),
            other => other.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Structural comparison, so tests can `assert_eq!` on contents.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.deep_eq(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(a) => f.debug_list().entries(a.borrow().iter()).finish(),
            Value::Object(o) => f.debug_map().entries(o.borrow().iter()).finish(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined | Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) if n.is_finite() => serializer.serialize_f64(*n),
            Value::Number(_) => serializer.serialize_none(),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(a) => {
                let a = a.borrow();
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for item in a.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(o) => {
                let o = o.borrow();
                let mut map = serializer.serialize_map(Some(o.len()))?;
                for (k, v) in o.iter() {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.into()),
            serde_json::Value::Array(items) => Value::array(items),
            serde_json::Value::Object(map) => Value::object(map),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nan_is_same_as_nan() {
        let a = Value::Number(f64::NAN);
        assert!(a.same(&Value::Number(f64::NAN)));
        assert!(!a.same(&Value::from(1)));
        assert!(a.deep_eq(&Value::Number(f64::NAN)));
    }

    #[test]
    fn test_reference_vs_structural() {
        let a = Value::array([1, 2, 3]);
        let b = Value::array([1, 2, 3]);
        assert!(!Equality::Reference.eq(&a, &b));
        assert!(Equality::Structural.eq(&a, &b));

        b.push(4);
        assert!(!Equality::Structural.eq(&a, &b));
    }

    #[test]
    fn test_undefined_is_not_null() {
        assert!(!Value::Undefined.same(&Value::Null));
        assert!(!Value::Undefined.deep_eq(&Value::Null));
    }

    #[test]
    fn test_deep_clone_breaks_sharing() {
        let inner = Value::array([1]);
        let outer = Value::object([("list", inner.clone())]);
        let copy = outer.deep_clone();

        inner.push(2);
        assert_eq!(outer.key("list").len(), Some(2));
        assert_eq!(copy.key("list").len(), Some(1));
    }

    #[test]
    fn test_shallow_clone_keeps_elements() {
        let inner = Value::array([1]);
        let outer = Value::array([inner.clone()]);
        let copy = outer.shallow_clone();
        assert!(!copy.same(&outer));
        assert!(copy.index(0).same(&inner));
    }

    #[test]
    fn test_json_conversion() {
        let v = Value::from(json!({"a": [1, 2, {"b": null}], "c": "x"}));
        assert_eq!(v.key("a").index(2).key("b"), Value::Null);
        assert_eq!(v.key("c").as_str(), Some("x"));

        let back = Value::object([("n", Value::Number(f64::NAN)), ("u", Value::Undefined)]);
        assert_eq!(back.to_json(), json!({"n": null, "u": null}));
    }

    #[test]
    fn test_set_index_grows_array() {
        let a = Value::array(Vec::<Value>::new());
        a.set_index(2, "x");
        assert_eq!(a.len(), Some(3));
        assert!(a.index(0).is_undefined());
    }
}
