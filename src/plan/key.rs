//! Keys extracted from elements for sorting, set algebra, grouping and joins
//!
//! Ordering rules:
//! - Null < Bool < Number < String < List < Map
//! - For same types, natural ordering (lists compare lexicographically,
//!   maps by their name-sorted entries)
//!
//! Integers are kept exact. A float with an integral value in range is
//! stored as an integer, so `2.0 == 2` and `Eq`, `Ord` and `Hash` stay
//! consistent. `-0.0 == 0.0` and every NaN is the same key.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value;

/// A totally ordered, hashable key
#[derive(Debug, Clone)]
pub enum Key {
    Null,
    Bool(bool),
    /// Exact integer
    Int(i128),
    /// Non-integral, infinite, NaN or out-of-range number
    Number(f64),
    String(String),
    List(Vec<Key>),
    /// Object entries sorted by name
    Map(Vec<(String, Key)>),
}

impl Key {
    /// Creates a numeric key
    pub fn number(value: f64) -> Self {
        if value.is_nan() {
            Key::Number(f64::NAN)
        } else if value.fract() == 0.0
            && value >= i128::MIN as f64
            && value < i128::MAX as f64
        {
            Key::Int(value as i128)
        } else {
            Key::Number(value)
        }
    }

    /// Builds a composite key from parts
    pub fn composite(parts: impl IntoIterator<Item = Key>) -> Self {
        Key::List(parts.into_iter().collect())
    }

    /// Returns true for the null key
    pub fn is_null(&self) -> bool {
        matches!(self, Key::Null)
    }

    fn type_rank(&self) -> u8 {
        match self {
            Key::Null => 0,
            Key::Bool(_) => 1,
            Key::Int(_) | Key::Number(_) => 2,
            Key::String(_) => 3,
            Key::List(_) => 4,
            Key::Map(_) => 5,
        }
    }
}

/// Orders an exact integer against a float that is not integral in range
fn cmp_int_float(int: i128, float: f64) -> Ordering {
    match (int as f64).total_cmp(&float) {
        // only reachable for floats at or above 2^127
        Ordering::Equal => Ordering::Less,
        order => order,
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Null, Key::Null) => Ordering::Equal,
            (Key::Bool(a), Key::Bool(b)) => a.cmp(b),
            (Key::Int(a), Key::Int(b)) => a.cmp(b),
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::Int(a), Key::Number(b)) => cmp_int_float(*a, *b),
            (Key::Number(a), Key::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::List(a), Key::List(b)) => a.cmp(b),
            (Key::Map(a), Key::Map(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            Key::Null => {}
            Key::Bool(b) => b.hash(state),
            Key::Int(n) => n.hash(state),
            Key::Number(n) => n.to_bits().hash(state),
            Key::String(s) => s.hash(state),
            Key::List(items) => items.hash(state),
            Key::Map(entries) => entries.hash(state),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Null => write!(f, "null"),
            Key::Bool(b) => write!(f, "{}", b),
            Key::Int(n) => write!(f, "{}", n),
            Key::Number(n) => write!(f, "{}", n),
            Key::String(s) => write!(f, "{:?}", s),
            Key::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Key::Map(entries) => {
                write!(f, "{{")?;
                for (i, (name, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", name, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&Value> for Key {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Key::Null,
            Value::Bool(b) => Key::Bool(*b),
            Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => Key::Int(i as i128),
                (None, Some(u)) => Key::Int(u as i128),
                (None, None) => Key::number(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => Key::String(s.clone()),
            Value::Array(items) => Key::List(items.iter().map(Key::from).collect()),
            Value::Object(map) => {
                let mut entries: Vec<(String, Key)> =
                    map.iter().map(|(k, v)| (k.clone(), Key::from(v))).collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                Key::Map(entries)
            }
        }
    }
}

impl From<Value> for Key {
    fn from(value: Value) -> Self {
        Key::from(&value)
    }
}

impl From<bool> for Key {
    fn from(value: bool) -> Self {
        Key::Bool(value)
    }
}

macro_rules! int_key {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Key {
                fn from(value: $ty) -> Self {
                    Key::Int(value as i128)
                }
            }
        )*
    };
}

int_key!(i64, i32, u64, u32);

impl From<f64> for Key {
    fn from(value: f64) -> Self {
        Key::number(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::String(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::String(value)
    }
}

impl<T: Into<Key>> From<Option<T>> for Key {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Key::Null,
        }
    }
}
