//! The universal tagged value (spec §3 "Element") and its primitive
//! sub-variant (§4.1 "Value").
//!
//! `Element` is deliberately `Copy`: an `Object` reference is a [`NodeId`],
//! not a pointer or `Rc`, so moving an `Element` around never touches the
//! graph's edge bookkeeping by itself — callers go through
//! `MemoryGraph::inc_edge`/`dec_edge` explicitly at field-write sites (§4.2),
//! mirroring the teacher's choice to key its reference counter by a plain
//! integer id rather than smart-pointer the stack items themselves.

use std::fmt;

use crate::error::{VmError, VmResult};

/// Identifies a [`crate::memory_graph::Node`] within one `MemoryGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A primitive, non-heap value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize))]
pub enum Value {
    Int64(i64),
    Float64(f64),
    Char8(u8),
}

impl Value {
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Int64(i) => i as f64,
            Value::Float64(f) => f,
            Value::Char8(c) => c as f64,
        }
    }

    pub fn as_i64(self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(i),
            Value::Char8(c) => Some(c as i64),
            Value::Float64(_) => None,
        }
    }

    pub fn is_truthy(self) -> bool {
        match self {
            Value::Int64(i) => i != 0,
            Value::Char8(c) => c != 0,
            Value::Float64(f) => f != 0.0,
        }
    }

    /// `Int(Float(x)) == floor(x)` (spec §8 round-trip law).
    pub fn to_int(self) -> Value {
        match self {
            Value::Int64(_) => self,
            Value::Char8(c) => Value::Int64(c as i64),
            Value::Float64(f) => Value::Int64(f.floor() as i64),
        }
    }

    fn promote(a: Value, b: Value) -> (PromotedPair,) {
        (match (a, b) {
            (Value::Float64(_), _) | (_, Value::Float64(_)) => {
                PromotedPair::Float(a.as_f64(), b.as_f64())
            }
            _ => PromotedPair::Int(
                a.as_i64().expect("non-float Value always has an int repr"),
                b.as_i64().expect("non-float Value always has an int repr"),
            ),
        },)
    }

    pub fn add(self, other: Value) -> VmResult<Value> {
        match Self::promote(self, other).0 {
            PromotedPair::Int(a, b) => Ok(Value::Int64(a.wrapping_add(b))),
            PromotedPair::Float(a, b) => Ok(Value::Float64(a + b)),
        }
    }

    pub fn sub(self, other: Value) -> VmResult<Value> {
        match Self::promote(self, other).0 {
            PromotedPair::Int(a, b) => Ok(Value::Int64(a.wrapping_sub(b))),
            PromotedPair::Float(a, b) => Ok(Value::Float64(a - b)),
        }
    }

    pub fn mul(self, other: Value) -> VmResult<Value> {
        match Self::promote(self, other).0 {
            PromotedPair::Int(a, b) => Ok(Value::Int64(a.wrapping_mul(b))),
            PromotedPair::Float(a, b) => Ok(Value::Float64(a * b)),
        }
    }

    pub fn div(self, other: Value) -> VmResult<Value> {
        match Self::promote(self, other).0 {
            PromotedPair::Int(_, 0) => Err(VmError::arithmetic("division by zero")),
            PromotedPair::Int(a, b) => Ok(Value::Int64(a.wrapping_div(b))),
            PromotedPair::Float(a, b) => Ok(Value::Float64(a / b)),
        }
    }

    pub fn rem(self, other: Value) -> VmResult<Value> {
        match Self::promote(self, other).0 {
            PromotedPair::Int(_, 0) => Err(VmError::arithmetic("modulo by zero")),
            PromotedPair::Int(a, b) => Ok(Value::Int64(a.wrapping_rem(b))),
            PromotedPair::Float(a, b) => Ok(Value::Float64(a % b)),
        }
    }

    pub fn compare(self, other: Value) -> std::cmp::Ordering {
        match Self::promote(self, other).0 {
            PromotedPair::Int(a, b) => a.cmp(&b),
            PromotedPair::Float(a, b) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
        }
    }

    pub fn numeric_eq(self, other: Value) -> bool {
        match Self::promote(self, other).0 {
            PromotedPair::Int(a, b) => a == b,
            PromotedPair::Float(a, b) => a == b,
        }
    }
}

enum PromotedPair {
    Int(i64, i64),
    Float(f64, f64),
}

/// The universal tagged value: `None | Value | Object` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Element {
    None,
    Value(Value),
    Object(NodeId),
}

impl Element {
    pub fn int(i: i64) -> Self {
        Element::Value(Value::Int64(i))
    }
    pub fn float(f: f64) -> Self {
        Element::Value(Value::Float64(f))
    }
    pub fn char(c: u8) -> Self {
        Element::Value(Value::Char8(c))
    }
    pub fn object(id: NodeId) -> Self {
        Element::Object(id)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Element::None)
    }

    pub fn as_object(&self) -> Option<NodeId> {
        match self {
            Element::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<Value> {
        match self {
            Element::Value(v) => Some(*v),
            _ => None,
        }
    }

    /// `None` and integer `0` are false; every other value (including every
    /// Object reference) is true (spec §4.1 Truthiness).
    pub fn is_truthy(&self) -> bool {
        match self {
            Element::None => false,
            Element::Value(v) => v.is_truthy(),
            Element::Object(_) => true,
        }
    }

    /// JL-`not`: `None` for truthy, integer `1` for falsy.
    pub fn logical_not(&self) -> Element {
        if self.is_truthy() {
            Element::None
        } else {
            Element::int(1)
        }
    }

    /// C-style `!!`: `0`/`1`.
    pub fn c_not(&self) -> Element {
        Element::int(if self.is_truthy() { 0 } else { 1 })
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::None => write!(f, "none"),
            Element::Value(Value::Int64(i)) => write!(f, "{i}"),
            Element::Value(Value::Float64(fl)) => write!(f, "{fl}"),
            Element::Value(Value::Char8(c)) => write!(f, "{}", *c as char),
            Element::Object(id) => write!(f, "object({id})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Element::None.is_truthy());
        assert!(!Element::int(0).is_truthy());
        assert!(Element::int(1).is_truthy());
        assert!(Element::object(NodeId(0)).is_truthy());
    }

    #[test]
    fn numeric_promotion() {
        let a = Value::Int64(2);
        let b = Value::Float64(3.5);
        match a.add(b).unwrap() {
            Value::Float64(f) => assert_eq!(f, 5.5),
            _ => panic!("expected float promotion"),
        }
    }

    #[test]
    fn division_by_zero_is_arithmetic_error() {
        let a = Value::Int64(1);
        let b = Value::Int64(0);
        assert!(a.div(b).is_err());
    }
}
