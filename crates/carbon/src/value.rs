//! The dynamic value type (`Var`) and its shared containers.
//!
//! A `Var` is one of: null, bool, int, float, string, array, map, object.
//! Null, numbers and strings have value semantics; arrays, maps and objects
//! are reference-shared, so mutation through one alias is visible through
//! every other alias. All operator failures surface as
//! `OperatorNotSupported` / `ZeroDivision` and are reframed with source
//! positions by the layers above.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::{Error, ErrorKind, Result};
use crate::object::{ArrayIterator, MapIterator, Object};
use crate::vm::Vm;

// ---------------------------------------------------------------------------
// Shared containers
// ---------------------------------------------------------------------------

/// A reference-shared, ordered sequence of values.
#[derive(Debug, Clone, Default)]
pub struct Array(Rc<RefCell<Vec<Var>>>);

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Var>) -> Self {
        Array(Rc::new(RefCell::new(items)))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn push(&self, value: Var) {
        self.0.borrow_mut().push(value);
    }

    pub fn pop(&self) -> Option<Var> {
        self.0.borrow_mut().pop()
    }

    pub fn get(&self, index: i64) -> Result<Var> {
        let items = self.0.borrow();
        let idx = normalize_index(index, items.len())?;
        Ok(items[idx].clone())
    }

    pub fn set(&self, index: i64, value: Var) -> Result<()> {
        let mut items = self.0.borrow_mut();
        let idx = normalize_index(index, items.len())?;
        items[idx] = value;
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<Var> {
        self.0.borrow().clone()
    }

    pub fn borrow(&self) -> std::cell::Ref<'_, Vec<Var>> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, Vec<Var>> {
        self.0.borrow_mut()
    }

    fn ptr_eq(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Negative indices count from the end, like the scripting surface expects.
fn normalize_index(index: i64, len: usize) -> Result<usize> {
    let idx = if index < 0 { index + len as i64 } else { index };
    if idx < 0 || idx as usize >= len {
        return Err(Error::new(
            ErrorKind::InvalidIndex,
            format!("index {} out of bounds (size {}).", index, len),
        ));
    }
    Ok(idx as usize)
}

/// A reference-shared mapping from hashable values to values.
///
/// Backed by an ordered pair list: iteration order is insertion order and
/// lookup is by value equality. Keys must be hashable (checked on insert).
#[derive(Debug, Clone, Default)]
pub struct Map(Rc<RefCell<Vec<(Var, Var)>>>);

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, key: &Var) -> Result<Var> {
        let pairs = self.0.borrow();
        for (k, v) in pairs.iter() {
            if k == key {
                return Ok(v.clone());
            }
        }
        Err(Error::new(
            ErrorKind::InvalidIndex,
            format!("key {} not found.", key.repr()),
        ))
    }

    pub fn set(&self, key: Var, value: Var) -> Result<()> {
        // arrays and maps are never hashable; object keys are checked
        // against their `__hash` capability on the vm-aware path before
        // they reach this point
        if matches!(key, Var::Array(_) | Var::Map(_)) {
            return Err(Error::new(
                ErrorKind::OperatorNotSupported,
                format!("{} is not hashable.", key.type_name()),
            ));
        }
        let mut pairs = self.0.borrow_mut();
        for (k, v) in pairs.iter_mut() {
            if *k == key {
                *v = value;
                return Ok(());
            }
        }
        pairs.push((key, value));
        Ok(())
    }

    pub fn has(&self, key: &Var) -> bool {
        self.0.borrow().iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> Vec<Var> {
        self.0.borrow().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn pairs(&self) -> Vec<(Var, Var)> {
        self.0.borrow().clone()
    }

    fn ptr_eq(&self, other: &Map) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// ---------------------------------------------------------------------------
// Var
// ---------------------------------------------------------------------------

/// The dynamic value every stack slot, member and constant holds.
#[derive(Clone, Default)]
pub enum Var {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Array),
    Map(Map),
    Object(Rc<dyn Object>),
}

impl Var {
    pub fn type_name(&self) -> &'static str {
        match self {
            Var::Null => "null",
            Var::Bool(_) => "bool",
            Var::Int(_) => "int",
            Var::Float(_) => "float",
            Var::String(_) => "String",
            Var::Array(_) => "Array",
            Var::Map(_) => "Map",
            Var::Object(_) => "Object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Var::Null)
    }

    /// Truthiness, used by conditional jumps and the logical operators.
    pub fn is_truthy(&self) -> bool {
        match self {
            Var::Null => false,
            Var::Bool(b) => *b,
            Var::Int(i) => *i != 0,
            Var::Float(f) => *f != 0.0,
            Var::String(s) => !s.is_empty(),
            Var::Array(a) => !a.is_empty(),
            Var::Map(m) => !m.is_empty(),
            Var::Object(_) => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Var::Int(i) => Some(*i),
            Var::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Var::Float(f) => Some(*f),
            Var::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Var::String(s) => Some(s),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Var::Int(_) | Var::Float(_))
    }

    /// Downcast helper for native objects held inside a `Var`.
    pub fn as_object<T: 'static>(&self) -> Option<&T> {
        match self {
            Var::Object(o) => o.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    // -- operators ----------------------------------------------------------

    /// `+`: object operands dispatch through their capability set; the
    /// value matrix in `add_values` handles everything else.
    pub fn add(&self, vm: &Vm, other: &Var) -> Result<Var> {
        match self {
            Var::Object(o) => o.add(vm, self, other),
            _ => add_values(self, other),
        }
    }

    pub fn sub(&self, vm: &Vm, other: &Var) -> Result<Var> {
        match self {
            Var::Object(o) => o.sub(vm, self, other),
            _ => sub_values(self, other),
        }
    }

    pub fn mul(&self, vm: &Vm, other: &Var) -> Result<Var> {
        match self {
            Var::Object(o) => o.mul(vm, self, other),
            _ => mul_values(self, other),
        }
    }

    pub fn div(&self, vm: &Vm, other: &Var) -> Result<Var> {
        match self {
            Var::Object(o) => o.div(vm, self, other),
            _ => div_values(self, other),
        }
    }

    pub fn rem(&self, _vm: &Vm, other: &Var) -> Result<Var> {
        match self {
            Var::Object(o) => Err(o.operator_not_supported("%")),
            _ => rem_values(self, other),
        }
    }

    pub fn neg(&self) -> Result<Var> {
        match self {
            Var::Int(i) => Ok(Var::Int(i.wrapping_neg())),
            Var::Float(f) => Ok(Var::Float(-f)),
            _ => Err(op_not_supported("-", self, &Var::Null)),
        }
    }

    fn as_bits(&self, op: &str) -> Result<i64> {
        self.as_int()
            .ok_or_else(|| op_not_supported(op, self, &Var::Null))
    }

    pub fn bit_not(&self) -> Result<Var> {
        Ok(Var::Int(!self.as_bits("~")?))
    }

    pub fn bit_lshift(&self, other: &Var) -> Result<Var> {
        let a = self.as_bits("<<")?;
        let b = other.as_bits("<<")?;
        Ok(Var::Int(a.wrapping_shl(b as u32)))
    }

    pub fn bit_rshift(&self, other: &Var) -> Result<Var> {
        let a = self.as_bits(">>")?;
        let b = other.as_bits(">>")?;
        Ok(Var::Int(a.wrapping_shr(b as u32)))
    }

    pub fn bit_and(&self, other: &Var) -> Result<Var> {
        Ok(Var::Int(self.as_bits("&")? & other.as_bits("&")?))
    }

    pub fn bit_or(&self, other: &Var) -> Result<Var> {
        Ok(Var::Int(self.as_bits("|")? | other.as_bits("|")?))
    }

    pub fn bit_xor(&self, other: &Var) -> Result<Var> {
        Ok(Var::Int(self.as_bits("^")? ^ other.as_bits("^")?))
    }

    /// `<` / `<=` / `>` / `>=` share this: an object on either side
    /// dispatches through its capability set (reversed when it sits on the
    /// right); the matrix in `compare_values` handles the rest.
    pub fn compare(&self, vm: &Vm, other: &Var, op: &str) -> Result<std::cmp::Ordering> {
        match (self, other) {
            (Var::Object(o), _) => o.compare(vm, self, other, op),
            (_, Var::Object(o)) => Ok(o.compare(vm, other, self, op)?.reverse()),
            _ => compare_values(self, other, op),
        }
    }

    /// `==`: objects on either side may override through the `equals`
    /// capability (falling back to identity); everything else uses plain
    /// value equality.
    pub fn equals(&self, vm: &Vm, other: &Var) -> Result<bool> {
        match (self, other) {
            (Var::Object(o), _) => o.equals(vm, self, other),
            (_, Var::Object(o)) => o.equals(vm, other, self),
            _ => Ok(self == other),
        }
    }

    /// Stable hash used for map keys and the `hash()` method.
    ///
    /// Arrays and maps are not hashable; objects are hashable only when
    /// they provide the `__hash` capability.
    pub fn hash_value(&self, vm: &Vm) -> Result<u64> {
        match self {
            Var::Object(o) => {
                let mut hasher = DefaultHasher::new();
                (5u8, o.hash_value(vm, self)?).hash(&mut hasher);
                Ok(hasher.finish())
            }
            other => hash_values(other),
        }
    }

    /// Deep copy: containers are duplicated, objects stay shared.
    pub fn copy(&self) -> Var {
        match self {
            Var::Array(a) => {
                Var::Array(Array::from_vec(a.to_vec().iter().map(Var::copy).collect()))
            }
            Var::Map(m) => {
                let copied = Map::new();
                for (k, v) in m.pairs() {
                    // keys were hashable on the way in
                    let _ = copied.set(k.copy(), v.copy());
                }
                Var::Map(copied)
            }
            other => other.clone(),
        }
    }

    // -- member / index capabilities ---------------------------------------

    pub fn get_member(&self, name: &str) -> Result<Var> {
        match self {
            Var::Object(o) => o.get_member(name),
            _ => Err(Error::new(
                ErrorKind::AttributeError,
                format!("{} has no member \"{}\".", self.type_name(), name),
            )),
        }
    }

    pub fn set_member(&self, name: &str, value: Var) -> Result<()> {
        match self {
            Var::Object(o) => o.set_member(name, value),
            _ => Err(Error::new(
                ErrorKind::AttributeError,
                format!("{} has no member \"{}\".", self.type_name(), name),
            )),
        }
    }

    pub fn get_mapped(&self, vm: &Vm, key: &Var) -> Result<Var> {
        match self {
            Var::Array(a) => {
                let idx = key.as_int().ok_or_else(|| {
                    Error::new(
                        ErrorKind::TypeError,
                        format!("Array index must be int, not {}.", key.type_name()),
                    )
                })?;
                a.get(idx)
            }
            Var::Map(m) => m.get(key),
            Var::String(s) => {
                let idx = key.as_int().ok_or_else(|| {
                    Error::new(
                        ErrorKind::TypeError,
                        format!("String index must be int, not {}.", key.type_name()),
                    )
                })?;
                let chars: Vec<char> = s.chars().collect();
                let i = normalize_index(idx, chars.len())?;
                Ok(Var::String(chars[i].to_string()))
            }
            Var::Object(o) => o.get_mapped(vm, self, key),
            _ => Err(Error::new(
                ErrorKind::OperatorNotSupported,
                format!("{} is not indexable.", self.type_name()),
            )),
        }
    }

    pub fn set_mapped(&self, vm: &Vm, key: &Var, value: Var) -> Result<()> {
        match self {
            Var::Array(a) => {
                let idx = key.as_int().ok_or_else(|| {
                    Error::new(
                        ErrorKind::TypeError,
                        format!("Array index must be int, not {}.", key.type_name()),
                    )
                })?;
                a.set(idx, value)
            }
            Var::Map(m) => {
                // rejects unhashable keys, object keys without `__hash` included
                key.hash_value(vm)?;
                m.set(key.clone(), value)
            }
            Var::Object(o) => o.set_mapped(vm, self, key, value),
            _ => Err(Error::new(
                ErrorKind::OperatorNotSupported,
                format!("{} is not indexable.", self.type_name()),
            )),
        }
    }

    // -- iteration ----------------------------------------------------------

    /// Begin iterating; returns an iterator value for `IterNext` to drive.
    pub fn iter_begin(&self, vm: &Vm) -> Result<Var> {
        match self {
            Var::Array(a) => Ok(Var::Object(Rc::new(ArrayIterator::new(a.clone())))),
            Var::Map(m) => Ok(Var::Object(Rc::new(MapIterator::new(m.keys())))),
            Var::Object(o) => o.iter_begin(vm, self),
            _ => Err(Error::new(
                ErrorKind::OperatorNotSupported,
                format!("{} is not iterable.", self.type_name()),
            )),
        }
    }

    pub fn iter_has_next(&self, vm: &Vm) -> Result<bool> {
        match self {
            Var::Object(o) => o.iter_has_next(vm, self),
            _ => Err(Error::new(
                ErrorKind::OperatorNotSupported,
                format!("{} is not an iterator.", self.type_name()),
            )),
        }
    }

    pub fn iter_next(&self, vm: &Vm) -> Result<Var> {
        match self {
            Var::Object(o) => o.iter_next(vm, self),
            _ => Err(Error::new(
                ErrorKind::OperatorNotSupported,
                format!("{} is not an iterator.", self.type_name()),
            )),
        }
    }

    // -- display -------------------------------------------------------------

    /// Plain string conversion: what `print` and `String(x)` produce.
    /// Strings come out raw (no quotes).
    pub fn to_display_string(&self) -> String {
        match self {
            Var::String(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// Debug-ish representation: strings quoted, containers recursive.
    pub fn repr(&self) -> String {
        match self {
            Var::Null => "null".to_string(),
            Var::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Var::Int(i) => i.to_string(),
            Var::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{}.0", f)
                } else {
                    f.to_string()
                }
            }
            Var::String(s) => format!("\"{}\"", s),
            Var::Array(a) => {
                let inner: Vec<String> = a.borrow().iter().map(Var::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Var::Map(m) => {
                let inner: Vec<String> = m
                    .pairs()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Var::Object(o) => o.to_display_string(),
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Var::Null, Var::Null) => true,
            (Var::Bool(a), Var::Bool(b)) => a == b,
            (Var::Int(a), Var::Int(b)) => a == b,
            (Var::Float(a), Var::Float(b)) => a == b,
            (Var::Int(a), Var::Float(b)) | (Var::Float(b), Var::Int(a)) => *a as f64 == *b,
            (Var::String(a), Var::String(b)) => a == b,
            (Var::Array(a), Var::Array(b)) => a.ptr_eq(b) || *a.borrow() == *b.borrow(),
            (Var::Map(a), Var::Map(b)) => a.ptr_eq(b) || a.pairs() == b.pairs(),
            (Var::Object(a), Var::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Var {
    fn from(b: bool) -> Self {
        Var::Bool(b)
    }
}

impl From<i64> for Var {
    fn from(i: i64) -> Self {
        Var::Int(i)
    }
}

impl From<f64> for Var {
    fn from(f: f64) -> Self {
        Var::Float(f)
    }
}

impl From<&str> for Var {
    fn from(s: &str) -> Self {
        Var::String(s.to_string())
    }
}

impl From<String> for Var {
    fn from(s: String) -> Self {
        Var::String(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Var {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::{SerializeMap, SerializeSeq};
        match self {
            Var::Null => serializer.serialize_unit(),
            Var::Bool(b) => serializer.serialize_bool(*b),
            Var::Int(i) => serializer.serialize_i64(*i),
            Var::Float(f) => serializer.serialize_f64(*f),
            Var::String(s) => serializer.serialize_str(s),
            Var::Array(a) => {
                let items = a.borrow();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Var::Map(m) => {
                let pairs = m.pairs();
                let mut map = serializer.serialize_map(Some(pairs.len()))?;
                for (k, v) in pairs.iter() {
                    map.serialize_entry(&k.to_display_string(), v)?;
                }
                map.end()
            }
            Var::Object(o) => serializer.serialize_str(&o.to_display_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Value operator matrices
// ---------------------------------------------------------------------------

fn op_not_supported(op: &str, left: &Var, right: &Var) -> Error {
    Error::new(
        ErrorKind::OperatorNotSupported,
        format!(
            "operator \"{}\" not supported on {} and {}.",
            op,
            left.type_name(),
            right.type_name()
        ),
    )
}

/// `+` on plain values: numeric addition with Int -> Float promotion,
/// string and array concatenation. Also the compile-time folding path.
pub(crate) fn add_values(left: &Var, right: &Var) -> Result<Var> {
    match (left, right) {
        (Var::Int(a), Var::Int(b)) => Ok(Var::Int(a.wrapping_add(*b))),
        (Var::Float(a), Var::Float(b)) => Ok(Var::Float(a + b)),
        (Var::Int(a), Var::Float(b)) => Ok(Var::Float(*a as f64 + b)),
        (Var::Float(a), Var::Int(b)) => Ok(Var::Float(a + *b as f64)),
        (Var::String(a), Var::String(b)) => Ok(Var::String(format!("{}{}", a, b))),
        (Var::Array(a), Var::Array(b)) => {
            let mut items = a.to_vec();
            items.extend(b.to_vec());
            Ok(Var::Array(Array::from_vec(items)))
        }
        _ => Err(op_not_supported("+", left, right)),
    }
}

pub(crate) fn sub_values(left: &Var, right: &Var) -> Result<Var> {
    match (left, right) {
        (Var::Int(a), Var::Int(b)) => Ok(Var::Int(a.wrapping_sub(*b))),
        (Var::Float(a), Var::Float(b)) => Ok(Var::Float(a - b)),
        (Var::Int(a), Var::Float(b)) => Ok(Var::Float(*a as f64 - b)),
        (Var::Float(a), Var::Int(b)) => Ok(Var::Float(a - *b as f64)),
        _ => Err(op_not_supported("-", left, right)),
    }
}

pub(crate) fn mul_values(left: &Var, right: &Var) -> Result<Var> {
    match (left, right) {
        (Var::Int(a), Var::Int(b)) => Ok(Var::Int(a.wrapping_mul(*b))),
        (Var::Float(a), Var::Float(b)) => Ok(Var::Float(a * b)),
        (Var::Int(a), Var::Float(b)) => Ok(Var::Float(*a as f64 * b)),
        (Var::Float(a), Var::Int(b)) => Ok(Var::Float(a * *b as f64)),
        _ => Err(op_not_supported("*", left, right)),
    }
}

pub(crate) fn div_values(left: &Var, right: &Var) -> Result<Var> {
    match (left, right) {
        (Var::Int(a), Var::Int(b)) => {
            if *b == 0 {
                Err(Error::new(ErrorKind::ZeroDivision, "division by zero."))
            } else {
                Ok(Var::Int(a.wrapping_div(*b)))
            }
        }
        _ if left.is_numeric() && right.is_numeric() => {
            let a = left.as_float().unwrap();
            let b = right.as_float().unwrap();
            if b == 0.0 {
                Err(Error::new(ErrorKind::ZeroDivision, "division by zero."))
            } else {
                Ok(Var::Float(a / b))
            }
        }
        _ => Err(op_not_supported("/", left, right)),
    }
}

pub(crate) fn rem_values(left: &Var, right: &Var) -> Result<Var> {
    match (left, right) {
        (Var::Int(a), Var::Int(b)) => {
            if *b == 0 {
                Err(Error::new(ErrorKind::ZeroDivision, "modulo by zero."))
            } else {
                Ok(Var::Int(a.wrapping_rem(*b)))
            }
        }
        _ if left.is_numeric() && right.is_numeric() => {
            let a = left.as_float().unwrap();
            let b = right.as_float().unwrap();
            if b == 0.0 {
                Err(Error::new(ErrorKind::ZeroDivision, "modulo by zero."))
            } else {
                Ok(Var::Float(a % b))
            }
        }
        _ => Err(op_not_supported("%", left, right)),
    }
}

/// Ordering on plain values: numbers compare with promotion, strings
/// lexicographically.
pub(crate) fn compare_values(left: &Var, right: &Var, op: &str) -> Result<std::cmp::Ordering> {
    match (left, right) {
        (Var::Int(a), Var::Int(b)) => Ok(a.cmp(b)),
        _ if left.is_numeric() && right.is_numeric() => {
            let a = left.as_float().unwrap();
            let b = right.as_float().unwrap();
            a.partial_cmp(&b).ok_or_else(|| {
                Error::new(ErrorKind::OperatorNotSupported, "cannot order NaN.")
            })
        }
        (Var::String(a), Var::String(b)) => Ok(a.cmp(b)),
        _ => Err(op_not_supported(op, left, right)),
    }
}

/// Hash of a plain value; objects go through the vm-aware
/// [`Var::hash_value`] so script `__hash` overrides apply.
pub(crate) fn hash_values(value: &Var) -> Result<u64> {
    let mut hasher = DefaultHasher::new();
    match value {
        Var::Null => 0u8.hash(&mut hasher),
        Var::Bool(b) => (1u8, b).hash(&mut hasher),
        Var::Int(i) => (2u8, i).hash(&mut hasher),
        Var::Float(f) => (3u8, f.to_bits()).hash(&mut hasher),
        Var::String(s) => (4u8, s).hash(&mut hasher),
        Var::Object(_) | Var::Array(_) | Var::Map(_) => {
            return Err(Error::new(
                ErrorKind::OperatorNotSupported,
                format!("{} is not hashable.", value.type_name()),
            ));
        }
    }
    Ok(hasher.finish())
}

// ---------------------------------------------------------------------------
// Built-in method surface for strings, arrays and maps
// ---------------------------------------------------------------------------

fn check_argc(name: &str, args: &[Var], expected: usize) -> Result<()> {
    if args.len() != expected {
        return Err(Error::new(
            ErrorKind::InvalidArgCount,
            format!(
                "method \"{}\" expects {} argument(s), got {}.",
                name,
                expected,
                args.len()
            ),
        ));
    }
    Ok(())
}

/// Value methods every type answers unless an object overrides them.
fn is_universal_method(name: &str) -> bool {
    matches!(name, "to_string" | "copy" | "hash")
}

impl Var {
    /// Method dispatch entry point used by the `CallMethod` opcode.
    ///
    /// Objects get first refusal, so a class method named `to_string`,
    /// `copy` or `hash` overrides the universal default.
    pub fn call_method(&self, vm: &Vm, name: &str, args: &mut [Var]) -> Result<Var> {
        if let Var::Object(o) = self {
            if !is_universal_method(name) || o.has_method(name) {
                return o.call_method(vm, self, name, args);
            }
        }

        match name {
            "to_string" => {
                check_argc(name, args, 0)?;
                return Ok(Var::String(self.to_display_string()));
            }
            "copy" => {
                check_argc(name, args, 0)?;
                return Ok(self.copy());
            }
            "hash" => {
                check_argc(name, args, 0)?;
                return Ok(Var::Int(self.hash_value(vm)? as i64));
            }
            _ => {}
        }

        match self {
            Var::String(s) => string_method(s, name, args),
            Var::Array(a) => array_method(a, name, args),
            Var::Map(m) => map_method(m, name, args),
            Var::Object(o) => o.call_method(vm, self, name, args),
            _ => Err(no_method(self.type_name(), name)),
        }
    }
}

fn no_method(type_name: &str, method: &str) -> Error {
    Error::new(
        ErrorKind::AttributeError,
        format!("{} has no method \"{}\".", type_name, method),
    )
}

fn string_method(s: &str, name: &str, args: &mut [Var]) -> Result<Var> {
    match name {
        "size" => {
            check_argc(name, args, 0)?;
            Ok(Var::Int(s.chars().count() as i64))
        }
        "to_int" => {
            check_argc(name, args, 0)?;
            s.trim()
                .parse::<i64>()
                .map(Var::Int)
                .map_err(|_| Error::new(ErrorKind::TypeError, format!("cannot parse \"{}\" as int.", s)))
        }
        "to_float" => {
            check_argc(name, args, 0)?;
            s.trim()
                .parse::<f64>()
                .map(Var::Float)
                .map_err(|_| Error::new(ErrorKind::TypeError, format!("cannot parse \"{}\" as float.", s)))
        }
        "upper" => {
            check_argc(name, args, 0)?;
            Ok(Var::String(s.to_uppercase()))
        }
        "lower" => {
            check_argc(name, args, 0)?;
            Ok(Var::String(s.to_lowercase()))
        }
        "strip" => {
            check_argc(name, args, 0)?;
            Ok(Var::String(s.trim().to_string()))
        }
        "substr" => {
            check_argc(name, args, 2)?;
            let start = args[0]
                .as_int()
                .ok_or_else(|| Error::new(ErrorKind::TypeError, "substr expects int arguments."))?;
            let end = args[1]
                .as_int()
                .ok_or_else(|| Error::new(ErrorKind::TypeError, "substr expects int arguments."))?;
            let chars: Vec<char> = s.chars().collect();
            let start = normalize_index(start, chars.len() + 1)?;
            let end = normalize_index(end, chars.len() + 1)?;
            if start > end {
                return Err(Error::new(ErrorKind::InvalidIndex, "substr start is past end."));
            }
            Ok(Var::String(chars[start..end].iter().collect()))
        }
        "startswith" => {
            check_argc(name, args, 1)?;
            let prefix = args[0]
                .as_str()
                .ok_or_else(|| Error::new(ErrorKind::TypeError, "startswith expects a String."))?;
            Ok(Var::Bool(s.starts_with(prefix)))
        }
        "endswith" => {
            check_argc(name, args, 1)?;
            let suffix = args[0]
                .as_str()
                .ok_or_else(|| Error::new(ErrorKind::TypeError, "endswith expects a String."))?;
            Ok(Var::Bool(s.ends_with(suffix)))
        }
        "split" => {
            check_argc(name, args, 1)?;
            let sep = args[0]
                .as_str()
                .ok_or_else(|| Error::new(ErrorKind::TypeError, "split expects a String."))?;
            let parts: Vec<Var> = s.split(sep).map(|p| Var::String(p.to_string())).collect();
            Ok(Var::Array(Array::from_vec(parts)))
        }
        "join" => {
            check_argc(name, args, 1)?;
            let arr = match &args[0] {
                Var::Array(a) => a,
                other => {
                    return Err(Error::new(
                        ErrorKind::TypeError,
                        format!("join expects an Array, got {}.", other.type_name()),
                    ));
                }
            };
            let parts: Vec<String> = arr.borrow().iter().map(Var::to_display_string).collect();
            Ok(Var::String(parts.join(s)))
        }
        _ => Err(no_method("String", name)),
    }
}

fn array_method(a: &Array, name: &str, args: &mut [Var]) -> Result<Var> {
    match name {
        "size" => {
            check_argc(name, args, 0)?;
            Ok(Var::Int(a.len() as i64))
        }
        "push" => {
            check_argc(name, args, 1)?;
            a.push(args[0].clone());
            Ok(Var::Null)
        }
        "pop" => {
            check_argc(name, args, 0)?;
            a.pop()
                .ok_or_else(|| Error::new(ErrorKind::InvalidIndex, "pop from empty Array."))
        }
        "clear" => {
            check_argc(name, args, 0)?;
            a.borrow_mut().clear();
            Ok(Var::Null)
        }
        "at" => {
            check_argc(name, args, 1)?;
            let idx = args[0]
                .as_int()
                .ok_or_else(|| Error::new(ErrorKind::TypeError, "at expects an int index."))?;
            a.get(idx)
        }
        "insert" => {
            check_argc(name, args, 2)?;
            let idx = args[0]
                .as_int()
                .ok_or_else(|| Error::new(ErrorKind::TypeError, "insert expects an int index."))?;
            let len = a.len();
            let idx = normalize_index(idx, len + 1)?;
            a.borrow_mut().insert(idx, args[1].clone());
            Ok(Var::Null)
        }
        "remove_index" => {
            check_argc(name, args, 1)?;
            let idx = args[0]
                .as_int()
                .ok_or_else(|| Error::new(ErrorKind::TypeError, "remove_index expects an int index."))?;
            let len = a.len();
            let idx = normalize_index(idx, len)?;
            Ok(a.borrow_mut().remove(idx))
        }
        "contains" => {
            check_argc(name, args, 1)?;
            Ok(Var::Bool(a.borrow().contains(&args[0])))
        }
        "reverse" => {
            check_argc(name, args, 0)?;
            a.borrow_mut().reverse();
            Ok(Var::Null)
        }
        "sort" => {
            check_argc(name, args, 0)?;
            let mut err = None;
            a.borrow_mut().sort_by(|x, y| {
                compare_values(x, y, "<").unwrap_or_else(|e| {
                    err.get_or_insert(e);
                    std::cmp::Ordering::Equal
                })
            });
            match err {
                Some(e) => Err(e),
                None => Ok(Var::Null),
            }
        }
        _ => Err(no_method("Array", name)),
    }
}

fn map_method(m: &Map, name: &str, args: &mut [Var]) -> Result<Var> {
    match name {
        "size" => {
            check_argc(name, args, 0)?;
            Ok(Var::Int(m.len() as i64))
        }
        "has" => {
            check_argc(name, args, 1)?;
            Ok(Var::Bool(m.has(&args[0])))
        }
        "at" => {
            check_argc(name, args, 1)?;
            m.get(&args[0])
        }
        "clear" => {
            check_argc(name, args, 0)?;
            m.clear();
            Ok(Var::Null)
        }
        _ => Err(no_method("Map", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn arithmetic_promotion() {
        assert_eq!(add_values(&Var::Int(1), &Var::Int(1)).unwrap(), Var::Int(2));
        assert_eq!(
            add_values(&Var::Int(1), &Var::Float(1.0)).unwrap(),
            Var::Float(2.0)
        );
        assert_eq!(
            add_values(&Var::from("a"), &Var::from("b")).unwrap(),
            Var::from("ab")
        );
        let err = add_values(&Var::from("a"), &Var::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OperatorNotSupported);
    }

    #[test]
    fn division_by_zero() {
        let err = div_values(&Var::Int(1), &Var::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
        let err = div_values(&Var::Float(1.0), &Var::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
    }

    #[test]
    fn int_division_truncates() {
        assert_eq!(div_values(&Var::Int(7), &Var::Int(2)).unwrap(), Var::Int(3));
        assert_eq!(
            div_values(&Var::Int(7), &Var::Float(2.0)).unwrap(),
            Var::Float(3.5)
        );
    }

    #[test]
    fn aliased_array_mutation_is_visible() {
        let a = Var::Array(Array::from_vec(vec![Var::Int(1)]));
        let b = a.clone();
        if let Var::Array(arr) = &a {
            arr.push(Var::Int(2));
        }
        if let Var::Array(arr) = &b {
            assert_eq!(arr.len(), 2);
        }
    }

    #[test]
    fn copy_detaches_containers() {
        let a = Var::Array(Array::from_vec(vec![Var::Int(1)]));
        let b = a.copy();
        if let Var::Array(arr) = &a {
            arr.push(Var::Int(2));
        }
        if let Var::Array(arr) = &b {
            assert_eq!(arr.len(), 1);
        }
    }

    #[test]
    fn map_rejects_unhashable_keys() {
        let m = Map::new();
        let err = m
            .set(Var::Array(Array::new()), Var::Int(1))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::OperatorNotSupported);
        m.set(Var::Float(1.5), Var::Int(1)).unwrap();
        m.set(Var::from("k"), Var::Int(2)).unwrap();
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn numeric_cross_equality() {
        assert_eq!(Var::Int(1), Var::Float(1.0));
        assert_ne!(Var::Int(1), Var::Float(1.5));
    }

    #[test]
    fn negative_indexing() {
        let a = Array::from_vec(vec![Var::Int(10), Var::Int(20), Var::Int(30)]);
        assert_eq!(a.get(-1).unwrap(), Var::Int(30));
        assert!(a.get(3).is_err());
    }

    #[test]
    fn display_strings() {
        assert_eq!(Var::Int(7).to_display_string(), "7");
        assert_eq!(Var::from("x").to_display_string(), "x");
        assert_eq!(Var::from("x").repr(), "\"x\"");
        assert_eq!(Var::Float(2.0).to_display_string(), "2.0");
        assert_eq!(
            Var::Array(Array::from_vec(vec![Var::from("a"), Var::Int(1)])).repr(),
            "[\"a\", 1]"
        );
    }
}
