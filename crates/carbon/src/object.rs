//! The object capability set and the small runtime reference objects.
//!
//! Everything that lives behind `Var::Object` implements [`Object`]. Each
//! capability has a default implementation that fails with
//! `OperatorNotSupported`; concrete objects override selectively: script
//! instances route through their blueprint, native objects through the
//! native-class registry, and the ref objects below expose classes, builtin
//! functions and builtin types as first-class values.

use std::any::Any;
use std::cell::Cell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::builtins::{BuiltinFunc, BuiltinType};
use crate::error::{Error, ErrorKind, Result};
use crate::value::{Array, Var};
use crate::vm::Vm;

/// Capability set shared by every object-like value.
///
/// `this` is the `Var` holding the object itself; script instances need it
/// to pass themselves as `self` when a capability dispatches into script
/// code. Every capability (member access, calls, indexing, iteration,
/// arithmetic and comparison operators, hashing) defaults to an
/// `OperatorNotSupported` failure; concrete objects override selectively.
pub trait Object {
    fn class_name(&self) -> String;

    fn as_any(&self) -> &dyn Any;

    fn get_member(&self, name: &str) -> Result<Var> {
        Err(Error::new(
            ErrorKind::AttributeError,
            format!("{} has no member \"{}\".", self.class_name(), name),
        ))
    }

    fn set_member(&self, name: &str, _value: Var) -> Result<()> {
        Err(Error::new(
            ErrorKind::AttributeError,
            format!("{} has no member \"{}\".", self.class_name(), name),
        ))
    }

    /// Does this object define `name` as a method of its own? Used to let
    /// user overrides win over the universal value methods.
    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(&self, _vm: &Vm, _this: &Var, name: &str, _args: &mut [Var]) -> Result<Var> {
        Err(Error::new(
            ErrorKind::AttributeError,
            format!("{} has no method \"{}\".", self.class_name(), name),
        ))
    }

    fn call(&self, _vm: &Vm, _this: &Var, _args: &mut [Var]) -> Result<Var> {
        Err(Error::new(
            ErrorKind::OperatorNotSupported,
            format!("{} is not callable.", self.class_name()),
        ))
    }

    fn get_mapped(&self, _vm: &Vm, _this: &Var, _key: &Var) -> Result<Var> {
        Err(Error::new(
            ErrorKind::OperatorNotSupported,
            format!("{} is not indexable.", self.class_name()),
        ))
    }

    fn set_mapped(&self, _vm: &Vm, _this: &Var, _key: &Var, _value: Var) -> Result<()> {
        Err(Error::new(
            ErrorKind::OperatorNotSupported,
            format!("{} is not indexable.", self.class_name()),
        ))
    }

    fn iter_begin(&self, _vm: &Vm, _this: &Var) -> Result<Var> {
        Err(Error::new(
            ErrorKind::OperatorNotSupported,
            format!("{} is not iterable.", self.class_name()),
        ))
    }

    fn iter_has_next(&self, _vm: &Vm, _this: &Var) -> Result<bool> {
        Err(Error::new(
            ErrorKind::OperatorNotSupported,
            format!("{} is not an iterator.", self.class_name()),
        ))
    }

    fn iter_next(&self, _vm: &Vm, _this: &Var) -> Result<Var> {
        Err(Error::new(
            ErrorKind::OperatorNotSupported,
            format!("{} is not an iterator.", self.class_name()),
        ))
    }

    // -- operator capabilities ----------------------------------------------

    fn add(&self, _vm: &Vm, _this: &Var, _other: &Var) -> Result<Var> {
        Err(self.operator_not_supported("+"))
    }

    fn sub(&self, _vm: &Vm, _this: &Var, _other: &Var) -> Result<Var> {
        Err(self.operator_not_supported("-"))
    }

    fn mul(&self, _vm: &Vm, _this: &Var, _other: &Var) -> Result<Var> {
        Err(self.operator_not_supported("*"))
    }

    fn div(&self, _vm: &Vm, _this: &Var, _other: &Var) -> Result<Var> {
        Err(self.operator_not_supported("/"))
    }

    /// Equality. Falls back to identity so two references to the same
    /// object always compare equal.
    fn equals(&self, _vm: &Vm, this: &Var, other: &Var) -> Result<bool> {
        Ok(this == other)
    }

    /// Ordering for `<` / `<=` / `>` / `>=`; `op` names the source operator
    /// for diagnostics.
    fn compare(&self, _vm: &Vm, _this: &Var, _other: &Var, op: &str) -> Result<Ordering> {
        Err(self.operator_not_supported(op))
    }

    fn hash_value(&self, _vm: &Vm, _this: &Var) -> Result<u64> {
        Err(Error::new(
            ErrorKind::OperatorNotSupported,
            format!("{} is not hashable.", self.class_name()),
        ))
    }

    fn to_display_string(&self) -> String {
        format!("[{}]", self.class_name())
    }

    fn operator_not_supported(&self, op: &str) -> Error {
        Error::new(
            ErrorKind::OperatorNotSupported,
            format!(
                "operator \"{}\" not supported on {}.",
                op,
                self.class_name()
            ),
        )
    }
}

// ---------------------------------------------------------------------------
// Iterators
// ---------------------------------------------------------------------------

/// Iterator over a shared array: visits elements in insertion order.
/// Holds the array itself, so mutation during iteration stays visible.
pub struct ArrayIterator {
    array: Array,
    index: Cell<usize>,
}

impl ArrayIterator {
    pub fn new(array: Array) -> Self {
        Self {
            array,
            index: Cell::new(0),
        }
    }
}

impl Object for ArrayIterator {
    fn class_name(&self) -> String {
        "ArrayIterator".to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn iter_has_next(&self, _vm: &Vm, _this: &Var) -> Result<bool> {
        Ok(self.index.get() < self.array.len())
    }

    fn iter_next(&self, _vm: &Vm, _this: &Var) -> Result<Var> {
        let i = self.index.get();
        let value = self.array.get(i as i64)?;
        self.index.set(i + 1);
        Ok(value)
    }
}

/// Iterator over a map's keys, snapshotted at `iter_begin`.
pub struct MapIterator {
    keys: Vec<Var>,
    index: Cell<usize>,
}

impl MapIterator {
    pub fn new(keys: Vec<Var>) -> Self {
        Self {
            keys,
            index: Cell::new(0),
        }
    }
}

impl Object for MapIterator {
    fn class_name(&self) -> String {
        "MapIterator".to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn iter_has_next(&self, _vm: &Vm, _this: &Var) -> Result<bool> {
        Ok(self.index.get() < self.keys.len())
    }

    fn iter_next(&self, _vm: &Vm, _this: &Var) -> Result<Var> {
        let i = self.index.get();
        let key = self.keys.get(i).cloned().ok_or_else(|| {
            Error::new(ErrorKind::InvalidIndex, "iterator already exhausted.")
        })?;
        self.index.set(i + 1);
        Ok(key)
    }
}

// ---------------------------------------------------------------------------
// Reference objects
// ---------------------------------------------------------------------------

/// A named enum as a first-class value: `MyEnum.VALUE` reads members.
pub struct EnumRef {
    pub name: String,
    pub values: Vec<(String, i64)>,
}

impl EnumRef {
    pub fn new(name: impl Into<String>, values: Vec<(String, i64)>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

impl Object for EnumRef {
    fn class_name(&self) -> String {
        format!("enum {}", self.name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_member(&self, name: &str) -> Result<Var> {
        self.value_of(name).map(Var::Int).ok_or_else(|| {
            Error::new(
                ErrorKind::AttributeError,
                format!("enum {} has no value \"{}\".", self.name, name),
            )
        })
    }

    fn to_display_string(&self) -> String {
        format!("[enum {}]", self.name)
    }
}

/// A native class as a value: calling it constructs an instance, members
/// resolve through the registry's static bind data.
pub struct NativeClassRef {
    pub name: String,
    registry: Rc<crate::native::NativeClasses>,
}

impl NativeClassRef {
    pub fn new(name: impl Into<String>, registry: Rc<crate::native::NativeClasses>) -> Self {
        Self {
            name: name.into(),
            registry,
        }
    }
}

impl Object for NativeClassRef {
    fn class_name(&self) -> String {
        self.name.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn call(&self, vm: &Vm, _this: &Var, args: &mut [Var]) -> Result<Var> {
        self.registry.construct(vm, &self.name, args)
    }

    fn get_member(&self, name: &str) -> Result<Var> {
        self.registry.get_static_member(&self.name, name)
    }

    fn set_member(&self, name: &str, value: Var) -> Result<()> {
        self.registry.set_static_member(&self.name, name, value)
    }

    fn call_method(&self, vm: &Vm, _this: &Var, name: &str, args: &mut [Var]) -> Result<Var> {
        self.registry.call_static(vm, &self.name, name, args)
    }

    fn to_display_string(&self) -> String {
        format!("[native class {}]", self.name)
    }
}

/// A builtin function as a value: `var p = print; p("hi");`.
pub struct BuiltinFuncRef {
    pub func: BuiltinFunc,
}

impl Object for BuiltinFuncRef {
    fn class_name(&self) -> String {
        format!("builtin function {}", self.func.name())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn call(&self, vm: &Vm, _this: &Var, args: &mut [Var]) -> Result<Var> {
        crate::builtins::call_builtin(vm, self.func, args)
    }

    fn to_display_string(&self) -> String {
        format!("[builtin function {}]", self.func.name())
    }
}

/// A builtin type as a value: calling it constructs (`String(3)` -> "3").
pub struct BuiltinTypeRef {
    pub ty: BuiltinType,
}

impl Object for BuiltinTypeRef {
    fn class_name(&self) -> String {
        format!("builtin type {}", self.ty.name())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn call(&self, _vm: &Vm, _this: &Var, args: &mut [Var]) -> Result<Var> {
        crate::builtins::construct_builtin(self.ty, args)
    }

    fn to_display_string(&self) -> String {
        format!("[builtin type {}]", self.ty.name())
    }
}

/// Coerce a concrete object into an object-valued `Var`.
pub fn object_var<T: Object + 'static>(obj: T) -> Var {
    Var::Object(Rc::new(obj))
}
