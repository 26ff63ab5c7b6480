//! Compiled module representation: addresses, opcodes, functions and the
//! `Bytecode` module itself.
//!
//! A `Bytecode` is either a file-module (top level) or a class-module
//! nested inside one. File-modules own the global name table and the
//! constant pool; class-modules reach them through a weak back-reference
//! set at link time. Everything here is logically immutable once codegen
//! finishes; the only runtime mutation is through static member holders.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::builtins::{BuiltinFunc, BuiltinType};
use crate::diagnostic::Pos;
use crate::error::{Error, ErrorKind, Result};
use crate::object::{EnumRef, Object};
use crate::value::Var;
use crate::vm::Vm;

// ---------------------------------------------------------------------------
// Address model
// ---------------------------------------------------------------------------

/// Where an operand lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddrKind {
    Null = 0,
    Stack,
    Parameter,
    This,
    Extern,
    NativeClass,
    BuiltinFunc,
    BuiltinType,
    MemberVar,
    StaticMember,
    ConstValue,
}

/// A 32-bit operand address: 8 bits of kind, 24 bits of index.
///
/// Opcodes store addresses structured (the `Op` sum type makes dispatch
/// exhaustive); `as_u32` gives the packed form for dumps and asserts the
/// 24-bit index bound at construction.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Address {
    kind: AddrKind,
    index: u32,
}

pub const ADDR_INDEX_BITS: u32 = 24;
pub const ADDR_INDEX_MAX: u32 = (1 << ADDR_INDEX_BITS) - 1;

impl Address {
    pub const NULL: Address = Address {
        kind: AddrKind::Null,
        index: 0,
    };

    pub fn new(kind: AddrKind, index: u32) -> Self {
        debug_assert!(index <= ADDR_INDEX_MAX);
        Self { kind, index }
    }

    pub fn kind(&self) -> AddrKind {
        self.kind
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn as_u32(&self) -> u32 {
        ((self.kind as u32) << ADDR_INDEX_BITS) | self.index
    }

    pub fn from_u32(raw: u32) -> Option<Address> {
        let kind = match raw >> ADDR_INDEX_BITS {
            0 => AddrKind::Null,
            1 => AddrKind::Stack,
            2 => AddrKind::Parameter,
            3 => AddrKind::This,
            4 => AddrKind::Extern,
            5 => AddrKind::NativeClass,
            6 => AddrKind::BuiltinFunc,
            7 => AddrKind::BuiltinType,
            8 => AddrKind::MemberVar,
            9 => AddrKind::StaticMember,
            10 => AddrKind::ConstValue,
            _ => return None,
        };
        Some(Address::new(kind, raw & ADDR_INDEX_MAX))
    }

    /// Can a value be stored through this address?
    pub fn is_writable(&self) -> bool {
        matches!(
            self.kind,
            AddrKind::Stack | AddrKind::Parameter | AddrKind::MemberVar | AddrKind::StaticMember
        )
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.index)
    }
}

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

/// Runtime operators for the `Operator` opcode. Unary operators ignore the
/// right operand (codegen passes `Address::NULL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Not,
    BitNot,
    BitLshift,
    BitRshift,
    BitAnd,
    BitOr,
    BitXor,
    Neg,
    Pos,
}

/// One bytecode instruction. Jump targets are instruction indices.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// `dst <- on.get_member(names[name])`
    Get { on: Address, name: u32, dst: Address },
    /// `on.set_member(names[name], value)`
    Set { on: Address, name: u32, value: Address },
    /// `dst <- on.get_mapped(key)`
    GetMapped { on: Address, key: Address, dst: Address },
    /// `on.set_mapped(key, value)`
    SetMapped { on: Address, key: Address, value: Address },
    SetTrue { dst: Address },
    SetFalse { dst: Address },
    /// Apply `op` to the operands; unary ops take `rhs = Address::NULL`.
    Operator { op: VarOp, lhs: Address, rhs: Address, dst: Address },
    /// Plain value copy.
    Assign { dst: Address, src: Address },
    ConstructBuiltin { ty: BuiltinType, args: Vec<Address>, dst: Address },
    ConstructNative { name: u32, args: Vec<Address>, dst: Address },
    /// Construct a script instance of `names[name]`; runs its constructor.
    ConstructCarbon { name: u32, args: Vec<Address>, dst: Address },
    ConstructLiteralArray { elements: Vec<Address>, dst: Address },
    ConstructLiteralMap { pairs: Vec<(Address, Address)>, dst: Address },
    /// Invoke a callable value (`__call`).
    Call { on: Address, args: Vec<Address>, dst: Address },
    /// Invoke a script function by name; walked through the instance's
    /// blueprint ancestry when a `self` is present.
    CallFunc { name: u32, args: Vec<Address>, dst: Address },
    /// Like `CallFunc`, but the name walk starts at the defining class's
    /// base (`super.method()` dispatch).
    CallSuperMethod { name: u32, args: Vec<Address>, dst: Address },
    CallMethod { on: Address, name: u32, args: Vec<Address>, dst: Address },
    CallBuiltin { func: BuiltinFunc, args: Vec<Address>, dst: Address },
    /// Invoke the base's constructor with the current instance as self.
    CallSuperCtor { args: Vec<Address> },
    Jump { to: u32 },
    JumpIf { cond: Address, to: u32 },
    JumpIfNot { cond: Address, to: u32 },
    Return { value: Address },
    /// `iter <- on.iter_begin()`
    IterBegin { iter: Address, on: Address },
    /// If the iterator has a next value, store it and fall through;
    /// otherwise jump to `end`.
    IterNext { value: Address, iter: Address, end: u32 },
    /// Implicit `return null` at the function epilogue.
    End,
}

// ---------------------------------------------------------------------------
// Function object
// ---------------------------------------------------------------------------

/// A compiled function body.
#[derive(Debug, Clone)]
pub struct CarbonFunction {
    pub name: String,
    pub is_static: bool,
    pub arg_count: u32,
    /// Default values applied to the trailing parameters.
    pub default_values: Vec<Var>,
    pub opcodes: Vec<Op>,
    /// Source position per opcode (parallel to `opcodes`), for tracebacks.
    pub op_positions: Vec<Pos>,
    /// Number of stack slots this function needs, computed at codegen.
    pub stack_size: u32,
    /// Parameter names, kept for diagnostics.
    pub arg_names: Vec<String>,
}

impl CarbonFunction {
    pub fn required_argc(&self) -> u32 {
        self.arg_count - self.default_values.len() as u32
    }
}

// ---------------------------------------------------------------------------
// Bytecode module
// ---------------------------------------------------------------------------

/// Resolved base of a class-module.
#[derive(Debug, Clone, Default)]
pub enum ClassBase {
    #[default]
    None,
    /// A script class: local sibling or a class from an imported module.
    Carbon(Rc<Bytecode>),
    Native(String),
}

/// A compiled module: a file or a class nested in one.
pub struct Bytecode {
    pub is_class: bool,
    /// Class name, or the module path for file-modules.
    pub name: String,
    /// Source text (file-modules only), kept for runtime diagnostics.
    pub source: String,
    /// Owning file-module; empty on file-modules themselves.
    file: RefCell<Weak<Bytecode>>,
    /// Weak self-reference, set at link time, so capability dispatch can
    /// recover the shared module handle.
    myself: RefCell<Weak<Bytecode>>,
    pub base: ClassBase,
    /// Interned global names (file-modules only).
    global_names: Vec<String>,
    /// Global constant pool (file-modules only).
    const_pool: Vec<Var>,
    /// Instance member name -> index, inherited members included.
    member_index: HashMap<String, u32>,
    pub member_count: u32,
    statics: HashMap<String, Rc<RefCell<Var>>>,
    named_constants: HashMap<String, Var>,
    enums: HashMap<String, Rc<EnumRef>>,
    functions: RefCell<HashMap<String, Rc<CarbonFunction>>>,
    constructor: RefCell<Option<Rc<CarbonFunction>>>,
    classes: HashMap<String, Rc<Bytecode>>,
    /// Imported modules by alias (file-modules only).
    externs: HashMap<String, Rc<Bytecode>>,
}

impl Bytecode {
    /// Shell for a class-module; functions are attached during codegen.
    #[allow(clippy::too_many_arguments)]
    pub fn class_module(
        name: String,
        base: ClassBase,
        member_index: HashMap<String, u32>,
        member_count: u32,
        statics: HashMap<String, Rc<RefCell<Var>>>,
        named_constants: HashMap<String, Var>,
        enums: HashMap<String, Rc<EnumRef>>,
    ) -> Bytecode {
        Bytecode {
            is_class: true,
            name,
            source: String::new(),
            file: RefCell::new(Weak::new()),
            myself: RefCell::new(Weak::new()),
            base,
            global_names: Vec::new(),
            const_pool: Vec::new(),
            member_index,
            member_count,
            statics,
            named_constants,
            enums,
            functions: RefCell::new(HashMap::new()),
            constructor: RefCell::new(None),
            classes: HashMap::new(),
            externs: HashMap::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn file_module(
        name: String,
        source: String,
        global_names: Vec<String>,
        const_pool: Vec<Var>,
        statics: HashMap<String, Rc<RefCell<Var>>>,
        named_constants: HashMap<String, Var>,
        enums: HashMap<String, Rc<EnumRef>>,
        functions: HashMap<String, Rc<CarbonFunction>>,
        classes: HashMap<String, Rc<Bytecode>>,
        externs: HashMap<String, Rc<Bytecode>>,
    ) -> Bytecode {
        Bytecode {
            is_class: false,
            name,
            source,
            file: RefCell::new(Weak::new()),
            myself: RefCell::new(Weak::new()),
            base: ClassBase::None,
            global_names,
            const_pool,
            member_index: HashMap::new(),
            member_count: 0,
            statics,
            named_constants,
            enums,
            functions: RefCell::new(functions),
            constructor: RefCell::new(None),
            classes,
            externs,
        }
    }

    /// Link every class-module back to its owning file and set self
    /// references. Called once, right after the file-module `Rc` is created.
    pub fn link_classes(file: &Rc<Bytecode>) {
        *file.myself.borrow_mut() = Rc::downgrade(file);
        for class in file.classes.values() {
            *class.file.borrow_mut() = Rc::downgrade(file);
            *class.myself.borrow_mut() = Rc::downgrade(class);
        }
    }

    pub fn file(&self) -> Option<Rc<Bytecode>> {
        self.file.borrow().upgrade()
    }

    /// The shared handle to this module, available after linking.
    pub fn rc(&self) -> Result<Rc<Bytecode>> {
        self.myself.borrow().upgrade().ok_or_else(|| {
            Error::new(ErrorKind::Bug, "bytecode module used before linking.")
        })
    }

    pub fn set_function(&self, name: String, func: Rc<CarbonFunction>) {
        self.functions.borrow_mut().insert(name, func);
    }

    pub fn set_constructor(&self, func: Rc<CarbonFunction>) {
        *self.constructor.borrow_mut() = Some(func);
    }

    pub fn constructor(&self) -> Option<Rc<CarbonFunction>> {
        self.constructor.borrow().clone()
    }

    pub fn get_function(&self, name: &str) -> Option<Rc<CarbonFunction>> {
        self.functions.borrow().get(name).cloned()
    }

    /// Find a function walking the carbon base chain.
    ///
    /// Returns the defining module alongside the function so calls execute
    /// against the right blueprint.
    pub fn find_function(self: &Rc<Self>, name: &str) -> Option<(Rc<Bytecode>, Rc<CarbonFunction>)> {
        let mut current = Some(self.clone());
        while let Some(module) = current {
            if let Some(func) = module.get_function(name) {
                return Some((module, func));
            }
            current = match &module.base {
                ClassBase::Carbon(base) => Some(base.clone()),
                _ => None,
            };
        }
        None
    }

    /// Find a static member holder walking the carbon base chain.
    pub fn find_static(&self, name: &str) -> Option<Rc<RefCell<Var>>> {
        if let Some(holder) = self.statics.get(name) {
            return Some(holder.clone());
        }
        match &self.base {
            ClassBase::Carbon(base) => base.find_static(name),
            _ => None,
        }
    }

    pub fn get_constant(&self, name: &str) -> Option<Var> {
        if let Some(value) = self.named_constants.get(name) {
            return Some(value.clone());
        }
        match &self.base {
            ClassBase::Carbon(base) => base.get_constant(name),
            _ => None,
        }
    }

    pub fn get_enum(&self, name: &str) -> Option<Rc<EnumRef>> {
        self.enums.get(name).cloned()
    }

    pub fn get_class(&self, name: &str) -> Option<Rc<Bytecode>> {
        self.classes.get(name).cloned()
    }

    pub fn get_extern(&self, name: &str) -> Option<Rc<Bytecode>> {
        self.externs.get(name).cloned()
    }

    pub fn member_index_of(&self, name: &str) -> Result<u32> {
        self.member_index.get(name).copied().ok_or_else(|| {
            Error::new(
                ErrorKind::AttributeError,
                format!("{} has no member \"{}\".", self.name, name),
            )
        })
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.member_index.contains_key(name)
    }

    pub fn member_names(&self) -> impl Iterator<Item = &String> {
        self.member_index.keys()
    }

    pub fn global_name(&self, index: u32) -> &str {
        &self.global_names[index as usize]
    }

    pub fn const_value(&self, index: u32) -> &Var {
        &self.const_pool[index as usize]
    }

    /// The base's native class name, if the base is native.
    pub fn base_native(&self) -> Option<&str> {
        match &self.base {
            ClassBase::Native(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Debug for Bytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bytecode")
            .field("name", &self.name)
            .field("is_class", &self.is_class)
            .field("member_count", &self.member_count)
            .finish()
    }
}

/// Class- and file-modules are first-class values: `A.CONST`, `A.static_m()`
/// and `imported.f()` all go through the object capability set.
impl Object for Bytecode {
    fn class_name(&self) -> String {
        if self.is_class {
            format!("class {}", self.name)
        } else {
            format!("module {}", self.name)
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_member(&self, name: &str) -> Result<Var> {
        if let Some(value) = self.get_constant(name) {
            return Ok(value);
        }
        if let Some(e) = self.enums.get(name) {
            return Ok(Var::Object(e.clone() as Rc<dyn Object>));
        }
        if let Some(holder) = self.find_static(name) {
            return Ok(holder.borrow().clone());
        }
        if let Some(class) = self.classes.get(name) {
            return Ok(Var::Object(class.clone() as Rc<dyn Object>));
        }
        Err(Error::new(
            ErrorKind::AttributeError,
            format!("{} has no member \"{}\".", self.class_name(), name),
        ))
    }

    fn set_member(&self, name: &str, value: Var) -> Result<()> {
        if let Some(holder) = self.find_static(name) {
            *holder.borrow_mut() = value;
            return Ok(());
        }
        if self.get_constant(name).is_some() {
            return Err(Error::new(
                ErrorKind::AttributeError,
                format!("cannot assign to constant \"{}\".", name),
            ));
        }
        Err(Error::new(
            ErrorKind::AttributeError,
            format!("{} has no member \"{}\".", self.class_name(), name),
        ))
    }

    fn has_method(&self, name: &str) -> bool {
        match self.rc() {
            Ok(rc) => rc.find_function(name).is_some() || self.get_class(name).is_some(),
            Err(_) => false,
        }
    }

    fn call_method(&self, vm: &Vm, _this: &Var, name: &str, args: &mut [Var]) -> Result<Var> {
        let rc = self.rc()?;
        if let Some((module, func)) = rc.find_function(name) {
            if module.is_class && !func.is_static {
                return Err(Error::new(
                    ErrorKind::TypeError,
                    format!("cannot call non-static method \"{}\" without an instance.", name),
                ));
            }
            return vm.call_carbon_function(&func, &module, Var::Null, args);
        }
        // `module.SomeClass(...)` constructs through the module object
        if let Some(class) = self.get_class(name) {
            return vm.construct_carbon(&class, args);
        }
        Err(Error::new(
            ErrorKind::AttributeError,
            format!("{} has no method \"{}\".", self.class_name(), name),
        ))
    }

    fn to_display_string(&self) -> String {
        format!("[{}]", self.class_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn address_packs_kind_and_index() {
        let addr = Address::new(AddrKind::Stack, 42);
        let packed = addr.as_u32();
        assert_eq!(packed >> ADDR_INDEX_BITS, AddrKind::Stack as u32);
        assert_eq!(packed & ADDR_INDEX_MAX, 42);
        assert_eq!(Address::from_u32(packed), Some(addr));
    }

    #[test]
    fn address_roundtrips_every_kind() {
        for kind in [
            AddrKind::Null,
            AddrKind::Stack,
            AddrKind::Parameter,
            AddrKind::This,
            AddrKind::Extern,
            AddrKind::NativeClass,
            AddrKind::BuiltinFunc,
            AddrKind::BuiltinType,
            AddrKind::MemberVar,
            AddrKind::StaticMember,
            AddrKind::ConstValue,
        ] {
            let addr = Address::new(kind, 7);
            assert_eq!(Address::from_u32(addr.as_u32()), Some(addr));
        }
        assert_eq!(Address::from_u32(0xff << ADDR_INDEX_BITS), None);
    }

    #[test]
    fn writability_by_kind() {
        assert!(Address::new(AddrKind::Stack, 0).is_writable());
        assert!(Address::new(AddrKind::Parameter, 0).is_writable());
        assert!(Address::new(AddrKind::MemberVar, 0).is_writable());
        assert!(Address::new(AddrKind::StaticMember, 0).is_writable());
        assert!(!Address::NULL.is_writable());
        assert!(!Address::new(AddrKind::ConstValue, 0).is_writable());
    }
}
