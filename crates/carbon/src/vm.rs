//! The bytecode virtual machine.
//!
//! A tree of `call_carbon_function` activations interprets the flat opcode
//! stream. Per-call state is a fixed-size stack sized at codegen time, the
//! argument buffer (written back to writable caller addresses afterwards,
//! so assigning to a parameter is visible to the caller), a `self` holder,
//! and the defining class/file modules for static and extern lookups.
//!
//! Operand fetch is centralized in [`Frame::get`] / [`Frame::set`]; errors
//! pick up a source snapshot at the faulting opcode and every unwinding
//! call frame appends itself to the traceback.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::BufRead;
use std::rc::Rc;

use crate::builtins::{self, BuiltinFunc, BuiltinType};
use crate::bytecode::{AddrKind, Address, Bytecode, CarbonFunction, ClassBase, Op, VarOp};
use crate::codegen::MODULE_INIT;
use crate::diagnostic::{Pos, SourceInfo};
use crate::error::{Error, ErrorKind, Result};
use crate::native::NativeClasses;
use crate::object::{BuiltinFuncRef, BuiltinTypeRef, NativeClassRef, Object};
use crate::value::{Array, Map, Var};

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

/// Where `print` writes and `input` reads. The default goes to the real
/// stdout/stdin; tests swap in a capturing implementation.
pub trait Console {
    fn print_line(&mut self, line: &str);
    fn input_line(&mut self) -> Result<String>;
}

pub struct StdConsole;

impl Console for StdConsole {
    fn print_line(&mut self, line: &str) {
        println!("{}", line);
    }

    fn input_line(&mut self) -> Result<String> {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| Error::new(ErrorKind::IoError, e.to_string()))?;
        Ok(line.trim_end_matches(['\n', '\r']).to_string())
    }
}

/// Captures output and serves scripted input lines; shared so the host can
/// keep a handle while the VM owns the console.
#[derive(Default, Clone)]
pub struct CaptureConsole {
    inner: Rc<RefCell<CaptureInner>>,
}

#[derive(Default)]
struct CaptureInner {
    output: Vec<String>,
    input: std::collections::VecDeque<String>,
}

impl CaptureConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&self, line: impl Into<String>) {
        self.inner.borrow_mut().input.push_back(line.into());
    }

    pub fn output(&self) -> Vec<String> {
        self.inner.borrow().output.clone()
    }

    pub fn output_text(&self) -> String {
        let lines = self.inner.borrow();
        lines
            .output
            .iter()
            .map(|l| format!("{}\n", l))
            .collect::<String>()
    }
}

impl Console for CaptureConsole {
    fn print_line(&mut self, line: &str) {
        self.inner.borrow_mut().output.push(line.to_string());
    }

    fn input_line(&mut self) -> Result<String> {
        self.inner.borrow_mut().input.pop_front().ok_or_else(|| {
            Error::new(ErrorKind::IoError, "input(): no more input available.")
        })
    }
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Execution limits. The recursion limit bounds script call depth; the
/// optional instruction limit stops runaway loops.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub recursion_limit: usize,
    pub instruction_limit: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            recursion_limit: 1024,
            instruction_limit: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Script instances
// ---------------------------------------------------------------------------

/// A script class instance: its blueprint plus a member vector sized to the
/// blueprint's member count. When the base chain bottoms out in a native
/// class, the native "self" lives alongside the members.
pub struct RuntimeInstance {
    blueprint: Rc<Bytecode>,
    members: RefCell<Vec<Var>>,
    native_self: RefCell<Option<Var>>,
}

impl RuntimeInstance {
    pub fn new(blueprint: Rc<Bytecode>) -> Self {
        let members = vec![Var::Null; blueprint.member_count as usize];
        Self {
            blueprint,
            members: RefCell::new(members),
            native_self: RefCell::new(None),
        }
    }

    pub fn blueprint(&self) -> &Rc<Bytecode> {
        &self.blueprint
    }

    fn member(&self, index: u32) -> Result<Var> {
        self.members
            .borrow()
            .get(index as usize)
            .cloned()
            .ok_or_else(|| member_bounds(index))
    }

    fn set_member_at(&self, index: u32, value: Var) -> Result<()> {
        let mut members = self.members.borrow_mut();
        match members.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(member_bounds(index)),
        }
    }

    fn native_base(&self) -> Option<String> {
        let mut module = self.blueprint.clone();
        loop {
            match &module.base {
                ClassBase::Native(name) => return Some(name.clone()),
                ClassBase::Carbon(base) => {
                    let next = base.clone();
                    module = next;
                }
                ClassBase::None => return None,
            }
        }
    }

    fn native_self(&self) -> Option<Var> {
        self.native_self.borrow().clone()
    }

    fn set_native_self(&self, value: Var) {
        *self.native_self.borrow_mut() = Some(value);
    }

    /// Arithmetic dunder dispatch: `__add` / `__sub` / `__mul` / `__div`
    /// when the class defines them, the default failure otherwise.
    fn dunder_binary(&self, vm: &Vm, this: &Var, name: &str, op: &str, other: &Var) -> Result<Var> {
        if self.blueprint.find_function(name).is_some() {
            return self.call_method(vm, this, name, &mut [other.clone()]);
        }
        Err(Error::new(
            ErrorKind::OperatorNotSupported,
            format!("operator \"{}\" not supported on {}.", op, self.blueprint.name),
        ))
    }
}

fn member_bounds(index: u32) -> Error {
    Error::new(
        ErrorKind::InvalidIndex,
        format!("member index {} out of bounds.", index),
    )
}

impl Object for RuntimeInstance {
    fn class_name(&self) -> String {
        self.blueprint.name.clone()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_member(&self, name: &str) -> Result<Var> {
        if let Ok(index) = self.blueprint.member_index_of(name) {
            return self.member(index);
        }
        // statics, constants and enums resolve through the blueprint;
        // native-base properties through the registry-free getter path
        if let Ok(value) = self.blueprint.get_member(name) {
            return Ok(value);
        }
        if let Some(Var::Object(o)) = self.native_self() {
            return o.get_member(name);
        }
        Err(Error::new(
            ErrorKind::AttributeError,
            format!("{} has no member \"{}\".", self.blueprint.name, name),
        ))
    }

    fn set_member(&self, name: &str, value: Var) -> Result<()> {
        if let Ok(index) = self.blueprint.member_index_of(name) {
            return self.set_member_at(index, value);
        }
        if let Some(holder) = self.blueprint.find_static(name) {
            *holder.borrow_mut() = value;
            return Ok(());
        }
        if let Some(native_self) = self.native_self() {
            if let Var::Object(o) = &native_self {
                return o.set_member(name, value);
            }
        }
        Err(Error::new(
            ErrorKind::AttributeError,
            format!("{} has no member \"{}\".", self.blueprint.name, name),
        ))
    }

    fn has_method(&self, name: &str) -> bool {
        self.blueprint.find_function(name).is_some()
    }

    fn call_method(&self, vm: &Vm, this: &Var, name: &str, args: &mut [Var]) -> Result<Var> {
        if let Some((module, func)) = self.blueprint.find_function(name) {
            let self_var = if func.is_static { Var::Null } else { this.clone() };
            return vm.call_carbon_function(&func, &module, self_var, args);
        }
        if let Some(native) = self.native_base() {
            let native_self = self.native_self().unwrap_or(Var::Null);
            return vm
                .registry()
                .call_method_on(vm, &native_self, &native, name, args);
        }
        Err(Error::new(
            ErrorKind::AttributeError,
            format!("{} has no method \"{}\".", self.blueprint.name, name),
        ))
    }

    fn call(&self, vm: &Vm, this: &Var, args: &mut [Var]) -> Result<Var> {
        if self.blueprint.find_function("__call").is_some() {
            return self.call_method(vm, this, "__call", args);
        }
        Err(Error::new(
            ErrorKind::OperatorNotSupported,
            format!("{} is not callable.", self.blueprint.name),
        ))
    }

    fn iter_begin(&self, vm: &Vm, this: &Var) -> Result<Var> {
        self.call_method(vm, this, "__iter_begin", &mut [])
    }

    fn iter_has_next(&self, vm: &Vm, this: &Var) -> Result<bool> {
        Ok(self.call_method(vm, this, "__iter_has_next", &mut [])?.is_truthy())
    }

    fn iter_next(&self, vm: &Vm, this: &Var) -> Result<Var> {
        self.call_method(vm, this, "__iter_next", &mut [])
    }

    fn get_mapped(&self, vm: &Vm, this: &Var, key: &Var) -> Result<Var> {
        if self.has_method("__get_mapped") {
            return self.call_method(vm, this, "__get_mapped", &mut [key.clone()]);
        }
        Err(Error::new(
            ErrorKind::OperatorNotSupported,
            format!("{} is not indexable.", self.blueprint.name),
        ))
    }

    fn set_mapped(&self, vm: &Vm, this: &Var, key: &Var, value: Var) -> Result<()> {
        if self.has_method("__set_mapped") {
            self.call_method(vm, this, "__set_mapped", &mut [key.clone(), value])?;
            return Ok(());
        }
        Err(Error::new(
            ErrorKind::OperatorNotSupported,
            format!("{} is not indexable.", self.blueprint.name),
        ))
    }

    // operator overrides dispatch to the class's dunder methods and fall
    // back to the default failure when a class doesn't define them

    fn add(&self, vm: &Vm, this: &Var, other: &Var) -> Result<Var> {
        self.dunder_binary(vm, this, "__add", "+", other)
    }

    fn sub(&self, vm: &Vm, this: &Var, other: &Var) -> Result<Var> {
        self.dunder_binary(vm, this, "__sub", "-", other)
    }

    fn mul(&self, vm: &Vm, this: &Var, other: &Var) -> Result<Var> {
        self.dunder_binary(vm, this, "__mul", "*", other)
    }

    fn div(&self, vm: &Vm, this: &Var, other: &Var) -> Result<Var> {
        self.dunder_binary(vm, this, "__div", "/", other)
    }

    fn equals(&self, vm: &Vm, this: &Var, other: &Var) -> Result<bool> {
        if self.has_method("__eq") {
            let result = self.call_method(vm, this, "__eq", &mut [other.clone()])?;
            return Ok(result.is_truthy());
        }
        Ok(this == other)
    }

    fn compare(&self, vm: &Vm, this: &Var, other: &Var, op: &str) -> Result<std::cmp::Ordering> {
        use std::cmp::Ordering;
        let has_lt = self.has_method("__lt");
        let has_gt = self.has_method("__gt");
        if !has_lt && !has_gt {
            return Err(self.operator_not_supported(op));
        }
        if self.equals(vm, this, other)? {
            return Ok(Ordering::Equal);
        }
        if has_lt {
            let less = self.call_method(vm, this, "__lt", &mut [other.clone()])?;
            Ok(if less.is_truthy() { Ordering::Less } else { Ordering::Greater })
        } else {
            let greater = self.call_method(vm, this, "__gt", &mut [other.clone()])?;
            Ok(if greater.is_truthy() { Ordering::Greater } else { Ordering::Less })
        }
    }

    fn hash_value(&self, vm: &Vm, this: &Var) -> Result<u64> {
        if self.has_method("__hash") {
            return match self.call_method(vm, this, "__hash", &mut [])? {
                Var::Int(i) => Ok(i as u64),
                other => Err(Error::new(
                    ErrorKind::TypeError,
                    format!("__hash must return an int, got {}.", other.type_name()),
                )),
            };
        }
        Err(Error::new(
            ErrorKind::OperatorNotSupported,
            format!("{} is not hashable.", self.blueprint.name),
        ))
    }

    fn to_display_string(&self) -> String {
        format!("[{} instance]", self.blueprint.name)
    }
}

// ---------------------------------------------------------------------------
// The VM
// ---------------------------------------------------------------------------

pub struct Vm {
    registry: Rc<NativeClasses>,
    console: RefCell<Box<dyn Console>>,
    limits: Limits,
    depth: Cell<usize>,
    instruction_count: Cell<u64>,
    native_refs: RefCell<HashMap<String, Var>>,
    builtin_fn_refs: RefCell<HashMap<u8, Var>>,
    builtin_ty_refs: RefCell<HashMap<u8, Var>>,
}

impl Vm {
    pub fn new(registry: Rc<NativeClasses>) -> Self {
        Self::with_console(registry, Box::new(StdConsole))
    }

    pub fn with_console(registry: Rc<NativeClasses>, console: Box<dyn Console>) -> Self {
        Self {
            registry,
            console: RefCell::new(console),
            limits: Limits::default(),
            depth: Cell::new(0),
            instruction_count: Cell::new(0),
            native_refs: RefCell::new(HashMap::new()),
            builtin_fn_refs: RefCell::new(HashMap::new()),
            builtin_ty_refs: RefCell::new(HashMap::new()),
        }
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    pub fn set_console(&self, console: Box<dyn Console>) {
        *self.console.borrow_mut() = console;
    }

    pub fn registry(&self) -> &NativeClasses {
        &self.registry
    }

    pub fn print_line(&self, line: &str) {
        self.console.borrow_mut().print_line(line);
    }

    pub fn input_line(&self) -> Result<String> {
        self.console.borrow_mut().input_line()
    }

    /// Run a module's synthesized initializer (variable initializers and
    /// stray top-level statements).
    pub fn run_init(&self, module: &Rc<Bytecode>) -> Result<()> {
        if let Some(init) = module.get_function(MODULE_INIT) {
            self.call_carbon_function(&init, module, Var::Null, &mut [])?;
        }
        Ok(())
    }

    /// Invoke the module's `main` function, if any. With arity 1 it
    /// receives the script arguments as an `Array` of strings.
    pub fn run_main(&self, module: &Rc<Bytecode>, args: Vec<String>) -> Result<Var> {
        let main = match module.get_function("main") {
            Some(main) => main,
            None => return Ok(Var::Null),
        };
        match main.arg_count {
            0 => self.call_carbon_function(&main, module, Var::Null, &mut []),
            1 => {
                let argv = Array::from_vec(args.into_iter().map(Var::String).collect());
                self.call_carbon_function(&main, module, Var::Null, &mut [Var::Array(argv)])
            }
            _ => Err(Error::new(
                ErrorKind::InvalidArgCount,
                "main() takes zero arguments or one (the argument array).",
            )),
        }
    }

    /// Initialize and run a module.
    pub fn run(&self, module: &Rc<Bytecode>, args: Vec<String>) -> Result<Var> {
        self.instruction_count.set(0);
        self.run_init(module)?;
        self.run_main(module, args)
    }

    /// Call a script function: check arity, pad defaults, execute, then
    /// write the (possibly reassigned) parameters back to the caller.
    pub(crate) fn call_carbon_function(
        &self,
        func: &CarbonFunction,
        module: &Rc<Bytecode>,
        self_var: Var,
        args: &mut [Var],
    ) -> Result<Var> {
        if (args.len() as u32) < func.required_argc() || (args.len() as u32) > func.arg_count {
            return Err(Error::new(
                ErrorKind::InvalidArgCount,
                format!(
                    "\"{}\" expects {} to {} argument(s), got {}.",
                    func.name,
                    func.required_argc(),
                    func.arg_count,
                    args.len()
                ),
            ));
        }

        if self.depth.get() >= self.limits.recursion_limit {
            return Err(Error::new(
                ErrorKind::StackOverflow,
                format!("call depth exceeded {}.", self.limits.recursion_limit),
            ));
        }

        let mut buffer: Vec<Var> = args.to_vec();
        while (buffer.len() as u32) < func.arg_count {
            let missing = func.arg_count as usize - buffer.len();
            let idx = func.default_values.len() - missing;
            buffer.push(func.default_values[idx].clone());
        }

        self.depth.set(self.depth.get() + 1);
        let result = self.exec(func, module, self_var, &mut buffer);
        self.depth.set(self.depth.get() - 1);

        // parameters are references: write reassignments back
        for (slot, value) in args.iter_mut().zip(buffer) {
            *slot = value;
        }
        result
    }

    // -- the dispatch loop ---------------------------------------------------

    fn exec(
        &self,
        func: &CarbonFunction,
        module: &Rc<Bytecode>,
        self_var: Var,
        args: &mut Vec<Var>,
    ) -> Result<Var> {
        let file = if module.is_class {
            module
                .file()
                .ok_or_else(|| Error::new(ErrorKind::Bug, "class module is not linked to a file."))?
        } else {
            module.clone()
        };
        let class = if module.is_class {
            Some(module.clone())
        } else {
            None
        };

        let mut frame = Frame {
            vm: self,
            class,
            file,
            stack: vec![Var::Null; func.stack_size as usize],
            args,
            self_var,
        };

        let mut ip: usize = 0;
        loop {
            if ip >= func.opcodes.len() {
                return Ok(Var::Null);
            }
            let pos = func.op_positions[ip];

            if let Some(limit) = self.limits.instruction_limit {
                let n = self.instruction_count.get() + 1;
                self.instruction_count.set(n);
                if n > limit {
                    return Err(Error::new(
                        ErrorKind::NonTerminatingLoop,
                        format!("instruction limit {} exceeded.", limit),
                    ));
                }
            }

            match self.step(func, &mut frame, &mut ip) {
                Ok(Flow::Next) => {}
                Ok(Flow::Return(value)) => return Ok(value),
                Err(e) => return Err(self.trace(e, func, &frame.file, pos)),
            }
        }
    }

    fn trace(&self, mut e: Error, func: &CarbonFunction, file: &Rc<Bytecode>, pos: Pos) -> Error {
        if e.source_info.is_none() {
            e.source_info = Some(SourceInfo::new(&file.name, &file.source, pos, 1));
        }
        e.add_frame(func.name.clone(), file.name.clone(), pos);
        e
    }

    fn step(&self, func: &CarbonFunction, frame: &mut Frame<'_>, ip: &mut usize) -> Result<Flow> {
        let op = &func.opcodes[*ip];
        *ip += 1;

        match op {
            Op::Get { on, name, dst } => {
                let on = frame.get(*on)?;
                let value = on.get_member(frame.name(*name))?;
                frame.set(*dst, value)?;
            }
            Op::Set { on, name, value } => {
                let on = frame.get(*on)?;
                let value = frame.get(*value)?;
                on.set_member(frame.name(*name), value)?;
            }
            Op::GetMapped { on, key, dst } => {
                let on = frame.get(*on)?;
                let key = frame.get(*key)?;
                frame.set(*dst, on.get_mapped(self, &key)?)?;
            }
            Op::SetMapped { on, key, value } => {
                let on = frame.get(*on)?;
                let key = frame.get(*key)?;
                let value = frame.get(*value)?;
                on.set_mapped(self, &key, value)?;
            }
            Op::SetTrue { dst } => frame.set(*dst, Var::Bool(true))?,
            Op::SetFalse { dst } => frame.set(*dst, Var::Bool(false))?,
            Op::Operator { op, lhs, rhs, dst } => {
                let left = frame.get(*lhs)?;
                let result = match op {
                    VarOp::Not => Var::Bool(!left.is_truthy()),
                    VarOp::BitNot => left.bit_not()?,
                    VarOp::Neg => left.neg()?,
                    VarOp::Pos => left.clone(),
                    _ => {
                        let right = frame.get(*rhs)?;
                        apply_binary(self, *op, &left, &right)?
                    }
                };
                frame.set(*dst, result)?;
            }
            Op::Assign { dst, src } => {
                let value = frame.get(*src)?;
                frame.set(*dst, value)?;
            }
            Op::ConstructBuiltin { ty, args, dst } => {
                let mut values = frame.get_all(args)?;
                let value = builtins::construct_builtin(*ty, &mut values)?;
                frame.write_back(args, &values)?;
                frame.set(*dst, value)?;
            }
            Op::ConstructNative { name, args, dst } => {
                let mut values = frame.get_all(args)?;
                let class_name = frame.name(*name).to_string();
                let value = self.registry.construct(self, &class_name, &mut values)?;
                frame.write_back(args, &values)?;
                frame.set(*dst, value)?;
            }
            Op::ConstructCarbon { name, args, dst } => {
                let class_name = frame.name(*name).to_string();
                let blueprint = frame.file.get_class(&class_name).ok_or_else(|| {
                    Error::new(
                        ErrorKind::NameError,
                        format!("class \"{}\" not found in module.", class_name),
                    )
                })?;
                let mut values = frame.get_all(args)?;
                let instance = self.construct_carbon(&blueprint, &mut values)?;
                frame.write_back(args, &values)?;
                frame.set(*dst, instance)?;
            }
            Op::ConstructLiteralArray { elements, dst } => {
                let values = frame.get_all(elements)?;
                frame.set(*dst, Var::Array(Array::from_vec(values)))?;
            }
            Op::ConstructLiteralMap { pairs, dst } => {
                let map = Map::new();
                for (k, v) in pairs {
                    let key = frame.get(*k)?;
                    let value = frame.get(*v)?;
                    key.hash_value(self)?;
                    map.set(key, value)?;
                }
                frame.set(*dst, Var::Map(map))?;
            }
            Op::Call { on, args, dst } => {
                let callee = frame.get(*on)?;
                let mut values = frame.get_all(args)?;
                let result = match &callee {
                    Var::Object(o) => o.call(self, &callee, &mut values)?,
                    other => {
                        return Err(Error::new(
                            ErrorKind::OperatorNotSupported,
                            format!("{} is not callable.", other.type_name()),
                        ));
                    }
                };
                frame.write_back(args, &values)?;
                frame.set(*dst, result)?;
            }
            Op::CallFunc { name, args, dst } => {
                let fn_name = frame.name(*name).to_string();
                let mut values = frame.get_all(args)?;
                let result = self.call_func_by_name(frame, &fn_name, &mut values)?;
                frame.write_back(args, &values)?;
                frame.set(*dst, result)?;
            }
            Op::CallSuperMethod { name, args, dst } => {
                let fn_name = frame.name(*name).to_string();
                let mut values = frame.get_all(args)?;
                let result = self.call_super_method(frame, &fn_name, &mut values)?;
                frame.write_back(args, &values)?;
                frame.set(*dst, result)?;
            }
            Op::CallMethod { on, name, args, dst } => {
                let target = frame.get(*on)?;
                let method = frame.name(*name).to_string();
                let mut values = frame.get_all(args)?;
                let result = target.call_method(self, &method, &mut values)?;
                frame.write_back(args, &values)?;
                frame.set(*dst, result)?;
            }
            Op::CallBuiltin { func, args, dst } => {
                let mut values = frame.get_all(args)?;
                let result = builtins::call_builtin(self, *func, &mut values)?;
                frame.write_back(args, &values)?;
                frame.set(*dst, result)?;
            }
            Op::CallSuperCtor { args } => {
                let mut values = frame.get_all(args)?;
                self.call_super_ctor(frame, &mut values)?;
                frame.write_back(args, &values)?;
            }
            Op::Jump { to } => *ip = *to as usize,
            Op::JumpIf { cond, to } => {
                if frame.get(*cond)?.is_truthy() {
                    *ip = *to as usize;
                }
            }
            Op::JumpIfNot { cond, to } => {
                if !frame.get(*cond)?.is_truthy() {
                    *ip = *to as usize;
                }
            }
            Op::Return { value } => {
                return Ok(Flow::Return(frame.get(*value)?));
            }
            Op::IterBegin { iter, on } => {
                let target = frame.get(*on)?;
                let iterator = target.iter_begin(self)?;
                frame.set(*iter, iterator)?;
            }
            Op::IterNext { value, iter, end } => {
                let iterator = frame.get(*iter)?;
                if iterator.iter_has_next(self)? {
                    let item = iterator.iter_next(self)?;
                    frame.set(*value, item)?;
                } else {
                    *ip = *end as usize;
                }
            }
            Op::End => return Ok(Flow::Return(Var::Null)),
        }
        Ok(Flow::Next)
    }

    /// Allocate a script instance and run its constructor.
    pub(crate) fn construct_carbon(&self, blueprint: &Rc<Bytecode>, args: &mut [Var]) -> Result<Var> {
        let instance = Var::Object(Rc::new(RuntimeInstance::new(blueprint.clone())));
        if let Some(ctor) = blueprint.constructor() {
            self.call_carbon_function(&ctor, blueprint, instance.clone(), args)?;
        }
        Ok(instance)
    }

    /// `CallFunc`: walk the instance's blueprint chain when a `self` is
    /// present, then the defining class chain, then the file's functions;
    /// bottoming out in a native base dispatches through the registry.
    fn call_func_by_name(&self, frame: &Frame<'_>, name: &str, args: &mut [Var]) -> Result<Var> {
        if let Some(instance) = frame.self_var.as_object::<RuntimeInstance>() {
            if let Some((module, func)) = instance.blueprint().find_function(name) {
                let self_var = if func.is_static {
                    Var::Null
                } else {
                    frame.self_var.clone()
                };
                return self.call_carbon_function(&func, &module, self_var, args);
            }
            if let Some(native) = instance.native_base() {
                let native_self = instance.native_self().unwrap_or(Var::Null);
                return self
                    .registry
                    .call_method_on(self, &native_self, &native, name, args);
            }
        } else if let Some(class) = &frame.class {
            if let Some((module, func)) = class.find_function(name) {
                if !func.is_static {
                    return Err(Error::new(
                        ErrorKind::TypeError,
                        format!(
                            "cannot call non-static method \"{}\" without an instance.",
                            name
                        ),
                    ));
                }
                return self.call_carbon_function(&func, &module, Var::Null, args);
            }
        }

        match frame.file.get_function(name) {
            Some(func) => self.call_carbon_function(&func, &frame.file, Var::Null, args),
            None => Err(Error::new(
                ErrorKind::NameError,
                format!("function \"{}\" not found.", name),
            )),
        }
    }

    /// `CallSuperMethod`: the name walk starts at the defining class's base.
    fn call_super_method(&self, frame: &Frame<'_>, name: &str, args: &mut [Var]) -> Result<Var> {
        let class = frame.class.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Bug, "super method call outside a class method.")
        })?;
        match &class.base {
            ClassBase::Carbon(base) => match base.find_function(name) {
                Some((module, func)) => {
                    let self_var = if func.is_static {
                        Var::Null
                    } else {
                        frame.self_var.clone()
                    };
                    self.call_carbon_function(&func, &module, self_var, args)
                }
                None => Err(Error::new(
                    ErrorKind::AttributeError,
                    format!("base class has no method \"{}\".", name),
                )),
            },
            ClassBase::Native(native) => {
                let native_self = frame
                    .self_var
                    .as_object::<RuntimeInstance>()
                    .and_then(|i| i.native_self())
                    .unwrap_or(Var::Null);
                self.registry
                    .call_method_on(self, &native_self, native, name, args)
            }
            ClassBase::None => Err(Error::new(
                ErrorKind::Bug,
                "super method call in a class without a base.",
            )),
        }
    }

    /// `CallSuperCtor`: construct the native base into the instance, or run
    /// the carbon base's constructor with the current instance as self.
    fn call_super_ctor(&self, frame: &Frame<'_>, args: &mut [Var]) -> Result<()> {
        let class = frame.class.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Bug, "super constructor call outside a class.")
        })?;
        match &class.base {
            ClassBase::Carbon(base) => {
                if let Some(ctor) = base.constructor() {
                    self.call_carbon_function(&ctor, base, frame.self_var.clone(), args)?;
                }
                Ok(())
            }
            ClassBase::Native(native) => {
                let value = self.registry.construct(self, native, args)?;
                let instance = frame
                    .self_var
                    .as_object::<RuntimeInstance>()
                    .ok_or_else(|| Error::new(ErrorKind::Bug, "self is not a script instance."))?;
                instance.set_native_self(value);
                Ok(())
            }
            ClassBase::None => Err(Error::new(
                ErrorKind::Bug,
                "super constructor call in a class without a base.",
            )),
        }
    }

    // -- runtime ref caches --------------------------------------------------

    fn native_ref(&self, name: &str) -> Var {
        if let Some(v) = self.native_refs.borrow().get(name) {
            return v.clone();
        }
        let v = Var::Object(Rc::new(NativeClassRef::new(name, self.registry.clone())));
        self.native_refs
            .borrow_mut()
            .insert(name.to_string(), v.clone());
        v
    }

    fn builtin_fn_ref(&self, index: u8) -> Result<Var> {
        if let Some(v) = self.builtin_fn_refs.borrow().get(&index) {
            return Ok(v.clone());
        }
        let func = BuiltinFunc::from_index(index).ok_or_else(|| {
            Error::new(ErrorKind::Bug, format!("invalid builtin function index {}.", index))
        })?;
        let v = Var::Object(Rc::new(BuiltinFuncRef { func }));
        self.builtin_fn_refs.borrow_mut().insert(index, v.clone());
        Ok(v)
    }

    fn builtin_ty_ref(&self, index: u8) -> Result<Var> {
        if let Some(v) = self.builtin_ty_refs.borrow().get(&index) {
            return Ok(v.clone());
        }
        let ty = BuiltinType::from_index(index).ok_or_else(|| {
            Error::new(ErrorKind::Bug, format!("invalid builtin type index {}.", index))
        })?;
        let v = Var::Object(Rc::new(BuiltinTypeRef { ty }));
        self.builtin_ty_refs.borrow_mut().insert(index, v.clone());
        Ok(v)
    }
}

enum Flow {
    Next,
    Return(Var),
}

// ---------------------------------------------------------------------------
// Operand fetch
// ---------------------------------------------------------------------------

struct Frame<'a> {
    vm: &'a Vm,
    class: Option<Rc<Bytecode>>,
    file: Rc<Bytecode>,
    stack: Vec<Var>,
    args: &'a mut Vec<Var>,
    self_var: Var,
}

impl Frame<'_> {
    fn name(&self, index: u32) -> &str {
        self.file.global_name(index)
    }

    fn get(&self, addr: Address) -> Result<Var> {
        let index = addr.index();
        match addr.kind() {
            AddrKind::Null => Ok(Var::Null),
            AddrKind::Stack => self
                .stack
                .get(index as usize)
                .cloned()
                .ok_or_else(|| stack_bounds(index)),
            AddrKind::Parameter => self
                .args
                .get(index as usize)
                .cloned()
                .ok_or_else(|| stack_bounds(index)),
            AddrKind::This => Ok(self.self_var.clone()),
            AddrKind::Extern => {
                let name = self.name(index);
                let module = self.file.get_extern(name).ok_or_else(|| {
                    Error::new(
                        ErrorKind::NameError,
                        format!("imported module \"{}\" not found.", name),
                    )
                })?;
                Ok(Var::Object(module as Rc<dyn Object>))
            }
            AddrKind::NativeClass => {
                let name = self.name(index).to_string();
                Ok(self.vm.native_ref(&name))
            }
            AddrKind::BuiltinFunc => self.vm.builtin_fn_ref(index as u8),
            AddrKind::BuiltinType => self.vm.builtin_ty_ref(index as u8),
            AddrKind::MemberVar => {
                let instance = self
                    .self_var
                    .as_object::<RuntimeInstance>()
                    .ok_or_else(|| {
                        Error::new(ErrorKind::NullPointer, "member access without an instance.")
                    })?;
                instance.member(index)
            }
            AddrKind::StaticMember => {
                let holder = self.static_holder(index)?;
                let value = holder.borrow().clone();
                Ok(value)
            }
            AddrKind::ConstValue => Ok(self.file.const_value(index).clone()),
        }
    }

    fn set(&mut self, addr: Address, value: Var) -> Result<()> {
        let index = addr.index();
        match addr.kind() {
            AddrKind::Stack => match self.stack.get_mut(index as usize) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(stack_bounds(index)),
            },
            AddrKind::Parameter => match self.args.get_mut(index as usize) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(stack_bounds(index)),
            },
            AddrKind::MemberVar => {
                let instance = self
                    .self_var
                    .as_object::<RuntimeInstance>()
                    .ok_or_else(|| {
                        Error::new(ErrorKind::NullPointer, "member access without an instance.")
                    })?;
                instance.set_member_at(index, value)
            }
            AddrKind::StaticMember => {
                let holder = self.static_holder(index)?;
                *holder.borrow_mut() = value;
                Ok(())
            }
            other => Err(Error::new(
                ErrorKind::Bug,
                format!("address kind {:?} is not writable.", other),
            )),
        }
    }

    /// Static member holders resolve through instance -> defining class ->
    /// file, by name.
    fn static_holder(&self, name_index: u32) -> Result<Rc<RefCell<Var>>> {
        let name = self.name(name_index);
        if let Some(instance) = self.self_var.as_object::<RuntimeInstance>() {
            if let Some(holder) = instance.blueprint().find_static(name) {
                return Ok(holder);
            }
        }
        if let Some(class) = &self.class {
            if let Some(holder) = class.find_static(name) {
                return Ok(holder);
            }
        }
        if let Some(holder) = self.file.find_static(name) {
            return Ok(holder);
        }
        Err(Error::new(
            ErrorKind::NameError,
            format!("static member \"{}\" not found.", name),
        ))
    }

    fn get_all(&self, addrs: &[Address]) -> Result<Vec<Var>> {
        addrs.iter().map(|a| self.get(*a)).collect()
    }

    /// Arguments are passed as references: after a call, values mutated by
    /// the callee land back in any writable source address.
    fn write_back(&mut self, addrs: &[Address], values: &[Var]) -> Result<()> {
        for (addr, value) in addrs.iter().zip(values) {
            if addr.is_writable() {
                self.set(*addr, value.clone())?;
            }
        }
        Ok(())
    }
}

fn stack_bounds(index: u32) -> Error {
    Error::new(
        ErrorKind::InvalidIndex,
        format!("stack slot {} out of bounds.", index),
    )
}

fn apply_binary(vm: &Vm, op: VarOp, left: &Var, right: &Var) -> Result<Var> {
    use std::cmp::Ordering;
    match op {
        VarOp::Add => left.add(vm, right),
        VarOp::Sub => left.sub(vm, right),
        VarOp::Mul => left.mul(vm, right),
        VarOp::Div => left.div(vm, right),
        VarOp::Mod => left.rem(vm, right),
        VarOp::EqEq => Ok(Var::Bool(left.equals(vm, right)?)),
        VarOp::NotEq => Ok(Var::Bool(!left.equals(vm, right)?)),
        VarOp::Lt => Ok(Var::Bool(left.compare(vm, right, "<")? == Ordering::Less)),
        VarOp::LtEq => Ok(Var::Bool(left.compare(vm, right, "<=")? != Ordering::Greater)),
        VarOp::Gt => Ok(Var::Bool(left.compare(vm, right, ">")? == Ordering::Greater)),
        VarOp::GtEq => Ok(Var::Bool(left.compare(vm, right, ">=")? != Ordering::Less)),
        VarOp::And => Ok(Var::Bool(left.is_truthy() && right.is_truthy())),
        VarOp::Or => Ok(Var::Bool(left.is_truthy() || right.is_truthy())),
        VarOp::BitLshift => left.bit_lshift(right),
        VarOp::BitRshift => left.bit_rshift(right),
        VarOp::BitAnd => left.bit_and(right),
        VarOp::BitOr => left.bit_or(right),
        VarOp::BitXor => left.bit_xor(right),
        VarOp::Not | VarOp::BitNot | VarOp::Neg | VarOp::Pos => Err(Error::new(
            ErrorKind::Bug,
            "unary operator dispatched as binary.",
        )),
    }
}
