//! Code generation: reduced AST -> bytecode module.
//!
//! Responsibilities: intern names and compile-time values into the file's
//! global tables, allocate instance-member indices densely (inherited
//! members of local bases first, own members renumbered after them), lower
//! every function body to a flat opcode vector and record its peak stack
//! depth. Jumps are emitted with a placeholder target and patched once the
//! real target is known.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::*;
use crate::bytecode::{AddrKind, Address, Bytecode, CarbonFunction, ClassBase, Op, VarOp};
use crate::diagnostic::Pos;
use crate::error::{Error, ErrorKind, Result};
use crate::native::NativeClasses;
use crate::object::EnumRef;
use crate::value::Var;

/// Name of the synthesized module initializer: runs variable initializers
/// and stray top-level statements before `main`.
pub const MODULE_INIT: &str = "@init";

/// Generate the bytecode module for an analyzed file.
pub fn generate(file: &FileNode, _registry: &NativeClasses) -> Result<Rc<Bytecode>> {
    let mut cg = CodeGen {
        file,
        names: Vec::new(),
        name_map: HashMap::new(),
        const_pool: Vec::new(),
        file_enums: HashMap::new(),
        class_shells: Vec::new(),
    };
    cg.run()
}

struct CodeGen<'a> {
    file: &'a FileNode,
    names: Vec<String>,
    name_map: HashMap<String, u32>,
    const_pool: Vec<Var>,
    file_enums: HashMap<String, Rc<EnumRef>>,
    /// Class-module shells, parallel to `file.classes`.
    class_shells: Vec<Rc<Bytecode>>,
}

impl<'a> CodeGen<'a> {
    fn run(&mut self) -> Result<Rc<Bytecode>> {
        let file = self.file;
        self.build_enums();
        self.build_class_shells()?;

        // function bodies, classes first so constructors exist for
        // `ConstructCarbon` at run time
        for (ci, class) in file.classes.iter().enumerate() {
            for func in &class.functions {
                let compiled = Rc::new(self.gen_function(func, Some(ci))?);
                let shell = &self.class_shells[ci];
                if func.is_constructor {
                    shell.set_constructor(compiled.clone());
                }
                shell.set_function(func.name.clone(), compiled);
            }
            if file.classes[ci].constructor.is_none() {
                let compiled = Rc::new(self.gen_default_ctor(ci)?);
                self.class_shells[ci].set_constructor(compiled);
            }
        }

        let mut functions: HashMap<String, Rc<CarbonFunction>> = HashMap::new();
        for func in &file.functions {
            functions.insert(func.name.clone(), Rc::new(self.gen_function(func, None)?));
        }
        functions.insert(
            MODULE_INIT.to_string(),
            Rc::new(self.gen_module_init()?),
        );

        // module-level statics, constants, enums
        let mut statics = HashMap::new();
        for var in &self.file.vars {
            statics.insert(var.name.clone(), Rc::new(std::cell::RefCell::new(Var::Null)));
        }
        let mut named_constants = HashMap::new();
        for c in &self.file.constants {
            named_constants.insert(c.name.clone(), c.value.clone());
        }
        if let Some(unnamed) = &self.file.unnamed_enum {
            for value in &unnamed.values {
                named_constants.insert(value.name.clone(), Var::Int(value.value));
            }
        }
        let mut externs = HashMap::new();
        for import in &self.file.imports {
            if let Some(module) = &import.module {
                externs.insert(import.name.clone(), module.clone());
            }
        }
        let mut classes = HashMap::new();
        for (ci, class) in self.file.classes.iter().enumerate() {
            classes.insert(class.name.clone(), self.class_shells[ci].clone());
        }

        let module = Rc::new(Bytecode::file_module(
            self.file.path.clone(),
            self.file.source.clone(),
            std::mem::take(&mut self.names),
            std::mem::take(&mut self.const_pool),
            statics,
            named_constants,
            std::mem::take(&mut self.file_enums),
            functions,
            classes,
            externs,
        ));
        Bytecode::link_classes(&module);
        Ok(module)
    }

    fn build_enums(&mut self) {
        for e in &self.file.enums {
            let name = e.name.clone().expect("named enum list holds named enums");
            let values = e.values.iter().map(|v| (v.name.clone(), v.value)).collect();
            self.file_enums
                .insert(name.clone(), Rc::new(EnumRef::new(name, values)));
        }
    }

    /// Build class-module shells in inheritance order so member indices of
    /// local bases are known before the derived class allocates its own.
    fn build_class_shells(&mut self) -> Result<()> {
        let count = self.file.classes.len();
        let mut order: Vec<usize> = Vec::with_capacity(count);
        let mut visited = vec![false; count];
        fn visit(file: &FileNode, i: usize, visited: &mut [bool], order: &mut Vec<usize>) {
            if visited[i] {
                return;
            }
            visited[i] = true;
            if let Base::Local(b) = &file.classes[i].base {
                visit(file, *b, visited, order);
            }
            order.push(i);
        }
        for i in 0..count {
            visit(self.file, i, &mut visited, &mut order);
        }

        let mut shells: Vec<Option<Rc<Bytecode>>> = vec![None; count];
        for &ci in &order {
            let class = &self.file.classes[ci];

            let (base, mut member_index, mut member_count) = match &class.base {
                Base::None | Base::Unresolved { .. } => {
                    (ClassBase::None, HashMap::new(), 0u32)
                }
                Base::Local(b) => {
                    let base_shell = shells[*b].clone().expect("bases built first");
                    let map: HashMap<String, u32> = base_shell
                        .member_names()
                        .map(|n| {
                            (n.clone(), base_shell.member_index_of(n).expect("own name"))
                        })
                        .collect();
                    let n = base_shell.member_count;
                    (ClassBase::Carbon(base_shell), map, n)
                }
                Base::Extern(module) => {
                    let map: HashMap<String, u32> = module
                        .member_names()
                        .map(|n| (n.clone(), module.member_index_of(n).expect("own name")))
                        .collect();
                    let n = module.member_count;
                    (ClassBase::Carbon(module.clone()), map, n)
                }
                Base::Native(name) => (ClassBase::Native(name.clone()), HashMap::new(), 0),
            };

            for var in class.vars.iter().filter(|v| !v.is_static) {
                member_index.insert(var.name.clone(), member_count);
                member_count += 1;
            }

            let mut statics = HashMap::new();
            for var in class.vars.iter().filter(|v| v.is_static) {
                statics.insert(var.name.clone(), Rc::new(std::cell::RefCell::new(Var::Null)));
            }
            let mut named_constants = HashMap::new();
            for c in &class.constants {
                named_constants.insert(c.name.clone(), c.value.clone());
            }
            if let Some(unnamed) = &class.unnamed_enum {
                for value in &unnamed.values {
                    named_constants.insert(value.name.clone(), Var::Int(value.value));
                }
            }
            let mut enums = HashMap::new();
            for e in &class.enums {
                let name = e.name.clone().expect("named enum list holds named enums");
                let values = e.values.iter().map(|v| (v.name.clone(), v.value)).collect();
                enums.insert(name.clone(), Rc::new(EnumRef::new(name, values)));
            }

            shells[ci] = Some(Rc::new(Bytecode::class_module(
                class.name.clone(),
                base,
                member_index,
                member_count,
                statics,
                named_constants,
                enums,
            )));
        }

        self.class_shells = shells.into_iter().map(|s| s.expect("all built")).collect();
        Ok(())
    }

    // -- interning -----------------------------------------------------------

    fn intern_name(&mut self, name: &str) -> u32 {
        if let Some(&i) = self.name_map.get(name) {
            return i;
        }
        let i = self.names.len() as u32;
        self.names.push(name.to_string());
        self.name_map.insert(name.to_string(), i);
        i
    }

    fn intern_const(&mut self, value: Var) -> u32 {
        for (i, existing) in self.const_pool.iter().enumerate() {
            if *existing == value {
                return i as u32;
            }
        }
        let i = self.const_pool.len() as u32;
        self.const_pool.push(value);
        i
    }

    fn class_const_addr(&mut self, ci: usize) -> Address {
        let obj = Var::Object(self.class_shells[ci].clone() as Rc<dyn crate::object::Object>);
        Address::new(AddrKind::ConstValue, self.intern_const(obj))
    }

    fn enum_const_addr(&mut self, class_index: Option<usize>, enum_index: usize) -> Address {
        let rc = match class_index {
            None => {
                let name = self.file.enums[enum_index]
                    .name
                    .clone()
                    .expect("named enum list holds named enums");
                self.file_enums.get(&name).expect("built upfront").clone()
            }
            Some(ci) => {
                let name = self.file.classes[ci].enums[enum_index]
                    .name
                    .clone()
                    .expect("named enum list holds named enums");
                self.class_shells[ci]
                    .get_enum(&name)
                    .expect("built with the shell")
            }
        };
        let obj = Var::Object(rc as Rc<dyn crate::object::Object>);
        Address::new(AddrKind::ConstValue, self.intern_const(obj))
    }

    // -- functions -----------------------------------------------------------

    fn gen_function(&mut self, func: &FunctionNode, class: Option<usize>) -> Result<CarbonFunction> {
        let mut ctx = FnCtx::new(func, class);

        if func.is_constructor {
            let ci = class.expect("constructors live in classes");
            let has_base = !self.file.classes[ci].base.is_none();
            let explicit_super = func
                .body
                .statements
                .first()
                .map(is_super_ctor_call)
                .unwrap_or(false);
            if explicit_super {
                self.gen_statement(&mut ctx, &func.body.statements[0])?;
            } else if has_base {
                ctx.emit(Op::CallSuperCtor { args: Vec::new() }, func.pos);
            }
            self.gen_member_inits(&mut ctx, ci)?;
            let rest = if explicit_super { 1 } else { 0 };
            for stmt in func.body.statements.iter().skip(rest) {
                self.gen_statement(&mut ctx, stmt)?;
            }
        } else {
            for stmt in &func.body.statements {
                self.gen_statement(&mut ctx, stmt)?;
            }
        }

        ctx.emit(Op::End, func.pos);
        Ok(ctx.finish(func))
    }

    /// Classes without an explicit constructor still need one: it calls the
    /// base constructor and runs the member initializers.
    fn gen_default_ctor(&mut self, ci: usize) -> Result<CarbonFunction> {
        let name = self.file.classes[ci].name.clone();
        let pos = self.file.classes[ci].pos;
        let has_base = !self.file.classes[ci].base.is_none();
        let synth = FunctionNode {
            name,
            pos,
            is_static: false,
            params: Vec::new(),
            default_values: Vec::new(),
            body: BlockNode::default(),
            is_constructor: true,
        };
        let mut ctx = FnCtx::new(&synth, Some(ci));
        if has_base {
            ctx.emit(Op::CallSuperCtor { args: Vec::new() }, pos);
        }
        self.gen_member_inits(&mut ctx, ci)?;
        ctx.emit(Op::End, pos);
        Ok(ctx.finish(&synth))
    }

    fn gen_member_inits(&mut self, ctx: &mut FnCtx, ci: usize) -> Result<()> {
        let file = self.file;
        for var in file.classes[ci].vars.iter().filter(|v| !v.is_static) {
            if let Some(expr) = &var.assignment {
                let index = self.class_shells[ci]
                    .member_index_of(&var.name)
                    .expect("member map built from these vars");
                let mark = ctx.next_slot;
                let value = self.gen_expr(ctx, expr)?;
                ctx.emit(
                    Op::Assign {
                        dst: Address::new(AddrKind::MemberVar, index),
                        src: value,
                    },
                    var.pos,
                );
                ctx.next_slot = mark;
            }
        }
        Ok(())
    }

    /// The module initializer: module var initializers, class static
    /// initializers and stray top-level statements, in declaration order.
    fn gen_module_init(&mut self) -> Result<CarbonFunction> {
        let synth = FunctionNode {
            name: MODULE_INIT.to_string(),
            pos: Pos::new(1, 1),
            is_static: true,
            params: Vec::new(),
            default_values: Vec::new(),
            body: BlockNode::default(),
            is_constructor: false,
        };
        let mut ctx = FnCtx::new(&synth, None);

        let file = self.file;
        for item in &file.init_items {
            let mark = ctx.next_slot;
            match item {
                InitItem::VarInit(i) => {
                    let var = &file.vars[*i];
                    if let Some(expr) = &var.assignment {
                        let value = self.gen_expr(&mut ctx, expr)?;
                        let name = self.intern_name(&var.name);
                        ctx.emit(
                            Op::Assign {
                                dst: Address::new(AddrKind::StaticMember, name),
                                src: value,
                            },
                            var.pos,
                        );
                    }
                }
                InitItem::StaticInit { class, var } => {
                    let node = &file.classes[*class].vars[*var];
                    if let Some(expr) = &node.assignment {
                        let value = self.gen_expr(&mut ctx, expr)?;
                        let on = self.class_const_addr(*class);
                        let name = self.intern_name(&node.name);
                        ctx.emit(Op::Set { on, name, value }, node.pos);
                    }
                }
                InitItem::Stmt(stmt) => {
                    self.gen_statement(&mut ctx, stmt)?;
                }
            }
            ctx.next_slot = mark;
        }

        ctx.emit(Op::End, Pos::new(1, 1));
        Ok(ctx.finish(&synth))
    }

    // -- statements ----------------------------------------------------------

    fn gen_statement(&mut self, ctx: &mut FnCtx, stmt: &Statement) -> Result<()> {
        match stmt {
            Statement::Var(var) => {
                // the slot exists before the initializer runs, but the name
                // only becomes visible afterwards, so `var x = x;` reads the
                // outer binding the analyzer resolved
                let slot = ctx.alloc_temp();
                if let Some(expr) = &var.assignment {
                    let mark = ctx.next_slot;
                    let value = self.gen_expr(ctx, expr)?;
                    ctx.emit(
                        Op::Assign {
                            dst: Address::new(AddrKind::Stack, slot),
                            src: value,
                        },
                        var.pos,
                    );
                    ctx.next_slot = mark;
                }
                ctx.register_local(&var.name, slot);
            }
            Statement::Const(_) => {
                // fully folded during analysis; references became constants
            }
            Statement::Expr(expr) => {
                let mark = ctx.next_slot;
                self.gen_expr(ctx, expr)?;
                ctx.next_slot = mark;
            }
            Statement::If {
                cond,
                body,
                else_body,
                pos,
            } => {
                let mark = ctx.next_slot;
                let cond_addr = self.gen_expr(ctx, cond)?;
                let jump_over = ctx.emit_jump(
                    Op::JumpIfNot {
                        cond: cond_addr,
                        to: u32::MAX,
                    },
                    *pos,
                );
                ctx.next_slot = mark;
                self.gen_scoped_block(ctx, body)?;
                match else_body {
                    Some(else_body) => {
                        let jump_end = ctx.emit_jump(Op::Jump { to: u32::MAX }, *pos);
                        ctx.patch_jump(jump_over, ctx.here());
                        self.gen_scoped_block(ctx, else_body)?;
                        ctx.patch_jump(jump_end, ctx.here());
                    }
                    None => ctx.patch_jump(jump_over, ctx.here()),
                }
            }
            Statement::While { cond, body, pos } => {
                let start = ctx.here();
                let mark = ctx.next_slot;
                let cond_addr = self.gen_expr(ctx, cond)?;
                let jump_end = ctx.emit_jump(
                    Op::JumpIfNot {
                        cond: cond_addr,
                        to: u32::MAX,
                    },
                    *pos,
                );
                ctx.next_slot = mark;

                ctx.loops.push(LoopCtx::new(false));
                self.gen_scoped_block(ctx, body)?;
                let loop_ctx = ctx.loops.pop().expect("pushed above");
                ctx.emit(Op::Jump { to: start }, *pos);
                let end = ctx.here();
                ctx.patch_jump(jump_end, end);
                loop_ctx.patch(ctx, start, end);
            }
            Statement::For {
                init,
                cond,
                step,
                body,
                pos,
            } => {
                ctx.push_scope();
                if let Some(init) = init {
                    self.gen_statement(ctx, init)?;
                }
                let start = ctx.here();
                let jump_end = match cond {
                    Some(cond) => {
                        let mark = ctx.next_slot;
                        let cond_addr = self.gen_expr(ctx, cond)?;
                        let j = ctx.emit_jump(
                            Op::JumpIfNot {
                                cond: cond_addr,
                                to: u32::MAX,
                            },
                            *pos,
                        );
                        ctx.next_slot = mark;
                        Some(j)
                    }
                    None => None,
                };

                ctx.loops.push(LoopCtx::new(false));
                self.gen_scoped_block(ctx, body)?;
                let loop_ctx = ctx.loops.pop().expect("pushed above");

                let step_at = ctx.here();
                if let Some(step) = step {
                    let mark = ctx.next_slot;
                    self.gen_expr(ctx, step)?;
                    ctx.next_slot = mark;
                }
                ctx.emit(Op::Jump { to: start }, *pos);
                let end = ctx.here();
                if let Some(j) = jump_end {
                    ctx.patch_jump(j, end);
                }
                loop_ctx.patch(ctx, step_at, end);
                ctx.pop_scope();
            }
            Statement::Foreach {
                var_name,
                var_pos,
                iterable,
                body,
                pos,
            } => {
                ctx.push_scope();
                let value_slot = ctx.declare_local(var_name);
                let iter_slot = ctx.alloc_temp();
                let mark = ctx.next_slot;
                let on = self.gen_expr(ctx, iterable)?;
                ctx.emit(
                    Op::IterBegin {
                        iter: Address::new(AddrKind::Stack, iter_slot),
                        on,
                    },
                    *pos,
                );
                ctx.next_slot = mark;

                let start = ctx.here();
                let next = ctx.emit_jump(
                    Op::IterNext {
                        value: Address::new(AddrKind::Stack, value_slot),
                        iter: Address::new(AddrKind::Stack, iter_slot),
                        end: u32::MAX,
                    },
                    *var_pos,
                );
                ctx.loops.push(LoopCtx::new(false));
                self.gen_scoped_block(ctx, body)?;
                let loop_ctx = ctx.loops.pop().expect("pushed above");
                ctx.emit(Op::Jump { to: start }, *pos);
                let end = ctx.here();
                ctx.patch_jump(next, end);
                loop_ctx.patch(ctx, start, end);
                ctx.pop_scope();
            }
            Statement::Switch { value, cases, pos } => {
                let switch_value = ctx.alloc_temp();
                let mark = ctx.next_slot;
                let value_addr = self.gen_expr(ctx, value)?;
                ctx.emit(
                    Op::Assign {
                        dst: Address::new(AddrKind::Stack, switch_value),
                        src: value_addr,
                    },
                    *pos,
                );
                ctx.next_slot = mark;

                ctx.loops.push(LoopCtx::new(true));
                let mut case_end_jumps: Vec<usize> = Vec::new();

                for case in cases.iter().filter(|c| c.value.is_some()) {
                    let cmp = ctx.alloc_temp();
                    let case_const = self.intern_const(Var::Int(case.folded));
                    ctx.emit(
                        Op::Operator {
                            op: VarOp::EqEq,
                            lhs: Address::new(AddrKind::Stack, switch_value),
                            rhs: Address::new(AddrKind::ConstValue, case_const),
                            dst: Address::new(AddrKind::Stack, cmp),
                        },
                        case.pos,
                    );
                    let skip = ctx.emit_jump(
                        Op::JumpIfNot {
                            cond: Address::new(AddrKind::Stack, cmp),
                            to: u32::MAX,
                        },
                        case.pos,
                    );
                    ctx.next_slot = cmp;
                    self.gen_scoped_block(ctx, &case.body)?;
                    case_end_jumps.push(ctx.emit_jump(Op::Jump { to: u32::MAX }, case.pos));
                    ctx.patch_jump(skip, ctx.here());
                }

                // default branch is emitted last
                if let Some(default_case) = cases.iter().find(|c| c.value.is_none()) {
                    self.gen_scoped_block(ctx, &default_case.body)?;
                }

                let end = ctx.here();
                for j in case_end_jumps {
                    ctx.patch_jump(j, end);
                }
                let loop_ctx = ctx.loops.pop().expect("pushed above");
                loop_ctx.patch(ctx, end, end);
                ctx.next_slot = switch_value;
            }
            Statement::Break { pos } => {
                let j = ctx.emit_jump(Op::Jump { to: u32::MAX }, *pos);
                ctx.loops
                    .last_mut()
                    .expect("analyzer rejects break outside loops")
                    .break_jumps
                    .push(j);
            }
            Statement::Continue { pos } => {
                let j = ctx.emit_jump(Op::Jump { to: u32::MAX }, *pos);
                // continue passes through switches to the enclosing loop
                let target = ctx
                    .loops
                    .iter_mut()
                    .rev()
                    .find(|l| !l.is_switch)
                    .expect("analyzer rejects continue outside loops");
                target.continue_jumps.push(j);
            }
            Statement::Return { value, pos } => {
                let mark = ctx.next_slot;
                let addr = match value {
                    Some(expr) => self.gen_expr(ctx, expr)?,
                    None => Address::NULL,
                };
                ctx.emit(Op::Return { value: addr }, *pos);
                ctx.next_slot = mark;
            }
            Statement::Block(block) => self.gen_scoped_block(ctx, block)?,
        }
        Ok(())
    }

    fn gen_scoped_block(&mut self, ctx: &mut FnCtx, block: &BlockNode) -> Result<()> {
        ctx.push_scope();
        for stmt in &block.statements {
            self.gen_statement(ctx, stmt)?;
        }
        ctx.pop_scope();
        Ok(())
    }

    // -- expressions ---------------------------------------------------------

    fn gen_expr(&mut self, ctx: &mut FnCtx, expr: &Expr) -> Result<Address> {
        match &expr.kind {
            ExprKind::Const(value) => {
                Ok(Address::new(AddrKind::ConstValue, self.intern_const(value.clone())))
            }
            ExprKind::This => Ok(Address::new(AddrKind::This, 0)),
            ExprKind::Super => Err(self.bug("\"super\" outside a call.", expr.pos)),
            ExprKind::BuiltinFunc(f) => {
                Ok(Address::new(AddrKind::BuiltinFunc, f.index() as u32))
            }
            ExprKind::BuiltinType(t) => {
                Ok(Address::new(AddrKind::BuiltinType, t.index() as u32))
            }
            ExprKind::Identifier { name, resolved } => {
                self.gen_identifier(ctx, name, resolved, expr.pos)
            }
            ExprKind::Array(elements) => {
                let mut addrs = Vec::with_capacity(elements.len());
                for element in elements {
                    addrs.push(self.gen_expr(ctx, element)?);
                }
                let dst = ctx.temp_addr();
                ctx.emit(
                    Op::ConstructLiteralArray {
                        elements: addrs,
                        dst,
                    },
                    expr.pos,
                );
                Ok(dst)
            }
            ExprKind::Map(pairs) => {
                let mut addr_pairs = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let k = self.gen_expr(ctx, key)?;
                    let v = self.gen_expr(ctx, value)?;
                    addr_pairs.push((k, v));
                }
                let dst = ctx.temp_addr();
                ctx.emit(
                    Op::ConstructLiteralMap {
                        pairs: addr_pairs,
                        dst,
                    },
                    expr.pos,
                );
                Ok(dst)
            }
            ExprKind::Index {
                base,
                member,
                member_pos,
            } => {
                let on = self.gen_expr(ctx, base)?;
                let name = self.intern_name(member);
                let dst = ctx.temp_addr();
                ctx.emit(Op::Get { on, name, dst }, *member_pos);
                Ok(dst)
            }
            ExprKind::MappedIndex { base, key } => {
                let on = self.gen_expr(ctx, base)?;
                let key = self.gen_expr(ctx, key)?;
                let dst = ctx.temp_addr();
                ctx.emit(Op::GetMapped { on, key, dst }, expr.pos);
                Ok(dst)
            }
            ExprKind::Operator { op, args } => self.gen_operator(ctx, *op, args, expr.pos),
            ExprKind::Call { .. } => self.gen_call(ctx, expr),
        }
    }

    fn gen_identifier(
        &mut self,
        ctx: &mut FnCtx,
        name: &str,
        resolved: &IdentRef,
        pos: Pos,
    ) -> Result<Address> {
        match resolved {
            IdentRef::Parameter(i) => Ok(Address::new(AddrKind::Parameter, *i)),
            IdentRef::LocalVar => {
                let slot = ctx.lookup_local(name).ok_or_else(|| {
                    self.bug(format!("local \"{}\" has no stack slot.", name), pos)
                })?;
                Ok(Address::new(AddrKind::Stack, slot))
            }
            IdentRef::MemberVar => {
                let ci = ctx
                    .class
                    .ok_or_else(|| self.bug("member access outside a class.", pos))?;
                match self.class_shells[ci].member_index_of(name) {
                    Ok(index) => Ok(Address::new(AddrKind::MemberVar, index)),
                    // properties of a native base resolve by name at runtime
                    Err(_) => {
                        let interned = self.intern_name(name);
                        let dst = ctx.temp_addr();
                        ctx.emit(
                            Op::Get {
                                on: Address::new(AddrKind::This, 0),
                                name: interned,
                                dst,
                            },
                            pos,
                        );
                        Ok(dst)
                    }
                }
            }
            IdentRef::StaticMember => {
                let interned = self.intern_name(name);
                Ok(Address::new(AddrKind::StaticMember, interned))
            }
            IdentRef::ScriptClass(ci) => Ok(self.class_const_addr(*ci)),
            IdentRef::NativeClass(native) => {
                let interned = self.intern_name(native);
                Ok(Address::new(AddrKind::NativeClass, interned))
            }
            IdentRef::EnumName {
                class_index,
                enum_index,
            } => Ok(self.enum_const_addr(*class_index, *enum_index)),
            IdentRef::ImportedFile(alias) => {
                let interned = self.intern_name(alias);
                Ok(Address::new(AddrKind::Extern, interned))
            }
            IdentRef::ScriptFunction | IdentRef::MemberFunction => Err(Error::new(
                ErrorKind::NotImplemented,
                format!("function \"{}\" cannot be used as a value.", name),
            )),
            IdentRef::Unknown => Err(self.bug(
                format!("identifier \"{}\" was not resolved.", name),
                pos,
            )),
        }
    }

    fn gen_operator(
        &mut self,
        ctx: &mut FnCtx,
        op: OpType,
        args: &[Expr],
        pos: Pos,
    ) -> Result<Address> {
        if op.is_assignment() {
            return self.gen_assignment(ctx, op, &args[0], &args[1], pos);
        }

        // short-circuit forms
        if op == OpType::And || op == OpType::Or {
            let dst = ctx.temp_addr();
            let (pre, jump, post): (fn(Address) -> Op, bool, fn(Address) -> Op) = if op == OpType::And
            {
                (|d| Op::SetFalse { dst: d }, false, |d| Op::SetTrue { dst: d })
            } else {
                (|d| Op::SetTrue { dst: d }, true, |d| Op::SetFalse { dst: d })
            };
            ctx.emit(pre(dst), pos);
            let mut jumps = Vec::new();
            for arg in args {
                let mark = ctx.next_slot;
                let addr = self.gen_expr(ctx, arg)?;
                let j = if jump {
                    ctx.emit_jump(Op::JumpIf { cond: addr, to: u32::MAX }, arg.pos)
                } else {
                    ctx.emit_jump(Op::JumpIfNot { cond: addr, to: u32::MAX }, arg.pos)
                };
                jumps.push(j);
                ctx.next_slot = mark;
            }
            ctx.emit(post(dst), pos);
            let end = ctx.here();
            for j in jumps {
                ctx.patch_jump(j, end);
            }
            return Ok(dst);
        }

        if op.is_unary() {
            let lhs = self.gen_expr(ctx, &args[0])?;
            let dst = ctx.temp_addr();
            ctx.emit(
                Op::Operator {
                    op: runtime_op(op),
                    lhs,
                    rhs: Address::NULL,
                    dst,
                },
                pos,
            );
            return Ok(dst);
        }

        let lhs = self.gen_expr(ctx, &args[0])?;
        let rhs = self.gen_expr(ctx, &args[1])?;
        let dst = ctx.temp_addr();
        ctx.emit(
            Op::Operator {
                op: runtime_op(op),
                lhs,
                rhs,
                dst,
            },
            pos,
        );
        Ok(dst)
    }

    /// Assignments lower to `Assign`, `Set` or `SetMapped` depending on the
    /// left-hand side shape; compound forms apply the operator first.
    fn gen_assignment(
        &mut self,
        ctx: &mut FnCtx,
        op: OpType,
        lhs: &Expr,
        rhs: &Expr,
        pos: Pos,
    ) -> Result<Address> {
        let compound = op.compound_base();

        match &lhs.kind {
            ExprKind::Identifier { name, resolved } => {
                // native-base properties have no index; store through `Set`
                let direct = match resolved {
                    IdentRef::MemberVar => {
                        let ci = ctx
                            .class
                            .ok_or_else(|| self.bug("member access outside a class.", pos))?;
                        self.class_shells[ci].member_index_of(name).is_ok()
                    }
                    _ => true,
                };
                if direct {
                    let dst = self.gen_identifier(ctx, name, resolved, lhs.pos)?;
                    match compound {
                        None => {
                            let value = self.gen_expr(ctx, rhs)?;
                            ctx.emit(Op::Assign { dst, src: value }, pos);
                        }
                        Some(base_op) => {
                            let value = self.gen_expr(ctx, rhs)?;
                            ctx.emit(
                                Op::Operator {
                                    op: runtime_op(base_op),
                                    lhs: dst,
                                    rhs: value,
                                    dst,
                                },
                                pos,
                            );
                        }
                    }
                    Ok(dst)
                } else {
                    let interned = self.intern_name(name);
                    let this = Address::new(AddrKind::This, 0);
                    let value = self.compound_value(ctx, compound, rhs, pos, |cg, ctx| {
                        let dst = ctx.temp_addr();
                        let name = cg.intern_name(name);
                        ctx.emit(Op::Get { on: this, name, dst }, pos);
                        Ok(dst)
                    })?;
                    ctx.emit(
                        Op::Set {
                            on: this,
                            name: interned,
                            value,
                        },
                        pos,
                    );
                    Ok(value)
                }
            }
            ExprKind::Index {
                base,
                member,
                member_pos,
            } => {
                let on = self.gen_expr(ctx, base)?;
                let interned = self.intern_name(member);
                let value = self.compound_value(ctx, compound, rhs, pos, |_cg, ctx| {
                    let dst = ctx.temp_addr();
                    ctx.emit(
                        Op::Get {
                            on,
                            name: interned,
                            dst,
                        },
                        *member_pos,
                    );
                    Ok(dst)
                })?;
                ctx.emit(
                    Op::Set {
                        on,
                        name: interned,
                        value,
                    },
                    pos,
                );
                Ok(value)
            }
            ExprKind::MappedIndex { base, key } => {
                let on = self.gen_expr(ctx, base)?;
                let key = self.gen_expr(ctx, key)?;
                let value = self.compound_value(ctx, compound, rhs, pos, |_cg, ctx| {
                    let dst = ctx.temp_addr();
                    ctx.emit(Op::GetMapped { on, key, dst }, pos);
                    Ok(dst)
                })?;
                ctx.emit(Op::SetMapped { on, key, value }, pos);
                Ok(value)
            }
            _ => Err(self.bug("invalid assignment target survived analysis.", lhs.pos)),
        }
    }

    /// Value to store: the plain right-hand side, or `current <op> rhs` for
    /// compound assignments (`current` produced by `load`).
    fn compound_value(
        &mut self,
        ctx: &mut FnCtx,
        compound: Option<OpType>,
        rhs: &Expr,
        pos: Pos,
        load: impl FnOnce(&mut Self, &mut FnCtx) -> Result<Address>,
    ) -> Result<Address> {
        match compound {
            None => self.gen_expr(ctx, rhs),
            Some(base_op) => {
                let current = load(self, ctx)?;
                let value = self.gen_expr(ctx, rhs)?;
                let dst = ctx.temp_addr();
                ctx.emit(
                    Op::Operator {
                        op: runtime_op(base_op),
                        lhs: current,
                        rhs: value,
                        dst,
                    },
                    pos,
                );
                Ok(dst)
            }
        }
    }

    fn gen_call(&mut self, ctx: &mut FnCtx, expr: &Expr) -> Result<Address> {
        let (base, method, args) = match &expr.kind {
            ExprKind::Call {
                base, method, args, ..
            } => (base, method, args),
            _ => unreachable!("caller matched a call"),
        };
        let pos = expr.pos;

        let mut arg_addrs = Vec::with_capacity(args.len());
        for arg in args {
            arg_addrs.push(self.gen_expr(ctx, arg)?);
        }

        match (base.as_deref(), method.as_deref()) {
            (Some(b), None) if matches!(b.kind, ExprKind::BuiltinFunc(_)) => {
                let func = match b.kind {
                    ExprKind::BuiltinFunc(f) => f,
                    _ => unreachable!("just matched"),
                };
                let dst = ctx.temp_addr();
                ctx.emit(
                    Op::CallBuiltin {
                        func,
                        args: arg_addrs,
                        dst,
                    },
                    pos,
                );
                Ok(dst)
            }
            (Some(b), None) if matches!(b.kind, ExprKind::BuiltinType(_)) => {
                let ty = match b.kind {
                    ExprKind::BuiltinType(t) => t,
                    _ => unreachable!("just matched"),
                };
                let dst = ctx.temp_addr();
                ctx.emit(
                    Op::ConstructBuiltin {
                        ty,
                        args: arg_addrs,
                        dst,
                    },
                    pos,
                );
                Ok(dst)
            }
            (Some(b), None) if matches!(b.kind, ExprKind::This) => {
                // constructor delegation: call our own constructor by name
                let ci = ctx
                    .class
                    .ok_or_else(|| self.bug("\"this(...)\" outside a class.", pos))?;
                let ctor_name = self.file.classes[ci].name.clone();
                let name = self.intern_name(&ctor_name);
                let dst = ctx.temp_addr();
                ctx.emit(
                    Op::CallFunc {
                        name,
                        args: arg_addrs,
                        dst,
                    },
                    pos,
                );
                Ok(dst)
            }
            (Some(b), None) if matches!(b.kind, ExprKind::Super) => {
                ctx.emit(Op::CallSuperCtor { args: arg_addrs }, pos);
                Ok(Address::NULL)
            }
            (Some(b), Some(m)) if matches!(b.kind, ExprKind::Super) => {
                let name = self.intern_name(&ident_name(m));
                let dst = ctx.temp_addr();
                ctx.emit(
                    Op::CallSuperMethod {
                        name,
                        args: arg_addrs,
                        dst,
                    },
                    pos,
                );
                Ok(dst)
            }
            (None, Some(m)) => {
                let name_str = ident_name(m);
                let resolved = match &m.kind {
                    ExprKind::Identifier { resolved, .. } => resolved.clone(),
                    _ => IdentRef::Unknown,
                };
                let dst = ctx.temp_addr();
                match resolved {
                    IdentRef::ScriptClass(_) => {
                        let name = self.intern_name(&name_str);
                        ctx.emit(
                            Op::ConstructCarbon {
                                name,
                                args: arg_addrs,
                                dst,
                            },
                            pos,
                        );
                    }
                    IdentRef::NativeClass(native) => {
                        let name = self.intern_name(&native);
                        ctx.emit(
                            Op::ConstructNative {
                                name,
                                args: arg_addrs,
                                dst,
                            },
                            pos,
                        );
                    }
                    IdentRef::ScriptFunction | IdentRef::MemberFunction => {
                        let name = self.intern_name(&name_str);
                        ctx.emit(
                            Op::CallFunc {
                                name,
                                args: arg_addrs,
                                dst,
                            },
                            pos,
                        );
                    }
                    other => {
                        return Err(self.bug(
                            format!("unexpected callee resolution {:?}.", other),
                            pos,
                        ));
                    }
                }
                Ok(dst)
            }
            (Some(b), Some(m)) => {
                let on = self.gen_expr(ctx, b)?;
                let name = self.intern_name(&ident_name(m));
                let dst = ctx.temp_addr();
                ctx.emit(
                    Op::CallMethod {
                        on,
                        name,
                        args: arg_addrs,
                        dst,
                    },
                    pos,
                );
                Ok(dst)
            }
            (Some(b), None) => {
                let on = self.gen_expr(ctx, b)?;
                let dst = ctx.temp_addr();
                ctx.emit(
                    Op::Call {
                        on,
                        args: arg_addrs,
                        dst,
                    },
                    pos,
                );
                Ok(dst)
            }
            (None, None) => Err(self.bug("call without a callee.", pos)),
        }
    }

    fn bug(&self, message: impl Into<String>, pos: Pos) -> Error {
        Error::new(ErrorKind::Bug, message).with_source_info(
            crate::diagnostic::SourceInfo::new(&self.file.path, &self.file.source, pos, 1),
        )
    }
}

// ---------------------------------------------------------------------------
// Per-function state
// ---------------------------------------------------------------------------

struct LoopCtx {
    is_switch: bool,
    break_jumps: Vec<usize>,
    continue_jumps: Vec<usize>,
}

impl LoopCtx {
    fn new(is_switch: bool) -> Self {
        Self {
            is_switch,
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
        }
    }

    fn patch(self, ctx: &mut FnCtx, continue_to: u32, break_to: u32) {
        for j in self.break_jumps {
            ctx.patch_jump(j, break_to);
        }
        for j in self.continue_jumps {
            ctx.patch_jump(j, continue_to);
        }
    }
}

struct FnCtx {
    class: Option<usize>,
    opcodes: Vec<Op>,
    positions: Vec<Pos>,
    scopes: Vec<(HashMap<String, u32>, u32)>,
    next_slot: u32,
    max_slot: u32,
    loops: Vec<LoopCtx>,
}

impl FnCtx {
    fn new(_func: &FunctionNode, class: Option<usize>) -> Self {
        Self {
            class,
            opcodes: Vec::new(),
            positions: Vec::new(),
            scopes: vec![(HashMap::new(), 0)],
            next_slot: 0,
            max_slot: 0,
            loops: Vec::new(),
        }
    }

    fn emit(&mut self, op: Op, pos: Pos) {
        self.opcodes.push(op);
        self.positions.push(pos);
    }

    fn emit_jump(&mut self, op: Op, pos: Pos) -> usize {
        let at = self.opcodes.len();
        self.emit(op, pos);
        at
    }

    fn patch_jump(&mut self, at: usize, target: u32) {
        match &mut self.opcodes[at] {
            Op::Jump { to }
            | Op::JumpIf { to, .. }
            | Op::JumpIfNot { to, .. }
            | Op::IterNext { end: to, .. } => *to = target,
            other => panic!("patch_jump on non-jump opcode {:?}", other),
        }
    }

    fn here(&self) -> u32 {
        self.opcodes.len() as u32
    }

    fn push_scope(&mut self) {
        self.scopes.push((HashMap::new(), self.next_slot));
    }

    fn pop_scope(&mut self) {
        let (_, base) = self.scopes.pop().expect("scope stack never empty");
        self.next_slot = base;
    }

    fn declare_local(&mut self, name: &str) -> u32 {
        let slot = self.alloc_temp();
        self.register_local(name, slot);
        slot
    }

    fn register_local(&mut self, name: &str, slot: u32) {
        self.scopes
            .last_mut()
            .expect("scope stack never empty")
            .0
            .insert(name.to_string(), slot);
    }

    fn lookup_local(&self, name: &str) -> Option<u32> {
        for (scope, _) in self.scopes.iter().rev() {
            if let Some(&slot) = scope.get(name) {
                return Some(slot);
            }
        }
        None
    }

    fn alloc_temp(&mut self) -> u32 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.max_slot = self.max_slot.max(self.next_slot);
        slot
    }

    fn temp_addr(&mut self) -> Address {
        Address::new(AddrKind::Stack, self.alloc_temp())
    }

    fn finish(self, func: &FunctionNode) -> CarbonFunction {
        CarbonFunction {
            name: func.name.clone(),
            is_static: func.is_static,
            arg_count: func.params.len() as u32,
            default_values: func.default_values.clone(),
            opcodes: self.opcodes,
            op_positions: self.positions,
            stack_size: self.max_slot,
            arg_names: func.params.iter().map(|p| p.name.clone()).collect(),
        }
    }
}

fn runtime_op(op: OpType) -> VarOp {
    match op {
        OpType::Plus => VarOp::Add,
        OpType::Minus => VarOp::Sub,
        OpType::Mul => VarOp::Mul,
        OpType::Div => VarOp::Div,
        OpType::Mod => VarOp::Mod,
        OpType::EqEq => VarOp::EqEq,
        OpType::NotEq => VarOp::NotEq,
        OpType::Lt => VarOp::Lt,
        OpType::LtEq => VarOp::LtEq,
        OpType::Gt => VarOp::Gt,
        OpType::GtEq => VarOp::GtEq,
        OpType::And => VarOp::And,
        OpType::Or => VarOp::Or,
        OpType::Not => VarOp::Not,
        OpType::BitNot => VarOp::BitNot,
        OpType::BitLshift => VarOp::BitLshift,
        OpType::BitRshift => VarOp::BitRshift,
        OpType::BitAnd => VarOp::BitAnd,
        OpType::BitOr => VarOp::BitOr,
        OpType::BitXor => VarOp::BitXor,
        OpType::Negative => VarOp::Neg,
        OpType::Positive => VarOp::Pos,
        _ => unreachable!("assignments never reach the runtime operator table"),
    }
}

fn is_super_ctor_call(stmt: &Statement) -> bool {
    matches!(
        stmt,
        Statement::Expr(Expr {
            kind: ExprKind::Call {
                base: Some(b),
                method: None,
                ..
            },
            ..
        }) if matches!(b.kind, ExprKind::Super)
    )
}

fn ident_name(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Identifier { name, .. } => name.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer;
    use crate::parser;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> Rc<Bytecode> {
        let mut file = parser::parse(source, "test.cb").unwrap();
        let registry = NativeClasses::new();
        let modules = HashMap::new();
        analyzer::analyze(&mut file, &registry, &modules).unwrap();
        generate(&file, &registry).unwrap()
    }

    #[test]
    fn member_indices_follow_declaration_order() {
        let module = compile("class P { var a; var b; static var s; var c; }");
        let class = module.get_class("P").unwrap();
        assert_eq!(class.member_index_of("a").unwrap(), 0);
        assert_eq!(class.member_index_of("b").unwrap(), 1);
        assert_eq!(class.member_index_of("c").unwrap(), 2);
        assert!(class.member_index_of("s").is_err());
        assert_eq!(class.member_count, 3);
    }

    #[test]
    fn inherited_members_come_first() {
        let module = compile("class A { var a; var b; } class B : A { var c; }");
        let derived = module.get_class("B").unwrap();
        assert_eq!(derived.member_index_of("a").unwrap(), 0);
        assert_eq!(derived.member_index_of("b").unwrap(), 1);
        assert_eq!(derived.member_index_of("c").unwrap(), 2);
        assert_eq!(derived.member_count, 3);
    }

    #[test]
    fn two_compiles_produce_identical_layouts() {
        let src = "class P { var x; var y; var z; }";
        let first = compile(src);
        let second = compile(src);
        let a = first.get_class("P").unwrap();
        let b = second.get_class("P").unwrap();
        for name in ["x", "y", "z"] {
            assert_eq!(a.member_index_of(name).unwrap(), b.member_index_of(name).unwrap());
        }
    }

    #[test]
    fn logical_ops_lower_to_short_circuit_jumps() {
        let module = compile("func f(a, b) { return a && b; }");
        let func = module.get_function("f").unwrap();
        let has_set_false = func.opcodes.iter().any(|op| matches!(op, Op::SetFalse { .. }));
        let has_jump_if_not = func
            .opcodes
            .iter()
            .any(|op| matches!(op, Op::JumpIfNot { .. }));
        let has_binary_and = func.opcodes.iter().any(
            |op| matches!(op, Op::Operator { op: VarOp::And, .. }),
        );
        assert!(has_set_false);
        assert!(has_jump_if_not);
        assert!(!has_binary_and);
    }

    #[test]
    fn all_jump_targets_are_patched() {
        let src = "func f(n) {\n\
                     var total = 0;\n\
                     for (var i = 0; i < n; i += 1) {\n\
                       if (i == 2) continue;\n\
                       if (i > 5) break;\n\
                       total += i;\n\
                     }\n\
                     switch (n) { case 1: break; default: total += 1; }\n\
                     while (total > 100) { total -= 1; }\n\
                     return total;\n\
                   }";
        let module = compile(src);
        let func = module.get_function("f").unwrap();
        let len = func.opcodes.len() as u32;
        for op in &func.opcodes {
            let target = match op {
                Op::Jump { to }
                | Op::JumpIf { to, .. }
                | Op::JumpIfNot { to, .. }
                | Op::IterNext { end: to, .. } => *to,
                _ => continue,
            };
            assert!(target <= len, "unpatched or wild jump target {}", target);
        }
    }

    #[test]
    fn stack_size_covers_locals() {
        let module = compile("func f() { var a = 1; var b = 2; var c = 3; return a + b + c; }");
        let func = module.get_function("f").unwrap();
        assert!(func.stack_size >= 3);
        assert_eq!(func.arg_count, 0);
    }

    #[test]
    fn default_values_are_recorded() {
        let module = compile("func f(a, b = 2, c = 3) { return a; }");
        let func = module.get_function("f").unwrap();
        assert_eq!(func.arg_count, 3);
        assert_eq!(func.default_values, vec![Var::Int(2), Var::Int(3)]);
        assert_eq!(func.required_argc(), 1);
        assert_eq!(func.arg_names, vec!["a", "b", "c"]);
    }

    #[test]
    fn module_initializer_is_synthesized() {
        let module = compile("var x = 1; print(x);");
        let init = module.get_function(MODULE_INIT).unwrap();
        assert!(init.opcodes.len() > 1);
        assert!(matches!(init.opcodes.last(), Some(Op::End)));
    }

    #[test]
    fn classes_get_a_constructor_even_without_one() {
        let module = compile("class A { var x = 1; } class B : A { }");
        assert!(module.get_class("A").unwrap().constructor().is_some());
        let b_ctor = module.get_class("B").unwrap().constructor().unwrap();
        // derived default ctor calls the base ctor first
        assert!(matches!(b_ctor.opcodes.first(), Some(Op::CallSuperCtor { .. })));
    }

    #[test]
    fn functions_end_with_implicit_return() {
        let module = compile("func f() { }");
        let func = module.get_function("f").unwrap();
        assert_eq!(func.opcodes, vec![Op::End]);
    }
}
