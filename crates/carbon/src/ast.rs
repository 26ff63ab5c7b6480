//! The abstract syntax tree shared by the parser, analyzer and code
//! generator.
//!
//! Children are owned; every cross-reference (class base, enum link,
//! identifier resolution) is an index or a name, never a back-pointer.
//! Nodes that participate in compile-time reduction carry `is_reduced` /
//! `is_reducing` flags so definition cycles are caught instead of looping.

use std::rc::Rc;

use crate::builtins::{BuiltinFunc, BuiltinType};
use crate::bytecode::Bytecode;
use crate::diagnostic::Pos;
use crate::value::Var;

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Source-level operators, compound assignments included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Eq,
    EqEq,
    Plus,
    PlusEq,
    Minus,
    MinusEq,
    Mul,
    MulEq,
    Div,
    DivEq,
    Mod,
    ModEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Not,
    NotEq,
    BitNot,
    BitLshift,
    BitLshiftEq,
    BitRshift,
    BitRshiftEq,
    BitOr,
    BitOrEq,
    BitAnd,
    BitAndEq,
    BitXor,
    BitXorEq,
    Positive,
    Negative,
}

impl OpType {
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            OpType::Eq
                | OpType::PlusEq
                | OpType::MinusEq
                | OpType::MulEq
                | OpType::DivEq
                | OpType::ModEq
                | OpType::BitLshiftEq
                | OpType::BitRshiftEq
                | OpType::BitOrEq
                | OpType::BitAndEq
                | OpType::BitXorEq
        )
    }

    pub fn is_unary(&self) -> bool {
        matches!(
            self,
            OpType::Not | OpType::BitNot | OpType::Positive | OpType::Negative
        )
    }

    /// Precedence table; lower binds tighter. Assignments sit at the bottom
    /// and are additionally forbidden in nested expression positions.
    pub fn precedence(&self) -> i32 {
        match self {
            OpType::Not | OpType::BitNot | OpType::Positive | OpType::Negative => 0,
            OpType::Mul | OpType::Div | OpType::Mod => 1,
            OpType::Plus | OpType::Minus => 2,
            OpType::BitLshift | OpType::BitRshift => 3,
            OpType::Lt | OpType::LtEq | OpType::Gt | OpType::GtEq => 4,
            OpType::EqEq | OpType::NotEq => 5,
            OpType::BitAnd => 6,
            OpType::BitXor => 7,
            OpType::BitOr => 8,
            OpType::And => 9,
            OpType::Or => 10,
            OpType::Eq
            | OpType::PlusEq
            | OpType::MinusEq
            | OpType::MulEq
            | OpType::DivEq
            | OpType::ModEq
            | OpType::BitLshiftEq
            | OpType::BitRshiftEq
            | OpType::BitOrEq
            | OpType::BitAndEq
            | OpType::BitXorEq => 11,
        }
    }

    /// The plain operator a compound assignment applies (`+=` -> `+`).
    pub fn compound_base(&self) -> Option<OpType> {
        Some(match self {
            OpType::PlusEq => OpType::Plus,
            OpType::MinusEq => OpType::Minus,
            OpType::MulEq => OpType::Mul,
            OpType::DivEq => OpType::Div,
            OpType::ModEq => OpType::Mod,
            OpType::BitLshiftEq => OpType::BitLshift,
            OpType::BitRshiftEq => OpType::BitRshift,
            OpType::BitOrEq => OpType::BitOr,
            OpType::BitAndEq => OpType::BitAnd,
            OpType::BitXorEq => OpType::BitXor,
            _ => return None,
        })
    }

    pub fn lexeme(&self) -> &'static str {
        match self {
            OpType::Eq => "=",
            OpType::EqEq => "==",
            OpType::Plus => "+",
            OpType::PlusEq => "+=",
            OpType::Minus => "-",
            OpType::MinusEq => "-=",
            OpType::Mul => "*",
            OpType::MulEq => "*=",
            OpType::Div => "/",
            OpType::DivEq => "/=",
            OpType::Mod => "%",
            OpType::ModEq => "%=",
            OpType::Lt => "<",
            OpType::LtEq => "<=",
            OpType::Gt => ">",
            OpType::GtEq => ">=",
            OpType::And => "&&",
            OpType::Or => "||",
            OpType::Not => "!",
            OpType::NotEq => "!=",
            OpType::BitNot => "~",
            OpType::BitLshift => "<<",
            OpType::BitLshiftEq => "<<=",
            OpType::BitRshift => ">>",
            OpType::BitRshiftEq => ">>=",
            OpType::BitOr => "|",
            OpType::BitOrEq => "|=",
            OpType::BitAnd => "&",
            OpType::BitAndEq => "&=",
            OpType::BitXor => "^",
            OpType::BitXorEq => "^=",
            OpType::Positive => "+",
            OpType::Negative => "-",
        }
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// What an identifier resolved to during analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentRef {
    Unknown,
    Parameter(u32),
    LocalVar,
    /// Non-static member of the enclosing class (or an ancestor); index
    /// assignment happens at codegen.
    MemberVar,
    /// Static member of the enclosing class or a module-level var; resolved
    /// by name through the instance -> class -> file chain at runtime.
    StaticMember,
    ScriptClass(usize),
    NativeClass(String),
    /// Module-level function, called through `CallFunc`.
    ScriptFunction,
    /// Method of the enclosing class or an ancestor.
    MemberFunction,
    /// A named enum; `class_index` is `None` for module-level enums.
    EnumName {
        class_index: Option<usize>,
        enum_index: usize,
    },
    ImportedFile(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
}

impl Expr {
    pub fn new(kind: ExprKind, pos: Pos) -> Self {
        Self { kind, pos }
    }

    pub fn const_value(value: Var, pos: Pos) -> Self {
        Self::new(ExprKind::Const(value), pos)
    }

    /// Is this a compile-time known value already?
    pub fn as_const(&self) -> Option<&Var> {
        match &self.kind {
            ExprKind::Const(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_assignment(&self) -> bool {
        matches!(&self.kind, ExprKind::Operator { op, .. } if op.is_assignment())
    }
}

impl Default for Expr {
    fn default() -> Self {
        Expr::const_value(Var::Null, Pos::UNSET)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A compile-time known value: literals and everything folding produced.
    Const(Var),
    Identifier {
        name: String,
        resolved: IdentRef,
    },
    Array(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    This,
    Super,
    BuiltinType(BuiltinType),
    BuiltinFunc(BuiltinFunc),
    /// A call. The shapes after parsing:
    /// - `base: None, method: Some(ident)`: unresolved `foo(...)`
    /// - `base: Some(builtin fn/type), method: None`: `print(...)`, `int(...)`
    /// - `base: Some(expr), method: Some(ident)`: `expr.foo(...)`
    /// - `base: Some(expr), method: None`: `expr(...)`, `super(...)`, `this(...)`
    Call {
        base: Option<Box<Expr>>,
        method: Option<Box<Expr>>,
        args: Vec<Expr>,
        is_compile_time: bool,
    },
    /// `base.member` (attribute access, not a call).
    Index {
        base: Box<Expr>,
        member: String,
        member_pos: Pos,
    },
    /// `base[key]`.
    MappedIndex {
        base: Box<Expr>,
        key: Box<Expr>,
    },
    Operator {
        op: OpType,
        args: Vec<Expr>,
    },
}

// ---------------------------------------------------------------------------
// Statements and blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockNode {
    pub statements: Vec<Statement>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// `None` for the `default` case.
    pub value: Option<Expr>,
    /// The case value after constant reduction.
    pub folded: i64,
    pub body: BlockNode,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Var(VarNode),
    Const(ConstNode),
    Expr(Expr),
    If {
        cond: Expr,
        body: BlockNode,
        else_body: Option<BlockNode>,
        pos: Pos,
    },
    Switch {
        value: Expr,
        cases: Vec<SwitchCase>,
        pos: Pos,
    },
    While {
        cond: Expr,
        body: BlockNode,
        pos: Pos,
    },
    For {
        init: Option<Box<Statement>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: BlockNode,
        pos: Pos,
    },
    Foreach {
        var_name: String,
        var_pos: Pos,
        iterable: Expr,
        body: BlockNode,
        pos: Pos,
    },
    Break {
        pos: Pos,
    },
    Continue {
        pos: Pos,
    },
    Return {
        value: Option<Expr>,
        pos: Pos,
    },
    Block(BlockNode),
}

impl Statement {
    pub fn pos(&self) -> Pos {
        match self {
            Statement::Var(v) => v.pos,
            Statement::Const(c) => c.pos,
            Statement::Expr(e) => e.pos,
            Statement::If { pos, .. }
            | Statement::Switch { pos, .. }
            | Statement::While { pos, .. }
            | Statement::For { pos, .. }
            | Statement::Foreach { pos, .. }
            | Statement::Break { pos }
            | Statement::Continue { pos }
            | Statement::Return { pos, .. } => *pos,
            Statement::Block(b) => b.pos,
        }
    }

    /// Does control definitely leave the block after this statement?
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Statement::Return { .. } | Statement::Break { .. } | Statement::Continue { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct VarNode {
    pub name: String,
    pub pos: Pos,
    pub is_static: bool,
    pub assignment: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstNode {
    pub name: String,
    pub pos: Pos,
    pub assignment: Option<Expr>,
    /// Resolved scalar value, valid once `is_reduced`.
    pub value: Var,
    pub is_reduced: bool,
    pub is_reducing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumValueNode {
    pub name: String,
    pub pos: Pos,
    pub expr: Option<Expr>,
    pub value: i64,
    pub is_reduced: bool,
    pub is_reducing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumNode {
    /// `None` for the file/class-level unnamed enum.
    pub name: Option<String>,
    pub pos: Pos,
    /// Declaration order matters: missing values continue from the previous.
    pub values: Vec<EnumValueNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamNode {
    pub name: String,
    pub pos: Pos,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionNode {
    pub name: String,
    pub pos: Pos,
    pub is_static: bool,
    pub params: Vec<ParamNode>,
    /// Reduced default values for the trailing parameters.
    pub default_values: Vec<Var>,
    pub body: BlockNode,
    pub is_constructor: bool,
}

impl FunctionNode {
    /// Arguments the caller must pass at minimum.
    pub fn required_argc(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }
}

/// How a class's base was declared / resolved.
#[derive(Debug, Clone)]
pub enum Base {
    None,
    /// Parsed but not yet looked up.
    Unresolved { name: String, pos: Pos },
    /// Another class in the same file, by index.
    Local(usize),
    /// A class from an imported module.
    Extern(Rc<Bytecode>),
    /// A registered native class.
    Native(String),
}

impl Base {
    pub fn is_none(&self) -> bool {
        matches!(self, Base::None)
    }
}

#[derive(Debug, Clone)]
pub struct ClassNode {
    pub name: String,
    pub pos: Pos,
    pub base: Base,
    pub enums: Vec<EnumNode>,
    pub unnamed_enum: Option<EnumNode>,
    pub vars: Vec<VarNode>,
    pub constants: Vec<ConstNode>,
    pub functions: Vec<FunctionNode>,
    /// Index into `functions` of the constructor (named like the class).
    pub constructor: Option<usize>,
    /// Set when the constructor's first statement is `super(...)`.
    pub has_super_ctor_call: bool,
    pub is_reduced: bool,
    pub is_reducing: bool,
}

#[derive(Debug, Clone)]
pub struct ImportNode {
    /// The local alias: `import name = "path";`.
    pub name: String,
    pub path: String,
    pub pos: Pos,
    /// Filled from the module table during analysis.
    pub module: Option<Rc<Bytecode>>,
}

/// One step of the module initializer, in declaration order.
#[derive(Debug, Clone)]
pub enum InitItem {
    /// Run the initializer of `vars[index]`.
    VarInit(usize),
    /// Run the initializer of `classes[class].vars[var]` (a static).
    StaticInit { class: usize, var: usize },
    /// A stray top-level statement.
    Stmt(Statement),
}

#[derive(Debug, Clone, Default)]
pub struct FileNode {
    pub path: String,
    pub source: String,
    pub imports: Vec<ImportNode>,
    pub vars: Vec<VarNode>,
    pub constants: Vec<ConstNode>,
    pub enums: Vec<EnumNode>,
    pub unnamed_enum: Option<EnumNode>,
    pub functions: Vec<FunctionNode>,
    pub classes: Vec<ClassNode>,
    /// Ordered module initialization: var initializers, class static
    /// initializers and stray top-level statements.
    pub init_items: Vec<InitItem>,
}

impl FileNode {
    pub fn find_class(&self, name: &str) -> Option<usize> {
        self.classes.iter().position(|c| c.name == name)
    }

    pub fn find_function(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }
}

impl Default for ClassNode {
    fn default() -> Self {
        Self {
            name: String::new(),
            pos: Pos::UNSET,
            base: Base::None,
            enums: Vec::new(),
            unnamed_enum: None,
            vars: Vec::new(),
            constants: Vec::new(),
            functions: Vec::new(),
            constructor: None,
            has_super_ctor_call: false,
            is_reduced: false,
            is_reducing: false,
        }
    }
}
