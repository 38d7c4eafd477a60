//! Syntax tree produced by the parser and walked by the interpreter.
//!
//! Local variables are resolved at parse time into `(depth, index)` pairs
//! relative to the current environment chain.

use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub line: u32,
}

impl Node {
    pub fn new(kind: NodeKind, line: u32) -> Self {
        Self { kind, line }
    }
}

/// Resolved local variable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalRef {
    /// Number of environments to walk up.
    pub depth: u32,
    pub index: u32,
}

#[derive(Debug, Clone)]
pub enum StrPart {
    Lit(String),
    Code(Vec<Node>),
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Nil,
    True,
    False,
    SelfRef,
    Int(i64),
    Float(f64),
    Str(String),
    DStr(Vec<StrPart>),
    Sym(String),
    Array(Vec<Node>),
    Hash(Vec<(Node, Node)>),
    Range {
        lo: Box<Node>,
        hi: Box<Node>,
        exclusive: bool,
    },
    Splat(Box<Node>),
    LocalGet(LocalRef),
    LocalSet(LocalRef, Box<Node>),
    IvarGet(String),
    IvarSet(String, Box<Node>),
    GvarGet(String),
    GvarSet(String, Box<Node>),
    Const {
        scope: Option<Box<Node>>,
        top: bool,
        name: String,
    },
    ConstSet {
        scope: Option<Box<Node>>,
        name: String,
        value: Box<Node>,
    },
    Call(Box<Call>),
    Super {
        args: Option<Vec<Node>>,
        block: Option<BlockArg>,
    },
    Yield(Vec<Node>),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    If {
        cond: Box<Node>,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
    While {
        cond: Box<Node>,
        body: Vec<Node>,
        until: bool,
    },
    Case {
        subject: Option<Box<Node>>,
        whens: Vec<(Vec<Node>, Vec<Node>)>,
        else_body: Vec<Node>,
    },
    Begin(Box<BeginBlock>),
    Seq(Vec<Node>),
    Def {
        singleton: Option<Box<Node>>,
        def: Arc<MethodDef>,
    },
    ClassDef {
        scope: Option<Box<Node>>,
        name: String,
        superclass: Option<Box<Node>>,
        body: Arc<TopBody>,
    },
    ModuleDef {
        scope: Option<Box<Node>>,
        name: String,
        body: Arc<TopBody>,
    },
    SClassDef {
        target: Box<Node>,
        body: Arc<TopBody>,
    },
    Lambda(Arc<BlockDef>),
    Return(Option<Box<Node>>),
    Break(Option<Box<Node>>),
    Next(Option<Box<Node>>),
    OpAssign {
        target: Box<AssignTarget>,
        op: String,
        value: Box<Node>,
    },
    OrAssign {
        target: Box<AssignTarget>,
        value: Box<Node>,
    },
    AndAssign {
        target: Box<AssignTarget>,
        value: Box<Node>,
    },
    MultiAssign {
        targets: Vec<AssignTarget>,
        value: Box<Node>,
    },
}

#[derive(Debug, Clone)]
pub struct Call {
    pub recv: Option<Node>,
    pub name: String,
    pub args: Vec<Node>,
    pub block: Option<BlockArg>,
    /// `recv&.name`
    pub safe_nav: bool,
}

#[derive(Debug, Clone)]
pub enum BlockArg {
    Literal(Arc<BlockDef>),
    /// `&expr`
    Pass(Box<Node>),
}

/// Left-hand side of compound assignment.
#[derive(Debug, Clone)]
pub enum AssignTarget {
    Local(LocalRef),
    Ivar(String),
    Gvar(String),
    Const(String),
    Index { recv: Node, args: Vec<Node> },
    Attr { recv: Node, name: String },
}

#[derive(Debug, Clone)]
pub struct RescueClause {
    pub classes: Vec<Node>,
    pub var: Option<LocalRef>,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct BeginBlock {
    pub body: Vec<Node>,
    pub rescues: Vec<RescueClause>,
    pub else_body: Option<Vec<Node>>,
    pub ensure: Option<Vec<Node>>,
}

#[derive(Debug, Clone, Default)]
pub struct Params {
    pub required: Vec<u32>,
    pub optional: Vec<(u32, Node)>,
    pub rest: Option<u32>,
    pub post: Vec<u32>,
    pub block: Option<u32>,
}

impl Params {
    pub fn required_count(&self) -> usize {
        self.required.len() + self.post.len()
    }

    pub fn positional_count(&self) -> usize {
        self.required.len() + self.optional.len() + self.post.len()
    }
}

#[derive(Debug)]
pub struct MethodDef {
    pub name: String,
    pub params: Params,
    pub body: Vec<Node>,
    pub nlocals: usize,
    pub file: Option<Arc<str>>,
    pub line: u32,
}

#[derive(Debug)]
pub struct BlockDef {
    pub params: Params,
    pub body: Vec<Node>,
    pub nlocals: usize,
    pub file: Option<Arc<str>>,
    pub line: u32,
}

/// A scope body with its own environment: a program, a class body or a
/// module body.
#[derive(Debug)]
pub struct TopBody {
    pub body: Vec<Node>,
    pub nlocals: usize,
    pub file: Option<Arc<str>>,
}
