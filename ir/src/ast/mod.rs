//! The C intermediate representation.
//!
//! One mutually recursive datatype family describes a translation unit:
//! types, expressions, lvalues, initializers, instructions, statements,
//! globals and files. Composite descriptors ([CompInfo]), enum
//! descriptors ([EnumInfo]), typedefs ([TypeInfo]) and variables
//! ([VarInfo]) are canonical — one object per entity, referenced by
//! identity from every use site — so they live behind [Shared] handles
//! that compare by address.
//!
//! Construction helpers and the derived accessors (`type_of`,
//! predicates, integer builders) live in [support]; the attribute
//! subsystem lives in [attrs].

pub mod attrs;
pub mod support;

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

pub use attrs::{AttrArg, AttrClass, AttrList, Attribute};

/// A shared, interior-mutable handle to a canonical IR entity.
///
/// Equality is identity: two handles are equal when they point at the
/// same object. This is the sharing model of the whole IR — a `TComp`
/// type and the `GCompTag` global that defines it hold handles to one
/// [CompInfo], and mutations through either are seen by both.
pub struct Shared<T>(Rc<RefCell<T>>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Shared<T> {
        Shared(Rc::new(RefCell::new(value)))
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(a: &Shared<T>, b: &Shared<T>) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    pub fn downgrade(&self) -> WeakShared<T> {
        WeakShared(Rc::downgrade(&self.0))
    }

    /// Address of the shared cell, usable as a map key.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Shared<T> {
        Shared(self.0.clone())
    }
}

impl<T> PartialEq for Shared<T> {
    fn eq(&self, other: &Shared<T>) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for Shared<T> {}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(v) => write!(f, "Shared({:?})", &*v),
            Err(_) => write!(f, "Shared(<borrowed>)"),
        }
    }
}

/// A non-owning counterpart of [Shared], used for every cross-link that
/// would otherwise close an ownership cycle: goto targets, switch case
/// lists, successor/predecessor edges, and the field-to-composite
/// back-reference.
pub struct WeakShared<T>(Weak<RefCell<T>>);

impl<T> WeakShared<T> {
    /// A dangling weak handle.
    pub fn empty() -> WeakShared<T> {
        WeakShared(Weak::new())
    }

    pub fn upgrade(&self) -> Option<Shared<T>> {
        self.0.upgrade().map(Shared)
    }

    pub fn ptr_eq(a: &WeakShared<T>, b: &WeakShared<T>) -> bool {
        Weak::ptr_eq(&a.0, &b.0)
    }
}

impl<T> Clone for WeakShared<T> {
    fn clone(&self) -> WeakShared<T> {
        WeakShared(self.0.clone())
    }
}

impl<T> fmt::Debug for WeakShared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakShared(..)")
    }
}

pub type CompRef = Shared<CompInfo>;
pub type CompWeak = WeakShared<CompInfo>;
pub type EnumRef = Shared<EnumInfo>;
pub type TypeInfoRef = Shared<TypeInfo>;
pub type VarRef = Shared<VarInfo>;
pub type FieldRef = Shared<FieldInfo>;
pub type StmtRef = Shared<Stmt>;
pub type StmtWeak = WeakShared<Stmt>;

/// A source position: file name and one-based line. Line `-1` marks an
/// unknown location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: i32,
}

impl Location {
    pub fn none() -> Location {
        Location {
            file: String::new(),
            line: -1,
        }
    }

    pub fn is_none(&self) -> bool {
        self.line < 0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Integer kinds, one per distinct C integer type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IKind {
    IChar,
    ISChar,
    IUChar,
    IInt,
    IUInt,
    IShort,
    IUShort,
    ILong,
    IULong,
    ILongLong,
    IULongLong,
}

/// Floating-point kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FKind {
    FFloat,
    FDouble,
    FLongDouble,
}

/// Storage class of a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Storage {
    NoStorage,
    Static,
    Register,
    Extern,
}

/// C types. Every constructor carries its attribute list (kept sorted
/// by name, see [attrs]).
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Void(AttrList),
    Int(IKind, AttrList),
    Float(FKind, AttrList),
    Ptr(Box<Type>, AttrList),
    /// Array of a base type with an optional length expression.
    Array(Box<Type>, Option<Box<Expr>>, AttrList),
    /// Function type: return type, optional parameter list (`None`
    /// means no prototype), variadic flag.
    Fun(Box<Type>, Option<Vec<Param>>, bool, AttrList),
    /// Reference to a typedef. The [TypeInfo] is shared with the
    /// `GType` global that defines it.
    Named(TypeInfoRef, AttrList),
    /// Reference to a struct or union, shared with its `GCompTag`.
    Comp(CompRef, AttrList),
    /// Reference to an enum, shared with its `GEnumTag`.
    Enum(EnumRef, AttrList),
    /// The builtin `va_list` handle.
    VaList(AttrList),
}

/// A parameter in a function type. Kept in sync with the owning
/// function's formals by `set_formals` / `set_function_type`.
#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub attrs: AttrList,
}

/// A typedef: name plus underlying type. Shared by identity between its
/// defining `GType` and every `TNamed` reference.
#[derive(Debug)]
pub struct TypeInfo {
    pub name: String,
    pub ty: Type,
    pub referenced: bool,
}

/// A struct or union descriptor. Canonical per tag.
#[derive(Debug)]
pub struct CompInfo {
    pub is_struct: bool,
    pub name: String,
    /// Hash of `"struct <name>"` or `"union <name>"`; recomputed when
    /// the name changes.
    pub key: i32,
    pub fields: Vec<FieldRef>,
    pub attrs: AttrList,
    pub referenced: bool,
}

impl CompInfo {
    /// Renames the composite, keeping the key in sync.
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.key = support::comp_key(self.is_struct, name);
    }
}

/// Placeholder name of unnamed bitfield members.
pub const MISSING_FIELD_NAME: &str = "___missing_field_name";

/// One member of a composite type.
#[derive(Debug)]
pub struct FieldInfo {
    /// The owning composite. Weak: the composite owns its fields.
    pub comp: CompWeak,
    /// Field name; [MISSING_FIELD_NAME] for unnamed bitfields.
    pub name: String,
    pub ty: Type,
    /// Bit width when this member is a bitfield.
    pub bitfield: Option<u32>,
    pub attrs: AttrList,
}

/// An enum descriptor. Canonical per tag.
#[derive(Debug)]
pub struct EnumInfo {
    pub name: String,
    /// Ordered `(label, value)` pairs; the value expressions must be
    /// compile-time constants.
    pub items: Vec<(String, Expr)>,
    pub attrs: AttrList,
    pub referenced: bool,
}

/// A variable descriptor. Canonical per variable: a prototype and the
/// matching definition share one [VarInfo].
#[derive(Debug)]
pub struct VarInfo {
    pub name: String,
    pub ty: Type,
    pub attrs: AttrList,
    pub storage: Storage,
    /// True for file-scope variables and functions.
    pub glob: bool,
    pub decl: Location,
    /// Unique id: a hash of the name for globals, assigned by the
    /// enclosing function for locals (formals numbered from 0).
    pub vid: i32,
    /// Set once the variable's address is taken.
    pub addrof: bool,
    pub referenced: bool,
}

/// Side-effect-free expressions.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Const(Constant),
    /// Read of an lvalue.
    Lval(Lval),
    SizeOf(Type),
    SizeOfE(Box<Expr>),
    AlignOf(Type),
    AlignOfE(Box<Expr>),
    /// Unary operation with its result type.
    UnOp(UnOp, Box<Expr>, Type),
    /// Binary operation with its result type.
    BinOp(BinOp, Box<Expr>, Box<Expr>, Type),
    CastE(Type, Box<Expr>),
    AddrOf(Lval),
    /// Explicit array-to-pointer decay. Never printed; `&a[0]` in
    /// disguise.
    StartOf(Lval),
}

/// Constants.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    /// 64-bit integer tagged with its kind and the original source
    /// text when one is known.
    Int64(i64, IKind, Option<String>),
    Str(String),
    Chr(u8),
    Real(f64, FKind, Option<String>),
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    BNot,
    LNot,
}

/// Binary operators. The arithmetic/pointer distinction is semantic:
/// the folder and the layout-aware passes treat `PlusA` and `PlusPI`
/// differently even though both print as `+`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    PlusA,
    /// pointer + integer
    PlusPI,
    /// pointer + integer used as an array index
    IndexPI,
    MinusA,
    /// pointer - integer
    MinusPI,
    /// pointer - pointer
    MinusPP,
    Mult,
    Div,
    Mod,
    Shiftlt,
    Shiftrt,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    /// pointer comparisons
    LtP,
    GtP,
    LeP,
    GeP,
    EqP,
    NeP,
    BAnd,
    BXor,
    BOr,
}

/// An lvalue: a host plus an offset chain into it.
pub type Lval = (LHost, Offset);

/// The base of an lvalue.
#[derive(Clone, Debug, PartialEq)]
pub enum LHost {
    /// A named variable, by identity.
    Var(VarRef),
    /// A memory access through a pointer expression.
    Mem(Box<Expr>),
}

/// An offset chain. `x.f[3].g` is
/// `Field(f, Index(3, Field(g, NoOffset)))`.
#[derive(Clone, Debug, PartialEq)]
pub enum Offset {
    NoOffset,
    Field(FieldRef, Box<Offset>),
    Index(Box<Expr>, Box<Offset>),
}

/// Initializers for variable definitions.
#[derive(Clone, Debug, PartialEq)]
pub enum Init {
    Single(Expr),
    /// Compound initializer for the given aggregate type. Each entry
    /// carries a single-step designator (`Field` or `Index` terminated
    /// by `NoOffset`).
    Compound(Type, Vec<(Offset, Init)>),
}

/// Effectful, control-flow-free operations.
#[derive(Clone, Debug, PartialEq)]
pub enum Instr {
    /// `lval = expr;`
    Set(Lval, Expr, Location),
    /// `dest = callee(args);` with an optional destination.
    Call(Option<Lval>, Expr, Vec<Expr>, Location),
    Asm(AsmDetails),
}

/// Inline assembly: constraint syntax follows the GCC extended form.
#[derive(Clone, Debug, PartialEq)]
pub struct AsmDetails {
    pub attrs: AttrList,
    pub templates: Vec<String>,
    pub outputs: Vec<(String, Lval)>,
    pub inputs: Vec<(String, Expr)>,
    pub clobbers: Vec<String>,
    pub loc: Location,
}

/// A statement node. Statements are [Shared] so that gotos, switch case
/// lists and control-flow edges can name them by identity; blocks own
/// their statements through strong handles and every cross-link is
/// weak.
#[derive(Debug)]
pub struct Stmt {
    pub labels: Vec<Label>,
    pub kind: StmtKind,
    /// Unique id within the enclosing function, assigned by
    /// `compute_cfg_info`; -1 until then.
    pub sid: i32,
    pub succs: Vec<StmtWeak>,
    pub preds: Vec<StmtWeak>,
}

/// Statement kinds.
#[derive(Debug)]
pub enum StmtKind {
    Instr(Vec<Instr>),
    Return(Option<Expr>, Location),
    /// The target is dereferenced only after `compute_cfg_info` has
    /// run.
    Goto(StmtWeak, Location),
    Break(Location),
    Continue(Location),
    If(Expr, Block, Block, Location),
    /// Condition, body, and the case statements inside the body.
    Switch(Expr, Block, Vec<StmtWeak>, Location),
    /// `while (1)`; exits only via break or goto.
    Loop(Block, Location),
    Block(Block),
}

/// Statement labels.
#[derive(Clone, Debug)]
pub enum Label {
    /// A named label; `user` is true when it comes from the source
    /// program rather than a transformation.
    Name(String, Location, bool),
    Case(Expr, Location),
    Default(Location),
}

impl Label {
    pub fn is_name(&self) -> bool {
        matches!(self, Label::Name(..))
    }
}

/// An attributed sequence of statements.
#[derive(Debug, Default)]
pub struct Block {
    pub attrs: AttrList,
    pub stmts: Vec<StmtRef>,
}

/// A function definition.
#[derive(Debug)]
pub struct FunDec {
    /// The declaring variable, shared with any prototype of the same
    /// function.
    pub decl: VarRef,
    /// Formal parameters, kept in sync with the parameter list inside
    /// `decl`'s function type by `set_formals` / `set_function_type`.
    pub formals: Vec<VarRef>,
    pub locals: Vec<VarRef>,
    /// Largest local id handed out so far; -1 in a fresh function.
    pub max_local_id: i32,
    pub body: Block,
    pub inline: bool,
    /// One past the largest statement id, set by `compute_cfg_info`.
    pub max_stmt_id: Option<i32>,
}

/// File-scope items, in file order.
#[derive(Debug)]
pub enum Global {
    /// A typedef definition.
    Type(TypeInfoRef, Location),
    /// A struct/union definition.
    CompTag(CompRef, Location),
    /// An enum definition.
    EnumTag(EnumRef, Location),
    /// A declaration (prototype or extern variable).
    VarDecl(VarRef, Location),
    /// A variable definition with an optional initializer.
    Var(VarRef, Option<Init>, Location),
    /// A function definition.
    Fun(Box<FunDec>, Location),
    /// Top-level inline assembly.
    Asm(String, Location),
    /// An attribute-shaped `#pragma`.
    Pragma(Attribute, Location),
    /// Verbatim text, emitted unchanged.
    Text(String),
}

impl Global {
    /// The source location; verbatim text has none.
    pub fn loc(&self) -> Option<&Location> {
        match self {
            Global::Type(_, l)
            | Global::CompTag(_, l)
            | Global::EnumTag(_, l)
            | Global::VarDecl(_, l)
            | Global::Var(_, _, l)
            | Global::Fun(_, l)
            | Global::Asm(_, l)
            | Global::Pragma(_, l) => Some(l),
            Global::Text(_) => None,
        }
    }
}

/// A translation unit.
#[derive(Debug)]
pub struct CFile {
    pub name: String,
    pub globals: Vec<Global>,
    /// Collected initializer function for globals whose initializers
    /// had to be turned into code.
    pub globinit: Option<Box<FunDec>>,
    /// Whether a call to `globinit` has already been injected into
    /// `main`.
    pub globinit_called: bool,
}

impl CFile {
    pub fn new(name: &str) -> CFile {
        CFile {
            name: name.to_string(),
            globals: Vec::new(),
            globinit: None,
            globinit_called: false,
        }
    }
}
