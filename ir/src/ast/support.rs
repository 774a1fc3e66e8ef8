//! Construction helpers and derived accessors for the IR.
//!
//! The datatype definitions stayed in the parent module; everything
//! that builds, inspects or lightly normalizes IR values lives here:
//! variable and composite constructors, integer builders with their
//! truncation rules, lvalue and statement builders, and the type
//! utilities (`unroll_type`, `type_of`, predicates, kind sizes).

use tracing::warn;

use crate::ast::attrs::{self, AttrList, Attribute};
use crate::ast::*;
use crate::context::Context;

/// 32-bit FNV-1a, masked to 30 bits so ids stay positive and stable
/// across processes.
fn name_hash(s: &str) -> i32 {
    let mut h: u32 = 0x811c9dc5;
    for b in s.bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    (h & 0x3fff_ffff) as i32
}

/// Key of a composite tag; depends on the struct/union flavor and the
/// name.
pub fn comp_key(is_struct: bool, name: &str) -> i32 {
    let prefix = if is_struct { "struct " } else { "union " };
    name_hash(&format!("{prefix}{name}"))
}

/// Creates a canonical file-scope variable. The id is a hash of the
/// name, so a prototype and a definition constructed independently
/// still agree on it.
pub fn make_global_var(name: &str, ty: Type) -> VarRef {
    Shared::new(VarInfo {
        name: name.to_string(),
        ty,
        attrs: AttrList::new(),
        storage: Storage::NoStorage,
        glob: true,
        decl: Location::none(),
        vid: name_hash(name),
        addrof: false,
        referenced: false,
    })
}

impl FunDec {
    /// Creates a local variable with the next free id; appended to the
    /// locals list iff `insert`.
    pub fn make_local_var(&mut self, name: &str, ty: Type, insert: bool) -> VarRef {
        self.max_local_id += 1;
        let vi = Shared::new(VarInfo {
            name: name.to_string(),
            ty,
            attrs: AttrList::new(),
            storage: Storage::NoStorage,
            glob: false,
            decl: Location::none(),
            vid: self.max_local_id,
            addrof: false,
            referenced: false,
        });
        if insert {
            self.locals.push(vi.clone());
        }
        vi
    }

    /// Creates a temporary with a fresh `<base><id>` name. The default
    /// base is `tmp`.
    pub fn make_temp_var(&mut self, base: Option<&str>, ty: Type) -> VarRef {
        let name = format!("{}{}", base.unwrap_or("tmp"), self.max_local_id + 1);
        self.make_local_var(&name, ty, true)
    }

    /// Creates a formal parameter. `where_` is `"^"` to prepend, `"$"`
    /// to append, or the name of an existing formal to insert after.
    pub fn make_formal_var(&mut self, where_: &str, name: &str, ty: Type) -> VarRef {
        let vi = self.make_local_var(name, ty, false);
        let pos = match where_ {
            "^" => 0,
            "$" => self.formals.len(),
            other => {
                let at = self
                    .formals
                    .iter()
                    .position(|f| f.borrow().name == other)
                    .unwrap_or_else(|| {
                        panic!(
                            "make_formal_var: no formal named `{other}` in `{}`",
                            self.decl.borrow().name
                        )
                    });
                at + 1
            }
        };
        self.formals.insert(pos, vi.clone());
        let formals = self.formals.clone();
        self.set_formals(formals);
        vi
    }

    /// Installs a new formals list and rewrites the parameter list
    /// inside the declaring variable's function type to match, keeping
    /// the two in sync.
    pub fn set_formals(&mut self, formals: Vec<VarRef>) {
        self.formals = formals;
        let params: Vec<Param> = self
            .formals
            .iter()
            .map(|f| {
                let fb = f.borrow();
                Param {
                    name: fb.name.clone(),
                    ty: fb.ty.clone(),
                    attrs: fb.attrs.clone(),
                }
            })
            .collect();
        let mut svar = self.decl.borrow_mut();
        match &mut svar.ty {
            Type::Fun(_, ps, _, _) => *ps = Some(params),
            _ => panic!("set_formals: `{}` is not a function", svar.name),
        }
    }

    /// Replaces the function type, updating the existing formals in
    /// place (identity is preserved; the parameter count must match).
    pub fn set_function_type(&mut self, ty: Type) {
        let nparams = match &ty {
            Type::Fun(_, ps, _, _) => ps.as_ref().map_or(0, |p| p.len()),
            _ => panic!(
                "set_function_type: `{}` given a non-function type",
                self.decl.borrow().name
            ),
        };
        if nparams != self.formals.len() {
            panic!(
                "set_function_type: `{}` has {} formals but the type has {} parameters",
                self.decl.borrow().name,
                self.formals.len(),
                nparams
            );
        }
        if let Type::Fun(_, Some(ps), _, _) = &ty {
            for (formal, p) in self.formals.iter().zip(ps) {
                let mut fb = formal.borrow_mut();
                fb.ty = p.ty.clone();
                fb.attrs = p.attrs.clone();
                if !p.name.is_empty() {
                    fb.name = p.name.clone();
                }
            }
        }
        self.decl.borrow_mut().ty = ty;
        let formals = self.formals.clone();
        self.set_formals(formals);
    }
}

/// Creates a composite descriptor. The field-spec closure receives the
/// forward `TComp` reference so recursive composites (e.g. linked list
/// nodes) can mention themselves; only afterwards are the fields
/// stored.
pub fn mk_comp_info<F>(is_struct: bool, name: &str, fields: F, attrs: AttrList) -> CompRef
where
    F: FnOnce(&Type) -> Vec<(String, Type, Option<u32>, AttrList)>,
{
    assert!(!name.is_empty(), "mk_comp_info: empty composite name");
    let ci = Shared::new(CompInfo {
        is_struct,
        name: name.to_string(),
        key: comp_key(is_struct, name),
        fields: Vec::new(),
        attrs,
        referenced: false,
    });
    let forward = Type::Comp(ci.clone(), AttrList::new());
    let specs = fields(&forward);
    let built: Vec<FieldRef> = specs
        .into_iter()
        .map(|(fname, fty, bitfield, fattrs)| {
            Shared::new(FieldInfo {
                comp: ci.downgrade(),
                name: fname,
                ty: fty,
                bitfield,
                attrs: fattrs,
            })
        })
        .collect();
    ci.borrow_mut().fields = built;
    ci
}

/// `struct Foo` or `union Foo`.
pub fn comp_full_name(ci: &CompRef) -> String {
    let cb = ci.borrow();
    let kw = if cb.is_struct { "struct" } else { "union" };
    format!("{kw} {}", cb.name)
}

/// Finds a field by name. A missing field is a caller error.
pub fn get_comp_field(ci: &CompRef, name: &str) -> FieldRef {
    ci.borrow()
        .fields
        .iter()
        .find(|f| f.borrow().name == name)
        .cloned()
        .unwrap_or_else(|| panic!("get_comp_field: no field `{name}` in {}", comp_full_name(ci)))
}

/// A function with no formals, no locals, an empty body and a `void`
/// return type.
pub fn empty_function(name: &str) -> FunDec {
    let ty = Type::Fun(
        Box::new(Type::Void(AttrList::new())),
        Some(Vec::new()),
        false,
        AttrList::new(),
    );
    FunDec {
        decl: make_global_var(name, ty),
        formals: Vec::new(),
        locals: Vec::new(),
        max_local_id: -1,
        body: Block::default(),
        inline: false,
        max_stmt_id: None,
    }
}

impl CFile {
    /// The global-initializer function, created on first use as
    /// `__globinit_<basename>`.
    pub fn get_glob_init(&mut self) -> &mut FunDec {
        if self.globinit.is_none() {
            let stem = self
                .name
                .rsplit('/')
                .next()
                .unwrap_or(&self.name)
                .split('.')
                .next()
                .unwrap_or("")
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect::<String>();
            self.globinit = Some(Box::new(empty_function(&format!("__globinit_{stem}"))));
        }
        self.globinit.as_mut().unwrap()
    }
}

//
// Integer builders
//

/// An `int`-kind constant.
pub fn integer(i: i64) -> Expr {
    Expr::Const(Constant::Int64(i, IKind::IInt, None))
}

/// A constant of the given kind from a machine int.
pub fn kinteger(ctx: &Context, k: IKind, i: i32) -> Expr {
    kinteger64(ctx, k, i64::from(i))
}

/// A constant of the given kind. The value is truncated to the kind's
/// width; a truncation that changes the value is reported as a
/// warning.
pub fn kinteger64(ctx: &Context, k: IKind, i: i64) -> Expr {
    let (t, changed) = truncate_integer64(ctx, k, i);
    if changed {
        warn!("truncating integer {i:#x} to {t:#x}");
    }
    Expr::Const(Constant::Int64(t, k, None))
}

/// Truncates a 64-bit value to the width of `k`: arithmetic shift for
/// signed kinds, logical for unsigned. Returns the truncated value and
/// whether it differs from the input.
pub fn truncate_integer64(ctx: &Context, k: IKind, i: i64) -> (i64, bool) {
    let bits = 8 * bytes_size_of_int(ctx, k) as u32;
    if bits >= 64 {
        return (i, false);
    }
    let shift = 64 - bits;
    let t = if is_signed_kind(ctx, k) {
        (i << shift) >> shift
    } else {
        (((i as u64) << shift) >> shift) as i64
    };
    (t, t != i)
}

/// Recovers the 64-bit value of an integer constant, looking through
/// casts and character constants.
pub fn is_integer(e: &Expr) -> Option<i64> {
    match e {
        Expr::Const(Constant::Int64(n, _, _)) => Some(*n),
        Expr::Const(Constant::Chr(c)) => Some(i64::from(*c)),
        Expr::CastE(_, inner) => is_integer(inner),
        _ => None,
    }
}

/// True for a literal zero (through casts).
pub fn is_zero(e: &Expr) -> bool {
    is_integer(e) == Some(0)
}

/// Promotes a character constant to `int`.
pub fn char_const_to_int(c: u8) -> Constant {
    Constant::Int64(i64::from(c), IKind::IInt, None)
}

/// Byte size of an integer kind on the context's machine.
pub fn bytes_size_of_int(ctx: &Context, k: IKind) -> u64 {
    let m = &ctx.machine;
    match k {
        IKind::IChar | IKind::ISChar | IKind::IUChar => 1,
        IKind::IShort | IKind::IUShort => m.size_short,
        IKind::IInt | IKind::IUInt => m.size_int,
        IKind::ILong | IKind::IULong => m.size_long,
        IKind::ILongLong | IKind::IULongLong => m.size_longlong,
    }
}

/// Byte size of a float kind on the context's machine.
pub fn bytes_size_of_float(ctx: &Context, fk: FKind) -> u64 {
    let m = &ctx.machine;
    match fk {
        FKind::FFloat => m.size_float,
        FKind::FDouble => m.size_double,
        FKind::FLongDouble => m.size_longdouble,
    }
}

/// Whether a kind is signed. Plain `char` follows the machine.
pub fn is_signed_kind(ctx: &Context, k: IKind) -> bool {
    match k {
        IKind::IChar => !ctx.machine.char_is_unsigned,
        IKind::ISChar | IKind::IInt | IKind::IShort | IKind::ILong | IKind::ILongLong => true,
        IKind::IUChar | IKind::IUInt | IKind::IUShort | IKind::IULong | IKind::IULongLong => false,
    }
}

/// The integer kind with the given byte width and signedness.
pub fn int_kind_for(bytes: u64, signed: bool) -> IKind {
    match (bytes, signed) {
        (1, true) => IKind::ISChar,
        (1, false) => IKind::IUChar,
        (2, true) => IKind::IShort,
        (2, false) => IKind::IUShort,
        (4, true) => IKind::IInt,
        (4, false) => IKind::IUInt,
        (8, true) => IKind::ILongLong,
        (8, false) => IKind::IULongLong,
        _ => panic!("int_kind_for: no integer kind of {bytes} bytes"),
    }
}

//
// Type utilities
//

/// Follows typedef chains. The attributes carried on the `TNamed`
/// references are dropped; use [unroll_type_merge] when they matter.
pub fn unroll_type(t: &Type) -> Type {
    match t {
        Type::Named(ti, _) => unroll_type(&ti.borrow().ty),
        _ => t.clone(),
    }
}

/// Follows typedef chains, merging each reference's attributes into
/// the result.
pub fn unroll_type_merge(ctx: &Context, t: &Type) -> Type {
    match t {
        Type::Named(ti, a) => {
            let under = unroll_type_merge(ctx, &ti.borrow().ty);
            type_add_attributes(ctx, a, under)
        }
        _ => t.clone(),
    }
}

/// The attribute list of a type's outermost constructor.
pub fn type_attrs(t: &Type) -> &AttrList {
    match t {
        Type::Void(a)
        | Type::Int(_, a)
        | Type::Float(_, a)
        | Type::Ptr(_, a)
        | Type::Array(_, _, a)
        | Type::Fun(_, _, _, a)
        | Type::Named(_, a)
        | Type::Comp(_, a)
        | Type::Enum(_, a)
        | Type::VaList(a) => a,
    }
}

/// Replaces the attribute list of a type's outermost constructor.
pub fn set_type_attrs(mut t: Type, attrs: AttrList) -> Type {
    match &mut t {
        Type::Void(a)
        | Type::Int(_, a)
        | Type::Float(_, a)
        | Type::Ptr(_, a)
        | Type::Array(_, _, a)
        | Type::Fun(_, _, _, a)
        | Type::Named(_, a)
        | Type::Comp(_, a)
        | Type::Enum(_, a)
        | Type::VaList(a) => *a = attrs,
    }
    t
}

/// Merges attributes into a type. A lone `mode(<tag>)` on an integer
/// type instead rewrites the integer's kind per the GCC width modes,
/// preserving signedness.
pub fn type_add_attributes(ctx: &Context, add: &[Attribute], t: Type) -> Type {
    if add.is_empty() {
        return t;
    }
    if let [a] = add
        && a.name == "mode"
        && let Type::Int(k, _) = &t
        && let [AttrArg::Var(tag)] = &a.args[..]
    {
        let bytes = match tag.as_str() {
            "__QI__" | "QI" | "__byte__" | "byte" => 1,
            "__HI__" | "HI" => 2,
            "__SI__" | "SI" | "__word__" | "word" | "__pointer__" | "pointer" => 4,
            "__DI__" | "DI" => 8,
            _ => panic!("type_add_attributes: unknown integer mode `{tag}`"),
        };
        let nk = int_kind_for(bytes, is_signed_kind(ctx, *k));
        if let Type::Int(_, attrs) = t {
            return Type::Int(nk, attrs);
        }
        unreachable!()
    }
    let merged = attrs::add_attributes(add.to_vec(), type_attrs(&t).clone());
    set_type_attrs(t, merged)
}

/// Drops the listed attribute names from a type.
pub fn type_remove_attributes(names: &[&str], t: Type) -> Type {
    let kept: AttrList = type_attrs(&t)
        .iter()
        .filter(|a| !names.contains(&a.name.as_str()))
        .cloned()
        .collect();
    set_type_attrs(t, kept)
}

/// The type of an expression.
pub fn type_of(e: &Expr) -> Type {
    match e {
        Expr::Const(Constant::Int64(_, k, _)) => Type::Int(*k, AttrList::new()),
        Expr::Const(Constant::Chr(_)) => Type::Int(IKind::IInt, AttrList::new()),
        Expr::Const(Constant::Str(_)) => Type::Ptr(
            Box::new(Type::Int(IKind::IChar, AttrList::new())),
            AttrList::new(),
        ),
        Expr::Const(Constant::Real(_, fk, _)) => Type::Float(*fk, AttrList::new()),
        Expr::Lval(lv) => type_of_lval(lv),
        Expr::SizeOf(_) | Expr::SizeOfE(_) | Expr::AlignOf(_) | Expr::AlignOfE(_) => {
            Type::Int(IKind::IUInt, AttrList::new())
        }
        Expr::UnOp(_, _, t) | Expr::BinOp(_, _, _, t) => t.clone(),
        Expr::CastE(t, _) => t.clone(),
        Expr::AddrOf(lv) => Type::Ptr(Box::new(type_of_lval(lv)), AttrList::new()),
        Expr::StartOf(lv) => match unroll_type(&type_of_lval(lv)) {
            Type::Array(elt, _, _) => Type::Ptr(elt, AttrList::new()),
            other => panic!("start-of on non-array lvalue of type {other:?}"),
        },
    }
}

/// The type of an lvalue.
pub fn type_of_lval(lv: &Lval) -> Type {
    let (host, off) = lv;
    match host {
        LHost::Var(vi) => type_of_offset(&vi.borrow().ty, off),
        LHost::Mem(addr) => match unroll_type(&type_of(addr)) {
            Type::Ptr(base, _) => type_of_offset(&base, off),
            other => panic!("memory access through non-pointer type {other:?}"),
        },
    }
}

/// The type reached by walking an offset chain from a base type.
pub fn type_of_offset(base: &Type, off: &Offset) -> Type {
    match off {
        Offset::NoOffset => base.clone(),
        Offset::Field(f, rest) => type_of_offset(&f.borrow().ty, rest),
        Offset::Index(_, rest) => match unroll_type(base) {
            Type::Array(elt, _, _) => type_of_offset(&elt, rest),
            other => panic!("index into non-array type {other:?}"),
        },
    }
}

/// The integer kind of an integral type, with enums reading as `int`.
pub fn integral_kind(t: &Type) -> Option<IKind> {
    match unroll_type(t) {
        Type::Int(k, _) => Some(k),
        Type::Enum(_, _) => Some(IKind::IInt),
        _ => None,
    }
}

pub fn is_integral_type(t: &Type) -> bool {
    integral_kind(t).is_some()
}

pub fn is_arithmetic_type(t: &Type) -> bool {
    is_integral_type(t) || matches!(unroll_type(t), Type::Float(_, _))
}

pub fn is_pointer_type(t: &Type) -> bool {
    matches!(unroll_type(t), Type::Ptr(_, _))
}

pub fn is_function_type(t: &Type) -> bool {
    matches!(unroll_type(t), Type::Fun(..))
}

pub fn is_array_type(t: &Type) -> bool {
    matches!(unroll_type(t), Type::Array(..))
}

/// The constant length of an array type, when it folds to one.
pub fn len_of_array(ctx: &Context, t: &Type) -> Option<i64> {
    match unroll_type(t) {
        Type::Array(_, Some(len), _) => {
            is_integer(&crate::fold::const_fold(ctx, true, &len))
        }
        _ => None,
    }
}

/// Splits a function (or pointer-to-function) type into return type,
/// parameters, variadic flag and attributes.
pub fn split_function_type(t: &Type) -> (Type, Option<Vec<Param>>, bool, AttrList) {
    match unroll_type(t) {
        Type::Fun(rt, params, va, attrs) => (*rt, params, va, attrs),
        Type::Ptr(inner, _) => match unroll_type(&inner) {
            Type::Fun(rt, params, va, attrs) => (*rt, params, va, attrs),
            other => panic!("split_function_type: pointer to non-function {other:?}"),
        },
        other => panic!("split_function_type: not a function type {other:?}"),
    }
}

//
// Lvalue helpers
//

/// The lvalue naming a variable.
pub fn var(vi: &VarRef) -> Lval {
    (LHost::Var(vi.clone()), Offset::NoOffset)
}

/// Appends `toadd` at the innermost `NoOffset` of `off`.
pub fn add_offset(off: Offset, toadd: Offset) -> Offset {
    match off {
        Offset::NoOffset => toadd,
        Offset::Field(f, rest) => Offset::Field(f, Box::new(add_offset(*rest, toadd))),
        Offset::Index(e, rest) => Offset::Index(e, Box::new(add_offset(*rest, toadd))),
    }
}

/// Appends an offset to an lvalue.
pub fn add_offset_lval(lv: Lval, toadd: Offset) -> Lval {
    let (host, off) = lv;
    (host, add_offset(off, toadd))
}

/// Builds a memory lvalue from an address expression, collapsing
/// `*&lv` back to `lv` and `*(start-of a)` to `a[0]`.
pub fn mk_mem(addr: Expr, off: Offset) -> Lval {
    match addr {
        Expr::AddrOf(lv) => add_offset_lval(lv, off),
        Expr::StartOf(lv) => {
            add_offset_lval(lv, Offset::Index(Box::new(integer(0)), Box::new(off)))
        }
        e => (LHost::Mem(Box::new(e)), off),
    }
}

/// Takes the address of an lvalue: `&*e` collapses to `e` and `&a[0]`
/// to the decay of `a`. Taking a variable's address sets its
/// address-taken flag and demotes `register` storage.
pub fn mk_addr_of(lv: Lval) -> Expr {
    if let (LHost::Var(vi), _) = &lv {
        let mut vb = vi.borrow_mut();
        vb.addrof = true;
        if vb.storage == Storage::Register {
            vb.storage = Storage::NoStorage;
        }
    }
    match lv {
        (LHost::Mem(e), Offset::NoOffset) => *e,
        (host, Offset::Index(z, rest))
            if matches!(*rest, Offset::NoOffset) && is_zero(&z) =>
        {
            Expr::StartOf((host, Offset::NoOffset))
        }
        lv => Expr::AddrOf(lv),
    }
}

/// `StartOf` for arrays, `mk_addr_of` for everything else.
pub fn mk_addr_or_start_of(lv: Lval) -> Expr {
    if is_array_type(&type_of_lval(&lv)) {
        Expr::StartOf(lv)
    } else {
        mk_addr_of(lv)
    }
}

//
// Statement builders
//

/// A fresh statement with no labels, id -1 and no edges.
pub fn mk_stmt(kind: StmtKind) -> StmtRef {
    Shared::new(Stmt {
        labels: Vec::new(),
        kind,
        sid: -1,
        succs: Vec::new(),
        preds: Vec::new(),
    })
}

pub fn mk_block(stmts: Vec<StmtRef>) -> Block {
    Block {
        attrs: AttrList::new(),
        stmts,
    }
}

pub fn mk_empty_stmt() -> StmtRef {
    mk_stmt(StmtKind::Instr(Vec::new()))
}

pub fn mk_stmt_one_instr(i: Instr) -> StmtRef {
    mk_stmt(StmtKind::Instr(vec![i]))
}

/// `while (guard) body`, expressed as
/// `Loop([if (guard) {} else break; body...])`.
pub fn mk_while(ctx: &Context, guard: Expr, body: Vec<StmtRef>) -> Vec<StmtRef> {
    let loc = ctx.current_loc.borrow().clone();
    let brk = mk_stmt(StmtKind::Break(loc.clone()));
    let test = mk_stmt(StmtKind::If(
        guard,
        mk_block(Vec::new()),
        mk_block(vec![brk]),
        loc.clone(),
    ));
    let mut stmts = vec![test];
    stmts.extend(body);
    vec![mk_stmt(StmtKind::Loop(mk_block(stmts), loc))]
}

/// `for (start; guard; next) body` as `start ++ while (guard) { body ++ next }`.
pub fn mk_for(
    ctx: &Context,
    start: Vec<StmtRef>,
    guard: Expr,
    next: Vec<StmtRef>,
    body: Vec<StmtRef>,
) -> Vec<StmtRef> {
    let mut inner = body;
    inner.extend(next);
    let mut stmts = start;
    stmts.extend(mk_while(ctx, guard, inner));
    stmts
}

/// A counted loop over `iter`, choosing pointer or arithmetic
/// comparison and increment from the iterator's type.
pub fn mk_for_incr(
    ctx: &Context,
    iter: &VarRef,
    first: Expr,
    past: Expr,
    incr: Expr,
    body: Vec<StmtRef>,
) -> Vec<StmtRef> {
    let loc = ctx.current_loc.borrow().clone();
    let iter_ty = iter.borrow().ty.clone();
    let (cmp, plus) = if is_pointer_type(&iter_ty) {
        (BinOp::LtP, BinOp::PlusPI)
    } else {
        (BinOp::Lt, BinOp::PlusA)
    };
    let guard = Expr::BinOp(
        cmp,
        Box::new(Expr::Lval(var(iter))),
        Box::new(past),
        Type::Int(IKind::IInt, AttrList::new()),
    );
    let step = Expr::BinOp(
        plus,
        Box::new(Expr::Lval(var(iter))),
        Box::new(incr),
        iter_ty,
    );
    mk_for(
        ctx,
        vec![mk_stmt_one_instr(Instr::Set(var(iter), first, loc.clone()))],
        guard,
        vec![mk_stmt_one_instr(Instr::Set(var(iter), step, loc))],
        body,
    )
}

/// Coalesces adjacent `Instr` statements when the second carries no
/// labels.
pub fn compact_stmts(stmts: Vec<StmtRef>) -> Vec<StmtRef> {
    let mut out: Vec<StmtRef> = Vec::with_capacity(stmts.len());
    for s in stmts {
        let mergeable = match out.last() {
            Some(prev) => {
                let pb = prev.borrow();
                let sb = s.borrow();
                matches!(pb.kind, StmtKind::Instr(_))
                    && matches!(sb.kind, StmtKind::Instr(_))
                    && sb.labels.is_empty()
            }
            None => false,
        };
        if mergeable {
            let moved = match &mut s.borrow_mut().kind {
                StmtKind::Instr(il) => std::mem::take(il),
                _ => unreachable!(),
            };
            if let StmtKind::Instr(dst) = &mut out.last().unwrap().borrow_mut().kind {
                dst.extend(moved);
            }
        } else {
            out.push(s);
        }
    }
    out
}

/// The source location of an instruction.
pub fn instr_loc(i: &Instr) -> &Location {
    match i {
        Instr::Set(_, _, l) | Instr::Call(_, _, _, l) => l,
        Instr::Asm(details) => &details.loc,
    }
}

/// The source location of a statement kind, when it has one.
pub fn stmt_kind_loc(k: &StmtKind) -> Option<&Location> {
    match k {
        StmtKind::Return(_, l)
        | StmtKind::Goto(_, l)
        | StmtKind::Break(l)
        | StmtKind::Continue(l)
        | StmtKind::If(_, _, _, l)
        | StmtKind::Switch(_, _, _, l)
        | StmtKind::Loop(_, l) => Some(l),
        StmtKind::Instr(is) => is.first().map(instr_loc),
        StmtKind::Block(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::default()
    }

    fn int_ty() -> Type {
        Type::Int(IKind::IInt, AttrList::new())
    }

    #[test]
    fn kinteger64_truncates_and_reports() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let c = ctx();
        let e = kinteger64(&c, IKind::IUShort, 0x1ffff);
        assert_eq!(e, Expr::Const(Constant::Int64(0xffff, IKind::IUShort, None)));
        // no truncation when the value fits
        let e = kinteger64(&c, IKind::IUShort, 0xffff);
        assert_eq!(is_integer(&e), Some(0xffff));
    }

    #[test]
    fn truncation_is_idempotent() {
        let c = ctx();
        for k in [IKind::IChar, IKind::IUChar, IKind::IShort, IKind::IUInt, IKind::ILongLong] {
            for v in [0i64, -1, 0x1ffff, i64::MIN, i64::MAX, -40000] {
                let (once, _) = truncate_integer64(&c, k, v);
                let (twice, changed) = truncate_integer64(&c, k, once);
                assert_eq!(once, twice);
                assert!(!changed);
            }
        }
    }

    #[test]
    fn is_integer_looks_through_casts_and_chars() {
        let e = Expr::CastE(
            Type::Int(IKind::IUChar, AttrList::new()),
            Box::new(Expr::Const(Constant::Chr(b'A'))),
        );
        assert_eq!(is_integer(&e), Some(65));
        assert!(is_zero(&Expr::CastE(int_ty(), Box::new(integer(0)))));
    }

    #[test]
    fn mk_addr_of_simplifies() {
        let x = make_global_var("x", int_ty());
        // &*p == p
        let p = make_global_var("p", Type::Ptr(Box::new(int_ty()), AttrList::new()));
        let deref = (
            LHost::Mem(Box::new(Expr::Lval(var(&p)))),
            Offset::NoOffset,
        );
        assert_eq!(mk_addr_of(deref), Expr::Lval(var(&p)));
        // &a[0] == start-of a
        let a = make_global_var(
            "a",
            Type::Array(Box::new(int_ty()), Some(Box::new(integer(4))), AttrList::new()),
        );
        let first = (
            LHost::Var(a.clone()),
            Offset::Index(Box::new(integer(0)), Box::new(Offset::NoOffset)),
        );
        assert_eq!(
            mk_addr_of(first),
            Expr::StartOf((LHost::Var(a.clone()), Offset::NoOffset))
        );
        // plain case, with the address-taken flag set
        assert_eq!(mk_addr_of(var(&x)), Expr::AddrOf(var(&x)));
        assert!(x.borrow().addrof);
    }

    #[test]
    fn mk_addr_of_demotes_register_storage() {
        let r = make_global_var("r", int_ty());
        r.borrow_mut().storage = Storage::Register;
        let _ = mk_addr_of(var(&r));
        assert_eq!(r.borrow().storage, Storage::NoStorage);
    }

    #[test]
    fn mk_mem_collapses_addr_of() {
        let x = make_global_var("x", int_ty());
        let lv = mk_mem(Expr::AddrOf(var(&x)), Offset::NoOffset);
        assert_eq!(lv, var(&x));
    }

    #[test]
    fn formals_stay_in_sync_with_the_type() {
        let mut f = empty_function("f");
        f.make_formal_var("$", "a", int_ty());
        f.make_formal_var("$", "b", int_ty());
        f.make_formal_var("a", "mid", int_ty());
        f.make_formal_var("^", "first", int_ty());
        let names: Vec<String> = f.formals.iter().map(|v| v.borrow().name.clone()).collect();
        assert_eq!(names, ["first", "a", "mid", "b"]);
        let decl = f.decl.borrow();
        let Type::Fun(_, Some(params), _, _) = &decl.ty else {
            panic!("function type lost");
        };
        let pnames: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(pnames, ["first", "a", "mid", "b"]);
    }

    #[test]
    fn formals_are_numbered_from_zero() {
        let mut f = empty_function("f");
        let a = f.make_formal_var("$", "a", int_ty());
        let b = f.make_formal_var("$", "b", int_ty());
        let t = f.make_temp_var(None, int_ty());
        assert_eq!(a.borrow().vid, 0);
        assert_eq!(b.borrow().vid, 1);
        assert_eq!(t.borrow().vid, 2);
        assert_eq!(t.borrow().name, "tmp2");
    }

    #[test]
    fn recursive_comp_info() {
        let node = mk_comp_info(
            true,
            "node",
            |this| {
                vec![
                    ("value".into(), int_ty(), None, AttrList::new()),
                    (
                        "next".into(),
                        Type::Ptr(Box::new(this.clone()), AttrList::new()),
                        None,
                        AttrList::new(),
                    ),
                ]
            },
            AttrList::new(),
        );
        let next = get_comp_field(&node, "next");
        let nb = next.borrow();
        let Type::Ptr(inner, _) = &nb.ty else {
            panic!("next is not a pointer")
        };
        let Type::Comp(target, _) = &**inner else {
            panic!("next does not point at a composite")
        };
        assert!(Shared::ptr_eq(target, &node));
        assert!(Shared::ptr_eq(&nb.comp.upgrade().unwrap(), &node));
    }

    #[test]
    fn renaming_a_comp_recomputes_the_key() {
        let ci = mk_comp_info(true, "a", |_| vec![], AttrList::new());
        let old = ci.borrow().key;
        ci.borrow_mut().set_name("b");
        assert_ne!(ci.borrow().key, old);
        assert_eq!(ci.borrow().key, comp_key(true, "b"));
    }

    #[test]
    fn mode_attribute_rewrites_integer_kinds() {
        let c = ctx();
        let m = |tag: &str| vec![Attribute::new("mode", vec![AttrArg::Var(tag.into())])];
        assert_eq!(
            type_add_attributes(&c, &m("__DI__"), int_ty()),
            Type::Int(IKind::ILongLong, AttrList::new())
        );
        assert_eq!(
            type_add_attributes(&c, &m("__HI__"), Type::Int(IKind::IUInt, AttrList::new())),
            Type::Int(IKind::IUShort, AttrList::new())
        );
    }

    #[test]
    fn unroll_merge_keeps_reference_attrs() {
        let c = ctx();
        let ti = Shared::new(TypeInfo {
            name: "word".into(),
            ty: int_ty(),
            referenced: false,
        });
        let aconst = Attribute::new("const", vec![]);
        let named = Type::Named(ti, vec![aconst.clone()]);
        assert_eq!(unroll_type(&named), int_ty());
        assert_eq!(
            unroll_type_merge(&c, &named),
            Type::Int(IKind::IInt, vec![aconst])
        );
    }

    #[test]
    fn compact_stmts_merges_unlabeled_instr_runs() {
        let loc = Location::none();
        let x = make_global_var("x", int_ty());
        let set = |v: i64| Instr::Set(var(&x), integer(v), loc.clone());
        let a = mk_stmt_one_instr(set(1));
        let b = mk_stmt_one_instr(set(2));
        let labeled = mk_stmt_one_instr(set(3));
        labeled.borrow_mut().labels.push(Label::Name("l".into(), loc.clone(), true));
        let c = mk_stmt_one_instr(set(4));
        let out = compact_stmts(vec![a.clone(), b, labeled.clone(), c]);
        assert_eq!(out.len(), 2);
        match &out[0].borrow().kind {
            StmtKind::Instr(is) => assert_eq!(is.len(), 2),
            _ => panic!("not an instr statement"),
        }
        assert!(Shared::ptr_eq(&out[1], &labeled));
        match &out[1].borrow().kind {
            StmtKind::Instr(is) => assert_eq!(is.len(), 2),
            _ => panic!("not an instr statement"),
        }
    }

    #[test]
    fn mk_while_shape() {
        let c = ctx();
        let x = make_global_var("x", int_ty());
        let body = vec![mk_empty_stmt()];
        let w = mk_while(&c, Expr::Lval(var(&x)), body);
        assert_eq!(w.len(), 1);
        let wb = w[0].borrow();
        let StmtKind::Loop(b, _) = &wb.kind else {
            panic!("not a loop")
        };
        assert_eq!(b.stmts.len(), 2);
        let head = b.stmts[0].borrow();
        let StmtKind::If(_, thn, els, _) = &head.kind else {
            panic!("loop head is not the guard test")
        };
        assert!(thn.stmts.is_empty());
        assert!(matches!(els.stmts[0].borrow().kind, StmtKind::Break(_)));
    }
}
