//! Generic traversal and rewriting over every IR node kind.
//!
//! A visitor implements one callback per node kind, each returning a
//! [Visit] action: skip the subtree, descend, replace the node, or
//! replace it, descend, and post-process. The engine mutates nodes in
//! place, so a node nobody changes is never moved or reallocated —
//! running a do-nothing visitor leaves every handle identical.
//!
//! Instructions, globals and attributes may be replaced by *lists*,
//! which splice into the surrounding sequence; after any attribute
//! splice the list is re-sorted to restore the attribute-sort
//! invariant. Visiting a function re-installs its formals when a
//! formal handle was replaced, preserving the formals/type sync.

use tracing::trace;

use crate::ast::attrs::{add_attributes, AttrList, Attribute};
use crate::ast::support::{instr_loc, stmt_kind_loc};
use crate::ast::*;
use crate::context::Context;

/// What to do with a visited node.
pub enum Visit<T> {
    /// Keep the node and do not descend.
    SkipChildren,
    /// Keep the node and descend into its children.
    DoChildren,
    /// Replace the node; children are not visited.
    ChangeTo(T),
    /// Replace the node, descend, then post-process the result.
    ChangeDoChildrenPost(T, Box<dyn FnOnce(&mut T)>),
}

/// Per-node-kind callbacks. Every default is [Visit::DoChildren].
pub trait IrVisitor {
    /// A variable declaration (at its defining occurrence).
    fn vvdec(&mut self, _v: &VarRef) -> Visit<VarRef> {
        Visit::DoChildren
    }
    /// A variable use.
    fn vvrbl(&mut self, _v: &VarRef) -> Visit<VarRef> {
        Visit::DoChildren
    }
    fn vexpr(&mut self, _e: &Expr) -> Visit<Expr> {
        Visit::DoChildren
    }
    fn vlval(&mut self, _lv: &Lval) -> Visit<Lval> {
        Visit::DoChildren
    }
    fn voffs(&mut self, _o: &Offset) -> Visit<Offset> {
        Visit::DoChildren
    }
    /// An instruction; the replacement list splices in place.
    fn vinst(&mut self, _i: &Instr) -> Visit<Vec<Instr>> {
        Visit::DoChildren
    }
    fn vstmt(&mut self, _s: &StmtRef) -> Visit<StmtRef> {
        Visit::DoChildren
    }
    fn vblock(&mut self, _b: &Block) -> Visit<Block> {
        Visit::DoChildren
    }
    fn vfunc(&mut self, _f: &FunDec) -> Visit<FunDec> {
        Visit::DoChildren
    }
    /// A global; the replacement list splices in place.
    fn vglob(&mut self, _g: &Global) -> Visit<Vec<Global>> {
        Visit::DoChildren
    }
    fn vinit(&mut self, _i: &Init) -> Visit<Init> {
        Visit::DoChildren
    }
    fn vtype(&mut self, _t: &Type) -> Visit<Type> {
        Visit::DoChildren
    }
    /// An attribute; the replacement list splices, then the whole list
    /// is re-sorted.
    fn vattr(&mut self, _a: &Attribute) -> Visit<Vec<Attribute>> {
        Visit::DoChildren
    }
}

/// A visitor that touches nothing. Useful as a traversal baseline.
pub struct NopVisitor;

impl IrVisitor for NopVisitor {}

fn apply<T>(node: &mut T, action: Visit<T>, children: impl FnOnce(&mut T)) {
    match action {
        Visit::SkipChildren => {}
        Visit::DoChildren => children(node),
        Visit::ChangeTo(n) => *node = n,
        Visit::ChangeDoChildrenPost(n, post) => {
            *node = n;
            children(node);
            post(node);
        }
    }
}

pub fn visit_expr<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, e: &mut Expr) {
    let action = v.vexpr(e);
    apply(e, action, |e| expr_children(ctx, v, e));
}

fn expr_children<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, e: &mut Expr) {
    match e {
        Expr::Const(_) => {}
        Expr::Lval(lv) | Expr::AddrOf(lv) | Expr::StartOf(lv) => visit_lval(ctx, v, lv),
        Expr::SizeOf(t) | Expr::AlignOf(t) => visit_type(ctx, v, t),
        Expr::SizeOfE(inner) | Expr::AlignOfE(inner) => visit_expr(ctx, v, inner),
        Expr::UnOp(_, inner, t) => {
            visit_expr(ctx, v, inner);
            visit_type(ctx, v, t);
        }
        Expr::BinOp(_, lhs, rhs, t) => {
            visit_expr(ctx, v, lhs);
            visit_expr(ctx, v, rhs);
            visit_type(ctx, v, t);
        }
        Expr::CastE(t, inner) => {
            visit_type(ctx, v, t);
            visit_expr(ctx, v, inner);
        }
    }
}

pub fn visit_lval<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, lv: &mut Lval) {
    let action = v.vlval(lv);
    apply(lv, action, |lv| {
        match &mut lv.0 {
            LHost::Var(vr) => visit_var_use(ctx, v, vr),
            LHost::Mem(addr) => visit_expr(ctx, v, addr),
        }
        visit_offset(ctx, v, &mut lv.1);
    });
}

fn visit_var_use<V: IrVisitor + ?Sized>(_ctx: &Context, v: &mut V, vr: &mut VarRef) {
    // Variable uses have no children of their own.
    let action = v.vvrbl(vr);
    apply(vr, action, |_| {});
}

pub fn visit_offset<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, o: &mut Offset) {
    let action = v.voffs(o);
    apply(o, action, |o| match o {
        Offset::NoOffset => {}
        Offset::Field(_, rest) => visit_offset(ctx, v, rest),
        Offset::Index(idx, rest) => {
            visit_expr(ctx, v, idx);
            visit_offset(ctx, v, rest);
        }
    });
}

pub fn visit_init<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, init: &mut Init) {
    let action = v.vinit(init);
    apply(init, action, |init| match init {
        Init::Single(e) => visit_expr(ctx, v, e),
        Init::Compound(t, items) => {
            visit_type(ctx, v, t);
            for (off, inner) in items {
                visit_offset(ctx, v, off);
                visit_init(ctx, v, inner);
            }
        }
    });
}

pub fn visit_type<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, t: &mut Type) {
    let action = v.vtype(t);
    apply(t, action, |t| type_children(ctx, v, t));
}

fn type_children<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, t: &mut Type) {
    match t {
        // Shared descriptors are not descended into from their uses;
        // their definitions are visited at the defining global.
        Type::Void(a)
        | Type::Int(_, a)
        | Type::Float(_, a)
        | Type::VaList(a)
        | Type::Named(_, a)
        | Type::Comp(_, a)
        | Type::Enum(_, a) => visit_attrs(ctx, v, a),
        Type::Ptr(base, a) => {
            visit_type(ctx, v, base);
            visit_attrs(ctx, v, a);
        }
        Type::Array(base, len, a) => {
            visit_type(ctx, v, base);
            if let Some(l) = len {
                visit_expr(ctx, v, l);
            }
            visit_attrs(ctx, v, a);
        }
        Type::Fun(rt, params, _, a) => {
            visit_type(ctx, v, rt);
            if let Some(ps) = params {
                for p in ps {
                    visit_type(ctx, v, &mut p.ty);
                    visit_attrs(ctx, v, &mut p.attrs);
                }
            }
            visit_attrs(ctx, v, a);
        }
    }
}

/// Visits an attribute list. Splices expansions in place and restores
/// the sort invariant if anything changed.
pub fn visit_attrs<V: IrVisitor + ?Sized>(_ctx: &Context, v: &mut V, attrs: &mut AttrList) {
    let mut changed = false;
    let mut i = 0;
    while i < attrs.len() {
        match v.vattr(&attrs[i]) {
            // Attribute parameters are not visited.
            Visit::SkipChildren | Visit::DoChildren => i += 1,
            Visit::ChangeTo(list) => {
                let n = list.len();
                attrs.splice(i..=i, list);
                i += n;
                changed = true;
            }
            Visit::ChangeDoChildrenPost(mut list, post) => {
                post(&mut list);
                let n = list.len();
                attrs.splice(i..=i, list);
                i += n;
                changed = true;
            }
        }
    }
    if changed {
        let old = std::mem::take(attrs);
        *attrs = add_attributes(old, AttrList::new());
    }
}

/// Visits a list of instructions, splicing list replacements in place.
pub fn visit_instr_list<V: IrVisitor + ?Sized>(
    ctx: &Context,
    v: &mut V,
    list: &mut Vec<Instr>,
) {
    let mut i = 0;
    while i < list.len() {
        ctx.set_loc(instr_loc(&list[i]));
        match v.vinst(&list[i]) {
            Visit::SkipChildren => i += 1,
            Visit::DoChildren => {
                instr_children(ctx, v, &mut list[i]);
                i += 1;
            }
            Visit::ChangeTo(repl) => {
                let n = repl.len();
                list.splice(i..=i, repl);
                i += n;
            }
            Visit::ChangeDoChildrenPost(mut repl, post) => {
                for instr in &mut repl {
                    instr_children(ctx, v, instr);
                }
                post(&mut repl);
                let n = repl.len();
                list.splice(i..=i, repl);
                i += n;
            }
        }
    }
}

fn instr_children<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, i: &mut Instr) {
    match i {
        Instr::Set(lv, e, _) => {
            visit_lval(ctx, v, lv);
            visit_expr(ctx, v, e);
        }
        Instr::Call(dest, callee, args, _) => {
            if let Some(lv) = dest {
                visit_lval(ctx, v, lv);
            }
            visit_expr(ctx, v, callee);
            for a in args {
                visit_expr(ctx, v, a);
            }
        }
        Instr::Asm(details) => {
            visit_attrs(ctx, v, &mut details.attrs);
            for (_, lv) in &mut details.outputs {
                visit_lval(ctx, v, lv);
            }
            for (_, e) in &mut details.inputs {
                visit_expr(ctx, v, e);
            }
        }
    }
}

/// Visits one statement slot. A `ChangeTo` replaces the handle in the
/// surrounding block; gotos that named the old handle keep naming it.
pub fn visit_stmt<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, slot: &mut StmtRef) {
    if ctx.debug_visit {
        trace!(sid = slot.borrow().sid, "visiting statement");
    }
    let action = v.vstmt(slot);
    apply(slot, action, |s| stmt_children(ctx, v, s));
}

fn stmt_children<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, s: &StmtRef) {
    let mut sb = s.borrow_mut();
    if let Some(loc) = stmt_kind_loc(&sb.kind) {
        ctx.set_loc(loc);
    }
    for l in &mut sb.labels {
        if let Label::Case(e, _) = l {
            visit_expr(ctx, v, e);
        }
    }
    match &mut sb.kind {
        StmtKind::Instr(list) => visit_instr_list(ctx, v, list),
        StmtKind::Return(Some(e), _) => visit_expr(ctx, v, e),
        StmtKind::Return(None, _)
        | StmtKind::Goto(_, _)
        | StmtKind::Break(_)
        | StmtKind::Continue(_) => {}
        StmtKind::If(cond, then_b, else_b, _) => {
            visit_expr(ctx, v, cond);
            visit_block(ctx, v, then_b);
            visit_block(ctx, v, else_b);
        }
        StmtKind::Switch(e, body, _, _) => {
            visit_expr(ctx, v, e);
            visit_block(ctx, v, body);
        }
        StmtKind::Loop(body, _) => visit_block(ctx, v, body),
        StmtKind::Block(body) => visit_block(ctx, v, body),
    }
}

pub fn visit_block<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, b: &mut Block) {
    let action = v.vblock(b);
    apply(b, action, |b| {
        visit_attrs(ctx, v, &mut b.attrs);
        for slot in &mut b.stmts {
            visit_stmt(ctx, v, slot);
        }
    });
}

fn visit_var_decl<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, vr: &mut VarRef) {
    let action = v.vvdec(vr);
    apply(vr, action, |vr| {
        let mut vb = vr.borrow_mut();
        let VarInfo { ty, attrs, .. } = &mut *vb;
        visit_type(ctx, v, ty);
        visit_attrs(ctx, v, attrs);
    });
}

pub fn visit_function<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, f: &mut FunDec) {
    let action = v.vfunc(f);
    apply(f, action, |f| function_children(ctx, v, f));
}

fn function_children<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, f: &mut FunDec) {
    visit_var_decl(ctx, v, &mut f.decl);
    let mut formals_changed = false;
    for slot in &mut f.formals {
        let before = slot.clone();
        visit_var_decl(ctx, v, slot);
        if !Shared::ptr_eq(&before, slot) {
            formals_changed = true;
        }
    }
    if formals_changed {
        // Keep the parameter list inside the function type in sync.
        let formals = f.formals.clone();
        f.set_formals(formals);
    }
    for slot in &mut f.locals {
        visit_var_decl(ctx, v, slot);
    }
    visit_block(ctx, v, &mut f.body);
}

/// Visits a list of globals, splicing list replacements in place.
pub fn visit_globals<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, globals: &mut Vec<Global>) {
    let mut i = 0;
    while i < globals.len() {
        if let Some(loc) = globals[i].loc() {
            ctx.set_loc(loc);
        }
        if ctx.debug_visit {
            trace!(index = i, "visiting global");
        }
        match v.vglob(&globals[i]) {
            Visit::SkipChildren => i += 1,
            Visit::DoChildren => {
                global_children(ctx, v, &mut globals[i]);
                i += 1;
            }
            Visit::ChangeTo(repl) => {
                let n = repl.len();
                globals.splice(i..=i, repl);
                i += n;
            }
            Visit::ChangeDoChildrenPost(mut repl, post) => {
                for g in &mut repl {
                    global_children(ctx, v, g);
                }
                post(&mut repl);
                let n = repl.len();
                globals.splice(i..=i, repl);
                i += n;
            }
        }
    }
}

fn global_children<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, g: &mut Global) {
    match g {
        Global::Type(ti, _) => {
            let mut tb = ti.borrow_mut();
            visit_type(ctx, v, &mut tb.ty);
        }
        Global::CompTag(ci, _) => {
            let mut cb = ci.borrow_mut();
            let CompInfo { fields, attrs, .. } = &mut *cb;
            for f in fields.iter() {
                let mut fb = f.borrow_mut();
                let FieldInfo { ty, attrs, .. } = &mut *fb;
                visit_type(ctx, v, ty);
                visit_attrs(ctx, v, attrs);
            }
            visit_attrs(ctx, v, attrs);
        }
        Global::EnumTag(ei, _) => {
            let mut eb = ei.borrow_mut();
            let EnumInfo { items, attrs, .. } = &mut *eb;
            for (_, value) in items.iter_mut() {
                visit_expr(ctx, v, value);
            }
            visit_attrs(ctx, v, attrs);
        }
        Global::VarDecl(vr, _) => visit_var_decl(ctx, v, vr),
        Global::Var(vr, init, _) => {
            visit_var_decl(ctx, v, vr);
            if let Some(i) = init {
                visit_init(ctx, v, i);
            }
        }
        Global::Fun(fd, _) => visit_function(ctx, v, fd),
        Global::Pragma(attr, _) => {
            let replace = match v.vattr(attr) {
                Visit::SkipChildren | Visit::DoChildren => None,
                Visit::ChangeTo(list) => Some(list),
                Visit::ChangeDoChildrenPost(mut list, post) => {
                    post(&mut list);
                    Some(list)
                }
            };
            if let Some(mut list) = replace {
                if list.len() != 1 {
                    panic!("visiting a pragma must produce exactly one attribute");
                }
                *attr = list.pop().unwrap();
            }
        }
        Global::Asm(_, _) | Global::Text(_) => {}
    }
}

/// Visits a whole file: the globals, then the global initializer if
/// present.
pub fn visit_file<V: IrVisitor + ?Sized>(ctx: &Context, v: &mut V, f: &mut CFile) {
    visit_globals(ctx, v, &mut f.globals);
    if let Some(gi) = &mut f.globinit {
        visit_function(ctx, v, gi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::attrs::Attribute;
    use crate::ast::support::*;

    fn int_ty() -> Type {
        Type::Int(IKind::IInt, AttrList::new())
    }

    /// `int f(int x) { return x + 1; }` plus a global `int g = 5;`
    fn sample_file() -> (CFile, VarRef) {
        let mut f = empty_function("f");
        let x = f.make_formal_var("$", "x", int_ty());
        let ret = mk_stmt(StmtKind::Return(
            Some(Expr::BinOp(
                BinOp::PlusA,
                Box::new(Expr::Lval(var(&x))),
                Box::new(integer(1)),
                int_ty(),
            )),
            Location::none(),
        ));
        f.body.stmts.push(ret);
        let g = make_global_var("g", int_ty());
        let mut file = CFile::new("sample.c");
        file.globals.push(Global::Var(
            g.clone(),
            Some(Init::Single(integer(5))),
            Location::none(),
        ));
        file.globals.push(Global::Fun(Box::new(f), Location::none()));
        (file, x)
    }

    #[test]
    fn nop_visit_preserves_identity() {
        let ctx = Context::default();
        let (mut file, x) = sample_file();
        let stmt_before = match &file.globals[1] {
            Global::Fun(fd, _) => fd.body.stmts[0].clone(),
            _ => unreachable!(),
        };
        visit_file(&ctx, &mut NopVisitor, &mut file);
        let (stmt_after, formal_after) = match &file.globals[1] {
            Global::Fun(fd, _) => (fd.body.stmts[0].clone(), fd.formals[0].clone()),
            _ => unreachable!(),
        };
        assert!(Shared::ptr_eq(&stmt_before, &stmt_after));
        assert!(Shared::ptr_eq(&x, &formal_after));
    }

    #[test]
    fn change_to_rewrites_expressions_in_place() {
        struct FortyTwo;
        impl IrVisitor for FortyTwo {
            fn vexpr(&mut self, e: &Expr) -> Visit<Expr> {
                if *e == integer(1) {
                    Visit::ChangeTo(integer(42))
                } else {
                    Visit::DoChildren
                }
            }
        }
        let ctx = Context::default();
        let (mut file, x) = sample_file();
        visit_file(&ctx, &mut FortyTwo, &mut file);
        let Global::Fun(fd, _) = &file.globals[1] else {
            unreachable!()
        };
        let sb = fd.body.stmts[0].borrow();
        let StmtKind::Return(Some(e), _) = &sb.kind else {
            panic!("return lost")
        };
        assert_eq!(
            *e,
            Expr::BinOp(
                BinOp::PlusA,
                Box::new(Expr::Lval(var(&x))),
                Box::new(integer(42)),
                int_ty(),
            )
        );
    }

    #[test]
    fn instruction_lists_splice() {
        struct Duplicate;
        impl IrVisitor for Duplicate {
            fn vinst(&mut self, i: &Instr) -> Visit<Vec<Instr>> {
                Visit::ChangeTo(vec![i.clone(), i.clone()])
            }
        }
        let ctx = Context::default();
        let x = make_global_var("x", int_ty());
        let set = Instr::Set(var(&x), integer(1), Location::none());
        let stmt = mk_stmt_one_instr(set);
        let mut b = mk_block(vec![stmt]);
        visit_block(&ctx, &mut Duplicate, &mut b);
        let sb = b.stmts[0].borrow();
        let StmtKind::Instr(is) = &sb.kind else {
            panic!("not instrs")
        };
        assert_eq!(is.len(), 2);
    }

    #[test]
    fn attribute_expansion_restores_sorting() {
        struct Expand;
        impl IrVisitor for Expand {
            fn vattr(&mut self, a: &Attribute) -> Visit<Vec<Attribute>> {
                if a.name == "zmark" {
                    Visit::ChangeTo(vec![
                        Attribute::new("zmark", vec![]),
                        Attribute::new("aconst", vec![]),
                    ])
                } else {
                    Visit::DoChildren
                }
            }
        }
        let ctx = Context::default();
        let mut t = Type::Int(
            IKind::IInt,
            vec![Attribute::new("used", vec![]), Attribute::new("zmark", vec![])],
        );
        visit_type(&ctx, &mut Expand, &mut t);
        let Type::Int(_, attrs) = &t else { unreachable!() };
        let names: Vec<&str> = attrs.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["aconst", "used", "zmark"]);
    }

    #[test]
    fn replacing_a_formal_reinstalls_the_parameter_list() {
        struct Widen;
        impl IrVisitor for Widen {
            fn vvdec(&mut self, v: &VarRef) -> Visit<VarRef> {
                if v.borrow().name == "x" {
                    let copy = VarInfo {
                        name: "x".into(),
                        ty: Type::Int(IKind::ILong, AttrList::new()),
                        attrs: AttrList::new(),
                        storage: Storage::NoStorage,
                        glob: false,
                        decl: Location::none(),
                        vid: v.borrow().vid,
                        addrof: false,
                        referenced: false,
                    };
                    Visit::ChangeTo(Shared::new(copy))
                } else {
                    Visit::DoChildren
                }
            }
        }
        let ctx = Context::default();
        let (mut file, old_x) = sample_file();
        visit_file(&ctx, &mut Widen, &mut file);
        let Global::Fun(fd, _) = &file.globals[1] else {
            unreachable!()
        };
        assert!(!Shared::ptr_eq(&fd.formals[0], &old_x));
        let decl = fd.decl.borrow();
        let Type::Fun(_, Some(params), _, _) = &decl.ty else {
            panic!("function type lost")
        };
        assert_eq!(params[0].ty, Type::Int(IKind::ILong, AttrList::new()));
    }

    #[test]
    fn globals_can_be_spliced_away() {
        struct DropDecls;
        impl IrVisitor for DropDecls {
            fn vglob(&mut self, g: &Global) -> Visit<Vec<Global>> {
                match g {
                    Global::VarDecl(..) => Visit::ChangeTo(Vec::new()),
                    _ => Visit::DoChildren,
                }
            }
        }
        let ctx = Context::default();
        let (mut file, _) = sample_file();
        file.globals.insert(
            0,
            Global::VarDecl(make_global_var("ext", int_ty()), Location::none()),
        );
        visit_file(&ctx, &mut DropDecls, &mut file);
        assert_eq!(file.globals.len(), 2);
        assert!(matches!(file.globals[0], Global::Var(..)));
        assert!(matches!(file.globals[1], Global::Fun(..)));
    }

    #[test]
    fn change_do_children_post_runs_after_children() {
        struct PostWrap;
        impl IrVisitor for PostWrap {
            fn vexpr(&mut self, e: &Expr) -> Visit<Expr> {
                match e {
                    // rewrite 1 -> 2 in children, then negate the sum
                    Expr::BinOp(..) => Visit::ChangeDoChildrenPost(
                        e.clone(),
                        Box::new(|e: &mut Expr| {
                            *e = Expr::UnOp(
                                UnOp::Neg,
                                Box::new(e.clone()),
                                Type::Int(IKind::IInt, AttrList::new()),
                            );
                        }),
                    ),
                    _ if *e == integer(1) => Visit::ChangeTo(integer(2)),
                    _ => Visit::DoChildren,
                }
            }
        }
        let ctx = Context::default();
        let mut e = Expr::BinOp(
            BinOp::PlusA,
            Box::new(integer(1)),
            Box::new(integer(1)),
            int_ty(),
        );
        visit_expr(&ctx, &mut PostWrap, &mut e);
        let Expr::UnOp(UnOp::Neg, inner, _) = &e else {
            panic!("post hook did not wrap the result")
        };
        let Expr::BinOp(_, l, r, _) = &**inner else {
            panic!("binop lost")
        };
        assert_eq!(**l, integer(2));
        assert_eq!(**r, integer(2));
    }
}
