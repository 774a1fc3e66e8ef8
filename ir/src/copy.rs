//! Deep cloning of function definitions.
//!
//! The clone owns fresh [VarInfo] descriptors for the function
//! variable, formals and locals, and fresh statement cells for the
//! whole body. Two tables drive the rewrite: old variable → new
//! handle (applied by a visitor over the clone) and old statement →
//! new handle (applied by a patch pass over `Goto` targets and
//! `Switch` case lists). Both key by handle address, which keeps the
//! copier usable before CFG numbering, when every statement id is
//! still -1.

use std::collections::HashMap;

use crate::ast::support::make_global_var;
use crate::ast::*;
use crate::context::Context;
use crate::visit::{visit_function, IrVisitor, Visit};

/// Clones `fd` under a new name. Every local, formal and statement in
/// the result is a fresh object; all internal references point inside
/// the clone. Unnamed formals are given names `arg0`, `arg1`, …
pub fn copy_function(ctx: &Context, fd: &FunDec, new_name: &str) -> FunDec {
    // Fresh function variable under the new name.
    let decl = {
        let old = fd.decl.borrow();
        let fresh = make_global_var(new_name, old.ty.clone());
        {
            let mut fb = fresh.borrow_mut();
            fb.attrs = old.attrs.clone();
            fb.storage = old.storage;
            fb.decl = old.decl.clone();
        }
        fresh
    };

    // Fresh formals and locals, keyed by the old handle's address.
    // References to the old function variable are redirected too, so a
    // recursive call inside the clone calls the clone.
    let mut vmap: HashMap<usize, VarRef> = HashMap::new();
    vmap.insert(fd.decl.addr(), decl.clone());
    let mut copy_var = |old: &VarRef, name: Option<String>| -> VarRef {
        let ob = old.borrow();
        let fresh = Shared::new(VarInfo {
            name: name.unwrap_or_else(|| ob.name.clone()),
            ty: ob.ty.clone(),
            attrs: ob.attrs.clone(),
            storage: ob.storage,
            glob: ob.glob,
            decl: ob.decl.clone(),
            vid: ob.vid,
            addrof: ob.addrof,
            referenced: ob.referenced,
        });
        vmap.insert(old.addr(), fresh.clone());
        fresh
    };
    let formals: Vec<VarRef> = fd
        .formals
        .iter()
        .enumerate()
        .map(|(i, old)| {
            let name = if old.borrow().name.is_empty() {
                Some(format!("arg{i}"))
            } else {
                None
            };
            copy_var(old, name)
        })
        .collect();
    let locals: Vec<VarRef> = fd.locals.iter().map(|old| copy_var(old, None)).collect();

    // Fresh statements, remembering old address → new handle.
    let mut smap: HashMap<usize, StmtRef> = HashMap::new();
    let body = copy_block(&fd.body, &mut smap);

    let mut clone = FunDec {
        decl,
        formals,
        locals,
        max_local_id: fd.max_local_id,
        body,
        inline: fd.inline,
        max_stmt_id: fd.max_stmt_id,
    };

    // Redirect variable uses into the clone.
    struct Subst<'a> {
        vmap: &'a HashMap<usize, VarRef>,
    }
    impl IrVisitor for Subst<'_> {
        fn vvrbl(&mut self, v: &VarRef) -> Visit<VarRef> {
            match self.vmap.get(&v.addr()) {
                Some(fresh) => Visit::ChangeTo(fresh.clone()),
                None => Visit::SkipChildren,
            }
        }
    }
    visit_function(ctx, &mut Subst { vmap: &vmap }, &mut clone);

    // Re-point gotos and switch case lists at the cloned statements.
    patch_block(&clone.body, &smap);

    // Re-install the formals so the function type picks up the clone's
    // parameter names.
    let formals = clone.formals.clone();
    clone.set_formals(formals);
    clone
}

fn copy_block(b: &Block, smap: &mut HashMap<usize, StmtRef>) -> Block {
    Block {
        attrs: b.attrs.clone(),
        stmts: b.stmts.iter().map(|s| copy_stmt(s, smap)).collect(),
    }
}

fn copy_stmt(s: &StmtRef, smap: &mut HashMap<usize, StmtRef>) -> StmtRef {
    let sb = s.borrow();
    // Goto targets and case lists still point at the original
    // statements here; the patch pass rewrites them once the whole
    // body is cloned.
    let kind = match &sb.kind {
        StmtKind::Instr(is) => StmtKind::Instr(is.clone()),
        StmtKind::Return(e, l) => StmtKind::Return(e.clone(), l.clone()),
        StmtKind::Goto(t, l) => StmtKind::Goto(t.clone(), l.clone()),
        StmtKind::Break(l) => StmtKind::Break(l.clone()),
        StmtKind::Continue(l) => StmtKind::Continue(l.clone()),
        StmtKind::If(c, b1, b2, l) => StmtKind::If(
            c.clone(),
            copy_block(b1, smap),
            copy_block(b2, smap),
            l.clone(),
        ),
        StmtKind::Switch(e, b, cases, l) => StmtKind::Switch(
            e.clone(),
            copy_block(b, smap),
            cases.clone(),
            l.clone(),
        ),
        StmtKind::Loop(b, l) => StmtKind::Loop(copy_block(b, smap), l.clone()),
        StmtKind::Block(b) => StmtKind::Block(copy_block(b, smap)),
    };
    let fresh = Shared::new(Stmt {
        labels: sb.labels.clone(),
        kind,
        sid: sb.sid,
        // Edges belong to the CFG pass; the clone starts without them.
        succs: Vec::new(),
        preds: Vec::new(),
    });
    smap.insert(s.addr(), fresh.clone());
    fresh
}

fn patch_block(b: &Block, smap: &HashMap<usize, StmtRef>) {
    for s in &b.stmts {
        patch_stmt(s, smap);
    }
}

fn patch_ref(w: &mut StmtWeak, smap: &HashMap<usize, StmtRef>) {
    let old = w
        .upgrade()
        .expect("statement reference dangling during function copy");
    let fresh = smap
        .get(&old.addr())
        .expect("statement reference points outside the copied function");
    *w = fresh.downgrade();
}

fn patch_stmt(s: &StmtRef, smap: &HashMap<usize, StmtRef>) {
    let mut sb = s.borrow_mut();
    match &mut sb.kind {
        StmtKind::Goto(target, _) => patch_ref(target, smap),
        StmtKind::Switch(_, body, cases, _) => {
            for c in cases {
                patch_ref(c, smap);
            }
            patch_block(body, smap);
        }
        StmtKind::If(_, b1, b2, _) => {
            patch_block(b1, smap);
            patch_block(b2, smap);
        }
        StmtKind::Loop(body, _) | StmtKind::Block(body) => patch_block(body, smap),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::attrs::AttrList;
    use crate::ast::support::*;

    fn int_ty() -> Type {
        Type::Int(IKind::IInt, AttrList::new())
    }

    /// `int f(int x) { again: x = x + 1; goto again; }`
    fn looping_function() -> (FunDec, VarRef, StmtRef) {
        let mut f = empty_function("f");
        f.set_function_type(Type::Fun(
            Box::new(int_ty()),
            Some(Vec::new()),
            false,
            AttrList::new(),
        ));
        let x = f.make_formal_var("$", "x", int_ty());
        let step = mk_stmt_one_instr(Instr::Set(
            var(&x),
            Expr::BinOp(
                BinOp::PlusA,
                Box::new(Expr::Lval(var(&x))),
                Box::new(integer(1)),
                int_ty(),
            ),
            Location::none(),
        ));
        step.borrow_mut()
            .labels
            .push(Label::Name("again".into(), Location::none(), true));
        let jump = mk_stmt(StmtKind::Goto(step.downgrade(), Location::none()));
        f.body.stmts = vec![step.clone(), jump];
        (f, x, step)
    }

    #[test]
    fn the_clone_carries_the_new_name() {
        let ctx = Context::default();
        let (f, _, _) = looping_function();
        let g = copy_function(&ctx, &f, "g");
        assert_eq!(g.decl.borrow().name, "g");
        assert!(!Shared::ptr_eq(&g.decl, &f.decl));
    }

    #[test]
    fn locals_and_formals_are_fresh_and_uses_rewritten() {
        let ctx = Context::default();
        let (mut f, x, _) = looping_function();
        let t = f.make_local_var("t", int_ty(), true);
        let g = copy_function(&ctx, &f, "g");
        assert!(!Shared::ptr_eq(&g.formals[0], &x));
        assert!(!Shared::ptr_eq(&g.locals[0], &t));
        assert_eq!(g.formals[0].borrow().vid, x.borrow().vid);
        // the body of the clone reads the cloned formal, not the
        // original
        let sb = g.body.stmts[0].borrow();
        let StmtKind::Instr(is) = &sb.kind else {
            panic!("first statement lost")
        };
        let Instr::Set((LHost::Var(dst), _), rhs, _) = &is[0] else {
            panic!("assignment lost")
        };
        assert!(Shared::ptr_eq(dst, &g.formals[0]));
        let Expr::BinOp(_, lhs, _, _) = rhs else {
            panic!("rhs lost")
        };
        assert_eq!(**lhs, Expr::Lval(var(&g.formals[0])));
    }

    #[test]
    fn gotos_point_inside_the_clone() {
        let ctx = Context::default();
        let (f, _, original_target) = looping_function();
        let g = copy_function(&ctx, &f, "g");
        let cloned_target = g.body.stmts[0].clone();
        assert!(!Shared::ptr_eq(&cloned_target, &original_target));
        let jb = g.body.stmts[1].borrow();
        let StmtKind::Goto(t, _) = &jb.kind else {
            panic!("goto lost")
        };
        assert!(Shared::ptr_eq(&t.upgrade().unwrap(), &cloned_target));
    }

    #[test]
    fn switch_case_lists_are_patched() {
        let ctx = Context::default();
        let mut f = empty_function("f");
        let x = f.make_formal_var("$", "x", int_ty());
        let case1 = mk_stmt_one_instr(Instr::Set(var(&x), integer(1), Location::none()));
        case1
            .borrow_mut()
            .labels
            .push(Label::Case(integer(1), Location::none()));
        let sw = mk_stmt(StmtKind::Switch(
            Expr::Lval(var(&x)),
            mk_block(vec![case1.clone()]),
            vec![case1.downgrade()],
            Location::none(),
        ));
        f.body.stmts = vec![sw];
        let g = copy_function(&ctx, &f, "g");
        let sb = g.body.stmts[0].borrow();
        let StmtKind::Switch(_, body, cases, _) = &sb.kind else {
            panic!("switch lost")
        };
        let patched = cases[0].upgrade().unwrap();
        assert!(!Shared::ptr_eq(&patched, &case1));
        assert!(Shared::ptr_eq(&patched, &body.stmts[0]));
    }

    #[test]
    fn unnamed_formals_get_argument_names() {
        let ctx = Context::default();
        let mut f = empty_function("f");
        f.make_formal_var("$", "", int_ty());
        f.make_formal_var("$", "", int_ty());
        let g = copy_function(&ctx, &f, "g");
        let names: Vec<String> = g.formals.iter().map(|v| v.borrow().name.clone()).collect();
        assert_eq!(names, ["arg0", "arg1"]);
        let decl = g.decl.borrow();
        let Type::Fun(_, Some(params), _, _) = &decl.ty else {
            panic!("function type lost")
        };
        assert_eq!(params[0].name, "arg0");
    }

    #[test]
    fn the_original_is_untouched() {
        let ctx = Context::default();
        let (f, x, step) = looping_function();
        let before_stmts = f.body.stmts.clone();
        let _ = copy_function(&ctx, &f, "g");
        assert!(Shared::ptr_eq(&f.body.stmts[0], &before_stmts[0]));
        assert!(Shared::ptr_eq(&f.formals[0], &x));
        let sb = step.borrow();
        let StmtKind::Instr(is) = &sb.kind else {
            panic!()
        };
        let Instr::Set((LHost::Var(dst), _), _, _) = &is[0] else {
            panic!()
        };
        assert!(Shared::ptr_eq(dst, &x));
    }
}
