//! Control-flow preparation and successor/predecessor computation.
//!
//! [compute_cfg_info] numbers every statement of a function and links
//! successor/predecessor edges. It only understands the reduced
//! statement language: `Break`, `Continue` and `Switch` must have been
//! rewritten into `If`/`Goto`/labels first by [prepare_cfg], and
//! reaching one of them during edge computation is a caller error.

use crate::alpha::{new_alpha_name, register_alpha_name, AlphaTable};
use crate::ast::attrs::AttrList;
use crate::ast::support::{mk_block, mk_empty_stmt, mk_stmt};
use crate::ast::{
    Block, Expr, FunDec, IKind, Label, Shared, StmtKind, StmtRef, Type,
};
use crate::context::Context;

/// Rewrites `Break`, `Continue` and `Switch` (and `Case`/`Default`
/// labels) into gotos and plain labels, so [compute_cfg_info] can run.
///
/// Every `Switch` becomes a chain of `if (e == case) goto case_label;`
/// tests, a goto to the default (or past the body), the original body,
/// and a labeled break target. Every `Loop` gains labeled
/// `while_continue`/`while_break` anchor statements. Fresh label names
/// are drawn from the function's label alpha table.
pub fn prepare_cfg(ctx: &Context, fd: &mut FunDec) {
    let mut table = AlphaTable::new();
    register_labels(&fd.body, &mut table);
    let stmts = fd.body.stmts.clone();
    for s in &stmts {
        xform_stmt(ctx, s, None, None, &mut table);
    }
}

fn register_labels(b: &Block, table: &mut AlphaTable) {
    for s in &b.stmts {
        let sb = s.borrow();
        for l in &sb.labels {
            if let Label::Name(name, _, _) = l {
                register_alpha_name(table, name);
            }
        }
        match &sb.kind {
            StmtKind::If(_, b1, b2, _) => {
                register_labels(b1, table);
                register_labels(b2, table);
            }
            StmtKind::Switch(_, body, _, _)
            | StmtKind::Loop(body, _)
            | StmtKind::Block(body) => register_labels(body, table),
            _ => {}
        }
    }
}

/// Makes an empty statement carrying one fresh synthetic label.
fn labeled_anchor(
    ctx: &Context,
    table: &mut AlphaTable,
    base: &str,
    loc: &crate::ast::Location,
) -> StmtRef {
    let anchor = mk_empty_stmt();
    anchor.borrow_mut().labels.push(Label::Name(
        new_alpha_name(ctx, table, base),
        loc.clone(),
        false,
    ));
    anchor
}

fn xform_stmt(
    ctx: &Context,
    s: &StmtRef,
    break_dst: Option<&StmtRef>,
    cont_dst: Option<&StmtRef>,
    table: &mut AlphaTable,
) {
    // Case and default labels become plain labels; the switch that
    // owned them reads their values before descending into its body.
    {
        let mut sb = s.borrow_mut();
        for l in &mut sb.labels {
            match l {
                Label::Case(_, loc) => {
                    *l = Label::Name(new_alpha_name(ctx, table, "case"), loc.clone(), false);
                }
                Label::Default(loc) => {
                    *l = Label::Name(
                        new_alpha_name(ctx, table, "switch_default"),
                        loc.clone(),
                        false,
                    );
                }
                Label::Name(..) => {}
            }
        }
    }

    enum Tag {
        Done,
        Break(crate::ast::Location),
        Continue(crate::ast::Location),
        If,
        Block,
        Loop,
        Switch,
    }
    let tag = {
        let sb = s.borrow();
        match &sb.kind {
            StmtKind::Instr(_) | StmtKind::Return(..) | StmtKind::Goto(..) => Tag::Done,
            StmtKind::Break(l) => Tag::Break(l.clone()),
            StmtKind::Continue(l) => Tag::Continue(l.clone()),
            StmtKind::If(..) => Tag::If,
            StmtKind::Block(_) => Tag::Block,
            StmtKind::Loop(..) => Tag::Loop,
            StmtKind::Switch(..) => Tag::Switch,
        }
    };

    match tag {
        Tag::Done => {}
        Tag::Break(loc) => {
            let dst = break_dst.expect("break outside of a loop or switch");
            s.borrow_mut().kind = StmtKind::Goto(dst.downgrade(), loc);
        }
        Tag::Continue(loc) => {
            let dst = cont_dst.expect("continue outside of a loop");
            s.borrow_mut().kind = StmtKind::Goto(dst.downgrade(), loc);
        }
        Tag::If => {
            let (s1, s2) = {
                let sb = s.borrow();
                let StmtKind::If(_, b1, b2, _) = &sb.kind else {
                    unreachable!()
                };
                (b1.stmts.clone(), b2.stmts.clone())
            };
            for c in s1.iter().chain(&s2) {
                xform_stmt(ctx, c, break_dst, cont_dst, table);
            }
        }
        Tag::Block => {
            let inner = {
                let sb = s.borrow();
                let StmtKind::Block(b) = &sb.kind else {
                    unreachable!()
                };
                b.stmts.clone()
            };
            for c in &inner {
                xform_stmt(ctx, c, break_dst, cont_dst, table);
            }
        }
        Tag::Loop => {
            let (mut body, loc) = {
                let mut sb = s.borrow_mut();
                let StmtKind::Loop(b, l) = &mut sb.kind else {
                    unreachable!()
                };
                (std::mem::take(b), l.clone())
            };
            let break_stmt = labeled_anchor(ctx, table, "while_break", &loc);
            let cont_stmt = labeled_anchor(ctx, table, "while_continue", &loc);
            body.stmts.insert(0, cont_stmt.clone());
            for c in &body.stmts {
                xform_stmt(ctx, c, Some(&break_stmt), Some(&cont_stmt), table);
            }
            let inner = mk_stmt(StmtKind::Loop(body, loc));
            s.borrow_mut().kind = StmtKind::Block(mk_block(vec![inner, break_stmt]));
        }
        Tag::Switch => {
            let (expr, mut body, cases, loc) = {
                let mut sb = s.borrow_mut();
                match std::mem::replace(&mut sb.kind, StmtKind::Instr(Vec::new())) {
                    StmtKind::Switch(e, b, c, l) => (e, b, c, l),
                    _ => unreachable!(),
                }
            };
            let break_stmt = labeled_anchor(ctx, table, "switch_break", &loc);
            let mut branches: Vec<StmtRef> = Vec::new();
            let mut default_goto: Option<StmtRef> = None;
            for case in &cases {
                let cs = case
                    .upgrade()
                    .expect("switch case statement no longer exists");
                let labels = cs.borrow().labels.clone();
                for l in &labels {
                    match l {
                        Label::Case(value, cl) => {
                            let test = Expr::BinOp(
                                crate::ast::BinOp::Eq,
                                Box::new(expr.clone()),
                                Box::new(value.clone()),
                                Type::Int(IKind::IInt, AttrList::new()),
                            );
                            let goto_case =
                                mk_stmt(StmtKind::Goto(cs.downgrade(), cl.clone()));
                            branches.push(mk_stmt(StmtKind::If(
                                test,
                                mk_block(vec![goto_case]),
                                mk_block(Vec::new()),
                                cl.clone(),
                            )));
                        }
                        Label::Default(cl) => {
                            default_goto =
                                Some(mk_stmt(StmtKind::Goto(cs.downgrade(), cl.clone())));
                        }
                        Label::Name(..) => {}
                    }
                }
            }
            branches.push(default_goto.unwrap_or_else(|| {
                mk_stmt(StmtKind::Goto(break_stmt.downgrade(), loc.clone()))
            }));
            for c in &body.stmts {
                xform_stmt(ctx, c, Some(&break_stmt), cont_dst, table);
            }
            branches.push(mk_stmt(StmtKind::Block(body)));
            branches.push(break_stmt);
            s.borrow_mut().kind = StmtKind::Block(mk_block(branches));
        }
    }
}

/// Numbers every statement of the function from 0, recomputes
/// successor/predecessor edges, records one past the largest id in
/// `max_stmt_id`, and returns the statements in numbering order.
pub fn compute_cfg_info(fd: &mut FunDec) -> Vec<StmtRef> {
    let mut all = Vec::new();
    number_block(&fd.body, &mut all);
    fd.max_stmt_id = Some(all.len() as i32);
    succ_pred_stmts(&fd.body.stmts, None);
    all
}

fn number_block(b: &Block, all: &mut Vec<StmtRef>) {
    for s in &b.stmts {
        {
            let mut sb = s.borrow_mut();
            sb.sid = all.len() as i32;
            sb.succs.clear();
            sb.preds.clear();
        }
        all.push(s.clone());
        let sb = s.borrow();
        match &sb.kind {
            StmtKind::If(_, b1, b2, _) => {
                number_block(b1, all);
                number_block(b2, all);
            }
            StmtKind::Switch(_, body, _, _)
            | StmtKind::Loop(body, _)
            | StmtKind::Block(body) => number_block(body, all),
            _ => {}
        }
    }
}

/// Adds the edge `s -> t` once.
fn link(s: &StmtRef, t: &StmtRef) {
    let already = s
        .borrow()
        .succs
        .iter()
        .any(|w| w.upgrade().is_some_and(|u| Shared::ptr_eq(&u, t)));
    if already {
        return;
    }
    if Shared::ptr_eq(s, t) {
        let mut sb = s.borrow_mut();
        sb.succs.push(s.downgrade());
        sb.preds.push(s.downgrade());
    } else {
        s.borrow_mut().succs.push(t.downgrade());
        t.borrow_mut().preds.push(s.downgrade());
    }
}

fn succ_pred_stmts(stmts: &[StmtRef], next: Option<&StmtRef>) {
    for (i, s) in stmts.iter().enumerate() {
        let following = stmts.get(i + 1).or(next);
        succ_pred_stmt(s, following);
    }
}

fn succ_pred_stmt(s: &StmtRef, next: Option<&StmtRef>) {
    let sb = s.borrow();
    match &sb.kind {
        StmtKind::Instr(_) => {
            drop(sb);
            if let Some(n) = next {
                link(s, n);
            }
        }
        StmtKind::Return(..) => {}
        StmtKind::Goto(target, _) => {
            let t = target
                .upgrade()
                .expect("goto target was dropped before the CFG was computed");
            drop(sb);
            link(s, &t);
        }
        StmtKind::Break(_) => panic!("break survived to the CFG; run prepare_cfg first"),
        StmtKind::Continue(_) => {
            panic!("continue survived to the CFG; run prepare_cfg first")
        }
        StmtKind::Switch(..) => {
            panic!("switch survived to the CFG; run prepare_cfg first")
        }
        StmtKind::If(_, b1, b2, _) => {
            let (s1, s2) = (b1.stmts.clone(), b2.stmts.clone());
            drop(sb);
            succ_pred_stmts(&s1, next);
            succ_pred_stmts(&s2, next);
            // then-branch head first, falling through when a branch is
            // empty
            if let Some(t) = s1.first().or(next) {
                link(s, t);
            }
            if let Some(t) = s2.first().or(next) {
                link(s, t);
            }
        }
        StmtKind::Loop(body, _) => {
            let inner = body.stmts.clone();
            drop(sb);
            match inner.first() {
                Some(head) => {
                    succ_pred_stmts(&inner, Some(head));
                    link(s, head);
                }
                // An empty `while (1);` is its own successor.
                None => link(s, &s.clone()),
            }
        }
        StmtKind::Block(body) => {
            let inner = body.stmts.clone();
            drop(sb);
            succ_pred_stmts(&inner, next);
            if let Some(t) = inner.first().or(next) {
                link(s, t);
            }
        }
    }
}
