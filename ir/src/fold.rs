//! Compile-time evaluation of constant expressions.
//!
//! Folding follows C arithmetic on the IR's 64-bit constants: additive
//! and multiplicative operators wrap in 64 bits, shifts pick arithmetic
//! or logical form from the operand kind, comparisons are kind-aware,
//! and an explicit cast to an integer kind truncates to that kind's
//! width. Two operands only combine when they carry the same kind.

use crate::ast::support::{
    char_const_to_int, integer, integral_kind, is_integer, is_pointer_type, is_signed_kind,
    kinteger64, type_of, unroll_type,
};
use crate::ast::{BinOp, Constant, Expr, Type, UnOp};
use crate::context::Context;
use crate::layout::{align_of, bits_size_of};

/// Rewrites constant sub-expressions bottom-up. With `machdep` set,
/// `sizeof` and `alignof` are resolved through the layout engine;
/// otherwise they stay symbolic.
pub fn const_fold(ctx: &Context, machdep: bool, e: &Expr) -> Expr {
    match e {
        Expr::BinOp(op, e1, e2, t) => fold_binop(ctx, machdep, *op, e1, e2, t),
        Expr::UnOp(op, e1, t) => {
            let e1 = const_fold(ctx, machdep, e1);
            if let Some(tk) = integral_kind(t)
                && let Expr::Const(Constant::Int64(i, _, _)) = mk_int(ctx, e1.clone())
            {
                match op {
                    UnOp::Neg => return kinteger64(ctx, tk, i.wrapping_neg()),
                    UnOp::BNot => return kinteger64(ctx, tk, !i),
                    UnOp::LNot => {}
                }
            }
            Expr::UnOp(*op, Box::new(e1), t.clone())
        }
        Expr::CastE(t, inner) => {
            let inner = const_fold(ctx, machdep, inner);
            match (&inner, unroll_type(t)) {
                (Expr::Const(Constant::Int64(i, _, _)), Type::Int(nk, attrs))
                    if attrs.is_empty() =>
                {
                    kinteger64(ctx, nk, *i)
                }
                _ => Expr::CastE(t.clone(), Box::new(inner)),
            }
        }
        Expr::SizeOf(t) if machdep => match bits_size_of(ctx, t) {
            Ok(bits) => integer((bits / 8) as i64),
            Err(_) => e.clone(),
        },
        Expr::SizeOfE(inner) if machdep => {
            const_fold(ctx, machdep, &Expr::SizeOf(type_of(inner)))
        }
        Expr::AlignOf(t) if machdep => match align_of(ctx, t) {
            Ok(a) => integer(a as i64),
            Err(_) => e.clone(),
        },
        Expr::AlignOfE(inner) if machdep => {
            const_fold(ctx, machdep, &Expr::AlignOf(type_of(inner)))
        }
        // Character constants are promoted to int.
        Expr::Const(Constant::Chr(c)) => Expr::Const(char_const_to_int(*c)),
        _ => e.clone(),
    }
}

/// Strips integer-valued wrappers so constants can combine: character
/// constants become ints, and casts to attribute-free integer types
/// truncate into the cast kind.
fn mk_int(ctx: &Context, e: Expr) -> Expr {
    match e {
        Expr::Const(Constant::Chr(c)) => Expr::Const(char_const_to_int(c)),
        Expr::CastE(Type::Int(ik, ref attrs), ref inner) if attrs.is_empty() => {
            match mk_int(ctx, (**inner).clone()) {
                Expr::Const(Constant::Int64(i, _, _)) => kinteger64(ctx, ik, i),
                _ => e,
            }
        }
        _ => e,
    }
}

fn fold_binop(
    ctx: &Context,
    machdep: bool,
    op: BinOp,
    e1: &Expr,
    e2: &Expr,
    tres: &Type,
) -> Expr {
    use BinOp::*;
    let e1 = const_fold(ctx, machdep, e1);
    let e2 = const_fold(ctx, machdep, e2);
    let rebuild =
        |a: Expr, b: Expr| Expr::BinOp(op, Box::new(a), Box::new(b), tres.clone());

    let Some(tk) = integral_kind(tres) else {
        // Pointer-valued (or otherwise non-integral) results only
        // simplify against a constant zero.
        if matches!(op, PlusA | PlusPI | IndexPI | MinusA | MinusPI)
            && is_integer(&e2) == Some(0)
        {
            return e1;
        }
        return rebuild(e1, e2);
    };

    let a = mk_int(ctx, e1.clone());
    let b = mk_int(ctx, e2.clone());

    // x + 0, 0 + x, x - 0 keep the other operand.
    if matches!(op, PlusA) && is_int_zero(&a) {
        return b;
    }
    if matches!(op, PlusA | PlusPI | IndexPI | MinusA | MinusPI) && is_int_zero(&b) {
        return a;
    }

    let (Expr::Const(Constant::Int64(i1, ik1, _)), Expr::Const(Constant::Int64(i2, ik2, _))) =
        (&a, &b)
    else {
        return rebuild(e1, e2);
    };
    let (i1, ik1, i2, ik2) = (*i1, *ik1, *i2, *ik2);
    let combine = |v: i64| Expr::Const(Constant::Int64(v, tk, None));

    match op {
        PlusA if ik1 == ik2 => combine(i1.wrapping_add(i2)),
        MinusA if ik1 == ik2 => combine(i1.wrapping_sub(i2)),
        Mult if ik1 == ik2 => combine(i1.wrapping_mul(i2)),
        Div if ik1 == ik2 => match i1.checked_div(i2) {
            Some(v) => combine(v),
            None => rebuild(e1, e2),
        },
        Mod if ik1 == ik2 => match i1.checked_rem(i2) {
            Some(v) => combine(v),
            None => rebuild(e1, e2),
        },
        BAnd if ik1 == ik2 => combine(i1 & i2),
        BOr if ik1 == ik2 => combine(i1 | i2),
        BXor if ik1 == ik2 => combine(i1 ^ i2),
        Shiftlt if (0..64).contains(&i2) => combine(i1.wrapping_shl(i2 as u32)),
        Shiftrt if (0..64).contains(&i2) => {
            if is_signed_kind(ctx, ik1) {
                combine(i1.wrapping_shr(i2 as u32))
            } else {
                combine(((i1 as u64) >> i2) as i64)
            }
        }
        Lt | Gt | Le | Ge | Eq | Ne if ik1 == ik2 => {
            let res = if is_signed_kind(ctx, ik1) {
                compare(op, i1, i2)
            } else {
                compare(op, i1 as u64, i2 as u64)
            };
            integer(i64::from(res))
        }
        _ => rebuild(e1, e2),
    }
}

fn is_int_zero(e: &Expr) -> bool {
    matches!(e, Expr::Const(Constant::Int64(0, _, _)))
}

fn compare<T: Ord>(op: BinOp, a: T, b: T) -> bool {
    match op {
        BinOp::Lt => a < b,
        BinOp::Gt => a > b,
        BinOp::Le => a <= b,
        BinOp::Ge => a >= b,
        BinOp::Eq => a == b,
        BinOp::Ne => a != b,
        _ => unreachable!(),
    }
}

/// `e + k`, choosing pointer or arithmetic addition from the type of
/// `e`, pre-folded without machine dependence.
pub fn increm(ctx: &Context, e: &Expr, k: i32) -> Expr {
    let et = type_of(e);
    let op = if is_pointer_type(&et) {
        BinOp::PlusPI
    } else {
        BinOp::PlusA
    };
    const_fold(
        ctx,
        false,
        &Expr::BinOp(op, Box::new(e.clone()), Box::new(integer(i64::from(k))), et),
    )
}
