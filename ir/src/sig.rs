//! Canonical type signatures.
//!
//! A [TypeSig] is a sharing-free encoding of a type: typedef chains are
//! unrolled, composite and enum references are replaced by their tag
//! names, and array lengths are folded to integers. Structural equality
//! on signatures is the type-equivalence relation used by the call-site
//! cast emitter and the folder — two types are equivalent exactly when
//! their signatures are equal, modulo typedefs and attribute order
//! (attribute lists are sorted, so order never differs).

use crate::ast::attrs::{add_attributes, AttrList};
use crate::ast::support::{is_integer, set_type_attrs, type_attrs};
use crate::ast::Type;
use crate::context::Context;
use crate::fold::const_fold;

/// A type with identity references flattened away.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeSig {
    /// A scalar: void, integer, float or va_list, attributes included.
    Base(Type),
    Ptr(Box<TypeSig>, AttrList),
    /// Array with its folded length; `None` when the length is absent
    /// or not a compile-time constant.
    Array(Box<TypeSig>, Option<i64>, AttrList),
    Comp {
        is_struct: bool,
        name: String,
        attrs: AttrList,
    },
    Enum { name: String, attrs: AttrList },
    Fun(Box<TypeSig>, Option<Vec<TypeSig>>, bool, AttrList),
}

/// The signature of a type.
pub fn type_sig(ctx: &Context, t: &Type) -> TypeSig {
    type_sig_with_attrs(ctx, &|a| a, t)
}

/// The signature of a type, post-processing every attribute list with
/// `f` (used by clients that compare modulo certain attributes).
pub fn type_sig_with_attrs(
    ctx: &Context,
    f: &dyn Fn(AttrList) -> AttrList,
    t: &Type,
) -> TypeSig {
    match t {
        Type::Void(a) | Type::Int(_, a) | Type::Float(_, a) | Type::VaList(a) => {
            TypeSig::Base(set_type_attrs(t.clone(), f(a.clone())))
        }
        Type::Ptr(base, a) => TypeSig::Ptr(
            Box::new(type_sig_with_attrs(ctx, f, base)),
            f(a.clone()),
        ),
        Type::Array(base, len, a) => {
            let folded = len
                .as_ref()
                .and_then(|l| is_integer(&const_fold(ctx, true, l)));
            TypeSig::Array(
                Box::new(type_sig_with_attrs(ctx, f, base)),
                folded,
                f(a.clone()),
            )
        }
        Type::Fun(rt, params, variadic, a) => TypeSig::Fun(
            Box::new(type_sig_with_attrs(ctx, f, rt)),
            params.as_ref().map(|ps| {
                ps.iter()
                    .map(|p| type_sig_with_attrs(ctx, f, &p.ty))
                    .collect()
            }),
            *variadic,
            f(a.clone()),
        ),
        // Unroll the typedef, folding the reference's attributes into
        // the signature of the underlying type.
        Type::Named(ti, a) => {
            let under = type_sig_with_attrs(ctx, f, &ti.borrow().ty);
            type_sig_add_attrs(f(a.clone()), under)
        }
        Type::Comp(ci, a) => {
            let cb = ci.borrow();
            TypeSig::Comp {
                is_struct: cb.is_struct,
                name: cb.name.clone(),
                attrs: f(add_attributes(a.clone(), cb.attrs.clone())),
            }
        }
        Type::Enum(ei, a) => {
            let eb = ei.borrow();
            TypeSig::Enum {
                name: eb.name.clone(),
                attrs: f(add_attributes(a.clone(), eb.attrs.clone())),
            }
        }
    }
}

/// Merges attributes into the outermost attribute list of a signature.
pub fn type_sig_add_attrs(add: AttrList, sig: TypeSig) -> TypeSig {
    if add.is_empty() {
        return sig;
    }
    match sig {
        TypeSig::Base(t) => {
            let merged = add_attributes(add, type_attrs(&t).clone());
            TypeSig::Base(set_type_attrs(t, merged))
        }
        TypeSig::Ptr(b, a) => TypeSig::Ptr(b, add_attributes(add, a)),
        TypeSig::Array(b, l, a) => TypeSig::Array(b, l, add_attributes(add, a)),
        TypeSig::Comp {
            is_struct,
            name,
            attrs,
        } => TypeSig::Comp {
            is_struct,
            name,
            attrs: add_attributes(add, attrs),
        },
        TypeSig::Enum { name, attrs } => TypeSig::Enum {
            name,
            attrs: add_attributes(add, attrs),
        },
        TypeSig::Fun(rt, ps, v, a) => TypeSig::Fun(rt, ps, v, add_attributes(add, a)),
    }
}
