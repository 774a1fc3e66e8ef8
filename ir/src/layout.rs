//! Target-dependent type layout: alignments, sizes in bits, and field
//! offsets, under the GCC and MSVC packing and bitfield rules.

use thiserror::Error;

use crate::ast::support::{
    bytes_size_of_float, bytes_size_of_int, comp_full_name, integer, is_integer, unroll_type,
};
use crate::ast::{CompRef, Expr, FieldInfo, IKind, Offset, Shared, Type};
use crate::context::Context;
use crate::fold::const_fold;

/// Why a size could not be computed. `size_of` recovers from these by
/// returning a symbolic `sizeof`; `bits_offset` and the folder
/// propagate them.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// An abstract type: a composite without a definition, or an array
    /// of unknown length.
    #[error("size of incomplete type {0}")]
    Incomplete(String),
    /// An array length (or index) that does not fold to an integer
    /// constant.
    #[error("array length is not a compile-time constant")]
    NonConstantLength,
    /// A type with no size at all.
    #[error("type {0} has no size")]
    NoSize(String),
}

/// Rounds `bits` up to a multiple of `align` (also in bits).
fn add_trailing(bits: u64, align: u64) -> u64 {
    bits.div_ceil(align) * align
}

/// Byte alignment of a type.
pub fn align_of(ctx: &Context, t: &Type) -> Result<u64, LayoutError> {
    let m = &ctx.machine;
    match t {
        Type::Int(k, _) => Ok(match k {
            IKind::IChar | IKind::ISChar | IKind::IUChar => 1,
            IKind::IShort | IKind::IUShort => m.size_short,
            IKind::IInt | IKind::IUInt => m.size_int,
            IKind::ILong | IKind::IULong => m.size_long,
            IKind::ILongLong | IKind::IULongLong => m.align_longlong,
        }),
        Type::Enum(_, _) => Ok(m.size_enum),
        Type::Float(fk, _) => Ok(match fk {
            crate::ast::FKind::FFloat => m.size_float,
            crate::ast::FKind::FDouble => m.align_double,
            crate::ast::FKind::FLongDouble => m.align_longdouble,
        }),
        Type::Ptr(_, _) => Ok(m.size_ptr),
        Type::VaList(_) => Ok(m.size_ptr),
        Type::Named(ti, _) => align_of(ctx, &ti.borrow().ty),
        Type::Array(base, _, _) => align_of(ctx, base),
        Type::Comp(ci, _) => align_of_comp(ctx, ci),
        Type::Void(_) => Err(LayoutError::NoSize("void".into())),
        Type::Fun(..) => Err(LayoutError::NoSize("function".into())),
    }
}

/// Maximum alignment over the fields that take part in alignment.
/// Zero-width bitfields are skipped: always under GCC, and under MSVC
/// only when the previous member was not a bitfield.
fn align_of_comp(ctx: &Context, ci: &CompRef) -> Result<u64, LayoutError> {
    let cb = ci.borrow();
    let mut max_align = 1;
    let mut prev_bitfield = false;
    for f in &cb.fields {
        let fb = f.borrow();
        let skip = match fb.bitfield {
            Some(0) => {
                if ctx.msvc {
                    !prev_bitfield
                } else {
                    true
                }
            }
            _ => false,
        };
        if !skip {
            max_align = max_align.max(align_of(ctx, &fb.ty)?);
        }
        prev_bitfield = fb.bitfield.is_some();
    }
    Ok(max_align)
}

/// State threaded through field placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OffsetAcc {
    /// First bit not yet consumed.
    pub first_free: u64,
    /// Start bit of the most recently placed field.
    pub last_start: u64,
    /// Width in bits of the most recently placed field.
    pub last_width: u64,
    /// Open bitfield pack (MSVC only): start bit, storage kind, and
    /// storage width in bits.
    pub pack: Option<(u64, IKind, u64)>,
}

impl OffsetAcc {
    pub const START: OffsetAcc = OffsetAcc {
        first_free: 0,
        last_start: 0,
        last_width: 0,
        pack: None,
    };
}

/// Advances past an open pack. A pack in which nothing was placed
/// closes for free.
fn close_pack(acc: OffsetAcc) -> OffsetAcc {
    match acc.pack {
        Some((start, _, width)) => {
            let first_free = if acc.first_free == start {
                start
            } else {
                start + width
            };
            OffsetAcc {
                first_free,
                pack: None,
                ..acc
            }
        }
        None => acc,
    }
}

/// The storage kind of a bitfield member.
fn bitfield_kind(fi: &FieldInfo, t: &Type) -> IKind {
    match t {
        Type::Int(k, _) => *k,
        Type::Enum(_, _) => IKind::IInt,
        _ => panic!("bitfield `{}` has non-integer type", fi.name),
    }
}

/// Places one field after the fields already accounted for in `acc`,
/// following the active dialect's rules.
pub fn offset_of_field_acc(
    ctx: &Context,
    fi: &FieldInfo,
    acc: OffsetAcc,
) -> Result<OffsetAcc, LayoutError> {
    if ctx.msvc {
        offset_of_field_msvc(ctx, fi, acc)
    } else {
        offset_of_field_gcc(ctx, fi, acc)
    }
}

/// GCC placement: bitfields pack at the next free bit unless the field
/// would cross more alignment boundaries of its own type than the type
/// spans; zero widths and ordinary members round up to the type's
/// alignment.
fn offset_of_field_gcc(
    ctx: &Context,
    fi: &FieldInfo,
    acc: OffsetAcc,
) -> Result<OffsetAcc, LayoutError> {
    let ft = unroll_type(&fi.ty);
    let falign = 8 * align_of(ctx, &ft)?;
    let fbits = bits_size_of(ctx, &ft)?;
    match fi.bitfield {
        Some(0) => {
            let first_free = add_trailing(acc.first_free, falign);
            Ok(OffsetAcc {
                first_free,
                last_start: first_free,
                last_width: 0,
                pack: None,
            })
        }
        Some(w) => {
            let w = u64::from(w);
            let crossed =
                (acc.first_free + w).div_ceil(falign) - acc.first_free / falign;
            let start = if crossed > fbits / falign {
                add_trailing(acc.first_free, falign)
            } else {
                acc.first_free
            };
            Ok(OffsetAcc {
                first_free: start + w,
                last_start: start,
                last_width: w,
                pack: None,
            })
        }
        None => {
            let start = add_trailing(acc.first_free, falign);
            Ok(OffsetAcc {
                first_free: start + fbits,
                last_start: start,
                last_width: fbits,
                pack: None,
            })
        }
    }
}

/// MSVC placement: consecutive bitfields of one storage width share a
/// pack; a bitfield of a different width (or an ordinary member)
/// closes the pack first, and a zero width closes the pack and opens a
/// fresh one of its own type.
fn offset_of_field_msvc(
    ctx: &Context,
    fi: &FieldInfo,
    mut acc: OffsetAcc,
) -> Result<OffsetAcc, LayoutError> {
    let ft = unroll_type(&fi.ty);
    let falign = 8 * align_of(ctx, &ft)?;
    let fbits = bits_size_of(ctx, &ft)?;
    loop {
        match (fi.bitfield, acc.pack) {
            // A zero width after a non-bitfield is dropped entirely.
            (Some(0), None) => {
                return Ok(OffsetAcc {
                    first_free: acc.first_free,
                    last_start: acc.first_free,
                    last_width: 0,
                    pack: None,
                });
            }
            // A zero width inside a pack closes it and opens a fresh,
            // empty pack of this field's type.
            (Some(0), Some(_)) => {
                acc = close_pack(acc);
                let start = add_trailing(acc.first_free, falign);
                return Ok(OffsetAcc {
                    first_free: start,
                    last_start: start,
                    last_width: 0,
                    pack: Some((start, bitfield_kind(fi, &ft), fbits)),
                });
            }
            // A bitfield of a different storage width closes the pack
            // and retries.
            (Some(_), Some((_, _, pack_width))) if pack_width != fbits => {
                acc = close_pack(acc);
            }
            // A bitfield that fits in the open pack goes there.
            (Some(w), Some((pack_start, _, pack_width))) => {
                let w = u64::from(w);
                if acc.first_free + w <= pack_start + pack_width {
                    return Ok(OffsetAcc {
                        first_free: acc.first_free + w,
                        last_start: acc.first_free,
                        last_width: w,
                        pack: acc.pack,
                    });
                }
                acc = close_pack(acc);
            }
            // The first bitfield after ordinary members opens a pack at
            // the aligned position.
            (Some(w), None) => {
                let w = u64::from(w);
                let start = add_trailing(acc.first_free, falign);
                return Ok(OffsetAcc {
                    first_free: start + w,
                    last_start: start,
                    last_width: w,
                    pack: Some((start, bitfield_kind(fi, &ft), fbits)),
                });
            }
            // An ordinary member after a pack closes the pack first.
            (None, Some(_)) => {
                acc = close_pack(acc);
            }
            (None, None) => {
                let start = add_trailing(acc.first_free, falign);
                return Ok(OffsetAcc {
                    first_free: start + fbits,
                    last_start: start,
                    last_width: fbits,
                    pack: None,
                });
            }
        }
    }
}

/// Total size of a type in bits.
pub fn bits_size_of(ctx: &Context, t: &Type) -> Result<u64, LayoutError> {
    let m = &ctx.machine;
    match t {
        Type::Int(k, _) => Ok(8 * bytes_size_of_int(ctx, *k)),
        Type::Float(fk, _) => Ok(8 * bytes_size_of_float(ctx, *fk)),
        Type::Enum(_, _) => Ok(8 * m.size_enum),
        Type::Ptr(_, _) => Ok(8 * m.size_ptr),
        Type::VaList(_) => Ok(8 * m.size_valist),
        Type::Named(ti, _) => bits_size_of(ctx, &ti.borrow().ty),
        Type::Void(_) => Err(LayoutError::NoSize("void".into())),
        Type::Fun(..) => Err(LayoutError::NoSize("function".into())),
        Type::Array(base, Some(len), _) => {
            let n = is_integer(&const_fold(ctx, true, len))
                .ok_or(LayoutError::NonConstantLength)?;
            if n < 0 {
                return Err(LayoutError::NonConstantLength);
            }
            Ok(n as u64 * bits_size_of(ctx, base)?)
        }
        Type::Array(_, None, _) => {
            Err(LayoutError::Incomplete("array of unknown length".into()))
        }
        Type::Comp(ci, _) => bits_size_of_comp(ctx, ci, t),
    }
}

fn bits_size_of_comp(ctx: &Context, ci: &CompRef, t: &Type) -> Result<u64, LayoutError> {
    let cb = ci.borrow();
    if cb.fields.is_empty() {
        return Err(LayoutError::Incomplete(comp_full_name(ci)));
    }
    if cb.is_struct {
        let mut acc = OffsetAcc::START;
        for f in &cb.fields {
            acc = offset_of_field_acc(ctx, &f.borrow(), acc)?;
        }
        acc = close_pack(acc);
        if ctx.msvc && acc.first_free == 0 {
            // A struct of only zero-width bitfields takes one int,
            // unpadded.
            return Ok(32);
        }
        Ok(add_trailing(acc.first_free, 8 * align_of(ctx, t)?))
    } else {
        let mut max = 0;
        for f in &cb.fields {
            let acc = offset_of_field_acc(ctx, &f.borrow(), OffsetAcc::START)?;
            max = max.max(close_pack(acc).first_free);
        }
        Ok(add_trailing(max, 8 * align_of(ctx, t)?))
    }
}

/// The size of a type as an expression: a constant when the layout is
/// known, the unevaluated `sizeof` otherwise.
pub fn size_of(ctx: &Context, t: &Type) -> Expr {
    match bits_size_of(ctx, t) {
        Ok(bits) => integer((bits / 8) as i64),
        Err(_) => Expr::SizeOf(t.clone()),
    }
}

/// The `(start_bit, width_bits)` a chain of offsets addresses within a
/// base type.
pub fn bits_offset(ctx: &Context, base: &Type, off: &Offset) -> Result<(u64, u64), LayoutError> {
    fn walk(
        ctx: &Context,
        t: &Type,
        off: &Offset,
        start: u64,
    ) -> Result<(u64, u64), LayoutError> {
        match off {
            Offset::NoOffset => Ok((start, bits_size_of(ctx, t)?)),
            Offset::Index(idx, rest) => {
                let elt = match unroll_type(t) {
                    Type::Array(elt, _, _) => *elt,
                    other => panic!("index into non-array type {other:?}"),
                };
                let n = is_integer(&const_fold(ctx, true, idx))
                    .ok_or(LayoutError::NonConstantLength)?;
                if n < 0 {
                    return Err(LayoutError::NonConstantLength);
                }
                let elt_bits = bits_size_of(ctx, &elt)?;
                walk(ctx, &elt, rest, start + n as u64 * elt_bits)
            }
            Offset::Field(f, rest) => {
                let fb = f.borrow();
                let comp = fb
                    .comp
                    .upgrade()
                    .unwrap_or_else(|| panic!("field `{}` outlived its composite", fb.name));
                let is_struct = comp.borrow().is_struct;
                if is_struct {
                    // Fold the fields up to and including the target
                    // with the shared accumulator.
                    let mut acc = OffsetAcc::START;
                    let mut found = None;
                    for cand in &comp.borrow().fields {
                        acc = offset_of_field_acc(ctx, &cand.borrow(), acc)?;
                        if Shared::ptr_eq(cand, f) {
                            found = Some((acc.last_start, acc.last_width));
                            break;
                        }
                    }
                    let (fstart, fwidth) = found.unwrap_or_else(|| {
                        panic!("field `{}` not found in {}", fb.name, comp_full_name(&comp))
                    });
                    match rest.as_ref() {
                        Offset::NoOffset => Ok((start + fstart, fwidth)),
                        _ => walk(ctx, &fb.ty, rest, start + fstart),
                    }
                } else {
                    // Union members all start at the beginning.
                    match rest.as_ref() {
                        Offset::NoOffset => {
                            let width = match fb.bitfield {
                                Some(w) => u64::from(w),
                                None => bits_size_of(ctx, &fb.ty)?,
                            };
                            Ok((start, width))
                        }
                        _ => walk(ctx, &fb.ty, rest, start),
                    }
                }
            }
        }
    }
    walk(ctx, base, off, 0)
}
