//! Fresh-name generation by suffix bumping.
//!
//! A name splits into a prefix and a numeric suffix. The suffix only
//! counts when it follows a `_`, is non-empty, and has no leading zero
//! (unless it is exactly `0`); otherwise the whole name is the prefix.
//! The table remembers, per prefix, the largest suffix ever handed
//! out.

use std::collections::HashMap;

use tracing::trace;

use crate::context::Context;

/// Prefix → largest suffix used. `-1` records a bare name with no
/// suffix.
pub type AlphaTable = HashMap<String, i64>;

/// Splits a name into its prefix and numeric suffix (`-1` when there
/// is no valid suffix).
fn split_name(name: &str) -> (&str, i64) {
    if let Some(pos) = name.rfind('_') {
        let digits = &name[pos + 1..];
        let valid = !digits.is_empty()
            && digits.bytes().all(|b| b.is_ascii_digit())
            && !(digits.len() > 1 && digits.starts_with('0'));
        if valid && let Ok(n) = digits.parse::<i64>() {
            return (&name[..pos], n);
        }
    }
    (name, -1)
}

/// Returns a name not yet produced for this table. An unseen prefix
/// returns the name unchanged and remembers its suffix; a seen prefix
/// bumps to `max(old + 1, requested)` and returns
/// `<prefix>_<suffix>`.
pub fn new_alpha_name(ctx: &Context, table: &mut AlphaTable, lookup: &str) -> String {
    let (prefix, suffix) = split_name(lookup);
    let fresh = match table.get_mut(prefix) {
        Some(largest) => {
            let next = if suffix > *largest { suffix } else { *largest + 1 };
            *largest = next;
            format!("{prefix}_{next}")
        }
        None => {
            table.insert(prefix.to_string(), suffix);
            lookup.to_string()
        }
    };
    if ctx.debug_alpha {
        trace!(lookup, fresh, "alpha rename");
    }
    fresh
}

/// Records a name as used without renaming, so later lookups avoid it.
pub fn register_alpha_name(table: &mut AlphaTable, name: &str) {
    let (prefix, suffix) = split_name(name);
    table
        .entry(prefix.to_string())
        .and_modify(|largest| *largest = (*largest).max(suffix))
        .or_insert(suffix);
}
