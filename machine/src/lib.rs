//! Target data models for the C IR core.
//!
//! A [Machine] captures everything the layout engine and constant folder
//! need to know about a compilation target: byte sizes of the fundamental
//! types, the handful of alignments that differ from the sizes, and
//! whether plain `char` is signed. Two presets cover the common cases;
//! a driver can also deserialize a machine description from JSON, with
//! unspecified fields falling back to the GCC preset.

use serde::{Deserialize, Serialize};

/// Byte sizes and alignments of the fundamental C types on one target.
///
/// Alignments of char, short, int, long, float and pointers equal their
/// sizes on every supported target; only long long, double and long
/// double carry distinct alignment fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Machine {
    pub size_short: u64,
    pub size_int: u64,
    pub size_long: u64,
    pub size_longlong: u64,
    pub size_ptr: u64,
    pub size_enum: u64,
    pub size_float: u64,
    pub size_double: u64,
    pub size_longdouble: u64,
    pub size_valist: u64,
    pub align_longlong: u64,
    pub align_double: u64,
    pub align_longdouble: u64,
    pub char_is_unsigned: bool,
}

impl Machine {
    /// The GCC data model for x86-64 Linux (LP64).
    pub fn gcc_x86_64() -> Machine {
        Machine {
            size_short: 2,
            size_int: 4,
            size_long: 8,
            size_longlong: 8,
            size_ptr: 8,
            size_enum: 4,
            size_float: 4,
            size_double: 8,
            size_longdouble: 16,
            size_valist: 24,
            align_longlong: 8,
            align_double: 8,
            align_longdouble: 16,
            char_is_unsigned: false,
        }
    }

    /// The MSVC data model for 32-bit x86 (ILP32, `long double` = `double`).
    pub fn msvc_x86() -> Machine {
        Machine {
            size_short: 2,
            size_int: 4,
            size_long: 4,
            size_longlong: 8,
            size_ptr: 4,
            size_enum: 4,
            size_float: 4,
            size_double: 8,
            size_longdouble: 8,
            size_valist: 4,
            align_longlong: 8,
            align_double: 8,
            align_longdouble: 8,
            char_is_unsigned: false,
        }
    }
}

impl Default for Machine {
    fn default() -> Machine {
        Machine::gcc_x86_64()
    }
}
