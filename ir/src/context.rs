//! Per-client state threaded through the engines.
//!
//! Every public entry point takes a [Context] instead of consulting
//! process-wide cells, so independent clients (and tests) never observe
//! each other's dialect, target model or location tracking.

use std::cell::RefCell;
use std::fmt;

use cmill_machine::Machine;

use crate::ast::{Attribute, Location};

/// Shared configuration and bookkeeping for one logical client.
pub struct Context {
    /// Active target data model. Sizes and alignments for the layout
    /// engine, integer widths for the folder, char signedness.
    pub machine: Machine,
    /// Selects the MSVC dialect: integer suffixes, `__int64`, `__declspec`
    /// placement, `__asm { }`, `#line`, and the bitfield packing rules.
    pub msvc: bool,
    /// Emit line directives while printing.
    pub print_line_numbers: bool,
    /// Prefix line directives with `//`.
    pub line_as_comment: bool,
    /// Trace alpha-renaming decisions.
    pub debug_alpha: bool,
    /// Trace visitor entry per global and statement.
    pub debug_visit: bool,
    /// Override the rendering of individual attributes. Returning `None`
    /// falls back to the default spelling.
    pub custom_attr_printer: Option<Box<dyn Fn(&Attribute) -> Option<String>>>,
    /// Most recent source location, updated by the visitor at global,
    /// statement and instruction boundaries.
    pub current_loc: RefCell<Location>,
}

impl Context {
    /// A context for the GCC dialect on the given machine.
    pub fn gcc(machine: Machine) -> Context {
        Context {
            machine,
            msvc: false,
            print_line_numbers: false,
            line_as_comment: false,
            debug_alpha: false,
            debug_visit: false,
            custom_attr_printer: None,
            current_loc: RefCell::new(Location::none()),
        }
    }

    /// A context for the MSVC dialect on the given machine.
    pub fn msvc(machine: Machine) -> Context {
        Context {
            msvc: true,
            ..Context::gcc(machine)
        }
    }

    /// Updates the current location, ignoring the unknown-location sentinel.
    pub fn set_loc(&self, loc: &Location) {
        if loc.line > 0 {
            *self.current_loc.borrow_mut() = loc.clone();
        }
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::gcc(Machine::gcc_x86_64())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("machine", &self.machine)
            .field("msvc", &self.msvc)
            .field("print_line_numbers", &self.print_line_numbers)
            .field("line_as_comment", &self.line_as_comment)
            .field("current_loc", &self.current_loc.borrow())
            .finish_non_exhaustive()
    }
}
