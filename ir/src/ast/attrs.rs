//! Attributes and attribute lists.
//!
//! Attribute lists are always kept sorted by name. Inserting an exact
//! duplicate is a no-op; distinct attributes with the same name are all
//! kept, in their original insertion order.

use crate::ast::{BinOp, Type, UnOp};

/// A single attribute: a name plus parameters drawn from a small
/// expression sub-language.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub args: Vec<AttrArg>,
}

impl Attribute {
    pub fn new(name: &str, args: Vec<AttrArg>) -> Attribute {
        Attribute {
            name: name.to_string(),
            args,
        }
    }
}

/// Attribute parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrArg {
    Int(i64),
    Str(String),
    /// A bare identifier, e.g. the register in `mode(__DI__)`.
    Var(String),
    /// A constructed parameter: `name(args...)`.
    Cons(String, Vec<AttrArg>),
    SizeOf(Box<Type>),
    SizeOfArg(Box<AttrArg>),
    UnOp(UnOp, Box<AttrArg>),
    BinOp(BinOp, Box<AttrArg>, Box<AttrArg>),
}

/// A name-sorted attribute list.
pub type AttrList = Vec<Attribute>;

/// Inserts `a` into the sorted list. An attribute equal to one already
/// present is dropped; a same-named attribute with different parameters
/// is inserted after the existing ones.
pub fn add_attribute(a: Attribute, mut list: AttrList) -> AttrList {
    let mut i = 0;
    while i < list.len() {
        match list[i].name.as_str().cmp(a.name.as_str()) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Equal => {
                if list[i] == a {
                    return list;
                }
                i += 1;
            }
            std::cmp::Ordering::Greater => break,
        }
    }
    list.insert(i, a);
    list
}

/// Left-fold of [add_attribute]: inserts every element of `add` into
/// `list`.
pub fn add_attributes(add: Vec<Attribute>, list: AttrList) -> AttrList {
    add.into_iter().fold(list, |l, a| add_attribute(a, l))
}

/// Removes every attribute with the given name.
pub fn drop_attribute(name: &str, mut list: AttrList) -> AttrList {
    list.retain(|a| a.name != name);
    list
}

/// Keeps only the attributes with the given name.
pub fn filter_attributes(name: &str, list: &[Attribute]) -> AttrList {
    list.iter().filter(|a| a.name == name).cloned().collect()
}

pub fn has_attribute(name: &str, list: &[Attribute]) -> bool {
    list.iter().any(|a| a.name == name)
}

/// Where an attribute attaches when a declaration is assembled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttrClass {
    /// Goes with the declared name. The flag requests MSVC
    /// `__declspec(...)` placement.
    Name(bool),
    /// Goes with the function type. The flag requests placement
    /// immediately before the function name in MSVC output.
    FunType(bool),
    /// Goes with the underlying type.
    Type,
}

/// Classifies an attribute name; `default` is used for names the
/// registry does not know.
pub fn attr_class(default: AttrClass, name: &str) -> AttrClass {
    match name {
        "section" | "constructor" | "destructor" | "unused" | "used" | "weak" | "alias"
        | "no_instrument_function" | "exception" | "model" | "boxmodel" => AttrClass::Name(false),
        "thread" | "naked" | "dllimport" | "dllexport" | "noreturn" | "selectany" | "allocate"
        | "nothrow" | "novtable" | "property" | "uuid" => AttrClass::Name(true),
        "format" | "regparm" | "longcall" => AttrClass::FunType(false),
        "stdcall" | "cdecl" | "fastcall" => AttrClass::FunType(true),
        "const" | "volatile" | "restrict" | "mode" => AttrClass::Type,
        _ => default,
    }
}

/// Splits a list into (name, function-type, type) classes using the
/// registry, with `default` deciding unknown names.
pub fn partition_attributes(
    default: AttrClass,
    attrs: &[Attribute],
) -> (AttrList, AttrList, AttrList) {
    let mut name = AttrList::new();
    let mut fun_type = AttrList::new();
    let mut ty = AttrList::new();
    for a in attrs {
        match attr_class(default, &a.name) {
            AttrClass::Name(_) => name = add_attribute(a.clone(), name),
            AttrClass::FunType(_) => fun_type = add_attribute(a.clone(), fun_type),
            AttrClass::Type => ty = add_attribute(a.clone(), ty),
        }
    }
    (name, fun_type, ty)
}

/// In MSVC mode, pulls the storage-modifier attributes out of a list
/// and rewraps each as `declspec(<name>(args))`. Returns
/// `(modifiers, rest)`; a no-op outside MSVC mode.
pub fn separate_storage_modifiers(msvc: bool, attrs: &[Attribute]) -> (AttrList, AttrList) {
    if !msvc {
        return (AttrList::new(), attrs.to_vec());
    }
    let mut stom = AttrList::new();
    let mut rest = AttrList::new();
    for a in attrs {
        if attr_class(AttrClass::Name(false), &a.name) == AttrClass::Name(true) {
            let wrapped = Attribute::new(
                "declspec",
                vec![AttrArg::Cons(a.name.clone(), a.args.clone())],
            );
            stom = add_attribute(wrapped, stom);
        } else {
            rest = add_attribute(a.clone(), rest);
        }
    }
    (stom, rest)
}
