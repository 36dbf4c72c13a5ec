//! The canonical, process-unique record for one symbol name. Identity is the interned key; the
//! mutable resolution state lives behind the per-symbol mutex and is only written by the
//! resolver. Visibility and the boolean attributes are atomics so that they can be merged from
//! many files at once without taking the resolution lock.

use crate::input_data::FileId;
use crate::string_merging::SectionFragment;
use std::sync::Mutex;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

pub struct Symbol<'data> {
    name: &'data [u8],
    demangle: bool,

    /// Guards the resolution state. Held briefly: one rank comparison plus a handful of writes.
    pub(crate) mu: Mutex<SymbolState<'data>>,

    visibility: AtomicU8,
    flags: AtomicU8,
}

pub(crate) mod sym_flags {
    pub(crate) const WRAPPED: u8 = 1 << 0;
    pub(crate) const TRACED: u8 = 1 << 1;
    pub(crate) const SKIP_DSO: u8 = 1 << 2;
    pub(crate) const IMPORTED: u8 = 1 << 3;
    pub(crate) const EXPORTED: u8 = 1 << 4;
    pub(crate) const WRITE_TO_SYMTAB: u8 = 1 << 5;
    pub(crate) const NEEDS_PLT: u8 = 1 << 6;
}

/// Where a symbol's definition currently comes from. At most one of the section / fragment
/// references is ever populated.
#[derive(Clone, Copy, Default)]
pub(crate) enum SymbolExtent<'data> {
    #[default]
    Undefined,
    Absolute,
    /// A common symbol that hasn't yet been converted to a real section.
    Common,
    /// Defined in the owner's section with the given header index.
    Section(u32),
    /// Defined as an offset into a merged-section fragment.
    Frag(&'data SectionFragment),
}

pub(crate) struct SymbolState<'data> {
    pub(crate) owner: Option<FileId>,
    pub(crate) extent: SymbolExtent<'data>,
    pub(crate) value: u64,
    pub(crate) sym_idx: u32,
    pub(crate) ver_idx: u16,
    pub(crate) is_weak: bool,
    pub(crate) is_versioned_default: bool,

    /// For a `name@VERSION` alias of a versioned default, the base `name` symbol it forwards to.
    pub(crate) origin: Option<&'data Symbol<'data>>,
}

impl<'data> Symbol<'data> {
    pub(crate) fn new(name: &'data [u8], demangle: bool) -> Self {
        Self {
            name,
            demangle,
            mu: Mutex::new(SymbolState {
                owner: None,
                extent: SymbolExtent::Undefined,
                value: 0,
                sym_idx: 0,
                ver_idx: object::elf::VER_NDX_GLOBAL,
                is_weak: false,
                is_versioned_default: false,
                origin: None,
            }),
            visibility: AtomicU8::new(object::elf::STV_DEFAULT),
            flags: AtomicU8::new(0),
        }
    }

    pub(crate) fn name(&self) -> &'data [u8] {
        self.name
    }

    pub(crate) fn visibility(&self) -> u8 {
        self.visibility.load(Ordering::Relaxed)
    }

    /// Tightens visibility to the most restrictive of all sightings. `STV_INTERNAL` is treated
    /// as hidden. The sequence of values this produces is monotone under
    /// hidden < protected < default.
    pub(crate) fn merge_visibility(&self, visibility: u8) {
        let visibility = if visibility == object::elf::STV_INTERNAL {
            object::elf::STV_HIDDEN
        } else {
            visibility
        };

        let _ = self
            .visibility
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                (visibility_rank(visibility) < visibility_rank(current)).then_some(visibility)
            });
    }

    pub(crate) fn set_flag(&self, flag: u8) {
        self.flags.fetch_or(flag, Ordering::Relaxed);
    }

    pub(crate) fn has_flag(&self, flag: u8) -> bool {
        self.flags.load(Ordering::Relaxed) & flag != 0
    }

    pub(crate) fn is_wrapped(&self) -> bool {
        self.has_flag(sym_flags::WRAPPED)
    }

    pub(crate) fn is_traced(&self) -> bool {
        self.has_flag(sym_flags::TRACED)
    }

    pub(crate) fn is_imported(&self) -> bool {
        self.has_flag(sym_flags::IMPORTED)
    }

    pub(crate) fn is_exported(&self) -> bool {
        self.has_flag(sym_flags::EXPORTED)
    }

    /// Whether this symbol should be demoted to a local in the output symbol table. The
    /// import/export bits are owned by the visibility/version-script pass in the driver.
    pub(crate) fn is_local(&self) -> bool {
        !self.is_imported() && !self.is_exported()
    }

    pub(crate) fn file_id(&self) -> Option<FileId> {
        self.mu.lock().unwrap().owner
    }
}

fn visibility_rank(visibility: u8) -> u8 {
    match visibility {
        object::elf::STV_HIDDEN => 1,
        object::elf::STV_PROTECTED => 2,
        _ => 3,
    }
}

impl std::fmt::Display for Symbol<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(self.name) {
            Ok(name) if self.demangle => {
                std::fmt::Display::fmt(&symbolic_demangle::demangle(name), f)
            }
            Ok(name) => std::fmt::Display::fmt(name, f),
            Err(_) => write!(f, "INVALID UTF-8({:?})", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_only_tightens() {
        let sym = Symbol::new(b"foo", false);
        assert_eq!(sym.visibility(), object::elf::STV_DEFAULT);

        sym.merge_visibility(object::elf::STV_PROTECTED);
        assert_eq!(sym.visibility(), object::elf::STV_PROTECTED);

        // A later default-visibility sighting doesn't loosen it again.
        sym.merge_visibility(object::elf::STV_DEFAULT);
        assert_eq!(sym.visibility(), object::elf::STV_PROTECTED);

        sym.merge_visibility(object::elf::STV_INTERNAL);
        assert_eq!(sym.visibility(), object::elf::STV_HIDDEN);
    }
}
