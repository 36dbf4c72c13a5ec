//! The configuration record consumed by the ingestion core. Command-line parsing happens in the
//! driver; by the time we're called, options have already been reduced to this struct.

use hashbrown::HashSet;

pub struct Args {
    pub arch: crate::arch::Architecture,

    /// Demangle C++/Rust symbol names when displaying them.
    pub demangle: bool,

    /// Produce a relocatable output (`-r`). Retains sections that would otherwise be excluded.
    pub relocatable: bool,

    pub strip: Strip,

    pub discard_all: bool,
    pub discard_locals: bool,

    /// If set, only symbols named in this set are written to the symbol table.
    pub retain_symbols_file: Option<HashSet<Vec<u8>>>,

    /// Section names to drop at classification time.
    pub discard_section: HashSet<Vec<u8>>,

    /// Symbol names subject to `__wrap_` / `__real_` rewriting.
    pub wrap: HashSet<Vec<u8>>,

    /// Symbol names for which resolution events are reported.
    pub trace_symbol: Vec<Vec<u8>>,

    pub z_execstack: bool,
    pub z_execstack_if_needed: bool,

    /// Don't follow undefined strong references out of shared objects.
    pub allow_shlib_undefined: bool,

    pub warn_common: bool,

    /// `--oformat binary`: no section header in the output, so non-allocated sections have no
    /// place to go and are dropped.
    pub oformat_binary: bool,

    pub gdb_index: bool,

    /// Version index written into newly resolved symbols.
    pub default_version: u16,

    /// Position-independent output. Constrains what `.eh_frame` CIEs may contain.
    pub pic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strip {
    Nothing,
    Debug,
    All,
}

impl Args {
    pub fn strip_debug(&self) -> bool {
        matches!(self.strip, Strip::Debug | Strip::All)
    }

    pub(crate) fn should_wrap(&self, name: &[u8]) -> bool {
        !self.wrap.is_empty() && self.wrap.contains(name)
    }
}

impl Default for Args {
    fn default() -> Self {
        Self {
            arch: crate::arch::Architecture::X86_64,
            demangle: false,
            relocatable: false,
            strip: Strip::Nothing,
            discard_all: false,
            discard_locals: false,
            retain_symbols_file: None,
            discard_section: HashSet::new(),
            wrap: HashSet::new(),
            trace_symbol: Vec::new(),
            z_execstack: false,
            z_execstack_if_needed: false,
            allow_shlib_undefined: false,
            warn_common: false,
            oformat_binary: false,
            gdb_index: false,
            default_version: object::elf::VER_NDX_GLOBAL,
            pic: false,
        }
    }
}
