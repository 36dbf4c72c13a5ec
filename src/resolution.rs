//! Cross-file symbol resolution and the live-object trace.
//!
//! Symbols with higher priorities overwrite symbols with lower priorities. From highest to
//! lowest:
//!
//!   1. strong defined symbol
//!   2. weak defined symbol
//!   3. strong defined symbol in a DSO or unextracted archive member
//!   4. weak defined symbol in a DSO or unextracted archive member
//!   5. common symbol
//!   6. common symbol in an unextracted archive member
//!   7. nonexistent symbol
//!
//! Ties break towards the file with the smaller priority number. The ordering is heuristic
//! rather than principled; it's what keeps real programs linking.
//!
//! Resolution runs in parallel over files, serialized per symbol by that symbol's mutex. As the
//! trace flips archive members reachable their definitions improve in rank, so the driver
//! resolves once more after tracing; rerunning resolution on an unchanged input set is then a
//! no-op.

use crate::InputFile;
use crate::Result;
use crate::context::Context;
use crate::elf;
use crate::input_data::FileId;
use crate::object_file::ObjectFile;
use crate::shared_file::SharedFile;
use crate::symbol::Symbol;
use crate::symbol::SymbolExtent;
use crate::symbol::SymbolState;
use object::LittleEndian;
use object::read::elf::Sym as _;
use rayon::Scope;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;

fn esym_rank(priority: u32, is_dso: bool, esym: &elf::SymtabEntry, in_archive: bool) -> u64 {
    let e = LittleEndian;
    let class: u64 = if esym.is_common(e) {
        if in_archive { 6 } else { 5 }
    } else if is_dso || in_archive {
        if esym.is_weak() { 4 } else { 3 }
    } else if esym.is_weak() {
        2
    } else {
        1
    };
    (class << 24) | u64::from(priority)
}

const UNDEFINED_RANK: u64 = 7 << 24;

/// The rank of a symbol's current resolution.
fn current_rank(state: &SymbolState, files: &[InputFile]) -> u64 {
    let Some(owner) = state.owner else {
        return UNDEFINED_RANK;
    };
    let file = &files[owner.as_usize()];
    match file.elf_sym(state.sym_idx as usize) {
        Some(esym) => esym_rank(file.priority(), file.is_dso(), esym, !file.is_reachable()),
        None => UNDEFINED_RANK,
    }
}

/// Runs one resolution pass over every file.
pub fn resolve_symbols<'data>(ctx: &Context<'data>, files: &[InputFile<'data>]) -> Result {
    files.par_iter().try_for_each(|file| match file {
        InputFile::Object(o) => o.resolve_symbols(ctx, files),
        InputFile::Shared(s) => {
            s.resolve_symbols(files);
            Ok(())
        }
    })
}

/// Marks files reachable, starting from the files named on the command line and following
/// references whose definitions live in not-yet-reachable files. Reachability only ever goes
/// from false to true, so the wavefront terminates.
pub fn mark_live_objects<'data>(ctx: &Context<'data>, files: &[InputFile<'data>]) {
    rayon::in_place_scope(|scope| {
        for file in files {
            if file.is_reachable() {
                scope.spawn(move |scope| visit_file(ctx, files, file, scope));
            }
        }
    });
}

fn visit_file<'data, 'scope>(
    ctx: &'scope Context<'data>,
    files: &'scope [InputFile<'data>],
    file: &'scope InputFile<'data>,
    scope: &Scope<'scope>,
) {
    let feeder = |id: FileId| {
        let next = &files[id.as_usize()];
        scope.spawn(move |scope| visit_file(ctx, files, next, scope));
    };
    match file {
        InputFile::Object(o) => o.mark_live_objects(ctx, files, &feeder),
        InputFile::Shared(s) => s.mark_live_objects(ctx, files, &feeder),
    }
}

fn print_trace_symbol(
    ctx: &Context,
    file: &dyn std::fmt::Display,
    esym: &elf::SymtabEntry,
    sym: &Symbol,
) {
    let e = LittleEndian;
    if !esym.is_undefined(e) {
        ctx.diagnostics
            .trace(format_args!("trace-symbol: {file}: definition of {sym}"));
    } else if esym.is_weak() {
        ctx.diagnostics
            .trace(format_args!("trace-symbol: {file}: weak reference to {sym}"));
    } else {
        ctx.diagnostics
            .trace(format_args!("trace-symbol: {file}: reference to {sym}"));
    }
}

impl<'data> ObjectFile<'data> {
    pub(crate) fn resolve_symbols(
        &self,
        ctx: &Context<'data>,
        files: &[InputFile<'data>],
    ) -> Result {
        let e = LittleEndian;

        for i in self.first_global..self.elf_syms.len() {
            let sym = self.symbols[i];
            let esym = &self.elf_syms[i];

            if esym.is_undefined(e) {
                continue;
            }

            let extent = if esym.is_absolute(e) {
                SymbolExtent::Absolute
            } else if esym.is_common(e) {
                SymbolExtent::Common
            } else {
                let shndx = self.esym_shndx(i, esym)?;
                if !self.section_is_alive(shndx) {
                    continue;
                }
                SymbolExtent::Section(shndx)
            };

            let mut state = sym.mu.lock().unwrap();

            if esym_rank(self.input.priority, false, esym, !self.is_reachable())
                < current_rank(&state, files)
            {
                state.owner = Some(self.file_id);
                state.extent = extent;
                state.value = esym.st_value.get(e);
                state.sym_idx = i as u32;
                state.ver_idx = ctx.args.default_version;
                state.is_weak = esym.is_weak();
                state.is_versioned_default = false;
                state.origin = None;
            }
        }

        Ok(())
    }

    /// Visits this file's global references, tightening visibility and pulling in the files
    /// that define what we use.
    pub(crate) fn mark_live_objects(
        &self,
        ctx: &Context<'data>,
        files: &[InputFile<'data>],
        feeder: &dyn Fn(FileId),
    ) {
        let e = LittleEndian;

        for i in self.first_global..self.elf_syms.len() {
            let esym = &self.elf_syms[i];
            let sym = self.symbols[i];

            if !esym.is_undefined(e) && self.input.exclude_libs {
                sym.merge_visibility(object::elf::STV_HIDDEN);
            } else {
                sym.merge_visibility(esym.st_visibility());
            }

            if sym.is_traced() {
                print_trace_symbol(ctx, self, esym, sym);
            }

            let (owner, owner_sym_idx) = {
                let state = sym.mu.lock().unwrap();
                (state.owner, state.sym_idx)
            };
            let Some(owner) = owner else {
                continue;
            };
            let owner_file = &files[owner.as_usize()];

            // An undefined reference pulls in the defining file. A weak undefined one doesn't,
            // unless the definition comes from a DSO. A common symbol still needs any stronger
            // definition that exists elsewhere.
            let owner_is_common = owner_file
                .elf_sym(owner_sym_idx as usize)
                .is_some_and(|owner_esym| owner_esym.is_common(e));
            let undef_ref =
                esym.is_undefined(e) && (!esym.is_weak() || owner_file.is_dso());
            let common_ref = esym.is_common(e) && !owner_is_common;

            if (undef_ref || common_ref) && owner_file.mark_reachable() {
                feeder(owner);
                if sym.is_traced() {
                    ctx.diagnostics.trace(format_args!(
                        "trace-symbol: {self} keeps {owner_file} for {sym}"
                    ));
                }
            }
        }
    }
}

impl<'data> SharedFile<'data> {
    pub(crate) fn resolve_symbols(&self, files: &[InputFile<'data>]) {
        let e = LittleEndian;

        for i in 0..self.symbols.len() {
            let sym = self.symbols[i];
            let esym = &self.elf_syms[i];

            if esym.is_undefined(e) || sym.has_flag(crate::symbol::sym_flags::SKIP_DSO) {
                continue;
            }

            let mut state = sym.mu.lock().unwrap();

            if esym_rank(self.input.priority, true, esym, false) < current_rank(&state, files) {
                state.owner = Some(self.file_id);
                state.extent = SymbolExtent::Absolute;
                state.value = esym.st_value.get(e);
                state.sym_idx = i as u32;
                state.ver_idx = self.versyms[i];
                state.is_weak = true;
                state.is_versioned_default = false;
                state.origin = None;
            }

            // A versioned default symbol answers to two names; resolve `foo@VERSION` as a proxy
            // for `foo`. Lock order is always base then alias, so the nested acquisition can't
            // deadlock.
            if let Some(alias) = self.alias_symbols[i]
                && !std::ptr::eq(alias, sym)
            {
                let mut alias_state = alias.mu.lock().unwrap();
                if esym_rank(self.input.priority, true, esym, false)
                    < current_rank(&alias_state, files)
                {
                    alias_state.owner = Some(self.file_id);
                    alias_state.origin = Some(sym);
                    alias_state.sym_idx = i as u32;
                    alias_state.is_versioned_default = true;
                }
            }
        }
    }

    /// We only follow undefined symbols in a DSO to implement `--no-allow-shlib-undefined`.
    pub(crate) fn mark_live_objects(
        &self,
        ctx: &Context<'data>,
        files: &[InputFile<'data>],
        feeder: &dyn Fn(FileId),
    ) {
        let e = LittleEndian;

        for i in 0..self.symbols.len() {
            let esym = &self.elf_syms[i];
            let sym = self.symbols[i];

            if sym.is_traced() {
                print_trace_symbol(ctx, self, esym, sym);
            }

            if !esym.is_undefined(e) || esym.is_weak() {
                continue;
            }
            let Some(owner) = sym.file_id() else {
                continue;
            };
            let owner_file = &files[owner.as_usize()];

            if (!owner_file.is_dso() || !ctx.args.allow_shlib_undefined)
                && owner_file.mark_reachable()
            {
                feeder(owner);
                if sym.is_traced() {
                    ctx.diagnostics.trace(format_args!(
                        "trace-symbol: {self} keeps {owner_file} for {sym}"
                    ));
                }
            }
        }
    }
}
