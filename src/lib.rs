//! The input-file ingestion and symbol-resolution core of a parallel ELF linker. Given the
//! relocatable objects and shared objects the driver discovered, this crate parses them,
//! elects a definition for every symbol name, traces which archive members the link actually
//! needs, rewrites references into mergeable sections to canonical pieces, digests
//! `.eh_frame`, and computes each file's contribution to the output symbol and string tables.
//!
//! Everything around that (archive extraction, section layout, relocation application, the
//! command line) belongs to the driver. Inputs arrive as memory-mapped byte buffers plus an
//! [`args::Args`] record; results are published through the returned [`InputFile`]s and the
//! interned [`symbol::Symbol`]s.

pub(crate) use anyhow::Error;
pub(crate) use anyhow::bail;
pub(crate) use anyhow::ensure;

/// Everything fallible here reports through `anyhow`, with the offending input file attached
/// as context by the caller that knows it.
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;

pub mod args;
pub mod arch;
pub mod context;
pub(crate) mod crel;
pub mod diagnostics;
pub(crate) mod eh_frame;
pub mod elf;
pub mod file_kind;
pub mod input_data;
pub mod object_file;
pub mod resolution;
pub mod shared_file;
pub(crate) mod string_merging;
pub mod symbol;
pub mod symtab;

#[cfg(test)]
pub(crate) mod test_elf;

use crate::context::Context;
use crate::file_kind::FileKind;
use crate::input_data::FileId;
use crate::input_data::FileInput;
use crate::object_file::ObjectFile;
use crate::shared_file::SharedFile;
use crate::symbol::Symbol;
use crate::symbol::sym_flags;
use anyhow::Context as _;
use rayon::iter::IndexedParallelIterator;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::IntoParallelRefMutIterator;
use rayon::iter::ParallelIterator;

pub enum InputFile<'data> {
    Object(Box<ObjectFile<'data>>),
    Shared(Box<SharedFile<'data>>),
}

impl<'data> InputFile<'data> {
    pub fn input(&self) -> &FileInput<'data> {
        match self {
            InputFile::Object(o) => &o.input,
            InputFile::Shared(s) => &s.input,
        }
    }

    pub(crate) fn priority(&self) -> u32 {
        self.input().priority
    }

    pub fn is_dso(&self) -> bool {
        matches!(self, InputFile::Shared(_))
    }

    pub fn is_reachable(&self) -> bool {
        match self {
            InputFile::Object(o) => o.is_reachable(),
            InputFile::Shared(s) => s.is_reachable(),
        }
    }

    pub(crate) fn mark_reachable(&self) -> bool {
        match self {
            InputFile::Object(o) => o.mark_reachable(),
            InputFile::Shared(s) => s.mark_reachable(),
        }
    }

    pub(crate) fn elf_sym(&self, index: usize) -> Option<&elf::SymtabEntry> {
        match self {
            InputFile::Object(o) => o.elf_syms.get(index),
            InputFile::Shared(s) => s.elf_syms.get(index),
        }
    }
}

impl std::fmt::Display for InputFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self.input(), f)
    }
}

/// The ELF symbol type of a symbol's chosen definition.
pub(crate) fn symbol_type(sym: &Symbol, files: &[InputFile]) -> u8 {
    let state = sym.mu.lock().unwrap();
    state
        .owner
        .and_then(|owner| files[owner.as_usize()].elf_sym(state.sym_idx as usize))
        .map_or(object::elf::STT_NOTYPE, |esym| {
            object::read::elf::Sym::st_type(esym)
        })
}

/// Parses every input in parallel, dispatching by file kind.
pub fn parse_input_files<'data>(
    ctx: &Context<'data>,
    inputs: &[FileInput<'data>],
) -> Result<Vec<InputFile<'data>>> {
    inputs
        .par_iter()
        .enumerate()
        .map(|(index, input)| {
            let kind = FileKind::identify_bytes(input.mapped.data())
                .with_context(|| format!("{input}"))?;
            let file_id = FileId(index as u32);
            Ok(match kind {
                FileKind::ElfObject => {
                    InputFile::Object(Box::new(ObjectFile::parse(ctx, *input, file_id)?))
                }
                FileKind::ElfDynamic => {
                    InputFile::Shared(Box::new(SharedFile::parse(ctx, *input, file_id)?))
                }
            })
        })
        .collect()
}

/// `--wrap` and `--trace-symbol` flags live on the symbols themselves and are consulted while
/// files parse, so the named symbols must be interned and flagged up front.
fn mark_configured_symbols<'data>(ctx: &Context<'data>) {
    for name in &ctx.args.wrap {
        let key = ctx.alloc_bytes(name);
        ctx.get_symbol(key).set_flag(sym_flags::WRAPPED);
    }
    for name in &ctx.args.trace_symbol {
        let key = ctx.alloc_bytes(name);
        ctx.get_symbol(key).set_flag(sym_flags::TRACED);
    }
}

/// Runs the whole ingestion pipeline. On return, every symbol has its final resolution, dead
/// COMDAT members and `.eh_frame` inputs are marked, mergeable references point at fragments,
/// and each file knows the size of its symbol-table contribution. Emission happens separately
/// via [`symtab::assign_symtab_offsets`] and the per-file `populate_symtab`.
pub fn ingest<'data>(
    ctx: &Context<'data>,
    inputs: &[FileInput<'data>],
) -> Result<Vec<InputFile<'data>>> {
    mark_configured_symbols(ctx);

    let mut files = parse_input_files(ctx, inputs)?;

    // COMDAT election: lowest priority claims the signature, then losers drop their members.
    files.par_iter().for_each(|file| {
        if let InputFile::Object(o) = file {
            o.claim_comdat_groups();
        }
    });
    files.par_iter_mut().for_each(|file| {
        if let InputFile::Object(o) = file {
            o.eliminate_duplicate_comdat_groups();
        }
    });

    // Resolve, trace reachability, then resolve again. Reachability is monotone and final
    // after the trace, and replacement needs a strictly better rank, so the second pass
    // reaches the fixed point.
    resolution::resolve_symbols(ctx, &files)?;
    resolution::mark_live_objects(ctx, &files);
    resolution::resolve_symbols(ctx, &files)?;

    files.par_iter_mut().try_for_each(|file| -> Result {
        if let InputFile::Object(o) = file {
            o.convert_common_symbols(ctx);
            o.convert_mergeable_sections(ctx)?;
            o.reattach_section_pieces(ctx)?;
            o.parse_ehframe()?;
        }
        Ok(())
    })?;

    files.par_iter().try_for_each(|file| -> Result {
        if let InputFile::Object(o) = file {
            o.scan_eh_frame_relocations(ctx, &files)?;
        }
        Ok(())
    })?;
    ctx.diagnostics.take_result()?;

    symtab::apply_retain_symbols_file(ctx);
    files.par_iter_mut().for_each(|file| match file {
        InputFile::Object(o) => o.compute_symtab_size(ctx),
        InputFile::Shared(s) => s.compute_symtab_size(ctx),
    });

    Ok(files)
}
