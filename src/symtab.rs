//! Per-file computation of output symbol-table slots and string-table bytes. Two passes: a
//! sizing pass that decides which symbols survive and claims slots, then an emission pass that
//! writes entries and names into caller-owned buffers at caller-assigned offsets.

use crate::InputFile;
use crate::context::Context;
use crate::elf;
use crate::elf::shf;
use crate::object_file::ObjectFile;
use crate::shared_file::SharedFile;
use crate::symbol::Symbol;
use crate::symbol::SymbolExtent;
use crate::symbol::sym_flags;
use object::LittleEndian;
use object::read::elf::Sym as _;

/// The output buffers one link writes its symbol table into. Entry 0 of the symbol table and
/// byte 0 of the string table are the conventional null entries and are left untouched.
pub struct SymtabWriter<'out> {
    pub symtab: &'out mut [elf::SymtabEntry],
    pub strtab: &'out mut [u8],
    pub symtab_shndx: Option<&'out mut [object::U32<LittleEndian>]>,
}

/// One converted output entry. `extended_shndx` is populated when the section index doesn't
/// fit the 16-bit field and must go to the `SHT_SYMTAB_SHNDX` table instead.
pub struct OutputEsym {
    pub esym: elf::SymtabEntry,
    pub extended_shndx: Option<u32>,
}

/// Totals produced by `assign_symtab_offsets`.
pub struct SymtabShape {
    pub num_symtab: u32,
    pub strtab_size: u32,
}

impl SymtabWriter<'_> {
    fn write(&mut self, index: u32, output: OutputEsym, name: &[u8], strtab_offset: &mut u32) {
        let e = LittleEndian;
        let mut esym = output.esym;
        esym.st_name = object::U32::new(e, *strtab_offset);
        self.symtab[index as usize] = esym;

        if let Some(shndx_table) = &mut self.symtab_shndx {
            let extended = output.extended_shndx.unwrap_or(0);
            shndx_table[index as usize] = object::U32::new(e, extended);
        }

        let start = *strtab_offset as usize;
        self.strtab[start..start + name.len()].copy_from_slice(name);
        self.strtab[start + name.len()] = 0;
        *strtab_offset += name.len() as u32 + 1;
    }
}

/// A reasonable default conversion for callers that haven't laid out output sections yet:
/// section indices are passed through from the input, fragment-bound symbols are emitted as
/// absolute. The real output writer supplies its own conversion.
pub fn basic_output_esym(sym: &Symbol, files: &[InputFile]) -> OutputEsym {
    let e = LittleEndian;
    let state = sym.mu.lock().unwrap();

    let (bind, st_type, st_size) = state
        .owner
        .and_then(|owner| files[owner.as_usize()].elf_sym(state.sym_idx as usize))
        .map_or((object::elf::STB_GLOBAL, object::elf::STT_NOTYPE, 0), |esym| {
            (esym.st_bind(), esym.st_type(), esym.st_size.get(e))
        });

    let (st_shndx, extended_shndx) = match state.extent {
        SymbolExtent::Undefined => (object::elf::SHN_UNDEF, None),
        SymbolExtent::Absolute | SymbolExtent::Frag(_) => (object::elf::SHN_ABS, None),
        SymbolExtent::Common => (object::elf::SHN_COMMON, None),
        SymbolExtent::Section(shndx) => {
            if shndx >= u32::from(object::elf::SHN_LORESERVE) {
                (object::elf::SHN_XINDEX, Some(shndx))
            } else {
                (shndx as u16, None)
            }
        }
    };

    OutputEsym {
        esym: elf::SymtabEntry {
            st_name: object::U32::new(e, 0),
            st_info: (bind << 4) | (st_type & 0xf),
            st_other: sym.visibility(),
            st_shndx: object::U16::new(e, st_shndx),
            st_value: object::U64::new(e, state.value),
            st_size: object::U64::new(e, st_size),
        },
        extended_shndx,
    }
}

/// Assigns each file its slice of the output tables: all locals first, then all globals, with
/// string-table bytes in file order. Returns the totals the caller should size buffers with.
pub fn assign_symtab_offsets(files: &mut [InputFile]) -> SymtabShape {
    let mut index = 1u32;
    let mut strtab = 1u32;

    for file in files.iter_mut() {
        if let InputFile::Object(o) = file {
            o.local_symtab_idx = index;
            index += o.num_local_symtab;
        }
    }

    for file in files.iter_mut() {
        match file {
            InputFile::Object(o) => {
                o.global_symtab_idx = index;
                index += o.num_global_symtab;
            }
            InputFile::Shared(s) => {
                s.global_symtab_idx = index;
                index += s.num_global_symtab;
            }
        }
    }

    for file in files.iter_mut() {
        match file {
            InputFile::Object(o) => {
                o.strtab_offset = strtab;
                strtab += o.strtab_size;
            }
            InputFile::Shared(s) => {
                s.strtab_offset = strtab;
                strtab += s.strtab_size;
            }
        }
    }

    SymtabShape {
        num_symtab: index,
        strtab_size: strtab,
    }
}

impl<'data> ObjectFile<'data> {
    /// Whether a symbol's definition is still part of the output.
    fn symbol_is_alive(&self, sym: &Symbol<'data>) -> bool {
        let state = sym.mu.lock().unwrap();
        match state.extent {
            SymbolExtent::Frag(frag) => frag.is_alive(),
            SymbolExtent::Section(shndx) => self.section_is_alive(shndx),
            _ => true,
        }
    }

    /// Local symbols are dropped if `--discard-locals` says so and they look like compiler
    /// temporaries, and always when they point into mergeable sections; there are too many and
    /// they're merged anyway, so their origins don't mean much.
    fn should_write_to_local_symtab(&self, ctx: &Context<'data>, index: usize) -> bool {
        let esym = &self.elf_syms[index];
        if esym.st_type() == object::elf::STT_SECTION {
            return false;
        }

        let sym = self.symbols[index];
        if sym.name().starts_with(b".L") || sym.name() == b"L0\x01" {
            if ctx.args.discard_locals {
                return false;
            }
            let state = sym.mu.lock().unwrap();
            if let SymbolExtent::Section(shndx) = state.extent
                && let Ok(shdr) = self.shdr(shndx)
                && elf::SectionFlags::from_header(shdr).contains(shf::MERGE)
            {
                return false;
            }
        }

        true
    }

    pub fn compute_symtab_size(&mut self, ctx: &Context<'data>) {
        self.output_sym_indices = vec![None; self.elf_syms.len()];
        self.num_local_symtab = 0;
        self.num_global_symtab = 0;
        self.strtab_size = 0;

        let retain = ctx.args.retain_symbols_file.is_some();

        if !ctx.args.discard_all && ctx.args.strip != crate::args::Strip::All && !retain {
            for i in 1..self.first_global {
                let sym = self.symbols[i];
                if self.symbol_is_alive(sym) && self.should_write_to_local_symtab(ctx, i) {
                    self.strtab_size += sym.name().len() as u32 + 1;
                    self.output_sym_indices[i] = Some(self.num_local_symtab);
                    self.num_local_symtab += 1;
                    sym.set_flag(sym_flags::WRITE_TO_SYMTAB);
                }
            }
        }

        if ctx.args.strip == crate::args::Strip::All {
            return;
        }

        for i in self.first_global..self.elf_syms.len() {
            let sym = self.symbols[i];

            let owned_here = sym.file_id() == Some(self.file_id);
            if owned_here
                && self.symbol_is_alive(sym)
                && (!retain || sym.has_flag(sym_flags::WRITE_TO_SYMTAB))
            {
                self.strtab_size += sym.name().len() as u32 + 1;
                // Globals can demote to locals based on visibility, version scripts and the
                // like; that decision arrives via the import/export bits.
                if sym.is_local() {
                    self.output_sym_indices[i] = Some(self.num_local_symtab);
                    self.num_local_symtab += 1;
                } else {
                    self.output_sym_indices[i] = Some(self.num_global_symtab);
                    self.num_global_symtab += 1;
                }
                sym.set_flag(sym_flags::WRITE_TO_SYMTAB);
            }
        }
    }

    pub fn populate_symtab<F>(&self, to_output_esym: F, out: &mut SymtabWriter)
    where
        F: Fn(&'data Symbol<'data>) -> OutputEsym,
    {
        let mut strtab_offset = self.strtab_offset;
        let mut local_idx = self.local_symtab_idx;
        let mut global_idx = self.global_symtab_idx;

        for i in 1..self.first_global {
            let sym = self.symbols[i];
            if self.output_sym_indices[i].is_some() {
                out.write(local_idx, to_output_esym(sym), sym.name(), &mut strtab_offset);
                local_idx += 1;
            }
        }

        for i in self.first_global..self.elf_syms.len() {
            let sym = self.symbols[i];
            if self.output_sym_indices[i].is_none() {
                continue;
            }
            if sym.is_local() {
                out.write(local_idx, to_output_esym(sym), sym.name(), &mut strtab_offset);
                local_idx += 1;
            } else {
                out.write(global_idx, to_output_esym(sym), sym.name(), &mut strtab_offset);
                global_idx += 1;
            }
        }
    }
}

impl<'data> SharedFile<'data> {
    pub fn compute_symtab_size(&mut self, ctx: &Context<'data>) {
        self.output_sym_indices = vec![None; self.elf_syms.len()];
        self.num_global_symtab = 0;
        self.strtab_size = 0;

        let retain = ctx.args.retain_symbols_file.is_some();

        for i in 0..self.symbols.len() {
            let sym = self.symbols[i];
            if sym.file_id() == Some(self.file_id)
                && (sym.is_imported() || sym.is_exported())
                && (!retain || sym.has_flag(sym_flags::WRITE_TO_SYMTAB))
            {
                self.strtab_size += sym.name().len() as u32 + 1;
                self.output_sym_indices[i] = Some(self.num_global_symtab);
                self.num_global_symtab += 1;
                sym.set_flag(sym_flags::WRITE_TO_SYMTAB);
            }
        }
    }

    pub fn populate_symtab<F>(&self, to_output_esym: F, out: &mut SymtabWriter)
    where
        F: Fn(&'data Symbol<'data>) -> OutputEsym,
    {
        let mut strtab_offset = self.strtab_offset;
        let mut global_idx = self.global_symtab_idx;

        for i in 0..self.symbols.len() {
            let sym = self.symbols[i];
            if self.output_sym_indices[i].is_some() {
                out.write(global_idx, to_output_esym(sym), sym.name(), &mut strtab_offset);
                global_idx += 1;
            }
        }
    }
}

/// Marks the symbols named in `--retain-symbols-file` so that the sizing passes keep them.
pub fn apply_retain_symbols_file(ctx: &Context) {
    let Some(retain) = &ctx.args.retain_symbols_file else {
        return;
    };
    for name in retain {
        if let Some(sym) = ctx.lookup_symbol(name) {
            sym.set_flag(sym_flags::WRITE_TO_SYMTAB);
        }
    }
}
