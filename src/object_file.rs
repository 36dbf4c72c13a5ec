//! Ingestion of relocatable object files: section classification, COMDAT group registration,
//! relocation binding and symbol materialization.

use crate::Result;
use crate::arch::Architecture;
use crate::bail;
use crate::context::ComdatGroup;
use crate::context::Context;
use crate::crel;
use crate::crel::Rel;
use crate::elf;
use crate::elf::SectionFlags;
use crate::elf::shf;
use crate::ensure;
use crate::input_data::FileId;
use crate::input_data::FileInput;
use crate::string_merging::MergeableSection;
use crate::symbol::Symbol;
use crate::symbol::SymbolExtent;
use anyhow::Context as _;
use object::LittleEndian;
use object::read::elf::Sym as _;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

pub struct ObjectFile<'data> {
    pub input: FileInput<'data>,
    pub file_id: FileId,
    pub(crate) elf: elf::File<'data>,
    pub(crate) arch: Architecture,

    /// Flips from false to true exactly once, when the live-object trace pulls this file in.
    is_reachable: AtomicBool,

    /// `symtab.sh_info`: indices below this are STB_LOCAL, the rest are global.
    pub(crate) first_global: usize,
    pub(crate) elf_syms: &'data [elf::SymtabEntry],
    symbol_strtab: &'data [u8],
    symtab_shndx: &'data [object::U32<LittleEndian>],

    /// One slot per section header; `None` for sections that don't contribute to the output.
    pub(crate) sections: Vec<Option<InputSection>>,

    /// Headers for sections we synthesize, indexed from `elf.sections.len()` onwards.
    pub(crate) synthetic_headers: Vec<elf::SectionHeader>,

    /// Decoded relocations, indexed by the *target* section.
    pub(crate) rels: Vec<Vec<Rel>>,

    pub(crate) mergeable_sections: Vec<Option<MergeableSection<'data>>>,

    /// One entry per symbol table entry. Locals point at per-file records, globals at interned
    /// ones. Synthesized fragment symbols are appended past the symtab entries.
    pub(crate) symbols: Vec<&'data Symbol<'data>>,
    pub(crate) has_symver: Vec<bool>,
    pub(crate) has_common_symbol: bool,

    pub(crate) comdat_groups: Vec<ComdatGroupRef<'data>>,

    pub(crate) eh_frame_sections: Vec<u32>,
    pub(crate) cies: Vec<crate::eh_frame::CieRecord>,
    pub(crate) fdes: Vec<crate::eh_frame::FdeRecord>,

    pub(crate) gnu_properties: hashbrown::HashMap<u32, u32>,
    pub(crate) riscv_attributes: Option<elf::RiscvAttributes>,
    pub(crate) llvm_addrsig: Option<u32>,
    pub(crate) debug_info: Option<u32>,
    pub(crate) debug_pubnames: Option<u32>,
    pub(crate) debug_pubtypes: Option<u32>,
    pub(crate) got2: Option<u32>,

    pub(crate) is_rust_obj: bool,
    pub(crate) is_gcc_offload_obj: bool,
    pub(crate) has_init_array: bool,
    pub(crate) has_ctors: bool,
    pub(crate) needs_executable_stack: bool,

    /// Symbols synthesized for relocations into mergeable sections.
    pub(crate) frag_syms: Vec<&'data Symbol<'data>>,

    // Symbol table emission state, filled in by the sizing pass.
    pub(crate) output_sym_indices: Vec<Option<u32>>,
    pub(crate) num_local_symtab: u32,
    pub(crate) num_global_symtab: u32,
    pub(crate) strtab_size: u32,
    pub(crate) strtab_offset: u32,
    pub(crate) local_symtab_idx: u32,
    pub(crate) global_symtab_idx: u32,
}

/// A section of this file that may contribute to the output.
#[derive(Debug, Clone, Copy)]
pub struct InputSection {
    pub shndx: u32,

    /// Index of the relocation section targeting this one, if any.
    pub relsec_idx: Option<u32>,

    pub is_alive: bool,

    /// The `.ARM.exidx` section covering this one.
    pub exidx: Option<u32>,

    /// The range of this section's frame descriptions in the file's `fdes` vector.
    pub fde_range: Option<(u32, u32)>,
}

impl InputSection {
    fn new(shndx: u32) -> Self {
        Self {
            shndx,
            relsec_idx: None,
            is_alive: true,
            exidx: None,
            fde_range: None,
        }
    }
}

/// A COMDAT group this file provides, paired with its global record.
pub struct ComdatGroupRef<'data> {
    pub(crate) group: &'data ComdatGroup,
    pub(crate) members: &'data [object::U32<LittleEndian>],
}

impl<'data> ObjectFile<'data> {
    pub fn parse(ctx: &Context<'data>, input: FileInput<'data>, file_id: FileId) -> Result<Self> {
        let data = input.mapped.data();
        let elf = elf::File::parse(data).with_context(|| format!("{input}"))?;
        let arch = elf.arch()?;
        if arch != ctx.args.arch {
            bail!(
                "`{input}` has incompatible architecture: {arch}, expecting {}",
                ctx.args.arch
            );
        }

        let mut first_global = 0;
        let mut elf_syms: &[elf::SymtabEntry] = &[];
        let mut symbol_strtab: &[u8] = &[];
        let mut symtab_shndx: &[object::U32<LittleEndian>] = &[];

        if let Some(symtab) = elf.find_section(object::elf::SHT_SYMTAB) {
            first_global = symtab.sh_info.get(LittleEndian) as usize;
            elf_syms = elf.section_data_as_array(symtab)?;
            symbol_strtab = elf.string_table(symtab.sh_link.get(LittleEndian) as usize)?;
            if let Some(shndx) = elf.find_section(object::elf::SHT_SYMTAB_SHNDX) {
                symtab_shndx = elf.section_data_as_array(shndx)?;
            }
        }

        let num_sections = elf.sections.len();

        let mut file = Self {
            input,
            file_id,
            elf,
            arch,
            is_reachable: AtomicBool::new(!input.in_archive),
            first_global,
            elf_syms,
            symbol_strtab,
            symtab_shndx,
            sections: Vec::new(),
            synthetic_headers: Vec::new(),
            rels: Vec::new(),
            mergeable_sections: Vec::new(),
            symbols: Vec::new(),
            has_symver: Vec::new(),
            has_common_symbol: false,
            comdat_groups: Vec::new(),
            eh_frame_sections: Vec::new(),
            cies: Vec::new(),
            fdes: Vec::new(),
            gnu_properties: hashbrown::HashMap::new(),
            riscv_attributes: None,
            llvm_addrsig: None,
            debug_info: None,
            debug_pubnames: None,
            debug_pubtypes: None,
            got2: None,
            is_rust_obj: false,
            is_gcc_offload_obj: false,
            has_init_array: false,
            has_ctors: false,
            needs_executable_stack: false,
            frag_syms: Vec::new(),
            output_sym_indices: Vec::new(),
            num_local_symtab: 0,
            num_global_symtab: 0,
            strtab_size: 0,
            strtab_offset: 0,
            local_symtab_idx: 0,
            global_symtab_idx: 0,
        };

        file.sections.resize_with(num_sections, || None);
        file.rels.resize_with(num_sections, Vec::new);
        file.mergeable_sections.resize_with(num_sections, || None);

        file.initialize_sections(ctx)
            .with_context(|| format!("{input}"))?;
        file.initialize_symbols(ctx)
            .with_context(|| format!("{input}"))?;

        if file.arch.needs_relocation_sort() {
            file.sort_relocations();
        }

        Ok(file)
    }

    fn initialize_sections(&mut self, ctx: &Context<'data>) -> Result {
        let e = LittleEndian;
        let mut decoded_crel: hashbrown::HashMap<u32, Vec<Rel>> = hashbrown::HashMap::new();

        for i in 0..self.elf.sections.len() {
            let shdr = &self.elf.sections[i];
            let sh_type = shdr.sh_type.get(e);
            let flags = SectionFlags::from_header(shdr);
            let name = self.elf.section_name(shdr).unwrap_or_default();

            if flags.contains(shf::EXCLUDE) && name.starts_with(b".gnu.offload_lto_.symtab.") {
                self.is_gcc_offload_obj = true;
                continue;
            }

            if flags.contains(shf::EXCLUDE)
                && !flags.contains(shf::ALLOC)
                && sh_type != elf::SHT_LLVM_ADDRSIG
                && !ctx.args.relocatable
            {
                continue;
            }

            if self.arch == Architecture::Arm && sh_type == elf::SHT_ARM_ATTRIBUTES {
                continue;
            }

            if self.arch == Architecture::Riscv64 && sh_type == elf::SHT_RISCV_ATTRIBUTES {
                self.riscv_attributes = elf::parse_riscv_attributes(self.elf.section_data(shdr)?)?;
                continue;
            }

            match sh_type {
                object::elf::SHT_GROUP => {
                    self.initialize_comdat_group(ctx, shdr)?;
                }
                elf::SHT_CREL => {
                    let rels = crel::decode_crel(self.elf.section_data(shdr)?, self.arch)?;
                    decoded_crel.insert(i as u32, rels);
                }
                object::elf::SHT_REL
                | object::elf::SHT_RELA
                | object::elf::SHT_SYMTAB
                | object::elf::SHT_SYMTAB_SHNDX
                | object::elf::SHT_STRTAB
                | object::elf::SHT_NULL => {}
                _ => {
                    if !self.arch.is_known_section_type(sh_type, flags.raw()) {
                        bail!(
                            "{}: unsupported section type: 0x{sh_type:x}",
                            String::from_utf8_lossy(name)
                        );
                    }

                    // An executable `.note.GNU-stack` would make the whole stack executable.
                    // Silently honouring that is too dangerous, so we only record it and let
                    // the caller decide, telling the user unless they opted in.
                    if name == b".note.GNU-stack" && !ctx.args.relocatable {
                        if flags.contains(shf::EXECINSTR) {
                            if !ctx.args.z_execstack && !ctx.args.z_execstack_if_needed {
                                ctx.diagnostics.warn_once(
                                    "execstack",
                                    format_args!(
                                        "{}: this file may cause a segmentation fault because it \
                                         requires an executable stack",
                                        self.input
                                    ),
                                );
                            }
                            self.needs_executable_stack = true;
                        }
                        continue;
                    }

                    if name == b".note.gnu.property" {
                        elf::parse_note_gnu_property(
                            self.elf.section_data(shdr)?,
                            &mut self.gnu_properties,
                        )?;
                        continue;
                    }

                    // Input files don't normally carry a build id, but `ld -r --build-id` can
                    // produce one.
                    if name == b".note.gnu.build-id" {
                        continue;
                    }

                    // Old glibc i386 CRT files and ICC.
                    if name == b".gnu.linkonce.t.__x86.get_pc_thunk.bx"
                        || name == b".gnu.linkonce.t.__i686.get_pc_thunk.bx"
                        || name == b".gnu.linkonce.d.DW.ref.__gxx_personality_v0"
                    {
                        continue;
                    }

                    if ctx.args.strip_debug()
                        && !flags.contains(shf::ALLOC)
                        && name.starts_with(b".debug")
                    {
                        continue;
                    }

                    if !ctx.args.discard_section.is_empty()
                        && ctx.args.discard_section.contains(name)
                    {
                        continue;
                    }

                    if name == b".comment" && self.elf.section_data(shdr)?.starts_with(b"rustc ") {
                        self.is_rust_obj = true;
                    }

                    // Without a section header table in the output there's nowhere to place
                    // non-allocated sections.
                    if ctx.args.oformat_binary && !flags.contains(shf::ALLOC) {
                        continue;
                    }

                    self.sections[i] = Some(InputSection::new(i as u32));

                    if sh_type == elf::SHT_LLVM_ADDRSIG && !ctx.args.relocatable {
                        // sh_link should name the symbol table. Tools that rewrite the symbol
                        // table (objcopy, `ld -r`) tend not to preserve it; such sections are
                        // unusable for --icf=safe.
                        if shdr.sh_link.get(e) != 0 {
                            self.llvm_addrsig = Some(i as u32);
                            self.sections[i] = None;
                        }
                        continue;
                    }

                    if matches!(
                        sh_type,
                        object::elf::SHT_INIT_ARRAY
                            | object::elf::SHT_FINI_ARRAY
                            | object::elf::SHT_PREINIT_ARRAY
                    ) {
                        self.has_init_array = true;
                    }

                    if name == b".ctors"
                        || name.starts_with(b".ctors.")
                        || name == b".dtors"
                        || name.starts_with(b".dtors.")
                    {
                        self.has_ctors = true;
                    }

                    if name == b".eh_frame" {
                        self.eh_frame_sections.push(i as u32);
                    }

                    if self.arch == Architecture::Ppc32 && name == b".got2" {
                        self.got2 = Some(i as u32);
                    }

                    if ctx.args.gdb_index {
                        self.capture_debug_sections(i as u32, name)?;
                    }
                }
            }
        }

        self.bind_relocation_sections(decoded_crel)?;

        if self.arch == Architecture::Arm {
            self.bind_exidx_sections();
        }

        Ok(())
    }

    fn initialize_comdat_group(&mut self, ctx: &Context<'data>, shdr: &elf::SectionHeader) -> Result {
        let e = LittleEndian;

        let signature_sym = shdr.sh_info.get(e) as usize;
        ensure!(
            signature_sym < self.elf_syms.len(),
            "invalid symbol index in SHT_GROUP"
        );
        let esym = &self.elf_syms[signature_sym];

        let signature = if esym.st_type() == object::elf::STT_SECTION {
            let shndx = self.esym_shndx(signature_sym, esym)? as usize;
            self.elf.section_name(self.elf.section(shndx)?)?
        } else {
            elf::str_from_table(self.symbol_strtab, esym.st_name.get(e))?
        };

        // GCC used to emit broken groups named "wm4.*" for .debug_macros.
        if signature.starts_with(b"wm4.") {
            return Ok(());
        }

        let entries: &[object::U32<LittleEndian>] = self.elf.section_data_as_array(shdr)?;
        ensure!(!entries.is_empty(), "empty SHT_GROUP");
        if entries[0].get(e) == 0 {
            return Ok(());
        }
        ensure!(
            entries[0].get(e) == object::elf::GRP_COMDAT,
            "unsupported SHT_GROUP format"
        );

        let group = ctx.insert_comdat_group(signature);
        self.comdat_groups.push(ComdatGroupRef {
            group,
            members: &entries[1..],
        });

        Ok(())
    }

    fn capture_debug_sections(&mut self, index: u32, name: &[u8]) -> Result {
        match name {
            b".debug_info" => self.debug_info = Some(index),
            // Their contents get folded into .gdb_index, so keeping them in the output would
            // just waste space.
            b".debug_gnu_pubnames" => {
                self.debug_pubnames = Some(index);
                self.sections[index as usize].as_mut().unwrap().is_alive = false;
            }
            b".debug_gnu_pubtypes" => {
                self.debug_pubtypes = Some(index);
                self.sections[index as usize].as_mut().unwrap().is_alive = false;
            }
            b".debug_types" => bail!(
                ".gdb_index generation is not compatible with .debug_types; recompile without \
                 -fdebug-types-section"
            ),
            _ => {}
        }
        Ok(())
    }

    fn bind_relocation_sections(
        &mut self,
        mut decoded_crel: hashbrown::HashMap<u32, Vec<Rel>>,
    ) -> Result {
        let e = LittleEndian;
        let reloc_type = if self.arch.is_rela() {
            object::elf::SHT_RELA
        } else {
            object::elf::SHT_REL
        };

        for i in 0..self.elf.sections.len() {
            let shdr = &self.elf.sections[i];
            let sh_type = shdr.sh_type.get(e);
            if sh_type != reloc_type && sh_type != elf::SHT_CREL {
                continue;
            }

            let target_idx = shdr.sh_info.get(e) as usize;
            let Some(target) = self.sections.get_mut(target_idx).and_then(Option::as_mut) else {
                continue;
            };
            ensure!(
                target.relsec_idx.is_none(),
                "section {target_idx} has multiple relocation sections"
            );
            target.relsec_idx = Some(i as u32);

            self.rels[target_idx] = if sh_type == elf::SHT_CREL {
                decoded_crel.remove(&(i as u32)).unwrap_or_default()
            } else if self.arch.is_rela() {
                crel::decode_rela(self.elf.section_data_as_array(shdr)?)
            } else {
                crel::decode_rel(self.elf.section_data_as_array(shdr)?)
            };
        }

        Ok(())
    }

    fn bind_exidx_sections(&mut self) {
        let e = LittleEndian;
        for i in 0..self.elf.sections.len() {
            if self.sections[i].is_none() {
                continue;
            }
            let shdr = &self.elf.sections[i];
            if shdr.sh_type.get(e) != elf::SHT_ARM_EXIDX {
                continue;
            }
            let target_idx = shdr.sh_link.get(e) as usize;
            if let Some(target) = self.sections.get_mut(target_idx).and_then(Option::as_mut) {
                target.exidx = Some(i as u32);
            }
        }
    }

    fn initialize_symbols(&mut self, ctx: &Context<'data>) -> Result {
        if self.elf_syms.is_empty() {
            return Ok(());
        }
        let e = LittleEndian;

        self.symbols.reserve(self.elf_syms.len());
        self.has_symver
            .resize(self.elf_syms.len() - self.first_global, false);

        // Symbol 0 is the null symbol.
        let null_sym = ctx.alloc_symbol(&[]);
        {
            let mut state = null_sym.mu.lock().unwrap();
            state.owner = Some(self.file_id);
        }
        self.symbols.push(null_sym);

        for i in 1..self.first_global {
            let esym = &self.elf_syms[i];
            ensure!(!esym.is_common(e), "common local symbol?");

            let name = if esym.st_type() == object::elf::STT_SECTION {
                let shndx = self.esym_shndx(i, esym)? as usize;
                self.elf.section_name(self.elf.section(shndx)?)?
            } else {
                elf::str_from_table(self.symbol_strtab, esym.st_name.get(e))?
            };

            let sym = ctx.alloc_symbol(name);
            let mut state = sym.mu.lock().unwrap();
            state.owner = Some(self.file_id);
            state.value = esym.st_value.get(e);
            state.sym_idx = i as u32;
            state.extent = match esym.st_shndx(e) {
                object::elf::SHN_UNDEF => SymbolExtent::Undefined,
                object::elf::SHN_ABS => SymbolExtent::Absolute,
                _ => SymbolExtent::Section(self.esym_shndx(i, esym)?),
            };
            drop(state);
            self.symbols.push(sym);
        }

        for i in self.first_global..self.elf_syms.len() {
            let esym = &self.elf_syms[i];

            if esym.is_common(e) {
                self.has_common_symbol = true;
            }

            let mut key = elf::str_from_table(self.symbol_strtab, esym.st_name.get(e))?;
            let mut name = key;

            // `foo@VERSION` references a specific version; `foo@@VERSION` is a versioned
            // definition that also answers to plain `foo`, so it interns under the bare name.
            // A trailing bare `@` or `@@` means no version at all.
            if let Some(at) = memchr::memchr(b'@', name) {
                let ver = &name[at..];
                name = &name[..at];
                if ver != b"@" && ver != b"@@" {
                    if ver.starts_with(b"@@") {
                        key = name;
                    }
                    self.has_symver[i - self.first_global] = true;
                }
            }

            let sym = if esym.is_undefined(e)
                && name.starts_with(b"__real_")
                && ctx.args.should_wrap(&name[7..])
            {
                ctx.get_symbol_named(&key[7..], &name[7..])
            } else {
                let sym = ctx.get_symbol_named(key, name);
                if esym.is_undefined(e) && sym.is_wrapped() {
                    let wrap_key = ctx.alloc_bytes(&[b"__wrap_".as_slice(), key].concat());
                    let wrap_name = &wrap_key[..7 + name.len()];
                    ctx.get_symbol_named(wrap_key, wrap_name)
                } else {
                    sym
                }
            };

            self.symbols.push(sym);
        }

        Ok(())
    }

    fn sort_relocations(&mut self) {
        for i in 1..self.sections.len() {
            let Some(isec) = &self.sections[i] else {
                continue;
            };
            if !isec.is_alive {
                continue;
            }
            let flags = SectionFlags::from_header(&self.elf.sections[i]);
            if !flags.contains(shf::ALLOC) {
                continue;
            }
            crel::sort_relocations(&mut self.rels[i]);
        }
    }

    /// The section header for `shndx`, which may name a synthesized section.
    pub(crate) fn shdr(&self, shndx: u32) -> Result<&elf::SectionHeader> {
        let shndx = shndx as usize;
        if shndx < self.elf.sections.len() {
            self.elf.section(shndx)
        } else {
            self.synthetic_headers
                .get(shndx - self.elf.sections.len())
                .with_context(|| format!("section index {shndx} is out of bounds"))
        }
    }

    /// Resolves a symbol entry's section index, following the extended-index table when
    /// `st_shndx` is `SHN_XINDEX`.
    pub(crate) fn esym_shndx(&self, i: usize, esym: &elf::SymtabEntry) -> Result<u32> {
        let e = LittleEndian;
        let shndx = esym.st_shndx(e);
        if shndx == object::elf::SHN_XINDEX {
            self.symtab_shndx
                .get(i)
                .map(|v| v.get(e))
                .context("SHN_XINDEX without a SHT_SYMTAB_SHNDX entry")
        } else {
            Ok(u32::from(shndx))
        }
    }

    pub(crate) fn section_is_alive(&self, shndx: u32) -> bool {
        self.sections
            .get(shndx as usize)
            .and_then(Option::as_ref)
            .is_some_and(|s| s.is_alive)
    }

    /// Sort key for grouping frame descriptions: earlier files and earlier sections first.
    pub(crate) fn section_priority(&self, shndx: u32) -> u64 {
        (u64::from(self.input.priority) << 32) | u64::from(shndx)
    }

    pub(crate) fn is_reachable(&self) -> bool {
        self.is_reachable.load(Ordering::SeqCst)
    }

    /// Returns true if this call made the file reachable.
    pub(crate) fn mark_reachable(&self) -> bool {
        !self.is_reachable.swap(true, Ordering::SeqCst)
    }

    /// The source filename, as recorded by the compiler via an STT_FILE symbol.
    pub fn source_name(&self) -> Option<&'data [u8]> {
        let e = LittleEndian;
        self.elf_syms[..self.first_global.min(self.elf_syms.len())]
            .iter()
            .find(|esym| esym.st_type() == object::elf::STT_FILE)
            .and_then(|esym| elf::str_from_table(self.symbol_strtab, esym.st_name.get(e)).ok())
    }

    /// Registers this file's claim on each of its COMDAT groups.
    pub(crate) fn claim_comdat_groups(&self) {
        for group_ref in &self.comdat_groups {
            group_ref.group.claim(self.input.priority);
        }
    }

    /// Kills the member sections of every COMDAT group that another file won.
    pub(crate) fn eliminate_duplicate_comdat_groups(&mut self) {
        let e = LittleEndian;
        for group_ref in &self.comdat_groups {
            if group_ref.group.owned_by(self.input.priority) {
                continue;
            }
            for member in group_ref.members {
                let idx = member.get(e) as usize;
                if let Some(section) = self.sections.get_mut(idx).and_then(Option::as_mut) {
                    section.is_alive = false;
                }
            }
        }
    }

    /// Allocates space for common symbols that are still common after resolution. Tentative
    /// definitions that did get a real definition elsewhere resolved away in the election; what
    /// remains gets a synthesized nobits section per symbol.
    pub(crate) fn convert_common_symbols(&mut self, ctx: &Context<'data>) {
        if !self.has_common_symbol {
            return;
        }
        let e = LittleEndian;

        for i in self.first_global..self.elf_syms.len() {
            if !self.elf_syms[i].is_common(e) {
                continue;
            }

            let sym = self.symbols[i];
            let mut state = sym.mu.lock().unwrap();
            if state.owner != Some(self.file_id) {
                if ctx.args.warn_common {
                    ctx.diagnostics.warn_once(
                        &format!("common:{}", String::from_utf8_lossy(sym.name())),
                        format_args!("{}: multiple common symbols: {sym}", self.input),
                    );
                }
                continue;
            }

            let flags = if self.elf_syms[i].st_type() == object::elf::STT_TLS {
                u64::from(object::elf::SHF_ALLOC | object::elf::SHF_WRITE | object::elf::SHF_TLS)
            } else {
                u64::from(object::elf::SHF_ALLOC | object::elf::SHF_WRITE)
            };
            let shdr = elf::SectionHeader {
                sh_name: object::U32::new(e, 0),
                sh_type: object::U32::new(e, object::elf::SHT_NOBITS),
                sh_flags: object::U64::new(e, flags),
                sh_addr: object::U64::new(e, 0),
                sh_offset: object::U64::new(e, 0),
                sh_size: object::U64::new(e, self.elf_syms[i].st_size.get(e)),
                sh_link: object::U32::new(e, 0),
                sh_info: object::U32::new(e, 0),
                sh_addralign: object::U64::new(e, self.elf_syms[i].st_value.get(e)),
                sh_entsize: object::U64::new(e, 0),
            };

            let shndx = (self.elf.sections.len() + self.synthetic_headers.len()) as u32;
            self.synthetic_headers.push(shdr);
            self.sections.push(Some(InputSection::new(shndx)));
            self.rels.push(Vec::new());
            self.mergeable_sections.push(None);

            state.extent = SymbolExtent::Section(shndx);
            state.value = 0;
            state.sym_idx = i as u32;
            state.ver_idx = ctx.args.default_version;
            state.is_weak = false;
        }
    }
}

impl std::fmt::Display for ObjectFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.input, f)
    }
}
