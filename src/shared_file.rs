//! Ingestion of shared objects. A DSO contributes a symbol set (with GNU symbol versioning),
//! its soname and its own dependency list; its sections never reach the output.

use crate::Result;
use crate::bail;
use crate::context::Context;
use crate::elf;
use crate::ensure;
use crate::input_data::FileId;
use crate::input_data::FileInput;
use crate::symbol::Symbol;
use anyhow::Context as _;
use object::LittleEndian;
use object::read::elf::Sym as _;
use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

pub struct SharedFile<'data> {
    pub input: FileInput<'data>,
    pub file_id: FileId,
    pub(crate) elf: elf::File<'data>,

    is_reachable: AtomicBool,

    pub soname: &'data [u8],
    pub dt_needed: Vec<&'data [u8]>,
    pub dt_audit: Option<&'data [u8]>,

    /// Version names indexed by `vd_ndx`.
    version_names: Vec<Option<&'data [u8]>>,

    /// The dynamic symbol entries we kept: defined-or-undefined globals whose version isn't
    /// `VER_NDX_LOCAL`.
    pub(crate) elf_syms: Vec<elf::SymtabEntry>,
    pub(crate) versyms: Vec<u16>,

    pub(crate) symbols: Vec<&'data Symbol<'data>>,

    /// For a versioned default symbol `foo@@V`, the extra `foo@V` binding that forwards to the
    /// base symbol after resolution.
    pub(crate) alias_symbols: Vec<Option<&'data Symbol<'data>>>,

    /// Indices into `elf_syms` sorted by `st_value`; built on first use.
    sorted_syms: OnceLock<Vec<u32>>,

    // Symbol table emission state.
    pub(crate) output_sym_indices: Vec<Option<u32>>,
    pub(crate) num_global_symtab: u32,
    pub(crate) strtab_size: u32,
    pub(crate) strtab_offset: u32,
    pub(crate) global_symtab_idx: u32,
}

impl<'data> SharedFile<'data> {
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

        let mut file = Self {
            input,
            file_id,
            elf,
            is_reachable: AtomicBool::new(!input.in_archive),
            soname: &[],
            dt_needed: Vec::new(),
            dt_audit: None,
            version_names: Vec::new(),
            elf_syms: Vec::new(),
            versyms: Vec::new(),
            symbols: Vec::new(),
            alias_symbols: Vec::new(),
            sorted_syms: OnceLock::new(),
            output_sym_indices: Vec::new(),
            num_global_symtab: 0,
            strtab_size: 0,
            strtab_offset: 0,
            global_symtab_idx: 0,
        };

        file.soname = file.read_soname()?;

        let Some(symtab_sec) = file.elf.find_section(object::elf::SHT_DYNSYM) else {
            return Ok(file);
        };

        file.dt_needed = file.read_dynamic_strings(object::elf::DT_NEEDED as u64)?;
        file.dt_audit = file.read_dynamic_strings(elf::DT_AUDIT)?.first().copied();
        file.version_names = file.read_verdef().with_context(|| format!("{input}"))?;

        file.initialize_symbols(ctx, symtab_sec)
            .with_context(|| format!("{input}"))?;

        Ok(file)
    }

    fn read_soname(&self) -> Result<&'data [u8]> {
        let e = LittleEndian;
        if let Some(dynamic) = self.elf.find_section(object::elf::SHT_DYNAMIC) {
            let strtab = self.elf.string_table(dynamic.sh_link.get(e) as usize)?;
            let entries: &[elf::DynamicEntry] = self.elf.section_data_as_array(dynamic)?;
            for entry in entries {
                if entry.d_tag.get(e) == u64::from(object::elf::DT_SONAME) {
                    return elf::str_from_table(strtab, entry.d_val.get(e) as u32);
                }
            }
        }

        let name = self.input.mapped.name.as_bytes();
        if self.input.mapped.given_fullpath {
            Ok(name)
        } else {
            Ok(name
                .rsplit(|&b| b == b'/')
                .next()
                .unwrap_or(name))
        }
    }

    fn read_dynamic_strings(&self, tag: u64) -> Result<Vec<&'data [u8]>> {
        let e = LittleEndian;
        let mut out = Vec::new();
        if let Some(dynamic) = self.elf.find_section(object::elf::SHT_DYNAMIC) {
            let strtab = self.elf.string_table(dynamic.sh_link.get(e) as usize)?;
            let entries: &[elf::DynamicEntry] = self.elf.section_data_as_array(dynamic)?;
            for entry in entries {
                if entry.d_tag.get(e) == tag {
                    out.push(elf::str_from_table(strtab, entry.d_val.get(e) as u32)?);
                }
            }
        }
        Ok(out)
    }

    /// Builds the version-index to name table from `SHT_GNU_VERDEF`. The walk follows `vd_next`
    /// offsets and terminates when one is zero.
    fn read_verdef(&self) -> Result<Vec<Option<&'data [u8]>>> {
        let e = LittleEndian;
        let Some(verdef_sec) = self.elf.find_section(object::elf::SHT_GNU_VERDEF) else {
            return Ok(Vec::new());
        };

        let verdef = self.elf.section_data(verdef_sec)?;
        let strtab = self.elf.string_table(verdef_sec.sh_link.get(e) as usize)?;

        let mut names: Vec<Option<&'data [u8]>> = Vec::new();
        let mut pos = 0usize;

        loop {
            let entry: &elf::Verdef = object::from_bytes(
                verdef
                    .get(pos..pos + size_of::<elf::Verdef>())
                    .context("truncated verdef")?,
            )
            .map_err(|()| crate::Error::msg("misaligned verdef"))?
            .0;

            let vd_ndx = entry.vd_ndx.get(e);
            ensure!(vd_ndx != elf::VER_NDX_UNSPECIFIED, "symbol version too large");

            let aux_pos = pos + entry.vd_aux.get(e) as usize;
            let aux: &elf::Verdaux = object::from_bytes(
                verdef
                    .get(aux_pos..aux_pos + size_of::<elf::Verdaux>())
                    .context("truncated verdaux")?,
            )
            .map_err(|()| crate::Error::msg("misaligned verdaux"))?
            .0;

            if names.len() <= vd_ndx as usize {
                names.resize(vd_ndx as usize + 1, None);
            }
            names[vd_ndx as usize] = Some(elf::str_from_table(strtab, aux.vda_name.get(e))?);

            let vd_next = entry.vd_next.get(e) as usize;
            if vd_next == 0 {
                break;
            }
            pos += vd_next;
        }

        Ok(names)
    }

    fn initialize_symbols(
        &mut self,
        ctx: &Context<'data>,
        symtab_sec: &'data elf::SectionHeader,
    ) -> Result {
        let e = LittleEndian;

        let strtab = self.elf.string_table(symtab_sec.sh_link.get(e) as usize)?;
        let esyms: &[elf::SymtabEntry] = self.elf.section_data_as_array(symtab_sec)?;

        let versym_table: &[elf::Versym] = match self.elf.find_section(object::elf::SHT_GNU_VERSYM)
        {
            Some(shdr) => self.elf.section_data_as_array(shdr)?,
            None => &[],
        };

        for i in symtab_sec.sh_info.get(e) as usize..esyms.len() {
            let esym = &esyms[i];

            let raw_versym = versym_table.get(i).map(|v| v.0.get(e));
            let ver = match raw_versym {
                Some(versym) if !esym.is_undefined(e) => versym & !object::elf::VERSYM_HIDDEN,
                _ => object::elf::VER_NDX_GLOBAL,
            };
            if ver == object::elf::VER_NDX_LOCAL {
                continue;
            }

            let name = elf::str_from_table(strtab, esym.st_name.get(e))?;

            // Among same-named symbols of different versions, exactly one is the default. It
            // answers both to `foo` and to `foo@VERSION`, so it gets two bindings; the alias is
            // redirected onto the base symbol during resolution. A hidden (non-default)
            // versioned symbol answers only to `foo@VERSION`.
            let (symbol, alias) = match raw_versym {
                None => (ctx.get_symbol_named(name, name), None),
                Some(_) if ver == object::elf::VER_NDX_GLOBAL => {
                    (ctx.get_symbol_named(name, name), None)
                }
                Some(versym) if versym & object::elf::VERSYM_HIDDEN != 0 => {
                    (self.versioned_symbol(ctx, name, ver)?, None)
                }
                Some(_) => (
                    ctx.get_symbol_named(name, name),
                    Some(self.versioned_symbol(ctx, name, ver)?),
                ),
            };

            self.elf_syms.push(*esym);
            self.versyms.push(ver);
            self.symbols.push(symbol);
            self.alias_symbols.push(alias);
        }

        Ok(())
    }

    fn versioned_symbol(
        &self,
        ctx: &Context<'data>,
        name: &'data [u8],
        ver: u16,
    ) -> Result<&'data Symbol<'data>> {
        let version = self
            .version_names
            .get(ver as usize)
            .copied()
            .flatten()
            .with_context(|| format!("invalid version index {ver}"))?;
        let key = ctx.alloc_bytes(&[name, b"@".as_slice(), version].concat());
        Ok(ctx.get_symbol_named(key, &key[..name.len()]))
    }

    pub(crate) fn is_reachable(&self) -> bool {
        self.is_reachable.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_reachable(&self) -> bool {
        !self.is_reachable.swap(true, Ordering::SeqCst)
    }

    /// All symbols this file defines at the given address. Used when the layout needs to copy a
    /// symbol and every alias at the same address with it.
    pub(crate) fn symbols_at(&self, value: u64) -> impl Iterator<Item = &'data Symbol<'data>> {
        let e = LittleEndian;
        let sorted = self.sorted_syms.get_or_init(|| {
            let mut indices: Vec<u32> = (0..self.elf_syms.len() as u32)
                .filter(|&i| {
                    self.symbols[i as usize].file_id() == Some(self.file_id)
                })
                .collect();
            indices.sort_by_key(|&i| (self.elf_syms[i as usize].st_value.get(e), i));
            indices
        });

        let start = sorted.partition_point(|&i| self.elf_syms[i as usize].st_value.get(e) < value);
        let end = sorted.partition_point(|&i| self.elf_syms[i as usize].st_value.get(e) <= value);
        sorted[start..end].iter().map(|&i| self.symbols[i as usize])
    }

    /// Infers the alignment requirement of one of our symbols. It isn't explicitly recorded, so
    /// take the section's alignment, capped by the largest power of two dividing the address.
    pub(crate) fn alignment_of(&self, esym: &elf::SymtabEntry) -> Result<u64> {
        let e = LittleEndian;
        let shdr = self.elf.section(usize::from(esym.st_shndx(e)))?;
        let mut align = shdr.sh_addralign.get(e).max(1);
        let value = esym.st_value.get(e);
        if value != 0 {
            align = align.min(1u64 << value.trailing_zeros());
        }
        Ok(align)
    }

    /// Whether the address lives in a read-only segment of this file.
    pub(crate) fn is_readonly(&self, value: u64) -> bool {
        let e = LittleEndian;
        let data = self.input.mapped.data();
        let phoff = self.elf.ehdr.e_phoff.get(e) as usize;
        let phnum = self.elf.ehdr.e_phnum.get(e) as usize;

        let Ok((phdrs, _)) = object::slice_from_bytes::<elf::ProgramHeader>(
            match data.get(phoff..) {
                Some(rest) => rest,
                None => return false,
            },
            phnum,
        ) else {
            return false;
        };

        phdrs.iter().any(|phdr| {
            let p_type = phdr.p_type.get(e);
            (p_type == object::elf::PT_LOAD || p_type == object::elf::PT_GNU_RELRO)
                && phdr.p_flags.get(e) & object::elf::PF_W == 0
                && phdr.p_vaddr.get(e) <= value
                && value < phdr.p_vaddr.get(e) + phdr.p_memsz.get(e)
        })
    }
}

impl std::fmt::Display for SharedFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.input, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Args;
    use crate::context::Arenas;
    use crate::test_elf::ElfBuilder;

    fn parse_dso<'data>(
        ctx: &Context<'data>,
        mapped: &'data crate::input_data::MappedFile,
    ) -> Result<SharedFile<'data>> {
        SharedFile::parse(ctx, FileInput::new(mapped, 0), FileId(0))
    }

    fn dso_with_dynamic(entries: &[(u64, u64)]) -> ElfBuilder {
        let mut b = ElfBuilder::dso();
        let text = b.section(
            ".text",
            object::elf::SHT_PROGBITS,
            u64::from(object::elf::SHF_ALLOC),
            &[0; 0x10],
        );
        b.global_func(b"f", text as u16, 0);
        b.dynamic(entries);
        b
    }

    #[test]
    fn soname_comes_from_dt_soname() {
        let mut b = ElfBuilder::dso();
        let text = b.section(
            ".text",
            object::elf::SHT_PROGBITS,
            u64::from(object::elf::SHF_ALLOC),
            &[0; 0x10],
        );
        b.global_func(b"f", text as u16, 0);
        let soname = b.string(b"libx.so.1");
        b.dynamic(&[(u64::from(object::elf::DT_SONAME), u64::from(soname))]);

        let mapped = crate::input_data::MappedFile::from_bytes("/tmp/whatever.so", b.build());
        let arenas = Box::leak(Box::new(Arenas::default()));
        let ctx = Context::new(Args::default(), &arenas);

        let dso = parse_dso(&ctx, &mapped).unwrap();
        assert_eq!(dso.soname, b"libx.so.1");
    }

    #[test]
    fn soname_falls_back_to_path_or_basename() {
        let by_search =
            crate::input_data::MappedFile::from_bytes("/usr/lib/libfoo.so", dso_with_dynamic(&[]).build());
        let mut by_path =
            crate::input_data::MappedFile::from_bytes("/usr/lib/libfoo.so", dso_with_dynamic(&[]).build());
        by_path.given_fullpath = true;

        let arenas = Box::leak(Box::new(Arenas::default()));
        let ctx = Context::new(Args::default(), &arenas);

        let dso = parse_dso(&ctx, &by_search).unwrap();
        assert_eq!(dso.soname, b"libfoo.so");

        let dso = SharedFile::parse(&ctx, FileInput::new(&by_path, 1), FileId(1)).unwrap();
        assert_eq!(dso.soname, b"/usr/lib/libfoo.so");
    }

    #[test]
    fn dt_needed_and_dt_audit_are_collected() {
        let mut b = ElfBuilder::dso();
        let text = b.section(
            ".text",
            object::elf::SHT_PROGBITS,
            u64::from(object::elf::SHF_ALLOC),
            &[0; 0x10],
        );
        b.global_func(b"f", text as u16, 0);
        let libc = b.string(b"libc.so.6");
        let libm = b.string(b"libm.so.6");
        let audit = b.string(b"libaudit.so");
        b.dynamic(&[
            (u64::from(object::elf::DT_NEEDED), u64::from(libc)),
            (u64::from(object::elf::DT_NEEDED), u64::from(libm)),
            (elf::DT_AUDIT, u64::from(audit)),
        ]);

        let mapped = crate::input_data::MappedFile::from_bytes("lib.so", b.build());
        let arenas = Box::leak(Box::new(Arenas::default()));
        let ctx = Context::new(Args::default(), &arenas);

        let dso = parse_dso(&ctx, &mapped).unwrap();
        assert_eq!(dso.dt_needed, vec![b"libc.so.6".as_slice(), b"libm.so.6"]);
        assert_eq!(dso.dt_audit, Some(b"libaudit.so".as_slice()));
    }

    #[test]
    fn unspecified_verdef_index_is_fatal() {
        let mut b = ElfBuilder::dso();
        let text = b.section(
            ".text",
            object::elf::SHT_PROGBITS,
            u64::from(object::elf::SHF_ALLOC),
            &[0; 0x10],
        );
        let name = b.string(b"V1");
        b.global_func(b"f", text as u16, 0);
        b.versym(&[0, 2]);
        b.verdef(&[(elf::VER_NDX_UNSPECIFIED, name)]);
        b.dynamic(&[]);

        let mapped = crate::input_data::MappedFile::from_bytes("bad.so", b.build());
        let arenas = Box::leak(Box::new(Arenas::default()));
        let ctx = Context::new(Args::default(), &arenas);

        assert!(parse_dso(&ctx, &mapped).is_err());
    }

    #[test]
    fn verdef_parsing_is_deterministic() {
        let build = || {
            let mut b = ElfBuilder::dso();
            let text = b.section(
                ".text",
                object::elf::SHT_PROGBITS,
                u64::from(object::elf::SHF_ALLOC),
                &[0; 0x10],
            );
            let v1 = b.string(b"V1");
            let v2 = b.string(b"V2");
            b.global_func(b"f", text as u16, 0);
            b.versym(&[0, 2]);
            b.verdef(&[(2, v1), (3, v2)]);
            b.dynamic(&[]);
            b.build()
        };

        let m1 = crate::input_data::MappedFile::from_bytes("a.so", build());
        let m2 = crate::input_data::MappedFile::from_bytes("b.so", build());
        let arenas = Box::leak(Box::new(Arenas::default()));
        let ctx = Context::new(Args::default(), &arenas);

        let d1 = parse_dso(&ctx, &m1).unwrap();
        let d2 = SharedFile::parse(&ctx, FileInput::new(&m2, 1), FileId(1)).unwrap();
        assert_eq!(d1.version_names, d2.version_names);
        assert_eq!(d1.version_names[2], Some(b"V1".as_slice()));
        assert_eq!(d1.version_names[3], Some(b"V2".as_slice()));
    }

    #[test]
    fn ver_ndx_local_symbols_are_skipped() {
        let mut b = ElfBuilder::dso();
        let text = b.section(
            ".text",
            object::elf::SHT_PROGBITS,
            u64::from(object::elf::SHF_ALLOC),
            &[0; 0x10],
        );
        b.global_func(b"hidden_impl", text as u16, 0);
        b.global_func(b"public", text as u16, 8);
        b.versym(&[0, object::elf::VER_NDX_LOCAL, object::elf::VER_NDX_GLOBAL]);
        b.dynamic(&[]);

        let mapped = crate::input_data::MappedFile::from_bytes("l.so", b.build());
        let arenas = Box::leak(Box::new(Arenas::default()));
        let ctx = Context::new(Args::default(), &arenas);

        let dso = parse_dso(&ctx, &mapped).unwrap();
        assert_eq!(dso.symbols.len(), 1);
        assert_eq!(dso.symbols[0].name(), b"public");
        assert!(ctx.lookup_symbol(b"hidden_impl").is_none());
    }

    #[test]
    fn symbol_alignment_is_inferred_from_section_and_address() {
        let mut b = ElfBuilder::dso();
        let data = b.section_with(crate::test_elf::SectionSpec {
            name: b".data".to_vec(),
            sh_type: object::elf::SHT_PROGBITS,
            sh_flags: u64::from(object::elf::SHF_ALLOC | object::elf::SHF_WRITE),
            data: vec![0; 0x20],
            link: crate::test_elf::Link::None,
            sh_info: 0,
            sh_entsize: 0,
            sh_addralign: 16,
        });
        b.global(b"v", data as u16, 8);
        b.dynamic(&[]);

        let mapped = crate::input_data::MappedFile::from_bytes("a.so", b.build());
        let arenas = Box::leak(Box::new(Arenas::default()));
        let ctx = Context::new(Args::default(), &arenas);

        let dso = parse_dso(&ctx, &mapped).unwrap();
        // Section wants 16, but the address is only 8-aligned.
        assert_eq!(dso.alignment_of(&dso.elf_syms[0]).unwrap(), 8);

        // No program headers in this synthetic file, so nothing is provably read-only.
        assert!(!dso.is_readonly(8));
    }

    #[test]
    fn symbols_at_returns_all_aliases() {
        let mut b = ElfBuilder::dso();
        let text = b.section(
            ".text",
            object::elf::SHT_PROGBITS,
            u64::from(object::elf::SHF_ALLOC),
            &[0; 0x10],
        );
        b.global_func(b"alias_a", text as u16, 8);
        b.global_func(b"alias_b", text as u16, 8);
        b.global_func(b"other", text as u16, 4);
        b.dynamic(&[]);

        let mapped = crate::input_data::MappedFile::from_bytes("a.so", b.build());
        let arenas = Box::leak(Box::new(Arenas::default()));
        let ctx = Context::new(Args::default(), &arenas);

        let dso = parse_dso(&ctx, &mapped).unwrap();
        let files = [crate::InputFile::Shared(Box::new(dso))];
        crate::resolution::resolve_symbols(&ctx, &files).unwrap();

        let crate::InputFile::Shared(dso) = &files[0] else {
            panic!();
        };
        let at_8: Vec<_> = dso.symbols_at(8).map(|s| s.name().to_vec()).collect();
        assert_eq!(at_8, vec![b"alias_a".to_vec(), b"alias_b".to_vec()]);
        assert_eq!(dso.symbols_at(4).count(), 1);
        assert_eq!(dso.symbols_at(0).count(), 0);
    }
}
