//! In-memory builders for the little ELF inputs the tests feed through the pipeline.

use crate::crel::Rel;

pub(crate) struct SectionSpec {
    pub(crate) name: Vec<u8>,
    pub(crate) sh_type: u32,
    pub(crate) sh_flags: u64,
    pub(crate) data: Vec<u8>,
    pub(crate) link: Link,
    pub(crate) sh_info: u32,
    pub(crate) sh_entsize: u64,
    pub(crate) sh_addralign: u64,
}

pub(crate) enum Link {
    None,
    Symtab,
    Strtab,
    Section(u32),
}

struct SymSpec {
    name_offset: u32,
    info: u8,
    other: u8,
    shndx: u16,
    value: u64,
    size: u64,
}

pub(crate) struct ElfBuilder {
    e_type: u16,
    machine: u16,
    dynamic_symtab: bool,
    force_extended: bool,
    strtab: Vec<u8>,
    syms: Vec<SymSpec>,
    num_locals: usize,
    sections: Vec<SectionSpec>,
}

impl ElfBuilder {
    pub(crate) fn object() -> Self {
        Self {
            e_type: object::elf::ET_REL,
            machine: object::elf::EM_X86_64,
            dynamic_symtab: false,
            force_extended: false,
            strtab: vec![0],
            syms: Vec::new(),
            num_locals: 0,
            sections: Vec::new(),
        }
    }

    pub(crate) fn dso() -> Self {
        Self {
            e_type: object::elf::ET_DYN,
            dynamic_symtab: true,
            ..Self::object()
        }
    }

    pub(crate) fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    /// Uses the long-section-count encodings regardless of the actual counts.
    pub(crate) fn force_extended_header(mut self) -> Self {
        self.force_extended = true;
        self
    }

    /// Interns a string in the symbol string table and returns its offset.
    pub(crate) fn string(&mut self, s: &[u8]) -> u32 {
        let offset = self.strtab.len() as u32;
        self.strtab.extend_from_slice(s);
        self.strtab.push(0);
        offset
    }

    /// Adds a section and returns its header index.
    pub(crate) fn section(&mut self, name: &str, sh_type: u32, sh_flags: u64, data: &[u8]) -> u32 {
        self.section_with(SectionSpec {
            name: name.as_bytes().to_vec(),
            sh_type,
            sh_flags,
            data: data.to_vec(),
            link: Link::None,
            sh_info: 0,
            sh_entsize: 0,
            sh_addralign: 1,
        })
    }

    pub(crate) fn merge_section(
        &mut self,
        name: &str,
        sh_flags: u64,
        entsize: u64,
        data: &[u8],
    ) -> u32 {
        self.section_with(SectionSpec {
            name: name.as_bytes().to_vec(),
            sh_type: object::elf::SHT_PROGBITS,
            sh_flags,
            data: data.to_vec(),
            link: Link::None,
            sh_info: 0,
            sh_entsize: entsize,
            sh_addralign: 1,
        })
    }

    pub(crate) fn section_with(&mut self, spec: SectionSpec) -> u32 {
        self.sections.push(spec);
        self.sections.len() as u32
    }

    fn add_symbol(
        &mut self,
        name: &[u8],
        bind: u8,
        st_type: u8,
        shndx: u16,
        value: u64,
        size: u64,
    ) -> u32 {
        let name_offset = if name.is_empty() { 0 } else { self.string(name) };
        self.syms.push(SymSpec {
            name_offset,
            info: (bind << 4) | (st_type & 0xf),
            other: 0,
            shndx,
            value,
            size,
        });
        self.syms.len() as u32
    }

    pub(crate) fn local(&mut self, name: &[u8], st_type: u8, shndx: u16, value: u64) -> u32 {
        assert_eq!(self.num_locals, self.syms.len(), "locals must precede globals");
        self.num_locals += 1;
        self.add_symbol(name, object::elf::STB_LOCAL, st_type, shndx, value, 0)
    }

    pub(crate) fn section_symbol(&mut self, shndx: u32) -> u32 {
        self.local(&[], object::elf::STT_SECTION, shndx as u16, 0)
    }

    pub(crate) fn global(&mut self, name: &[u8], shndx: u16, value: u64) -> u32 {
        self.add_symbol(
            name,
            object::elf::STB_GLOBAL,
            object::elf::STT_NOTYPE,
            shndx,
            value,
            0,
        )
    }

    pub(crate) fn global_func(&mut self, name: &[u8], shndx: u16, value: u64) -> u32 {
        self.add_symbol(
            name,
            object::elf::STB_GLOBAL,
            object::elf::STT_FUNC,
            shndx,
            value,
            0,
        )
    }

    pub(crate) fn weak(&mut self, name: &[u8], shndx: u16, value: u64) -> u32 {
        self.add_symbol(
            name,
            object::elf::STB_WEAK,
            object::elf::STT_NOTYPE,
            shndx,
            value,
            0,
        )
    }

    pub(crate) fn undefined(&mut self, name: &[u8]) -> u32 {
        self.global(name, object::elf::SHN_UNDEF, 0)
    }

    pub(crate) fn common(&mut self, name: &[u8], size: u64, alignment: u64) -> u32 {
        self.add_symbol(
            name,
            object::elf::STB_GLOBAL,
            object::elf::STT_OBJECT,
            object::elf::SHN_COMMON,
            alignment,
            size,
        )
    }

    /// Adds a RELA table targeting the given section.
    pub(crate) fn rela(&mut self, target: u32, target_name: &str, rels: &[Rel]) -> u32 {
        let mut data = Vec::new();
        for rel in rels {
            data.extend_from_slice(&rel.r_offset.to_le_bytes());
            data.extend_from_slice(
                &((u64::from(rel.r_sym) << 32) | u64::from(rel.r_type)).to_le_bytes(),
            );
            data.extend_from_slice(&rel.r_addend.to_le_bytes());
        }
        self.section_with(SectionSpec {
            name: format!(".rela{target_name}").into_bytes(),
            sh_type: object::elf::SHT_RELA,
            sh_flags: 0,
            data,
            link: Link::Symtab,
            sh_info: target,
            sh_entsize: 24,
            sh_addralign: 8,
        })
    }

    /// Adds a CREL table targeting the given section.
    pub(crate) fn crel(&mut self, target: u32, target_name: &str, rels: &[Rel]) -> u32 {
        self.section_with(SectionSpec {
            name: format!(".crel{target_name}").into_bytes(),
            sh_type: crate::elf::SHT_CREL,
            sh_flags: 0,
            data: crate::crel::encode_crel(rels, true),
            link: Link::Symtab,
            sh_info: target,
            sh_entsize: 0,
            sh_addralign: 1,
        })
    }

    /// Adds a COMDAT group whose signature is the given symbol.
    pub(crate) fn group(&mut self, signature_sym: u32, members: &[u32]) -> u32 {
        let mut data = object::elf::GRP_COMDAT.to_le_bytes().to_vec();
        for member in members {
            data.extend_from_slice(&member.to_le_bytes());
        }
        self.section_with(SectionSpec {
            name: b".group".to_vec(),
            sh_type: object::elf::SHT_GROUP,
            sh_flags: 0,
            data,
            link: Link::Symtab,
            sh_info: signature_sym,
            sh_entsize: 4,
            sh_addralign: 4,
        })
    }

    /// Adds a `.gnu.version` table. Must have one entry per symbol-table entry, including the
    /// null symbol.
    pub(crate) fn versym(&mut self, table: &[u16]) -> u32 {
        let mut data = Vec::new();
        for v in table {
            data.extend_from_slice(&v.to_le_bytes());
        }
        self.section_with(SectionSpec {
            name: b".gnu.version".to_vec(),
            sh_type: object::elf::SHT_GNU_VERSYM,
            sh_flags: u64::from(object::elf::SHF_ALLOC),
            data,
            link: Link::Symtab,
            sh_info: 0,
            sh_entsize: 2,
            sh_addralign: 2,
        })
    }

    /// Adds a `.gnu.version_d` table from `(vd_ndx, name-offset)` pairs.
    pub(crate) fn verdef(&mut self, entries: &[(u16, u32)]) -> u32 {
        let mut data = Vec::new();
        for (i, &(ndx, name_offset)) in entries.iter().enumerate() {
            let is_last = i + 1 == entries.len();
            // Verdef (20 bytes) followed immediately by one Verdaux (8 bytes).
            data.extend_from_slice(&1u16.to_le_bytes()); // vd_version
            data.extend_from_slice(&0u16.to_le_bytes()); // vd_flags
            data.extend_from_slice(&ndx.to_le_bytes());
            data.extend_from_slice(&1u16.to_le_bytes()); // vd_cnt
            data.extend_from_slice(&0u32.to_le_bytes()); // vd_hash
            data.extend_from_slice(&20u32.to_le_bytes()); // vd_aux
            data.extend_from_slice(&(if is_last { 0u32 } else { 28u32 }).to_le_bytes());
            data.extend_from_slice(&name_offset.to_le_bytes()); // vda_name
            data.extend_from_slice(&0u32.to_le_bytes()); // vda_next
        }
        self.section_with(SectionSpec {
            name: b".gnu.version_d".to_vec(),
            sh_type: object::elf::SHT_GNU_VERDEF,
            sh_flags: u64::from(object::elf::SHF_ALLOC),
            data,
            link: Link::Strtab,
            sh_info: entries.len() as u32,
            sh_entsize: 0,
            sh_addralign: 4,
        })
    }

    /// Adds a `.dynamic` section from `(tag, value)` pairs; a DT_NULL terminator is appended.
    pub(crate) fn dynamic(&mut self, entries: &[(u64, u64)]) -> u32 {
        let mut data = Vec::new();
        for &(tag, value) in entries {
            data.extend_from_slice(&tag.to_le_bytes());
            data.extend_from_slice(&value.to_le_bytes());
        }
        data.extend_from_slice(&[0u8; 16]);
        self.section_with(SectionSpec {
            name: b".dynamic".to_vec(),
            sh_type: object::elf::SHT_DYNAMIC,
            sh_flags: u64::from(object::elf::SHF_ALLOC),
            data,
            link: Link::Strtab,
            sh_info: 0,
            sh_entsize: 16,
            sh_addralign: 8,
        })
    }

    pub(crate) fn build(mut self) -> Vec<u8> {
        let (symtab_name, strtab_name, symtab_type) = if self.dynamic_symtab {
            (".dynsym", ".dynstr", object::elf::SHT_DYNSYM)
        } else {
            (".symtab", ".strtab", object::elf::SHT_SYMTAB)
        };

        let mut sections = std::mem::take(&mut self.sections);
        let has_symtab = !self.syms.is_empty();
        let symtab_index = sections.len() as u32 + 1;
        let strtab_index = symtab_index + 1;

        if has_symtab {
            let mut data = vec![0u8; 24]; // null symbol
            for sym in &self.syms {
                data.extend_from_slice(&sym.name_offset.to_le_bytes());
                data.push(sym.info);
                data.push(sym.other);
                data.extend_from_slice(&sym.shndx.to_le_bytes());
                data.extend_from_slice(&sym.value.to_le_bytes());
                data.extend_from_slice(&sym.size.to_le_bytes());
            }
            sections.push(SectionSpec {
                name: symtab_name.as_bytes().to_vec(),
                sh_type: symtab_type,
                sh_flags: 0,
                data,
                link: Link::Strtab,
                sh_info: 1 + self.num_locals as u32,
                sh_entsize: 24,
                sh_addralign: 8,
            });
            sections.push(SectionSpec {
                name: strtab_name.as_bytes().to_vec(),
                sh_type: object::elf::SHT_STRTAB,
                sh_flags: 0,
                data: std::mem::take(&mut self.strtab),
                link: Link::None,
                sh_info: 0,
                sh_entsize: 0,
                sh_addralign: 1,
            });
        }

        // Section name table, named last.
        let mut shstrtab = vec![0u8];
        let mut name_offsets = Vec::with_capacity(sections.len() + 1);
        for spec in &sections {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(&spec.name);
            shstrtab.push(0);
        }
        let shstrtab_name_offset = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab");
        shstrtab.push(0);
        name_offsets.push(shstrtab_name_offset);
        sections.push(SectionSpec {
            name: b".shstrtab".to_vec(),
            sh_type: object::elf::SHT_STRTAB,
            sh_flags: 0,
            data: shstrtab,
            link: Link::None,
            sh_info: 0,
            sh_entsize: 0,
            sh_addralign: 1,
        });
        let shstrndx = sections.len() as u32;

        // Lay out: header, section data, section header table.
        let mut out = vec![0u8; crate::elf::FILE_HEADER_SIZE];
        let mut offsets = Vec::with_capacity(sections.len());
        for spec in &sections {
            while !out.len().is_multiple_of(8) {
                out.push(0);
            }
            offsets.push(out.len() as u64);
            if spec.sh_type != object::elf::SHT_NOBITS {
                out.extend_from_slice(&spec.data);
            }
        }

        while !out.len().is_multiple_of(8) {
            out.push(0);
        }
        let e_shoff = out.len() as u64;
        let num_shdrs = sections.len() as u64 + 1;

        // The null section header carries the real counts in the extended encoding.
        let mut null_shdr = [0u8; crate::elf::SECTION_HEADER_SIZE];
        if self.force_extended {
            null_shdr[32..40].copy_from_slice(&num_shdrs.to_le_bytes()); // sh_size
            null_shdr[40..44].copy_from_slice(&shstrndx.to_le_bytes()); // sh_link
        }
        out.extend_from_slice(&null_shdr);

        for (i, spec) in sections.iter().enumerate() {
            let sh_link = match spec.link {
                Link::None => 0,
                Link::Symtab => symtab_index,
                Link::Strtab => strtab_index,
                Link::Section(index) => index,
            };
            out.extend_from_slice(&name_offsets[i].to_le_bytes());
            out.extend_from_slice(&spec.sh_type.to_le_bytes());
            out.extend_from_slice(&spec.sh_flags.to_le_bytes());
            out.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
            out.extend_from_slice(&offsets[i].to_le_bytes());
            out.extend_from_slice(&(spec.data.len() as u64).to_le_bytes());
            out.extend_from_slice(&sh_link.to_le_bytes());
            out.extend_from_slice(&spec.sh_info.to_le_bytes());
            out.extend_from_slice(&spec.sh_addralign.to_le_bytes());
            out.extend_from_slice(&spec.sh_entsize.to_le_bytes());
        }

        // File header.
        out[..4].copy_from_slice(&object::elf::ELFMAG);
        out[4] = object::elf::ELFCLASS64;
        out[5] = object::elf::ELFDATA2LSB;
        out[6] = 1; // EV_CURRENT
        out[16..18].copy_from_slice(&self.e_type.to_le_bytes());
        out[18..20].copy_from_slice(&self.machine.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes()); // e_version
        out[40..48].copy_from_slice(&e_shoff.to_le_bytes());
        out[52..54].copy_from_slice(&(crate::elf::FILE_HEADER_SIZE as u16).to_le_bytes());
        out[58..60].copy_from_slice(&(crate::elf::SECTION_HEADER_SIZE as u16).to_le_bytes());
        if self.force_extended {
            out[60..62].copy_from_slice(&0u16.to_le_bytes());
            out[62..64].copy_from_slice(&object::elf::SHN_XINDEX.to_le_bytes());
        } else {
            out[60..62].copy_from_slice(&(num_shdrs as u16).to_le_bytes());
            out[62..64].copy_from_slice(&(shstrndx as u16).to_le_bytes());
        }

        out
    }
}
