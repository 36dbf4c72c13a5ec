//! `.eh_frame` handling. Unlike almost every other section, the linker has to understand the
//! contents: records for dropped functions must not survive into the output, identical CIEs
//! from different objects should be folded, and building the binary-search header later needs
//! every FDE associated with the section whose code it covers. So we walk the records here,
//! shard each section's relocations by record, and pin FDEs to their input sections.

use crate::Result;
use crate::bail;
use crate::context::Context;
use crate::crel::Rel;
use crate::elf::EhFrameEntryPrefix;
use crate::ensure;
use crate::object_file::ObjectFile;
use crate::symbol::sym_flags;
use anyhow::Context as _;
use itertools::Itertools as _;
use std::mem::take;
use zerocopy::FromBytes;

/// A Common Information Entry. Shared state for the FDEs that reference it.
#[derive(Debug, Clone, Copy)]
pub struct CieRecord {
    /// Index of the `.eh_frame` section this record was read from.
    pub section: u32,
    pub input_offset: u32,
    pub rel_start: u32,
    pub rel_end: u32,
}

/// A Frame Description Entry: unwind info for one function.
#[derive(Debug, Clone, Copy)]
pub struct FdeRecord {
    pub section: u32,
    pub input_offset: u32,
    pub rel_start: u32,
    pub rel_end: u32,
    /// Index into the file's CIE vector.
    pub cie_idx: u32,
    pub is_alive: bool,
}

impl<'data> ObjectFile<'data> {
    /// Parses all of this file's `.eh_frame` sections into CIE and FDE records, then marks the
    /// sections themselves dead; the output writer re-emits their content from the records.
    pub(crate) fn parse_ehframe(&mut self) -> Result {
        let eh_frame_sections = self.eh_frame_sections.clone();

        for &secidx in &eh_frame_sections {
            self.parse_ehframe_section(secidx)
                .with_context(|| format!("{}: .eh_frame", self.input))?;
        }

        self.associate_fdes_with_sections()?;

        for &secidx in &eh_frame_sections {
            if let Some(isec) = self.sections[secidx as usize].as_mut() {
                isec.is_alive = false;
            }
        }

        Ok(())
    }

    fn parse_ehframe_section(&mut self, secidx: u32) -> Result {
        let shdr = self.elf.section(secidx as usize)?;
        let contents = self.elf.section_data(shdr)?;
        let rels = take(&mut self.rels[secidx as usize]);
        let cies_begin = self.cies.len();
        let fdes_begin = self.fdes.len();

        let mut rel_idx = 0usize;
        let mut pos = 0usize;

        // Records are a 4-byte size (0 terminates the list) and a 4-byte discriminator: zero
        // for a CIE, otherwise a back-pointer to the owning CIE.
        while pos < contents.len() {
            let (prefix, _) = EhFrameEntryPrefix::ref_from_prefix(&contents[pos..])
                .map_err(|_| crate::Error::msg("truncated record"))?;
            let size = prefix.length as usize;
            if size == 0 {
                break;
            }

            let begin = pos;
            let end = begin + size + 4;
            ensure!(end <= contents.len(), "record extends past end of section");
            pos = end;

            let rel_begin = rel_idx;
            while rel_idx < rels.len() && rels[rel_idx].r_offset < end as u64 {
                rel_idx += 1;
            }

            if prefix.cie_id == 0 {
                self.cies.push(CieRecord {
                    section: secidx,
                    input_offset: begin as u32,
                    rel_start: rel_begin as u32,
                    rel_end: rel_idx as u32,
                });
            } else {
                if rel_begin == rel_idx || rels[rel_begin].r_sym == 0 {
                    // No usable relocation means the function is already gone; `ld -r` leaves
                    // such FDEs behind.
                    continue;
                }
                if rels[rel_begin].r_offset - begin as u64 != 8 {
                    bail!("FDE's first relocation should have offset 8");
                }
                self.fdes.push(FdeRecord {
                    section: secidx,
                    input_offset: begin as u32,
                    rel_start: rel_begin as u32,
                    rel_end: rel_idx as u32,
                    cie_idx: 0,
                    is_alive: true,
                });
            }
        }

        self.rels[secidx as usize] = rels;

        // Resolve each FDE's CIE back-pointer: the discriminator holds the distance from its
        // own position back to the CIE.
        for i in fdes_begin..self.fdes.len() {
            let fde_offset = self.fdes[i].input_offset as usize;
            let cie_offset =
                i32::from_le_bytes(contents[fde_offset + 4..fde_offset + 8].try_into().unwrap());
            let target = (fde_offset as i64 + 4 - i64::from(cie_offset)) as u32;

            let cie_idx = self.cies[cies_begin..]
                .iter()
                .position(|cie| cie.section == secidx && cie.input_offset == target)
                .map(|rel_pos| cies_begin + rel_pos);
            match cie_idx {
                Some(idx) => self.fdes[i].cie_idx = idx as u32,
                None => bail!("bad FDE pointer"),
            }
        }

        Ok(())
    }

    /// The input section whose code an FDE covers: the section of the symbol named by the
    /// FDE's first relocation (the function pointer at offset 8).
    pub(crate) fn fde_section(&self, fde: &FdeRecord) -> Result<u32> {
        let rel = &self.rels[fde.section as usize][fde.rel_start as usize];
        let esym = self
            .elf_syms
            .get(rel.r_sym as usize)
            .context("bad FDE relocation symbol")?;
        self.esym_shndx(rel.r_sym as usize, esym)
    }

    /// Groups FDEs by their associated input section, in section-priority order, and records
    /// each live section's FDE range. FDEs whose section is dead die with it.
    fn associate_fdes_with_sections(&mut self) -> Result {
        let fdes = take(&mut self.fdes);

        let keyed: Vec<(u64, FdeRecord)> = fdes
            .into_iter()
            .map(|fde| Ok((self.section_priority(self.fde_section(&fde)?), fde)))
            .collect::<Result<Vec<_>>>()?;

        // Stable: FDEs for one section keep their input order.
        let mut keyed = keyed.into_iter().sorted_by_key(|&(key, _)| key).collect_vec();

        let mut i = 0;
        while i < keyed.len() {
            let shndx = self.fde_section(&keyed[i].1)?;
            if self.section_is_alive(shndx) {
                let begin = i;
                i += 1;
                while i < keyed.len() && self.fde_section(&keyed[i].1)? == shndx {
                    i += 1;
                }
                self.sections[shndx as usize].as_mut().unwrap().fde_range =
                    Some((begin as u32, i as u32));
            } else {
                keyed[i].1.is_alive = false;
                i += 1;
            }
        }

        self.fdes = keyed.into_iter().map(|(_, fde)| fde).collect();
        Ok(())
    }

    /// The relocations covering one CIE record.
    pub(crate) fn cie_rels(&self, cie: &CieRecord) -> &[Rel] {
        &self.rels[cie.section as usize][cie.rel_start as usize..cie.rel_end as usize]
    }

    /// The bytes of one CIE record, used as its deduplication key together with its
    /// relocations.
    pub(crate) fn cie_contents(&self, cie: &CieRecord) -> Result<&'data [u8]> {
        let shdr = self.elf.section(cie.section as usize)?;
        let contents = self.elf.section_data(shdr)?;
        let begin = cie.input_offset as usize;
        let size =
            u32::from_le_bytes(contents[begin..begin + 4].try_into().unwrap()) as usize + 4;
        Ok(&contents[begin..begin + size])
    }

    /// Whether two CIEs can be folded into one output record: identical contents and identical
    /// relocations against the same symbols.
    pub(crate) fn cie_equals(&self, a: &CieRecord, other: &ObjectFile<'data>, b: &CieRecord) -> bool {
        let (Ok(contents_a), Ok(contents_b)) = (self.cie_contents(a), other.cie_contents(b))
        else {
            return false;
        };
        if contents_a != contents_b {
            return false;
        }

        let rels_a = self.cie_rels(a);
        let rels_b = other.cie_rels(b);
        rels_a.len() == rels_b.len()
            && rels_a.iter().zip(rels_b).all(|(x, y)| {
                x.r_offset - u64::from(a.input_offset) == y.r_offset - u64::from(b.input_offset)
                    && x.r_type == y.r_type
                    && x.r_addend == y.r_addend
                    && std::ptr::eq(
                        self.symbols[x.r_sym as usize],
                        other.symbols[y.r_sym as usize],
                    )
            })
    }

    /// Policy checks on CIE relocations. An absolute relocation can't be used in a
    /// position-independent output, and a CIE referencing imported data has no workable
    /// runtime representation.
    pub(crate) fn scan_eh_frame_relocations(
        &self,
        ctx: &Context<'data>,
        files: &[crate::InputFile<'data>],
    ) -> Result {
        for cie in &self.cies {
            for rel in self.cie_rels(cie) {
                let sym = self.symbols[rel.r_sym as usize];

                if ctx.args.pic && rel.r_type == self.arch.r_abs() {
                    ctx.diagnostics.error(anyhow::anyhow!(
                        "{}: relocation against `{sym}` in .eh_frame can not be used when \
                         making a position-independent output; recompile with -fPIE or -fPIC",
                        self.input
                    ));
                }

                if sym.is_imported() {
                    if crate::symbol_type(sym, files) != object::elf::STT_FUNC {
                        bail!(
                            "{}: {sym}: .eh_frame CIE record with an external data reference \
                             is not supported",
                            self.input
                        );
                    }
                    sym.set_flag(sym_flags::NEEDS_PLT);
                }
            }
        }
        Ok(())
    }
}
