//! Sections marked `SHF_MERGE` aren't atomic units of inclusion; the linker splits them into
//! pieces and folds identical pieces from different files together. String literals are the
//! common case: the compiler puts them into `SHF_MERGE|SHF_STRINGS` sections so that "foo" only
//! appears once in the output no matter how many translation units used it.
//!
//! Symbols make this tricky. A section symbol plus offset may point at *any* piece of the
//! section, so after splitting we rewrite both symbols and relocations until every non-absolute
//! reference lands on either a non-mergeable section or a specific piece. Garbage collection
//! and identical-code-folding then work on a graph whose vertices are sections and pieces.
//!
//! Only allocated sections get this treatment; non-allocated mergeable content (debug strings)
//! isn't part of that graph and splitting it would cost more than it saves here.

use crate::Result;
use crate::bail;
use crate::context::Context;
use crate::context::InternKey;
use crate::elf;
use crate::elf::SectionFlags;
use crate::elf::shf;
use crate::ensure;
use crate::object_file::ObjectFile;
use crate::symbol::SymbolExtent;
use anyhow::Context as _;
use hashbrown::HashTable;
use hashbrown::hash_table::Entry;
use object::LittleEndian;
use object::read::elf::Sym as _;
use std::mem::take;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

/// One piece of a mergeable section. Identity is the piece's contents: all input pieces with
/// the same bytes in the same output section share one fragment.
pub struct SectionFragment {
    alignment: AtomicU32,
    is_alive: AtomicBool,
}

impl SectionFragment {
    pub(crate) fn alignment(&self) -> u32 {
        self.alignment.load(Ordering::Relaxed)
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    /// Garbage collection clears liveness on fragments nothing references.
    pub(crate) fn mark_dead(&self) {
        self.is_alive.store(false, Ordering::Relaxed);
    }
}

/// The aggregator that all input pieces destined for one output section feed into. Pieces are
/// keyed by their contents, prehashed once, in the same shape as the symbol interner.
pub struct MergedSection<'data> {
    name: &'data [u8],
    pieces: Mutex<HashTable<(InternKey<'data>, &'data SectionFragment)>>,
}

impl<'data> MergedSection<'data> {
    pub(crate) fn new(name: &'data [u8]) -> Self {
        Self {
            name,
            pieces: Mutex::new(HashTable::new()),
        }
    }

    pub(crate) fn name(&self) -> &'data [u8] {
        self.name
    }

    fn insert(
        &self,
        ctx: &Context<'data>,
        bytes: &'data [u8],
        alignment: u32,
    ) -> &'data SectionFragment {
        let key = InternKey::new(bytes);
        let mut pieces = self.pieces.lock().unwrap();
        let fragment = match pieces.entry(
            key.hash(),
            |(k, _)| k.bytes() == bytes,
            |(k, _)| k.hash(),
        ) {
            Entry::Occupied(entry) => entry.get().1,
            Entry::Vacant(entry) => {
                let fragment = ctx.alloc_fragment(SectionFragment {
                    alignment: AtomicU32::new(1),
                    is_alive: AtomicBool::new(true),
                });
                entry.insert((key, fragment));
                fragment
            }
        };
        fragment.alignment.fetch_max(alignment, Ordering::Relaxed);
        fragment
    }

    /// Looks up the fragment for a piece with the given contents, if any input provided one.
    pub(crate) fn fragment_for(&self, bytes: &[u8]) -> Option<&'data SectionFragment> {
        let pieces = self.pieces.lock().unwrap();
        pieces
            .find(InternKey::hash_of(bytes), |(k, _)| k.bytes() == bytes)
            .map(|(_, fragment)| *fragment)
    }
}

/// Replaces an `InputSection` whose header carries `SHF_MERGE`: the section's bytes split into
/// fragments, and a sorted offset table maps a byte offset back to `(fragment, offset within)`.
pub struct MergeableSection<'data> {
    pub(crate) parent: &'data MergedSection<'data>,
    size: u64,
    frag_offsets: Vec<u32>,
    fragments: Vec<&'data SectionFragment>,
}

impl<'data> MergeableSection<'data> {
    fn split(
        ctx: &Context<'data>,
        parent: &'data MergedSection<'data>,
        data: &'data [u8],
        flags: SectionFlags,
        entsize: u64,
        alignment: u32,
    ) -> Result<Self> {
        let size = data.len() as u64;
        let mut frag_offsets = Vec::new();
        let mut fragments = Vec::new();

        let mut insert = |offset: usize, piece: &'data [u8]| {
            frag_offsets.push(offset as u32);
            fragments.push(parent.insert(ctx, piece, alignment));
        };

        if flags.contains(shf::STRINGS) {
            let mut offset = 0;
            while offset < data.len() {
                let len = memchr::memchr(0, &data[offset..])
                    .context("string is not null terminated")?;
                insert(offset, &data[offset..offset + len + 1]);
                offset += len + 1;
            }
        } else if entsize == 0 {
            insert(0, data);
        } else {
            ensure!(
                size.is_multiple_of(entsize),
                "section size is not a multiple of sh_entsize"
            );
            let entsize = entsize as usize;
            let mut offset = 0;
            while offset < data.len() {
                insert(offset, &data[offset..offset + entsize]);
                offset += entsize;
            }
        }

        Ok(Self {
            parent,
            size,
            frag_offsets,
            fragments,
        })
    }

    /// Maps a byte offset into the original section to the fragment containing it and the
    /// offset within that fragment. Offsets at or past the end of the section have no fragment.
    pub(crate) fn fragment_at(&self, offset: u64) -> Option<(&'data SectionFragment, u64)> {
        if offset >= self.size || self.fragments.is_empty() {
            return None;
        }
        let idx = self.frag_offsets.partition_point(|&o| u64::from(o) <= offset) - 1;
        Some((
            self.fragments[idx],
            offset - u64::from(self.frag_offsets[idx]),
        ))
    }
}

impl<'data> ObjectFile<'data> {
    /// Converts allocated `SHF_MERGE` sections into `MergeableSection`s. Sections with
    /// relocations can't be split (their contents aren't final), nor can empty ones.
    pub(crate) fn convert_mergeable_sections(&mut self, ctx: &Context<'data>) -> Result {
        // Synthesized sections (past the header table) are never mergeable.
        for i in 0..self.elf.sections.len().min(self.sections.len()) {
            let Some(isec) = &self.sections[i] else {
                continue;
            };
            if !isec.is_alive || isec.relsec_idx.is_some() {
                continue;
            }

            let shdr = self.elf.section(i)?;
            let e = LittleEndian;
            let flags = SectionFlags::from_header(shdr);
            if !flags.contains(shf::MERGE) || !flags.contains(shf::ALLOC) {
                continue;
            }
            if shdr.sh_size.get(e) == 0 {
                continue;
            }

            let name = self.elf.section_name(shdr)?;
            let data = self.elf.section_data(shdr)?;
            let entsize = shdr.sh_entsize.get(e);
            let alignment = shdr.sh_addralign.get(e).max(1).min(u64::from(u32::MAX)) as u32;

            let parent = ctx.merged_section_instance(name, flags, entsize);
            self.mergeable_sections[i] = Some(
                MergeableSection::split(ctx, parent, data, flags, entsize, alignment)
                    .with_context(|| format!("{}: {}", self.input, String::from_utf8_lossy(name)))?,
            );
            self.sections[i] = None;
        }
        Ok(())
    }

    /// Rewrites symbols and relocations so that nothing points into a mergeable section by
    /// section-plus-offset any more.
    pub(crate) fn reattach_section_pieces(&mut self, ctx: &Context<'data>) -> Result {
        let e = LittleEndian;

        // Rebind symbols defined inside mergeable sections to the piece containing them. Only
        // rebind a global if our definition won the election; locals are always ours.
        for i in 1..self.elf_syms.len() {
            let esym = &self.elf_syms[i];
            if esym.is_absolute(e) || esym.is_common(e) || esym.is_undefined(e) {
                continue;
            }

            let shndx = self.esym_shndx(i, esym)?;
            let Some(m) = self.mergeable_sections.get(shndx as usize).and_then(Option::as_ref)
            else {
                continue;
            };

            let sym = self.symbols[i];
            let mut state = sym.mu.lock().unwrap();
            if state.owner != Some(self.file_id) || state.sym_idx != i as u32 {
                continue;
            }

            let Some((frag, frag_offset)) = m.fragment_at(esym.st_value.get(e)) else {
                bail!(
                    "{}: bad symbol value: {:#x}",
                    self.input,
                    esym.st_value.get(e)
                );
            };
            state.extent = SymbolExtent::Frag(frag);
            state.value = frag_offset;
        }

        // Redirect relocations that reference a mergeable section through its section symbol.
        // Each such relocation gets a fresh hidden symbol bound to the right piece; the addend
        // keeps working because the symbol's value absorbs it.
        let mut rels = take(&mut self.rels);

        for secidx in 0..self.sections.len() {
            let Some(isec) = &self.sections[secidx] else {
                continue;
            };
            let flags = SectionFlags::from_header(self.shdr(isec.shndx)?);
            if !flags.contains(shf::ALLOC) {
                continue;
            }

            for rel in &mut rels[secidx] {
                let esym = self
                    .elf_syms
                    .get(rel.r_sym as usize)
                    .with_context(|| format!("{}: bad relocation symbol index", self.input))?;
                if esym.st_type() != object::elf::STT_SECTION {
                    continue;
                }

                let shndx = self.esym_shndx(rel.r_sym as usize, esym)?;
                let Some(m) = self
                    .mergeable_sections
                    .get(shndx as usize)
                    .and_then(Option::as_ref)
                else {
                    continue;
                };

                let lookup_offset = esym.st_value.get(e).wrapping_add_signed(rel.r_addend);
                let Some((frag, in_frag_offset)) = m.fragment_at(lookup_offset) else {
                    bail!("{}: bad relocation at {}", self.input, rel.r_sym);
                };

                let sym = ctx.alloc_symbol(b"<fragment>");
                sym.merge_visibility(object::elf::STV_HIDDEN);
                {
                    let mut state = sym.mu.lock().unwrap();
                    state.owner = Some(self.file_id);
                    state.sym_idx = rel.r_sym;
                    state.extent = SymbolExtent::Frag(frag);
                    state.value = in_frag_offset.wrapping_add_signed(-rel.r_addend);
                }

                rel.r_sym = (self.elf_syms.len() + self.frag_syms.len()) as u32;
                self.frag_syms.push(sym);
                self.symbols.push(sym);
            }
        }

        self.rels = rels;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Args;
    use crate::context::Arenas;

    #[test]
    fn fragment_lookup_maps_offsets_into_pieces() {
        let arenas = Box::leak(Box::new(Arenas::default()));
        let ctx = Context::new(Args::default(), &arenas);

        let data = b"Hello world\0foo bar\0";
        let parent = ctx.merged_section_instance(
            b".rodata.str1.1",
            SectionFlags::from_u64(
                u64::from(object::elf::SHF_ALLOC)
                    | u64::from(object::elf::SHF_MERGE)
                    | u64::from(object::elf::SHF_STRINGS),
            ),
            1,
        );
        let m = MergeableSection::split(
            &ctx,
            parent,
            data,
            SectionFlags::from_u64(u64::from(object::elf::SHF_STRINGS)),
            1,
            1,
        )
        .unwrap();

        let (first, offset) = m.fragment_at(0).unwrap();
        assert_eq!(offset, 0);
        assert!(std::ptr::eq(first, parent.fragment_for(b"Hello world\0").unwrap()));

        // An offset part way into the second string maps to that string's fragment.
        let (second, offset) = m.fragment_at(16).unwrap();
        assert_eq!(offset, 4);
        assert!(std::ptr::eq(second, parent.fragment_for(b"foo bar\0").unwrap()));

        // One byte past the end of the section has no fragment.
        assert!(m.fragment_at(data.len() as u64).is_none());
    }

    #[test]
    fn identical_pieces_share_a_fragment() {
        let arenas = Box::leak(Box::new(Arenas::default()));
        let ctx = Context::new(Args::default(), &arenas);

        let parent = ctx.merged_section_instance(b".rodata.cst8", SectionFlags::from_u64(0), 8);
        let a = MergeableSection::split(
            &ctx,
            parent,
            b"AAAAAAAABBBBBBBB",
            SectionFlags::from_u64(0),
            8,
            8,
        )
        .unwrap();
        let b = MergeableSection::split(
            &ctx,
            parent,
            b"BBBBBBBBCCCCCCCC",
            SectionFlags::from_u64(0),
            8,
            16,
        )
        .unwrap();

        let (frag_a, _) = a.fragment_at(8).unwrap();
        let (frag_b, _) = b.fragment_at(0).unwrap();
        assert!(std::ptr::eq(frag_a, frag_b));

        // Alignment is the max requirement across all providers.
        assert_eq!(frag_b.alignment(), 16);
    }

    #[test]
    fn unterminated_string_section_is_rejected() {
        let arenas = Box::leak(Box::new(Arenas::default()));
        let ctx = Context::new(Args::default(), &arenas);

        let parent = ctx.merged_section_instance(b".rodata.str1.1", SectionFlags::from_u64(0), 1);
        let result = MergeableSection::split(
            &ctx,
            parent,
            b"no terminator",
            SectionFlags::from_u64(u64::from(object::elf::SHF_STRINGS)),
            1,
            1,
        );
        assert!(result.is_err());
    }
}
