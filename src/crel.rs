//! Relocation tables. Inputs may use `SHT_REL`, `SHT_RELA` or the compact `SHT_CREL` encoding;
//! we decode all three into one owned representation so that later passes can redirect
//! relocations without touching the mapped file.

use crate::Result;
use crate::arch::Architecture;
use crate::bail;
use crate::elf;
use crate::elf::read_sleb;
use crate::elf::read_uleb;
use crate::ensure;
use object::LittleEndian;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rel {
    pub r_offset: u64,
    pub r_type: u32,
    pub r_sym: u32,
    pub r_addend: i64,
}

pub(crate) fn decode_rela(table: &[elf::Rela]) -> Vec<Rel> {
    let e = LittleEndian;
    table
        .iter()
        .map(|r| Rel {
            r_offset: r.r_offset.get(e),
            r_type: r.r_type(e, false),
            r_sym: r.r_sym(e, false),
            r_addend: r.r_addend.get(e),
        })
        .collect()
}

pub(crate) fn decode_rel(table: &[elf::RawRel]) -> Vec<Rel> {
    let e = LittleEndian;
    table
        .iter()
        .map(|r| Rel {
            r_offset: r.r_offset.get(e),
            r_type: r.r_type(e),
            r_sym: r.r_sym(e),
            r_addend: 0,
        })
        .collect()
}

/// Decodes an `SHT_CREL` section.
///
/// The table starts with a ULEB-128 header: `count << 3 | has_addends << 2 | offset_scale`.
/// Each entry then carries a flags byte whose low bits say which of symbol / type / addend
/// deltas follow, and whose remaining bits hold the low bits of the offset delta. The offset
/// delta is allowed to be enormous so that wrapping the 64-bit offset downwards is expressible;
/// all of the arithmetic here is intentionally modulo 2^64.
pub(crate) fn decode_crel(mut data: &[u8], arch: Architecture) -> Result<Vec<Rel>> {
    let data = &mut data;
    let header = read_uleb(data)?;
    let nrels = header >> 3;
    let is_rela = header & 0b100 != 0;
    let scale = (header & 0b11) as u32;

    if is_rela && !arch.is_rela() {
        bail!("CREL with addends is not supported for {arch}");
    }

    let mut offset = 0u64;
    let mut r_type = 0i64;
    let mut symidx = 0i64;
    let mut addend = 0i64;

    let mut rels = Vec::with_capacity(nrels as usize);

    while (rels.len() as u64) < nrels {
        ensure!(!data.is_empty(), "corrupted CREL section");
        let flags = data[0];
        *data = &data[1..];
        let nflags = if is_rela { 3 } else { 2 };

        // The offset delta is a concatenation of the ULEB-encoded high bits and the unused bits
        // of the flags byte, which can add up to more than 64 bits. The wrap-around is intended.
        let delta = if flags & 0x80 != 0 {
            read_uleb(data)?.wrapping_shl(7 - nflags) | u64::from((flags & 0x7f) >> nflags)
        } else {
            u64::from(flags >> nflags)
        };
        offset = offset.wrapping_add(delta.wrapping_shl(scale));

        if flags & 1 != 0 {
            symidx = symidx.wrapping_add(read_sleb(data)?);
        }
        if flags & 2 != 0 {
            r_type = r_type.wrapping_add(read_sleb(data)?);
        }
        if is_rela && flags & 4 != 0 {
            addend = addend.wrapping_add(read_sleb(data)?);
        }

        rels.push(Rel {
            r_offset: offset,
            r_type: r_type as u32,
            r_sym: symidx as u32,
            r_addend: addend,
        });
    }

    Ok(rels)
}

/// Encodes a relocation table in the CREL format. The inverse of `decode_crel` for any valid
/// table; used by tests and by relocatable output.
pub(crate) fn encode_crel(rels: &[Rel], is_rela: bool) -> Vec<u8> {
    let mut out = Vec::new();
    let header = (rels.len() as u64) << 3 | u64::from(is_rela) << 2;
    leb128::write::unsigned(&mut out, header).unwrap();

    let nflags: u32 = if is_rela { 3 } else { 2 };
    let low_bits = 7 - nflags;
    let mut offset = 0u64;
    let mut r_type = 0i64;
    let mut symidx = 0i64;
    let mut addend = 0i64;

    for rel in rels {
        let delta = rel.r_offset.wrapping_sub(offset);
        let mut flags = 0u8;
        if rel.r_sym != symidx as u32 {
            flags |= 1;
        }
        if rel.r_type != r_type as u32 {
            flags |= 2;
        }
        if is_rela && rel.r_addend != addend {
            flags |= 4;
        }

        if delta < 1 << low_bits {
            out.push(flags | (delta as u8) << nflags);
        } else {
            let mask = (1u8 << low_bits) - 1;
            out.push(flags | 0x80 | (delta as u8 & mask) << nflags);
            leb128::write::unsigned(&mut out, delta >> low_bits).unwrap();
        }

        if flags & 1 != 0 {
            leb128::write::signed(&mut out, i64::from(rel.r_sym).wrapping_sub(symidx)).unwrap();
            symidx = i64::from(rel.r_sym);
        }
        if flags & 2 != 0 {
            leb128::write::signed(&mut out, i64::from(rel.r_type).wrapping_sub(r_type)).unwrap();
            r_type = i64::from(rel.r_type);
        }
        if flags & 4 != 0 {
            leb128::write::signed(&mut out, rel.r_addend.wrapping_sub(addend)).unwrap();
            addend = rel.r_addend;
        }
        offset = rel.r_offset;
    }

    out
}

/// Relocation tables are normally sorted by `r_offset`, but RISC-V and LoongArch toolchains
/// don't keep that promise. Later passes binary-search these tables, so fix them up here. The
/// sort must be stable: relocation pairs at equal offsets carry meaning in their order.
pub(crate) fn sort_relocations(rels: &mut [Rel]) {
    if !rels.is_sorted_by_key(|r| r.r_offset) {
        rels.sort_by_key(|r| r.r_offset);
    }
}
