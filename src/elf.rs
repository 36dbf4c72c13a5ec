//! A zero-copy structural view over a mapped ELF file. All accesses are bounds-checked against
//! the mapped size; nothing here assumes the producer was well-behaved.

use crate::Result;
use crate::ensure;
use anyhow::Context as _;
use object::LittleEndian;
use std::ffi::CStr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::KnownLayout;

pub type FileHeader = object::elf::FileHeader64<LittleEndian>;
pub type ProgramHeader = object::elf::ProgramHeader64<LittleEndian>;
pub type SectionHeader = object::elf::SectionHeader64<LittleEndian>;
pub type SymtabEntry = object::elf::Sym64<LittleEndian>;
pub type DynamicEntry = object::elf::Dyn64<LittleEndian>;
pub type Rela = object::elf::Rela64<LittleEndian>;
pub type RawRel = object::elf::Rel64<LittleEndian>;
pub type Verdef = object::elf::Verdef<LittleEndian>;
pub type Verdaux = object::elf::Verdaux<LittleEndian>;
pub type Versym = object::elf::Versym<LittleEndian>;
pub type NoteHeader = object::elf::NoteHeader64<LittleEndian>;

pub(crate) const FILE_HEADER_SIZE: usize = size_of::<FileHeader>();
pub(crate) const SECTION_HEADER_SIZE: usize = size_of::<SectionHeader>();

// Section types that `object` doesn't export constants for.
pub(crate) const SHT_CREL: u32 = 0x4000_0014;
pub(crate) const SHT_LLVM_ADDRSIG: u32 = 0x6fff_4c03;
pub(crate) const SHT_X86_64_UNWIND: u32 = 0x7000_0001;
pub(crate) const SHT_ARM_EXIDX: u32 = 0x7000_0001;
pub(crate) const SHT_ARM_ATTRIBUTES: u32 = 0x7000_0003;
pub(crate) const SHT_RISCV_ATTRIBUTES: u32 = 0x7000_0003;

pub(crate) const DT_AUDIT: u64 = 0x7fff_fefc;

/// A verdef index of 0xffff doesn't name a version; it shows up in corrupt files.
pub(crate) const VER_NDX_UNSPECIFIED: u16 = 0xffff;

pub(crate) const GNU_NOTE_NAME: &[u8] = b"GNU\0";

pub(crate) const RISCV_ATTRIBUTE_VENDOR: &[u8] = b"riscv\0";
pub(crate) const TAG_RISCV_WHOLE_FILE: u64 = 1;
pub(crate) const TAG_RISCV_STACK_ALIGN: u64 = 4;
pub(crate) const TAG_RISCV_ARCH: u64 = 5;
pub(crate) const TAG_RISCV_UNALIGNED_ACCESS: u64 = 6;

/// Section flag bit values.
#[allow(unused)]
pub(crate) mod shf {
    use super::SectionFlags;

    pub(crate) const WRITE: SectionFlags = SectionFlags::from_u64(object::elf::SHF_WRITE as u64);
    pub(crate) const ALLOC: SectionFlags = SectionFlags::from_u64(object::elf::SHF_ALLOC as u64);
    pub(crate) const EXECINSTR: SectionFlags =
        SectionFlags::from_u64(object::elf::SHF_EXECINSTR as u64);
    pub(crate) const MERGE: SectionFlags = SectionFlags::from_u64(object::elf::SHF_MERGE as u64);
    pub(crate) const STRINGS: SectionFlags =
        SectionFlags::from_u64(object::elf::SHF_STRINGS as u64);
    pub(crate) const GROUP: SectionFlags = SectionFlags::from_u64(object::elf::SHF_GROUP as u64);
    pub(crate) const TLS: SectionFlags = SectionFlags::from_u64(object::elf::SHF_TLS as u64);
    pub(crate) const EXCLUDE: SectionFlags =
        SectionFlags::from_u64(object::elf::SHF_EXCLUDE as u64);
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct SectionFlags(u64);

impl SectionFlags {
    pub(crate) fn from_header(header: &SectionHeader) -> Self {
        Self(header.sh_flags.get(LittleEndian))
    }

    pub(crate) fn contains(self, flag: SectionFlags) -> bool {
        self.0 & flag.0 != 0
    }

    pub(crate) const fn from_u64(raw: u64) -> SectionFlags {
        SectionFlags(raw)
    }

    pub(crate) const fn raw(self) -> u64 {
        self.0
    }
}

/// The structural accessor for one mapped input. Handles the two long-section-count encodings:
/// when `e_shnum` is zero the real count lives in `section[0].sh_size`, and when `e_shstrndx` is
/// `SHN_XINDEX` the real string table index lives in `section[0].sh_link`.
pub(crate) struct File<'data> {
    pub(crate) data: &'data [u8],
    pub(crate) ehdr: &'data FileHeader,
    pub(crate) sections: &'data [SectionHeader],
    pub(crate) shstrtab: &'data [u8],
}

impl<'data> File<'data> {
    pub(crate) fn parse(data: &'data [u8]) -> Result<Self> {
        ensure!(data.len() >= FILE_HEADER_SIZE, "file too small");
        ensure!(data.starts_with(&object::elf::ELFMAG), "not an ELF file");

        let ehdr: &FileHeader = object::from_bytes(&data[..FILE_HEADER_SIZE])
            .map_err(|()| crate::Error::msg("invalid ELF header"))?
            .0;

        let e = LittleEndian;
        let e_shoff = ehdr.e_shoff.get(e) as usize;
        let e_shnum = ehdr.e_shnum.get(e) as usize;

        let mut sections: &[SectionHeader] = &[];
        let mut shstrtab: &[u8] = &[];

        if e_shoff != 0 {
            ensure!(
                e_shoff + SECTION_HEADER_SIZE <= data.len(),
                "e_shoff is out of bounds"
            );
            let section0: &SectionHeader = object::from_bytes(
                &data[e_shoff..e_shoff + SECTION_HEADER_SIZE],
            )
            .map_err(|()| crate::Error::msg("misaligned section header table"))?
            .0;

            let num_sections = if e_shnum == 0 {
                section0.sh_size.get(e) as usize
            } else {
                e_shnum
            };

            let table_size = num_sections
                .checked_mul(SECTION_HEADER_SIZE)
                .filter(|size| e_shoff + size <= data.len())
                .with_context(|| {
                    format!("e_shoff or section count corrupted: {e_shoff} {num_sections}")
                })?;

            sections = object::slice_from_bytes(&data[e_shoff..e_shoff + table_size], num_sections)
                .map_err(|()| crate::Error::msg("misaligned section header table"))?
                .0;

            let shstrndx = if ehdr.e_shstrndx.get(e) == object::elf::SHN_XINDEX {
                section0.sh_link.get(e) as usize
            } else {
                ehdr.e_shstrndx.get(e) as usize
            };

            if shstrndx != 0 {
                let shstrtab_section = sections
                    .get(shstrndx)
                    .context("e_shstrndx is out of bounds")?;
                shstrtab = section_data(data, shstrtab_section)?;
            }
        }

        Ok(Self {
            data,
            ehdr,
            sections,
            shstrtab,
        })
    }

    pub(crate) fn e_type(&self) -> u16 {
        self.ehdr.e_type.get(LittleEndian)
    }

    pub(crate) fn arch(&self) -> Result<crate::arch::Architecture> {
        crate::arch::Architecture::from_elf_machine(self.ehdr.e_machine.get(LittleEndian))
    }

    pub(crate) fn section(&self, index: usize) -> Result<&'data SectionHeader> {
        self.sections
            .get(index)
            .with_context(|| format!("section index {index} is out of bounds"))
    }

    /// Returns the first section with the given type, if any.
    pub(crate) fn find_section(&self, sh_type: u32) -> Option<&'data SectionHeader> {
        self.sections
            .iter()
            .find(|shdr| shdr.sh_type.get(LittleEndian) == sh_type)
    }

    pub(crate) fn section_name(&self, shdr: &SectionHeader) -> Result<&'data [u8]> {
        str_from_table(self.shstrtab, shdr.sh_name.get(LittleEndian))
    }

    /// The raw bytes of a section, clipped to `sh_size`. `SHT_NOBITS` sections occupy no file
    /// space, so their data is empty.
    pub(crate) fn section_data(&self, shdr: &SectionHeader) -> Result<&'data [u8]> {
        section_data(self.data, shdr)
    }

    /// The bytes of the section with the given index. Used for `sh_link`ed string tables.
    pub(crate) fn string_table(&self, index: usize) -> Result<&'data [u8]> {
        self.section_data(self.section(index)?)
    }

    /// A typed view of a section's contents. Fails if the section occupies no file space or its
    /// size is not a multiple of the element size.
    pub(crate) fn section_data_as_array<T: object::Pod>(
        &self,
        shdr: &SectionHeader,
    ) -> Result<&'data [T]> {
        ensure!(
            shdr.sh_type.get(LittleEndian) != object::elf::SHT_NOBITS,
            "attempted to read data of an SHT_NOBITS section"
        );
        let data = self.section_data(shdr)?;
        ensure!(
            data.len().is_multiple_of(size_of::<T>()),
            "section size {} is not a multiple of the element size {}",
            data.len(),
            size_of::<T>()
        );
        Ok(object::slice_from_bytes(data, data.len() / size_of::<T>())
            .map_err(|()| crate::Error::msg("misaligned section contents"))?
            .0)
    }
}

fn section_data<'data>(data: &'data [u8], shdr: &SectionHeader) -> Result<&'data [u8]> {
    let e = LittleEndian;
    if shdr.sh_type.get(e) == object::elf::SHT_NOBITS {
        return Ok(&[]);
    }
    let offset = shdr.sh_offset.get(e) as usize;
    let size = shdr.sh_size.get(e) as usize;
    data.get(offset..offset.checked_add(size).unwrap_or(usize::MAX))
        .with_context(|| format!("section data [{offset:#x}; {size:#x}] is out of bounds"))
}

/// Reads a NUL-terminated string starting at `offset`.
pub(crate) fn str_from_table(strtab: &[u8], offset: u32) -> Result<&[u8]> {
    let rest = strtab
        .get(offset as usize..)
        .context("string table offset is out of bounds")?;
    let c_str = CStr::from_bytes_until_nul(rest).context("unterminated string table entry")?;
    Ok(c_str.to_bytes())
}

pub(crate) fn slice_from_all_bytes_mut<T: object::Pod>(data: &mut [u8]) -> &mut [T] {
    object::slice_from_bytes_mut(data, data.len() / size_of::<T>())
        .unwrap()
        .0
}

/// The leading fields shared by every `.eh_frame` record.
#[derive(FromBytes, KnownLayout, Immutable, Clone, Copy)]
#[repr(C)]
pub(crate) struct EhFrameEntryPrefix {
    pub(crate) length: u32,
    pub(crate) cie_id: u32,
}

/// Parses a `.note.gnu.property` section into a map from property type to a 32-bit value, OR-ing
/// together the values of repeated types. Only 4-byte properties of vendor "GNU" with
/// `NT_GNU_PROPERTY_TYPE_0` contribute; others are accepted and skipped.
pub(crate) fn parse_note_gnu_property(
    mut data: &[u8],
    properties: &mut hashbrown::HashMap<u32, u32>,
) -> Result {
    let e = LittleEndian;

    while !data.is_empty() {
        let (hdr, rest) = object::from_bytes::<NoteHeader>(data)
            .map_err(|()| crate::Error::msg("truncated note header"))?;
        data = rest;

        let namesz = hdr.n_namesz.get(e) as usize;
        let descsz = hdr.n_descsz.get(e) as usize;

        let name = data
            .get(..namesz.saturating_sub(1))
            .context("truncated note name")?;
        data = data
            .get(namesz.next_multiple_of(4)..)
            .context("truncated note name")?;

        let mut desc = data.get(..descsz).context("truncated note descriptor")?;
        data = data
            .get(descsz.next_multiple_of(8)..)
            .context("truncated note descriptor")?;

        if hdr.n_type.get(e) != object::elf::NT_GNU_PROPERTY_TYPE_0
            || name != &GNU_NOTE_NAME[..GNU_NOTE_NAME.len() - 1]
        {
            continue;
        }

        while !desc.is_empty() {
            ensure!(desc.len() >= 8, "truncated property entry");
            let ptype = u32::from_le_bytes(desc[..4].try_into().unwrap());
            let size = u32::from_le_bytes(desc[4..8].try_into().unwrap()) as usize;
            desc = &desc[8..];

            ensure!(desc.len() >= size, "truncated property value");

            // Nearly all defined properties carry a 32-bit value. The ones that don't
            // (GNU_PROPERTY_STACK_SIZE and friends) are skipped.
            if size == 4 {
                *properties.entry(ptype).or_default() |=
                    u32::from_le_bytes(desc[..4].try_into().unwrap());
            }
            desc = desc
                .get(size.next_multiple_of(8)..)
                .context("truncated property value")?;
        }
    }

    Ok(())
}

#[derive(Debug, Default, Clone)]
pub(crate) struct RiscvAttributes {
    pub(crate) stack_align: Option<u64>,
    pub(crate) arch: Option<Vec<u8>>,
    pub(crate) unaligned_access: bool,
}

/// Parses a `.riscv.attributes` section.
///
/// The layout is a one-byte format version followed by `[u32 length, vendor string, file tag,
/// tagged attributes]` subsections. A format version other than `'A'` means a format we don't
/// know, and the section is ignored.
pub(crate) fn parse_riscv_attributes(data: &[u8]) -> Result<Option<RiscvAttributes>> {
    ensure!(!data.is_empty(), "corrupted .riscv.attributes section");
    if data[0] != b'A' {
        return Ok(None);
    }
    let mut data = &data[1..];

    let mut attributes = RiscvAttributes::default();

    while !data.is_empty() {
        ensure!(data.len() >= 4, "corrupted .riscv.attributes section");
        let size = u32::from_le_bytes(data[..4].try_into().unwrap()) as usize;
        ensure!(
            size >= 4 && size <= data.len(),
            "corrupted .riscv.attributes section"
        );

        let mut sub = &data[4..size];
        data = &data[size..];

        ensure!(
            sub.starts_with(RISCV_ATTRIBUTE_VENDOR),
            "unexpected .riscv.attributes vendor"
        );
        sub = &sub[RISCV_ATTRIBUTE_VENDOR.len()..];

        let tag = read_uleb(&mut sub).context("corrupted .riscv.attributes section")?;
        ensure!(
            tag == TAG_RISCV_WHOLE_FILE && sub.len() >= 4,
            "corrupted .riscv.attributes section"
        );
        // Skip the sub-subsection size; the file tag covers the remainder.
        sub = &sub[4..];

        while !sub.is_empty() {
            let tag = read_uleb(&mut sub).context("corrupted .riscv.attributes section")?;
            match tag {
                TAG_RISCV_STACK_ALIGN => {
                    attributes.stack_align =
                        Some(read_uleb(&mut sub).context("cannot read stack alignment")?);
                }
                TAG_RISCV_ARCH => {
                    let arch = CStr::from_bytes_until_nul(sub)
                        .context("cannot read arch attribute")?
                        .to_bytes();
                    attributes.arch = Some(arch.to_vec());
                    sub = &sub[arch.len() + 1..];
                }
                TAG_RISCV_UNALIGNED_ACCESS => {
                    attributes.unaligned_access =
                        read_uleb(&mut sub).context("cannot read unaligned access")? != 0;
                }
                // Unknown tags follow the build-attributes convention: odd-numbered tags carry a
                // NUL-terminated string, even-numbered tags a ULEB value.
                _ if tag % 2 == 1 => {
                    let skipped = CStr::from_bytes_until_nul(sub)
                        .context("cannot skip string attribute")?
                        .to_bytes();
                    sub = &sub[skipped.len() + 1..];
                }
                _ => {
                    read_uleb(&mut sub).context("cannot skip integer attribute")?;
                }
            }
        }
    }

    Ok(Some(attributes))
}

pub(crate) fn read_uleb(data: &mut &[u8]) -> Result<u64> {
    leb128::read::unsigned(data).context("bad ULEB-128 value")
}

pub(crate) fn read_sleb(data: &mut &[u8]) -> Result<i64> {
    leb128::read::signed(data).context("bad SLEB-128 value")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_and_non_elf_inputs() {
        assert!(File::parse(b"\x7fEL").is_err());
        let mut bytes = vec![0u8; FILE_HEADER_SIZE];
        bytes[..4].copy_from_slice(b"ABCD");
        assert!(File::parse(&bytes).is_err());
    }

    #[test]
    fn parses_riscv_attributes() {
        // 'A' + subsection: size, "riscv\0", file tag, size, then
        // stack-align 16 and arch "rv64i2p1".
        let mut body = Vec::new();
        body.extend_from_slice(b"riscv\0");
        body.push(TAG_RISCV_WHOLE_FILE as u8);
        let attrs: &[u8] = &[
            TAG_RISCV_STACK_ALIGN as u8,
            16,
            TAG_RISCV_ARCH as u8,
            b'r',
            b'v',
            b'6',
            b'4',
            b'i',
            b'2',
            b'p',
            b'1',
            0,
        ];
        body.extend_from_slice(&(attrs.len() as u32 + 4).to_le_bytes());
        body.extend_from_slice(attrs);

        let mut section = vec![b'A'];
        section.extend_from_slice(&(body.len() as u32 + 4).to_le_bytes());
        section.extend_from_slice(&body);

        let parsed = parse_riscv_attributes(&section).unwrap().unwrap();
        assert_eq!(parsed.stack_align, Some(16));
        assert_eq!(parsed.arch.as_deref(), Some(b"rv64i2p1".as_slice()));
        assert!(!parsed.unaligned_access);
    }

    #[test]
    fn unknown_riscv_attribute_format_is_ignored() {
        assert!(parse_riscv_attributes(b"B junk").unwrap().is_none());
        assert!(parse_riscv_attributes(b"").is_err());
    }

    #[test]
    fn truncated_riscv_attributes_fail() {
        // Claims an 0x40-byte subsection but the data ends early.
        let section = [b'A', 0x40, 0, 0, 0];
        assert!(parse_riscv_attributes(&section).is_err());
    }

    #[test]
    fn gnu_property_notes_accumulate() {
        let mut note = Vec::new();
        note.extend_from_slice(&4u32.to_le_bytes()); // n_namesz
        note.extend_from_slice(&32u32.to_le_bytes()); // n_descsz
        note.extend_from_slice(&object::elf::NT_GNU_PROPERTY_TYPE_0.to_le_bytes());
        note.extend_from_slice(GNU_NOTE_NAME);
        // Two 4-byte properties.
        note.extend_from_slice(&1u32.to_le_bytes());
        note.extend_from_slice(&4u32.to_le_bytes());
        note.extend_from_slice(&0b01u32.to_le_bytes());
        note.extend_from_slice(&0u32.to_le_bytes()); // padding to 8
        note.extend_from_slice(&1u32.to_le_bytes());
        note.extend_from_slice(&4u32.to_le_bytes());
        note.extend_from_slice(&0b10u32.to_le_bytes());
        note.extend_from_slice(&0u32.to_le_bytes());

        let mut properties = hashbrown::HashMap::new();
        parse_note_gnu_property(&note, &mut properties).unwrap();
        assert_eq!(properties.get(&1), Some(&0b11));
    }
}
