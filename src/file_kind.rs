//! Identifies what sort of input we've been handed from the bytes of the file.

use crate::Result;
use crate::bail;
use object::LittleEndian;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FileKind {
    ElfObject,
    ElfDynamic,
}

impl FileKind {
    pub fn identify_bytes(bytes: &[u8]) -> Result<FileKind> {
        if !bytes.starts_with(&object::elf::ELFMAG) {
            bail!("Couldn't identify file type");
        }
        if bytes.len() < crate::elf::FILE_HEADER_SIZE {
            bail!("Invalid ELF file");
        }
        let header: &crate::elf::FileHeader =
            object::from_bytes(&bytes[..crate::elf::FILE_HEADER_SIZE])
                .unwrap()
                .0;
        if header.e_ident.class != object::elf::ELFCLASS64 {
            bail!("Only 64 bit ELF is currently supported");
        }
        if header.e_ident.data != object::elf::ELFDATA2LSB {
            bail!("Only little endian is currently supported");
        }

        match header.e_type.get(LittleEndian) {
            object::elf::ET_REL => Ok(FileKind::ElfObject),
            object::elf::ET_DYN => Ok(FileKind::ElfDynamic),
            t => bail!("Unsupported ELF kind {t}"),
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileKind::ElfObject => "ELF object",
            FileKind::ElfDynamic => "ELF dynamic",
        };
        std::fmt::Display::fmt(s, f)
    }
}
