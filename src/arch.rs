use crate::Result;
use crate::bail;

/// The architectures we can ingest input files for. Fixes the relocation table flavour (REL vs
/// RELA), which architecture-specific section types are tolerated, and the absolute relocation
/// type used by the `.eh_frame` policy checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X86_64,
    AArch64,
    Riscv64,
    LoongArch64,
    /// 32-bit ARM uses REL-style relocations. We accept its section types so that the REL-only
    /// code paths stay exercised even though we only read 64-bit containers.
    Arm,
    Ppc32,
}

impl Architecture {
    pub(crate) fn from_elf_machine(e_machine: u16) -> Result<Self> {
        Ok(match e_machine {
            object::elf::EM_X86_64 => Self::X86_64,
            object::elf::EM_AARCH64 => Self::AArch64,
            object::elf::EM_RISCV => Self::Riscv64,
            object::elf::EM_LOONGARCH => Self::LoongArch64,
            object::elf::EM_ARM => Self::Arm,
            object::elf::EM_PPC => Self::Ppc32,
            _ => bail!("Unsupported e_machine value: 0x{e_machine:x}"),
        })
    }

    /// Whether relocations for this architecture carry explicit addends.
    pub(crate) fn is_rela(self) -> bool {
        !matches!(self, Self::Arm)
    }

    /// Relocation tables are usually sorted by `r_offset`, but RISC-V and LoongArch toolchains
    /// don't follow that convention.
    pub(crate) fn needs_relocation_sort(self) -> bool {
        matches!(self, Self::Riscv64 | Self::LoongArch64)
    }

    /// The word-sized absolute relocation type.
    pub(crate) fn r_abs(self) -> u32 {
        match self {
            Self::X86_64 => object::elf::R_X86_64_64,
            Self::AArch64 => object::elf::R_AARCH64_ABS64,
            Self::Riscv64 => object::elf::R_RISCV_64,
            Self::LoongArch64 => object::elf::R_LARCH_64,
            Self::Arm => object::elf::R_ARM_ABS32,
            Self::Ppc32 => object::elf::R_PPC_ADDR32,
        }
    }

    /// Returns whether a section header with this type/flags combination is one we know how to
    /// handle. Architecture-specific types are only known on their own architecture.
    pub(crate) fn is_known_section_type(self, sh_type: u32, sh_flags: u64) -> bool {
        match sh_type {
            object::elf::SHT_PROGBITS
            | object::elf::SHT_NOTE
            | object::elf::SHT_NOBITS
            | object::elf::SHT_INIT_ARRAY
            | object::elf::SHT_FINI_ARRAY
            | object::elf::SHT_PREINIT_ARRAY => return true,
            _ => {}
        }

        if (object::elf::SHT_LOUSER..=object::elf::SHT_HIUSER).contains(&sh_type)
            && sh_flags & u64::from(object::elf::SHF_ALLOC) == 0
        {
            return true;
        }
        if (object::elf::SHT_LOOS..=object::elf::SHT_HIOS).contains(&sh_type)
            && sh_flags & u64::from(object::elf::SHF_OS_NONCONFORMING) == 0
        {
            return true;
        }

        match self {
            Self::X86_64 => sh_type == crate::elf::SHT_X86_64_UNWIND,
            Self::Arm => {
                sh_type == crate::elf::SHT_ARM_EXIDX || sh_type == crate::elf::SHT_ARM_ATTRIBUTES
            }
            Self::Riscv64 => sh_type == crate::elf::SHT_RISCV_ATTRIBUTES,
            _ => false,
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::X86_64 => "x86_64",
            Self::AArch64 => "aarch64",
            Self::Riscv64 => "riscv64",
            Self::LoongArch64 => "loongarch64",
            Self::Arm => "arm",
            Self::Ppc32 => "ppc32",
        };
        f.write_str(s)
    }
}
