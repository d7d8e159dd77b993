//! Target configuration
//!
//! Everything target-specific the lowering core consults: the boxing layout,
//! the virtual register ceiling and the calling-convention tables. The tables
//! are data (TOML), not code; presets for the supported targets ship in
//! `conventions/`.
//!
//! ```toml
//! name = "x86"
//! general = ["eax", "ecx", ...]
//! float = ["xmm0", ...]
//!
//! [returns]          # compiled-code returns
//! value_type = "ecx" # dual-register layout
//! value_data = "edx"
//! scalar = "eax"
//! float = "xmm0"
//!
//! [vm_returns]       # runtime support routine returns, same keys
//!
//! [hardware]
//! div_dividend = "eax"
//! div_output = "eax"
//! div_clobber = "edx"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::boxing::BoxingKind;
use crate::error::{LowerError, Result};
use crate::lir::{MAX_VIRTUAL_REGISTERS, PhysReg, RegClass};

const X86_CONVENTION: &str = include_str!("../../conventions/x86.toml");
const X64_CONVENTION: &str = include_str!("../../conventions/x64.toml");

/// Compilation target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// 32-bit x86, dual-register boxing
    X86,
    /// x86-64, single-register boxing
    #[default]
    X64,
}

impl Target {
    /// Parse target from string
    pub fn from_str(s: &str) -> Option<Target> {
        match s.to_lowercase().as_str() {
            "x86" | "i386" | "i686" | "x86-32" => Some(Target::X86),
            "x64" | "x86_64" | "x86-64" | "amd64" => Some(Target::X64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::X86 => "x86",
            Target::X64 => "x64",
        }
    }

    /// Boxing layout implied by the target's register width
    pub fn boxing(&self) -> BoxingKind {
        match self {
            Target::X86 => BoxingKind::DualRegister,
            Target::X64 => BoxingKind::SingleRegister,
        }
    }

    fn convention_source(&self) -> &'static str {
        match self {
            Target::X86 => X86_CONVENTION,
            Target::X64 => X64_CONVENTION,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConvention {
    name: String,
    general: Vec<String>,
    float: Vec<String>,
    returns: RawReturns,
    vm_returns: RawReturns,
    hardware: RawHardware,
}

#[derive(Debug, Deserialize)]
struct RawReturns {
    value: Option<String>,
    value_type: Option<String>,
    value_data: Option<String>,
    scalar: String,
    float: String,
}

#[derive(Debug, Deserialize)]
struct RawHardware {
    div_dividend: String,
    div_output: String,
    div_clobber: String,
}

/// Registers a call returns its result in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnRegisters {
    /// Combined Value register (single-register boxing)
    pub value: Option<PhysReg>,
    /// Type tag register (dual-register boxing)
    pub value_type: Option<PhysReg>,
    /// Payload register (dual-register boxing)
    pub value_data: Option<PhysReg>,
    pub scalar: PhysReg,
    pub float: PhysReg,
}

/// Registers mandated by hardware instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareRegisters {
    pub div_dividend: PhysReg,
    pub div_output: PhysReg,
    pub div_clobber: PhysReg,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallingConvention {
    pub name: String,
    /// Returns from compiled code
    pub returns: ReturnRegisters,
    /// Returns from runtime support routines
    pub vm_returns: ReturnRegisters,
    pub hardware: HardwareRegisters,
}

impl CallingConvention {
    pub fn from_toml(source: &str) -> Result<Self> {
        let raw: RawConvention = toml::from_str(source)?;
        let resolver = RegisterResolver {
            general: &raw.general,
            float: &raw.float,
        };
        Ok(Self {
            returns: resolver.returns(&raw.returns)?,
            vm_returns: resolver.returns(&raw.vm_returns)?,
            hardware: HardwareRegisters {
                div_dividend: resolver.general(&raw.hardware.div_dividend)?,
                div_output: resolver.general(&raw.hardware.div_output)?,
                div_clobber: resolver.general(&raw.hardware.div_clobber)?,
            },
            name: raw.name,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml(&source)
    }
}

struct RegisterResolver<'a> {
    general: &'a [String],
    float: &'a [String],
}

impl RegisterResolver<'_> {
    fn lookup(&self, class: RegClass, name: &str) -> Result<PhysReg> {
        let table = match class {
            RegClass::General => self.general,
            RegClass::Float => self.float,
        };
        let code = table.iter().position(|r| r == name).ok_or_else(|| {
            LowerError::config(format!("unknown {class:?} register `{name}`"))
        })?;
        let code = u8::try_from(code).map_err(|_| {
            LowerError::config(format!("{class:?} register `{name}` is past the encodable range"))
        })?;
        Ok(PhysReg {
            class,
            code,
            name: name.to_string(),
        })
    }

    fn general(&self, name: &str) -> Result<PhysReg> {
        self.lookup(RegClass::General, name)
    }

    fn optional(&self, name: &Option<String>) -> Result<Option<PhysReg>> {
        name.as_deref().map(|n| self.general(n)).transpose()
    }

    fn returns(&self, raw: &RawReturns) -> Result<ReturnRegisters> {
        Ok(ReturnRegisters {
            value: self.optional(&raw.value)?,
            value_type: self.optional(&raw.value_type)?,
            value_data: self.optional(&raw.value_data)?,
            scalar: self.general(&raw.scalar)?,
            float: self.lookup(RegClass::Float, &raw.float)?,
        })
    }
}

/// Everything target-dependent the lowering core needs
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub boxing: BoxingKind,
    pub max_virtual_registers: u32,
    pub convention: CallingConvention,
}

impl TargetConfig {
    /// Pair a layout with a convention, checking that the convention names
    /// every register the layout returns Values in.
    pub fn new(boxing: BoxingKind, convention: CallingConvention) -> Result<Self> {
        let layout = boxing.layout();
        layout.box_registers(&convention.returns)?;
        layout.box_registers(&convention.vm_returns)?;
        Ok(Self {
            boxing,
            max_virtual_registers: MAX_VIRTUAL_REGISTERS,
            convention,
        })
    }

    pub fn for_target(target: Target) -> Result<Self> {
        let convention = CallingConvention::from_toml(target.convention_source())?;
        Self::new(target.boxing(), convention)
    }

    pub fn x86() -> Result<Self> {
        Self::for_target(Target::X86)
    }

    pub fn x64() -> Result<Self> {
        Self::for_target(Target::X64)
    }

    /// Target layout with a convention loaded from a TOML file
    pub fn from_toml_file(target: Target, path: &Path) -> Result<Self> {
        Self::new(target.boxing(), CallingConvention::from_file(path)?)
    }

    pub fn with_max_virtual_registers(mut self, limit: u32) -> Self {
        self.max_virtual_registers = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_load() {
        let x86 = TargetConfig::x86().unwrap();
        assert_eq!(x86.boxing, BoxingKind::DualRegister);
        assert_eq!(x86.convention.name, "x86");
        assert_eq!(x86.convention.returns.scalar.name, "eax");
        assert_eq!(x86.convention.returns.value_type.as_ref().map(|r| r.code), Some(1));
        assert_eq!(x86.max_virtual_registers, MAX_VIRTUAL_REGISTERS);

        let x64 = TargetConfig::x64().unwrap();
        assert_eq!(x64.boxing, BoxingKind::SingleRegister);
        assert_eq!(x64.convention.returns.value.as_ref().map(|r| r.name.as_str()), Some("rcx"));
        assert_eq!(x64.convention.hardware.div_clobber.name, "rdx");
    }

    #[test]
    fn test_float_returns_resolve_in_float_file() {
        let x86 = TargetConfig::x86().unwrap();
        assert_eq!(x86.convention.vm_returns.float.class, RegClass::Float);
        assert_eq!(x86.convention.vm_returns.float.code, 0);
    }

    #[test]
    fn test_unknown_register_is_config_error() {
        let source = X86_CONVENTION.replace("div_clobber = \"edx\"", "div_clobber = \"r99\"");
        let err = CallingConvention::from_toml(&source).unwrap_err();
        assert!(matches!(err, LowerError::Config { .. }));
    }

    #[test]
    fn test_register_code_must_fit_a_byte() {
        let mut general: Vec<String> = (0..300).map(|i| format!("\"r{i}\"")).collect();
        general[290] = "\"edx\"".to_string();
        let table = format!("general = [{}]", general.join(", "));
        let source = X86_CONVENTION.replace(
            "general = [\"eax\", \"ecx\", \"edx\", \"ebx\", \"esp\", \"ebp\", \"esi\", \"edi\"]",
            &table,
        );
        let source = source
            .replace("\"eax\"", "\"r0\"")
            .replace("\"ecx\"", "\"r1\"");
        let err = CallingConvention::from_toml(&source).unwrap_err();
        assert!(matches!(err, LowerError::Config { .. }));
        assert!(err.to_string().contains("edx"));
    }

    #[test]
    fn test_layout_needs_matching_registers() {
        // The x86 tables have no combined Value register
        let convention = CallingConvention::from_toml(X86_CONVENTION).unwrap();
        assert!(TargetConfig::new(BoxingKind::SingleRegister, convention).is_err());
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(Target::from_str("i686"), Some(Target::X86));
        assert_eq!(Target::from_str("x86_64"), Some(Target::X64));
        assert_eq!(Target::from_str("wasm32"), None);
        assert_eq!(Target::X86.as_str(), "x86");
    }
}
