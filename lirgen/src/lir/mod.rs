//! Low-level Intermediate Representation (LIR)
//!
//! LIR is the output of lowering: target-level instructions whose inputs and
//! outputs are virtual registers annotated with allocation policies. The
//! register allocator and emitter downstream consume it as-is.

pub mod vreg;

pub use vreg::{MAX_VIRTUAL_REGISTERS, VirtualRegisterSpace, Vreg};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mir::{BlockId, CmpOp, ConstValue, DefId, MirType};

/// Register file a physical register belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegClass {
    General,
    Float,
}

/// A machine register, resolved from the calling-convention tables
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PhysReg {
    pub class: RegClass,
    pub code: u8,
    pub name: String,
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A concrete location an output or input can be pinned to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Register(PhysReg),
    /// Incoming argument slot, in register-width units
    Argument(u32),
}

impl From<PhysReg> for Location {
    fn from(reg: PhysReg) -> Self {
        Location::Register(reg)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Register(reg) => write!(f, "{reg}"),
            Location::Argument(slot) => write!(f, "arg{slot}"),
        }
    }
}

/// Representation of a definition slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LirType {
    General,
    /// Int32 and Boolean share this representation
    Int32,
    Pointer,
    Double,
    /// Type tag half of a dual-register box
    Type,
    /// Payload half of a dual-register box
    Payload,
    /// Combined single-register box
    Box,
}

impl LirType {
    pub fn from_mir(ty: MirType) -> LirType {
        match ty {
            MirType::Int32 | MirType::Boolean => LirType::Int32,
            MirType::Double => LirType::Double,
            MirType::Pointer => LirType::Pointer,
            MirType::Value => LirType::Box,
            MirType::None => LirType::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LirType::General => "general",
            LirType::Int32 => "int32",
            LirType::Pointer => "ptr",
            LirType::Double => "double",
            LirType::Type => "type",
            LirType::Payload => "payload",
            LirType::Box => "box",
        }
    }
}

/// Allocation policy of a definition slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefPolicy {
    Any,
    Fixed(Location),
    /// Output shares storage with the given operand
    MustReuseInput(usize),
    /// Renames an existing register without producing a new value
    Passthrough,
}

/// A definition slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LDefinition {
    pub vreg: Vreg,
    pub ty: LirType,
    pub policy: DefPolicy,
}

impl LDefinition {
    /// A slot whose register is filled in by the binder
    pub fn new(ty: LirType, policy: DefPolicy) -> Self {
        Self {
            vreg: Vreg::UNASSIGNED,
            ty,
            policy,
        }
    }

    pub fn with_vreg(vreg: Vreg, ty: LirType, policy: DefPolicy) -> Self {
        Self { vreg, ty, policy }
    }

    pub fn is_passthrough(&self) -> bool {
        self.policy == DefPolicy::Passthrough
    }
}

/// Allocation policy of a use slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsePolicy {
    Any,
    Register,
    Fixed(Location),
    /// Keep the value alive across the instruction, e.g. a call
    KeepAlive,
}

/// A use slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LUse {
    pub vreg: Vreg,
    pub policy: UsePolicy,
    /// The value is dead once the instruction starts executing
    pub used_at_start: bool,
}

impl LUse {
    pub fn new(vreg: Vreg, policy: UsePolicy, used_at_start: bool) -> Self {
        Self {
            vreg,
            policy,
            used_at_start,
        }
    }
}

/// An instruction operand
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LAllocation {
    Use(LUse),
    /// Immediate embedded in the instruction
    Constant(ConstValue),
}

impl LAllocation {
    pub fn as_use(&self) -> Option<&LUse> {
        match self {
            LAllocation::Use(u) => Some(u),
            LAllocation::Constant(_) => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, LAllocation::Constant(_))
    }
}

impl From<LUse> for LAllocation {
    fn from(u: LUse) -> Self {
        LAllocation::Use(u)
    }
}

/// LIR opcodes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LirOp {
    /// Unboxed constant materialized into a register
    Constant(ConstValue),
    /// Constant materialized directly in boxed form
    BoxedConstant(ConstValue),
    Parameter(u32),
    AddI,
    SubI,
    MulI,
    DivI,
    NegI,
    BitNotI,
    AddD,
    SubD,
    MulD,
    DivD,
    NegD,
    CompareI(CmpOp),
    CompareD(CmpOp),
    Box(MirType),
    BoxDouble,
    Unbox(MirType),
    UnboxDouble,
    Rename,
    Call(String),
    CallVm(String),
    KeepAlive,
    Goto(BlockId),
    Test { if_true: BlockId, if_false: BlockId },
    Return,
}

impl fmt::Display for LirOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LirOp::Constant(value) => write!(f, "constant {value}"),
            LirOp::BoxedConstant(value) => write!(f, "value {value}"),
            LirOp::Parameter(index) => write!(f, "parameter {index}"),
            LirOp::AddI => f.write_str("addi"),
            LirOp::SubI => f.write_str("subi"),
            LirOp::MulI => f.write_str("muli"),
            LirOp::DivI => f.write_str("divi"),
            LirOp::NegI => f.write_str("negi"),
            LirOp::BitNotI => f.write_str("bitnoti"),
            LirOp::AddD => f.write_str("addd"),
            LirOp::SubD => f.write_str("subd"),
            LirOp::MulD => f.write_str("muld"),
            LirOp::DivD => f.write_str("divd"),
            LirOp::NegD => f.write_str("negd"),
            LirOp::CompareI(op) => write!(f, "comparei.{}", op.as_str()),
            LirOp::CompareD(op) => write!(f, "compared.{}", op.as_str()),
            LirOp::Box(ty) => write!(f, "box.{}", ty.as_str()),
            LirOp::BoxDouble => f.write_str("boxdouble"),
            LirOp::Unbox(ty) => write!(f, "unbox.{}", ty.as_str()),
            LirOp::UnboxDouble => f.write_str("unboxdouble"),
            LirOp::Rename => f.write_str("rename"),
            LirOp::Call(callee) => write!(f, "call {callee}"),
            LirOp::CallVm(routine) => write!(f, "callvm {routine}"),
            LirOp::KeepAlive => f.write_str("keepalive"),
            LirOp::Goto(target) => write!(f, "goto {target}"),
            LirOp::Test { if_true, if_false } => write!(f, "test {if_true}, {if_false}"),
            LirOp::Return => f.write_str("return"),
        }
    }
}

/// A LIR instruction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LInstruction {
    pub op: LirOp,
    pub defs: Vec<LDefinition>,
    pub operands: Vec<LAllocation>,
    pub temps: Vec<LDefinition>,
    /// Originating MIR definition
    pub mir: Option<DefId>,
    /// Self-identity, assigned when the instruction joins a block
    pub id: Option<Vreg>,
}

impl LInstruction {
    pub fn new(op: LirOp) -> Self {
        Self {
            op,
            defs: Vec::new(),
            operands: Vec::new(),
            temps: Vec::new(),
            mir: None,
            id: None,
        }
    }

    pub fn with_operand(mut self, operand: impl Into<LAllocation>) -> Self {
        self.operands.push(operand.into());
        self
    }

    pub fn with_operands(mut self, operands: impl IntoIterator<Item = LAllocation>) -> Self {
        self.operands.extend(operands);
        self
    }

    pub fn with_temp(mut self, temp: LDefinition) -> Self {
        self.temps.push(temp);
        self
    }

    pub fn operand(&self, index: usize) -> Option<&LAllocation> {
        self.operands.get(index)
    }

    pub fn def(&self, index: usize) -> Option<&LDefinition> {
        self.defs.get(index)
    }

    pub(crate) fn set_def(&mut self, index: usize, def: LDefinition) {
        if index >= self.defs.len() {
            self.defs.resize(index + 1, LDefinition::new(LirType::General, DefPolicy::Any));
        }
        self.defs[index] = def;
    }
}

/// Lowered instructions of one basic block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LBlock {
    pub id: BlockId,
    pub instructions: Vec<LInstruction>,
}

/// A fully lowered function
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LirGraph {
    pub blocks: Vec<LBlock>,
    pub num_virtual_registers: u32,
}

impl LirGraph {
    pub fn instructions(&self) -> impl Iterator<Item = &LInstruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }
}

/// Format a LIR graph as human-readable text
pub fn format_lir(graph: &LirGraph) -> String {
    let mut out = String::new();
    for block in &graph.blocks {
        out.push_str(&format!("{}:\n", block.id));
        for ins in &block.instructions {
            out.push_str("  ");
            out.push_str(&format_instruction(ins));
            out.push('\n');
        }
    }
    out
}

pub fn format_instruction(ins: &LInstruction) -> String {
    let mut out = match ins.id {
        Some(id) => format!("[{id}] {}", ins.op),
        None => format!("[?] {}", ins.op),
    };
    if !ins.defs.is_empty() {
        let defs: Vec<String> = ins.defs.iter().map(format_definition).collect();
        out.push_str(&format!(" -> {}", defs.join(", ")));
    }
    if !ins.operands.is_empty() {
        let operands: Vec<String> = ins.operands.iter().map(format_allocation).collect();
        out.push_str(&format!(" <- {}", operands.join(", ")));
    }
    if !ins.temps.is_empty() {
        let temps: Vec<String> = ins.temps.iter().map(format_definition).collect();
        out.push_str(&format!(" temps {}", temps.join(", ")));
    }
    out
}

fn format_definition(def: &LDefinition) -> String {
    let base = format!("{}:{}", def.vreg, def.ty.as_str());
    match &def.policy {
        DefPolicy::Any => base,
        DefPolicy::Fixed(location) => format!("{base}@{location}"),
        DefPolicy::MustReuseInput(operand) => format!("{base}=op{operand}"),
        DefPolicy::Passthrough => format!("{base}~"),
    }
}

fn format_allocation(alloc: &LAllocation) -> String {
    match alloc {
        LAllocation::Constant(value) => format!("#{value}"),
        LAllocation::Use(u) => {
            let mut out = match &u.policy {
                UsePolicy::Any => format!("{}", u.vreg),
                UsePolicy::Register => format!("{}:reg", u.vreg),
                UsePolicy::Fixed(location) => format!("{}@{location}", u.vreg),
                UsePolicy::KeepAlive => format!("{}:keepalive", u.vreg),
            };
            if u.used_at_start {
                out.push('^');
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eax() -> PhysReg {
        PhysReg {
            class: RegClass::General,
            code: 0,
            name: "eax".to_string(),
        }
    }

    #[test]
    fn test_type_from_mir() {
        assert_eq!(LirType::from_mir(MirType::Boolean), LirType::Int32);
        assert_eq!(LirType::from_mir(MirType::Int32), LirType::Int32);
        assert_eq!(LirType::from_mir(MirType::Value), LirType::Box);
        assert_eq!(LirType::from_mir(MirType::Double), LirType::Double);
    }

    #[test]
    fn test_set_def_grows_slots() {
        let mut ins = LInstruction::new(LirOp::Return);
        ins.set_def(1, LDefinition::with_vreg(Vreg::new(5), LirType::Payload, DefPolicy::Any));
        assert_eq!(ins.defs.len(), 2);
        assert_eq!(ins.def(1).map(|d| d.vreg), Some(Vreg::new(5)));
    }

    #[test]
    fn test_format_instruction() {
        let mut ins = LInstruction::new(LirOp::DivI)
            .with_operand(LUse::new(Vreg::new(1), UsePolicy::Fixed(eax().into()), true))
            .with_operand(LAllocation::Constant(ConstValue::Int32(3)))
            .with_temp(LDefinition::with_vreg(Vreg::new(4), LirType::General, DefPolicy::Any));
        ins.set_def(
            0,
            LDefinition::with_vreg(Vreg::new(3), LirType::Int32, DefPolicy::Fixed(eax().into())),
        );
        ins.id = Some(Vreg::new(3));
        assert_eq!(
            format_instruction(&ins),
            "[v3] divi -> v3:int32@eax <- v1@eax^, #3 temps v4:general"
        );
    }
}
