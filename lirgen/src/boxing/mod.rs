//! Boxed value layouts
//!
//! A dynamic Value occupies either two registers (type tag + payload) on
//! 32-bit targets or one combined register on 64-bit targets. The layout is
//! chosen once per target; every lowering call site goes through
//! [`BoxLayout`] and never branches on the layout itself.

use std::fmt;

use serde::Deserialize;

use crate::config::ReturnRegisters;
use crate::error::{LowerError, Result, Violation};
use crate::lir::{DefPolicy, LDefinition, LirType, PhysReg, VirtualRegisterSpace, Vreg};
use crate::mir::{DefId, MirGraph, MirOp};

/// Offset of the type tag from a dual-register box's base identity
pub const TYPE_OFFSET: u32 = 0;
/// Offset of the payload from a dual-register box's base identity
pub const PAYLOAD_OFFSET: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxingKind {
    /// Type tag and payload in two registers
    DualRegister,
    /// Tag and payload packed into one register
    SingleRegister,
}

impl BoxingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoxingKind::DualRegister => "dual-register",
            BoxingKind::SingleRegister => "single-register",
        }
    }

    pub fn layout(&self) -> &'static dyn BoxLayout {
        match self {
            BoxingKind::DualRegister => &DualRegister,
            BoxingKind::SingleRegister => &SingleRegister,
        }
    }
}

/// How a boxed Value maps onto virtual registers
pub trait BoxLayout: fmt::Debug + Sync {
    fn kind(&self) -> BoxingKind;

    /// Representation of each piece, in slot order
    fn slot_types(&self) -> &'static [LirType];

    fn type_slot(&self) -> Option<usize>;
    fn payload_slot(&self) -> Option<usize>;
    fn combined_slot(&self) -> Option<usize>;

    /// Physical registers holding a returned Value, in slot order
    fn box_registers(&self, regs: &ReturnRegisters) -> Result<Vec<PhysReg>>;

    fn pieces(&self) -> usize {
        self.slot_types().len()
    }

    /// Reserve the contiguous identities of a fresh boxed value
    fn reserve(&self, vregs: &mut VirtualRegisterSpace) -> Result<Vreg> {
        vregs.allocate_run(self.pieces() as u32)
    }

    /// Definition slots of a boxed value whose pieces start at `base`
    fn definitions(&self, base: Vreg, policies: Vec<DefPolicy>) -> Vec<LDefinition> {
        debug_assert_eq!(policies.len(), self.pieces());
        self.slot_types()
            .iter()
            .zip(policies)
            .enumerate()
            .map(|(i, (ty, policy))| LDefinition::with_vreg(base.offset(i as u32), *ty, policy))
            .collect()
    }

    /// Identities currently holding each piece of `id`'s value
    fn piece_vregs(&self, graph: &MirGraph, id: DefId) -> Result<Vec<Vreg>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DualRegister;

#[derive(Debug, Clone, Copy, Default)]
pub struct SingleRegister;

impl BoxLayout for DualRegister {
    fn kind(&self) -> BoxingKind {
        BoxingKind::DualRegister
    }

    fn slot_types(&self) -> &'static [LirType] {
        &[LirType::Type, LirType::Payload]
    }

    fn type_slot(&self) -> Option<usize> {
        Some(TYPE_OFFSET as usize)
    }

    fn payload_slot(&self) -> Option<usize> {
        Some(PAYLOAD_OFFSET as usize)
    }

    fn combined_slot(&self) -> Option<usize> {
        None
    }

    fn box_registers(&self, regs: &ReturnRegisters) -> Result<Vec<PhysReg>> {
        match (&regs.value_type, &regs.value_data) {
            (Some(ty), Some(data)) => Ok(vec![ty.clone(), data.clone()]),
            _ => Err(LowerError::config(
                "dual-register boxing needs `value_type` and `value_data` return registers",
            )),
        }
    }

    fn piece_vregs(&self, graph: &MirGraph, id: DefId) -> Result<Vec<Vreg>> {
        let base = bound_vreg(graph, id)?;
        Ok(vec![base.offset(TYPE_OFFSET), payload_vreg(graph, id)?])
    }
}

impl BoxLayout for SingleRegister {
    fn kind(&self) -> BoxingKind {
        BoxingKind::SingleRegister
    }

    fn slot_types(&self) -> &'static [LirType] {
        &[LirType::Box]
    }

    fn type_slot(&self) -> Option<usize> {
        None
    }

    fn payload_slot(&self) -> Option<usize> {
        None
    }

    fn combined_slot(&self) -> Option<usize> {
        Some(0)
    }

    fn box_registers(&self, regs: &ReturnRegisters) -> Result<Vec<PhysReg>> {
        match &regs.value {
            Some(value) => Ok(vec![value.clone()]),
            None => Err(LowerError::config(
                "single-register boxing needs a `value` return register",
            )),
        }
    }

    fn piece_vregs(&self, graph: &MirGraph, id: DefId) -> Result<Vec<Vreg>> {
        Ok(vec![bound_vreg(graph, id)?])
    }
}

fn bound_vreg(graph: &MirGraph, id: DefId) -> Result<Vreg> {
    graph.def(id).vreg().ok_or_else(|| {
        LowerError::internal(Violation::UnboundDefinition, format!("{id} has no virtual register"))
    })
}

/// Payload identity of a dual-register boxed value.
///
/// A Box of a non-constant, non-double input never gets a payload register of
/// its own: the input's register already holds the payload bits. Everything
/// else keeps its payload at the base identity plus [`PAYLOAD_OFFSET`].
/// Redefinitions share their source's registers, so the rule is applied to
/// the definition that produced them.
pub fn payload_vreg(graph: &MirGraph, id: DefId) -> Result<Vreg> {
    let id = graph.resolve_alias(id);
    let def = graph.def(id);
    if def.op == MirOp::Box {
        if let Some(&inner) = def.operands.first() {
            let inner_def = graph.def(inner);
            if !inner_def.is_constant() && !inner_def.ty.is_float() {
                return bound_vreg(graph, inner);
            }
        }
    }
    Ok(bound_vreg(graph, id)?.offset(PAYLOAD_OFFSET))
}
