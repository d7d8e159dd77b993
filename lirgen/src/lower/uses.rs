//! Use builder
//!
//! Every use first makes sure its producer is materialized, then reads the
//! producer's register. Constant producers can skip both and travel as
//! immediates.

use crate::config::ReturnRegisters;
use crate::error::{LowerError, Result, Violation};
use crate::lir::{LAllocation, LUse, Location, UsePolicy, Vreg};
use crate::mir::DefId;

use super::{BlockBuilder, Lowerer};

impl Lowerer<'_> {
    fn use_with(
        &mut self,
        block: &mut BlockBuilder,
        mir: DefId,
        policy: UsePolicy,
        at_start: bool,
    ) -> Result<LUse> {
        // A boxed value split over several registers has no single vreg
        if self.graph.def(mir).ty.is_value() && self.layout.pieces() > 1 {
            return Err(LowerError::internal(
                Violation::AmbiguousUse,
                format!("{mir} is a Value with {} definitions", self.layout.pieces()),
            ));
        }
        self.ensure_defined(block, mir)?;
        let vreg = self.bound_vreg(mir)?;
        Ok(LUse::new(vreg, policy, at_start))
    }

    pub fn use_register(&mut self, block: &mut BlockBuilder, mir: DefId) -> Result<LUse> {
        self.use_with(block, mir, UsePolicy::Register, false)
    }

    pub fn use_register_at_start(&mut self, block: &mut BlockBuilder, mir: DefId) -> Result<LUse> {
        self.use_with(block, mir, UsePolicy::Register, true)
    }

    pub fn use_any(&mut self, block: &mut BlockBuilder, mir: DefId) -> Result<LUse> {
        self.use_with(block, mir, UsePolicy::Any, false)
    }

    pub fn use_at_start(&mut self, block: &mut BlockBuilder, mir: DefId) -> Result<LUse> {
        self.use_with(block, mir, UsePolicy::Any, true)
    }

    pub fn use_fixed(&mut self, block: &mut BlockBuilder, mir: DefId, location: Location) -> Result<LUse> {
        self.use_with(block, mir, UsePolicy::Fixed(location), false)
    }

    pub fn use_fixed_at_start(
        &mut self,
        block: &mut BlockBuilder,
        mir: DefId,
        location: Location,
    ) -> Result<LUse> {
        self.use_with(block, mir, UsePolicy::Fixed(location), true)
    }

    fn use_or_constant_with(
        &mut self,
        block: &mut BlockBuilder,
        mir: DefId,
        policy: UsePolicy,
    ) -> Result<LAllocation> {
        if let Some(value) = self.graph.def(mir).constant() {
            return Ok(LAllocation::Constant(value));
        }
        Ok(self.use_with(block, mir, policy, false)?.into())
    }

    pub fn use_or_constant(&mut self, block: &mut BlockBuilder, mir: DefId) -> Result<LAllocation> {
        self.use_or_constant_with(block, mir, UsePolicy::Any)
    }

    pub fn use_register_or_constant(&mut self, block: &mut BlockBuilder, mir: DefId) -> Result<LAllocation> {
        self.use_or_constant_with(block, mir, UsePolicy::Register)
    }

    pub fn use_keepalive_or_constant(&mut self, block: &mut BlockBuilder, mir: DefId) -> Result<LAllocation> {
        self.use_or_constant_with(block, mir, UsePolicy::KeepAlive)
    }

    /// Registers holding each piece of a Value producer, after materializing it
    fn box_pieces(&mut self, block: &mut BlockBuilder, mir: DefId) -> Result<Vec<Vreg>> {
        if !self.graph.def(mir).ty.is_value() {
            return Err(LowerError::internal(
                Violation::UnexpectedType,
                format!("{mir} is not a Value"),
            ));
        }
        self.ensure_defined(block, mir)?;
        self.layout.piece_vregs(&*self.graph, mir)
    }

    fn box_piece(
        &mut self,
        block: &mut BlockBuilder,
        mir: DefId,
        slot: Option<usize>,
        what: &str,
    ) -> Result<Vreg> {
        let Some(slot) = slot else {
            return Err(LowerError::internal(
                Violation::UnexpectedType,
                format!("{} boxing has no {what} register", self.layout.kind().as_str()),
            ));
        };
        let pieces = self.box_pieces(block, mir)?;
        Ok(pieces[slot])
    }

    /// Type tag register of a dual-register Value
    pub fn use_type(&mut self, block: &mut BlockBuilder, mir: DefId, policy: UsePolicy) -> Result<LUse> {
        let vreg = self.box_piece(block, mir, self.layout.type_slot(), "type")?;
        Ok(LUse::new(vreg, policy, false))
    }

    /// Payload register of a dual-register Value
    pub fn use_payload(&mut self, block: &mut BlockBuilder, mir: DefId, policy: UsePolicy) -> Result<LUse> {
        let vreg = self.box_piece(block, mir, self.layout.payload_slot(), "payload")?;
        Ok(LUse::new(vreg, policy, false))
    }

    pub fn use_payload_at_start(
        &mut self,
        block: &mut BlockBuilder,
        mir: DefId,
        policy: UsePolicy,
    ) -> Result<LUse> {
        let vreg = self.box_piece(block, mir, self.layout.payload_slot(), "payload")?;
        Ok(LUse::new(vreg, policy, true))
    }

    pub fn use_payload_in_register_at_start(&mut self, block: &mut BlockBuilder, mir: DefId) -> Result<LUse> {
        self.use_payload_at_start(block, mir, UsePolicy::Register)
    }

    /// One operand per piece of a Value, all under `policy`
    pub fn use_box(
        &mut self,
        block: &mut BlockBuilder,
        mir: DefId,
        policy: UsePolicy,
        at_start: bool,
    ) -> Result<Vec<LAllocation>> {
        let pieces = self.box_pieces(block, mir)?;
        Ok(pieces
            .into_iter()
            .map(|vreg| LUse::new(vreg, policy.clone(), at_start).into())
            .collect())
    }

    /// One operand per piece of a Value, pinned to the given return registers
    pub fn use_box_fixed(
        &mut self,
        block: &mut BlockBuilder,
        mir: DefId,
        regs: &ReturnRegisters,
    ) -> Result<Vec<LAllocation>> {
        let registers = self.layout.box_registers(regs)?;
        let pieces = self.box_pieces(block, mir)?;
        Ok(pieces
            .into_iter()
            .zip(registers)
            .map(|(vreg, reg)| LUse::new(vreg, UsePolicy::Fixed(Location::Register(reg)), false).into())
            .collect())
    }
}
