//! Definition binder
//!
//! Binds instruction outputs to virtual registers, mirrors the binding onto
//! the producing MIR definition and appends the instruction to its block.

use crate::error::{LowerError, Result, Violation};
use crate::lir::{DefPolicy, LDefinition, LInstruction, LirType, Location, PhysReg, Vreg};
use crate::mir::{DefId, MirType};

use super::{BlockBuilder, Lowerer};

impl Lowerer<'_> {
    /// Bind the single output of `ins` to a fresh register shared with `mir`
    pub fn define(
        &mut self,
        block: &mut BlockBuilder,
        mut ins: LInstruction,
        mir: DefId,
        mut def: LDefinition,
    ) -> Result<()> {
        if def.ty == LirType::Box && self.layout.pieces() != 1 {
            return Err(LowerError::internal(
                Violation::UnexpectedType,
                format!("{mir} is a Value and needs {} definitions", self.layout.pieces()),
            ));
        }
        let vreg = self.vregs.allocate()?;
        def.vreg = vreg;
        ins.set_def(0, def);
        ins.mir = Some(mir);
        self.graph.def_mut(mir).set_vreg(vreg);
        self.add(block, ins)
    }

    /// `define` with the slot type derived from the MIR type
    pub fn define_policy(
        &mut self,
        block: &mut BlockBuilder,
        ins: LInstruction,
        mir: DefId,
        policy: DefPolicy,
    ) -> Result<()> {
        let ty = LirType::from_mir(self.graph.def(mir).ty);
        self.define(block, ins, mir, LDefinition::new(ty, policy))
    }

    /// Pin the output to a location mandated by a convention or instruction
    pub fn define_fixed(
        &mut self,
        block: &mut BlockBuilder,
        ins: LInstruction,
        mir: DefId,
        output: Location,
    ) -> Result<()> {
        self.define_policy(block, ins, mir, DefPolicy::Fixed(output))
    }

    /// The output overwrites operand `operand`, which must be used at start
    pub fn define_reuse_input(
        &mut self,
        block: &mut BlockBuilder,
        ins: LInstruction,
        mir: DefId,
        operand: usize,
    ) -> Result<()> {
        check_reused_input(&ins, operand)?;
        self.define_policy(block, ins, mir, DefPolicy::MustReuseInput(operand))
    }

    /// Bind all pieces of a boxed Value output under one policy
    pub fn define_box(
        &mut self,
        block: &mut BlockBuilder,
        ins: LInstruction,
        mir: DefId,
        policy: DefPolicy,
    ) -> Result<()> {
        let policies = vec![policy; self.layout.pieces()];
        self.define_box_with(block, ins, mir, policies)
    }

    /// Boxed Value output in the convention's compiled-code return registers
    pub fn define_return(&mut self, block: &mut BlockBuilder, ins: LInstruction, mir: DefId) -> Result<()> {
        let policies = self
            .layout
            .box_registers(&self.convention.returns)?
            .into_iter()
            .map(|reg| DefPolicy::Fixed(Location::Register(reg)))
            .collect();
        self.define_box_with(block, ins, mir, policies)
    }

    /// Output of a call into a runtime support routine. Values come back in
    /// the boxed return registers; scalars in a single return register.
    pub fn define_vm_return(
        &mut self,
        block: &mut BlockBuilder,
        ins: LInstruction,
        mir: DefId,
    ) -> Result<()> {
        let convention = self.convention;
        let returns = &convention.vm_returns;
        match self.graph.def(mir).ty {
            MirType::Value => {
                let policies = self
                    .layout
                    .box_registers(returns)?
                    .into_iter()
                    .map(|reg| DefPolicy::Fixed(Location::Register(reg)))
                    .collect();
                self.define_box_with(block, ins, mir, policies)
            }
            MirType::Double => {
                let reg = returns.float.clone();
                self.define_fixed(block, ins, mir, Location::Register(reg))
            }
            _ => {
                let reg = returns.scalar.clone();
                self.define_fixed(block, ins, mir, Location::Register(reg))
            }
        }
    }

    pub(super) fn define_box_with(
        &mut self,
        block: &mut BlockBuilder,
        mut ins: LInstruction,
        mir: DefId,
        policies: Vec<DefPolicy>,
    ) -> Result<()> {
        let base = self.layout.reserve(&mut self.vregs)?;
        for (i, def) in self.layout.definitions(base, policies).into_iter().enumerate() {
            ins.set_def(i, def);
        }
        ins.mir = Some(mir);
        self.graph.def_mut(mir).set_vreg(base);
        self.add(block, ins)
    }

    /// Dual-register Box of a non-constant, non-double input: a fresh type
    /// register, and the input's own register as the payload.
    pub(super) fn define_box_aliasing_payload(
        &mut self,
        block: &mut BlockBuilder,
        mut ins: LInstruction,
        mir: DefId,
        input: DefId,
    ) -> Result<()> {
        let payload = self.bound_vreg(input)?;
        let vreg = self.vregs.allocate()?;
        ins.set_def(0, LDefinition::with_vreg(vreg, LirType::Type, DefPolicy::Any));
        ins.set_def(1, LDefinition::with_vreg(payload, LirType::Payload, DefPolicy::Passthrough));
        ins.mir = Some(mir);
        self.graph.def_mut(mir).set_vreg(vreg);
        self.add(block, ins)
    }

    /// Alias `target` to `source`'s register, materializing `source` first
    pub fn redefine(&mut self, block: &mut BlockBuilder, target: DefId, source: DefId) -> Result<()> {
        let to = self.graph.def(target).ty;
        let from = self.graph.def(source).ty;
        if !to.is_interchangeable_with(from) {
            return Err(LowerError::internal(
                Violation::IncompatibleRedefinition,
                format!("cannot redefine {target} ({}) as {source} ({})", to.as_str(), from.as_str()),
            ));
        }
        self.ensure_defined(block, source)?;
        let vreg = self.bound_vreg(source)?;
        let target_def = self.graph.def_mut(target);
        target_def.set_vreg(vreg);
        target_def.set_alias(source);
        Ok(())
    }

    /// Give `out` a distinct instruction whose definitions pass `input`'s
    /// registers through unchanged.
    pub fn define_as(
        &mut self,
        block: &mut BlockBuilder,
        mut ins: LInstruction,
        out: DefId,
        input: DefId,
    ) -> Result<()> {
        self.redefine(block, out, input)?;

        let input_ty = self.graph.def(input).ty;
        if input_ty.is_value() {
            let pieces = self.layout.piece_vregs(&*self.graph, input)?;
            for (i, (vreg, ty)) in pieces.into_iter().zip(self.layout.slot_types()).enumerate() {
                ins.set_def(i, LDefinition::with_vreg(vreg, *ty, DefPolicy::Passthrough));
            }
        } else {
            let vreg = self.bound_vreg(input)?;
            let ty = LirType::from_mir(input_ty);
            ins.set_def(0, LDefinition::with_vreg(vreg, ty, DefPolicy::Passthrough));
        }
        ins.mir = Some(out);
        self.add(block, ins)
    }

    /// Materialize a deferred definition on its first use. Eager definitions
    /// must already be bound.
    pub fn ensure_defined(&mut self, block: &mut BlockBuilder, mir: DefId) -> Result<()> {
        let def = self.graph.def(mir);
        if def.can_emit_at_uses() {
            if !def.is_lowered() {
                tracing::debug!(def = %mir, block = %block.id(), "materializing at use");
                self.lower_definition(block, mir)?;
            }
            return Ok(());
        }
        if def.vreg().is_none() {
            return Err(LowerError::internal(
                Violation::UnboundDefinition,
                format!("{mir} is used before it is defined"),
            ));
        }
        Ok(())
    }

    /// Append `ins` to `block` once its reuse constraints hold and it has an
    /// identity.
    pub fn add(&mut self, block: &mut BlockBuilder, mut ins: LInstruction) -> Result<()> {
        for def in ins.defs.iter().chain(ins.temps.iter()) {
            if let DefPolicy::MustReuseInput(operand) = def.policy {
                check_reused_input(&ins, operand)?;
            }
        }
        self.annotate(&mut ins)?;
        block.push(ins);
        Ok(())
    }

    /// Self-identity: the first real output, or a fresh register for
    /// instructions that only pass values through or define nothing.
    pub fn annotate(&mut self, ins: &mut LInstruction) -> Result<()> {
        let id = match ins.defs.iter().find(|d| !d.is_passthrough()) {
            Some(def) => def.vreg,
            None => self.vregs.allocate()?,
        };
        ins.id = Some(id);
        Ok(())
    }

    pub fn temp(&mut self, ty: LirType, policy: DefPolicy) -> Result<LDefinition> {
        let vreg = self.vregs.allocate()?;
        Ok(LDefinition::with_vreg(vreg, ty, policy))
    }

    pub fn temp_fixed(&mut self, reg: PhysReg) -> Result<LDefinition> {
        self.temp(LirType::General, DefPolicy::Fixed(Location::Register(reg)))
    }

    pub fn temp_float(&mut self) -> Result<LDefinition> {
        self.temp(LirType::Double, DefPolicy::Any)
    }

    /// Scratch copy of `input` living in operand `operand`'s storage
    pub fn temp_copy(&mut self, input: DefId, operand: usize) -> Result<LDefinition> {
        let ty = LirType::from_mir(self.graph.def(input).ty);
        self.temp(ty, DefPolicy::MustReuseInput(operand))
    }

    pub(super) fn bound_vreg(&self, mir: DefId) -> Result<Vreg> {
        self.graph.def(mir).vreg().ok_or_else(|| {
            LowerError::internal(Violation::UnboundDefinition, format!("{mir} has no virtual register"))
        })
    }
}

fn check_reused_input(ins: &LInstruction, operand: usize) -> Result<()> {
    match ins.operand(operand).and_then(|o| o.as_use()) {
        Some(u) if u.used_at_start => Ok(()),
        _ => Err(LowerError::internal(
            Violation::ReuseInputNotAtStart,
            format!("{} reuses operand {operand}, which is not a use at start", ins.op),
        )),
    }
}
