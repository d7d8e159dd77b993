//! Instruction selection
//!
//! One arm per MIR operation. Each arm builds an [`LInstruction`], resolves its
//! inputs through the use builder and binds its outputs through the
//! definition binder; nothing here touches registers directly.

use crate::error::{LowerError, Result, Violation};
use crate::lir::{DefPolicy, LAllocation, LInstruction, LirOp, Location, UsePolicy};
use crate::mir::{DefId, MirOp, MirType};

use super::{BlockBuilder, Lowerer};

fn unexpected(id: DefId, message: impl std::fmt::Display) -> LowerError {
    LowerError::internal(Violation::UnexpectedType, format!("{id}: {message}"))
}

fn operand(operands: &[DefId], index: usize, id: DefId) -> Result<DefId> {
    operands
        .get(index)
        .copied()
        .ok_or_else(|| LowerError::malformed(format!("{id} is missing operand {index}")))
}

impl Lowerer<'_> {
    fn operand_ty(&self, id: DefId) -> MirType {
        self.graph.def(id).ty
    }

    /// Every operand must be usable where a `ty` is expected
    fn expect_operands(&self, id: DefId, operands: &[DefId], ty: MirType) -> Result<()> {
        for &input in operands {
            let found = self.operand_ty(input);
            if !found.is_interchangeable_with(ty) {
                return Err(unexpected(
                    id,
                    format!("operand {input} is {}, expected {}", found.as_str(), ty.as_str()),
                ));
            }
        }
        Ok(())
    }

    pub(super) fn visit(&mut self, block: &mut BlockBuilder, id: DefId) -> Result<()> {
        let def = self.graph.def(id);
        let (op, ty, operands) = (def.op.clone(), def.ty, def.operands.clone());
        tracing::debug!(def = %id, op = op.name(), ty = ty.as_str(), block = %block.id(), "lowering definition");

        match op {
            MirOp::Constant(value) => {
                if ty.is_value() {
                    let ins = LInstruction::new(LirOp::BoxedConstant(value));
                    self.define_box(block, ins, id, DefPolicy::Any)
                } else {
                    let ins = LInstruction::new(LirOp::Constant(value));
                    self.define_policy(block, ins, id, DefPolicy::Any)
                }
            }

            MirOp::Parameter(index) => {
                let pieces = self.layout.pieces() as u32;
                let ins = LInstruction::new(LirOp::Parameter(index));
                if ty.is_value() {
                    let policies = (0..pieces)
                        .map(|k| DefPolicy::Fixed(Location::Argument(index * pieces + k)))
                        .collect();
                    self.define_box_with(block, ins, id, policies)
                } else {
                    self.define_fixed(block, ins, id, Location::Argument(index * pieces))
                }
            }

            MirOp::Add | MirOp::Sub | MirOp::Mul => {
                let (lhs, rhs) = (operand(&operands, 0, id)?, operand(&operands, 1, id)?);
                self.expect_operands(id, &operands, ty)?;
                match ty {
                    MirType::Int32 => {
                        let lir = match op {
                            MirOp::Add => LirOp::AddI,
                            MirOp::Sub => LirOp::SubI,
                            _ => LirOp::MulI,
                        };
                        let ins = LInstruction::new(lir)
                            .with_operand(self.use_register(block, lhs)?)
                            .with_operand(self.use_register_or_constant(block, rhs)?);
                        self.define_policy(block, ins, id, DefPolicy::Any)
                    }
                    MirType::Double => {
                        let lir = match op {
                            MirOp::Add => LirOp::AddD,
                            MirOp::Sub => LirOp::SubD,
                            _ => LirOp::MulD,
                        };
                        let ins = LInstruction::new(lir)
                            .with_operand(self.use_register(block, lhs)?)
                            .with_operand(self.use_register(block, rhs)?);
                        self.define_policy(block, ins, id, DefPolicy::Any)
                    }
                    other => Err(unexpected(id, format!("no {} for {}", op.name(), other.as_str()))),
                }
            }

            MirOp::Div => {
                let (lhs, rhs) = (operand(&operands, 0, id)?, operand(&operands, 1, id)?);
                self.expect_operands(id, &operands, ty)?;
                match ty {
                    MirType::Int32 => {
                        let hardware = self.convention.hardware.clone();
                        let dividend = Location::Register(hardware.div_dividend);
                        let ins = LInstruction::new(LirOp::DivI)
                            .with_operand(self.use_fixed(block, lhs, dividend)?)
                            .with_operand(self.use_register(block, rhs)?)
                            .with_temp(self.temp_fixed(hardware.div_clobber)?);
                        self.define_fixed(block, ins, id, Location::Register(hardware.div_output))
                    }
                    MirType::Double => {
                        let ins = LInstruction::new(LirOp::DivD)
                            .with_operand(self.use_register(block, lhs)?)
                            .with_operand(self.use_register(block, rhs)?);
                        self.define_policy(block, ins, id, DefPolicy::Any)
                    }
                    other => Err(unexpected(id, format!("no div for {}", other.as_str()))),
                }
            }

            MirOp::Neg | MirOp::BitNot => {
                let input = operand(&operands, 0, id)?;
                self.expect_operands(id, &operands, ty)?;
                let lir = match (&op, ty) {
                    (MirOp::Neg, MirType::Int32) => LirOp::NegI,
                    (MirOp::Neg, MirType::Double) => LirOp::NegD,
                    (MirOp::BitNot, MirType::Int32) => LirOp::BitNotI,
                    (_, other) => return Err(unexpected(id, format!("no {} for {}", op.name(), other.as_str()))),
                };
                let ins = LInstruction::new(lir).with_operand(self.use_register_at_start(block, input)?);
                self.define_reuse_input(block, ins, id, 0)
            }

            MirOp::Compare(cmp) => {
                let (lhs, rhs) = (operand(&operands, 0, id)?, operand(&operands, 1, id)?);
                if !ty.is_interchangeable_with(MirType::Boolean) {
                    return Err(unexpected(id, "comparison must produce a bool"));
                }
                let operand_ty = self.operand_ty(lhs);
                self.expect_operands(id, &operands, operand_ty)?;
                let ins = match operand_ty {
                    MirType::Int32 | MirType::Boolean => LInstruction::new(LirOp::CompareI(cmp))
                        .with_operand(self.use_register(block, lhs)?)
                        .with_operand(self.use_register_or_constant(block, rhs)?),
                    MirType::Double => LInstruction::new(LirOp::CompareD(cmp))
                        .with_operand(self.use_register(block, lhs)?)
                        .with_operand(self.use_register(block, rhs)?),
                    other => return Err(unexpected(id, format!("cannot compare {}", other.as_str()))),
                };
                self.define_policy(block, ins, id, DefPolicy::Any)
            }

            MirOp::Box => self.visit_box(block, id, ty, operand(&operands, 0, id)?),

            MirOp::Unbox => self.visit_unbox(block, id, ty, operand(&operands, 0, id)?),

            MirOp::ToInt32 => {
                let input = operand(&operands, 0, id)?;
                match self.operand_ty(input) {
                    MirType::Int32 | MirType::Boolean => self.redefine(block, id, input),
                    other => Err(unexpected(id, format!("no int32 view of {}", other.as_str()))),
                }
            }

            MirOp::Rename => {
                let input = operand(&operands, 0, id)?;
                self.define_as(block, LInstruction::new(LirOp::Rename), id, input)
            }

            MirOp::Call { callee } => {
                let args = self.use_arguments(block, &operands)?;
                let ins = LInstruction::new(LirOp::Call(callee)).with_operands(args);
                match ty {
                    MirType::Value => self.define_return(block, ins, id),
                    MirType::None => {
                        let mut ins = ins;
                        ins.mir = Some(id);
                        self.add(block, ins)
                    }
                    other => Err(unexpected(id, format!("calls return a value, not {}", other.as_str()))),
                }
            }

            MirOp::CallVm { routine } => {
                let args = self.use_arguments(block, &operands)?;
                let mut ins = LInstruction::new(LirOp::CallVm(routine)).with_operands(args);
                if ty == MirType::None {
                    ins.mir = Some(id);
                    self.add(block, ins)
                } else {
                    self.define_vm_return(block, ins, id)
                }
            }

            MirOp::KeepAlive => {
                let mut ins = LInstruction::new(LirOp::KeepAlive);
                for &input in &operands {
                    let input_def = self.graph.def(input);
                    if input_def.ty.is_value() && !input_def.is_constant() {
                        ins = ins.with_operands(self.use_box(block, input, UsePolicy::KeepAlive, false)?);
                    } else {
                        ins = ins.with_operand(self.use_keepalive_or_constant(block, input)?);
                    }
                }
                ins.mir = Some(id);
                self.add(block, ins)
            }

            MirOp::Goto(target) => {
                let mut ins = LInstruction::new(LirOp::Goto(target));
                ins.mir = Some(id);
                self.add(block, ins)
            }

            MirOp::Test { if_true, if_false } => {
                let cond = operand(&operands, 0, id)?;
                self.expect_operands(id, &operands, MirType::Boolean)?;
                let mut ins = LInstruction::new(LirOp::Test { if_true, if_false })
                    .with_operand(self.use_register(block, cond)?);
                ins.mir = Some(id);
                self.add(block, ins)
            }

            MirOp::Return => {
                let value = operand(&operands, 0, id)?;
                if !self.operand_ty(value).is_value() {
                    return Err(unexpected(id, "only boxed values are returned"));
                }
                let convention = self.convention;
                let uses = self.use_box_fixed(block, value, &convention.returns)?;
                let mut ins = LInstruction::new(LirOp::Return).with_operands(uses);
                ins.mir = Some(id);
                self.add(block, ins)
            }
        }
    }

    fn visit_box(&mut self, block: &mut BlockBuilder, id: DefId, ty: MirType, input: DefId) -> Result<()> {
        if !ty.is_value() {
            return Err(unexpected(id, "box must produce a value"));
        }
        let input_def = self.graph.def(input);
        let input_ty = input_def.ty;
        if input_ty.is_value() {
            return Err(unexpected(id, format!("{input} is already boxed")));
        }

        if let Some(value) = input_def.constant() {
            let ins = LInstruction::new(LirOp::BoxedConstant(value));
            return self.define_box(block, ins, id, DefPolicy::Any);
        }

        if input_ty.is_float() {
            let ins = LInstruction::new(LirOp::BoxDouble)
                .with_operand(self.use_register_at_start(block, input)?)
                .with_temp(self.temp_copy(input, 0)?);
            return self.define_box(block, ins, id, DefPolicy::Any);
        }

        if self.layout.payload_slot().is_some() {
            let ins = LInstruction::new(LirOp::Box(input_ty)).with_operand(self.use_any(block, input)?);
            self.define_box_aliasing_payload(block, ins, id, input)
        } else {
            let ins = LInstruction::new(LirOp::Box(input_ty)).with_operand(self.use_register(block, input)?);
            self.define_box(block, ins, id, DefPolicy::Any)
        }
    }

    fn visit_unbox(&mut self, block: &mut BlockBuilder, id: DefId, ty: MirType, input: DefId) -> Result<()> {
        if !self.operand_ty(input).is_value() {
            return Err(unexpected(id, format!("{input} is not boxed")));
        }
        match ty {
            MirType::Value | MirType::None => Err(unexpected(id, format!("cannot unbox to {}", ty.as_str()))),
            MirType::Double => {
                let uses = self.use_box(block, input, UsePolicy::Register, false)?;
                let ins = LInstruction::new(LirOp::UnboxDouble).with_operands(uses);
                self.define_policy(block, ins, id, DefPolicy::Any)
            }
            _ if self.layout.payload_slot().is_some() => {
                let ins = LInstruction::new(LirOp::Unbox(ty))
                    .with_operand(self.use_payload_in_register_at_start(block, input)?)
                    .with_operand(self.use_type(block, input, UsePolicy::Register)?);
                self.define_reuse_input(block, ins, id, 0)
            }
            _ => {
                let ins = LInstruction::new(LirOp::Unbox(ty)).with_operand(self.use_register(block, input)?);
                self.define_policy(block, ins, id, DefPolicy::Any)
            }
        }
    }

    /// Call arguments: boxed values fill every piece, scalars may be immediates
    fn use_arguments(&mut self, block: &mut BlockBuilder, operands: &[DefId]) -> Result<Vec<LAllocation>> {
        let mut args = Vec::with_capacity(operands.len());
        for &input in operands {
            if self.operand_ty(input).is_value() {
                args.extend(self.use_box(block, input, UsePolicy::Any, false)?);
            } else {
                args.push(self.use_or_constant(block, input)?);
            }
        }
        Ok(args)
    }
}
