//! MIR to LIR lowering
//!
//! [`Lowerer`] owns the per-compilation state: the virtual register space,
//! the boxing layout and the calling convention. The block being filled is not
//! part of that state; it is a [`BlockBuilder`] passed explicitly to every
//! define and use call, so deferred definitions materialize into whichever
//! block first consumes them.
//!
//! - `define`: the definition binder (outputs, policies, aliasing)
//! - `uses`: the use builder (inputs, immediates, boxed pieces)
//! - `select`: per-operation instruction selection

mod define;
mod select;
mod uses;

use crate::boxing::BoxLayout;
use crate::config::{CallingConvention, TargetConfig};
use crate::error::{LowerError, Result, Violation};
use crate::lir::{LBlock, LInstruction, LirGraph, VirtualRegisterSpace};
use crate::mir::{BlockId, DefId, LowerState, MirGraph};

/// Instructions being appended to one LIR block
#[derive(Debug)]
pub struct BlockBuilder {
    id: BlockId,
    instructions: Vec<LInstruction>,
}

impl BlockBuilder {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            instructions: Vec::new(),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn instructions(&self) -> &[LInstruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    fn push(&mut self, ins: LInstruction) {
        self.instructions.push(ins);
    }

    pub fn finish(self) -> LBlock {
        LBlock {
            id: self.id,
            instructions: self.instructions,
        }
    }
}

/// Lowering state for one function compilation
pub struct Lowerer<'a> {
    graph: &'a mut MirGraph,
    vregs: VirtualRegisterSpace,
    layout: &'static dyn BoxLayout,
    convention: &'a CallingConvention,
}

impl<'a> Lowerer<'a> {
    pub fn new(graph: &'a mut MirGraph, config: &'a TargetConfig) -> Self {
        Self {
            graph,
            vregs: VirtualRegisterSpace::new(config.max_virtual_registers),
            layout: config.boxing.layout(),
            convention: &config.convention,
        }
    }

    pub fn graph(&self) -> &MirGraph {
        &*self.graph
    }

    pub fn layout(&self) -> &'static dyn BoxLayout {
        self.layout
    }

    pub fn vregs(&self) -> &VirtualRegisterSpace {
        &self.vregs
    }

    /// Lower every eager definition of `block`, in order. Deferred
    /// definitions are skipped here and materialize at their first use.
    pub fn lower_block(&mut self, block: BlockId) -> Result<LBlock> {
        let mut builder = BlockBuilder::new(block);
        let defs = self.graph.blocks[block.index()].defs.clone();
        for id in defs {
            let def = self.graph.def(id);
            if def.can_emit_at_uses() || def.is_lowered() {
                continue;
            }
            self.lower_definition(&mut builder, id)?;
        }
        Ok(builder.finish())
    }

    /// The single entry point that moves a definition through its lowering
    /// states. Reaching a definition that is already in progress means the
    /// graph has a cycle through deferred definitions.
    pub fn lower_definition(&mut self, block: &mut BlockBuilder, id: DefId) -> Result<()> {
        match self.graph.def(id).state() {
            LowerState::Lowered => return Ok(()),
            LowerState::InProgress => {
                return Err(LowerError::internal(
                    Violation::ReentrantLowering,
                    format!("{id} is already being lowered"),
                ));
            }
            LowerState::Pending => {}
        }
        self.graph.def_mut(id).set_state(LowerState::InProgress);
        self.visit(block, id)?;
        self.graph.def_mut(id).set_state(LowerState::Lowered);
        Ok(())
    }
}

/// Lower a whole function.
///
/// On failure the partially built LIR is dropped and the graph's bindings are
/// cleared, so a later attempt starts from a clean graph.
pub fn lower_graph(graph: &mut MirGraph, config: &TargetConfig) -> Result<LirGraph> {
    let block_ids: Vec<BlockId> = (0..graph.blocks.len() as u32).map(BlockId).collect();
    let result = {
        let mut lowerer = Lowerer::new(graph, config);
        let mut blocks = Vec::with_capacity(block_ids.len());
        let mut failure = None;
        for id in block_ids {
            match lowerer.lower_block(id) {
                Ok(block) => blocks.push(block),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(LirGraph {
                blocks,
                num_virtual_registers: lowerer.vregs.allocated(),
            }),
        }
    };

    match result {
        Ok(lir) => {
            tracing::debug!(
                blocks = lir.blocks.len(),
                vregs = lir.num_virtual_registers,
                boxing = config.boxing.as_str(),
                "lowered function"
            );
            Ok(lir)
        }
        Err(e) => {
            tracing::warn!(error = %e, "lowering aborted, discarding partial LIR");
            graph.reset_lowering();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{ConstValue, MirOp, MirType};

    #[test]
    fn test_block_builder_finish() {
        let builder = BlockBuilder::new(BlockId(2));
        assert!(builder.is_empty());
        let block = builder.finish();
        assert_eq!(block.id, BlockId(2));
        assert!(block.instructions.is_empty());
    }

    #[test]
    fn test_deferred_definitions_skipped_by_driver() {
        let config = TargetConfig::x64().unwrap();
        let mut graph = MirGraph::new();
        let entry = graph.add_block();
        let c = graph.constant(entry, ConstValue::Int32(4));
        graph.defer(c);

        let lir = lower_graph(&mut graph, &config).unwrap();
        assert!(lir.blocks[0].instructions.is_empty());
        assert_eq!(graph.def(c).state(), LowerState::Pending);
        assert_eq!(graph.def(c).vreg(), None);
    }

    #[test]
    fn test_lower_definition_is_idempotent() {
        let config = TargetConfig::x64().unwrap();
        let mut graph = MirGraph::new();
        let entry = graph.add_block();
        let p = graph.push(entry, MirOp::Parameter(0), MirType::Int32, vec![]);

        let mut lowerer = Lowerer::new(&mut graph, &config);
        let mut block = BlockBuilder::new(entry);
        lowerer.lower_definition(&mut block, p).unwrap();
        lowerer.lower_definition(&mut block, p).unwrap();
        assert_eq!(block.len(), 1);
        assert_eq!(lowerer.vregs().allocated(), 1);
    }

    #[test]
    fn test_reentry_is_violation() {
        let config = TargetConfig::x64().unwrap();
        let mut graph = MirGraph::new();
        let entry = graph.add_block();
        let p = graph.push(entry, MirOp::Parameter(0), MirType::Int32, vec![]);
        graph.def_mut(p).set_state(LowerState::InProgress);

        let mut lowerer = Lowerer::new(&mut graph, &config);
        let mut block = BlockBuilder::new(entry);
        let err = lowerer.lower_definition(&mut block, p).unwrap_err();
        assert_eq!(err.violation(), Some(Violation::ReentrantLowering));
    }
}
