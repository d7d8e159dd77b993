//! Middle Intermediate Representation (MIR)
//!
//! MIR is the typed, graph-structured input of the lowering core. Every
//! definition lives in a flat arena owned by [`MirGraph`] and is referenced by
//! [`DefId`]; blocks list their definitions in execution order.
//!
//! The graph is produced by the builder passes upstream of lowering. The
//! lowering core reads it and mutates exactly two fields per definition: the
//! bound virtual register and the lowering state.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LowerError, Result};
use crate::lir::Vreg;

/// Index of a definition in its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefId(pub u32);

impl DefId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Index of a basic block in its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block{}", self.0)
    }
}

/// MIR value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirType {
    /// Instructions that produce no value (control flow, keep-alive)
    None,
    Int32,
    Boolean,
    Double,
    Pointer,
    /// Any runtime value, carried boxed
    Value,
}

impl MirType {
    pub fn is_value(&self) -> bool {
        matches!(self, MirType::Value)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, MirType::Double)
    }

    /// In LIR booleans and integers share one representation, so a definition
    /// of one may stand in for the other.
    pub fn is_interchangeable_with(&self, other: MirType) -> bool {
        if *self == other {
            return true;
        }
        matches!(
            (self, other),
            (MirType::Int32, MirType::Boolean) | (MirType::Boolean, MirType::Int32)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MirType::None => "none",
            MirType::Int32 => "int32",
            MirType::Boolean => "bool",
            MirType::Double => "double",
            MirType::Pointer => "ptr",
            MirType::Value => "value",
        }
    }
}

/// Literal carried by a constant definition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstValue {
    Undefined,
    Null,
    Boolean(bool),
    Int32(i32),
    Double(f64),
}

impl ConstValue {
    /// Natural MIR type of the literal
    pub fn ty(&self) -> MirType {
        match self {
            ConstValue::Undefined | ConstValue::Null => MirType::Value,
            ConstValue::Boolean(_) => MirType::Boolean,
            ConstValue::Int32(_) => MirType::Int32,
            ConstValue::Double(_) => MirType::Double,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Undefined => write!(f, "undefined"),
            ConstValue::Null => write!(f, "null"),
            ConstValue::Boolean(b) => write!(f, "{b}"),
            ConstValue::Int32(n) => write!(f, "{n}"),
            ConstValue::Double(d) => write!(f, "{d:?}"),
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
        }
    }
}

/// MIR operation. Arithmetic is typed by the definition's own type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirOp {
    Constant(ConstValue),
    /// Incoming argument by position
    Parameter(u32),
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    BitNot,
    Compare(CmpOp),
    /// Wrap a typed value into a dynamic Value
    Box,
    /// Extract a typed value from a dynamic Value
    Unbox,
    /// Int32 view of an Int32 or Boolean
    ToInt32,
    /// Bookkeeping marker that re-exposes its operand under a new identity
    Rename,
    /// Call into compiled code, returns a Value
    Call { callee: String },
    /// Call into a runtime support routine
    CallVm { routine: String },
    /// Keep operands alive (resume points, bailout state)
    KeepAlive,
    Goto(BlockId),
    Test { if_true: BlockId, if_false: BlockId },
    Return,
}

impl MirOp {
    /// Number of operands, or `None` for variadic operations
    pub fn arity(&self) -> Option<usize> {
        match self {
            MirOp::Constant(_) | MirOp::Parameter(_) | MirOp::Goto(_) => Some(0),
            MirOp::Add | MirOp::Sub | MirOp::Mul | MirOp::Div | MirOp::Compare(_) => Some(2),
            MirOp::Neg
            | MirOp::BitNot
            | MirOp::Box
            | MirOp::Unbox
            | MirOp::ToInt32
            | MirOp::Rename
            | MirOp::Test { .. }
            | MirOp::Return => Some(1),
            MirOp::Call { .. } | MirOp::CallVm { .. } | MirOp::KeepAlive => None,
        }
    }

    /// Side-effect free operations that may be materialized at their uses
    pub fn can_emit_at_uses(&self) -> bool {
        matches!(
            self,
            MirOp::Constant(_)
                | MirOp::Add
                | MirOp::Sub
                | MirOp::Mul
                | MirOp::Neg
                | MirOp::BitNot
                | MirOp::Compare(_)
                | MirOp::Box
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            MirOp::Constant(_) => "const",
            MirOp::Parameter(_) => "param",
            MirOp::Add => "add",
            MirOp::Sub => "sub",
            MirOp::Mul => "mul",
            MirOp::Div => "div",
            MirOp::Neg => "neg",
            MirOp::BitNot => "bitnot",
            MirOp::Compare(_) => "compare",
            MirOp::Box => "box",
            MirOp::Unbox => "unbox",
            MirOp::ToInt32 => "toint32",
            MirOp::Rename => "rename",
            MirOp::Call { .. } => "call",
            MirOp::CallVm { .. } => "callvm",
            MirOp::KeepAlive => "keepalive",
            MirOp::Goto(_) => "goto",
            MirOp::Test { .. } => "test",
            MirOp::Return => "return",
        }
    }
}

/// Progress of a definition through lowering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LowerState {
    #[default]
    Pending,
    InProgress,
    Lowered,
}

/// A MIR definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirDef {
    pub op: MirOp,
    pub ty: MirType,
    #[serde(default)]
    pub operands: Vec<DefId>,
    /// Defer materialization until the first use
    #[serde(default)]
    pub emit_at_uses: bool,
    #[serde(skip)]
    vreg: Option<Vreg>,
    #[serde(skip)]
    state: LowerState,
    /// Definition whose registers this one shares after `redefine`
    #[serde(skip)]
    alias_of: Option<DefId>,
}

impl MirDef {
    pub fn new(op: MirOp, ty: MirType, operands: Vec<DefId>) -> Self {
        Self {
            op,
            ty,
            operands,
            emit_at_uses: false,
            vreg: None,
            state: LowerState::Pending,
            alias_of: None,
        }
    }

    pub fn vreg(&self) -> Option<Vreg> {
        self.vreg
    }

    pub fn state(&self) -> LowerState {
        self.state
    }

    pub fn is_lowered(&self) -> bool {
        self.state == LowerState::Lowered
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.op, MirOp::Constant(_))
    }

    pub fn constant(&self) -> Option<ConstValue> {
        match self.op {
            MirOp::Constant(value) => Some(value),
            _ => None,
        }
    }

    pub fn can_emit_at_uses(&self) -> bool {
        self.emit_at_uses
    }

    pub(crate) fn set_vreg(&mut self, vreg: Vreg) {
        self.vreg = Some(vreg);
    }

    pub fn alias_of(&self) -> Option<DefId> {
        self.alias_of
    }

    pub(crate) fn set_alias(&mut self, source: DefId) {
        self.alias_of = Some(source);
    }

    pub(crate) fn set_state(&mut self, state: LowerState) {
        self.state = state;
    }
}

/// A basic block: definitions in execution order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirBlock {
    pub defs: Vec<DefId>,
}

/// A MIR graph for one function
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirGraph {
    pub defs: Vec<MirDef>,
    pub blocks: Vec<MirBlock>,
}

impl MirGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a graph from its JSON form and validate it
    pub fn from_json(source: &str) -> Result<Self> {
        let graph: MirGraph = serde_json::from_str(source)?;
        graph.validate()?;
        Ok(graph)
    }

    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(MirBlock::default());
        BlockId(self.blocks.len() as u32 - 1)
    }

    /// Append a definition to the end of `block`
    pub fn push(&mut self, block: BlockId, op: MirOp, ty: MirType, operands: Vec<DefId>) -> DefId {
        let id = DefId(self.defs.len() as u32);
        self.defs.push(MirDef::new(op, ty, operands));
        self.blocks[block.index()].defs.push(id);
        id
    }

    pub fn constant(&mut self, block: BlockId, value: ConstValue) -> DefId {
        self.push(block, MirOp::Constant(value), value.ty(), vec![])
    }

    /// Mark a definition as materialized at its uses
    pub fn defer(&mut self, id: DefId) {
        self.defs[id.index()].emit_at_uses = true;
    }

    pub fn def(&self, id: DefId) -> &MirDef {
        &self.defs[id.index()]
    }

    pub(crate) fn def_mut(&mut self, id: DefId) -> &mut MirDef {
        &mut self.defs[id.index()]
    }

    /// The definition that actually produced `id`'s registers, following
    /// redefinitions back to their source
    pub fn resolve_alias(&self, mut id: DefId) -> DefId {
        while let Some(source) = self.def(id).alias_of {
            id = source;
        }
        id
    }

    /// Forget every binding made by an abandoned lowering attempt
    pub fn reset_lowering(&mut self) {
        for def in &mut self.defs {
            def.vreg = None;
            def.state = LowerState::Pending;
            def.alias_of = None;
        }
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Structural checks that make every use bindable: operands exist, carry
    /// a value, and precede their users in block order.
    pub fn validate(&self) -> Result<()> {
        let mut position: HashMap<DefId, usize> = HashMap::new();
        let mut order = 0usize;
        for (b, block) in self.blocks.iter().enumerate() {
            for &id in &block.defs {
                if id.index() >= self.defs.len() {
                    return Err(LowerError::malformed(format!(
                        "block{b} lists unknown definition {id}"
                    )));
                }
                if position.insert(id, order).is_some() {
                    return Err(LowerError::malformed(format!(
                        "definition {id} appears in more than one block position"
                    )));
                }
                order += 1;
            }
        }

        for (index, def) in self.defs.iter().enumerate() {
            let id = DefId(index as u32);
            let Some(&at) = position.get(&id) else {
                return Err(LowerError::malformed(format!("definition {id} belongs to no block")));
            };

            if let Some(arity) = def.op.arity() {
                if def.operands.len() != arity {
                    return Err(LowerError::malformed(format!(
                        "{id} ({}) expects {arity} operand(s), got {}",
                        def.op.name(),
                        def.operands.len()
                    )));
                }
            }

            for &operand in &def.operands {
                let Some(&operand_at) = position.get(&operand) else {
                    return Err(LowerError::malformed(format!(
                        "{id} uses undefined producer {operand}"
                    )));
                };
                if operand_at >= at {
                    return Err(LowerError::malformed(format!(
                        "{id} uses {operand} before it is defined"
                    )));
                }
                if self.def(operand).ty == MirType::None {
                    return Err(LowerError::malformed(format!(
                        "{id} uses {operand}, which produces no value"
                    )));
                }
            }

            if def.emit_at_uses && !def.op.can_emit_at_uses() {
                return Err(LowerError::malformed(format!(
                    "{id} ({}) cannot be emitted at uses",
                    def.op.name()
                )));
            }

            match &def.op {
                MirOp::Constant(value) if !value.ty().is_interchangeable_with(def.ty) => {
                    return Err(LowerError::malformed(format!(
                        "{id} constant {value} is not of type {}",
                        def.ty.as_str()
                    )));
                }
                MirOp::Goto(target) => self.check_block(id, *target)?,
                MirOp::Test { if_true, if_false } => {
                    self.check_block(id, *if_true)?;
                    self.check_block(id, *if_false)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_block(&self, id: DefId, target: BlockId) -> Result<()> {
        if target.index() >= self.blocks.len() {
            return Err(LowerError::malformed(format!("{id} branches to unknown {target}")));
        }
        Ok(())
    }
}

/// Format a MIR graph as human-readable text
pub fn format_mir(graph: &MirGraph) -> String {
    let mut out = String::new();
    for (b, block) in graph.blocks.iter().enumerate() {
        out.push_str(&format!("block{b}:\n"));
        for &id in &block.defs {
            out.push_str("  ");
            out.push_str(&format_mir_def(id, graph.def(id)));
            out.push('\n');
        }
    }
    out
}

fn format_mir_def(id: DefId, def: &MirDef) -> String {
    let mut out = if def.ty == MirType::None {
        String::new()
    } else {
        format!("{id}: {} = ", def.ty.as_str())
    };

    match &def.op {
        MirOp::Constant(value) => out.push_str(&format!("const {value}")),
        MirOp::Parameter(index) => out.push_str(&format!("param {index}")),
        MirOp::Compare(op) => out.push_str(&format!("compare.{}", op.as_str())),
        MirOp::Call { callee } => out.push_str(&format!("call {callee}")),
        MirOp::CallVm { routine } => out.push_str(&format!("callvm {routine}")),
        MirOp::Goto(target) => out.push_str(&format!("goto {target}")),
        MirOp::Test { if_true, if_false } => {
            out.push_str(&format!("test {if_true}, {if_false}"))
        }
        op => out.push_str(op.name()),
    }

    if !def.operands.is_empty() {
        let operands: Vec<String> = def.operands.iter().map(|o| o.to_string()).collect();
        out.push_str(&format!(" ({})", operands.join(", ")));
    }
    if def.emit_at_uses {
        out.push_str(" [at-uses]");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_add_graph() -> MirGraph {
        let mut graph = MirGraph::new();
        let entry = graph.add_block();
        let a = graph.push(entry, MirOp::Parameter(0), MirType::Int32, vec![]);
        let b = graph.constant(entry, ConstValue::Int32(3));
        graph.defer(b);
        let sum = graph.push(entry, MirOp::Add, MirType::Int32, vec![a, b]);
        let boxed = graph.push(entry, MirOp::Box, MirType::Value, vec![sum]);
        graph.push(entry, MirOp::Return, MirType::None, vec![boxed]);
        graph
    }

    #[test]
    fn test_interchangeable_types() {
        assert!(MirType::Int32.is_interchangeable_with(MirType::Boolean));
        assert!(MirType::Boolean.is_interchangeable_with(MirType::Int32));
        assert!(MirType::Double.is_interchangeable_with(MirType::Double));
        assert!(!MirType::Int32.is_interchangeable_with(MirType::Double));
        assert!(!MirType::Value.is_interchangeable_with(MirType::Pointer));
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        assert!(make_add_graph().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_forward_use() {
        let mut graph = MirGraph::new();
        let entry = graph.add_block();
        graph.push(entry, MirOp::Neg, MirType::Int32, vec![DefId(1)]);
        graph.constant(entry, ConstValue::Int32(1));
        let err = graph.validate().unwrap_err();
        assert!(matches!(err, LowerError::MalformedGraph { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_arity_and_deferral() {
        let mut graph = MirGraph::new();
        let entry = graph.add_block();
        let a = graph.constant(entry, ConstValue::Int32(1));
        graph.push(entry, MirOp::Add, MirType::Int32, vec![a]);
        assert!(graph.validate().is_err());

        let mut graph = MirGraph::new();
        let entry = graph.add_block();
        let p = graph.push(entry, MirOp::Parameter(0), MirType::Value, vec![]);
        graph.defer(p);
        assert!(graph.validate().is_err());
    }

    #[test]
    fn test_from_json() {
        let source = r#"{
            "defs": [
                { "op": { "constant": { "int32": 7 } }, "ty": "int32", "emit_at_uses": true },
                { "op": "box", "ty": "value", "operands": [0] },
                { "op": "return", "ty": "none", "operands": [1] }
            ],
            "blocks": [ { "defs": [0, 1, 2] } ]
        }"#;
        let graph = MirGraph::from_json(source).unwrap();
        assert_eq!(graph.len(), 3);
        assert!(graph.def(DefId(0)).is_constant());
        assert!(graph.def(DefId(0)).can_emit_at_uses());
        assert_eq!(graph.def(DefId(0)).vreg(), None);
    }

    #[test]
    fn test_format_mir() {
        let text = format_mir(&make_add_graph());
        insta::assert_snapshot!(text, @r"
        block0:
          %0: int32 = param 0
          %1: int32 = const 3 [at-uses]
          %2: int32 = add (%0, %1)
          %3: value = box (%2)
          return (%3)
        ");
    }
}
