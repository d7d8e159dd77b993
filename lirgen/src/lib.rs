//! LIR Generation Library
//!
//! Lowers typed MIR graphs into register-level LIR for a JIT backend.

pub mod boxing;
pub mod config;
pub mod error;
pub mod lir;
pub mod lower;
pub mod mir;

pub use boxing::{BoxLayout, BoxingKind};
pub use config::{CallingConvention, Target, TargetConfig};
pub use error::{LowerError, Result, Violation};
pub use lir::{LirGraph, format_lir};
pub use lower::{BlockBuilder, Lowerer, lower_graph};
pub use mir::{MirGraph, format_mir};
