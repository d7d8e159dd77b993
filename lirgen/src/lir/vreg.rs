//! Virtual register space
//!
//! One space per compilation unit. Identities are handed out in strictly
//! increasing order and never returned; the whole space is dropped with the
//! compilation.

use std::fmt;

use serde::Serialize;

use crate::error::{LowerError, Result};

/// Default ceiling on virtual registers per compilation
pub const MAX_VIRTUAL_REGISTERS: u32 = (1 << 21) - 1;

/// A virtual register identity. Zero is never allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Vreg(u32);

impl Vreg {
    /// Placeholder carried by a slot before the binder assigns it
    pub const UNASSIGNED: Vreg = Vreg(0);

    pub fn new(id: u32) -> Self {
        Vreg(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }

    /// The identity `offset` places after this one
    pub fn offset(self, offset: u32) -> Vreg {
        Vreg(self.0 + offset)
    }
}

impl fmt::Display for Vreg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug)]
pub struct VirtualRegisterSpace {
    /// Last identity handed out
    last: u32,
    limit: u32,
}

impl VirtualRegisterSpace {
    pub fn new(limit: u32) -> Self {
        Self { last: 0, limit }
    }

    pub fn allocate(&mut self) -> Result<Vreg> {
        self.allocate_run(1)
    }

    /// First of `count` contiguous identities. Either all of them are
    /// reserved or none are.
    pub fn allocate_run(&mut self, count: u32) -> Result<Vreg> {
        let first = self.last + 1;
        let last = match self.last.checked_add(count) {
            Some(last) if count > 0 && last < self.limit => last,
            _ => {
                tracing::warn!(limit = self.limit, "virtual register space exhausted");
                return Err(LowerError::VregExhausted { limit: self.limit });
            }
        };
        self.last = last;
        tracing::trace!(first, count, "allocated virtual registers");
        Ok(Vreg(first))
    }

    /// Number of identities handed out so far
    pub fn allocated(&self) -> u32 {
        self.last
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

impl Default for VirtualRegisterSpace {
    fn default() -> Self {
        Self::new(MAX_VIRTUAL_REGISTERS)
    }
}
