//! Backward scan of basic blocks, following inbound control flows.
//!
//! The scan is driven by an explicit stack of frames instead of recursion:
//! exhausting a block pushes one pending frame per inbound flow (last flow
//! first), so predecessors are explored depth-first, in inbound flows
//! order. The visited blocks set is shared by all frames of a scan whereas
//! each frame owns its live sets. A matching instruction is handed out
//! before its lifetime reform, which only happens when the scan resumes.

use crate::lifetimes::LifetimeReformer;
use crate::memory::MemoryReferenceSet;
use crate::registers::RegisterReferenceSet;
use df_disasm::function::{BlockId, Function};
use df_disasm::instrs::Instruction;
use df_disasm::{Addr, Disassembler, Memory};
use std::collections::BTreeSet;

enum Frame<'a> {
    /// A block to enter, scanning backward from the instruction at `from`.
    Pending {
        block: BlockId,
        from: Addr,
        skip: bool,
        regs: RegisterReferenceSet,
        mems: MemoryReferenceSet,
    },
    /// A block being scanned: instructions before `cursor` are left. The
    /// live sets are reformed by `yielded` before the scan resumes.
    Scanning {
        block: BlockId,
        cursor: usize,
        yielded: Option<&'a Instruction>,
        regs: RegisterReferenceSet,
        mems: MemoryReferenceSet,
    },
}

pub struct BackwardScanner<'a, H> {
    function: &'a Function,
    reformer: LifetimeReformer<'a, H>,
    visited: BTreeSet<Addr>,
    scans: usize,
    stack: Vec<Frame<'a>>,
}

impl<'a, H: Disassembler + Memory> BackwardScanner<'a, H> {
    /// Prepares a scan of `block` from the instruction at `from`. When
    /// `skip` is set, this instruction itself is not considered.
    pub fn new(
        function: &'a Function,
        reformer: LifetimeReformer<'a, H>,
        block: BlockId,
        from: Addr,
        skip: bool,
        regs: RegisterReferenceSet,
        mems: MemoryReferenceSet,
    ) -> Self {
        Self {
            function,
            reformer,
            visited: BTreeSet::new(),
            scans: 0,
            stack: vec![Frame::Pending {
                block,
                from,
                skip,
                regs,
                mems,
            }],
        }
    }

    /// Start addresses of the blocks entered so far.
    #[must_use]
    pub const fn visited_blocks(&self) -> &BTreeSet<Addr> {
        &self.visited
    }

    /// Number of block scans started so far.
    #[must_use]
    pub const fn scans(&self) -> usize {
        self.scans
    }

    fn enter(
        &mut self,
        block: BlockId,
        from: Addr,
        skip: bool,
        regs: RegisterReferenceSet,
        mems: MemoryReferenceSet,
    ) {
        let bb = self.function.block(block);
        if !self.visited.insert(bb.start_addr()) {
            log::trace!("block {} already explored", bb.start_addr());
            return;
        }
        log::debug!("scan block {}: registers {regs}, memory {mems}", bb.start_addr());
        self.scans += 1;

        let cursor = match bb.position(from) {
            Some(pos) if skip => pos,
            Some(pos) => pos + 1,
            None => 0,
        };
        self.stack.push(Frame::Scanning {
            block,
            cursor,
            yielded: None,
            regs,
            mems,
        });
    }

    fn leave(&mut self, block: BlockId, regs: &RegisterReferenceSet, mems: &MemoryReferenceSet) {
        let flows = self.function.inbound_flows(block);
        for flow in &flows {
            log::debug!(
                "traverse to block {} (from {})",
                self.function.block(flow.linked_block).start_addr(),
                flow.source
            );
        }
        for flow in flows.into_iter().rev() {
            self.stack.push(Frame::Pending {
                block: flow.linked_block,
                from: flow.source,
                skip: false,
                regs: regs.clone(),
                mems: mems.clone(),
            });
        }
    }
}

impl<'a, H: Disassembler + Memory> Iterator for BackwardScanner<'a, H> {
    type Item = &'a Instruction;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::Pending {
                    block,
                    from,
                    skip,
                    regs,
                    mems,
                } => self.enter(block, from, skip, regs, mems),
                Frame::Scanning {
                    block,
                    mut cursor,
                    yielded,
                    mut regs,
                    mut mems,
                } => {
                    if let Some(instr) = yielded {
                        self.reformer.reform(instr, &mut regs, &mut mems);
                        log::debug!("reform at {}: registers {regs}, memory {mems}", instr.addr());
                    }
                    let function: &'a Function = self.function;
                    let bb = function.block(block);
                    while cursor > 0 {
                        cursor -= 1;
                        let Some(instr) = bb.get(cursor) else {
                            continue;
                        };
                        let mem_write = writes_live_memory(instr, &mems);
                        let reg_write = writes_live_register(instr, &regs);
                        log::trace!(
                            "looking at '{instr}': memory write {mem_write}, register write {reg_write}"
                        );

                        if mem_write || reg_write {
                            self.stack.push(Frame::Scanning {
                                block,
                                cursor,
                                yielded: Some(instr),
                                regs,
                                mems,
                            });
                            return Some(instr);
                        }
                        if instr.is_call() {
                            self.reformer.kill_clobbered(instr, &mut regs);
                        }
                    }
                    self.leave(block, &regs, &mems);
                }
            }
        }
        None
    }
}

/// Checks if an output memory operand overlaps a live memory reference.
fn writes_live_memory(instr: &Instruction, mems: &MemoryReferenceSet) -> bool {
    instr
        .operands()
        .filter(|op| op.is_output() && op.is_memory_reference())
        .any(|op| mems.overlaps(op))
}

/// Checks if an output register operand, or the return register of a call,
/// is a live register.
fn writes_live_register(instr: &Instruction, regs: &RegisterReferenceSet) -> bool {
    let explicit = instr
        .operands()
        .filter(|op| op.is_output() && op.is_register())
        .any(|op| regs.ids().any(|id| op.uses_register(id)));
    if explicit {
        return true;
    }
    if instr.is_call() {
        if let Some(ret) = instr.return_register() {
            log::trace!("check for return register '{ret}' in '{instr}'");
            return regs.has_reference(ret);
        }
    }
    false
}
