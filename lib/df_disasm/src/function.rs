//! Function disassembly: basic blocks linked into a control flow graph.

use crate::errors::{DisasmError, DisasmResult};
use crate::instrs::{FlowKind, Instruction};
use crate::Addr;
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Write;

pub type BlockId = NodeIndex;

#[derive(Debug, Clone)]
pub struct BasicBlock {
    instrs: Vec<Instruction>,
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for instr in &self.instrs {
            writeln!(f, "{:>8}: {instr}", instr.addr())?;
        }
        Ok(())
    }
}

impl BasicBlock {
    fn new(instrs: Vec<Instruction>) -> DisasmResult<Self> {
        if instrs.is_empty() {
            return Err(DisasmError::Internal("empty basic block".to_string()));
        }
        Ok(Self { instrs })
    }

    #[inline]
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.instrs.iter()
    }

    #[inline]
    pub fn rev_instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.instrs.iter().rev()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instrs.get(index)
    }

    #[must_use]
    pub fn start_addr(&self) -> Addr {
        self.instrs[0].addr()
    }

    /// Returns the address following the last instruction of the block.
    #[must_use]
    pub fn end_addr(&self) -> Addr {
        self.instrs[self.instrs.len() - 1].next_addr()
    }

    #[must_use]
    pub fn contains(&self, addr: Addr) -> bool {
        addr >= self.start_addr() && addr < self.end_addr()
    }

    /// Returns the position of the instruction starting at `addr`.
    #[must_use]
    pub fn position(&self, addr: Addr) -> Option<usize> {
        self.instrs.iter().position(|instr| instr.addr() == addr)
    }

    /// Returns the instruction starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an [`DisasmError::InstructionNotFound`] error if no
    /// instruction of the block starts at this address.
    pub fn instruction_at(&self, addr: Addr) -> DisasmResult<&Instruction> {
        self.position(addr)
            .map(|i| &self.instrs[i])
            .ok_or(DisasmError::InstructionNotFound(addr))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    IfTrue,
    IfFalse,
    Jmp,
    Sequence,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::IfTrue => write!(f, "<true>"),
            Self::IfFalse => write!(f, "<false>"),
            Self::Jmp => write!(f, "<jmp>"),
            Self::Sequence => write!(f, "<seq>"),
        }
    }
}

/// A control flow edge, labelled with the instruction that transfers
/// control.
#[derive(Debug, Clone, Copy)]
pub struct Flow {
    pub branch: Branch,
    pub source: Addr,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.branch)
    }
}

/// An edge entering a block, seen from the entered block.
#[derive(Debug, Clone, Copy)]
pub struct InboundFlow {
    /// The predecessor block.
    pub linked_block: BlockId,
    /// Address of the predecessor instruction transferring control.
    pub source: Addr,
    pub branch: Branch,
}

#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    inner: DiGraph<BasicBlock, Flow>,
    node_ids: BTreeMap<Addr, NodeIndex>,
}

impl Function {
    /// Creates a function without any block. Blocks and flows are then added
    /// with [`Function::add_block`] and [`Function::add_flow`].
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: DiGraph::new(),
            node_ids: BTreeMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a basic block made of the given instructions.
    ///
    /// # Errors
    ///
    /// The block must not be empty and must not start where another block
    /// starts.
    pub fn add_block(&mut self, instrs: Vec<Instruction>) -> DisasmResult<BlockId> {
        let block = BasicBlock::new(instrs)?;
        let start = block.start_addr();
        if self.node_ids.contains_key(&start) {
            return Err(DisasmError::DuplicatedInstruction(start));
        }
        let id = self.inner.add_node(block);
        self.node_ids.insert(start, id);
        Ok(id)
    }

    /// Adds a control flow edge from the instruction at `source` in block
    /// `from` to the start of block `to`.
    ///
    /// # Errors
    ///
    /// The source instruction must belong to the `from` block.
    pub fn add_flow(
        &mut self,
        from: BlockId,
        source: Addr,
        to: BlockId,
        branch: Branch,
    ) -> DisasmResult<()> {
        let pred = self
            .inner
            .node_weight(from)
            .ok_or_else(|| DisasmError::Internal(format!("unknown block {}", from.index())))?;
        if pred.position(source).is_none() {
            return Err(DisasmError::InstructionNotFound(source));
        }
        if self.inner.node_weight(to).is_none() {
            return Err(DisasmError::Internal(format!("unknown block {}", to.index())));
        }
        self.inner.add_edge(from, to, Flow { branch, source });
        Ok(())
    }

    /// Builds the control flow graph of a linear list of instructions.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is empty or if two instructions share
    /// the same address.
    pub fn build(name: &str, mut instrs: Vec<Instruction>) -> DisasmResult<Self> {
        instrs.sort_by_key(Instruction::addr);
        for pair in instrs.windows(2) {
            if pair[0].addr() == pair[1].addr() {
                return Err(DisasmError::DuplicatedInstruction(pair[0].addr()));
            }
        }
        if instrs.is_empty() {
            return Err(DisasmError::UnknownFunction(name.to_string()));
        }

        let mut function = Self::new(name);
        let leaders = compute_block_leaders(&instrs);
        for block in split_into_blocks(instrs, &leaders) {
            function.add_block(block)?;
        }

        let breakers: Vec<(BlockId, Instruction)> = function
            .inner
            .node_indices()
            .map(|id| {
                let block = &function.inner[id];
                (id, block.instrs[block.instrs.len() - 1].clone())
            })
            .collect();
        for (src_id, instr) in breakers {
            for (branch, dst) in instruction_branching(&instr) {
                if let Some(dst_id) = function.node_ids.get(&dst).copied() {
                    function.add_flow(src_id, instr.addr(), dst_id, branch)?;
                } else {
                    log::debug!("{name}: flow from {} leaves the function", instr.addr());
                }
            }
        }

        Ok(function)
    }

    /// Returns the block holding the function first instruction.
    #[must_use]
    pub fn entry(&self) -> Option<BlockId> {
        self.node_ids.values().next().copied()
    }

    #[must_use]
    pub fn start_addr(&self) -> Option<Addr> {
        self.node_ids.keys().next().copied()
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.inner[id]
    }

    /// Iterates over blocks identifiers, by increasing start address.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.node_ids.values().copied()
    }

    /// Iterates over blocks, by increasing start address.
    pub fn iter_ordered_blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.node_ids.values().map(move |id| &self.inner[*id])
    }

    #[must_use]
    pub fn nb_blocks(&self) -> usize {
        self.inner.node_count()
    }

    /// Returns the edges entering a block, in the order they were added.
    #[must_use]
    pub fn inbound_flows(&self, id: BlockId) -> Vec<InboundFlow> {
        let mut edges: Vec<_> = self.inner.edges_directed(id, Direction::Incoming).collect();
        edges.sort_by_key(|edge| edge.id());
        edges
            .into_iter()
            .map(|edge| InboundFlow {
                linked_block: edge.source(),
                source: edge.weight().source,
                branch: edge.weight().branch,
            })
            .collect()
    }

    /// Iterates over all function instructions, by increasing address.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.iter_ordered_blocks().flat_map(BasicBlock::instructions)
    }

    /// Renders the control flow graph in Graphviz dot format.
    ///
    /// # Errors
    ///
    /// Returns a formatting error if the graph cannot be rendered.
    pub fn to_dot(&self) -> DisasmResult<String> {
        let mut res = String::new();
        res.push_str("digraph {\n");
        res.push_str("  splines=ortho;\n");
        res.push_str("  nodesep=2;\n");
        write!(
            res,
            "{}",
            Dot::with_attr_getters(
                &self.inner,
                &[Config::GraphContentOnly, Config::EdgeNoLabel],
                &|_, edge| {
                    let color = match edge.weight().branch {
                        Branch::IfTrue => "green",
                        Branch::IfFalse => "red",
                        Branch::Jmp => "blue",
                        Branch::Sequence => "black",
                    };
                    format!("color={},xlabel=\"{}\"", color, edge.weight())
                },
                &|_, _| String::from("shape=box,color=black")
            )
        )?;
        res.push('}');
        Ok(res)
    }
}

// Block leaders are block first instructions addresses:
//   - the function first instruction,
//   - target address of a branching instruction,
//   - address following a branching or returning instruction.
fn compute_block_leaders(instrs: &[Instruction]) -> BTreeSet<Addr> {
    let mut leaders = BTreeSet::new();
    if let Some(first) = instrs.first() {
        leaders.insert(first.addr());
    }
    for instr in instrs {
        if instr.flow().is_branching() {
            leaders.insert(instr.next_addr());
            if let Some(target) = instr.branch_target() {
                leaders.insert(target);
            }
        }
    }
    leaders
}

fn split_into_blocks(instrs: Vec<Instruction>, leaders: &BTreeSet<Addr>) -> Vec<Vec<Instruction>> {
    let mut current = Vec::new();
    let mut blocks = Vec::new();

    for instr in instrs {
        if leaders.contains(&instr.addr()) && !current.is_empty() {
            blocks.push(current);
            current = Vec::new();
        }
        current.push(instr);
    }

    // final block cannot be empty (the instructions list is not)
    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}

fn instruction_branching(instr: &Instruction) -> Vec<(Branch, Addr)> {
    match instr.flow() {
        FlowKind::Jump => instr
            .branch_target()
            .map(|target| vec![(Branch::Jmp, target)])
            .unwrap_or_default(),
        FlowKind::CondJump => {
            let mut v = Vec::with_capacity(2);
            if let Some(target) = instr.branch_target() {
                v.push((Branch::IfTrue, target));
            }
            v.push((Branch::IfFalse, instr.next_addr()));
            v
        }
        FlowKind::Return => vec![],
        FlowKind::Sequence | FlowKind::Call => vec![(Branch::Sequence, instr.next_addr())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operands::Operand;

    fn instr(addr: u64, mnemonic: &str, target: Option<u64>) -> Instruction {
        let operands = target.map(Operand::immediate).into_iter().collect();
        Instruction::new(Addr(addr), 4, mnemonic, operands)
    }

    #[test]
    fn build_diamond() {
        let function = Function::build(
            "diamond",
            vec![
                instr(0x0, "cmp", None),
                instr(0x4, "je", Some(0x10)),
                instr(0x8, "nop", None),
                instr(0xc, "jmp", Some(0x14)),
                instr(0x10, "nop", None),
                instr(0x14, "ret", None),
            ],
        )
        .unwrap();

        let starts: Vec<Addr> = function.iter_ordered_blocks().map(BasicBlock::start_addr).collect();
        assert_eq!(starts, vec![Addr(0x0), Addr(0x8), Addr(0x10), Addr(0x14)]);

        let exit = function.block_ids().last().unwrap();
        let preds: Vec<Addr> = function
            .inbound_flows(exit)
            .iter()
            .map(|flow| flow.source)
            .collect();
        assert_eq!(preds, vec![Addr(0xc), Addr(0x10)]);
        assert!(function.inbound_flows(function.entry().unwrap()).is_empty());
    }

    #[test]
    fn build_loop() {
        let function = Function::build(
            "loop",
            vec![
                instr(0x0, "mov", None),
                instr(0x4, "add", None),
                instr(0x8, "jne", Some(0x4)),
                instr(0xc, "ret", None),
            ],
        )
        .unwrap();
        assert_eq!(function.nb_blocks(), 3);
        let body = function.block_ids().nth(1).unwrap();
        let flows = function.inbound_flows(body);
        assert_eq!(flows.len(), 2);
        assert_eq!(flows[0].branch, Branch::Sequence);
        assert_eq!(flows[1].branch, Branch::IfTrue);
        assert_eq!(flows[1].linked_block, body);
    }

    #[test]
    fn explicit_mid_block_flow() {
        let mut function = Function::new("explicit");
        let a = function
            .add_block(vec![instr(0x0, "nop", None), instr(0x4, "nop", None)])
            .unwrap();
        let b = function.add_block(vec![instr(0x20, "nop", None)]).unwrap();
        function.add_flow(a, Addr(0x0), b, Branch::Jmp).unwrap();
        assert!(function.add_flow(a, Addr(0x20), b, Branch::Jmp).is_err());
        assert_eq!(function.inbound_flows(b)[0].source, Addr(0x0));
        assert!(function.block(a).contains(Addr(0x6)));
        assert!(!function.block(a).contains(Addr(0x8)));
    }

    #[test]
    fn dot_output() {
        let function = Function::build(
            "f",
            vec![instr(0x0, "jmp", Some(0x8)), instr(0x8, "ret", None)],
        )
        .unwrap();
        let dot = function.to_dot().unwrap();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("color=blue"));
    }

    #[test]
    fn duplicated_addresses() {
        assert!(matches!(
            Function::build("dup", vec![instr(0x0, "nop", None), instr(0x0, "nop", None)]),
            Err(DisasmError::DuplicatedInstruction(_))
        ));
    }
}
