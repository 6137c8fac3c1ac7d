//! Per-function control-flow graph view.

use crate::module::{Function, Instruction, Module, Operand};
use crate::{FastHashMap, FastHashSet};
use spirv::{Op, Word};

/// Decoded terminator of a basic block.
#[derive(Clone, Debug)]
pub enum Terminator {
    Branch {
        target: Word,
    },
    BranchConditional {
        condition: Word,
        true_label: Word,
        false_label: Word,
    },
    Switch {
        selector: Word,
        default: Word,
        cases: Vec<(u64, Word)>,
    },
    /// Return, kill, unreachable: no successors.
    Exit,
}

#[derive(Debug, thiserror::Error)]
pub enum CfgError {
    #[error("function %{0} has no blocks")]
    EmptyFunction(Word),
    #[error("block %{0} has no instructions")]
    EmptyBlock(Word),
    #[error("block %{0} does not end in a terminator")]
    InvalidTerminator(Word),
    #[error("malformed {1:?} in block %{0}")]
    MalformedTerminator(Word, Op),
}

/// Predecessors, successors, and decoded terminators of one function's
/// blocks. The underlying module is not referenced once built.
pub struct Cfg {
    entry: Word,
    /// Block layout order.
    blocks: Vec<Word>,
    preds: FastHashMap<Word, Vec<Word>>,
    succs: FastHashMap<Word, Vec<Word>>,
    terminators: FastHashMap<Word, Terminator>,
}

impl Cfg {
    pub fn new(module: &Module, function: &Function) -> Result<Self, CfgError> {
        let entry = function
            .entry()
            .map(|block| block.id)
            .ok_or(CfgError::EmptyFunction(function.id))?;
        let mut blocks = Vec::with_capacity(function.blocks.len());
        let mut preds: FastHashMap<Word, Vec<Word>> = FastHashMap::default();
        let mut succs = FastHashMap::default();
        let mut terminators = FastHashMap::default();
        for block in &function.blocks {
            let handle = block.terminator().ok_or(CfgError::EmptyBlock(block.id))?;
            let terminator = decode_terminator(block.id, &module.instructions[handle])?;
            // Deduplicate successors: a switch naming one label under
            // several case values contributes a single CFG edge.
            let mut unique = Vec::new();
            terminator.for_each_target(|target| {
                if !unique.contains(&target) {
                    unique.push(target);
                }
            });
            blocks.push(block.id);
            preds.entry(block.id).or_default();
            succs.insert(block.id, unique);
            terminators.insert(block.id, terminator);
        }
        for &block in &blocks {
            for &succ in &succs[&block] {
                preds.entry(succ).or_default().push(block);
            }
        }
        Ok(Cfg {
            entry,
            blocks,
            preds,
            succs,
            terminators,
        })
    }

    pub fn entry(&self) -> Word {
        self.entry
    }

    /// Block ids in layout order.
    pub fn block_ids(&self) -> &[Word] {
        &self.blocks
    }

    pub fn preds(&self, block: Word) -> &[Word] {
        match self.preds.get(&block) {
            Some(list) => list,
            None => &[],
        }
    }

    pub fn succs(&self, block: Word) -> &[Word] {
        match self.succs.get(&block) {
            Some(list) => list,
            None => &[],
        }
    }

    pub fn terminator(&self, block: Word) -> Option<&Terminator> {
        self.terminators.get(&block)
    }

    /// Blocks whose terminator leaves the function, in layout order.
    pub fn exit_blocks(&self) -> impl Iterator<Item = Word> + '_ {
        self.blocks
            .iter()
            .copied()
            .filter(|block| matches!(self.terminators[block], Terminator::Exit))
    }

    /// Reverse post-order over the blocks reachable from the entry.
    pub fn reverse_post_order(&self) -> Vec<Word> {
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut visited = FastHashSet::default();
        let mut stack = vec![(self.entry, 0usize)];
        visited.insert(self.entry);
        while let Some(&mut (block, ref mut next)) = stack.last_mut() {
            let succs = self.succs(block);
            if *next < succs.len() {
                let succ = succs[*next];
                *next += 1;
                if visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                order.push(block);
                stack.pop();
            }
        }
        order.reverse();
        order
    }
}

impl Terminator {
    fn for_each_target(&self, mut f: impl FnMut(Word)) {
        match *self {
            Terminator::Branch { target } => f(target),
            Terminator::BranchConditional {
                true_label,
                false_label,
                ..
            } => {
                f(true_label);
                f(false_label);
            }
            Terminator::Switch {
                default, ref cases, ..
            } => {
                f(default);
                for &(_, label) in cases {
                    f(label);
                }
            }
            Terminator::Exit => {}
        }
    }
}

fn decode_terminator(block: Word, inst: &Instruction) -> Result<Terminator, CfgError> {
    let id_at = |index: usize| {
        inst.operands
            .get(index)
            .and_then(Operand::id)
            .ok_or(CfgError::MalformedTerminator(block, inst.op))
    };
    Ok(match inst.op {
        Op::Branch => Terminator::Branch { target: id_at(0)? },
        Op::BranchConditional => Terminator::BranchConditional {
            condition: id_at(0)?,
            true_label: id_at(1)?,
            false_label: id_at(2)?,
        },
        Op::Switch => {
            let selector = id_at(0)?;
            let default = id_at(1)?;
            let mut cases = Vec::new();
            let mut value = 0u64;
            let mut shift = 0u32;
            for operand in inst.operands.iter().skip(2) {
                match *operand {
                    Operand::Literal(word) => {
                        if shift < 64 {
                            value |= u64::from(word) << shift;
                        }
                        shift += 32;
                    }
                    Operand::Id(label) => {
                        cases.push((value, label));
                        value = 0;
                        shift = 0;
                    }
                    _ => return Err(CfgError::MalformedTerminator(block, Op::Switch)),
                }
            }
            Terminator::Switch {
                selector,
                default,
                cases,
            }
        }
        Op::Return | Op::ReturnValue | Op::Kill | Op::Unreachable | Op::TerminateInvocation => {
            Terminator::Exit
        }
        _ => return Err(CfgError::InvalidTerminator(block)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::parse_words;

    fn diamond() -> Module {
        // 10 -> {11, 12} -> 13
        let instructions: &[(Op, Vec<u32>)] = &[
            (Op::TypeVoid, vec![2]),
            (Op::TypeFunction, vec![3, 2]),
            (Op::TypeBool, vec![4]),
            (Op::ConstantTrue, vec![4, 5]),
            (Op::Function, vec![2, 1, 0, 3]),
            (Op::Label, vec![10]),
            (Op::BranchConditional, vec![5, 11, 12]),
            (Op::Label, vec![11]),
            (Op::Branch, vec![13]),
            (Op::Label, vec![12]),
            (Op::Branch, vec![13]),
            (Op::Label, vec![13]),
            (Op::Return, vec![]),
            (Op::FunctionEnd, vec![]),
        ];
        let mut words = vec![spirv::MAGIC_NUMBER, 0x0001_0500, 0, 14, 0];
        for &(op, ref operands) in instructions {
            words.push((((operands.len() + 1) as u32) << 16) | op as u32);
            words.extend_from_slice(operands);
        }
        parse_words(&words).unwrap()
    }

    #[test]
    fn edges_and_rpo() {
        let module = diamond();
        let cfg = Cfg::new(&module, &module.functions[0]).unwrap();
        assert_eq!(cfg.entry(), 10);
        assert_eq!(cfg.succs(10), &[11, 12]);
        assert_eq!(cfg.preds(13), &[11, 12]);
        assert_eq!(cfg.preds(10), &[] as &[Word]);
        assert!(matches!(cfg.terminator(13), Some(&Terminator::Exit)));
        let rpo = cfg.reverse_post_order();
        assert_eq!(rpo.first(), Some(&10));
        assert_eq!(rpo.last(), Some(&13));
        assert_eq!(rpo.len(), 4);
    }
}
