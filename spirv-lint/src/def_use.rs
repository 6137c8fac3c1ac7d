//! Module-wide def-use index.

use crate::arena::Handle;
use crate::module::{Instruction, Module};
use crate::FastHashMap;
use spirv::Word;

/// Definitions and uses of every result id in a module.
pub struct DefUseIndex {
    defs: FastHashMap<Word, Handle<Instruction>>,
    users: FastHashMap<Word, Vec<Handle<Instruction>>>,
}

impl DefUseIndex {
    /// Index every definition and input-operand use in the module.
    pub fn new(module: &Module) -> Self {
        let mut defs = FastHashMap::default();
        let mut users: FastHashMap<Word, Vec<Handle<Instruction>>> = FastHashMap::default();
        for (handle, inst) in module.instructions.iter() {
            if let Some(result) = inst.result {
                defs.insert(result, handle);
            }
            for used in inst.in_operand_ids() {
                users.entry(used).or_default().push(handle);
            }
        }
        DefUseIndex { defs, users }
    }

    /// The instruction defining `id`.
    pub fn def(&self, id: Word) -> Option<Handle<Instruction>> {
        self.defs.get(&id).copied()
    }

    /// Instructions using `id` as an input operand, in binary order.
    pub fn users(&self, id: Word) -> &[Handle<Instruction>] {
        match self.users.get(&id) {
            Some(list) => list,
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::parse_words;
    use spirv::Op;

    #[test]
    fn defs_and_users() {
        let instructions: &[(Op, Vec<u32>)] = &[
            (Op::TypeVoid, vec![2]),
            (Op::TypeFunction, vec![3, 2]),
            (Op::TypeInt, vec![5, 32, 0]),
            (Op::Constant, vec![5, 6, 1]),
            (Op::Function, vec![2, 1, 0, 3]),
            (Op::Label, vec![10]),
            (Op::IAdd, vec![5, 11, 6, 6]),
            (Op::IAdd, vec![5, 12, 11, 6]),
            (Op::Return, vec![]),
            (Op::FunctionEnd, vec![]),
        ];
        let mut words = vec![spirv::MAGIC_NUMBER, 0x0001_0500, 0, 13, 0];
        for &(op, ref operands) in instructions {
            words.push((((operands.len() + 1) as u32) << 16) | op as u32);
            words.extend_from_slice(operands);
        }
        let module = parse_words(&words).unwrap();
        let index = DefUseIndex::new(&module);
        let def_11 = index.def(11).unwrap();
        assert_eq!(module.instructions[def_11].result, Some(11));
        // %6 is used by both adds, %11 by the second only
        assert_eq!(index.users(6).len(), 2);
        assert_eq!(index.users(11).len(), 1);
        assert!(index.users(12).is_empty());
        assert!(index.def(99).is_none());
    }
}
