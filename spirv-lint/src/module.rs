//! IR containers for a decoded module.
//!
//! Instructions live in one flat [`Arena`] in binary order; functions
//! and blocks reference them by handle. Every id the analyses track is
//! the IR-level result id (a [`Word`]), never an arena index.

use crate::arena::{Arena, Handle};
use crate::{opcode, FastHashMap};
use spirv::{Decoration, Op, StorageClass, Word};
use std::fmt;

/// A single decoded input operand.
///
/// Only the distinctions the analyses observe are modeled: which words
/// are ids, and the enum operands the lint inspects directly.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Id(Word),
    Literal(u32),
    String(String),
    StorageClass(StorageClass),
    Decoration(Decoration),
}

impl Operand {
    /// The id this operand references, if it is an id operand.
    pub const fn id(&self) -> Option<Word> {
        match *self {
            Operand::Id(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Operand::Id(id) => write!(f, "%{id}"),
            Operand::Literal(value) => write!(f, "{value}"),
            Operand::String(ref value) => write!(f, "\"{value}\""),
            Operand::StorageClass(class) => write!(f, "{class:?}"),
            Operand::Decoration(decoration) => write!(f, "{decoration:?}"),
        }
    }
}

/// A decoded instruction.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub op: Op,
    pub result_type: Option<Word>,
    pub result: Option<Word>,
    /// Input operands, in declared order. The result type and result
    /// id are not repeated here.
    pub operands: Vec<Operand>,
}

impl Instruction {
    /// Ids of the input operands, in declared order.
    pub fn in_operand_ids(&self) -> impl Iterator<Item = Word> + '_ {
        self.operands.iter().filter_map(Operand::id)
    }

    pub fn is_block_terminator(&self) -> bool {
        opcode::is_block_terminator(self.op)
    }
}

impl fmt::Display for Instruction {
    /// Disassembly-shaped rendering, e.g. `%5 = OpLoad %2 %4`.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(result) = self.result {
            write!(f, "%{result} = ")?;
        }
        write!(f, "Op{:?}", self.op)?;
        if let Some(ty) = self.result_type {
            write!(f, " %{ty}")?;
        }
        for operand in &self.operands {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

/// A basic block: its label and its body, terminator last.
#[derive(Debug)]
pub struct BasicBlock {
    pub id: Word,
    pub label: Handle<Instruction>,
    pub instructions: Vec<Handle<Instruction>>,
}

impl BasicBlock {
    pub fn terminator(&self) -> Option<Handle<Instruction>> {
        self.instructions.last().copied()
    }
}

/// A function definition. Declarations without a body have no blocks.
#[derive(Debug)]
pub struct Function {
    pub id: Word,
    pub def: Handle<Instruction>,
    pub parameters: Vec<Handle<Instruction>>,
    pub blocks: Vec<BasicBlock>,
    block_index: FastHashMap<Word, usize>,
}

impl Function {
    pub(crate) fn new(id: Word, def: Handle<Instruction>) -> Self {
        Function {
            id,
            def,
            parameters: Vec::new(),
            blocks: Vec::new(),
            block_index: FastHashMap::default(),
        }
    }

    pub(crate) fn push_block(&mut self, block: BasicBlock) {
        self.block_index.insert(block.id, self.blocks.len());
        self.blocks.push(block);
    }

    pub fn block(&self, id: Word) -> Option<&BasicBlock> {
        self.block_index.get(&id).map(|&index| &self.blocks[index])
    }

    /// The entry block: always the first block in layout order.
    pub fn entry(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }
}

/// What a module-level type instruction declares.
///
/// Type queries are pattern matches over this variant; in particular a
/// pointer carries its storage class and pointee directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    Void,
    Bool,
    Int { width: u32, signed: bool },
    Float { width: u32 },
    Vector { component: Word, count: u32 },
    Matrix { column: Word, count: u32 },
    Image { sampled_type: Word },
    Sampler,
    SampledImage { image: Word },
    Array { element: Word },
    RuntimeArray { element: Word },
    Struct,
    Pointer { storage_class: StorageClass, pointee: Word },
    Function,
    Other(Op),
}

/// Fields of the binary's module header.
#[derive(Clone, Copy, Debug, Default)]
pub struct ModuleHeader {
    pub version: u32,
    pub generator: u32,
    pub bound: u32,
    pub schema: u32,
}

/// A decoded module: every instruction in binary order, plus the
/// section structure the analyses consume.
#[derive(Debug, Default)]
pub struct Module {
    pub header: ModuleHeader,
    pub instructions: Arena<Instruction>,
    /// Module-level types, constants, and global variables.
    pub types_global_values: Vec<Handle<Instruction>>,
    /// Decoration instructions, in binary order.
    pub annotations: Vec<Handle<Instruction>>,
    pub functions: Vec<Function>,
    pub(crate) types: FastHashMap<Word, Type>,
    pub(crate) decoration_index: FastHashMap<Word, Vec<Handle<Instruction>>>,
}

impl Module {
    /// The declared type with the given result id.
    pub fn type_def(&self, id: Word) -> Option<&Type> {
        self.types.get(&id)
    }

    /// `OpDecorate` instructions targeting `id`, in binary order.
    pub fn decorations(&self, id: Word) -> impl Iterator<Item = &Instruction> + '_ {
        self.decoration_index
            .get(&id)
            .into_iter()
            .flatten()
            .map(move |&handle| &self.instructions[handle])
    }

    pub fn has_decoration(&self, id: Word, decoration: Decoration) -> bool {
        self.decorations(id).any(|inst| {
            inst.op == Op::Decorate
                && inst.operands.get(1) == Some(&Operand::Decoration(decoration))
        })
    }
}
