//! Decoding SPIR-V binaries into [`Module`]s.
//!
//! Instruction boundaries come from the word-count headers, so every
//! opcode can at least be framed. The operand classification below
//! (which words are ids, literals, or strings) covers the opcode
//! families the analyses can observe; unlisted value instructions use
//! the dominant `[result type, result, id inputs...]` layout.

use crate::module::{
    BasicBlock, Function, Instruction, Module, ModuleHeader, Operand, Type,
};
use crate::{opcode, FastHashMap};
use spirv::{Decoration, Op, StorageClass, Word};
use std::borrow::Cow;

/// Number of words in the binary header.
pub const HEADER_LEN: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid header")]
    InvalidHeader,
    #[error("invalid word count")]
    InvalidWordCount,
    #[error("unknown instruction {0}")]
    UnknownInstruction(u16),
    #[error("{0:?} is missing operands")]
    MissingOperands(Op),
    #[error("bad string operand")]
    BadString,
    #[error("invalid storage class {0}")]
    InvalidStorageClass(Word),
    #[error("invalid decoration {0}")]
    InvalidDecoration(Word),
    #[error("{0:?} must appear inside a function")]
    OutsideFunction(Op),
    #[error("{0:?} must appear inside a block")]
    OutsideBlock(Op),
    #[error("nested function definition")]
    NestedFunction,
    #[error("block %{0} is missing a terminator")]
    MissingTerminator(Word),
    #[error("incomplete function at the end of the binary")]
    IncompleteFunction,
}

/// Decode `words` into a module. Byte-swapped binaries are accepted.
pub fn parse_words(words: &[u32]) -> Result<Module, ParseError> {
    if words.len() < HEADER_LEN {
        return Err(ParseError::InvalidHeader);
    }
    let words: Cow<[u32]> = match words[0] {
        spirv::MAGIC_NUMBER => Cow::Borrowed(words),
        swapped if swapped.swap_bytes() == spirv::MAGIC_NUMBER => {
            Cow::Owned(words.iter().map(|word| word.swap_bytes()).collect())
        }
        _ => return Err(ParseError::InvalidHeader),
    };
    Frontend::new(&words).parse()
}

struct Frontend<'a> {
    words: &'a [u32],
    module: Module,
    /// result id -> result type id, filled as instructions are decoded
    def_types: FastHashMap<Word, Word>,
    current_function: Option<Function>,
    current_block: Option<BasicBlock>,
}

impl<'a> Frontend<'a> {
    fn new(words: &'a [u32]) -> Self {
        Frontend {
            words,
            module: Module::default(),
            def_types: FastHashMap::default(),
            current_function: None,
            current_block: None,
        }
    }

    fn parse(mut self) -> Result<Module, ParseError> {
        let words = self.words;
        self.module.header = ModuleHeader {
            version: words[1],
            generator: words[2],
            bound: words[3],
            schema: words[4],
        };
        let mut offset = HEADER_LEN;
        while offset < words.len() {
            let first = words[offset];
            let word_count = (first >> 16) as usize;
            let raw_op = (first & 0xffff) as u16;
            if word_count == 0 || offset + word_count > words.len() {
                return Err(ParseError::InvalidWordCount);
            }
            let op = Op::from_u32(u32::from(raw_op))
                .ok_or(ParseError::UnknownInstruction(raw_op))?;
            self.instruction(op, &words[offset + 1..offset + word_count])?;
            offset += word_count;
        }
        if self.current_function.is_some() || self.current_block.is_some() {
            return Err(ParseError::IncompleteFunction);
        }
        log::debug!(
            "decoded module: {} instructions, {} functions",
            self.module.instructions.len(),
            self.module.functions.len()
        );
        Ok(self.module)
    }

    fn instruction(&mut self, op: Op, mut words: &[u32]) -> Result<(), ParseError> {
        let (has_type, has_result) = opcode::result_layout(op);
        let result_type = if has_type {
            Some(take(&mut words, op)?)
        } else {
            None
        };
        let result = if has_result {
            Some(take(&mut words, op)?)
        } else {
            None
        };
        let operands = self.in_operands(op, words)?;
        if let (Some(result), Some(ty)) = (result, result_type) {
            self.def_types.insert(result, ty);
        }
        self.place(Instruction {
            op,
            result_type,
            result,
            operands,
        })
    }

    /// Classify the input operand words of `op`.
    fn in_operands(&self, op: Op, words: &[u32]) -> Result<Vec<Operand>, ParseError> {
        Ok(match op {
            // all-literal payloads
            Op::Constant
            | Op::SpecConstant
            | Op::ConstantSampler
            | Op::TypeInt
            | Op::TypeFloat
            | Op::Capability
            | Op::MemoryModel
            | Op::Source => words.iter().map(|&w| Operand::Literal(w)).collect(),
            // a single string payload
            Op::Extension
            | Op::SourceExtension
            | Op::String
            | Op::ModuleProcessed
            | Op::ExtInstImport => {
                let (string, _) = parse_string(words)?;
                vec![Operand::String(string)]
            }
            // leading ids, then literals
            Op::TypeVector
            | Op::TypeMatrix
            | Op::TypeImage
            | Op::ExecutionMode
            | Op::ExecutionModeId
            | Op::CompositeExtract
            | Op::Load
            | Op::SelectionMerge => ids_then_literals(words, 1),
            Op::Store
            | Op::CopyMemory
            | Op::VectorShuffle
            | Op::CompositeInsert
            | Op::LoopMerge => ids_then_literals(words, 2),
            // the trailing literals are optional branch weights
            Op::BranchConditional => ids_then_literals(words, 3),
            Op::TypePointer => {
                let class = storage_class(take_at(words, 0, op)?)?;
                let pointee = take_at(words, 1, op)?;
                vec![Operand::StorageClass(class), Operand::Id(pointee)]
            }
            Op::TypeForwardPointer => {
                let pointer = take_at(words, 0, op)?;
                let class = storage_class(take_at(words, 1, op)?)?;
                vec![Operand::Id(pointer), Operand::StorageClass(class)]
            }
            Op::Variable => {
                let class = storage_class(take_at(words, 0, op)?)?;
                let mut operands = vec![Operand::StorageClass(class)];
                operands.extend(words[1..].iter().map(|&w| Operand::Id(w)));
                operands
            }
            Op::ExtInst => {
                let set = take_at(words, 0, op)?;
                let instruction = take_at(words, 1, op)?;
                let mut operands = vec![Operand::Id(set), Operand::Literal(instruction)];
                operands.extend(words[2..].iter().map(|&w| Operand::Id(w)));
                operands
            }
            Op::SpecConstantOp => {
                let operation = take_at(words, 0, op)?;
                let mut operands = vec![Operand::Literal(operation)];
                operands.extend(words[1..].iter().map(|&w| Operand::Id(w)));
                operands
            }
            Op::Decorate | Op::DecorateString => {
                let target = take_at(words, 0, op)?;
                let decoration = decoration(take_at(words, 1, op)?)?;
                let mut operands = vec![Operand::Id(target), Operand::Decoration(decoration)];
                operands.extend(words[2..].iter().map(|&w| Operand::Literal(w)));
                operands
            }
            Op::DecorateId => {
                let target = take_at(words, 0, op)?;
                let decoration = decoration(take_at(words, 1, op)?)?;
                let mut operands = vec![Operand::Id(target), Operand::Decoration(decoration)];
                operands.extend(words[2..].iter().map(|&w| Operand::Id(w)));
                operands
            }
            Op::MemberDecorate | Op::MemberDecorateString => {
                let target = take_at(words, 0, op)?;
                let member = take_at(words, 1, op)?;
                let decoration = decoration(take_at(words, 2, op)?)?;
                let mut operands = vec![
                    Operand::Id(target),
                    Operand::Literal(member),
                    Operand::Decoration(decoration),
                ];
                operands.extend(words[3..].iter().map(|&w| Operand::Literal(w)));
                operands
            }
            Op::Name => {
                let target = take_at(words, 0, op)?;
                let (string, _) = parse_string(words.get(1..).unwrap_or(&[]))?;
                vec![Operand::Id(target), Operand::String(string)]
            }
            Op::MemberName => {
                let target = take_at(words, 0, op)?;
                let member = take_at(words, 1, op)?;
                let (string, _) = parse_string(words.get(2..).unwrap_or(&[]))?;
                vec![
                    Operand::Id(target),
                    Operand::Literal(member),
                    Operand::String(string),
                ]
            }
            Op::EntryPoint => {
                let model = take_at(words, 0, op)?;
                let entry = take_at(words, 1, op)?;
                let (string, consumed) = parse_string(words.get(2..).unwrap_or(&[]))?;
                let mut operands = vec![
                    Operand::Literal(model),
                    Operand::Id(entry),
                    Operand::String(string),
                ];
                let interface = words.get(2 + consumed..).unwrap_or(&[]);
                operands.extend(interface.iter().map(|&w| Operand::Id(w)));
                operands
            }
            Op::Line => {
                let file = take_at(words, 0, op)?;
                let mut operands = vec![Operand::Id(file)];
                operands.extend(words[1..].iter().map(|&w| Operand::Literal(w)));
                operands
            }
            Op::Function => {
                let control = take_at(words, 0, op)?;
                let function_type = take_at(words, 1, op)?;
                vec![Operand::Literal(control), Operand::Id(function_type)]
            }
            Op::Switch => self.switch_operands(words)?,
            // the image-operands mask sits after the coordinate
            Op::ImageSampleImplicitLod
            | Op::ImageSampleExplicitLod
            | Op::ImageSampleProjImplicitLod
            | Op::ImageSampleProjExplicitLod
            | Op::ImageSparseSampleImplicitLod
            | Op::ImageSparseSampleExplicitLod
            | Op::ImageSparseSampleProjImplicitLod
            | Op::ImageSparseSampleProjExplicitLod
            | Op::ImageFetch
            | Op::ImageSparseFetch
            | Op::ImageRead
            | Op::ImageSparseRead => image_operands(words, 2),
            // ... or after the depth reference / gather component / texel
            Op::ImageSampleDrefImplicitLod
            | Op::ImageSampleDrefExplicitLod
            | Op::ImageSampleProjDrefImplicitLod
            | Op::ImageSampleProjDrefExplicitLod
            | Op::ImageSparseSampleDrefImplicitLod
            | Op::ImageSparseSampleDrefExplicitLod
            | Op::ImageSparseSampleProjDrefImplicitLod
            | Op::ImageSparseSampleProjDrefExplicitLod
            | Op::ImageGather
            | Op::ImageDrefGather
            | Op::ImageSparseGather
            | Op::ImageSparseDrefGather
            | Op::ImageWrite => image_operands(words, 3),
            _ => words.iter().map(|&w| Operand::Id(w)).collect(),
        })
    }

    /// `OpSwitch` case literals are sized by the selector's integer
    /// width, which is known by the time the switch is decoded.
    fn switch_operands(&self, words: &[u32]) -> Result<Vec<Operand>, ParseError> {
        let selector = take_at(words, 0, Op::Switch)?;
        let default = take_at(words, 1, Op::Switch)?;
        let literal_words = match self
            .def_types
            .get(&selector)
            .and_then(|ty| self.module.types.get(ty))
        {
            Some(&Type::Int { width, .. }) => width.div_ceil(32) as usize,
            _ => 1,
        };
        let mut operands = vec![Operand::Id(selector), Operand::Id(default)];
        let mut rest = &words[2..];
        while !rest.is_empty() {
            if rest.len() < literal_words + 1 {
                return Err(ParseError::MissingOperands(Op::Switch));
            }
            for &w in &rest[..literal_words] {
                operands.push(Operand::Literal(w));
            }
            operands.push(Operand::Id(rest[literal_words]));
            rest = &rest[literal_words + 1..];
        }
        Ok(operands)
    }

    /// Slot the instruction into the module structure.
    fn place(&mut self, inst: Instruction) -> Result<(), ParseError> {
        let op = inst.op;
        let result = inst.result;
        if let (Some(ty), Some(result)) = (decode_type(&inst), result) {
            self.module.types.insert(result, ty);
        }
        let handle = self.module.instructions.append(inst);
        match op {
            Op::Function => {
                if self.current_function.is_some() {
                    return Err(ParseError::NestedFunction);
                }
                let id = result.ok_or(ParseError::MissingOperands(op))?;
                self.current_function = Some(Function::new(id, handle));
            }
            Op::FunctionParameter => match self.current_function {
                Some(ref mut function) if self.current_block.is_none() => {
                    function.parameters.push(handle);
                }
                _ => return Err(ParseError::OutsideFunction(op)),
            },
            Op::Label => {
                if self.current_function.is_none() {
                    return Err(ParseError::OutsideFunction(op));
                }
                if let Some(ref open) = self.current_block {
                    return Err(ParseError::MissingTerminator(open.id));
                }
                let id = result.ok_or(ParseError::MissingOperands(op))?;
                self.current_block = Some(BasicBlock {
                    id,
                    label: handle,
                    instructions: Vec::new(),
                });
            }
            Op::FunctionEnd => {
                if let Some(ref open) = self.current_block {
                    return Err(ParseError::MissingTerminator(open.id));
                }
                let function = self
                    .current_function
                    .take()
                    .ok_or(ParseError::OutsideFunction(op))?;
                self.module.functions.push(function);
            }
            _ if self.current_block.is_some() => {
                if let Some(ref mut block) = self.current_block {
                    block.instructions.push(handle);
                }
                if opcode::is_block_terminator(op) {
                    match (self.current_block.take(), self.current_function.as_mut()) {
                        (Some(block), Some(function)) => function.push_block(block),
                        _ => return Err(ParseError::OutsideFunction(op)),
                    }
                }
            }
            _ if self.current_function.is_some() => {
                return Err(ParseError::OutsideBlock(op));
            }
            Op::Decorate
            | Op::MemberDecorate
            | Op::DecorationGroup
            | Op::GroupDecorate
            | Op::GroupMemberDecorate
            | Op::DecorateId
            | Op::DecorateString
            | Op::MemberDecorateString => {
                self.module.annotations.push(handle);
                if op == Op::Decorate {
                    let target = self.module.instructions[handle]
                        .operands
                        .first()
                        .and_then(Operand::id);
                    if let Some(target) = target {
                        self.module
                            .decoration_index
                            .entry(target)
                            .or_default()
                            .push(handle);
                    }
                }
            }
            _ if opcode::is_type_or_global(op) => {
                self.module.types_global_values.push(handle);
            }
            // debug info, capabilities, entry points, execution modes:
            // retained in the arena only
            _ => {}
        }
        Ok(())
    }
}

fn take(words: &mut &[u32], op: Op) -> Result<Word, ParseError> {
    let (&first, rest) = words
        .split_first()
        .ok_or(ParseError::MissingOperands(op))?;
    *words = rest;
    Ok(first)
}

fn take_at(words: &[u32], index: usize, op: Op) -> Result<Word, ParseError> {
    words
        .get(index)
        .copied()
        .ok_or(ParseError::MissingOperands(op))
}

fn ids_then_literals(words: &[u32], id_count: usize) -> Vec<Operand> {
    words
        .iter()
        .enumerate()
        .map(|(index, &w)| {
            if index < id_count {
                Operand::Id(w)
            } else {
                Operand::Literal(w)
            }
        })
        .collect()
}

/// Leading ids, one `ImageOperands` mask literal, then the operands the
/// mask calls for (all ids).
fn image_operands(words: &[u32], mask_index: usize) -> Vec<Operand> {
    words
        .iter()
        .enumerate()
        .map(|(index, &w)| {
            if index == mask_index {
                Operand::Literal(w)
            } else {
                Operand::Id(w)
            }
        })
        .collect()
}

/// A nul-terminated UTF-8 string packed little-endian into words.
/// Returns the string and the number of words it occupied.
fn parse_string(words: &[u32]) -> Result<(String, usize), ParseError> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for (index, &word) in words.iter().enumerate() {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                let string =
                    String::from_utf8(bytes).map_err(|_| ParseError::BadString)?;
                return Ok((string, index + 1));
            }
            bytes.push(byte);
        }
    }
    Err(ParseError::BadString)
}

fn storage_class(word: Word) -> Result<StorageClass, ParseError> {
    StorageClass::from_u32(word).ok_or(ParseError::InvalidStorageClass(word))
}

fn decoration(word: Word) -> Result<Decoration, ParseError> {
    Decoration::from_u32(word).ok_or(ParseError::InvalidDecoration(word))
}

fn decode_type(inst: &Instruction) -> Option<Type> {
    let lit = |index: usize| match inst.operands.get(index) {
        Some(&Operand::Literal(value)) => Some(value),
        _ => None,
    };
    let id = |index: usize| inst.operands.get(index).and_then(Operand::id);
    Some(match inst.op {
        Op::TypeVoid => Type::Void,
        Op::TypeBool => Type::Bool,
        Op::TypeInt => Type::Int {
            width: lit(0)?,
            signed: lit(1)? != 0,
        },
        Op::TypeFloat => Type::Float { width: lit(0)? },
        Op::TypeVector => Type::Vector {
            component: id(0)?,
            count: lit(1)?,
        },
        Op::TypeMatrix => Type::Matrix {
            column: id(0)?,
            count: lit(1)?,
        },
        Op::TypeImage => Type::Image {
            sampled_type: id(0)?,
        },
        Op::TypeSampler => Type::Sampler,
        Op::TypeSampledImage => Type::SampledImage { image: id(0)? },
        Op::TypeArray => Type::Array { element: id(0)? },
        Op::TypeRuntimeArray => Type::RuntimeArray { element: id(0)? },
        Op::TypeStruct => Type::Struct,
        Op::TypePointer => match (inst.operands.first(), id(1)) {
            (Some(&Operand::StorageClass(storage_class)), Some(pointee)) => Type::Pointer {
                storage_class,
                pointee,
            },
            _ => return None,
        },
        Op::TypeFunction => Type::Function,
        Op::TypeOpaque | Op::TypeForwardPointer => Type::Other(inst.op),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(bound: u32, instructions: &[(Op, Vec<u32>)]) -> Vec<u32> {
        let mut words = vec![spirv::MAGIC_NUMBER, 0x0001_0500, 0, bound, 0];
        for &(op, ref operands) in instructions {
            words.push((((operands.len() + 1) as u32) << 16) | op as u32);
            words.extend_from_slice(operands);
        }
        words
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(matches!(
            parse_words(&[0xdead_beef, 0, 0, 8, 0]),
            Err(ParseError::InvalidHeader)
        ));
    }

    #[test]
    fn rejects_short_binary() {
        assert!(matches!(
            parse_words(&[spirv::MAGIC_NUMBER]),
            Err(ParseError::InvalidHeader)
        ));
    }

    #[test]
    fn rejects_truncated_instruction() {
        let mut words = assemble(3, &[]);
        // claims 4 words but only the opcode word is present
        words.push((4 << 16) | Op::TypeInt as u32);
        assert!(matches!(
            parse_words(&words),
            Err(ParseError::InvalidWordCount)
        ));
    }

    #[test]
    fn accepts_byte_swapped_binaries() {
        let words = assemble(3, &[(Op::TypeVoid, vec![2])]);
        let swapped: Vec<u32> = words.iter().map(|w| w.swap_bytes()).collect();
        let module = parse_words(&swapped).unwrap();
        assert_eq!(module.type_def(2), Some(&Type::Void));
    }

    #[test]
    fn recovers_module_structure() {
        let words = assemble(
            12,
            &[
                (Op::TypeVoid, vec![2]),
                (Op::TypeFunction, vec![3, 2]),
                (Op::TypeBool, vec![4]),
                (
                    Op::TypePointer,
                    vec![5, StorageClass::Input as u32, 4],
                ),
                (Op::Variable, vec![5, 6, StorageClass::Input as u32]),
                (Op::Decorate, vec![6, Decoration::Flat as u32]),
                (Op::Function, vec![2, 1, 0, 3]),
                (Op::Label, vec![10]),
                (Op::Load, vec![4, 11, 6]),
                (Op::Return, vec![]),
                (Op::FunctionEnd, vec![]),
            ],
        );
        let module = parse_words(&words).unwrap();
        assert_eq!(module.functions.len(), 1);
        let function = &module.functions[0];
        assert_eq!(function.id, 1);
        assert_eq!(function.blocks.len(), 1);
        assert_eq!(function.blocks[0].id, 10);
        assert_eq!(function.blocks[0].instructions.len(), 2);
        assert_eq!(
            module.type_def(5),
            Some(&Type::Pointer {
                storage_class: StorageClass::Input,
                pointee: 4,
            })
        );
        assert!(module.has_decoration(6, Decoration::Flat));
        assert!(!module.has_decoration(11, Decoration::Flat));
    }

    #[test]
    fn rejects_missing_terminator() {
        let words = assemble(
            12,
            &[
                (Op::TypeVoid, vec![2]),
                (Op::TypeFunction, vec![3, 2]),
                (Op::Function, vec![2, 1, 0, 3]),
                (Op::Label, vec![10]),
                (Op::Label, vec![11]),
            ],
        );
        assert!(matches!(
            parse_words(&words),
            Err(ParseError::MissingTerminator(10))
        ));
    }
}
