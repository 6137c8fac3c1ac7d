//! Opcode predicates shared by the front-end and the analyses.

use spirv::Op;

/// Instructions that compute derivatives across the invocation group,
/// either explicitly or as part of an implicit-LOD image sample.
pub fn is_derivative(op: Op) -> bool {
    matches!(
        op,
        // implicit derivatives
        Op::ImageSampleImplicitLod
            | Op::ImageSampleDrefImplicitLod
            | Op::ImageSampleProjImplicitLod
            | Op::ImageSampleProjDrefImplicitLod
            | Op::ImageSparseSampleImplicitLod
            | Op::ImageSparseSampleDrefImplicitLod
            | Op::ImageSparseSampleProjImplicitLod
            | Op::ImageSparseSampleProjDrefImplicitLod
            // explicit derivatives
            | Op::DPdx
            | Op::DPdy
            | Op::Fwidth
            | Op::DPdxFine
            | Op::DPdyFine
            | Op::FwidthFine
            | Op::DPdxCoarse
            | Op::DPdyCoarse
            | Op::FwidthCoarse
    )
}

/// Instructions that end a basic block.
pub fn is_block_terminator(op: Op) -> bool {
    matches!(
        op,
        Op::Branch
            | Op::BranchConditional
            | Op::Switch
            | Op::Return
            | Op::ReturnValue
            | Op::Kill
            | Op::Unreachable
            | Op::TerminateInvocation
    )
}

/// Group operations whose result is the same for every invocation in
/// the group regardless of their operands.
pub fn is_guaranteed_uniform(op: Op) -> bool {
    matches!(
        op,
        Op::SubgroupBallotKHR
            | Op::SubgroupFirstInvocationKHR
            | Op::GroupNonUniformBroadcastFirst
            | Op::GroupNonUniformBallot
    )
}

/// Module-level instructions that declare types, constants, or global
/// values.
pub fn is_type_or_global(op: Op) -> bool {
    matches!(
        op,
        Op::TypeVoid
            | Op::TypeBool
            | Op::TypeInt
            | Op::TypeFloat
            | Op::TypeVector
            | Op::TypeMatrix
            | Op::TypeImage
            | Op::TypeSampler
            | Op::TypeSampledImage
            | Op::TypeArray
            | Op::TypeRuntimeArray
            | Op::TypeStruct
            | Op::TypeOpaque
            | Op::TypePointer
            | Op::TypeFunction
            | Op::TypeForwardPointer
            | Op::ConstantTrue
            | Op::ConstantFalse
            | Op::Constant
            | Op::ConstantComposite
            | Op::ConstantSampler
            | Op::ConstantNull
            | Op::SpecConstantTrue
            | Op::SpecConstantFalse
            | Op::SpecConstant
            | Op::SpecConstantComposite
            | Op::SpecConstantOp
            | Op::Variable
            | Op::Undef
    )
}

/// Whether instructions with this opcode carry a result type and a
/// result id. Value instructions overwhelmingly use the
/// `[result type, result, inputs...]` layout, so that is the default;
/// the arms list the exceptions the linter can encounter.
pub fn result_layout(op: Op) -> (bool, bool) {
    match op {
        // no result at all
        Op::Nop
        | Op::SourceContinued
        | Op::Source
        | Op::SourceExtension
        | Op::Name
        | Op::MemberName
        | Op::Line
        | Op::NoLine
        | Op::ModuleProcessed
        | Op::Capability
        | Op::Extension
        | Op::MemoryModel
        | Op::EntryPoint
        | Op::ExecutionMode
        | Op::ExecutionModeId
        | Op::Decorate
        | Op::MemberDecorate
        | Op::DecorateId
        | Op::DecorateString
        | Op::MemberDecorateString
        | Op::GroupDecorate
        | Op::GroupMemberDecorate
        | Op::TypeForwardPointer
        | Op::Store
        | Op::CopyMemory
        | Op::CopyMemorySized
        | Op::ImageWrite
        | Op::AtomicStore
        | Op::EmitVertex
        | Op::EndPrimitive
        | Op::EmitStreamVertex
        | Op::EndStreamPrimitive
        | Op::ControlBarrier
        | Op::MemoryBarrier
        | Op::LoopMerge
        | Op::SelectionMerge
        | Op::FunctionEnd
        | Op::Branch
        | Op::BranchConditional
        | Op::Switch
        | Op::Return
        | Op::ReturnValue
        | Op::Kill
        | Op::Unreachable
        | Op::TerminateInvocation
        | Op::DemoteToHelperInvocation => (false, false),
        // a result id but no result type
        Op::String
        | Op::ExtInstImport
        | Op::DecorationGroup
        | Op::Label
        | Op::TypeVoid
        | Op::TypeBool
        | Op::TypeInt
        | Op::TypeFloat
        | Op::TypeVector
        | Op::TypeMatrix
        | Op::TypeImage
        | Op::TypeSampler
        | Op::TypeSampledImage
        | Op::TypeArray
        | Op::TypeRuntimeArray
        | Op::TypeStruct
        | Op::TypeOpaque
        | Op::TypePointer
        | Op::TypeFunction => (false, true),
        _ => (true, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivative_set() {
        assert!(is_derivative(Op::DPdx));
        assert!(is_derivative(Op::FwidthCoarse));
        assert!(is_derivative(Op::ImageSparseSampleProjDrefImplicitLod));
        assert!(!is_derivative(Op::ImageSampleExplicitLod));
        assert!(!is_derivative(Op::Load));
    }

    #[test]
    fn layouts() {
        assert_eq!(result_layout(Op::Label), (false, true));
        assert_eq!(result_layout(Op::Load), (true, true));
        assert_eq!(result_layout(Op::Switch), (false, false));
        assert_eq!(result_layout(Op::TypePointer), (false, true));
    }
}
