//! Divergence (non-uniformity) analysis.
//!
//! A forward worklist pass over one function plus the module-level
//! values, deciding for every block and every result id whether it is
//! uniform across the invocation group. The abstract domain per entity
//! is just uniform / non-uniform and the transfer functions only ever
//! add entities to the non-uniform side, so the fixed point is reached
//! regardless of visit order.
//!
//! Each classification records a [`DivergenceCause`]: the first reason
//! found for the entity being non-uniform. Entities are classified at
//! most once, which keeps the resulting witness graph acyclic and lets
//! diagnostics walk it to a root.

use crate::arena::{Handle, HandleSet};
use crate::cfg::Cfg;
use crate::control_dependence::ControlDependenceGraph;
use crate::def_use::DefUseIndex;
use crate::module::{Function, Instruction, Module, Operand, Type};
use crate::{opcode, FastHashMap};
use spirv::{Decoration, Op, StorageClass, Word};
use std::collections::{BTreeMap, VecDeque};

/// Why a block or value was classified non-uniform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DivergenceCause {
    /// Non-uniform by its own definition, e.g. a load from a divergent
    /// storage class.
    Root,
    /// Non-uniform because the named block is.
    Block(Word),
    /// Non-uniform because the named value is. For block entries,
    /// `branch` is the block whose conditional branch inspects the
    /// value.
    Value { value: Word, branch: Option<Word> },
}

pub struct DivergenceAnalysis<'a> {
    module: &'a Module,
    function: &'a Function,
    cfg: &'a Cfg,
    cdg: &'a ControlDependenceGraph,
    def_use: &'a DefUseIndex,
    /// Witness per non-uniform block; membership is the classification.
    blocks: BTreeMap<Word, DivergenceCause>,
    /// Witness per non-uniform value.
    values: BTreeMap<Word, DivergenceCause>,
    /// Block containing each terminator.
    terminator_block: FastHashMap<Handle<Instruction>, Word>,
    worklist: VecDeque<Handle<Instruction>>,
    on_worklist: HandleSet<Instruction>,
}

impl<'a> DivergenceAnalysis<'a> {
    pub fn new(
        module: &'a Module,
        function: &'a Function,
        cfg: &'a Cfg,
        cdg: &'a ControlDependenceGraph,
        def_use: &'a DefUseIndex,
    ) -> Self {
        let mut terminator_block = FastHashMap::default();
        for block in &function.blocks {
            if let Some(terminator) = block.terminator() {
                terminator_block.insert(terminator, block.id);
            }
        }
        DivergenceAnalysis {
            module,
            function,
            cfg,
            cdg,
            def_use,
            blocks: BTreeMap::new(),
            values: BTreeMap::new(),
            terminator_block,
            worklist: VecDeque::new(),
            on_worklist: HandleSet::new(),
        }
    }

    /// Run the analysis to its fixed point.
    pub fn run(&mut self) {
        let module = self.module;
        let function = self.function;
        // Module-level values first, then the function's parameters,
        // then its blocks in reverse post-order. The order only
        // reduces revisits; any order converges.
        for &handle in &module.types_global_values {
            self.enqueue(handle);
        }
        for &handle in &function.parameters {
            self.enqueue(handle);
        }
        for id in self.cfg.reverse_post_order() {
            if let Some(block) = function.block(id) {
                for &handle in &block.instructions {
                    self.enqueue(handle);
                }
            }
        }
        while let Some(handle) = self.worklist.pop_front() {
            self.on_worklist.remove(handle);
            if self.visit(handle) {
                self.enqueue_successors(handle);
            }
        }
        log::debug!(
            "divergence fixed point in function %{}: {} blocks, {} values",
            function.id,
            self.blocks.len(),
            self.values.len()
        );
    }

    pub fn is_block_divergent(&self, block: Word) -> bool {
        self.blocks.contains_key(&block)
    }

    pub fn is_value_divergent(&self, value: Word) -> bool {
        self.values.contains_key(&value)
    }

    pub fn block_witness(&self, block: Word) -> Option<&DivergenceCause> {
        self.blocks.get(&block)
    }

    pub fn value_witness(&self, value: Word) -> Option<&DivergenceCause> {
        self.values.get(&value)
    }

    pub fn block_witnesses(&self) -> &BTreeMap<Word, DivergenceCause> {
        &self.blocks
    }

    pub fn value_witnesses(&self) -> &BTreeMap<Word, DivergenceCause> {
        &self.values
    }

    fn enqueue(&mut self, handle: Handle<Instruction>) {
        if self.on_worklist.insert(handle) {
            self.worklist.push_back(handle);
        }
    }

    /// Returns whether the visit changed the classification.
    fn visit(&mut self, handle: Handle<Instruction>) -> bool {
        let module = self.module;
        let inst = &module.instructions[handle];
        match (inst.op, inst.result) {
            (Op::Label, Some(id)) => self.visit_block(id),
            _ => self.visit_instruction(inst),
        }
    }

    fn visit_block(&mut self, id: Word) -> bool {
        if self.blocks.contains_key(&id) {
            return false;
        }
        let cdg = self.cdg;
        let deps = cdg.dependees(id);
        // A divergent dependee makes the block divergent outright.
        for dep in deps {
            if self.blocks.contains_key(&dep.source) {
                self.blocks.insert(id, DivergenceCause::Block(dep.source));
                return true;
            }
        }
        // Otherwise a divergent branch condition does. Entry
        // dependences inspect no value and never make anything
        // divergent.
        for dep in deps {
            if let Some(value) = dep.dependent_value() {
                if self.values.contains_key(&value) {
                    self.blocks.insert(
                        id,
                        DivergenceCause::Value {
                            value,
                            branch: Some(dep.source),
                        },
                    );
                    return true;
                }
            }
        }
        false
    }

    fn visit_instruction(&mut self, inst: &Instruction) -> bool {
        // Report terminators as changed so their dependents get
        // (re)visited through the control dependence edges.
        if inst.is_block_terminator() {
            return true;
        }
        let Some(result) = inst.result else {
            return false;
        };
        if self.values.contains_key(&result) {
            return false;
        }
        if self.is_divergent_definition(inst, result) {
            log::debug!("value %{result} is non-uniform by definition");
            self.values.insert(result, DivergenceCause::Root);
            return true;
        }
        if opcode::is_guaranteed_uniform(inst.op) {
            return false;
        }
        for used in inst.in_operand_ids() {
            if self.values.contains_key(&used) {
                self.values.insert(
                    result,
                    DivergenceCause::Value {
                        value: used,
                        branch: None,
                    },
                );
                return true;
            }
        }
        for used in inst.in_operand_ids() {
            if self.blocks.contains_key(&used) {
                self.values.insert(result, DivergenceCause::Block(used));
                return true;
            }
        }
        false
    }

    /// Is the instruction non-uniform by its own definition?
    fn is_divergent_definition(&self, inst: &Instruction, result: Word) -> bool {
        match inst.op {
            Op::FunctionParameter => true,
            Op::Load => {
                let Some(pointer) = inst.operands.first().and_then(Operand::id) else {
                    return false;
                };
                let Some(def) = self.def_use.def(pointer) else {
                    return false;
                };
                let Some(type_id) = self.module.instructions[def].result_type else {
                    return false;
                };
                let storage_class = match self.module.type_def(type_id) {
                    Some(&Type::Pointer { storage_class, .. }) => storage_class,
                    _ => {
                        log::warn!("load %{result} through a non-pointer type %{type_id}");
                        return false;
                    }
                };
                match storage_class {
                    StorageClass::Function
                    | StorageClass::Generic
                    | StorageClass::AtomicCounter
                    | StorageClass::StorageBuffer
                    | StorageClass::PhysicalStorageBuffer
                    | StorageClass::Output => true,
                    // Inputs vary per invocation unless flat-decorated.
                    StorageClass::Input => !self.module.has_decoration(result, Decoration::Flat),
                    _ => false,
                }
            }
            _ => false,
        }
    }

    fn enqueue_successors(&mut self, handle: Handle<Instruction>) {
        let module = self.module;
        let function = self.function;
        let cdg = self.cdg;
        let def_use = self.def_use;
        let inst = &module.instructions[handle];
        if let Some(result) = inst.result {
            for &user in def_use.users(result) {
                self.enqueue(user);
            }
        }
        let block = if inst.is_block_terminator() {
            self.terminator_block.get(&handle).copied()
        } else if inst.op == Op::Label {
            inst.result
        } else {
            None
        };
        if let Some(block) = block {
            for dep in cdg.dependents(block) {
                if let Some(target) = function.block(dep.target) {
                    self.enqueue(target.label);
                }
            }
        }
    }
}
