//! The public linter façade and the derivative-uniformity check.
//!
//! The one diagnostic: a derivative instruction (explicit `OpDPdx*`
//! family or an implicit-LOD image sample) inside a block that the
//! divergence analysis classifies non-uniform. Derivatives read
//! neighboring invocations, so they are undefined once the invocation
//! group stops moving in lockstep.

use crate::cfg::Cfg;
use crate::control_dependence::ControlDependenceGraph;
use crate::def_use::DefUseIndex;
use crate::diag::{self, Level, MessageConsumer, Position};
use crate::divergence::{DivergenceAnalysis, DivergenceCause};
use crate::dom::PostDominatorTree;
use crate::front;
use crate::module::{Function, Module};
use crate::{opcode, FastHashSet};
use spirv::Word;

/// Checks SPIR-V binaries for derivatives under non-uniform control
/// flow.
///
/// A fresh linter has an empty message consumer that ignores all
/// messages; use [`set_message_consumer`](Self::set_message_consumer)
/// if the diagnostics are of interest.
pub struct Linter {
    consumer: MessageConsumer,
}

impl Linter {
    pub fn new() -> Self {
        Linter {
            consumer: diag::ignore_messages(),
        }
    }

    pub fn set_message_consumer(&mut self, consumer: MessageConsumer) {
        self.consumer = consumer;
    }

    /// Decode and lint `binary`.
    ///
    /// Returns whether decoding succeeded; warnings never change the
    /// return value. Functions with malformed control flow are
    /// reported and skipped, and later functions still run.
    pub fn run(&self, binary: &[u32]) -> bool {
        let module = match front::parse_words(binary) {
            Ok(module) => module,
            Err(error) => {
                self.message(Level::Error, &error.to_string());
                return false;
            }
        };
        let def_use = DefUseIndex::new(&module);
        for function in &module.functions {
            if function.blocks.is_empty() {
                continue;
            }
            log::debug!("linting function %{}", function.id);
            self.lint_function(&module, function, &def_use);
        }
        true
    }

    fn lint_function(&self, module: &Module, function: &Function, def_use: &DefUseIndex) {
        let cfg = match Cfg::new(module, function) {
            Ok(cfg) => cfg,
            Err(error) => {
                self.message(Level::Error, &format!("in function %{}: {error}", function.id));
                return;
            }
        };
        let pdt = PostDominatorTree::new(&cfg);
        let cdg = match ControlDependenceGraph::new(&cfg, &pdt) {
            Ok(cdg) => cdg,
            Err(error) => {
                self.message(Level::Error, &format!("in function %{}: {error}", function.id));
                return;
            }
        };
        let mut analysis = DivergenceAnalysis::new(module, function, &cfg, &cdg, def_use);
        analysis.run();

        for block in &function.blocks {
            for &handle in &block.instructions {
                let inst = &module.instructions[handle];
                if opcode::is_derivative(inst.op) && analysis.is_block_divergent(block.id) {
                    self.warn(
                        &format!(
                            "derivative with non-uniform control flow, located in block %{}",
                            block.id
                        ),
                        Some(&inst.to_string()),
                    );
                    if !self.explain_divergence(module, function, def_use, &analysis, block.id) {
                        // the witness graph is inconsistent; abandon
                        // this function's remaining warnings
                        return;
                    }
                }
            }
        }
    }

    /// Walk the witness graph from a non-uniform block down to a root,
    /// emitting one sub-warning per hop. Returns `false` when the walk
    /// re-enters an entity, which the analysis is supposed to make
    /// impossible.
    fn explain_divergence(
        &self,
        module: &Module,
        function: &Function,
        def_use: &DefUseIndex,
        analysis: &DivergenceAnalysis,
        start: Word,
    ) -> bool {
        enum Phase {
            Block(Word),
            Value(Word),
        }
        let mut seen_blocks = FastHashSet::default();
        let mut seen_values = FastHashSet::default();
        let mut phase = Phase::Block(start);
        loop {
            match phase {
                Phase::Block(block) => {
                    if !seen_blocks.insert(block) {
                        return self.witness_failure();
                    }
                    match analysis.block_witness(block) {
                        // Compress block-to-block links: the message
                        // names the branch that started it all.
                        Some(&DivergenceCause::Block(source)) => phase = Phase::Block(source),
                        Some(&DivergenceCause::Value { value, branch }) => {
                            let Some(source) = branch else {
                                return self.witness_failure();
                            };
                            let pretty = function
                                .block(source)
                                .and_then(|b| b.terminator())
                                .map(|handle| module.instructions[handle].to_string());
                            self.warn(
                                &format!(
                                    "because %{block} depends on conditional branch in %{source} \
                                     on non-uniform value %{value}"
                                ),
                                pretty.as_deref(),
                            );
                            phase = Phase::Value(value);
                        }
                        Some(&DivergenceCause::Root) | None => return self.witness_failure(),
                    }
                }
                Phase::Value(value) => {
                    if !seen_values.insert(value) {
                        return self.witness_failure();
                    }
                    let pretty = def_use
                        .def(value)
                        .map(|handle| module.instructions[handle].to_string());
                    match analysis.value_witness(value) {
                        Some(&DivergenceCause::Value { value: used, .. }) => {
                            self.warn(
                                &format!("because %{value} uses %{used} in its definition"),
                                pretty.as_deref(),
                            );
                            phase = Phase::Value(used);
                        }
                        Some(&DivergenceCause::Block(block)) => {
                            self.warn(
                                &format!(
                                    "because it is conditionally set in block %{block}, \
                                     which is non-uniform"
                                ),
                                pretty.as_deref(),
                            );
                            phase = Phase::Block(block);
                        }
                        Some(&DivergenceCause::Root) => {
                            self.warn("because it has a non-uniform definition", pretty.as_deref());
                            return true;
                        }
                        None => return self.witness_failure(),
                    }
                }
            }
        }
    }

    fn witness_failure(&self) -> bool {
        self.message(
            Level::Error,
            "internal error: divergence witness does not reach a root",
        );
        false
    }

    fn warn(&self, text: &str, instruction: Option<&str>) {
        match instruction {
            Some(instruction) => {
                self.message(Level::Warning, &format!("{text}\n  {instruction}"))
            }
            None => self.message(Level::Warning, text),
        }
    }

    fn message(&self, level: Level, text: &str) {
        (self.consumer)(level, "", Position::default(), text);
    }
}

impl Default for Linter {
    fn default() -> Self {
        Self::new()
    }
}
