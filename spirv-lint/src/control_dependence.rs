//! Control dependence graph construction.
//!
//! A block A is control dependent on a block B when B's terminator
//! decides whether A executes: A does not post-dominate B, and some
//! path from B reaches A with every intermediate block post-dominated
//! by A. The control dependees of a block are exactly its
//! post-dominance frontier (Cytron et al. 1991, section 6), computed
//! here in one pass over a post-order traversal of the post-dominator
//! tree using the section 4.2 equation
//!
//!   PDF(X) = PDF_local(X) + { Y in PDF(Z) | ipdom(Z) = X,
//!                             X does not strictly post-dominate Y }
//!
//! Following the paper, the construction keeps the edge from the
//! entry node to the exit node, which shows up as dependences on a
//! pseudo-entry block: every block that executes unconditionally is
//! dependent on the program being executed at all.

use crate::cfg::{Cfg, Terminator};
use crate::dom::PostDominatorTree;
use spirv::Word;
use std::collections::BTreeMap;

/// The label number for the pseudo-entry block. All dependences with
/// this source are of kind [`DependenceKind::Entry`], and vice versa.
pub const PSEUDO_ENTRY: Word = 0;

/// How a dependence arises from the dependee's terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DependenceKind {
    /// The dependee ends in a conditional branch; the dependence holds
    /// when the condition evaluates to `on_true`.
    ConditionalBranch { condition: Word, on_true: bool },
    /// The dependee ends in a switch; the dependence holds when the
    /// selector hits one of `case_values` (or falls through to the
    /// default, when `is_default`).
    SwitchCase {
        selector: Word,
        is_default: bool,
        case_values: Vec<u64>,
    },
    /// The synthetic dependence of the function entry on the
    /// pseudo-entry block.
    Entry,
}

/// One edge of the control dependence graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlDependence {
    /// The dependee: the block whose terminator decides.
    pub source: Word,
    /// The dependent block.
    pub target: Word,
    pub kind: DependenceKind,
}

impl ControlDependence {
    /// The value the dependee's terminator inspects: the branch
    /// condition or the switch selector. Entry dependences have none.
    pub fn dependent_value(&self) -> Option<Word> {
        match self.kind {
            DependenceKind::ConditionalBranch { condition, .. } => Some(condition),
            DependenceKind::SwitchCase { selector, .. } => Some(selector),
            DependenceKind::Entry => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlDependenceError {
    #[error("block %{0} reached by a dependence does not end in a conditional branch")]
    NotConditional(Word),
    #[error("conditional branch in block %{0} has identical true and false targets")]
    DuplicateTargets(Word),
    #[error("no edge from the terminator of block %{0} to block %{1}")]
    MissingEdge(Word, Word),
}

/// The control dependence graph of one function, as forward and
/// reverse adjacency maps holding the same multiset of edges.
pub struct ControlDependenceGraph {
    /// dependee -> edges to its dependents
    forward: BTreeMap<Word, Vec<ControlDependence>>,
    /// dependent -> edges from its dependees
    reverse: BTreeMap<Word, Vec<ControlDependence>>,
}

impl ControlDependenceGraph {
    pub fn new(cfg: &Cfg, pdt: &PostDominatorTree) -> Result<Self, ControlDependenceError> {
        let entry = cfg.entry();
        let mut reverse: BTreeMap<Word, Vec<ControlDependence>> = BTreeMap::new();
        // Make `dependees(PSEUDO_ENTRY)` well defined.
        reverse.insert(PSEUDO_ENTRY, Vec::new());
        for &label in pdt.post_order() {
            let mut edges = Vec::new();
            for &pred in cfg.preds(label) {
                if !pdt.strictly_post_dominates(label, pred) {
                    edges.push(classify(cfg, pred, label)?);
                }
            }
            if label == entry {
                // In the augmented graph only the exit node
                // post-dominates the entry, so the entry always lands
                // in its own frontier via the pseudo-entry.
                edges.push(ControlDependence {
                    source: PSEUDO_ENTRY,
                    target: label,
                    kind: DependenceKind::Entry,
                });
            }
            for child in pdt.children(label) {
                // PDF_up of the child: edges whose source the parent
                // does not strictly post-dominate. Only the target is
                // rewritten; the classification stays with the source.
                let inherited: Vec<ControlDependence> = reverse
                    .get(&child)
                    .into_iter()
                    .flatten()
                    .filter(|dep| {
                        dep.source == PSEUDO_ENTRY
                            || !pdt.strictly_post_dominates(label, dep.source)
                    })
                    .map(|dep| ControlDependence {
                        target: label,
                        ..dep.clone()
                    })
                    .collect();
                edges.extend(inherited);
            }
            reverse.insert(label, edges);
        }

        let mut forward: BTreeMap<Word, Vec<ControlDependence>> = BTreeMap::new();
        for &label in reverse.keys() {
            forward.insert(label, Vec::new());
        }
        for edges in reverse.values() {
            for dep in edges {
                forward.entry(dep.source).or_default().push(dep.clone());
            }
        }
        Ok(ControlDependenceGraph { forward, reverse })
    }

    /// The blocks that depend on `block`.
    pub fn dependents(&self, block: Word) -> &[ControlDependence] {
        match self.forward.get(&block) {
            Some(list) => list,
            None => &[],
        }
    }

    /// The blocks `block` depends on.
    pub fn dependees(&self, block: Word) -> &[ControlDependence] {
        match self.reverse.get(&block) {
            Some(list) => list,
            None => &[],
        }
    }

    /// Is `a` directly dependent on `b`?
    pub fn is_dependent(&self, a: Word, b: Word) -> bool {
        if !self.forward.contains_key(&a) {
            return false;
        }
        // Blocks tend to have more dependents than dependees, so
        // search the dependees.
        self.dependees(a).iter().any(|dep| dep.source == b)
    }

    /// Every block label in the graph, pseudo-entry included, in
    /// ascending order.
    pub fn block_labels(&self) -> impl Iterator<Item = Word> + '_ {
        self.forward.keys().copied()
    }

    pub fn contains_block(&self, block: Word) -> bool {
        self.forward.contains_key(&block)
    }
}

/// Classify the CFG edge from `source` to `target` as a control
/// dependence by inspecting the terminator of `source`.
fn classify(
    cfg: &Cfg,
    source: Word,
    target: Word,
) -> Result<ControlDependence, ControlDependenceError> {
    let kind = match cfg.terminator(source) {
        Some(&Terminator::BranchConditional {
            condition,
            true_label,
            false_label,
        }) => {
            let on_true = if target == true_label {
                if true_label == false_label {
                    return Err(ControlDependenceError::DuplicateTargets(source));
                }
                true
            } else if target == false_label {
                false
            } else {
                return Err(ControlDependenceError::MissingEdge(source, target));
            };
            DependenceKind::ConditionalBranch { condition, on_true }
        }
        Some(&Terminator::Switch {
            selector,
            default,
            ref cases,
        }) => {
            let case_values: Vec<u64> = cases
                .iter()
                .filter(|&&(_, label)| label == target)
                .map(|&(value, _)| value)
                .collect();
            let is_default = target == default;
            if !is_default && case_values.is_empty() {
                return Err(ControlDependenceError::MissingEdge(source, target));
            }
            DependenceKind::SwitchCase {
                selector,
                is_default,
                case_values,
            }
        }
        _ => return Err(ControlDependenceError::NotConditional(source)),
    };
    Ok(ControlDependence {
        source,
        target,
        kind,
    })
}
