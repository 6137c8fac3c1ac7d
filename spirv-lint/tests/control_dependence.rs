mod common;

use common::assemble;
use spirv::Op;
use spirv_lint::cfg::Cfg;
use spirv_lint::control_dependence::{
    ControlDependence, ControlDependenceGraph, DependenceKind, PSEUDO_ENTRY,
};
use spirv_lint::dom::PostDominatorTree;
use spirv_lint::front::parse_words;
use spirv_lint::Module;

fn cond_branch_dep(source: u32, target: u32, condition: u32, on_true: bool) -> ControlDependence {
    ControlDependence {
        source,
        target,
        kind: DependenceKind::ConditionalBranch { condition, on_true },
    }
}

fn switch_case_dep(
    source: u32,
    target: u32,
    selector: u32,
    is_default: bool,
    case_values: Vec<u64>,
) -> ControlDependence {
    ControlDependence {
        source,
        target,
        kind: DependenceKind::SwitchCase {
            selector,
            is_default,
            case_values,
        },
    }
}

fn entry_dep(target: u32) -> ControlDependence {
    ControlDependence {
        source: PSEUDO_ENTRY,
        target,
        kind: DependenceKind::Entry,
    }
}

fn build_cdg(module: &Module) -> ControlDependenceGraph {
    let function = &module.functions[0];
    let cfg = Cfg::new(module, function).unwrap();
    let pdt = PostDominatorTree::new(&cfg);
    ControlDependenceGraph::new(&cfg, &pdt).unwrap()
}

/// Collect every forward edge sorted by `(source, target)`, checking
/// on the way that the reverse graph holds the same multiset.
fn gather_edges(cdg: &ControlDependenceGraph) -> Vec<ControlDependence> {
    let mut forward: Vec<ControlDependence> = cdg
        .block_labels()
        .flat_map(|label| cdg.dependents(label).iter().cloned())
        .collect();
    forward.sort_by_key(|dep| (dep.source, dep.target));
    let mut reverse: Vec<ControlDependence> = cdg
        .block_labels()
        .flat_map(|label| cdg.dependees(label).iter().cloned())
        .collect();
    reverse.sort_by_key(|dep| (dep.source, dep.target));
    assert_eq!(forward, reverse, "forward and reverse graphs disagree");
    forward
}

#[test]
fn dependence_simple_cfg() {
    // 10 -> 11; 11 switches on constant %6 to {12 default, 13 case 1};
    // 12, 13 -> 14; 14 branches on %8 to {15, 16}; 15 -> 19;
    // 16 branches on %8 to {17, 18}; 17 -> 18 -> 19; 19 returns.
    let words = assemble(
        20,
        &[
            (Op::TypeVoid, vec![2]),
            (Op::TypeFunction, vec![3, 2]),
            (Op::TypeBool, vec![4]),
            (Op::TypeInt, vec![5, 32, 0]),
            (Op::Constant, vec![5, 6, 0]),
            (Op::ConstantFalse, vec![4, 7]),
            (Op::ConstantTrue, vec![4, 8]),
            (Op::Constant, vec![5, 9, 1]),
            (Op::Function, vec![2, 1, 0, 3]),
            (Op::Label, vec![10]),
            (Op::Branch, vec![11]),
            (Op::Label, vec![11]),
            (Op::Switch, vec![6, 12, 1, 13]),
            (Op::Label, vec![12]),
            (Op::Branch, vec![14]),
            (Op::Label, vec![13]),
            (Op::Branch, vec![14]),
            (Op::Label, vec![14]),
            (Op::BranchConditional, vec![8, 15, 16]),
            (Op::Label, vec![15]),
            (Op::Branch, vec![19]),
            (Op::Label, vec![16]),
            (Op::BranchConditional, vec![8, 17, 18]),
            (Op::Label, vec![17]),
            (Op::Branch, vec![18]),
            (Op::Label, vec![18]),
            (Op::Branch, vec![19]),
            (Op::Label, vec![19]),
            (Op::Return, vec![]),
            (Op::FunctionEnd, vec![]),
        ],
    );
    let module = parse_words(&words).unwrap();
    let function = &module.functions[0];
    assert_eq!(function.entry().unwrap().id, 10);
    let cdg = build_cdg(&module);

    assert!(cdg.is_dependent(12, 11));
    assert!(cdg.is_dependent(13, 11));
    assert!(cdg.is_dependent(15, 14));
    assert!(cdg.is_dependent(16, 14));
    assert!(cdg.is_dependent(18, 14));
    assert!(cdg.is_dependent(17, 16));
    assert!(cdg.is_dependent(10, 0));
    assert!(cdg.is_dependent(11, 0));
    assert!(cdg.is_dependent(14, 0));
    assert!(cdg.is_dependent(19, 0));
    assert!(!cdg.is_dependent(14, 11));
    assert!(!cdg.is_dependent(17, 14));
    assert!(!cdg.is_dependent(19, 14));
    assert!(!cdg.is_dependent(12, 0));

    let edges = gather_edges(&cdg);
    assert_eq!(
        edges,
        vec![
            entry_dep(10),
            entry_dep(11),
            entry_dep(14),
            entry_dep(19),
            switch_case_dep(11, 12, 6, true, vec![]),
            switch_case_dep(11, 13, 6, false, vec![1]),
            cond_branch_dep(14, 15, 8, true),
            cond_branch_dep(14, 16, 8, false),
            cond_branch_dep(14, 18, 8, false),
            cond_branch_dep(16, 17, 8, true),
        ]
    );
}

#[test]
fn dependence_paper_cfg() {
    // The Cytron et al. figure: a multi-entry loop over {9, 10, 11}
    // nested in the loop {2, ..., 12}, with self-dependences on the
    // latches.
    let words = assemble(
        110,
        &[
            (Op::TypeVoid, vec![102]),
            (Op::TypeFunction, vec![103, 102]),
            (Op::TypeBool, vec![104]),
            (Op::ConstantTrue, vec![104, 108]),
            (Op::Function, vec![102, 101, 0, 103]),
            (Op::Label, vec![1]),
            (Op::Branch, vec![2]),
            (Op::Label, vec![2]),
            (Op::BranchConditional, vec![108, 3, 7]),
            (Op::Label, vec![3]),
            (Op::BranchConditional, vec![108, 4, 5]),
            (Op::Label, vec![4]),
            (Op::Branch, vec![6]),
            (Op::Label, vec![5]),
            (Op::Branch, vec![6]),
            (Op::Label, vec![6]),
            (Op::Branch, vec![8]),
            (Op::Label, vec![7]),
            (Op::Branch, vec![8]),
            (Op::Label, vec![8]),
            (Op::Branch, vec![9]),
            (Op::Label, vec![9]),
            (Op::BranchConditional, vec![108, 10, 11]),
            (Op::Label, vec![10]),
            (Op::Branch, vec![11]),
            (Op::Label, vec![11]),
            (Op::BranchConditional, vec![108, 12, 9]),
            (Op::Label, vec![12]),
            (Op::BranchConditional, vec![108, 13, 2]),
            (Op::Label, vec![13]),
            (Op::Return, vec![]),
            (Op::FunctionEnd, vec![]),
        ],
    );
    let module = parse_words(&words).unwrap();
    let function = &module.functions[0];
    assert_eq!(function.entry().unwrap().id, 1);
    let cdg = build_cdg(&module);

    let edges = gather_edges(&cdg);
    assert_eq!(
        edges,
        vec![
            entry_dep(1),
            entry_dep(2),
            entry_dep(8),
            entry_dep(9),
            entry_dep(11),
            entry_dep(12),
            entry_dep(13),
            cond_branch_dep(2, 3, 108, true),
            cond_branch_dep(2, 6, 108, true),
            cond_branch_dep(2, 7, 108, false),
            cond_branch_dep(3, 4, 108, true),
            cond_branch_dep(3, 5, 108, false),
            cond_branch_dep(9, 10, 108, true),
            cond_branch_dep(11, 9, 108, false),
            cond_branch_dep(11, 11, 108, false),
            cond_branch_dep(12, 2, 108, false),
            cond_branch_dep(12, 8, 108, false),
            cond_branch_dep(12, 9, 108, false),
            cond_branch_dep(12, 11, 108, false),
            cond_branch_dep(12, 12, 108, false),
        ]
    );
}
