/*! A static lint for SPIR-V binaries.

The single check: flag every derivative-taking instruction (the
explicit `OpDPdx`/`OpDPdy`/`OpFwidth` families and the implicit-LOD
image samples) that executes under non-uniform control flow, where
derivatives are undefined.

The work happens in two per-function analyses:

- [`control_dependence`] builds a control dependence graph from the
  CFG and its post-dominator tree, via post-dominance frontiers.
- [`divergence`] runs a worklist pass over that graph and the def-use
  chains, labelling blocks and values non-uniform and recording a
  witness for each label.

[`Linter`] drives both and reports through a message consumer; each
warning is followed by a chain of sub-warnings walking the witness
graph to the root cause.

```no_run
let words: Vec<u32> = vec![];

let mut linter = spirv_lint::Linter::new();
linter.set_message_consumer(Box::new(|level, _, _, message| {
    eprintln!("{level:?}: {message}");
}));
let decoded = linter.run(&words);
```
!*/

pub mod arena;
pub mod cfg;
pub mod control_dependence;
pub mod def_use;
pub mod diag;
pub mod divergence;
pub mod dom;
pub mod front;
pub mod lint;
pub mod module;
pub mod opcode;

use std::hash::BuildHasherDefault;

/// Hash map that is faster but not resilient to DoS attacks.
pub type FastHashMap<K, T> =
    std::collections::HashMap<K, T, BuildHasherDefault<rustc_hash::FxHasher>>;
/// Hash set that is faster but not resilient to DoS attacks.
pub type FastHashSet<K> = std::collections::HashSet<K, BuildHasherDefault<rustc_hash::FxHasher>>;

pub use diag::{Level, MessageConsumer, Position};
pub use front::ParseError;
pub use lint::Linter;
pub use module::Module;
