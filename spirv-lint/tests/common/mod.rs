//! Shared test helpers: a minimal SPIR-V word-stream assembler and a
//! message-collecting consumer.
#![allow(dead_code)]

use spirv::Op;
use spirv_lint::{Level, MessageConsumer};
use std::cell::RefCell;
use std::rc::Rc;

/// Assemble a binary: a header followed by `(opcode, operand words)`
/// pairs, with the standard `(word count << 16) | opcode` framing.
pub fn assemble(bound: u32, instructions: &[(Op, Vec<u32>)]) -> Vec<u32> {
    let mut words = vec![spirv::MAGIC_NUMBER, 0x0001_0500, 0, bound, 0];
    for &(op, ref operands) in instructions {
        words.push((((operands.len() + 1) as u32) << 16) | op as u32);
        words.extend_from_slice(operands);
    }
    words
}

pub type Log = Rc<RefCell<Vec<(Level, String)>>>;

/// A consumer that records every message it receives.
pub fn collector() -> (MessageConsumer, Log) {
    let log: Log = Rc::default();
    let sink = Rc::clone(&log);
    let consumer: MessageConsumer = Box::new(move |level, _, _, message| {
        sink.borrow_mut().push((level, message.to_string()));
    });
    (consumer, log)
}

/// The warnings in the log, in emission order.
pub fn warnings(log: &Log) -> Vec<String> {
    log.borrow()
        .iter()
        .filter(|&&(level, _)| level == Level::Warning)
        .map(|(_, message)| message.clone())
        .collect()
}
