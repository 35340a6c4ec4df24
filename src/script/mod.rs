// Script decoding: turns raw text into a sequence of [`Instruction`]s
// (spec.md §6 grammar; the parser itself is a non-goal of the core
// but is included as ambient glue the driver needs).

pub mod instruction;

pub use instruction::{split_statements, Instruction};
