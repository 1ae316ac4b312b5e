//! mqk-script
//!
//! The plugin source language: a small indentation-structured scripting
//! language in which user indicators and strategies are written.
//!
//! - [`parse`] turns source text into a [`Module`] syntax tree (every node
//!   carries a [`Span`]). The static safety analyzer consumes this tree.
//! - [`Interpreter`] evaluates a parsed module. It is only ever run inside
//!   the sandbox worker process, never in the process that decides validity.
//!
//! The language has no I/O, no clock and no randomness; every container is
//! ordered, so evaluation is a pure function of the source and its inputs.

mod ast;
mod interp;
mod lexer;
mod parser;
mod value;

pub use ast::*;
pub use interp::{run_entrypoint, Interpreter, RuntimeError, ScriptError, MAX_CALL_DEPTH};
pub use lexer::{tokenize, Token, TokenKind};
pub use parser::{parse, ParseError, ParseErrorCode, MAX_NESTING_DEPTH, MAX_SOURCE_BYTES};
pub use value::{Builtin, Function, ModuleValue, Value};
