//! Child-process environment construction.
//!
//! Callers hand over a resolved `InterpreterEnvironment`; this module turns it
//! into the search-path variables a host child process is launched with.

pub mod builder;
