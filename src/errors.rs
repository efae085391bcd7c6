//! Global error handling.
//!
//! Each sub-crate of the project defines its own type error.
//! Their types can be unified, for example in a main function,
//! when winding results at the top-level.
//!
//! ```rust
//! use dflow::prelude::*;
//!
//! fn main() -> DfResult<()> { // can return a DfError
//!    let _program: Program = "function f\n  0x0 1 ret".parse()?; // can return a DisasmError
//!    Ok(())
//! }
//! ```

use df_analysis::errors::AnalysisError;
use df_disasm::errors::DisasmError;
use std::io;
use thiserror::Error;

/// An alias for result that can be a [`DfError`].
pub type DfResult<T> = Result<T, DfError>;

/// The main error type for error winding at the top-level.
/// It mainly consists of transparent wrapper over error types that
/// are defined in dependencies.
#[derive(Debug, Error)]
pub enum DfError {
    /// Custom error for reporting bad command line arguments usage.
    #[error("bad arguments: {0}")]
    BadArguments(String),

    /// Error that can be returned from [I/O operations](std::io).
    #[error(transparent)]
    IO(#[from] io::Error),

    /// Error that can be returned from regex compilation.
    #[error(transparent)]
    Regex(#[from] regex::Error),

    /// Error that can be returned from JSON serialization.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Error that can be returned from [`df_analysis`] functions.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// Error that can be returned from [`df_disasm`] functions.
    #[error(transparent)]
    Disasm(#[from] DisasmError),
}
