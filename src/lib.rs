//! # `DataFlow`
//!
//! `dflow` is the main crate of the `DataFlow` project, a backward data flow
//! tracer for disassembled code. The project is subdivided into multiple
//! crates, `dflow` acts as entry point by reexporting important structs and
//! functions from those sub-crates. Most of the reexport are done within the
//! `dflow::prelude` namespace.
//!
//! ## Library basics
//!
//! Code to analyze is described by a listing, loaded as a [`prelude::Program`]
//! that plays the role of a debugger: it disassembles functions, reads
//! memory and resolves symbols. Tracing the data flow of an instruction
//! yields the instructions that produced the values it reads:
//!
//! ```rust
//! use dflow::prelude::*;
//!
//! let program: Program = "
//! function main
//!   0x100 4 mov >rax, #1
//!   0x104 4 mov >rbx, #2
//!   0x108 4 add <>rax, <rcx
//! "
//! .parse()?;
//! let trace = trace_data_flow(&program, Some(Addr(0x108)))?;
//! println!("{trace}");
//! for instr in &trace {
//!     println!("{:>8}: {instr}", instr.addr());
//! }
//! # Ok::<(), DfError>(())
//! ```
//!
//! ## Sub-crates
//!
//!  - [`df_disasm`] contains the definitions of registers, operands,
//!    instructions and control flow graphs, the listing format parser and
//!    the debugger-like traits the analysis relies on,
//!  - [`df_analysis`] contains the data flow analysis itself.

mod errors;

pub mod cli;
pub mod df_disas;
pub mod df_trace;

pub use df_analysis as analysis;
pub use df_disasm as disasm;

/// Reexport module of commonly used structures and functions from `DataFlow` project
/// sub-crates:
///
/// ```rust
/// use dflow::prelude::*;
/// ```
pub mod prelude {
    pub use crate::errors::{DfError, DfResult};

    pub use df_analysis::trace::{DataFlowTrace, TraceOptions};
    pub use df_analysis::trace_data_flow;

    pub use df_disasm::arch::{Arch, PointerWidth};
    pub use df_disasm::function::Function;
    pub use df_disasm::instrs::Instruction;
    pub use df_disasm::program::Program;
    pub use df_disasm::{Addr, Disassembler, Memory, Symbols, ThreadContext};

    use clap::ArgMatches;

    pub fn init_logger(args: &ArgMatches) {
        let env = env_logger::Env::new()
            .filter_or("DF_LOG", "info")
            .write_style("DF_LOG_STYLE");

        let mut builder = env_logger::Builder::from_env(env);
        if args.get_flag("verbose") {
            builder.filter_level(log::LevelFilter::Trace);
        } else if args.get_flag("debug") {
            builder.filter_level(log::LevelFilter::Debug);
        }
        if args.get_flag("ecslog") {
            builder.format(ecs_logger::format);
        }
        builder.init();
    }
}
