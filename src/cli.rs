//! Main `DataFlow` binary command line arguments options.
//!
//! This module declares a function to build `clap` command line arguments
//! parser, so that it can be used from other places than the main binary,
//! such as from bash completion file generator.

use clap::{value_parser, Arg, ArgAction, Command};
use clap_complete::Shell;
use df_disasm::Addr;

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

fn arg_debug() -> Arg {
    Arg::new("debug")
        .short('d')
        .long("debug")
        .action(ArgAction::SetTrue)
        .help("Activate debug mode")
}

fn arg_verbose() -> Arg {
    Arg::new("verbose")
        .short('v')
        .long("verbose")
        .action(ArgAction::SetTrue)
        .help("Activate verbose mode")
}

fn arg_ecslog() -> Arg {
    Arg::new("ecslog")
        .short('e')
        .long("ecslog")
        .action(ArgAction::SetTrue)
        .help("Output logs in ECS format")
}

fn arg_input() -> Arg {
    Arg::new("input")
        .short('i')
        .long("input")
        .action(ArgAction::Set)
        .required(true)
        .help("Input listing file")
}

fn arg_address() -> Arg {
    Arg::new("address")
        .short('a')
        .long("address")
        .action(ArgAction::Set)
        .value_parser(parse_address)
        .help("Instruction address (defaults to the current instruction pointer)")
}

fn arg_output(help: &str) -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .action(ArgAction::Set)
        .help(help.to_string())
}

fn arg_filter_function() -> Arg {
    Arg::new("filter-function")
        .long("filter-function")
        .action(ArgAction::Set)
        .help("Function(s) regex filter")
}

/// Parses an hexadecimal (`0x` prefixed) or decimal address.
fn parse_address(s: &str) -> Result<Addr, String> {
    let s = s.trim();
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    value
        .map(Addr)
        .map_err(|e| format!("invalid address '{s}': {e}"))
}

#[must_use]
pub fn dflow() -> Command {
    Command::new(NAME)
        .version(VERSION)
        .author(AUTHORS)
        .about(DESCRIPTION)
        .subcommand(disas())
        .subcommand(trace())
        .subcommand(
            Command::new("gen-completions")
                .about("Generates completions file")
                .arg(
                    Arg::new("shell")
                        .short('s')
                        .long("shell")
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(Shell))
                        .required(true)
                        .help("Shell type for completion generation"),
                ),
        )
}

#[must_use]
pub fn disas() -> Command {
    Command::new("disas")
        .bin_name("dflow-disas")
        .version(VERSION)
        .author(AUTHORS)
        .about("Disassembles code from an address, or whole functions")
        .arg(arg_debug())
        .arg(arg_verbose())
        .arg(arg_ecslog())
        .arg(arg_input())
        .arg(arg_address())
        .arg(
            Arg::new("count")
                .short('n')
                .long("count")
                .action(ArgAction::Set)
                .value_parser(value_parser!(usize))
                .help("Maximum number of instructions disassembled from the address"),
        )
        .arg(arg_output("Dot output directory"))
        .arg(arg_filter_function())
}

#[must_use]
pub fn trace() -> Command {
    Command::new("trace")
        .bin_name("dflow-trace")
        .version(VERSION)
        .author(AUTHORS)
        .about("Traces the instructions producing the source operands of an instruction")
        .arg(arg_debug())
        .arg(arg_verbose())
        .arg(arg_ecslog())
        .arg(arg_input())
        .arg(arg_address())
        .arg(
            Arg::new("pointer-width")
                .short('p')
                .long("pointer-width")
                .action(ArgAction::Set)
                .value_parser(value_parser!(u64))
                .help("Pointer size in bytes, for indirect calls resolution (defaults to the architecture one)"),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output the trace in JSON format"),
        )
        .arg(
            Arg::new("dot")
                .long("dot")
                .action(ArgAction::Set)
                .help("Dot output directory for the traced function control flow graph"),
        )
}
