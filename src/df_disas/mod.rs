use crate::prelude::*;
use clap::ArgMatches;
use nu_ansi_term::Color;
use regex::Regex;
use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::Path;

pub fn run(args: &ArgMatches) -> DfResult<()> {
    init_logger(args);

    let input_fname = args
        .get_one::<String>("input")
        .ok_or_else(|| DfError::BadArguments("--input needed".to_string()))?;
    let program = Program::open(input_fname)?;

    let function_pattern = args
        .get_one::<String>("filter-function")
        .map(|r| Regex::new(r))
        .transpose()?;
    let cfg_dir = args.get_one::<String>("output");

    // linear disassembly, unless whole functions are explicitly requested
    let start = args.get_one::<Addr>("address").copied().or_else(|| {
        if function_pattern.is_none() && cfg_dir.is_none() {
            program.instruction_pointer()
        } else {
            None
        }
    });
    if let Some(addr) = start {
        let count = args.get_one::<usize>("count").copied().unwrap_or(usize::MAX);
        return disassemble_from(&program, addr, count);
    }

    let names: Vec<String> = program
        .function_names()
        .filter(|name| function_pattern.as_ref().map_or(true, |r| r.is_match(name)))
        .map(str::to_string)
        .collect();
    for name in names {
        let function = program.disassemble_function(&name)?;
        println!("[*] {name}");
        if let Some(cfg_dir) = cfg_dir {
            write_cfg_file(cfg_dir, &function)?;
        } else {
            for block in function.iter_ordered_blocks() {
                for instr in block.instructions() {
                    print_instruction(&program, instr);
                }
                println!();
            }
        }
    }

    Ok(())
}

fn disassemble_from(program: &Program, addr: Addr, count: usize) -> DfResult<()> {
    log::debug!("disassembling from {addr}");
    for instr in program.disassemble_instructions(addr)?.take(count) {
        print_instruction(program, &instr);
    }
    Ok(())
}

fn print_instruction(program: &Program, instr: &Instruction) {
    let line = format!("    {:>10}: {instr}", instr.addr());
    if program.instruction_pointer() == Some(instr.addr()) {
        println!("{}", Color::Green.bold().paint(line));
    } else {
        println!("{line}");
    }
}

pub(crate) fn write_cfg_file<P: AsRef<Path>>(base_dir: P, function: &Function) -> DfResult<()> {
    let mut path = base_dir.as_ref().to_path_buf();
    create_dir_all(&path)?;

    path.push(function.name());
    path.set_extension("dot");
    let mut file = File::create(path)?;
    file.write_all(function.to_dot()?.as_bytes())?;

    Ok(())
}
