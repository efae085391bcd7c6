use crate::df_disas::write_cfg_file;
use crate::prelude::*;
use clap::ArgMatches;
use nu_ansi_term::Color;

pub fn run(args: &ArgMatches) -> DfResult<()> {
    init_logger(args);

    let input_fname = args
        .get_one::<String>("input")
        .ok_or_else(|| DfError::BadArguments("--input needed".to_string()))?;
    let program = Program::open(input_fname)?;

    let options = TraceOptions {
        pointer_width: args
            .get_one::<u64>("pointer-width")
            .map(|bytes| PointerWidth::from_bytes(*bytes))
            .transpose()?,
    };
    let addr = args.get_one::<Addr>("address").copied();
    let trace = trace_data_flow(&program, addr)?.with_options(options);
    log::debug!("tracing in function {}", trace.function().name());

    if let Some(cfg_dir) = args.get_one::<String>("dot") {
        write_cfg_file(cfg_dir, trace.function())?;
    }

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&trace.summarize())?);
        return Ok(());
    }

    println!("{trace}");
    for instr in &trace {
        let line = format!("    {:>10}: {instr}", instr.addr());
        if instr.addr() == trace.addr() {
            println!("{}", Color::Yellow.bold().paint(line));
        } else {
            println!("{line}");
        }
    }

    Ok(())
}
