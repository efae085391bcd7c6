#![no_main]
use df_disasm::{Disassembler, Symbols};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(program) = df_disasm::parse(text) else {
        return;
    };
    let names: Vec<String> = program.function_names().map(str::to_string).collect();
    for name in names {
        let Ok(function) = program.disassemble_function(&name) else {
            continue;
        };
        let addrs: Vec<_> = function.instructions().map(|i| i.addr()).collect();
        for addr in addrs {
            if program.function_containing(addr).is_none() {
                continue;
            }
            if let Ok(trace) = df_analysis::trace_data_flow(&program, Some(addr)) {
                let _ = trace.iter().count();
            }
        }
    }
});
