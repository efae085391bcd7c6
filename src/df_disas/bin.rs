use dflow::prelude::DfResult;
use dflow::{cli, df_disas};

fn main() -> DfResult<()> {
    let args = cli::disas().get_matches();
    df_disas::run(&args)
}
