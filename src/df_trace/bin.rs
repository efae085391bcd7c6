use dflow::prelude::DfResult;
use dflow::{cli, df_trace};

fn main() -> DfResult<()> {
    let args = cli::trace().get_matches();
    df_trace::run(&args)
}
