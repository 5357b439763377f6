use logforth::append;

use crate::args::Args;

pub fn init(args: &Args) {
    logforth::builder()
        .dispatch(|dispatch| {
            dispatch
                .filter(args.log_filter)
                .append(append::Stderr::default())
        })
        .apply();
}
