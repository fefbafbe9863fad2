// Good defaults
#![forbid(unused_must_use)]
#![deny(unsafe_code)]

use anyhow::Result;

fn run() -> Result<()> {
    rehost_utils::initialize_tracing();
    tracing::trace!("starting");
    rehost_lib::cli::run_from_iter(std::env::args())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
