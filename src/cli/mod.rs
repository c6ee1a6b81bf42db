pub mod args;

use clap::Parser;
pub use args::{AlignMode, Arguments};

pub fn parse() -> Arguments {
    Arguments::parse()
}
