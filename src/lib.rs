pub mod pipeline;

pub use pipeline::{check, Error, Input, Report, Settings, Stats, Verdict};
