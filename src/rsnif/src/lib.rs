mod nif;

pub use nif::*;
