pub mod evaluate;

pub use evaluate::*;
