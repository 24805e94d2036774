pub mod common;
pub mod entity;
pub mod instrument;
pub mod merge;

pub use common::*;
pub use entity::*;
pub use instrument::*;
pub use merge::*;
