pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::*;
pub use sqlite::*;
pub use traits::*;
