pub mod dates;
pub mod export;
pub mod identity;
pub mod normalize;
pub mod reconcile;
pub mod summary;

pub use dates::{format_canonical, parse_canonical, parse_date};
pub use export::*;
pub use identity::*;
pub use normalize::*;
pub use reconcile::*;
pub use summary::*;
