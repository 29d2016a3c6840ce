//! API request handlers

mod admission;
mod store;
mod system;

pub use admission::*;
pub use store::*;
pub use system::*;
