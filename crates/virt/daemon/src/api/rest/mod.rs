//! REST transport for admission reviews

pub mod handlers;
pub mod router;
pub mod state;
