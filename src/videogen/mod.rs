pub mod api;
pub mod artifact;
pub mod generation;
pub mod handlers;
pub mod models;
pub mod poller;
pub mod router;
pub mod session;
pub mod types;

pub use router::videogen_router;
