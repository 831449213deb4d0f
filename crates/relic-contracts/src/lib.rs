pub mod analysis;
pub mod events;
pub mod models;
pub mod reconstruction;
