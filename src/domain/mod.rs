pub mod availability;
pub mod lifecycle;
pub mod models;
