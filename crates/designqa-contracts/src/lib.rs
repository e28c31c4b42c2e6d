pub mod commands;
pub mod errors;
pub mod events;
pub mod geometry;
pub mod media;
pub mod models;
pub mod report;
