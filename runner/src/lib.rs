pub mod archive;
pub mod campaign;
pub mod collector;
pub mod config;
pub mod description;
pub mod exec;
pub mod fs;
pub mod lifecycle;
pub mod node;
pub mod registry;
pub mod scheduler;
pub mod seed;
pub mod status;
pub mod submit;
pub mod transfer;
