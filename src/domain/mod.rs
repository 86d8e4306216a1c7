pub mod codec;
pub mod controller;
mod link_worker;
pub mod models;
pub mod settings;
pub mod status;
