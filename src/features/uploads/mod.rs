pub mod dtos;
pub mod handlers;
pub mod routes;
pub mod services;
pub mod workers;

pub use handlers::UploadState;
pub use routes::routes;
pub use services::{Assembler, ChunkReceiver, SessionStore};
pub use workers::SessionSweeper;
