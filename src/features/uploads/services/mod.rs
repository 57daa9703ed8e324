mod assembler;
mod chunk_receiver;
mod session_store;

pub use assembler::{Assembler, CompleteUpload};
pub use chunk_receiver::{ChunkReceiver, ChunkUpload};
pub use session_store::{SessionMeta, SessionStore};
