mod quota_handler;

pub use quota_handler::*;
