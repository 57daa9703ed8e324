mod quota_dto;

pub use quota_dto::*;
