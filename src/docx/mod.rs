pub mod comments;
pub mod engine;
pub mod mapper;
pub mod package;
pub mod xml;
