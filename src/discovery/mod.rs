//! Directory (name) service peers register with and look each other up in.

pub mod service;

pub use service::DirectoryService;
