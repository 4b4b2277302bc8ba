pub mod application;
pub mod chat;
pub mod file_upload;
pub mod review;
pub mod search;
pub mod task;
pub mod user;
