pub mod admin;
pub mod file;
pub mod storage;
pub mod worker;
