pub mod error;
pub mod keys;
pub mod storage;
