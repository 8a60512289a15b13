pub mod config;
pub mod database_validator;
pub mod remote;
pub mod sync;
