pub mod address;
pub mod config;
pub mod deploy;
pub mod doctor;
pub mod env_file;
pub mod materialize;
pub mod provision;
pub mod secrets;
pub mod shell;
pub mod steps;
pub mod template;
