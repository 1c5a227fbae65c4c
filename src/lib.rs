pub mod logging;
pub mod ops;
