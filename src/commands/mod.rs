pub mod daemon;
pub mod monitor;
pub mod optimize;
pub mod reset;
pub mod rollback;
pub mod status;
