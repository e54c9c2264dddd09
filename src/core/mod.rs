
pub mod config;
pub mod error;

pub use config::MnemoraConfig;
pub use error::{MnemoraError, Result};
