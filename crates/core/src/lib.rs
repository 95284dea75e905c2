pub mod config;
pub mod error;

pub use config::{Config, LogConfig, PoolConfig, load_dotenv};
pub use error::*;
