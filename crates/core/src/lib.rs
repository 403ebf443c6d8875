pub mod config;
pub mod error;

pub use config::{load_dotenv, PoolConfig};
pub use error::*;
