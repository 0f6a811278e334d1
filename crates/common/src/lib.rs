pub mod config;
pub mod error;
pub mod services;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use services::{DatabaseService, ExchangeService, NotifierService};
pub use types::*;
