pub mod error;
pub mod logger;

pub use error::{ApiError, RelayError};
pub use logger::init_logger;
