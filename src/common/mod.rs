pub mod addr;
pub mod error;

pub use addr::Address;
pub use error::{Error, Result};
