mod error;
pub mod kitty;

pub use error::{KittyError, Result};
