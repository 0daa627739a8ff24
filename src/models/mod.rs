pub mod access;
pub mod health;
pub mod ready;
pub mod diagnostics;
pub mod error;

pub use access::*;
pub use health::*;
pub use ready::*;
pub use diagnostics::*;
pub use error::*;
