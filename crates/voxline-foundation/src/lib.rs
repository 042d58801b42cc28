pub mod error;
pub mod shutdown;
pub mod turn;

pub use error::*;
pub use shutdown::*;
pub use turn::*;
