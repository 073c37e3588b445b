pub mod sizing;
pub mod stops;

pub use sizing::*;
pub use stops::*;
