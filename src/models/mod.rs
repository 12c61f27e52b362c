pub mod candidate;
pub mod outcome;

pub use candidate::*;
pub use outcome::*;
