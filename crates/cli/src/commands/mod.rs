pub mod crashes;
pub mod problems;
pub mod store;
pub mod tools;
pub mod util;

pub use crashes::*;
pub use problems::*;
pub use store::*;
pub use tools::*;
pub use util::*;
