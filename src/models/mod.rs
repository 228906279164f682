pub mod enums;
pub mod profile;
pub mod scan;

pub use enums::*;
pub use profile::*;
pub use scan::*;
