pub mod errors;
pub mod params;
pub mod status;
pub mod value;

pub use errors::*;
pub use params::*;
pub use status::*;
pub use value::*;
