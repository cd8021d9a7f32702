pub mod config;
pub mod errors;
pub mod profile;
pub mod trial;

pub use config::*;
pub use errors::*;
pub use profile::*;
pub use trial::*;
