pub mod host;
pub mod paths;
