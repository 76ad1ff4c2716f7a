pub mod admin;
pub mod kb;
pub mod public;
