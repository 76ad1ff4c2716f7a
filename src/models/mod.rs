mod domain;
mod kb;
mod license;
mod product;
mod user;
mod verification_log;

pub use domain::*;
pub use kb::*;
pub use license::*;
pub use product::*;
pub use user::*;
pub use verification_log::*;
