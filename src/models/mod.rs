pub mod user;
pub mod post;
pub mod evaluation;
pub mod rating;

pub use user::*;
pub use post::*;
pub use evaluation::*;
pub use rating::*;
