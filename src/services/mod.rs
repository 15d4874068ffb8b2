pub mod jwt;
pub mod password;
pub mod rating;
pub mod watcher;

pub use jwt::JwtService;
pub use password::PasswordService;
pub use rating::RatingService;
