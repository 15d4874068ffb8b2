pub mod auth;
pub mod evaluation;
pub mod post;
pub mod rating;
pub mod user;
