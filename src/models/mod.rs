pub mod user;
pub mod performance;
pub mod booking;
pub mod chat;

pub use user::User;
pub use performance::Performance;
pub use booking::Booking;
pub use chat::{Chat, Message};
