pub mod device;
pub mod user;
pub mod user_device;
