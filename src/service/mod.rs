pub mod device;
pub mod sensor;
pub mod user;
pub mod user_device;

pub use device::DeviceService;
pub use sensor::SensorService;
pub use user::UserService;
pub use user_device::UserDeviceService;
