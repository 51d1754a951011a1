pub mod drivers;
pub mod registry;

pub use drivers::Driver;
pub use registry::DeviceRegistry;
