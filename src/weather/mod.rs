pub mod calculator;
pub mod decode;
pub mod listener;
pub mod units;

pub use calculator::Calculator;
pub use listener::route;
