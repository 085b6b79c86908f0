pub mod env;
pub mod time;

pub use env::EnvironmentPort;
pub use time::Clock;
