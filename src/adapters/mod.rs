pub mod std_adapters;

pub use std_adapters::{FixedClock, MapEnv, StdEnvAdapter, SystemClock};
