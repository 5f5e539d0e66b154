#![forbid(unsafe_code)]

pub mod achievements;
pub mod bonus;
pub mod error;
pub mod leveling;
pub mod model;
pub mod ranking;
pub mod time;
pub mod xp;

pub use error::Error;
pub use time::Clock;
