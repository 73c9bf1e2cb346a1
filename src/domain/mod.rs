pub mod climate;
pub mod epiweek;
pub mod forecast;
pub mod summary;
pub mod surveillance;
pub mod types;

pub use climate::*;
pub use epiweek::{EpiWeek, EpiWeekError};
pub use forecast::*;
pub use summary::*;
pub use surveillance::*;
pub use types::*;
