pub mod types;

pub use types::{Dataset, Record, Value};
