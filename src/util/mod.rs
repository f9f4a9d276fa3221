pub mod formatters;
pub mod random;
pub mod time;

pub use formatters::size_metric;
pub use random::{auto_id, random_alphanumeric, RandomStringError, MAX_RANDOM_STRING_LENGTH};
pub use time::now_millis;
