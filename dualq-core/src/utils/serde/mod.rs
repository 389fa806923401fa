pub mod duration;
pub mod limit;
