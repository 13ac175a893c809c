pub mod common;
pub mod map;
pub mod names;
pub mod stack;
