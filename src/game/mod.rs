pub mod arena;
pub mod constants;
pub mod geometry;
pub mod math;
pub mod snake;
pub mod types;
pub mod world;
