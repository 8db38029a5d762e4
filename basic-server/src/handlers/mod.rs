pub mod background;
pub mod hello;
pub mod jobs;
