pub mod layout;
pub mod render;
pub mod scale;
pub mod significance;
pub mod summary;
