pub mod attendance;
pub mod classes;
pub mod core;
pub mod exchange;
pub mod groups;
pub mod sessions;
pub mod students;
