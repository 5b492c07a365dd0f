pub mod applications;
pub mod assignments;
pub mod core;
pub mod dues;
pub mod payments;
pub mod structures;
pub mod students;
