pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod gallery;
pub mod grades;
pub mod schedule;
pub mod session;
pub mod students;
pub mod subjects;
pub mod trash;
