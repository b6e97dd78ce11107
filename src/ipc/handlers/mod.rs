pub mod aggregates;
pub mod announcements;
pub mod assessments;
pub mod catalog;
pub mod core;
pub mod enrollment;
pub mod grading;
pub mod reports;
pub mod staff;
pub mod students;
