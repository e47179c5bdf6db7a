pub mod catalog;
pub mod incidents;
pub mod parameters;
pub mod points;
pub mod report;
