pub mod approval;
pub mod person;
pub mod subject;
