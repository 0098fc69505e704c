pub mod models;
pub mod prizes;
pub mod survey;
