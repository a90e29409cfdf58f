pub mod nodes;
pub mod reports;
