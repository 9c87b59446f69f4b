pub mod assistant;
pub mod auth;
pub mod connections;
pub mod ledger;
pub mod tools;
