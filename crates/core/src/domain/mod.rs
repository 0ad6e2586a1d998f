pub mod connection;
pub mod engagement;
pub mod lead;
