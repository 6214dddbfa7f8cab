pub mod account;
pub mod bottle;
pub mod function;
pub mod types;
