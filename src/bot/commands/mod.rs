pub mod admin;
pub mod bottle;
pub mod function;
pub mod help;
pub mod owner;
pub mod profile;
pub mod sign;
pub mod transfer;
