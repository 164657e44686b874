pub mod connections;
pub mod run;
pub mod validate;
