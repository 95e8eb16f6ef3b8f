pub mod errors;
pub mod exec;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod tokens;
pub mod tools;
