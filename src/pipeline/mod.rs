pub mod audit_loop;
pub mod inputs;
pub mod parser;
pub mod persist;
pub mod record;
pub mod runner;
pub mod summary;
