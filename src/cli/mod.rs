pub mod config_check;
pub mod list;
pub mod run;
