pub mod cache_key;
pub mod config_cmd;
pub mod parse;
