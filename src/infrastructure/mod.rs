pub mod config;
pub mod db;
pub mod encoding;
pub mod rules;
pub mod xml;
