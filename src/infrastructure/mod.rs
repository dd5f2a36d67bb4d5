pub mod config;
pub mod db;
pub mod embedding;
pub mod response;
