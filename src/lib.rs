pub mod config;
pub mod db;
pub mod job;
pub mod model;
pub mod push;
pub mod tmdb;
