pub mod config;
pub mod db;
pub mod errors;
pub mod evaluation;
pub mod experiment;
pub mod features;
pub mod models;
pub mod monitoring;
pub mod pipeline;
pub mod registry;
pub mod routes;
pub mod serving;
pub mod state;
pub mod training;
