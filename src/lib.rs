pub mod config;
pub mod docs;
pub mod error;
pub mod response;

pub mod database;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod remote;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod storage;
