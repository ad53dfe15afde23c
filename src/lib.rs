pub mod config;
pub mod crawler;
pub mod downloader;
pub mod errors;
pub mod extract;
pub mod http;
pub mod models;
pub mod page;
pub mod render;
pub mod roster;
pub mod storage;
