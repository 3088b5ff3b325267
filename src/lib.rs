pub mod batch;
pub mod cli;
pub mod config;
pub mod source;
pub mod storage;
pub mod stream;
pub mod web;
