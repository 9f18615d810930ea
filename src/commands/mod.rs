pub mod config;
pub mod delete;
pub mod helpers;
pub mod list;
pub mod serve;
pub mod start;
pub mod stop;
