pub mod config;
pub mod flexemarkets;
pub mod logging;
