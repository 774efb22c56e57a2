pub mod config_cmd;
pub mod plugins;
pub mod run;
pub mod status;
