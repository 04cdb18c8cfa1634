pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod helpers;
pub mod probe;
pub mod ranker;
pub mod record;
pub mod settings;
pub mod store;
pub mod subscription;

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
