pub mod catalog;
pub mod config;
pub mod download;
pub mod http;
pub mod notification;
pub mod presenter;
pub mod runtime;

/// Installs the `log` backend, honouring `RUST_LOG`. Safe to call more than
/// once; only the first call has an effect.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .try_init();
}
