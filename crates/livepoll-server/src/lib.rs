pub mod client;
pub mod config;
pub mod fanout;
pub mod server;
pub mod session;

pub use config::{load_config, ConfigError, ServerConfig};
pub use server::{start, AppState, ServerHandle};
pub use session::{PollSnapshot, SessionHandle};
