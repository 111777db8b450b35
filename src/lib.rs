pub mod models {
    pub mod uplink;
}

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod connector;
pub mod decode;
pub mod error;
pub mod listener;
pub mod queue;
pub mod request;
pub mod utils;
pub mod services {
    pub mod dispatch;
    pub mod polling;
    pub mod scheduler;
}

pub use connector::UplinkConnector;
pub use error::RequestError;
pub use listener::{ConnectionObserver, SystemListener};
