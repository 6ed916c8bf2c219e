pub mod api;
pub mod artwork;
pub mod core;
pub mod http;
pub mod poller;
pub mod render;
pub mod router;
pub mod surface;
