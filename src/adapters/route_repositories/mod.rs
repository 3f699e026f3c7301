pub mod file;
pub mod http;

pub use file::FileRouteRepository;
pub use http::HttpRouteRepository;
