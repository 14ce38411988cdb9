mod http;
mod provider;

pub use http::ReqwestTransport;
pub use provider::{HttpRequest, HttpResponse, Method, Transport};
