use rocket::http::Header;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::Request;

pub mod auth;
pub mod connections;
pub mod dashboard;
pub mod dev;
pub mod digest;
pub mod health;
pub mod insights;
pub mod metrics;
pub mod webhooks;
pub mod widgets;

/// Wrapper that adds a short public cache header to a Json response.
/// Used on read-only aggregate endpoints whose data changes slowly.
pub struct CachedJson<T>(pub Json<T>);

impl<'r, T: serde::Serialize> Responder<'r, 'static> for CachedJson<T> {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let mut resp = self.0.respond_to(req)?;
        resp.set_header(Header::new("Cache-Control", "public, max-age=300"));
        Ok(resp)
    }
}
