//! The sample REST API the host app ships with.

pub mod items;

use crate::http::request::Request;
use crate::http::response::Response;
use crate::routing::{handler, RouteError};
use crate::server::Server;
use items::ItemStore;
use std::sync::Arc;

/// Registers `GET /ping` and the `/api/items` routes on `server`.
pub fn register_routes(server: &Server, store: Arc<ItemStore>) -> Result<(), RouteError> {
    server.get("/ping", handler::sync(|_req: &Request| Response::ok("pong")))?;

    let s = Arc::clone(&store);
    server.get("/api/items", move |req: Request| items::list_items(Arc::clone(&s), req))?;

    let s = Arc::clone(&store);
    server.post("/api/items", move |req: Request| items::create_item(Arc::clone(&s), req))?;

    let s = Arc::clone(&store);
    server.get("/api/items/{id}", move |req: Request| items::get_item(Arc::clone(&s), req))?;

    let s = Arc::clone(&store);
    server.put("/api/items/{id}", move |req: Request| items::update_item(Arc::clone(&s), req))?;

    server.delete("/api/items/{id}", move |req: Request| {
        items::delete_item(Arc::clone(&store), req)
    })?;

    Ok(())
}
