//! In-memory items collection served under `/api/items`.

use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub name: String,
    pub description: String,
}

/// Fields a client may send when creating or updating an item. Absent
/// fields are left unchanged on update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug)]
pub struct ItemStore {
    items: RwLock<Vec<Item>>,
    next_id: AtomicU64,
}

impl ItemStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// A store holding the two sample items.
    pub fn seeded() -> Self {
        let items = vec![
            Item {
                id: 1,
                name: "Item 1".to_string(),
                description: "First sample item".to_string(),
            },
            Item {
                id: 2,
                name: "Item 2".to_string(),
                description: "Second sample item".to_string(),
            },
        ];
        Self {
            items: RwLock::new(items),
            next_id: AtomicU64::new(3),
        }
    }

    pub async fn list(&self) -> Vec<Item> {
        self.items.read().await.clone()
    }

    pub async fn get(&self, id: u64) -> Option<Item> {
        self.items.read().await.iter().find(|i| i.id == id).cloned()
    }

    pub async fn create(&self, name: String, description: String) -> Item {
        let mut items = self.items.write().await;
        // Ids are never reused, even after a delete.
        let item = Item {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name,
            description,
        };
        items.push(item.clone());
        item
    }

    pub async fn update(&self, id: u64, patch: ItemPatch) -> Option<Item> {
        let mut items = self.items.write().await;
        let item = items.iter_mut().find(|i| i.id == id)?;
        if let Some(name) = patch.name {
            item.name = name;
        }
        if let Some(description) = patch.description {
            item.description = description;
        }
        Some(item.clone())
    }

    pub async fn delete(&self, id: u64) -> bool {
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|i| i.id != id);
        items.len() != before
    }

    pub async fn contains(&self, id: u64) -> bool {
        self.items.read().await.iter().any(|i| i.id == id)
    }
}

impl Default for ItemStore {
    fn default() -> Self {
        Self::new()
    }
}

fn item_id(req: &Request) -> Result<u64, Response> {
    req.param("id")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| Response::json_error(StatusCode::BAD_REQUEST, "Invalid item id"))
}

fn not_found() -> Response {
    Response::json_error(StatusCode::NOT_FOUND, "Item not found")
}

/// Reads the body and decodes it as an [`ItemPatch`].
async fn read_patch(req: &mut Request) -> Result<ItemPatch, Response> {
    let body = req
        .body_mut()
        .materialize()
        .await
        .map_err(|err| Response::from_body_error(&err))?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(Response::json_error(
            StatusCode::BAD_REQUEST,
            "Request body is required",
        ));
    }
    serde_json::from_slice(body).map_err(|err| {
        tracing::debug!(error = %err, "rejecting item body");
        Response::json_error(StatusCode::BAD_REQUEST, "Invalid JSON")
    })
}

pub async fn list_items(store: Arc<ItemStore>, _req: Request) -> Response {
    Response::json(StatusCode::OK, &store.list().await)
}

pub async fn get_item(store: Arc<ItemStore>, req: Request) -> Response {
    let id = match item_id(&req) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match store.get(id).await {
        Some(item) => Response::json(StatusCode::OK, &item),
        None => not_found(),
    }
}

pub async fn create_item(store: Arc<ItemStore>, mut req: Request) -> Response {
    let patch = match read_patch(&mut req).await {
        Ok(patch) => patch,
        Err(response) => return response,
    };

    let name = patch.name.unwrap_or_default();
    if name.is_empty() {
        return Response::json_error(StatusCode::BAD_REQUEST, "Name is required");
    }

    let item = store
        .create(name, patch.description.unwrap_or_default())
        .await;
    tracing::debug!(id = item.id, "item created");
    Response::json(StatusCode::CREATED, &item)
}

pub async fn update_item(store: Arc<ItemStore>, mut req: Request) -> Response {
    let id = match item_id(&req) {
        Ok(id) => id,
        Err(response) => return response,
    };
    if !store.contains(id).await {
        return not_found();
    }

    let patch = match read_patch(&mut req).await {
        Ok(patch) => patch,
        Err(response) => return response,
    };

    // The item may have been deleted while the body was read.
    match store.update(id, patch).await {
        Some(item) => Response::json(StatusCode::OK, &item),
        None => not_found(),
    }
}

pub async fn delete_item(store: Arc<ItemStore>, req: Request) -> Response {
    let id = match item_id(&req) {
        Ok(id) => id,
        Err(response) => return response,
    };
    if store.delete(id).await {
        tracing::debug!(id, "item deleted");
        Response::json(
            StatusCode::OK,
            &serde_json::json!({ "message": "Item deleted successfully" }),
        )
    } else {
        not_found()
    }
}
