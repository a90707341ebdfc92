//! Clients API: the pages a worker controls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::registration::ServiceWorkerId;
use crate::ServiceWorkerError;

pub type SharedClients = Arc<RwLock<Clients>>;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisibilityState {
    Hidden,
    #[default]
    Visible,
}

/// A client (controlled page).
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Visibility state.
    pub visibility_state: VisibilityState,

    /// Whether focused.
    pub focused: bool,

    /// Worker controlling this client, if any.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    /// A visible, uncontrolled window client.
    pub fn window(url: Url) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed)),
            url,
            client_type: ClientType::Window,
            visibility_state: VisibilityState::Visible,
            focused: false,
            controller: None,
        }
    }

    pub fn is_window(&self) -> bool {
        self.client_type == ClientType::Window
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients known to a container, in the order they appeared.
#[derive(Debug, Default)]
pub struct Clients {
    clients: Vec<Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedClients {
        Arc::new(RwLock::new(self))
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Client, ServiceWorkerError> {
        self.clients
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))
    }

    /// Clients visible to `worker`.
    pub fn match_all(&self, worker: ServiceWorkerId, options: ClientMatchOptions) -> Vec<&Client> {
        self.clients
            .iter()
            .filter(|c| options.include_uncontrolled || c.controller == Some(worker))
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect()
    }

    /// Open a window.
    pub fn open_window(&mut self, url: Url) -> Client {
        for other in &mut self.clients {
            other.focused = false;
        }
        let mut client = Client::window(url);
        client.focused = true;
        debug!(client = %client.id, url = %client.url, "Opened window");

        self.clients.push(client.clone());
        client
    }

    /// Take control of every window client under `scope`. Returns how many changed hands.
    pub fn claim(&mut self, worker: ServiceWorkerId, scope: &Url) -> usize {
        let mut claimed = 0;
        for client in &mut self.clients {
            if client.is_window()
                && client.url.as_str().starts_with(scope.as_str())
                && client.controller != Some(worker)
            {
                client.controller = Some(worker);
                claimed += 1;
            }
        }
        debug!(claimed, scope = %scope, "Clients claimed");
        claimed
    }

    /// Focus the client.
    pub fn focus(&mut self, id: &str) -> Result<Client, ServiceWorkerError> {
        if !self.get_mut(id)?.is_window() {
            return Err(ServiceWorkerError::State("Can only focus window clients".to_string()));
        }
        for client in &mut self.clients {
            client.focused = client.id == id;
        }
        self.get(id)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))
    }

    /// Navigate client to URL.
    pub fn navigate(&mut self, id: &str, url: Url) -> Result<Client, ServiceWorkerError> {
        let client = self.get_mut(id)?;
        if !client.is_window() {
            return Err(ServiceWorkerError::State(
                "Can only navigate window clients".to_string(),
            ));
        }
        client.url = url;
        Ok(client.clone())
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.push(client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        let index = self.clients.iter().position(|c| c.id == id)?;
        Some(self.clients.remove(index))
    }

    /// Drop control held by `worker`, e.g. when it becomes redundant.
    pub fn release(&mut self, worker: ServiceWorkerId) {
        for client in &mut self.clients {
            if client.controller == Some(worker) {
                client.controller = None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_open_window_focuses() {
        let mut clients = Clients::new();
        let first = clients.open_window(url("https://shop.test/"));
        let second = clients.open_window(url("https://shop.test/cart.html"));

        assert!(second.focused);
        assert!(!clients.get(&first.id).unwrap().focused);
    }

    #[test]
    fn test_claim_and_match_all() {
        let worker = ServiceWorkerId::new();
        let mut clients = Clients::new();
        clients.add(Client::window(url("https://shop.test/index.html")));
        clients.add(Client::window(url("https://other.test/")));

        assert!(clients.match_all(worker, ClientMatchOptions::default()).is_empty());
        assert_eq!(clients.claim(worker, &url("https://shop.test/")), 1);
        assert_eq!(clients.claim(worker, &url("https://shop.test/")), 0);

        let controlled = clients.match_all(worker, ClientMatchOptions::default());
        assert_eq!(controlled.len(), 1);
        assert_eq!(controlled[0].url.host_str(), Some("shop.test"));

        let all = clients.match_all(
            worker,
            ClientMatchOptions {
                include_uncontrolled: true,
                client_type: ClientType::All,
            },
        );
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_focus_and_navigate() {
        let mut clients = Clients::new();
        let a = clients.open_window(url("https://shop.test/a.html"));
        let b = clients.open_window(url("https://shop.test/b.html"));

        let focused = clients.focus(&a.id).unwrap();
        assert!(focused.focused);
        assert!(!clients.get(&b.id).unwrap().focused);

        let moved = clients.navigate(&a.id, url("https://shop.test/c.html")).unwrap();
        assert_eq!(moved.url.path(), "/c.html");

        assert!(matches!(clients.focus("nope"), Err(ServiceWorkerError::NotFound(_))));
    }

    #[test]
    fn test_release() {
        let worker = ServiceWorkerId::new();
        let mut clients = Clients::new();
        let c = clients.open_window(url("https://shop.test/"));
        clients.claim(worker, &url("https://shop.test/"));
        clients.release(worker);
        assert_eq!(clients.get(&c.id).unwrap().controller, None);
    }
}
