use dashmap::DashMap;
use serde_json::Value;

/// Ephemeral presence: doc -> (client -> state).
///
/// Never persisted and never merged into the document.
#[derive(Default)]
pub struct Awareness {
    doc_to_clients: DashMap<String, DashMap<String, Value>>,
}

impl Awareness {
    pub fn new() -> Self {
        Self {
            doc_to_clients: DashMap::new(),
        }
    }

    /// Join or replace this client's state.
    pub fn set(&self, doc: &str, client: &str, state: Value) {
        self.doc_to_clients
            .entry(doc.to_string())
            .or_insert_with(DashMap::new)
            .insert(client.to_string(), state);
    }

    /// `None` state means leave.
    pub fn apply(&self, doc: &str, client: &str, state: Option<Value>) {
        match state {
            Some(s) => self.set(doc, client, s),
            None => {
                self.leave(doc, client);
            }
        }
    }

    pub fn leave(&self, doc: &str, client: &str) -> bool {
        let Some(clients) = self.doc_to_clients.get(doc) else {
            return false;
        };
        let removed = clients.remove(client).is_some();
        if clients.is_empty() {
            drop(clients);
            self.doc_to_clients.remove_if(doc, |_, c| c.is_empty());
        }
        removed
    }

    pub fn get(&self, doc: &str, client: &str) -> Option<Value> {
        self.doc_to_clients
            .get(doc)
            .and_then(|clients| clients.get(client).map(|s| s.value().clone()))
    }

    /// `(client, state)` pairs for one document, sorted by client id.
    pub fn states(&self, doc: &str) -> Vec<(String, Value)> {
        let mut out: Vec<(String, Value)> = self
            .doc_to_clients
            .get(doc)
            .map(|clients| {
                clients
                    .iter()
                    .map(|e| (e.key().clone(), e.value().clone()))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn leave_clears_entry() {
        let a = Awareness::new();
        a.set("task-1", "alice", json!({"cursor": 3}));
        a.set("task-1", "bob", json!({"cursor": 9}));
        assert_eq!(a.states("task-1").len(), 2);

        assert!(a.leave("task-1", "alice"));
        assert!(a.get("task-1", "alice").is_none());
        assert!(!a.leave("task-1", "alice"));
        assert_eq!(a.states("task-1"), vec![("bob".to_string(), json!({"cursor": 9}))]);

        assert!(a.leave("task-1", "bob"));
        assert!(a.states("task-1").is_empty());
        assert!(!a.leave("task-1", "bob"));
    }
}
