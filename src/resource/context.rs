//! Per-request state handed to every resource operation

use crate::common::PropertyStore;
use crate::resource::ObjectRef;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// One client session. Each node touched by the session gets its own
/// property store, created on first use and dropped with the session.
#[derive(Debug, Default)]
pub struct Session {
    pub client_host: String,
    pub user: String,
    stores: Mutex<HashMap<String, PropertyStore>>,
}

impl Session {
    pub fn new(client_host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            client_host: client_host.into(),
            user: user.into(),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` against the property store of `node`.
    ///
    /// The store lock is held only for the duration of `f`; never await
    /// inside it.
    pub fn with_props<R>(&self, node: &str, f: impl FnOnce(&mut PropertyStore) -> R) -> R {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        let store = stores.entry(node.to_string()).or_default();
        f(store)
    }
}

/// A request against a single object
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session: Arc<Session>,
    pub object: ObjectRef,
}

impl RequestContext {
    pub fn new(session: Arc<Session>, object: impl Into<ObjectRef>) -> Self {
        Self {
            session,
            object: object.into(),
        }
    }

    /// Same session, different object.
    pub fn with_object(&self, object: impl Into<ObjectRef>) -> Self {
        Self {
            session: self.session.clone(),
            object: object.into(),
        }
    }
}
