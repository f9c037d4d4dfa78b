//! # Operation Table
//!
//! A dispatcher does not reflect over its owner. The owner declares, up front,
//! every operation it exposes by name; each entry is an async closure taking
//! the positional parameters of the request.
//!
//! ```ignore
//! let mut ops = Operations::new();
//! let lock = lock.clone();
//! ops.register("request_token", move |mut params| {
//!     let lock = lock.clone();
//!     async move {
//!         let time: u64 = params.next("time")?;
//!         let pid: PeerId = params.next("id")?;
//!         lock.request_token(time, pid).await?;
//!         reply(())
//!     }
//! });
//! ```

use futures::future::BoxFuture;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::common::error::{Error, Result};
use crate::common::messages::{Request, Response};

type Handler = Arc<dyn Fn(Params) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Positional parameters of one request, consumed left to right.
#[derive(Debug)]
pub struct Params {
    method: String,
    values: std::vec::IntoIter<Value>,
    position: usize,
}

impl Params {
    pub fn new(method: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            values: values.into_iter(),
            position: 0,
        }
    }

    /// Decode the next positional argument. `name` only appears in error messages.
    pub fn next<T: DeserializeOwned>(&mut self, name: &str) -> Result<T> {
        self.position += 1;
        let value = self.values.next().ok_or_else(|| Error::InvalidParams {
            method: self.method.clone(),
            reason: format!("missing argument #{} ({name})", self.position),
        })?;
        serde_json::from_value(value).map_err(|e| Error::InvalidParams {
            method: self.method.clone(),
            reason: format!("argument #{} ({name}): {e}", self.position),
        })
    }
}

/// Encode a handler's return value.
pub fn reply<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Named operations exposed by a dispatcher's owner.
#[derive(Clone, Default)]
pub struct Operations {
    handlers: HashMap<String, Handler>,
}

impl Operations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `handler` under `name`. Registering a name twice replaces the
    /// earlier handler.
    pub fn register<F, Fut>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |params| -> BoxFuture<'static, Result<Value>> {
                Box::pin(handler(params))
            });
        self.handlers.insert(name.to_string(), handler);
        self
    }

    /// Merge another table into this one.
    pub fn extend(&mut self, other: Operations) -> &mut Self {
        self.handlers.extend(other.handlers);
        self
    }

    /// Resolve and run `request`, folding any failure into an error response.
    pub async fn dispatch(&self, request: Request) -> Response {
        let Some(handler) = self.handlers.get(&request.method) else {
            debug!("❓ Unknown method '{}'", request.method);
            return Response::from(Err(Error::UnknownMethod(request.method)));
        };

        let params = Params::new(request.method.clone(), request.params);
        let outcome = handler(params).await;
        if let Err(e) = &outcome {
            debug!("⚠️  '{}' failed: {}", request.method, e);
        }
        Response::from(outcome)
    }
}
