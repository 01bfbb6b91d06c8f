//! Isolation provider seam.
//!
//! The isolation primitive (process, VM context, WASM instance, or an
//! in-process task for tests) is supplied from outside. The host only sees a
//! link and a guard that tears the context down.

use async_trait::async_trait;

use crate::error::ProtocolError;
use crate::link::Link;
use crate::token::SessionToken;

/// Tears down an isolated context.
pub trait ContextGuard: Send {
    fn teardown(&mut self);
}

/// A freshly created isolated context: the host's link end plus its guard.
pub struct IsolatedContext {
    link: Link,
    guard: Box<dyn ContextGuard>,
}

impl IsolatedContext {
    pub fn new(link: Link, guard: impl ContextGuard + 'static) -> Self {
        Self {
            link,
            guard: Box::new(guard),
        }
    }

    pub fn into_parts(self) -> (Link, Box<dyn ContextGuard>) {
        (self.link, self.guard)
    }
}

impl std::fmt::Debug for IsolatedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolatedContext").finish_non_exhaustive()
    }
}

/// Creates sandbox contexts bound to a session token.
///
/// The created sandbox must send exactly one `{token, ready:true}` boot
/// signal over the link once it can accept requests.
#[async_trait]
pub trait IsolationProvider: Send + Sync {
    async fn create(&self, token: SessionToken) -> Result<IsolatedContext, ProtocolError>;
}
