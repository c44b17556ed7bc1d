//! Catalog-change glue between a session's hub and its workspace.

use std::sync::{Arc, Weak};

use futures::FutureExt;
use tracing::{info, warn};

use super::Session;
use crate::codegen::BindingGenerator;
use crate::error::{GatewayError, Result};
use crate::hub::CatalogChangedCallback;

/// Re-renders a provider's artifact when its catalog changes.
///
/// Holds the session weakly: the session owns the hub, and the hub owns the
/// callback built from this bridge.
#[derive(Clone)]
pub struct RegenerationBridge {
    session_id: String,
    session: Weak<Session>,
    generator: Arc<dyn BindingGenerator>,
}

impl RegenerationBridge {
    pub fn new(session: &Arc<Session>, generator: Arc<dyn BindingGenerator>) -> Self {
        Self {
            session_id: session.id().to_owned(),
            session: Arc::downgrade(session),
            generator,
        }
    }

    pub async fn regenerate(&self, provider: &str) -> Result<()> {
        let session = self.session.upgrade().ok_or_else(|| {
            GatewayError::InvalidState(format!("session '{}' already released", self.session_id))
        })?;
        session
            .regenerate_artifact(provider, self.generator.as_ref())
            .await
    }

    /// Adapt into the hub's callback shape; outcomes are logged.
    pub fn into_callback(self) -> CatalogChangedCallback {
        let bridge = Arc::new(self);
        Arc::new(move |provider: String| {
            let bridge = Arc::clone(&bridge);
            async move {
                info!(session_id = %bridge.session_id, provider = %provider, "catalog changed, regenerating");
                match bridge.regenerate(&provider).await {
                    Ok(()) => {
                        info!(session_id = %bridge.session_id, provider = %provider, "artifact regenerated")
                    }
                    Err(error) => warn!(
                        session_id = %bridge.session_id,
                        provider = %provider,
                        error = %error,
                        "artifact regeneration failed; keeping previous artifact"
                    ),
                }
            }
            .boxed()
        })
    }
}
