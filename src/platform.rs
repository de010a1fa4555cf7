//! Provides a tiny registry which keeps the central services of a deployment together.
//!
//! Instead of module-level singletons, the stores and services (e.g. the
//! [AccountService](crate::account::AccountService) or the [Config](crate::config::Config)) are
//! constructed explicitly and registered here as **Arc<T>**. Background loops like the session
//! revalidation query [Platform::is_running](Platform::is_running) and await
//! [Platform::terminated](Platform::terminated) so that they stop once the platform shuts down.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use ems_plat::platform::Platform;
//! struct Settings {
//!     interval: u64
//! }
//!
//! let platform = Platform::new();
//! platform.register::<Settings>(Arc::new(Settings { interval: 120 }));
//!
//! assert_eq!(platform.require::<Settings>().interval, 120);
//! assert_eq!(platform.is_running(), true);
//!
//! // Terminating releases all services and flips the running flag...
//! platform.terminate();
//! assert_eq!(platform.find::<Settings>().is_none(), true);
//! assert_eq!(platform.is_running(), false);
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

/// Keeps all registered services along with the central "is running" state.
pub struct Platform {
    services: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    running: watch::Sender<bool>,
}

impl Platform {
    /// Creates a new and running platform.
    pub fn new() -> Arc<Self> {
        let (running, _) = watch::channel(true);
        Arc::new(Platform {
            services: Mutex::new(HashMap::new()),
            running,
        })
    }

    /// Registers a service, replacing any previously registered service of the same type.
    pub fn register<T>(&self, service: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        if let Ok(mut services) = self.services.lock() {
            let _ = services.insert(TypeId::of::<T>(), service);
        }
    }

    /// Tries to resolve a previously registered service.
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let services = self.services.lock().ok()?;
        services
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.clone().downcast::<T>().ok())
    }

    /// Resolves a previously registered service.
    ///
    /// # Panics
    /// Panics if the service isn't available or if the platform is already shutting down. Use
    /// [Platform::find](Platform::find) in code which might run after
    /// [Platform::terminate](Platform::terminate).
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        if !self.is_running() {
            panic!(
                "A required component ({}) has been requested but the platform is already shutting down!",
                std::any::type_name::<T>()
            );
        }

        match self.find::<T>() {
            Some(service) => service,
            None => panic!(
                "A required component ({}) was not registered in the platform!",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Determines if the platform is still running.
    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Completes once the platform has been terminated.
    ///
    /// Background loops select on this next to their sleep so that a shutdown doesn't have to
    /// wait for a full refresh interval.
    pub async fn terminated(&self) {
        let mut receiver = self.running.subscribe();
        while *receiver.borrow_and_update() {
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }

    /// Terminates the platform.
    ///
    /// Releases all services (so that their stores are dropped eventually) and wakes up everyone
    /// awaiting [Platform::terminated](Platform::terminated).
    pub fn terminate(&self) {
        if let Ok(mut services) = self.services.lock() {
            services.clear();
        }

        let _ = self.running.send_replace(false);
    }
}
