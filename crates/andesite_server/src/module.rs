//! Module plumbing. A module packages a unit of server behavior; the
//! registry installs them in ascending priority order and uninstalls in
//! the reverse order.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::server::Server;

pub trait Module: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Lower priorities install first.
    fn priority(&self) -> i32 {
        0
    }

    fn install(&self, server: &Arc<Server>);

    fn uninstall(&self, server: &Arc<Server>) {
        let _ = server;
    }
}

#[derive(Default)]
pub(crate) struct ModuleRegistry {
    installed: Mutex<Vec<Arc<dyn Module>>>,
}

impl ModuleRegistry {
    /// Installs `modules` in ascending priority order, keeping them
    /// registered for teardown.
    pub(crate) fn install_all(&self, server: &Arc<Server>, mut modules: Vec<Arc<dyn Module>>) {
        modules.sort_by_key(|m| m.priority());

        for module in modules {
            info!("installing module {:?} (priority {})", module.name(), module.priority());
            module.install(server);
            self.installed.lock().push(module);
        }
    }

    /// Uninstalls everything in descending priority order.
    pub(crate) fn uninstall_all(&self, server: &Arc<Server>) {
        let mut installed = std::mem::take(&mut *self.installed.lock());

        while let Some(module) = installed.pop() {
            info!("uninstalling module {:?}", module.name());
            module.uninstall(server);
        }
    }
}
