use std::collections::BTreeMap;

use deltagrid_host_runtime::{HostBindings, MemoryView, StatusIcon};
use tracing::info;

/// Binds every address the server names to an in-memory table and prints the
/// tables as JSON when the runtime stops.
#[derive(Default)]
struct HeadlessBindings {
    views: BTreeMap<String, MemoryView>,
    icon: Option<StatusIcon>,
}

impl HostBindings for HeadlessBindings {
    type View = MemoryView;

    fn view_mut(&mut self, address: &str) -> Option<&mut MemoryView> {
        Some(self.views.entry(address.to_string()).or_default())
    }

    fn set_status(&mut self, icon: StatusIcon) {
        if self.icon != Some(icon) {
            info!(?icon, "status icon changed");
            self.icon = Some(icon);
        }
    }

    fn on_shutdown(&mut self) {
        match serde_json::to_string_pretty(&self.views) {
            Ok(snapshot) => println!("{snapshot}"),
            Err(err) => eprintln!("grid_host snapshot failed: {err}"),
        }
    }
}

deltagrid_host_runtime::app_main!(HeadlessBindings);
