// Background requests for the TUI that are not conversation traffic.
// Conversation work goes through crate::dispatch and lands in the store.

use tokio::sync::mpsc;

use crate::api::ApiClient;
use crate::tui::types::TuiMsg;

pub fn spawn_health_fetch(api: ApiClient, tx: mpsc::UnboundedSender<TuiMsg>) {
    tokio::spawn(async move {
        let res = api.health().await;
        let _ = tx.send(TuiMsg::Health(res));
    });
}
