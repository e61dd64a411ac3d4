// Results arriving from background work: store events from crate::dispatch
// and the TUI's own requests.

use crate::parse::response::extract_health;
use crate::store::{StoreEvent, Validity};
use crate::tui::types::{App, TuiMsg};

pub fn handle_tui_msg(app: &mut App, msg: TuiMsg) {
    match msg {
        TuiMsg::Health(res) => {
            app.bg_tasks = app.bg_tasks.saturating_sub(1);
            app.health = Some(match res {
                Ok(resp) => {
                    let health = extract_health(&resp.json);
                    match health.active_sessions {
                        Some(n) => format!("{} ({n} sessions)", health.status),
                        None => health.status,
                    }
                }
                Err(err) => {
                    tracing::debug!(error = %err, "health check failed");
                    "unreachable".to_string()
                }
            });
        }
    }
}

pub fn handle_store_event(app: &mut App, event: StoreEvent) {
    match &event {
        StoreEvent::Validated { request, .. } => {
            // Results for text that has since been edited are ignored by the store.
            if request.credential != app.store.credential().key() {
                app.store.apply(event);
                return;
            }
            app.bg_tasks = app.bg_tasks.saturating_sub(1);
            app.store.apply(event);
            app.status = match app.store.credential().validity() {
                Validity::Valid => "API key is valid.".to_string(),
                Validity::Invalid(reason) => reason.to_string(),
                Validity::Unchecked => app.status.clone(),
            };
        }
        StoreEvent::StreamChunk { .. } => {
            app.store.apply(event);
            app.scroll_from_bottom = 0;
        }
        StoreEvent::StreamDone { .. } => {
            app.bg_tasks = app.bg_tasks.saturating_sub(1);
            app.store.apply(event);
            app.status = "Ready.".to_string();
        }
        StoreEvent::StreamFailed { error, .. } => {
            app.bg_tasks = app.bg_tasks.saturating_sub(1);
            app.status = format!("Request failed: {error}");
            app.store.apply(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::KeyCheck;
    use crate::catalog::{self, SUBMISSION_FAILED_TEXT};
    use crate::config::Settings;
    use crate::store::{ConversationStore, Role, ValidationRequest};

    fn app_with_key(key: &str) -> (App, Option<ValidationRequest>) {
        let mut store = ConversationStore::new(
            catalog::default_model(),
            catalog::default_persona().prompt.to_string(),
        );
        let request = store.set_credential(key);
        let app = App::new(store, Settings::default(), None, "http://localhost:8000".into());
        (app, request)
    }

    fn valid_key() -> String {
        format!("sk-proj-{}", "k".repeat(156))
    }

    #[test]
    fn accepted_key_updates_status() {
        let (mut app, request) = app_with_key(&valid_key());
        app.bg_tasks = 1;
        handle_store_event(
            &mut app,
            StoreEvent::Validated {
                request: request.unwrap(),
                result: Ok(KeyCheck {
                    valid: true,
                    message: None,
                }),
            },
        );
        assert!(app.store.credential().is_valid());
        assert_eq!(app.status, "API key is valid.");
        assert_eq!(app.bg_tasks, 0);
    }

    #[test]
    fn rejected_key_shows_reason() {
        let (mut app, request) = app_with_key(&valid_key());
        handle_store_event(
            &mut app,
            StoreEvent::Validated {
                request: request.unwrap(),
                result: Ok(KeyCheck {
                    valid: false,
                    message: Some("Key revoked".to_string()),
                }),
            },
        );
        assert_eq!(app.status, "Key revoked");
        assert_eq!(app.store.credential_error().as_deref(), Some("Key revoked"));
    }

    #[test]
    fn failed_stream_reports_and_apologizes() {
        let (mut app, request) = app_with_key(&valid_key());
        app.store.apply(StoreEvent::Validated {
            request: request.unwrap(),
            result: Ok(KeyCheck {
                valid: true,
                message: None,
            }),
        });
        app.store.set_draft("hi");
        let submission = app.store.submit("hi").unwrap();
        app.bg_tasks = 1;

        handle_store_event(
            &mut app,
            StoreEvent::StreamFailed {
                epoch: submission.epoch,
                error: "connection reset".to_string(),
            },
        );

        assert!(!app.store.is_loading());
        assert_eq!(app.status, "Request failed: connection reset");
        let last = app.store.messages().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, SUBMISSION_FAILED_TEXT);
    }

    #[test]
    fn health_summary_is_kept() {
        let (mut app, _) = app_with_key("");
        app.bg_tasks = 1;
        handle_tui_msg(
            &mut app,
            TuiMsg::Health(Ok(crate::api::ApiResponse {
                request_id: None,
                elapsed_ms: 3,
                json: serde_json::json!({ "status": "healthy", "active_sessions": 2 }),
            })),
        );
        assert_eq!(app.health.as_deref(), Some("healthy (2 sessions)"));
        assert_eq!(app.bg_tasks, 0);
    }
}
