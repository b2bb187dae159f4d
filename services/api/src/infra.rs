use metrics_exporter_prometheus::PrometheusHandle;
use query_desk::workflows::queries::{
    Notification, NotificationError, NotificationPublisher,
};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Delivers notifications to the tracing log; stands in for e-mail and chat adapters.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LogNotifier;

impl NotificationPublisher for LogNotifier {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(
            template = %notification.template,
            application_id = %notification.application_id,
            audience = ?notification.audience,
            details = ?notification.details,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Keeps every notification so the demo can print what would have been sent.
#[derive(Default, Clone)]
pub(crate) struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub(crate) fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl NotificationPublisher for RecordingNotifier {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
        Ok(())
    }
}
