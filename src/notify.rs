//! Push notifications sent after a category's counter changes.
//!
//! Notification is best-effort: it runs after the counter push and a failure
//! is only logged.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::category::Category;
use crate::error::RemoteError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub category: Category,
    pub count: u64,
    pub file_name: String,
    pub title: String,
    pub body: String,
}

impl Alert {
    pub fn new(category: Category, count: u64, file_name: &str) -> Self {
        let (title, body) = alert_text(category);
        Self {
            category,
            count,
            file_name: file_name.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        }
    }
}

pub fn alert_text(category: Category) -> (&'static str, &'static str) {
    match category {
        Category::Violence => ("Violence detected", "Violent behaviour suspected. Please check!"),
        Category::Weapon => (
            "Weapon detected",
            "Someone may be carrying a weapon. Please check!",
        ),
        Category::Fire => ("Fire or smoke detected", "A fire is suspected. Please check!"),
    }
}

pub trait Notifier {
    fn notify(&mut self, alert: &Alert) -> Result<(), RemoteError>;
}

impl<T: Notifier + ?Sized> Notifier for Box<T> {
    fn notify(&mut self, alert: &Alert) -> Result<(), RemoteError> {
        (**self).notify(alert)
    }
}

#[derive(Default)]
struct RecordingInner {
    alerts: Vec<Alert>,
    attempts: u64,
    failures: VecDeque<RemoteError>,
}

/// Keeps alerts in memory. Clones share the same list.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    inner: Arc<Mutex<RecordingInner>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next send attempt.
    pub fn fail_next(&self, err: RemoteError) {
        self.lock().failures.push_back(err);
    }

    /// Alerts delivered successfully.
    pub fn alerts(&self) -> Vec<Alert> {
        self.lock().alerts.clone()
    }

    /// Send calls seen, including failed ones.
    pub fn attempts(&self) -> u64 {
        self.lock().attempts
    }

    fn lock(&self) -> MutexGuard<'_, RecordingInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, alert: &Alert) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.attempts += 1;
        if let Some(err) = inner.failures.pop_front() {
            return Err(err);
        }
        inner.alerts.push(alert.clone());
        Ok(())
    }
}

#[cfg(feature = "firebase")]
pub use fcm::{FcmNotifier, FcmSettings};

#[cfg(feature = "firebase")]
mod fcm {
    use anyhow::{anyhow, Context, Result};
    use serde_json::json;
    use std::time::Duration;
    use url::Url;

    use super::{Alert, Notifier};
    use crate::error::RemoteError;
    use crate::remote::firebase::{base_url, build_agent, map_ureq_error};

    pub const DEFAULT_FCM_ENDPOINT: &str = "https://fcm.googleapis.com";

    #[derive(Clone, Debug, PartialEq)]
    pub struct FcmSettings {
        pub endpoint: String,
        pub project_id: String,
        /// Registration token of the receiving device.
        pub device_token: String,
        /// OAuth2 access token for the FCM v1 API.
        pub access_token: String,
        pub timeout: Duration,
    }

    /// Firebase Cloud Messaging HTTP v1 sender.
    pub struct FcmNotifier {
        agent: ureq::Agent,
        send_url: Url,
        device_token: String,
        access_token: String,
    }

    impl FcmNotifier {
        pub fn new(settings: &FcmSettings) -> Result<Self> {
            if settings.project_id.trim().is_empty() {
                return Err(anyhow!("fcm project_id must not be empty"));
            }
            if settings.device_token.trim().is_empty() {
                return Err(anyhow!("fcm device_token must not be empty"));
            }
            let send_url = base_url(&settings.endpoint)?
                .join(&format!(
                    "v1/projects/{}/messages:send",
                    settings.project_id.trim()
                ))
                .context("build fcm send url")?;
            Ok(Self {
                agent: build_agent(settings.timeout),
                send_url,
                device_token: settings.device_token.clone(),
                access_token: settings.access_token.clone(),
            })
        }

        pub fn send_url(&self) -> &Url {
            &self.send_url
        }

        pub(crate) fn message_body(&self, alert: &Alert) -> serde_json::Value {
            json!({
                "message": {
                    "token": self.device_token,
                    "notification": {
                        "title": alert.title,
                        "body": alert.body,
                    },
                    "data": {
                        "category": alert.category.as_str(),
                        "count": alert.count.to_string(),
                        "file_name": alert.file_name,
                    }
                }
            })
        }
    }

    impl Notifier for FcmNotifier {
        fn notify(&mut self, alert: &Alert) -> Result<(), RemoteError> {
            let body = self.message_body(alert).to_string();
            self.agent
                .post(self.send_url.as_str())
                .set("Authorization", &format!("Bearer {}", self.access_token))
                .set("Content-Type", "application/json")
                .send_string(&body)
                .map_err(map_ureq_error)?;
            Ok(())
        }
    }

}
