use tracing::warn;

/// Operator notifications over an ntfy-style topic.
///
/// Fire-and-forget: a notification that fails to send is logged and
/// dropped — notifying must never take the service down with it.
pub struct Notifier {
    client: reqwest::Client,
    base_url: String,
    topic: String,
}

impl Notifier {
    pub fn new(topic: &str) -> Self {
        Self::with_base_url("https://ntfy.sh", topic)
    }

    pub fn with_base_url(base_url: &str, topic: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            topic: topic.to_string(),
        }
    }

    pub async fn notify(&self, title: &str, message: &str, priority: &str) {
        let url = format!("{}/{}", self.base_url, self.topic);
        let result = self
            .client
            .post(&url)
            .header("Title", title)
            .header("Priority", priority)
            .body(message.to_string())
            .send()
            .await;

        match result {
            Ok(resp) if !resp.status().is_success() => {
                warn!(status = resp.status().as_u16(), "notification rejected");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to send notification"),
        }
    }
}
