use std::sync::Arc;

/// Kind of resource a request loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Font,
    SubResource,
    Object,
    Media,
    Worker,
    SharedWorker,
    Prefetch,
    Favicon,
    Xhr,
    Ping,
    ServiceWorker,
    CspReport,
    PluginResource,
    Other,
}

pub trait RequestPolicy: Send + Sync {
    /// Allows everything unless overridden.
    fn should_allow(&self, _url: &str, _resource_kind: ResourceKind, _tab_host: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl RequestPolicy for AllowAll {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    Cancel,
}

/// Gate attached to one request for its whole life, redirects included.
pub struct RequestThrottle {
    policy: Arc<dyn RequestPolicy>,
    resource_kind: ResourceKind,
}

impl RequestThrottle {
    pub fn new(policy: Arc<dyn RequestPolicy>, resource_kind: ResourceKind) -> Self {
        Self {
            policy,
            resource_kind,
        }
    }

    /// Requests without a tab origin cannot be attributed and always proceed.
    pub fn will_start_request(&self, url: &str, tab_origin: Option<&str>) -> Verdict {
        self.decide(url, tab_origin)
    }

    pub fn will_redirect_request(&self, new_url: &str, tab_origin: Option<&str>) -> Verdict {
        self.decide(new_url, tab_origin)
    }

    fn decide(&self, url: &str, tab_origin: Option<&str>) -> Verdict {
        let Some(tab_host) = tab_origin.filter(|host| !host.is_empty()) else {
            return Verdict::Proceed;
        };
        if self.policy.should_allow(url, self.resource_kind, tab_host) {
            Verdict::Proceed
        } else {
            tracing::debug!(url, tab_host, kind = ?self.resource_kind, "request blocked");
            Verdict::Cancel
        }
    }
}
