use std::time::Duration;

/// Settings for [`HttpDownloader`](crate::HttpDownloader).
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Time allowed for the response headers of one request.
    /// Default: 30 seconds.
    pub request_timeout: Duration,

    /// Longest silence between two body chunks before the attempt is abandoned.
    /// Default: 15 seconds.
    pub idle_timeout: Duration,

    /// Retries after the first failed attempt. Attempts that delivered bytes reset the count.
    /// Default: 3.
    pub max_retries: u32,

    /// First retry delay; doubled after every failure.
    /// Default: 100 milliseconds.
    pub retry_base_delay: Duration,

    /// Cap for the retry delay.
    /// Default: 5 seconds.
    pub max_retry_delay: Duration,

    pub user_agent: Option<String>,

    /// Extra request headers sent with every request.
    pub headers: Vec<(String, String)>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(15),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(5),
            user_agent: None,
            headers: Vec::new(),
        }
    }
}

impl HttpSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.max_retry_delay = max.max(base);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}
