use crate::config::Config;
use crate::error::Result;

use super::Pool;

/// Pool-level settings layered on top of a plain connection [`Config`].
pub struct PoolConfig {
    pub(crate) conn: Config,
    pub(crate) max_conn: usize,
    pub(crate) healthcheck_interval: std::time::Duration,
}

impl PoolConfig {
    pub fn new(conn: Config) -> Self {
        Self { conn, max_conn: 10, healthcheck_interval: std::time::Duration::from_secs(30) }
    }

    /// The connection config every pooled connection is opened with.
    pub fn connection(&self) -> &Config {
        &self.conn
    }

    /// Upper bound on live connections.
    pub fn max_connections(mut self, value: usize) -> Self {
        self.max_conn = value;
        self
    }

    /// How often an idle connection is pinged to confirm it's still alive
    /// before being handed back out.
    pub fn healthcheck_interval(mut self, value: std::time::Duration) -> Self {
        self.healthcheck_interval = value;
        self
    }

    pub async fn connect(mut self, url: &str) -> Result<Pool> {
        self.conn = Config::parse(url)?;
        Pool::connect_with(self).await
    }

    pub fn connect_lazy(mut self, url: &str) -> Result<Pool> {
        self.conn = Config::parse(url)?;
        Ok(Pool::connect_lazy_with(self))
    }
}
