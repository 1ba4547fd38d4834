use std::{fmt::Debug, time::Duration};

use crate::{map_err, SourceResult, DEFAULT_TIMEOUT, REDIS_PORT};
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use streambus_types::BusErr;
use tokio::time::{sleep, timeout};
use url::Url;

/// Consecutive failed redials before a lane is given up for good.
const MAX_REDIALS: u32 = 8;

/// Delay between redials; grows linearly with the failure count.
const REDIAL_DELAY: Duration = Duration::from_millis(500);

/// One connection lane of [`RedisSource`](crate::RedisSource).
///
/// There is no background reconnect here: a fetch error is reported to the
/// affected sinks and the lane merely drops its connection, because the next
/// pull cycle comes back through [`Lane::get`] anyway and dials afresh.
/// Consecutive failed dials back off, and after [`MAX_REDIALS`] of them the
/// lane stays down.
pub(crate) struct Lane {
    info: ConnectionInfo,
    dial_timeout: Duration,
    conn: Option<redis::aio::Connection>,
    failures: u32,
}

impl Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lane")
            .field("alive", &self.conn.is_some())
            .field("failures", &self.failures)
            .finish()
    }
}

impl Lane {
    /// Dial the lane. Fails fast, so a misconfigured source is caught at
    /// construction rather than on the first pull cycle.
    pub async fn open(url: &Url, options: &RedisConnectOptions) -> SourceResult<Self> {
        let info = connection_info(url, options)?;
        let dial_timeout = options.timeout().unwrap_or(DEFAULT_TIMEOUT);
        let conn = dial(&info, dial_timeout).await?;
        Ok(Self {
            info,
            dial_timeout,
            conn: Some(conn),
            failures: 0,
        })
    }

    /// Drop the connection; the next [`Lane::get`] dials again.
    pub fn reconnect(&mut self) {
        self.conn = None;
    }

    /// Take the lane down for good.
    pub fn shutdown(&mut self) {
        self.conn = None;
        self.failures = MAX_REDIALS;
    }

    /// The live connection, dialling first if it was dropped.
    pub async fn get(&mut self) -> SourceResult<&mut redis::aio::Connection> {
        if self.conn.is_none() {
            if self.failures >= MAX_REDIALS {
                return Err(BusErr::Connect(format!(
                    "Connection to {} is gone",
                    self.info.addr
                )));
            }
            if self.failures > 0 {
                sleep(REDIAL_DELAY * self.failures).await;
            }
            match dial(&self.info, self.dial_timeout).await {
                Ok(conn) => {
                    self.failures = 0;
                    self.conn = Some(conn);
                }
                Err(err) => {
                    self.failures += 1;
                    return Err(err);
                }
            }
        }
        Ok(self.conn.as_mut().expect("dialled above"))
    }
}

fn connection_info(url: &Url, options: &RedisConnectOptions) -> SourceResult<ConnectionInfo> {
    let Some(host) = url.host_str() else {
        return Err(BusErr::Connect("Host empty".to_owned()));
    };
    let host = host.to_owned();
    let port = url.port().unwrap_or(REDIS_PORT);
    let addr = match url.scheme() {
        "redis" => ConnectionAddr::Tcp(host, port),
        "rediss" => ConnectionAddr::TcpTls {
            host,
            port,
            insecure: options.disable_hostname_verification(),
        },
        "" => return Err(BusErr::Connect("protocol not set".to_owned())),
        protocol => return Err(BusErr::Connect(format!("unknown protocol `{protocol}`"))),
    };
    Ok(ConnectionInfo {
        addr,
        redis: RedisConnectionInfo {
            db: options.db() as i64,
            username: options.username().map(|s| s.to_owned()),
            password: options.password().map(|s| s.to_owned()),
        },
    })
}

async fn dial(info: &ConnectionInfo, dial_timeout: Duration) -> SourceResult<redis::aio::Connection> {
    let client = redis::Client::open(info.clone()).map_err(map_err)?;
    match timeout(dial_timeout, client.get_async_connection()).await {
        Ok(Ok(conn)) => {
            log::debug!("Opened connection to {}", info.addr);
            Ok(conn)
        }
        Ok(Err(err)) => Err(map_err(err)),
        Err(_) => Err(BusErr::Connect(format!(
            "No connection after {dial_timeout:?}"
        ))),
    }
}

#[derive(Debug, Default, Clone)]
pub struct RedisConnectOptions {
    db: u32,
    username: Option<String>,
    password: Option<String>,
    timeout: Option<Duration>,
    disable_hostname_verification: bool,
}

impl RedisConnectOptions {
    /// Defaults to 0.
    pub fn db(&self) -> u32 {
        self.db
    }
    pub fn set_db(&mut self, db: u32) -> &mut Self {
        self.db = db;
        self
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }
    pub fn set_username(&mut self, username: Option<String>) -> &mut Self {
        self.username = username;
        self
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
    pub fn set_password(&mut self, password: Option<String>) -> &mut Self {
        self.password = password;
        self
    }

    /// Timeout for dialling the source. If unset, defaults to [`crate::DEFAULT_TIMEOUT`].
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn disable_hostname_verification(&self) -> bool {
        self.disable_hostname_verification
    }
    /// # Warning
    ///
    /// Only relevant if TLS is enabled and connecting to `rediss://`.
    /// Trust self-signed certificates. This is insecure. Do not use in production.
    pub fn set_disable_hostname_verification(&mut self, bool: bool) -> &mut Self {
        self.disable_hostname_verification = bool;
        self
    }
}
