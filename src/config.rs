use std::env;
use std::net::SocketAddr;
use clap::arg_enum;

use crate::error::{PmixError, Result};
use crate::types::{Proc, ProcContext, Rank};

/// the address a server listens on when none is given
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:4000";

/// Settings a client process starts with.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// the namespace (job) this process belongs to
    pub nspace: String,
    /// this process's rank in `nspace`
    pub rank: u32,
    /// the node this process runs on
    pub hostname: String,
    /// the application this process belongs to
    pub appnum: u32,
    /// where the local server listens
    pub server_addr: SocketAddr,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            nspace: "pmix-job".to_string(),
            rank: 0,
            hostname: env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            appnum: 0,
            server_addr: SocketAddr::from(([127, 0, 0, 1], 4000)),
        }
    }
}

impl ClientConfig {
    /// Builds a config from the `PMIX_NAMESPACE`, `PMIX_RANK`, `PMIX_HOSTNAME`, `PMIX_APPNUM`
    /// and `PMIX_SERVER_URI` environment variables, using defaults for the unset ones.
    ///
    /// # Errors
    /// returns [`PmixError::Parsing`] if a variable is set to something unparsable
    pub fn from_env() -> Result<Self> {
        let mut config = ClientConfig::default();
        if let Ok(nspace) = env::var("PMIX_NAMESPACE") {
            config.nspace = nspace;
        }
        if let Ok(rank) = env::var("PMIX_RANK") {
            config.rank = parse_var("PMIX_RANK", &rank)?;
        }
        if let Ok(hostname) = env::var("PMIX_HOSTNAME") {
            config.hostname = hostname;
        }
        if let Ok(appnum) = env::var("PMIX_APPNUM") {
            config.appnum = parse_var("PMIX_APPNUM", &appnum)?;
        }
        if let Ok(uri) = env::var("PMIX_SERVER_URI") {
            config.server_addr = parse_addr(&uri)?;
        }
        Ok(config)
    }

    /// the proc this config describes
    pub fn proc(&self) -> Proc {
        Proc::new(self.nspace.clone(), Rank::Rank(self.rank))
    }

    /// the process identity handed to the data store
    pub fn context(&self) -> ProcContext {
        ProcContext::new(self.proc(), self.hostname.clone(), self.appnum)
    }
}

// the worker pool a server services its connections with
arg_enum! {
    #[allow(non_camel_case_types)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum PoolKind {
        naive,
        shared,
        rayon
    }
}

/// Settings a server starts with.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// number of worker threads; every connected client occupies one for its lifetime
    pub threads: u32,
    pub pool: PoolKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: SocketAddr::from(([127, 0, 0, 1], 4000)),
            threads: 64,
            pool: PoolKind::shared,
        }
    }
}

/// parses an `IP_ADDR:PORT` string
pub fn parse_addr(addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|_| PmixError::Parsing(format!("could not parse {} into an IP address and port", addr)))
}

fn parse_var(name: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| PmixError::Parsing(format!("{}={} is not a number", name, value)))
}
