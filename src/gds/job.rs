use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::hash::HashTable;
use super::Gds;
use crate::error::{PmixError, Result};
use crate::keys;
use crate::types::Version;
use crate::value::{Info, Kval};

/// The attributes of one cluster node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInfo {
    pub nodeid: Option<u32>,
    pub hostname: Option<String>,
    /// other names the node answers to
    pub aliases: Vec<String>,
    pub info: Vec<Kval>,
}

impl NodeInfo {
    /// true if `name` is the node's hostname or one of its aliases
    pub fn answers_to(&self, name: &str) -> bool {
        self.hostname.as_deref() == Some(name) || self.aliases.iter().any(|a| a == name)
    }

    /// Builds a node from the elements of a node-info array. The hostname, nodeid and alias
    /// entries become fields; everything else is kept as node info.
    pub fn from_array(array: &[Info]) -> Result<Self> {
        let mut node = NodeInfo::default();
        for item in array {
            match item.key.as_str() {
                keys::HOSTNAME => {
                    let name = item.value.as_str().ok_or_else(|| {
                        PmixError::BadParam(format!("hostname is not a string: {:?}", item.value))
                    })?;
                    node.hostname = Some(name.to_string());
                }
                keys::NODEID => node.nodeid = Some(item.value.get_number()?),
                keys::HOSTNAME_ALIASES => {
                    if let Some(list) = item.value.as_str() {
                        node.aliases = list.split(',').map(String::from).collect();
                    }
                    node.info.push(item.clone());
                }
                _ => node.info.push(item.clone()),
            }
        }
        if node.hostname.is_none() && node.nodeid.is_none() {
            return Err(PmixError::BadParam("node info array names no node".into()));
        }
        Ok(node)
    }
}

/// Finds a node by hostname (or alias) in `nodes`.
pub fn get_nodeinfo_by_nodename<'a>(nodes: &'a [NodeInfo], hostname: &str) -> Option<&'a NodeInfo> {
    nodes.iter().find(|n| n.answers_to(hostname))
}

/// One application of a job along with the nodes it spans.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppInfo {
    pub appnum: u32,
    pub appinfo: Vec<Kval>,
    pub nodeinfo: Vec<NodeInfo>,
}

impl AppInfo {
    /// Builds an application from the elements of an app-info array. Nested node-info arrays
    /// become the application's node list.
    pub fn from_array(array: &[Info]) -> Result<Self> {
        let mut app = AppInfo::default();
        let mut have_appnum = false;
        for item in array {
            match item.key.as_str() {
                keys::APPNUM => {
                    app.appnum = item.value.get_number()?;
                    have_appnum = true;
                }
                keys::NODE_INFO_ARRAY => {
                    let nodes = item.value.as_array().ok_or_else(|| {
                        PmixError::BadParam("node info array is not an array".into())
                    })?;
                    app.nodeinfo.push(NodeInfo::from_array(nodes)?);
                }
                _ => app.appinfo.push(item.clone()),
            }
        }
        if !have_appnum {
            return Err(PmixError::BadParam("app info array carries no appnum".into()));
        }
        Ok(app)
    }
}

/// Everything known about one namespace.
pub struct JobTracker {
    pub nspace: String,
    /// protocol version of the namespace's processes
    pub version: Version,
    pub nprocs: u32,
    /// per-rank and job-wide records
    pub hashtab: HashTable,
    pub nodeinfo: Vec<NodeInfo>,
    pub apps: Vec<AppInfo>,
    pub jobinfo: Vec<Kval>,
    /// where queries go that cannot be answered here
    pub fallback: Arc<dyn Gds>,
}

impl fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobTracker")
            .field("nspace", &self.nspace)
            .field("version", &self.version)
            .field("nprocs", &self.nprocs)
            .field("records", &self.hashtab.len())
            .field("nodes", &self.nodeinfo.len())
            .field("apps", &self.apps.len())
            .field("jobinfo", &self.jobinfo.len())
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl JobTracker {
    pub fn new(nspace: impl Into<String>, fallback: Arc<dyn Gds>) -> Self {
        JobTracker {
            nspace: nspace.into(),
            version: Version::CURRENT,
            nprocs: 0,
            hashtab: HashTable::new(),
            nodeinfo: vec![],
            apps: vec![],
            jobinfo: vec![],
            fallback,
        }
    }

    /// Routes one job-level record to where it belongs: node and app arrays become records,
    /// the job size and peer version update the tracker, anything else is job info.
    pub fn ingest(&mut self, kv: Kval) -> Result<()> {
        match kv.key.as_str() {
            keys::NODE_INFO_ARRAY => {
                let array = kv
                    .value
                    .as_array()
                    .ok_or_else(|| PmixError::BadParam("node info array is not an array".into()))?;
                let node = NodeInfo::from_array(array)?;
                debug!(nspace = %self.nspace, hostname = ?node.hostname, nodeid = ?node.nodeid, "adding node");
                self.upsert_node(node);
            }
            keys::APP_INFO_ARRAY => {
                let array = kv
                    .value
                    .as_array()
                    .ok_or_else(|| PmixError::BadParam("app info array is not an array".into()))?;
                let app = AppInfo::from_array(array)?;
                debug!(nspace = %self.nspace, appnum = app.appnum, "adding app");
                match self.apps.iter_mut().find(|a| a.appnum == app.appnum) {
                    Some(existing) => *existing = app,
                    None => self.apps.push(app),
                }
            }
            keys::VERSION_INFO => {
                let text = kv
                    .value
                    .as_str()
                    .ok_or_else(|| PmixError::BadParam("version is not a string".into()))?;
                self.version = parse_version(text)?;
            }
            _ => {
                if kv.key == keys::JOB_SIZE {
                    self.nprocs = kv.value.get_number()?;
                }
                match self.jobinfo.iter_mut().find(|j| j.key == kv.key) {
                    Some(existing) => *existing = kv,
                    None => self.jobinfo.push(kv),
                }
            }
        }
        Ok(())
    }

    fn upsert_node(&mut self, node: NodeInfo) {
        let existing = self.nodeinfo.iter_mut().find(|n| {
            (node.nodeid.is_some() && n.nodeid == node.nodeid)
                || (node.hostname.is_some() && n.hostname == node.hostname)
        });
        match existing {
            Some(n) => *n = node,
            None => self.nodeinfo.push(node),
        }
    }
}

/// parses "major.minor" (any further components are ignored)
fn parse_version(text: &str) -> Result<Version> {
    let mut parts = text.split('.');
    let mut next = || -> Result<u8> {
        parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .ok_or_else(|| PmixError::Parsing(format!("could not parse version: {}", text)))
    };
    let major = next()?;
    let minor = next()?;
    Ok(Version::new(major, minor))
}
