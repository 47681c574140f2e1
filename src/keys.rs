//! Well-known attribute keys.

// qualifiers understood by the fetch engine
pub const SESSION_INFO: &str = "pmix.ssn.info";
pub const NODE_INFO: &str = "pmix.nodeinfo";
pub const APP_INFO: &str = "pmix.appinfo";
pub const NODEID: &str = "pmix.nodeid";
pub const HOSTNAME: &str = "pmix.hname";
pub const HOSTNAME_ALIASES: &str = "pmix.alias";
pub const APPNUM: &str = "pmix.appnum";

// aggregate record keys
pub const NODE_INFO_ARRAY: &str = "pmix.node.info";
pub const APP_INFO_ARRAY: &str = "pmix.app.info";

// job-level keys
pub const JOB_SIZE: &str = "pmix.job.size";
pub const VERSION_INFO: &str = "pmix.version";
pub const RANK: &str = "pmix.rank";

// node-level keys
pub const LOCAL_PEERS: &str = "pmix.lpeers";
pub const LOCAL_SIZE: &str = "pmix.local.size";
pub const NODE_SIZE: &str = "pmix.node.size";
pub const LOCALLDR: &str = "pmix.lldr";
pub const LOCAL_CPUSETS: &str = "pmix.lcpus";
pub const AVAIL_PHYS_MEMORY: &str = "pmix.pmem";
pub const NODE_OVERSUBSCRIBED: &str = "pmix.ndosub";

// app-level keys
pub const APP_SIZE: &str = "pmix.app.size";
pub const APPLDR: &str = "pmix.aldr";
pub const APP_ARGV: &str = "pmix.app.argv";
pub const WDIR: &str = "pmix.wdir";
pub const APP_MAP_TYPE: &str = "pmix.apmap.type";
pub const APP_MAP_REGEX: &str = "pmix.apmap.regex";

// server-side fence directive
pub const TIMEOUT: &str = "pmix.timeout";

const NODE_LEVEL_KEYS: &[&str] = &[
    LOCAL_PEERS,
    LOCAL_SIZE,
    NODE_SIZE,
    LOCALLDR,
    LOCAL_CPUSETS,
    AVAIL_PHYS_MEMORY,
    NODE_OVERSUBSCRIBED,
    HOSTNAME_ALIASES,
];

const APP_LEVEL_KEYS: &[&str] = &[APP_SIZE, APPLDR, APP_ARGV, WDIR, APP_MAP_TYPE, APP_MAP_REGEX];

/// true if `key` names an attribute that lives at node scope
pub fn is_node_info(key: &str) -> bool {
    NODE_LEVEL_KEYS.contains(&key)
}

/// true if `key` names an attribute that lives at application scope
pub fn is_app_info(key: &str) -> bool {
    APP_LEVEL_KEYS.contains(&key)
}
