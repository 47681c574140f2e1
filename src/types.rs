use std::fmt;
use serde::{Deserialize, Serialize};

/// The rank of a process within its namespace.
///
/// Besides a concrete rank, two sentinels exist: `Wildcard` addresses the job as a whole,
/// and `Undef` means "unknown, search every rank of the namespace".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rank {
    /// a concrete rank
    Rank(u32),
    /// job-wide data
    Wildcard,
    /// unknown rank
    Undef,
}

impl Rank {
    /// true only for a concrete rank
    pub fn is_valid(&self) -> bool {
        matches!(self, Rank::Rank(_))
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::Rank(r) => write!(f, "{}", r),
            Rank::Wildcard => write!(f, "WILDCARD"),
            Rank::Undef => write!(f, "UNDEF"),
        }
    }
}

/// identifies a single process (or, with a sentinel rank, a group of them)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Proc {
    /// the namespace (job) the process belongs to
    pub nspace: String,
    /// the process's rank within the namespace
    pub rank: Rank,
}

impl Proc {
    /// builds a proc from a namespace and rank
    pub fn new(nspace: impl Into<String>, rank: Rank) -> Self {
        Proc {
            nspace: nspace.into(),
            rank,
        }
    }
}

impl fmt::Display for Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.nspace, self.rank)
    }
}

/// The level of visibility a piece of posted data has
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// no scope given
    Undef,
    /// only visible to processes on the same node
    Local,
    /// only visible to processes on other nodes
    Remote,
    /// visible to everyone
    Global,
    /// kept within the posting process
    Internal,
}

/// Protocol version of the peers of a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    /// the version spoken by this library
    pub const CURRENT: Version = Version { major: 4, minor: 2 };

    pub fn new(major: u8, minor: u8) -> Self {
        Version { major, minor }
    }

    /// peers before v3.1 cannot parse node-info arrays and expect node data keyed by hostname
    pub fn before_node_info_array(&self) -> bool {
        self.major < 3 || (self.major == 3 && self.minor == 0)
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::CURRENT
    }
}

/// The identity of the running process, established once at start-up and read-only afterwards.
#[derive(Debug, Clone)]
pub struct ProcContext {
    /// who we are
    pub myid: Proc,
    /// the node we are running on
    pub hostname: String,
    /// the application we belong to
    pub appnum: u32,
}

impl ProcContext {
    pub fn new(myid: Proc, hostname: impl Into<String>, appnum: u32) -> Self {
        ProcContext {
            myid,
            hostname: hostname.into(),
            appnum,
        }
    }
}
