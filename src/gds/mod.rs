//! This module provides the general data store ("GDS"): a per-namespace cache of process,
//! node, application and job metadata.
//!
//! [`HashGds`] is the store implemented here. Queries it cannot answer are handed to a
//! fallback store, which is any other implementor of the [`Gds`] trait. [`NullGds`] is the
//! fallback of last resort and never finds anything.
use crate::error::{PmixError, Result};
use crate::types::{Proc, Scope};
use crate::value::{Info, Kval};

/// The single capability every data store exposes to the others.
pub trait Gds: Send + Sync {
    /// the name of this store, used in log messages
    fn name(&self) -> &str;

    /// Resolves `key` (or every key, when `None`) for `proc` and appends the records to `out`.
    ///
    /// # Errors
    /// `NotFound` if the store holds nothing matching; other errors are store specific
    fn fetch(
        &self,
        proc: &Proc,
        scope: Scope,
        copy: bool,
        key: Option<&str>,
        qualifiers: &[Info],
        out: &mut Vec<Kval>,
    ) -> Result<()>;
}

/// A store that holds nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullGds;

impl Gds for NullGds {
    fn name(&self) -> &str {
        "null"
    }

    fn fetch(
        &self,
        _proc: &Proc,
        _scope: Scope,
        _copy: bool,
        _key: Option<&str>,
        _qualifiers: &[Info],
        _out: &mut Vec<Kval>,
    ) -> Result<()> {
        Err(PmixError::NotFound)
    }
}

mod fetch;
mod hash;
mod job;
mod scoped;

pub use self::fetch::HashGds;
pub use self::hash::HashTable;
pub use self::job::{get_nodeinfo_by_nodename, AppInfo, JobTracker, NodeInfo};
pub use self::scoped::{fetch_appinfo, fetch_nodeinfo};
