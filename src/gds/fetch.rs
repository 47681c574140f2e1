use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use super::job::JobTracker;
use super::scoped::{fetch_appinfo, fetch_nodeinfo};
use super::{Gds, NullGds};
use crate::error::{PmixError, Result};
use crate::keys;
use crate::types::{Proc, ProcContext, Rank, Scope, Version};
use crate::value::{Info, Kval};

/// The hash-indexed data store.
///
/// Holds one [`JobTracker`] per namespace. Trackers are created by the store paths
/// ([`HashGds::store`], [`HashGds::store_job_info`], [`HashGds::register_job`]); the fetch path
/// requires the tracker to exist already.
///
/// The store does no locking of its own. Whoever shares it across threads must serialize access.
pub struct HashGds {
    ctx: Arc<ProcContext>,
    jobs: HashMap<String, JobTracker>,
    // handed to every tracker created by this store
    fallback: Arc<dyn Gds>,
}

impl HashGds {
    /// creates an empty store whose fallback never finds anything
    pub fn new(ctx: Arc<ProcContext>) -> Self {
        HashGds::with_fallback(ctx, Arc::new(NullGds))
    }

    /// creates an empty store that hands unanswerable queries to `fallback`
    pub fn with_fallback(ctx: Arc<ProcContext>, fallback: Arc<dyn Gds>) -> Self {
        HashGds {
            ctx,
            jobs: HashMap::new(),
            fallback,
        }
    }

    /// the identity of the process owning this store
    pub fn context(&self) -> &ProcContext {
        &self.ctx
    }

    /// looks up the tracker for `nspace`
    ///
    /// # Errors
    /// `NotFound` if nothing was ever stored for `nspace`
    pub fn get_job_tracker(&self, nspace: &str) -> Result<&JobTracker> {
        self.jobs.get(nspace).ok_or(PmixError::NotFound)
    }

    /// looks up the tracker for `nspace`, creating it when `create` is set
    pub fn get_job_tracker_mut(&mut self, nspace: &str, create: bool) -> Result<&mut JobTracker> {
        if !self.jobs.contains_key(nspace) {
            if !create {
                return Err(PmixError::NotFound);
            }
            debug!(nspace, "creating job tracker");
            let job = JobTracker::new(nspace, Arc::clone(&self.fallback));
            self.jobs.insert(nspace.to_string(), job);
        }
        self.jobs.get_mut(nspace).ok_or(PmixError::NotFound)
    }

    /// creates (or updates) the tracker for `nspace` with a known size and peer version
    pub fn register_job(&mut self, nspace: &str, nprocs: u32, version: Version) -> Result<()> {
        let job = self.get_job_tracker_mut(nspace, true)?;
        job.nprocs = nprocs;
        job.version = version;
        Ok(())
    }

    /// Stores `kv` for `proc`. A concrete rank beyond the known size of the namespace grows it,
    /// so that searches across all ranks will visit it.
    pub fn store(&mut self, proc: &Proc, kv: Kval) -> Result<()> {
        let job = self.get_job_tracker_mut(&proc.nspace, true)?;
        debug!(proc = %proc, key = %kv.key, "storing record");
        job.hashtab.store(proc.rank, kv)?;
        if let Rank::Rank(r) = proc.rank {
            if r >= job.nprocs {
                job.nprocs = r + 1;
            }
        }
        Ok(())
    }

    /// stores the job-level records of `nspace`, routing node and app arrays to their records
    pub fn store_job_info(&mut self, nspace: &str, kvs: Vec<Kval>) -> Result<()> {
        let job = self.get_job_tracker_mut(nspace, true)?;
        for kv in kvs {
            job.ingest(kv)?;
        }
        Ok(())
    }

    /// drops everything known about `nspace`
    pub fn remove_job(&mut self, nspace: &str) -> Result<()> {
        self.jobs.remove(nspace).map(|_| ()).ok_or(PmixError::NotFound)
    }
}

/// Visits every rank of the namespace, then the job-level records. With a key, the first hit
/// ends the search. Returns whether anything was added to `out`.
fn search_all_ranks(job: &JobTracker, key: Option<&str>, out: &mut Vec<Kval>) -> Result<bool> {
    let start = out.len();
    for rank in 0..job.nprocs {
        match job.hashtab.fetch(Rank::Rank(rank), key, out) {
            Ok(()) if key.is_some() => return Ok(true),
            Ok(()) | Err(PmixError::NotFound) => {}
            Err(e) => return Err(e),
        }
    }
    for kv in &job.jobinfo {
        if key.map_or(true, |k| kv.check_key(k)) {
            out.try_reserve(1).map_err(|_| PmixError::NoMem)?;
            out.push(kv.clone());
            if key.is_some() {
                return Ok(true);
            }
        }
    }
    if key.is_none() {
        // job data may also have arrived through the wildcard bucket
        match job.hashtab.fetch(Rank::Wildcard, None, out) {
            Ok(()) | Err(PmixError::NotFound) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(out.len() > start)
}

/// the wildcard bucket first, then the job-level records
fn search_job_level(job: &JobTracker, key: Option<&str>, out: &mut Vec<Kval>) -> Result<bool> {
    let start = out.len();
    match job.hashtab.fetch(Rank::Wildcard, key, out) {
        Ok(()) if key.is_some() => return Ok(true),
        Ok(()) | Err(PmixError::NotFound) => {}
        Err(e) => return Err(e),
    }
    for kv in &job.jobinfo {
        if key.map_or(true, |k| kv.check_key(k)) {
            out.try_reserve(1).map_err(|_| PmixError::NoMem)?;
            out.push(kv.clone());
            if key.is_some() {
                break;
            }
        }
    }
    Ok(out.len() > start)
}

impl Gds for HashGds {
    fn name(&self) -> &str {
        "hash"
    }

    /// Resolves a query against the namespace of `proc`.
    ///
    /// Scope qualifiers (or, lacking them, the key's name) route non-concrete ranks to node or
    /// application data. A wildcard rank whose scoped lookup fails gets a second chance through
    /// the generic search; an undefined rank does not. Whatever the generic search cannot
    /// answer goes to the fallback store, whose result is returned as is.
    ///
    /// Results are always independent copies; `copy` is only forwarded to the fallback.
    ///
    /// # Errors
    /// `NotFound` if the namespace has no tracker; otherwise the scoped lookup's or the
    /// fallback's error
    #[instrument(skip(self, proc, qualifiers, out), fields(proc = %proc))]
    fn fetch(
        &self,
        proc: &Proc,
        scope: Scope,
        copy: bool,
        key: Option<&str>,
        qualifiers: &[Info],
        out: &mut Vec<Kval>,
    ) -> Result<()> {
        let job = self.get_job_tracker(&proc.nspace).map_err(|e| {
            error!("no job tracker for {}", proc.nspace);
            e
        })?;

        let mut nodeinfo = false;
        let mut appinfo = false;
        let mut nigiven = false;
        let mut apigiven = false;
        for q in qualifiers {
            if q.check_key(keys::SESSION_INFO) {
                // session data isn't kept here
                return job.fallback.fetch(proc, scope, copy, key, qualifiers, out);
            } else if q.check_key(keys::NODE_INFO) {
                nodeinfo = q.is_true();
                nigiven = true;
            } else if q.check_key(keys::APP_INFO) {
                appinfo = q.is_true();
                apigiven = true;
            }
        }
        // legacy callers name node/app keys without the matching qualifier
        if let Some(k) = key {
            if !nigiven && !apigiven {
                if keys::is_node_info(k) {
                    nodeinfo = true;
                } else if keys::is_app_info(k) {
                    appinfo = true;
                }
            }
        }

        if !proc.rank.is_valid() {
            let scoped = if nodeinfo {
                Some(fetch_nodeinfo(&self.ctx, key, job, &job.nodeinfo, qualifiers, out))
            } else if appinfo {
                Some(fetch_appinfo(&self.ctx, key, job, &job.apps, qualifiers, out))
            } else {
                None
            };
            match scoped {
                None => {}
                Some(Ok(())) => return Ok(()),
                Some(Err(PmixError::NoMem)) => return Err(PmixError::NoMem),
                Some(Err(e)) if proc.rank == Rank::Wildcard => {
                    debug!("scoped lookup failed ({}), searching job-wide", e);
                }
                Some(Err(e)) => return Err(e),
            }
        }

        let found = match proc.rank {
            Rank::Undef => search_all_ranks(job, key, out)?,
            Rank::Wildcard => search_job_level(job, key, out)?,
            Rank::Rank(_) => match job.hashtab.fetch(proc.rank, key, out) {
                Ok(()) => true,
                Err(PmixError::NotFound) => false,
                Err(e) => return Err(e),
            },
        };
        if found {
            return Ok(());
        }
        debug!("not held locally, asking {}", job.fallback.name());
        job.fallback.fetch(proc, scope, copy, key, qualifiers, out)
    }
}
