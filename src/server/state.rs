use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::codec::Buffer;
use crate::command::ModexData;
use crate::error::{PmixError, Result, SUCCESS};
use crate::keys;
use crate::types::{Proc, Rank};
use crate::value::Kval;

/// A namespace known to the server.
#[derive(Debug, Clone)]
pub struct Namespace {
    pub nprocs: u32,
    /// job-level records handed to every client of the namespace at init
    pub job_data: Vec<Kval>,
}

// a fence in progress, keyed by its participant signature
struct Collective {
    expected: usize,
    collect: bool,
    waiters: Vec<Sender<Vec<u8>>>,
}

/// State shared by every connection of a server.
///
/// Namespaces and committed data live in concurrent maps. Collectives are tracked under a
/// single lock, since arriving at a fence and releasing it must happen atomically.
#[derive(Default)]
pub struct ServerState {
    namespaces: DashMap<String, Namespace>,
    commits: DashMap<Proc, Vec<u8>>,
    collectives: Mutex<HashMap<Vec<Proc>, Collective>>,
}

impl ServerState {
    pub fn new() -> Self {
        ServerState::default()
    }

    /// Registers (or replaces) `nspace` with `nprocs` processes. A job size record is added
    /// to `job_data` unless it already carries one.
    pub fn register_nspace(&self, nspace: &str, nprocs: u32, mut job_data: Vec<Kval>) {
        if !job_data.iter().any(|kv| kv.key == keys::JOB_SIZE) {
            job_data.insert(0, Kval::new(keys::JOB_SIZE, nprocs));
        }
        info!(nspace, nprocs, records = job_data.len(), "registered namespace");
        self.namespaces
            .insert(nspace.to_string(), Namespace { nprocs, job_data });
    }

    /// the job-level records of `nspace`
    pub fn job_info(&self, nspace: &str) -> Result<Vec<Kval>> {
        self.namespaces
            .get(nspace)
            .map(|ns| ns.job_data.clone())
            .ok_or(PmixError::NotFound)
    }

    /// Appends `blob` to the data committed by `proc` since the last fence that collected it.
    ///
    /// # Errors
    /// `BadParam` unless `proc` names a single process, `NotFound` for an unknown namespace
    pub fn commit(&self, proc: Proc, blob: Vec<u8>) -> Result<()> {
        if !proc.rank.is_valid() {
            return Err(PmixError::BadParam(format!("cannot commit on behalf of {}", proc)));
        }
        if !self.namespaces.contains_key(&proc.nspace) {
            return Err(PmixError::NotFound);
        }
        debug!(%proc, bytes = blob.len(), "data committed");
        self.commits.entry(proc).or_default().extend_from_slice(&blob);
        Ok(())
    }

    /// Drops whatever `proc` committed and nobody collected yet.
    pub fn finalize(&self, proc: &Proc) {
        if let Some((_, blob)) = self.commits.remove(proc) {
            debug!(%proc, bytes = blob.len(), "uncollected data dropped");
        }
    }

    /// number of processes that must arrive before a fence across `procs` completes
    fn expected(&self, procs: &[Proc]) -> Result<usize> {
        // a wildcard already counts every rank of its namespace
        let whole: HashSet<&str> = procs
            .iter()
            .filter(|p| p.rank == Rank::Wildcard)
            .map(|p| p.nspace.as_str())
            .collect();
        let mut total = 0;
        for p in procs {
            total += match p.rank {
                Rank::Rank(_) if whole.contains(p.nspace.as_str()) => 0,
                Rank::Rank(_) => 1,
                Rank::Wildcard => self
                    .namespaces
                    .get(&p.nspace)
                    .map(|ns| ns.nprocs as usize)
                    .ok_or(PmixError::NotFound)?,
                Rank::Undef => {
                    return Err(PmixError::BadParam(format!("{} cannot take part in a fence", p)))
                }
            };
        }
        Ok(total)
    }

    /// Arrives at the fence across `procs`. The returned channel yields the reply once every
    /// participant has arrived; the last one to arrive releases everybody.
    pub fn fence(&self, procs: &[Proc], collect: bool) -> Result<Receiver<Vec<u8>>> {
        let signature = signature(procs);
        let expected = self.expected(&signature)?;
        let (tx, rx) = channel::bounded(1);

        let mut collectives = self.lock_collectives();
        let tracker = collectives.entry(signature.clone()).or_insert_with(|| Collective {
            expected,
            collect: false,
            waiters: vec![],
        });
        tracker.collect |= collect;
        tracker.waiters.push(tx);
        debug!(arrived = tracker.waiters.len(), expected, "fence arrival");

        if tracker.waiters.len() >= tracker.expected {
            if let Some(done) = collectives.remove(&signature) {
                drop(collectives);
                self.release(&signature, done)?;
            }
        }
        Ok(rx)
    }

    /// Gives up on the fence across `procs`, answering everyone still waiting with `err`.
    pub fn abort_fence(&self, procs: &[Proc], err: &PmixError) {
        let signature = signature(procs);
        if let Some(tracker) = self.lock_collectives().remove(&signature) {
            warn!(waiting = tracker.waiters.len(), "aborting fence: {}", err);
            let reply = status_reply(err.status());
            for w in tracker.waiters {
                let _ = w.send(reply.clone());
            }
        }
    }

    fn release(&self, signature: &[Proc], tracker: Collective) -> Result<()> {
        let blobs = if tracker.collect {
            self.take_blobs(signature)
        } else {
            vec![]
        };
        let mut reply = Buffer::new();
        reply.pack(&SUCCESS)?;
        reply.pack(&blobs.len())?;
        reply.pack_array(&blobs)?;
        let reply = reply.into_bytes();

        info!(participants = tracker.waiters.len(), blobs = blobs.len(), "fence complete");
        for w in tracker.waiters {
            // a participant that disconnected in the meantime no longer listens
            let _ = w.send(reply.clone());
        }
        Ok(())
    }

    /// removes and returns the data committed by the participants of `signature`
    fn take_blobs(&self, signature: &[Proc]) -> Vec<ModexData> {
        let mut owners: Vec<Proc> = self
            .commits
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|owner| {
                signature
                    .iter()
                    .any(|p| p.nspace == owner.nspace && (p.rank == Rank::Wildcard || p.rank == owner.rank))
            })
            .collect();
        owners.sort();
        owners
            .into_iter()
            .filter_map(|owner| self.commits.remove(&owner))
            .map(|(owner, blob)| ModexData::new(owner, blob))
            .collect()
    }

    fn lock_collectives(&self) -> MutexGuard<'_, HashMap<Vec<Proc>, Collective>> {
        // a panic while holding the lock cannot leave a tracker half updated
        self.collectives.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// the sorted, de-duplicated participant list that identifies a collective
fn signature(procs: &[Proc]) -> Vec<Proc> {
    let mut sig = procs.to_vec();
    sig.sort();
    sig.dedup();
    sig
}

/// a reply that carries only a status
pub fn status_reply(status: i32) -> Vec<u8> {
    let mut reply = Buffer::new();
    // packing an integer cannot fail
    let _ = reply.pack(&status);
    reply.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ServerState {
        let state = ServerState::new();
        state.register_nspace("job", 2, vec![]);
        state
    }

    fn reply_blobs(bytes: Vec<u8>) -> Vec<ModexData> {
        let mut b = Buffer::load(bytes);
        assert_eq!(b.unpack::<i32>().unwrap(), SUCCESS);
        let n: usize = b.unpack().unwrap();
        b.unpack_array(n).unwrap()
    }

    #[test]
    fn job_size_is_added_at_registration() {
        let state = state();
        let data = state.job_info("job").unwrap();
        assert_eq!(data[0], Kval::new(keys::JOB_SIZE, 2u32));
        assert!(matches!(state.job_info("other"), Err(PmixError::NotFound)));
    }

    #[test]
    fn fence_releases_on_last_arrival() {
        let state = state();
        state.commit(Proc::new("job", Rank::Rank(0)), b"a\n".to_vec()).unwrap();
        state.commit(Proc::new("job", Rank::Rank(1)), b"b\n".to_vec()).unwrap();
        let all = [Proc::new("job", Rank::Wildcard)];

        let first = state.fence(&all, true).unwrap();
        assert!(first.try_recv().is_err());
        let second = state.fence(&all, false).unwrap();

        let blobs = reply_blobs(first.recv().unwrap());
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[1].blob, b"b\n".to_vec());
        assert_eq!(reply_blobs(second.recv().unwrap()).len(), 2);
    }

    #[test]
    fn collected_data_is_not_sent_twice() {
        let state = state();
        let all = [Proc::new("job", Rank::Wildcard)];
        let me = Proc::new("job", Rank::Rank(0));
        for round in 0..2u8 {
            state.commit(me.clone(), vec![b'0' + round, b'\n']).unwrap();
            let first = state.fence(&all, true).unwrap();
            let second = state.fence(&all, true).unwrap();
            let blobs = reply_blobs(first.recv().unwrap());
            assert_eq!(blobs.len(), 1);
            assert_eq!(blobs[0].blob, vec![b'0' + round, b'\n']);
            assert_eq!(reply_blobs(second.recv().unwrap()).len(), 1);
        }
    }

    #[test]
    fn data_waits_for_a_collecting_fence() {
        let state = state();
        let all = [Proc::new("job", Rank::Wildcard)];
        state.commit(Proc::new("job", Rank::Rank(1)), b"b\n".to_vec()).unwrap();
        let _ = state.fence(&all, false).unwrap();
        let rx = state.fence(&all, false).unwrap();
        assert!(reply_blobs(rx.recv().unwrap()).is_empty());

        let _ = state.fence(&all, true).unwrap();
        let rx = state.fence(&all, false).unwrap();
        assert_eq!(reply_blobs(rx.recv().unwrap())[0].blob, b"b\n".to_vec());
    }

    #[test]
    fn finalize_drops_uncollected_data() {
        let state = state();
        let me = Proc::new("job", Rank::Rank(0));
        state.commit(me.clone(), b"a\n".to_vec()).unwrap();
        state.finalize(&me);
        let all = [Proc::new("job", Rank::Wildcard)];
        let _ = state.fence(&all, true).unwrap();
        let rx = state.fence(&all, true).unwrap();
        assert!(reply_blobs(rx.recv().unwrap()).is_empty());
    }

    #[test]
    fn wildcard_covers_named_ranks_of_its_namespace() {
        let state = state();
        state.register_nspace("other", 3, vec![]);
        let mixed = [Proc::new("job", Rank::Wildcard), Proc::new("job", Rank::Rank(0))];
        let first = state.fence(&mixed, false).unwrap();
        let second = state.fence(&mixed, false).unwrap();
        assert!(reply_blobs(first.recv().unwrap()).is_empty());
        assert!(reply_blobs(second.recv().unwrap()).is_empty());

        // ranks of another namespace still count on their own
        let across = [Proc::new("job", Rank::Wildcard), Proc::new("other", Rank::Rank(2))];
        assert_eq!(state.expected(&signature(&across)).unwrap(), 3);
    }

    #[test]
    fn participant_order_does_not_matter() {
        let state = state();
        let a = [Proc::new("job", Rank::Rank(1)), Proc::new("job", Rank::Rank(0))];
        let b = [Proc::new("job", Rank::Rank(0)), Proc::new("job", Rank::Rank(1))];
        let first = state.fence(&a, false).unwrap();
        let second = state.fence(&b, false).unwrap();
        assert!(reply_blobs(first.recv().unwrap()).is_empty());
        assert!(reply_blobs(second.recv().unwrap()).is_empty());
    }

    #[test]
    fn unknown_namespace_cannot_fence() {
        let state = state();
        let r = state.fence(&[Proc::new("nope", Rank::Wildcard)], false);
        assert!(matches!(r, Err(PmixError::NotFound)));
        let r = state.commit(Proc::new("job", Rank::Wildcard), vec![]);
        assert!(matches!(r, Err(PmixError::BadParam(_))));
    }

    #[test]
    fn aborted_fence_reports_the_error() {
        let state = state();
        let all = [Proc::new("job", Rank::Wildcard)];
        let rx = state.fence(&all, false).unwrap();
        state.abort_fence(&all, &PmixError::Timeout);
        let mut b = Buffer::load(rx.recv().unwrap());
        assert_eq!(b.unpack::<i32>().unwrap(), PmixError::Timeout.status());
    }
}
