use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::Buffer;
use crate::command::{Cmd, Frame};
use crate::config::ClientConfig;
use crate::error::{status_to_result, PmixError, Result};
use crate::gds::{Gds, HashGds, NullGds};
use crate::transport::{TcpTransport, Transport};
use crate::types::{Proc, ProcContext, Rank, Scope};
use crate::value::{Info, Kval, Value};

pub mod fence;

/// The continuation of a non-blocking operation. It runs exactly once, on the progress loop,
/// after any data carried by the reply has been stored; the store is handed in so that the
/// continuation can read that data.
pub type OpCallback = Box<dyn FnOnce(Result<()>, &HashGds)>;

// runs when the reply to a request arrives, or with the transport error that prevents it
type RecvCallback = Box<dyn FnOnce(&mut HashGds, Result<Buffer>)>;

/// A completion cell shared between a blocking call and the continuation that releases it.
#[derive(Clone, Default)]
pub struct Completion {
    inner: Rc<CompletionState>,
}

#[derive(Default)]
struct CompletionState {
    done: Cell<bool>,
    status: RefCell<Option<Result<()>>>,
}

impl Completion {
    pub fn new() -> Self {
        Completion::default()
    }

    /// true until [`Completion::complete`] is called
    pub fn is_active(&self) -> bool {
        !self.inner.done.get()
    }

    /// records the final status and releases the waiter
    pub fn complete(&self, status: Result<()>) {
        *self.inner.status.borrow_mut() = Some(status);
        self.inner.done.set(true);
    }

    /// takes the recorded status
    pub fn take_status(&self) -> Result<()> {
        self.inner
            .status
            .borrow_mut()
            .take()
            .unwrap_or(Err(PmixError::Init))
    }
}

/// `PmixClient` is one process's connection to its local server, together with the process's
/// copy of the job data.
///
/// The client is single threaded. Replies are only read inside [`PmixClient::progress`], and
/// the blocking calls ([`fence`](PmixClient::fence), [`commit`](PmixClient::commit), ...) spin
/// on `progress` until their reply has been handled.
pub struct PmixClient<T: Transport> {
    transport: T,
    ctx: Arc<ProcContext>,
    gds: HashGds,
    initialized: bool,
    next_tag: u32,
    // receive continuations keyed by request tag
    pending: HashMap<u32, RecvCallback>,
    // data put since the last commit
    staged: Vec<Kval>,
}

impl PmixClient<TcpTransport> {
    /// connects to the server named in `config` and initializes the client
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let transport = TcpTransport::connect(config.server_addr)?;
        PmixClient::init(config, transport)
    }
}

impl<T: Transport> PmixClient<T> {
    /// Initializes a client over `transport`, fetching the job-level data of our namespace.
    ///
    /// # Errors
    /// any error the server reports for the job-data request, `NotFound` included when the
    /// server does not know our namespace
    pub fn init(config: &ClientConfig, transport: T) -> Result<Self> {
        PmixClient::init_with_fallback(config, transport, Arc::new(NullGds))
    }

    /// like [`PmixClient::init`], with `fallback` answering what the local store cannot
    #[instrument(skip(config, transport, fallback), fields(nspace = %config.nspace, rank = config.rank))]
    pub fn init_with_fallback(config: &ClientConfig, transport: T, fallback: Arc<dyn Gds>) -> Result<Self> {
        let ctx = Arc::new(config.context());
        let gds = HashGds::with_fallback(Arc::clone(&ctx), fallback);
        let mut client = PmixClient {
            transport,
            ctx,
            gds,
            initialized: true,
            next_tag: 1,
            pending: HashMap::new(),
            staged: vec![],
        };
        client.fetch_job_info()?;
        info!("client {} initialized", client.ctx.myid);
        Ok(client)
    }

    /// who we are
    pub fn proc(&self) -> &Proc {
        &self.ctx.myid
    }

    /// the local data store
    pub fn gds(&self) -> &HashGds {
        &self.gds
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn fetch_job_info(&mut self) -> Result<()> {
        let mut msg = Buffer::new();
        msg.pack(&Cmd::JobInfo)?;
        msg.pack(&self.ctx.myid.nspace)?;

        let nspace = self.ctx.myid.nspace.clone();
        let completion = Completion::new();
        let c = completion.clone();
        self.send_recv(
            msg,
            Box::new(move |gds: &mut HashGds, reply: Result<Buffer>| {
                let rc = reply.and_then(|mut buf| {
                    status_to_result(buf.unpack()?)?;
                    let n: usize = buf.unpack()?;
                    let kvs: Vec<Kval> = buf.unpack_array(n)?;
                    debug!("received {} job-level records", n);
                    gds.store_job_info(&nspace, kvs)
                });
                c.complete(rc);
            }),
        )?;
        self.wait_for_completion(&completion)
    }

    /// Sends `msg` as a new request and registers `cb` to receive the reply.
    ///
    /// # Errors
    /// a failed send, in which case `cb` is dropped without being called
    fn send_recv(&mut self, msg: Buffer, cb: RecvCallback) -> Result<()> {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1).max(1);
        let frame = Frame {
            tag,
            payload: msg.into_bytes(),
        };
        self.transport.send(&frame)?;
        self.pending.insert(tag, cb);
        Ok(())
    }

    /// Runs one turn of the progress loop: reads the next reply and runs its continuation.
    ///
    /// When the transport fails, every pending continuation is run with the failure before it
    /// is returned.
    pub fn progress(&mut self) -> Result<()> {
        let frame = match self.transport.recv() {
            Ok(frame) => frame,
            Err(e) => {
                error!("transport failed: {}", e);
                let reason = e.to_string();
                for (_, cb) in self.pending.drain() {
                    cb(&mut self.gds, Err(PmixError::LostConnection(reason.clone())));
                }
                return Err(e);
            }
        };
        match self.pending.remove(&frame.tag) {
            Some(cb) => cb(&mut self.gds, Ok(Buffer::load(frame.payload))),
            None => warn!("dropping reply with unknown tag {}", frame.tag),
        }
        Ok(())
    }

    /// spins the progress loop until `completion` is released, then returns its status
    pub fn wait_for_completion(&mut self, completion: &Completion) -> Result<()> {
        while completion.is_active() {
            if let Err(e) = self.progress() {
                if completion.is_active() {
                    return Err(e);
                }
            }
        }
        completion.take_status()
    }

    /// Blocking fence across `procs` (or across our whole namespace when `None`).
    ///
    /// With `collect_data` set, the data committed by the participants is stored locally
    /// before this returns.
    #[instrument(skip(self, procs, qualifiers))]
    pub fn fence(&mut self, procs: Option<&[Proc]>, qualifiers: &[Info], collect_data: bool) -> Result<()> {
        debug!("executing fence");
        let completion = Completion::new();
        let c = completion.clone();
        let nprocs = procs.map_or(0, |p| p.len());
        self.fence_nb(
            procs,
            nprocs,
            qualifiers,
            collect_data,
            Box::new(move |status: Result<()>, _: &HashGds| c.complete(status)),
        )?;
        let rc = self.wait_for_completion(&completion);
        debug!("fence released");
        rc
    }

    /// Non-blocking fence. Returns once the request is sent; `cbfunc` receives the outcome.
    ///
    /// A `None` participant list with `nprocs == 0` means everyone in our namespace.
    ///
    /// # Errors
    /// - `Init` if the client was finalized
    /// - `BadParam` if `nprocs` is non-zero but no list is given, or exceeds the list
    /// - a send failure
    pub fn fence_nb(
        &mut self,
        procs: Option<&[Proc]>,
        nprocs: usize,
        qualifiers: &[Info],
        collect_data: bool,
        cbfunc: OpCallback,
    ) -> Result<()> {
        debug!("fence_nb called");
        if !self.initialized {
            return Err(PmixError::Init);
        }
        let participants: Vec<Proc> = match procs {
            None if nprocs != 0 => {
                return Err(PmixError::BadParam(format!("{} procs given without a list", nprocs)));
            }
            Some(p) if nprocs > p.len() => {
                return Err(PmixError::BadParam(format!(
                    "{} procs claimed, {} given",
                    nprocs,
                    p.len()
                )));
            }
            Some(p) if nprocs > 0 => p[..nprocs].to_vec(),
            _ => vec![Proc::new(self.ctx.myid.nspace.clone(), Rank::Wildcard)],
        };

        let msg = fence::pack_fence(Cmd::FenceNb, &participants, qualifiers, collect_data)?;
        self.send_recv(
            msg,
            Box::new(move |gds: &mut HashGds, reply: Result<Buffer>| {
                debug!("fence_nb reply received");
                let rc = reply.and_then(|mut buf| fence::unpack_return(gds, &mut buf));
                cbfunc(rc, gds);
            }),
        )
    }

    /// Posts `key`/`value` for this process. The record is visible locally at once and is
    /// published to the server by the next [`PmixClient::commit`], unless `scope` is `Internal`.
    pub fn put(&mut self, scope: Scope, key: &str, value: Value) -> Result<()> {
        if !self.initialized {
            return Err(PmixError::Init);
        }
        let kv = Kval {
            key: key.to_string(),
            value,
        };
        let myid = self.ctx.myid.clone();
        self.gds.store(&myid, kv.clone())?;
        if scope != Scope::Internal {
            self.staged.push(kv);
        }
        Ok(())
    }

    /// Publishes everything put since the last commit. Blocks until the server has it.
    pub fn commit(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(PmixError::Init);
        }
        let mut blob = Buffer::new();
        blob.pack_array(&self.staged)?;

        let mut msg = Buffer::new();
        msg.pack(&Cmd::Commit)?;
        msg.pack(&self.ctx.myid)?;
        msg.pack(&blob.into_bytes())?;

        let completion = Completion::new();
        let c = completion.clone();
        self.send_recv(
            msg,
            Box::new(move |_: &mut HashGds, reply: Result<Buffer>| {
                c.complete(reply.and_then(|mut buf| status_to_result(buf.unpack()?)));
            }),
        )?;
        self.wait_for_completion(&completion)?;
        debug!("committed {} records", self.staged.len());
        self.staged.clear();
        Ok(())
    }

    /// Looks up `key` for `proc`, returning the first match.
    ///
    /// # Errors
    /// whatever the store reports, `NotFound` if it reports success with no data
    pub fn get(&self, proc: &Proc, key: &str, qualifiers: &[Info]) -> Result<Value> {
        if !self.initialized {
            return Err(PmixError::Init);
        }
        let mut out = vec![];
        self.gds
            .fetch(proc, Scope::Undef, true, Some(key), qualifiers, &mut out)?;
        out.into_iter()
            .next()
            .map(|kv| kv.value)
            .ok_or(PmixError::NotFound)
    }

    /// Tells the server we are leaving. Every later call fails with `Init`.
    pub fn finalize(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(PmixError::Init);
        }
        let mut msg = Buffer::new();
        msg.pack(&Cmd::Finalize)?;
        msg.pack(&self.ctx.myid)?;

        let completion = Completion::new();
        let c = completion.clone();
        self.send_recv(
            msg,
            Box::new(move |_: &mut HashGds, reply: Result<Buffer>| {
                c.complete(reply.and_then(|mut buf| status_to_result(buf.unpack()?)));
            }),
        )?;
        let rc = self.wait_for_completion(&completion);
        self.initialized = false;
        info!("client {} finalized", self.ctx.myid);
        rc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use crate::error::SUCCESS;

    /// Answers every request in-line: job-info requests with a two-proc job, everything else
    /// with whatever `fence_reply` produces.
    struct Loopback {
        sent: Rc<RefCell<Vec<Buffer>>>,
        inbox: VecDeque<Frame>,
        fence_reply: fn() -> Buffer,
    }

    fn success_only() -> Buffer {
        let mut b = Buffer::new();
        b.pack(&SUCCESS).unwrap();
        b.pack(&0_usize).unwrap();
        b
    }

    impl Transport for Loopback {
        fn send(&mut self, frame: &Frame) -> Result<()> {
            let mut req = Buffer::load(frame.payload.clone());
            let reply = match req.unpack::<Cmd>()? {
                Cmd::JobInfo => {
                    let mut b = Buffer::new();
                    b.pack(&SUCCESS)?;
                    b.pack(&1_usize)?;
                    b.pack(&Kval::new(crate::keys::JOB_SIZE, 2u32))?;
                    b
                }
                Cmd::FenceNb => (self.fence_reply)(),
                _ => success_only(),
            };
            self.sent.borrow_mut().push(Buffer::load(frame.payload.clone()));
            self.inbox.push_back(Frame { tag: frame.tag, payload: reply.into_bytes() });
            Ok(())
        }

        fn recv(&mut self) -> Result<Frame> {
            self.inbox
                .pop_front()
                .ok_or_else(|| PmixError::LostConnection("loopback is empty".into()))
        }
    }

    fn client(fence_reply: fn() -> Buffer) -> (PmixClient<Loopback>, Rc<RefCell<Vec<Buffer>>>) {
        let sent = Rc::new(RefCell::new(vec![]));
        let transport = Loopback { sent: Rc::clone(&sent), inbox: VecDeque::new(), fence_reply };
        let config = ClientConfig {
            nspace: "job".into(),
            rank: 0,
            ..ClientConfig::default()
        };
        let client = PmixClient::init(&config, transport).unwrap();
        sent.borrow_mut().clear();
        (client, sent)
    }

    #[test]
    fn init_stores_job_info() {
        let (client, _) = client(success_only);
        assert_eq!(client.gds().get_job_tracker("job").unwrap().nprocs, 2);
    }

    #[test]
    fn missing_list_with_count_is_bad_param() {
        let (mut client, sent) = client(success_only);
        let r = client.fence_nb(None, 5, &[], true, Box::new(|_: Result<()>, _: &HashGds| panic!("must not run")));
        assert!(matches!(r, Err(PmixError::BadParam(_))));
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn missing_list_fences_own_namespace() {
        let (mut client, sent) = client(success_only);
        client.fence(None, &[], false).unwrap();

        let mut req = sent.borrow_mut().remove(0);
        assert_eq!(req.unpack::<Cmd>().unwrap(), Cmd::FenceNb);
        assert_eq!(req.unpack::<usize>().unwrap(), 1);
        assert_eq!(req.unpack::<Proc>().unwrap(), Proc::new("job", Rank::Wildcard));
        assert_eq!(req.unpack::<i32>().unwrap(), 0);
    }

    #[test]
    fn continuation_sees_merged_data() {
        fn with_data() -> Buffer {
            let mut blob = Buffer::new();
            blob.pack(&Kval::new("peer.addr", "10.0.0.2")).unwrap();
            let mdx = crate::command::ModexData::new(Proc::new("job", Rank::Rank(1)), blob.into_bytes());
            let mut b = Buffer::new();
            b.pack(&SUCCESS).unwrap();
            b.pack(&1_usize).unwrap();
            b.pack(&mdx).unwrap();
            b
        }
        let (mut client, _) = client(with_data);
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        client
            .fence_nb(
                None,
                0,
                &[],
                true,
                Box::new(move |status: Result<()>, gds: &HashGds| {
                    status.unwrap();
                    let mut out = vec![];
                    gds.fetch(&Proc::new("job", Rank::Rank(1)), Scope::Undef, true, Some("peer.addr"), &[], &mut out)
                        .unwrap();
                    *s.borrow_mut() = Some(out.remove(0).value);
                }),
            )
            .unwrap();
        client.progress().unwrap();
        assert_eq!(*seen.borrow(), Some(Value::from("10.0.0.2")));
    }

    #[test]
    fn finalized_client_refuses_work() {
        let (mut client, _) = client(success_only);
        client.finalize().unwrap();
        let r = client.fence_nb(None, 0, &[], false, Box::new(|_: Result<()>, _: &HashGds| {}));
        assert!(matches!(r, Err(PmixError::Init)));
        assert!(matches!(client.put(Scope::Global, "k", Value::Bool(true)), Err(PmixError::Init)));
    }

    #[test]
    fn lost_connection_reaches_the_continuation() {
        let (mut client, _) = client(success_only);
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        client
            .fence_nb(None, 0, &[], false, Box::new(move |status: Result<()>, _: &HashGds| *s.borrow_mut() = Some(status)))
            .unwrap();
        // the reply never arrives
        client.transport.inbox.clear();

        assert!(matches!(client.progress(), Err(PmixError::LostConnection(_))));
        assert!(matches!(seen.borrow_mut().take(), Some(Err(PmixError::LostConnection(_)))));
        assert!(client.pending.is_empty());
    }
}
