use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use crossbeam::channel::{RecvError, RecvTimeoutError};
use serde_json::Deserializer;
use tracing::{debug, error, info, warn};

use crate::codec::Buffer;
use crate::command::{Cmd, Frame};
use crate::error::{PmixError, Result, SUCCESS};
use crate::keys;
use crate::thread_pool::ThreadPool;
use crate::types::Proc;
use crate::value::Info;

mod state;

pub use self::state::{Namespace, ServerState};
use self::state::status_reply;

/// A TCP server that hands out job data, stores what clients commit and runs their fences.
///
/// Every connection is serviced on a thread from the [`ThreadPool`] for as long as the client
/// stays connected. A fence request blocks its connection's thread until the fence completes,
/// so the pool must be able to run one thread per fencing client.
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use pmix::{PmixServer, ServerState};
/// use pmix::thread_pool::{SharedQueueThreadPool, ThreadPool};
/// # fn main() -> pmix::Result<()> {
/// let state = Arc::new(ServerState::new());
/// state.register_nspace("job", 4, vec![]);
/// let server = PmixServer::new(state, SharedQueueThreadPool::new(8)?);
/// server.run("127.0.0.1:4000")?;
/// # Ok(())
/// # }
/// ```
pub struct PmixServer<P: ThreadPool> {
    state: Arc<ServerState>,
    /// a pool of threads that service client connections
    pool: P,
}

impl<P: ThreadPool> PmixServer<P> {
    /// Create a new `PmixServer` over `state`, servicing connections with `pool`.
    pub fn new(state: Arc<ServerState>, pool: P) -> Self {
        PmixServer { state, pool }
    }

    /// starts a server listening on the given address.
    ///
    /// # Errors
    /// returns [`PmixError::Io`] if the address cannot be bound
    pub fn run<A: ToSocketAddrs>(self, addr: A) -> Result<()> {
        let listener = TcpListener::bind(addr)?;
        self.run_listener(listener)
    }

    /// serves the connections arriving on an already bound `listener`
    pub fn run_listener(self, listener: TcpListener) -> Result<()> {
        info!("listening on {}", listener.local_addr()?);
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let state = Arc::clone(&self.state);
                    self.pool.spawn(move || {
                        if let Err(e) = serve(&state, stream) {
                            error!("Error on serving client: {}", e);
                        }
                    });
                }
                Err(e) => error!("Connection failed: {}", e),
            }
        }
        Ok(())
    }
}

/// Reads request frames off `tcp` until the client disconnects, answering each one in turn.
fn serve(state: &ServerState, tcp: TcpStream) -> Result<()> {
    let peer_addr = tcp.peer_addr()?;
    let stream_reader = BufReader::new(&tcp);
    let mut stream_writer = BufWriter::new(&tcp);
    let frames = Deserializer::from_reader(stream_reader).into_iter::<Frame>();
    debug!("client connected from {}", peer_addr);

    for frame in frames {
        let frame = frame?;
        let mut req = Buffer::load(frame.payload);
        let payload = match handle(state, &mut req) {
            Ok(Reply::Done(payload)) => payload,
            Ok(Reply::Goodbye(payload)) => {
                send_frame(&mut stream_writer, frame.tag, payload)?;
                break;
            }
            Err(e) => {
                warn!("request from {} failed: {}", peer_addr, e);
                status_reply(e.status())
            }
        };
        send_frame(&mut stream_writer, frame.tag, payload)?;
    }
    debug!("client {} disconnected", peer_addr);
    Ok(())
}

fn send_frame<W: Write>(writer: &mut W, tag: u32, payload: Vec<u8>) -> Result<()> {
    serde_json::to_writer(&mut *writer, &Frame { tag, payload })?;
    writer.flush()?;
    Ok(())
}

enum Reply {
    Done(Vec<u8>),
    // the last reply on a connection
    Goodbye(Vec<u8>),
}

fn handle(state: &ServerState, req: &mut Buffer) -> Result<Reply> {
    let cmd: Cmd = req.unpack()?;
    debug!(?cmd, "request received");
    match cmd {
        Cmd::JobInfo => {
            let nspace: String = req.unpack()?;
            let data = state.job_info(&nspace)?;
            let mut reply = Buffer::new();
            reply.pack(&SUCCESS)?;
            reply.pack(&data.len())?;
            reply.pack_array(&data)?;
            Ok(Reply::Done(reply.into_bytes()))
        }
        Cmd::Commit => {
            let proc: Proc = req.unpack()?;
            let blob: Vec<u8> = req.unpack()?;
            state.commit(proc, blob)?;
            Ok(Reply::Done(status_reply(SUCCESS)))
        }
        Cmd::FenceNb => fence(state, req).map(Reply::Done),
        Cmd::Finalize => {
            let proc: Proc = req.unpack()?;
            state.finalize(&proc);
            info!("{} finalized", proc);
            Ok(Reply::Goodbye(status_reply(SUCCESS)))
        }
    }
}

/// Unpacks a fence request and blocks until the fence completes, returning the reply for
/// this participant. A `pmix.timeout` directive (in seconds) bounds the wait.
fn fence(state: &ServerState, req: &mut Buffer) -> Result<Vec<u8>> {
    let nprocs: usize = req.unpack()?;
    if nprocs == 0 {
        return Err(PmixError::BadParam("fence without participants".into()));
    }
    let procs: Vec<Proc> = req.unpack_array(nprocs)?;
    let collect: i32 = req.unpack()?;
    let ninfo: usize = req.unpack()?;
    let directives: Vec<Info> = req.unpack_array(ninfo)?;
    let timeout = directives
        .iter()
        .find(|d| d.key == keys::TIMEOUT)
        .map(|d| d.value.get_number::<u64>())
        .transpose()?
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    let rx = state.fence(&procs, collect != 0)?;
    let reply = match timeout {
        None => rx.recv(),
        Some(limit) => match rx.recv_timeout(limit) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => {
                state.abort_fence(&procs, &PmixError::Timeout);
                rx.recv()
            }
            Err(RecvTimeoutError::Disconnected) => Err(RecvError),
        },
    };
    reply.map_err(|_| PmixError::LostConnection("fence was dropped".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rank;

    #[test]
    fn impossible_participant_count_is_rejected() {
        let state = ServerState::new();
        state.register_nspace("job", 2, vec![]);
        let mut req = Buffer::new();
        req.pack(&Cmd::FenceNb).unwrap();
        req.pack(&(1_usize << 40)).unwrap();
        req.pack(&Proc::new("job", Rank::Rank(0))).unwrap();
        let r = handle(&state, &mut Buffer::load(req.into_bytes()));
        assert!(matches!(r, Err(PmixError::UnpackFailure(_))));
    }

    #[test]
    fn finalize_says_goodbye() {
        let state = ServerState::new();
        state.register_nspace("job", 1, vec![]);
        let me = Proc::new("job", Rank::Rank(0));
        state.commit(me.clone(), b"a\n".to_vec()).unwrap();

        let mut req = Buffer::new();
        req.pack(&Cmd::Finalize).unwrap();
        req.pack(&me).unwrap();
        let r = handle(&state, &mut Buffer::load(req.into_bytes())).unwrap();
        assert!(matches!(r, Reply::Goodbye(_)));

        // a fence after the only rank finalized has nothing to hand out
        let rx = state.fence(&[me], true).unwrap();
        let mut reply = Buffer::load(rx.recv().unwrap());
        assert_eq!(reply.unpack::<i32>().unwrap(), SUCCESS);
        assert_eq!(reply.unpack::<usize>().unwrap(), 0);
    }
}
