//! this binary starts the pmix server
//! to see the list of commands, type: `pmix-server --help`

use std::net::SocketAddr;
use std::process::exit;
use std::sync::Arc;
use clap::{crate_version, value_t, App, Arg};
use pmix::config::{parse_addr, DEFAULT_ADDRESS};
use pmix::keys;
use pmix::thread_pool::{NaiveThreadPool, RayonThreadPool, SharedQueueThreadPool, ThreadPool};
use pmix::{Kval, PmixError, PmixServer, PoolKind, Result, ServerConfig, ServerState, Value};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    config: ServerConfig,
    hostname: String,
    /// the namespaces to register, with their sizes
    namespaces: Vec<(String, u32)>,
}

impl Opt {
    /// validates the command line parameters
    /// # Errors
    /// returns [`PmixError::Parsing`] if one of the parameters is invalid
    ///
    fn build(addr: &str, pool: PoolKind, threads: u32, hostname: &str, namespaces: &[&str]) -> Result<Opt> {
        let addr: SocketAddr = parse_addr(addr)?;
        if threads == 0 {
            return Err(PmixError::Parsing("the pool needs at least one thread".into()));
        }
        let namespaces = namespaces
            .iter()
            .map(|ns| parse_nspace(ns))
            .collect::<Result<Vec<_>>>()?;

        Ok(Opt {
            config: ServerConfig { addr, threads, pool },
            hostname: hostname.to_string(),
            namespaces,
        })
    }
}

/// parses `NAME:NPROCS`
fn parse_nspace(arg: &str) -> Result<(String, u32)> {
    let bad = || PmixError::Parsing(format!("{} is not of the form NAME:NPROCS", arg));
    let (name, nprocs) = arg.rsplit_once(':').ok_or_else(bad)?;
    let nprocs: u32 = nprocs.parse().map_err(|_| bad())?;
    if name.is_empty() || nprocs == 0 {
        return Err(bad());
    }
    Ok((name.to_string(), nprocs))
}

fn main() {
    let defaults = ServerConfig::default();
    let default_threads = defaults.threads.to_string();
    let matches = App::new("pmix-server")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("serves job data and fences to the processes of a job")
        .arg(Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .help("logs more, repeat for even more"))
        .arg(Arg::with_name("addr")
            .long("addr")
            .value_name("IP_ADDR:PORT")
            .help("sets the IP_ADDR:PORT that the server listens on")
            .default_value(DEFAULT_ADDRESS))
        .arg(Arg::with_name("pool")
            .long("pool")
            .value_name("POOL")
            .help("sets the worker pool servicing connections")
            .possible_values(&PoolKind::variants())
            .default_value("shared"))
        .arg(Arg::with_name("threads")
            .long("threads")
            .value_name("N")
            .help("sets the number of worker threads, one per connected client")
            .default_value(&default_threads))
        .arg(Arg::with_name("hostname")
            .long("hostname")
            .value_name("NAME")
            .help("sets the name of the node the job runs on")
            .default_value("localhost"))
        .arg(Arg::with_name("nspace")
            .long("nspace")
            .value_name("NAME:NPROCS")
            .help("registers a namespace of NPROCS processes")
            .multiple(true)
            .number_of_values(1)
            .required(true))
        .get_matches();

    // set up a tracing subscriber to log to STDERR
    subscriber_config(matches.occurrences_of("verbose"));

    let addr = matches.value_of("addr").unwrap_or(DEFAULT_ADDRESS);
    let pool = value_t!(matches, "pool", PoolKind).unwrap_or(defaults.pool);
    let threads = match value_t!(matches, "threads", u32) {
        Ok(threads) => threads,
        Err(e) => {
            eprintln!("{}", e);
            exit(1);
        }
    };
    let hostname = matches.value_of("hostname").unwrap_or("localhost");
    let namespaces: Vec<&str> = matches.values_of("nspace").map(|v| v.collect()).unwrap_or_default();
    let opt = match Opt::build(addr, pool, threads, hostname, &namespaces) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{:?}", err);
            exit(1);
        }
    };

    // start the server
    if let Err(e) = run(opt) {
        eprintln!("{:?}", e);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    info!("pmix-server {}", env!("CARGO_PKG_VERSION"));
    info!("Worker pool: {} with {} threads", opt.config.pool, opt.config.threads);
    info!("Listening on {}", opt.config.addr);

    let state = Arc::new(ServerState::new());
    for (nspace, nprocs) in &opt.namespaces {
        state.register_nspace(nspace, *nprocs, job_data(&opt.hostname, *nprocs));
    }

    let threads = opt.config.threads;
    match opt.config.pool {
        PoolKind::naive => run_with_pool(state, NaiveThreadPool::new(threads)?, opt.config.addr),
        PoolKind::shared => run_with_pool(state, SharedQueueThreadPool::new(threads)?, opt.config.addr),
        PoolKind::rayon => run_with_pool(state, RayonThreadPool::new(threads)?, opt.config.addr),
    }
}

fn run_with_pool<P: ThreadPool>(state: Arc<ServerState>, pool: P, addr: SocketAddr) -> Result<()> {
    let server = PmixServer::new(state, pool);
    server.run(addr)
}

/// every process of the job runs on this node, as the single application of the job
fn job_data(hostname: &str, nprocs: u32) -> Vec<Kval> {
    let peers = (0..nprocs).map(|r| r.to_string()).collect::<Vec<_>>().join(",");
    let node = vec![
        Kval::new(keys::HOSTNAME, hostname),
        Kval::new(keys::NODEID, 0u32),
        Kval::new(keys::LOCAL_SIZE, nprocs),
        Kval::new(keys::NODE_SIZE, nprocs),
        Kval::new(keys::LOCAL_PEERS, peers),
        Kval::new(keys::LOCALLDR, Value::Rank(pmix::Rank::Rank(0))),
    ];
    let app = vec![
        Kval::new(keys::APPNUM, 0u32),
        Kval::new(keys::APP_SIZE, nprocs),
        Kval::new(keys::APPLDR, Value::Rank(pmix::Rank::Rank(0))),
        Kval::new(keys::NODE_INFO_ARRAY, Value::DataArray(node.clone())),
    ];
    vec![
        Kval::new(keys::JOB_SIZE, nprocs),
        Kval::new(keys::NODE_INFO_ARRAY, Value::DataArray(node)),
        Kval::new(keys::APP_INFO_ARRAY, Value::DataArray(app)),
    ]
}

/// configures a tracing subscriber that will log to STDERR
///
/// Each `-v` raises the level from INFO, and a non-zero `PMIX_DEBUG` raises it to DEBUG at
/// least.
fn subscriber_config(verbosity: u64) {
    let from_env = std::env::var("PMIX_DEBUG")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(0, |v| v.min(1));
    let level = match verbosity.max(from_env) {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting tracing default subscriber failed: {}", e);
    }
}
