//! The pmix-client executable runs one process of a job against a running `pmix-server`.
//!
//! `pmix-client exchange <KEY> <VALUE>`
//!
//!     Publish a string value under KEY, fence with the whole namespace while collecting data,
//!     then print the value every rank published under KEY, one `RANK: VALUE` line per rank.
//!
//! `pmix-client fence [--no-data]`
//!
//!     Fence with the whole namespace. With --no-data, no data is exchanged.
//!
//! `pmix-client get <KEY> [--rank RANK]`
//!
//!     Print a value from the job data, for RANK or for the whole job when not given.
//!
//! Identity and server options (--nspace, --rank, --hostname, --appnum, --addr) default to the
//! PMIX_NAMESPACE, PMIX_RANK, PMIX_HOSTNAME, PMIX_APPNUM and PMIX_SERVER_URI variables.
//!
//! `pmix-client -V`
//!
//!     Print the version.

use clap::{crate_version, value_t, App, AppSettings, Arg, ArgMatches, SubCommand};
use pmix::config::parse_addr;
use pmix::{ClientConfig, PmixClient, PmixError, Proc, Rank, Result, Scope, Value};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

/// what the process does once connected
#[derive(Debug)]
enum Action {
    Exchange { key: String, value: String },
    Fence { collect: bool },
    Get { key: String, rank: Rank },
}

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    config: ClientConfig,
    action: Action,
}

fn main() -> Result<()> {
    let matches = App::new("pmix-client")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("one process of a job: publishes data, fences and reads back its peers")
        .arg(Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .help("logs more, repeat for even more"))
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommands(vec![
            SubCommand::with_name("exchange")
                .about("Publish KEY=VALUE, fence with data and print every rank's VALUE")
                .arg(Arg::with_name("KEY").required(true).index(1))
                .arg(Arg::with_name("VALUE").required(true).index(2)),
            SubCommand::with_name("fence")
                .about("Fence with the whole namespace")
                .arg(Arg::with_name("no-data")
                    .long("no-data")
                    .help("do not collect the committed data")),
            SubCommand::with_name("get")
                .about("Print a value from the job data")
                .arg(Arg::with_name("KEY").required(true).index(1))
                .arg(Arg::with_name("rank")
                    .long("rank")
                    .value_name("RANK")
                    .help("the rank to look up, the whole job when not given")),
        ])
        .arg(Arg::with_name("addr")
            .long("addr")
            .value_name("IP_ADDR:PORT")
            .help("sets the IP_ADDR:PORT of the server to connect to"))
        .arg(Arg::with_name("nspace")
            .long("nspace")
            .value_name("NAME")
            .help("sets the namespace this process belongs to"))
        .arg(Arg::with_name("rank")
            .long("rank")
            .value_name("RANK")
            .help("sets this process's rank"))
        .arg(Arg::with_name("hostname")
            .long("hostname")
            .value_name("NAME")
            .help("sets the node this process runs on"))
        .arg(Arg::with_name("appnum")
            .long("appnum")
            .value_name("N")
            .help("sets the application this process belongs to"))
        .get_matches();

    // set up a tracing subscriber to log to STDERR
    subscriber_config(matches.occurrences_of("verbose"));

    let opt = parse_options(&matches)?;
    run(opt)
}

/// parses the matches from the command line into an [`Opt`] struct, starting from the
/// environment
fn parse_options(matches: &ArgMatches) -> Result<Opt> {
    let mut config = ClientConfig::from_env()?;
    if let Some(addr) = matches.value_of("addr") {
        config.server_addr = parse_addr(addr)?;
    }
    if let Some(nspace) = matches.value_of("nspace") {
        config.nspace = nspace.to_string();
    }
    if matches.is_present("rank") {
        config.rank = value_t!(matches, "rank", u32).map_err(|e| PmixError::Parsing(e.message))?;
    }
    if let Some(hostname) = matches.value_of("hostname") {
        config.hostname = hostname.to_string();
    }
    if matches.is_present("appnum") {
        config.appnum = value_t!(matches, "appnum", u32).map_err(|e| PmixError::Parsing(e.message))?;
    }

    let action = match matches.subcommand() {
        ("exchange", Some(sub)) => Action::Exchange {
            key: sub.value_of("KEY").unwrap_or_default().to_string(),
            value: sub.value_of("VALUE").unwrap_or_default().to_string(),
        },
        ("fence", Some(sub)) => Action::Fence {
            collect: !sub.is_present("no-data"),
        },
        ("get", Some(sub)) => Action::Get {
            key: sub.value_of("KEY").unwrap_or_default().to_string(),
            rank: match sub.value_of("rank") {
                None => Rank::Wildcard,
                Some(_) => Rank::Rank(value_t!(sub, "rank", u32).map_err(|e| PmixError::Parsing(e.message))?),
            },
        },
        _ => return Err(PmixError::Parsing("a subcommand is required".into())),
    };
    Ok(Opt { config, action })
}

/// runs the requested [`Action`] as one process of the job, then finalizes
fn run(opt: Opt) -> Result<()> {
    let mut client = PmixClient::connect(&opt.config)?;
    debug!("connected as {}", client.proc());

    match opt.action {
        Action::Exchange { key, value } => {
            client.put(Scope::Global, &key, Value::from(value))?;
            client.commit()?;
            client.fence(None, &[], true)?;

            let nspace = client.proc().nspace.clone();
            let nprocs = client.gds().get_job_tracker(&nspace)?.nprocs;
            for rank in 0..nprocs {
                let peer = Proc::new(nspace.clone(), Rank::Rank(rank));
                match client.get(&peer, &key, &[]) {
                    Ok(v) => println!("{}: {}", rank, show(&v)),
                    Err(PmixError::NotFound) => println!("{}: <not found>", rank),
                    Err(e) => return Err(e),
                }
            }
        }
        Action::Fence { collect } => {
            client.fence(None, &[], collect)?;
            println!("fence complete");
        }
        Action::Get { key, rank } => {
            let proc = Proc::new(client.proc().nspace.clone(), rank);
            match client.get(&proc, &key, &[]) {
                Ok(v) => println!("{}", show(&v)),
                Err(PmixError::NotFound) => println!("Key not found"),
                Err(e) => return Err(e),
            }
        }
    }
    client.finalize()
}

fn show(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => format!("{:?}", value),
    }
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
