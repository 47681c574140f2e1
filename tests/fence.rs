use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;

use crossbeam_utils::thread::scope;
use pmix::keys;
use pmix::{
    ClientConfig, Kval, NaiveThreadPool, PmixClient, PmixError, PmixServer, Proc, Rank, Scope,
    ServerState, ThreadPool, Value,
};

/// starts a server on an ephemeral port, serving the given namespaces
fn start_server(namespaces: &[(&str, u32)]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState::new());
    for (nspace, nprocs) in namespaces {
        state.register_nspace(nspace, *nprocs, vec![]);
    }
    let server = PmixServer::new(state, NaiveThreadPool::new(0).unwrap());
    thread::spawn(move || server.run_listener(listener));
    addr
}

fn config(addr: SocketAddr, nspace: &str, rank: u32) -> ClientConfig {
    ClientConfig {
        nspace: nspace.to_string(),
        rank,
        hostname: "localhost".to_string(),
        appnum: 0,
        server_addr: addr,
    }
}

/// publishes an address, fences and returns what every rank of the job published
fn exchange(addr: SocketAddr, nspace: &str, rank: u32, collect: bool) -> Vec<Option<Value>> {
    let mut client = PmixClient::connect(&config(addr, nspace, rank)).unwrap();
    client
        .put(Scope::Global, "peer.addr", Value::from(format!("10.0.0.{}", rank)))
        .unwrap();
    client.commit().unwrap();
    client.fence(None, &[], collect).unwrap();

    let nprocs = client.gds().get_job_tracker(nspace).unwrap().nprocs;
    let seen = (0..nprocs)
        .map(|r| {
            match client.get(&Proc::new(nspace, Rank::Rank(r)), "peer.addr", &[]) {
                Ok(v) => Some(v),
                Err(PmixError::NotFound) => None,
                Err(e) => panic!("unexpected error: {}", e),
            }
        })
        .collect();
    client.finalize().unwrap();
    seen
}

#[test]
fn fence_with_data_exchanges_every_peers_record() {
    let addr = start_server(&[("job", 4)]);
    let results: Vec<Vec<Option<Value>>> = scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|rank| s.spawn(move |_| exchange(addr, "job", rank, true)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
    .unwrap();

    for seen in results {
        let expected: Vec<Option<Value>> = (0..4)
            .map(|r| Some(Value::from(format!("10.0.0.{}", r))))
            .collect();
        assert_eq!(seen, expected);
    }
}

#[test]
fn fence_without_data_only_synchronizes() {
    let addr = start_server(&[("quiet", 2)]);
    let results: Vec<Vec<Option<Value>>> = scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|rank| s.spawn(move |_| exchange(addr, "quiet", rank, false)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
    .unwrap();

    // each rank only knows what it put itself
    assert_eq!(results[0], vec![Some(Value::from("10.0.0.0")), None]);
    assert_eq!(results[1], vec![None, Some(Value::from("10.0.0.1"))]);
}

#[test]
fn fence_across_a_subset_of_ranks() {
    let addr = start_server(&[("big", 3)]);
    let pair = [Proc::new("big", Rank::Rank(0)), Proc::new("big", Rank::Rank(1))];
    let results: Vec<bool> = scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|rank| {
                let pair = pair.clone();
                s.spawn(move |_| {
                    let mut client = PmixClient::connect(&config(addr, "big", rank)).unwrap();
                    client.put(Scope::Global, "k", Value::from(rank)).unwrap();
                    client.commit().unwrap();
                    client.fence(Some(&pair[..]), &[], true).unwrap();
                    let peer = Proc::new("big", Rank::Rank(1 - rank));
                    let got = client.get(&peer, "k", &[]).unwrap() == Value::from(1 - rank);
                    client.finalize().unwrap();
                    got
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
    .unwrap();
    assert_eq!(results, vec![true, true]);
}

#[test]
fn fence_times_out_when_a_peer_never_arrives() {
    let addr = start_server(&[("lonely", 2)]);
    let mut client = PmixClient::connect(&config(addr, "lonely", 0)).unwrap();
    let rc = client.fence(None, &[Kval::new(keys::TIMEOUT, 1u32)], false);
    assert!(matches!(rc, Err(PmixError::Timeout)));
}

#[test]
fn unknown_namespace_fails_init() {
    let addr = start_server(&[("job", 1)]);
    let rc = PmixClient::connect(&config(addr, "nope", 0));
    assert!(matches!(rc, Err(PmixError::NotFound)));
}

#[test]
fn job_data_arrives_at_init() {
    let addr = start_server(&[("sized", 5)]);
    let client = PmixClient::connect(&config(addr, "sized", 3)).unwrap();
    let size = client
        .get(&Proc::new("sized", Rank::Wildcard), keys::JOB_SIZE, &[])
        .unwrap();
    assert_eq!(size, Value::from(5u32));
    assert_eq!(client.gds().get_job_tracker("sized").unwrap().nprocs, 5);
}
