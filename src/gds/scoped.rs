//! Node- and application-scoped lookups.
use tracing::{debug, error};

use super::job::{get_nodeinfo_by_nodename, AppInfo, JobTracker, NodeInfo};
use crate::error::{PmixError, Result};
use crate::keys;
use crate::types::ProcContext;
use crate::value::{Info, Kval, Value};

fn push(out: &mut Vec<Kval>, kv: Kval) -> Result<()> {
    out.try_reserve(1).map_err(|_| PmixError::NoMem)?;
    out.push(kv);
    Ok(())
}

/// packs the hostname, nodeid and every info record of `node` into one aggregate record
fn fetch_all_node_info(key: String, node: &NodeInfo, out: &mut Vec<Kval>) -> Result<()> {
    let mut array: Vec<Info> = Vec::new();
    array
        .try_reserve(node.info.len() + 2)
        .map_err(|_| PmixError::NoMem)?;
    if let Some(hostname) = &node.hostname {
        array.push(Kval::new(keys::HOSTNAME, hostname.as_str()));
    }
    if let Some(nodeid) = node.nodeid {
        array.push(Kval::new(keys::NODEID, nodeid));
    }
    array.extend(node.info.iter().cloned());
    push(out, Kval { key, value: Value::DataArray(array) })
}

/// one aggregate per node of `nodes`
fn fetch_all_node_info_from_list(
    job: &JobTracker,
    nodes: &[NodeInfo],
    out: &mut Vec<Kval>,
) -> Result<()> {
    for node in nodes {
        // peers older than v3.1 don't understand node-info arrays and expect the data keyed
        // by the node's name
        let key = if job.version.before_node_info_array() {
            match &node.hostname {
                Some(h) => h.clone(),
                None => continue,
            }
        } else {
            keys::NODE_INFO_ARRAY.to_string()
        };
        fetch_all_node_info(key, node, out)?;
    }
    Ok(())
}

/// Resolves a node-scoped query against `nodes`.
///
/// The node is picked by a `NODEID` or `HOSTNAME` qualifier. Without either, a keyless query
/// gets an aggregate for every node and `DataValueNotFound` (the caller never named a node),
/// while a keyed query is answered for the local node.
///
/// # Errors
/// - `DataValueNotFound` if no node was named and the default node is unknown
/// - `NotFound` if the named node, or the key on it, is absent
/// - `BadParam` if a node qualifier has the wrong type
pub fn fetch_nodeinfo(
    ctx: &ProcContext,
    key: Option<&str>,
    job: &JobTracker,
    nodes: &[NodeInfo],
    qualifiers: &[Info],
    out: &mut Vec<Kval>,
) -> Result<()> {
    debug!(key = key.unwrap_or("NULL"), nnodes = nodes.len(), "fetching node info");

    let mut nid: Option<u32> = None;
    let mut hostname: Option<&str> = None;
    let mut found = false;
    for q in qualifiers {
        if q.check_key(keys::NODEID) {
            nid = Some(q.value.get_number()?);
            found = true;
            break;
        } else if q.check_key(keys::HOSTNAME) {
            hostname = Some(q.value.as_str().ok_or_else(|| {
                PmixError::BadParam(format!("hostname qualifier is not a string: {:?}", q.value))
            })?);
            found = true;
            break;
        }
    }
    if !found {
        if key.is_none() {
            fetch_all_node_info_from_list(job, nodes, out)?;
            return Err(PmixError::DataValueNotFound);
        }
        hostname = Some(&ctx.hostname);
    }

    let node = match (nid, hostname) {
        (Some(nid), _) => nodes.iter().find(|n| n.nodeid == Some(nid)),
        (None, Some(h)) => get_nodeinfo_by_nodename(nodes, h),
        (None, None) => None,
    };
    let node = match node {
        Some(node) => node,
        // they didn't name a node, so it was optional
        None if !found => return Err(PmixError::DataValueNotFound),
        None => return Err(PmixError::NotFound),
    };

    let key = match key {
        Some(key) => key,
        None => {
            let nikey = if job.version.before_node_info_array() {
                node.hostname.clone().unwrap_or_else(|| ctx.hostname.clone())
            } else {
                keys::NODE_INFO_ARRAY.to_string()
            };
            return fetch_all_node_info(nikey, node, out);
        }
    };

    match key {
        keys::HOSTNAME if node.hostname.is_some() => {
            let host = node.hostname.clone().unwrap_or_default();
            return push(out, Kval::new(keys::HOSTNAME, host));
        }
        keys::NODEID if node.nodeid.is_some() => {
            return push(out, Kval::new(keys::NODEID, node.nodeid.unwrap_or_default()));
        }
        _ => {}
    }
    let kv = node
        .info
        .iter()
        .find(|kv| kv.check_key(key))
        .ok_or(PmixError::NotFound)?;
    debug!(key = %kv.key, "adding node record");
    push(out, kv.clone())
}

/// one aggregate per application: the appnum followed by its info records
fn fetch_all_app_info(apps: &[AppInfo], out: &mut Vec<Kval>) -> Result<()> {
    for app in apps {
        let mut array: Vec<Info> = Vec::new();
        array
            .try_reserve(app.appinfo.len() + 1)
            .map_err(|_| PmixError::NoMem)?;
        array.push(Kval::new(keys::APPNUM, app.appnum));
        array.extend(app.appinfo.iter().cloned());
        push(out, Kval { key: keys::APP_INFO_ARRAY.to_string(), value: Value::DataArray(array) })?;
    }
    Ok(())
}

/// Resolves an application-scoped query against `apps`.
///
/// The application is picked by an `APPNUM` qualifier and defaults to our own. A keyless query
/// without an appnum gets an aggregate for every application. Once the application is found,
/// its nodes are consulted first; only a `DataValueNotFound` from that lookup moves the search
/// on to the application's own records.
///
/// # Errors
/// `NotFound` if the application or the key is absent; any node lookup error other than
/// `DataValueNotFound`
pub fn fetch_appinfo(
    ctx: &ProcContext,
    key: Option<&str>,
    job: &JobTracker,
    apps: &[AppInfo],
    qualifiers: &[Info],
    out: &mut Vec<Kval>,
) -> Result<()> {
    debug!(key = key.unwrap_or("NULL"), napps = apps.len(), "fetching app info");

    let mut appnum: Option<u32> = None;
    for q in qualifiers {
        if q.check_key(keys::APPNUM) {
            appnum = Some(q.value.get_number()?);
            break;
        }
    }
    let appnum = match appnum {
        Some(n) => n,
        None if key.is_none() => {
            return fetch_all_app_info(apps, out).map_err(|e| {
                error!("failed to collect app info: {}", e);
                e
            });
        }
        None => ctx.appnum,
    };

    let app = apps
        .iter()
        .find(|a| a.appnum == appnum)
        .ok_or(PmixError::NotFound)?;

    // they may be asking about a node of this app
    match fetch_nodeinfo(ctx, key, job, &app.nodeinfo, qualifiers, out) {
        Err(PmixError::DataValueNotFound) => {}
        other => return other,
    }

    let mut rc = Err(PmixError::NotFound);
    for kv in &app.appinfo {
        if key.map_or(true, |k| kv.check_key(k)) {
            push(out, kv.clone())?;
            rc = Ok(());
            if key.is_some() {
                break;
            }
        }
    }
    rc
}
