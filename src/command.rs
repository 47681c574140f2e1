use serde::{Deserialize, Serialize};

use crate::types::Proc;

/// The command tag that opens every request sent to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmd {
    /// ask for the job-level data of a namespace
    JobInfo,
    /// publish the data staged by `put`
    Commit,
    /// enter a collective fence
    FenceNb,
    /// disconnect
    Finalize,
}

/// One message on the wire. `tag` pairs a reply with the receive continuation of the request
/// that caused it; `payload` holds the packed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub tag: u32,
    pub payload: Vec<u8>,
}

/// The data one process contributed to a fence: a packed stream of key/value records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModexData {
    pub proc: Proc,
    /// length of `blob` in bytes
    pub size: usize,
    pub blob: Vec<u8>,
}

impl ModexData {
    pub fn new(proc: Proc, blob: Vec<u8>) -> Self {
        ModexData {
            proc,
            size: blob.len(),
            blob,
        }
    }
}
