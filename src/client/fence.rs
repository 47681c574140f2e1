//! Packing of fence requests and unpacking of fence replies.
use tracing::error;

use crate::codec::Buffer;
use crate::command::{Cmd, ModexData};
use crate::error::{status_to_result, PmixError, Result};
use crate::gds::HashGds;
use crate::types::Proc;
use crate::value::{Info, Kval};

/// Packs a fence request: the command, the participant count, the participants, the
/// collect-data flag and any directives for the server.
pub fn pack_fence(cmd: Cmd, procs: &[Proc], qualifiers: &[Info], collect_data: bool) -> Result<Buffer> {
    let mut msg = Buffer::new();
    msg.pack(&cmd)?;
    msg.pack(&procs.len())?;
    // must always be at least one (our own namespace)
    msg.pack_array(procs)?;
    msg.pack(&(collect_data as i32))?;
    msg.pack(&qualifiers.len())?;
    msg.pack_array(qualifiers)?;
    Ok(msg)
}

/// Decodes a fence reply and stores every record it carries into `gds`.
///
/// A failed status is returned without decoding anything else. Each blob is a stream of
/// records that ends when the blob runs out of bytes; that end is not an error. A record that
/// cannot be stored is logged and skipped. Any other decode error fails the fence, after the
/// remaining blobs have been stored.
pub fn unpack_return(gds: &mut HashGds, data: &mut Buffer) -> Result<()> {
    let status: i32 = data.unpack().map_err(|e| {
        error!("failed to unpack fence status: {}", e);
        e
    })?;
    status_to_result(status)?;

    let nblobs: usize = data.unpack().map_err(|e| {
        error!("failed to unpack blob count: {}", e);
        e
    })?;
    if nblobs == 0 {
        return Ok(());
    }
    let blobs: Vec<ModexData> = data.unpack_array(nblobs).map_err(|e| {
        error!("failed to unpack {} blobs: {}", nblobs, e);
        e
    })?;

    let mut rc = Ok(());
    for mdx in blobs {
        if mdx.size != mdx.blob.len() {
            error!("blob from {} claims {} bytes, carries {}", mdx.proc, mdx.size, mdx.blob.len());
            rc = rc.and(Err(PmixError::UnpackFailure(format!("truncated blob from {}", mdx.proc))));
            continue;
        }
        let mut buf = Buffer::load(mdx.blob);
        loop {
            match buf.unpack::<Kval>() {
                Ok(kv) => {
                    if let Err(e) = gds.store(&mdx.proc, kv) {
                        error!("failed to store data from {}: {}", mdx.proc, e);
                    }
                }
                Err(PmixError::UnpackPastEnd) => break,
                Err(e) => {
                    error!("failed to unpack data from {}: {}", mdx.proc, e);
                    rc = rc.and(Err(e));
                    break;
                }
            }
        }
    }
    rc
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::error::SUCCESS;
    use crate::gds::Gds;
    use crate::types::{ProcContext, Rank, Scope};
    use crate::value::Value;

    fn gds() -> HashGds {
        let ctx = ProcContext::new(Proc::new("job", Rank::Rank(0)), "n0", 0);
        HashGds::new(Arc::new(ctx))
    }

    fn blob(kvs: &[Kval]) -> Vec<u8> {
        let mut b = Buffer::new();
        b.pack_array(kvs).unwrap();
        b.into_bytes()
    }

    fn reply(status: i32, blobs: &[ModexData]) -> Buffer {
        let mut b = Buffer::new();
        b.pack(&status).unwrap();
        if status == SUCCESS {
            b.pack(&blobs.len()).unwrap();
            b.pack_array(blobs).unwrap();
        }
        Buffer::load(b.into_bytes())
    }

    #[test]
    fn request_layout() {
        let procs = vec![Proc::new("job", Rank::Rank(0)), Proc::new("job", Rank::Rank(1))];
        let mut msg = Buffer::load(pack_fence(Cmd::FenceNb, &procs, &[], true).unwrap().into_bytes());
        assert_eq!(msg.unpack::<Cmd>().unwrap(), Cmd::FenceNb);
        let n: usize = msg.unpack().unwrap();
        assert_eq!(msg.unpack_array::<Proc>(n).unwrap(), procs);
        assert_eq!(msg.unpack::<i32>().unwrap(), 1);
        assert_eq!(msg.unpack::<usize>().unwrap(), 0);
    }

    #[test]
    fn zero_blobs_is_success_and_stores_nothing() {
        let mut gds = gds();
        unpack_return(&mut gds, &mut reply(SUCCESS, &[])).unwrap();
        assert!(gds.get_job_tracker("job").is_err());
    }

    #[test]
    fn end_of_blob_is_success() {
        let mut gds = gds();
        let kvs = vec![Kval::new("a", 1u32), Kval::new("b", "two"), Kval::new("c", vec![3u8])];
        let mdx = ModexData::new(Proc::new("job", Rank::Rank(1)), blob(&kvs));
        unpack_return(&mut gds, &mut reply(SUCCESS, &[mdx])).unwrap();

        let job = gds.get_job_tracker("job").unwrap();
        assert_eq!(job.hashtab.len(), 3);
        let mut out = vec![];
        gds.fetch(&Proc::new("job", Rank::Rank(1)), Scope::Undef, true, Some("c"), &[], &mut out)
            .unwrap();
        assert_eq!(out[0].value, Value::Bytes(vec![3]));
    }

    #[test]
    fn failed_status_is_propagated() {
        let mut gds = gds();
        let r = unpack_return(&mut gds, &mut reply(PmixError::NotFound.status(), &[]));
        assert!(matches!(r, Err(PmixError::NotFound)));
    }

    #[test]
    fn impossible_blob_count_is_a_decode_error() {
        let mut gds = gds();
        let mut b = Buffer::new();
        b.pack(&SUCCESS).unwrap();
        b.pack(&usize::MAX).unwrap();
        let r = unpack_return(&mut gds, &mut Buffer::load(b.into_bytes()));
        assert!(matches!(r, Err(PmixError::UnpackFailure(_))));
        assert!(gds.get_job_tracker("job").is_err());
    }

    #[test]
    fn corrupt_blob_fails_after_storing_the_rest() {
        let mut gds = gds();
        let mut bad = blob(&[Kval::new("ok", 1u32)]);
        bad.extend_from_slice(b"42\n");
        let good = ModexData::new(Proc::new("job", Rank::Rank(2)), blob(&[Kval::new("x", 1u32)]));
        let bad = ModexData::new(Proc::new("job", Rank::Rank(1)), bad);
        let r = unpack_return(&mut gds, &mut reply(SUCCESS, &[bad, good]));
        assert!(matches!(r, Err(PmixError::UnpackFailure(_))));
        assert_eq!(gds.get_job_tracker("job").unwrap().hashtab.len(), 2);
    }
}
