//! Application batch packets (`0xfe`)
//!
//! A batch body is a zlib stream. Inflated, it is a run of sub-packets,
//! each a varint length followed by that many bytes whose first byte is the
//! application packet id.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::core::cursor::{Cursor, Writer};
use crate::core::schema::Value;
use crate::error::{ProtocolError, Result};
use crate::protocol::ids::game;
use crate::protocol::port::PortContext;
use crate::utils::compression::{deflate, inflate, ZLIB_MARKER};
use crate::utils::metrics::{global_metrics, Timer};

/// Batch handler. Anything that is not a zlib stream, or fails to inflate,
/// demotes the connection to passthrough.
pub fn handle_batch(_value: &Value, c: &mut Cursor<'_>, ctx: &mut PortContext) -> Result<()> {
    let body = c.read_remaining();
    if body.first() != Some(&ZLIB_MARKER) {
        ctx.demote("batch is not a zlib stream");
        return Ok(());
    }

    let inflated = {
        let _timer = Timer::start("batch_inflate");
        inflate(body, ctx.max_batch_size).inspect_err(|_| {
            ctx.demote("batch failed to inflate");
        })?
    };
    global_metrics().batch_inflated();

    dispatch_batch(&inflated, ctx).inspect_err(|_| {
        ctx.demote("batch framing is corrupt");
    })
}

/// Walk the sub-packets of an inflated batch. Errors from individual
/// sub-packets are reported and skipped; a broken length prefix is returned.
fn dispatch_batch(data: &[u8], ctx: &mut PortContext) -> Result<()> {
    let tables = Arc::clone(&ctx.tables);
    let table = tables.application.get(ctx.direction);
    let mut c = Cursor::new(data);

    while !c.is_eof() {
        let declared = c.read_var_u32()? as usize;
        let remaining = c.remaining();
        if declared > remaining {
            warn!(
                peer = %ctx.peer,
                declared,
                remaining,
                "Batch sub-packet overflows the batch"
            );
        }
        let packet = c.read_bytes(declared.min(remaining))?;
        let Some((&id, body)) = packet.split_first() else {
            continue;
        };

        let mut inner = Cursor::new(body);
        match table.try_dispatch(id, &mut inner, ctx) {
            Ok(true) => {}
            Ok(false) => trace!(id, size = body.len(), "Unhandled batch sub-packet"),
            Err(err) => ctx.report(id, &err.to_string()),
        }
        if !ctx.state.is_decoding() {
            break;
        }
    }
    Ok(())
}

/// Build a batch payload (`0xfe` id included) from sub-packets
pub fn encode_batch(packets: &[&[u8]], level: u32) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    for packet in packets {
        let len = u32::try_from(packet.len())
            .map_err(|_| ProtocolError::ValueOutOfRange(format!("{} byte sub-packet", packet.len())))?;
        w.write_var_u32(len);
        w.write_bytes(packet);
    }
    let compressed = deflate(w.as_slice(), level)?;

    let mut out = Vec::with_capacity(compressed.len() + 1);
    out.push(game::BATCH);
    out.extend_from_slice(&compressed);
    Ok(out)
}
