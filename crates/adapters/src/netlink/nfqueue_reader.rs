//! NFQUEUE binding.
//!
//! One OS thread per queue number: the kernel fans a flow's packets out
//! to a single queue (hash by tuple), so per-queue threads preserve
//! same-flow ordering while different flows dispatch in parallel. Each
//! thread blocks in `recv`, runs the async dispatcher to completion on
//! the runtime handle, and returns the verdict.
//!
//! Conntrack lifecycle and NFLOG streams are delivered by the companion
//! netlink collector through the dispatcher channels; only the packet
//! queue is bound here.

use std::sync::Arc;

use application::nfqueue_dispatch::PacketDispatcher;
use domain::common::entity::{AddressFamily, Verdict};
use nfq::{Queue, Verdict as NfVerdict};
use tokio::runtime::Handle;

/// Bind queues `[queue_start, queue_end]` and spawn one reader thread
/// per queue. Threads run until their socket errors out (normally at
/// shutdown, when the process exits).
pub fn spawn_queue_readers(
    dispatcher: Arc<PacketDispatcher>,
    queue_start: u16,
    queue_end: u16,
    handle: Handle,
) -> std::io::Result<Vec<std::thread::JoinHandle<()>>> {
    let mut threads = Vec::new();
    for queue_num in queue_start..=queue_end {
        let dispatcher = Arc::clone(&dispatcher);
        let handle = handle.clone();
        let thread = std::thread::Builder::new()
            .name(format!("nfqueue-{queue_num}"))
            .spawn(move || run_queue(queue_num, &dispatcher, &handle))?;
        threads.push(thread);
    }
    Ok(threads)
}

fn run_queue(queue_num: u16, dispatcher: &PacketDispatcher, handle: &Handle) {
    let mut queue = match Queue::open() {
        Ok(queue) => queue,
        Err(err) => {
            tracing::error!(queue_num, %err, "failed to open nfqueue socket");
            return;
        }
    };
    if let Err(err) = queue.bind(queue_num) {
        tracing::error!(queue_num, %err, "failed to bind nfqueue");
        return;
    }
    // Fail open: if we stall, the kernel accepts instead of dropping.
    if let Err(err) = queue.set_fail_open(queue_num, true) {
        tracing::warn!(queue_num, %err, "failed to enable fail-open");
    }
    if let Err(err) = queue.set_recv_conntrack(queue_num, true) {
        tracing::warn!(queue_num, %err, "failed to enable conntrack info");
    }

    tracing::info!(queue_num, "nfqueue reader started");

    loop {
        let mut msg = match queue.recv() {
            Ok(msg) => msg,
            Err(err) => {
                tracing::error!(queue_num, %err, "nfqueue recv failed, reader exiting");
                break;
            }
        };

        let ctid = msg.get_conntrack().map(|c| c.get_id()).unwrap_or(0);
        let pmark = msg.get_nfmark();
        let payload = msg.get_payload().to_vec();
        let family = match payload.first().map(|b| b >> 4) {
            Some(6) => AddressFamily::Ipv6,
            _ => AddressFamily::Ipv4,
        };

        let verdict = handle.block_on(dispatcher.dispatch(ctid, family, &payload, pmark));
        msg.set_verdict(match verdict {
            Verdict::Accept => NfVerdict::Accept,
            Verdict::Drop => NfVerdict::Drop,
        });
        if let Err(err) = queue.verdict(msg) {
            tracing::warn!(queue_num, %err, "failed to set verdict");
        }
    }
}
