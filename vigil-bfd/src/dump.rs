//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic;
use std::time::Duration;

use chrono::{DateTime, Utc};
use num_traits::FromPrimitive;
use vigil_utils::bfd::DiagnosticCode;

use crate::master::Master;
use crate::session::Session;

// Writes a human-readable snapshot of every session to the given path.
pub(crate) fn dump(master: &Master, path: &Path) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    writeln!(w, "------< BFD Sessions >------")?;
    for sess in master.sessions.iter() {
        dump_session(&mut w, sess)?;
    }

    w.flush()
}

fn dump_session(w: &mut impl Write, sess: &Session) -> std::io::Result<()> {
    writeln!(w, " BFD Session = {}", sess.config.name)?;
    writeln!(w, "   neighbor = {}", sess.config.neighbor)?;
    if let Some(source) = &sess.config.source {
        writeln!(w, "   source = {source}")?;
    }
    writeln!(w, "   multihop = {}", sess.config.multihop)?;
    writeln!(
        w,
        "   required min RX interval = {} us",
        sess.config.min_rx_interval
    )?;
    writeln!(
        w,
        "   desired min TX interval = {} us",
        sess.config.min_tx_interval
    )?;
    writeln!(
        w,
        "   desired idle TX interval = {} us",
        sess.config.idle_tx_interval
    )?;
    writeln!(w, "   detection multiplier = {}", sess.config.detect_mult)?;
    writeln!(w, "   TTL = {}", sess.config.tx_ttl)?;
    writeln!(w, "   max hops = {}", sess.config.max_hops)?;
    writeln!(w, "   passive = {}", sess.config.passive)?;
    writeln!(w, "   notify vrrp = {}", sess.config.notify_vrrp)?;
    writeln!(w, "   notify checker = {}", sess.config.notify_checker)?;
    writeln!(w, "   local state = {}", sess.state.local_state)?;
    writeln!(w, "   local diag = {}", sess.state.local_diag)?;
    writeln!(
        w,
        "   local discriminator = 0x{:x}",
        sess.state.local_discr
    )?;
    writeln!(w, "   local demand = {}", sess.state.local_demand)?;
    match &sess.state.remote {
        Some(remote) => {
            writeln!(w, "   remote state = {}", remote.state)?;
            let remote_diag = DiagnosticCode::from_u8(remote.diag);
            match remote_diag {
                Some(diag) => writeln!(w, "   remote diag = {diag}")?,
                None => writeln!(w, "   remote diag = {}", remote.diag)?,
            }
            writeln!(w, "   remote discriminator = 0x{:x}", remote.discr)?;
            writeln!(w, "   remote min TX interval = {} us", remote.min_tx)?;
            writeln!(w, "   remote min RX interval = {} us", remote.min_rx)?;
            writeln!(w, "   remote detect multiplier = {}", remote.multiplier)?;
            writeln!(w, "   remote demand = {}", remote.demand_mode)?;
        }
        None => {
            writeln!(w, "   remote = [never heard]")?;
        }
    }
    write_interval(w, "local TX interval", sess.negotiated_tx_interval())?;
    write_interval(w, "remote TX interval", sess.negotiated_rx_interval())?;
    write_detect_time(w, "local detection time", sess.detection_time())?;
    write_detect_time(
        w,
        "remote detection time",
        sess.remote_detection_time(),
    )?;
    writeln!(w, "   poll = {}", sess.poll_sequence_is_active())?;
    writeln!(w, "   send error = {}", sess.state.send_error)?;
    writeln!(w, "   egress socket = {}", sess.state.socket_tx.is_some())?;
    write_timer(
        w,
        "TX timer",
        sess.state
            .tx_interval
            .as_ref()
            .map(|timer| timer.remaining()),
    )?;
    write_timer(
        w,
        "detection timer",
        sess.state
            .detection_timer
            .as_ref()
            .map(|timer| timer.remaining()),
    )?;
    write_timer(
        w,
        "reset timer",
        sess.state
            .reset_timer
            .as_ref()
            .map(|timer| timer.remaining()),
    )?;
    write_time(w, "create time", Some(sess.statistics.create_time))?;
    write_time(
        w,
        "last state change",
        sess.statistics.last_state_change_time,
    )?;
    write_time(w, "last down", sess.statistics.last_down_time)?;
    write_time(w, "last up", sess.statistics.last_up_time)?;
    writeln!(w, "   down count = {}", sess.statistics.down_count)?;
    writeln!(
        w,
        "   admin down count = {}",
        sess.statistics.admin_down_count
    )?;
    writeln!(w, "   RX packets = {}", sess.statistics.rx_packet_count)?;
    writeln!(w, "   RX drops = {}", sess.statistics.rx_drop_count)?;
    writeln!(
        w,
        "   TX packets = {}",
        sess.statistics
            .tx_packet_count
            .load(atomic::Ordering::Relaxed)
    )?;
    writeln!(
        w,
        "   TX errors = {}",
        sess.statistics
            .tx_error_count
            .load(atomic::Ordering::Relaxed)
    )?;
    write_time(w, "last seen", sess.state.last_seen)?;

    Ok(())
}

fn write_interval(
    w: &mut impl Write,
    label: &str,
    interval: Option<u32>,
) -> std::io::Result<()> {
    match interval {
        Some(interval) => writeln!(w, "   {label} = {interval} us"),
        None => writeln!(w, "   {label} = [disabled]"),
    }
}

fn write_detect_time(
    w: &mut impl Write,
    label: &str,
    time: Option<u64>,
) -> std::io::Result<()> {
    match time {
        Some(time) => writeln!(w, "   {label} = {time} us"),
        None => writeln!(w, "   {label} = [disabled]"),
    }
}

fn write_timer(
    w: &mut impl Write,
    label: &str,
    remaining: Option<Duration>,
) -> std::io::Result<()> {
    match remaining {
        Some(remaining) => {
            writeln!(w, "   {} = {} us", label, remaining.as_micros())
        }
        None => writeln!(w, "   {label} = [disabled]"),
    }
}

fn write_time(
    w: &mut impl Write,
    label: &str,
    time: Option<DateTime<Utc>>,
) -> std::io::Result<()> {
    match time {
        Some(time) => writeln!(
            w,
            "   {} = {}",
            label,
            time.format("%Y-%m-%d %H:%M:%S%.6f")
        ),
        None => writeln!(w, "   {label} = [never]"),
    }
}
