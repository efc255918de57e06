//! Transport-independent state machine of a reliable channel.
//!
//! [`Session`] never performs I/O and never reads the clock. The owner feeds
//! it incoming [`WireMessage`]s, local submissions and the current time, and
//! drains [`SessionEvent`]s: messages to transmit, payloads to deliver, and
//! completions of earlier submissions.
//!
//! Sequence numbers run modulo the window; at most half of the window is in
//! flight so that old and new numbers cannot be confused.

use std::collections::VecDeque;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::config::ReliableConfig;
use crate::error::ReliableError;
use crate::timer::{Deadline, TimerHeap};
use crate::wire::{ResetParams, WireMessage};

/// Identifies one [`Session::submit`] call in later events.
pub type Ticket = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Hand this message to the link.
    Transmit(WireMessage),
    /// Payload received in order, exactly once.
    Deliver(Bytes),
    /// The peer acknowledged the submission.
    Acked(Ticket),
    /// The submission will never be acknowledged.
    Failed(Ticket, ReliableError),
    /// The reset handshake completed.
    Up,
    /// An established session fell back into a reset.
    Down,
    /// The session is closed for good.
    Closed(ReliableError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub sent: u64,
    pub retransmitted: u64,
    pub delivered: u64,
    pub resets: u64,
}

#[derive(Debug)]
struct Pending {
    payload: Bytes,
    ticket: Option<Ticket>,
    /// Generation of the live retransmit timer; `None` once selectively acked.
    generation: Option<u64>,
}

pub struct Session {
    config: ReliableConfig,
    local_id: u32,
    peer_id: Option<u32>,

    send_head: u16,
    send_tail: u16,
    recv_head: u16,
    recv_tail: u16,
    send_table: Vec<Option<Pending>>,
    recv_table: Vec<Option<Bytes>>,
    queue: VecDeque<(Ticket, Bytes)>,

    timers: TimerHeap,
    recv_deadline: Option<Instant>,

    reset_level: u8,
    /// Set while a handshake runs: when to resend our reset.
    reset_at: Option<Instant>,
    pend_ack: bool,
    closed: Option<ReliableError>,

    next_ticket: Ticket,
    events: VecDeque<SessionEvent>,
    stats: SessionStats,
}

impl Session {
    /// A session about to start the handshake.
    ///
    /// `session_id` tags our reset requests so that the peer can recognise
    /// late duplicates of a handshake it already completed.
    pub fn new(config: ReliableConfig, session_id: u32, now: Instant) -> Self {
        let window = usize::from(config.window);
        Self {
            config,
            local_id: session_id,
            peer_id: None,
            send_head: 0,
            send_tail: 0,
            recv_head: 0,
            recv_tail: 0,
            send_table: (0..window).map(|_| None).collect(),
            recv_table: vec![None; window],
            queue: VecDeque::new(),
            timers: TimerHeap::default(),
            recv_deadline: None,
            reset_level: 1,
            reset_at: Some(now),
            pend_ack: false,
            closed: None,
            next_ticket: 0,
            events: VecDeque::new(),
            stats: SessionStats::default(),
        }
    }

    /// Send the first reset request right away.
    pub fn open(&mut self, now: Instant) {
        if self.closed.is_none() && self.reset_at.is_some() {
            self.send_reset(now, None);
        }
    }

    pub fn config(&self) -> &ReliableConfig {
        &self.config
    }

    pub fn is_up(&self) -> bool {
        self.closed.is_none() && self.reset_at.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub fn reset_level(&self) -> u8 {
        self.reset_level
    }

    /// Unacknowledged messages on the wire.
    pub fn in_flight(&self) -> u16 {
        self.distance(self.send_tail, self.send_head)
    }

    /// Submissions waiting for the window to open.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    /// Queue a payload; its fate is reported as `Acked` or `Failed`.
    pub fn submit(&mut self, payload: Bytes, now: Instant) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        if let Some(err) = &self.closed {
            self.events.push_back(SessionEvent::Failed(ticket, err.clone()));
            return ticket;
        }
        self.queue.push_back((ticket, payload));
        self.pump(now);
        ticket
    }

    /// Close locally and tell the peer, with an optional reason.
    pub fn close(&mut self, reason: Option<String>) {
        if self.closed.is_some() {
            return;
        }
        debug!(?reason, "closing reliable channel");
        self.shutdown(ReliableError::Closed);
        self.transmit(WireMessage::reset(0, None, reason));
    }

    /// Close without telling the peer, failing everything with `err`.
    pub fn shutdown(&mut self, err: ReliableError) {
        if self.closed.is_some() {
            return;
        }
        self.fail_in_flight(&err);
        for (ticket, _) in self.queue.drain(..) {
            self.events
                .push_back(SessionEvent::Failed(ticket, err.clone()));
        }
        self.timers.clear();
        self.reset_at = None;
        self.recv_deadline = None;
        self.closed = Some(err.clone());
        self.events.push_back(SessionEvent::Closed(err));
    }

    /// Earliest instant at which [`Session::poll_timers`] has work.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        if self.closed.is_some() {
            return None;
        }
        if self.reset_at.is_some() {
            return self.reset_at;
        }
        while let Some(d) = self.timers.peek() {
            if self.is_live(d) {
                break;
            }
            self.timers.pop();
        }
        [self.timers.peek().map(|d| d.at), self.recv_deadline]
            .into_iter()
            .flatten()
            .min()
    }

    /// Resend resets and overdue messages; acknowledge stalled receives.
    pub fn poll_timers(&mut self, now: Instant) {
        if self.closed.is_some() {
            return;
        }
        if let Some(at) = self.reset_at {
            if at <= now {
                trace!(level = self.reset_level, "resending reset");
                self.send_reset(now, None);
            }
            return;
        }
        while let Some(d) = self.timers.peek() {
            if d.at > now {
                break;
            }
            self.timers.pop();
            if self.is_live(d) {
                trace!(seq = d.seq, "retransmitting");
                self.stats.retransmitted += 1;
                self.transmit_data(d.seq, now);
            }
        }
        if self.recv_deadline.is_some_and(|at| at <= now) {
            self.send_ack();
            self.recv_deadline = if self.recv_tail == self.recv_head {
                None
            } else {
                Some(now + self.config.timeout)
            };
        }
    }

    /// Process one message from the peer.
    pub fn handle(&mut self, msg: WireMessage, now: Instant) {
        if msg.is_reset() {
            self.handle_reset(msg, now);
            return;
        }
        if self.closed.is_some() {
            self.transmit(WireMessage::reset(0, None, None));
            return;
        }
        if self.reset_at.is_some() {
            if self.reset_level < 2 {
                trace!("data during reset, repeating request");
                self.send_reset(now, None);
                return;
            }
            // The peer only sends data after our level-2 reply arrived.
            self.reset_done(now);
        }

        let (Some(seq), Some(ack)) = (msg.seq, msg.ack) else {
            warn!("channel message without sequence numbers dropped");
            return;
        };
        let window = self.config.window;
        if seq >= window || ack >= window {
            warn!(seq, ack, window, "sequence numbers out of bounds, resetting");
            let reason = "R/S out of bounds";
            self.reset(1, now, reason);
            self.send_reset(now, Some(reason.to_owned()));
            return;
        }

        if let Some(data) = msg.data {
            self.accept_data(seq, Bytes::from(data));
        } else if self.between(self.recv_tail, self.recv_head, seq)
            && self.distance(self.recv_tail, seq) <= self.config.in_flight_limit()
        {
            self.recv_head = seq;
        }

        self.process_ack(ack, &msg.selective);
        self.deliver();

        self.recv_deadline = if self.recv_tail == self.recv_head {
            None
        } else {
            Some(now + self.config.timeout)
        };
        self.pump(now);
        if self.pend_ack {
            self.send_ack();
        }
    }

    fn handle_reset(&mut self, msg: WireMessage, now: Instant) {
        let level = msg.reset_level();
        if level == 0 {
            if self.closed.is_none() {
                info!(reason = ?msg.error, "peer closed the channel");
                self.shutdown(ReliableError::PeerClosed(msg.error));
            }
            return;
        }
        if self.closed.is_some() {
            self.transmit(WireMessage::reset(0, None, None));
            return;
        }
        if let Some(err) = &msg.error {
            warn!(level, error = %err, "peer reports a channel error");
        }

        match level {
            1 => {
                if self.reset_at.is_none() {
                    let session = msg.params.and_then(|p| p.session);
                    if session.is_some() && session == self.peer_id {
                        trace!(?session, "late duplicate of a completed handshake");
                        return;
                    }
                    info!("peer restarted the channel");
                    self.reset(2, now, "peer reset");
                } else if self.reset_level == 1 {
                    self.reset_level = 2;
                }
                self.note_peer(msg.params);
                self.send_reset(now, None);
            }
            2 => {
                self.note_peer(msg.params);
                self.reset_level = 3;
                self.send_reset(now, None);
                self.reset_done(now);
            }
            3 => {
                if self.reset_at.is_none() {
                    return;
                }
                if self.reset_level == 1 {
                    // ack2 for a handshake we never answered
                    warn!("handshake ack2 while requesting a reset");
                    self.reset(1, now, "unexpected handshake ack2");
                    self.send_reset(now, None);
                } else {
                    self.note_peer(msg.params);
                    self.reset_done(now);
                }
            }
            _ => debug!(level, "unknown reset level ignored"),
        }
    }

    /// Record the peer's handshake id; adopt its parameters while resetting.
    fn note_peer(&mut self, params: Option<ResetParams>) {
        let Some(params) = params else { return };
        if params.session.is_some() {
            self.peer_id = params.session;
        }
        if self.reset_at.is_none() {
            return;
        }
        let merged = self.config.merge(&params);
        if merged != self.config {
            debug!(
                window = merged.window,
                timeout = ?merged.timeout,
                "channel parameters negotiated"
            );
            if merged.window != self.config.window {
                let window = usize::from(merged.window);
                self.send_table = (0..window).map(|_| None).collect();
                self.recv_table = vec![None; window];
            }
            self.config = merged;
        }
    }

    /// Drop all sequence state and start a handshake at `level`.
    ///
    /// Queued submissions survive; in-flight ones fail.
    fn reset(&mut self, level: u8, now: Instant, reason: &str) {
        if self.is_up() {
            self.events.push_back(SessionEvent::Down);
        }
        self.stats.resets += 1;
        self.fail_in_flight(&ReliableError::Reset(reason.to_owned()));
        self.recv_table.iter_mut().for_each(|slot| *slot = None);
        self.send_head = 0;
        self.send_tail = 0;
        self.recv_head = 0;
        self.recv_tail = 0;
        self.timers.clear();
        self.recv_deadline = None;
        self.pend_ack = false;
        if level == 1 {
            self.local_id = self.local_id.wrapping_add(1);
        }
        self.reset_level = level;
        self.reset_at = Some(now);
    }

    fn reset_done(&mut self, now: Instant) {
        if self.reset_at.take().is_none() {
            return;
        }
        info!(
            window = self.config.window,
            timeout = ?self.config.timeout,
            "reliable channel up"
        );
        self.events.push_back(SessionEvent::Up);
        self.pump(now);
    }

    fn send_reset(&mut self, now: Instant, error: Option<String>) {
        let level = self.reset_level;
        let msg = WireMessage::reset(level, Some(self.config.params(self.local_id)), error);
        if level < 3 {
            self.reset_at = Some(now + self.config.timeout);
        }
        self.transmit(msg);
    }

    fn fail_in_flight(&mut self, err: &ReliableError) {
        for slot in &mut self.send_table {
            if let Some(Pending {
                ticket: Some(ticket),
                ..
            }) = slot.take()
            {
                self.events
                    .push_back(SessionEvent::Failed(ticket, err.clone()));
            }
        }
    }

    fn accept_data(&mut self, seq: u16, data: Bytes) {
        self.pend_ack = true;
        if self.between(self.recv_tail, self.recv_head, seq) {
            if self.distance(self.recv_tail, seq) < self.config.in_flight_limit() {
                self.recv_table[usize::from(seq)] = Some(data);
                self.recv_head = self.next(seq);
            } else {
                trace!(seq, "data outside the receive window dropped");
            }
        } else if self.between(self.recv_tail, seq, self.recv_head) {
            self.recv_table[usize::from(seq)] = Some(data);
        }
    }

    fn process_ack(&mut self, ack: u16, selective: &[u16]) {
        // An ack outside tail..=head is stale.
        if self.between(self.send_tail, ack, self.send_head) {
            while self.send_tail != ack {
                let slot = usize::from(self.send_tail);
                if let Some(Pending {
                    ticket: Some(ticket),
                    ..
                }) = self.send_table[slot].take()
                {
                    self.events.push_back(SessionEvent::Acked(ticket));
                }
                self.send_tail = self.next(self.send_tail);
            }
        }
        for &seq in selective {
            if seq >= self.config.window {
                continue;
            }
            if let Some(pending) = self.send_table[usize::from(seq)].as_mut() {
                pending.generation = None;
                if let Some(ticket) = pending.ticket.take() {
                    self.events.push_back(SessionEvent::Acked(ticket));
                }
            }
        }
    }

    fn deliver(&mut self) {
        while self.recv_tail != self.recv_head {
            let Some(data) = self.recv_table[usize::from(self.recv_tail)].take() else {
                break;
            };
            self.recv_tail = self.next(self.recv_tail);
            self.pend_ack = true;
            self.stats.delivered += 1;
            self.events.push_back(SessionEvent::Deliver(data));
        }
    }

    /// Move queued submissions into the window.
    fn pump(&mut self, now: Instant) {
        if !self.is_up() {
            return;
        }
        while self.in_flight() < self.config.in_flight_limit() {
            let Some((ticket, payload)) = self.queue.pop_front() else {
                break;
            };
            let seq = self.send_head;
            self.send_head = self.next(seq);
            self.send_table[usize::from(seq)] = Some(Pending {
                payload,
                ticket: Some(ticket),
                generation: None,
            });
            self.stats.sent += 1;
            self.transmit_data(seq, now);
        }
        debug_assert!(self.in_flight() <= self.config.in_flight_limit());
    }

    fn transmit_data(&mut self, seq: u16, now: Instant) {
        let selective = self.selective();
        let ack = self.recv_tail;
        let at = now + self.config.timeout;
        let Some(pending) = self.send_table[usize::from(seq)].as_mut() else {
            return;
        };
        pending.generation = Some(self.timers.schedule(at, seq));
        let msg = WireMessage::data(seq, ack, selective, pending.payload.to_vec());
        self.pend_ack = false;
        self.transmit(msg);
    }

    fn send_ack(&mut self) {
        let msg = WireMessage::ack(self.send_head, self.recv_tail, self.selective());
        self.pend_ack = false;
        self.transmit(msg);
    }

    fn transmit(&mut self, msg: WireMessage) {
        self.events.push_back(SessionEvent::Transmit(msg));
    }

    /// Out-of-order sequence numbers we hold.
    fn selective(&self) -> Vec<u16> {
        self.recv_table
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(seq, _)| seq as u16)
            .collect()
    }

    fn is_live(&self, d: Deadline) -> bool {
        self.send_table[usize::from(d.seq)]
            .as_ref()
            .is_some_and(|p| p.generation == Some(d.generation))
    }

    fn next(&self, seq: u16) -> u16 {
        (seq + 1) % self.config.window
    }

    /// Steps forward from `from` to `to`.
    fn distance(&self, from: u16, to: u16) -> u16 {
        let window = self.config.window;
        (to + window - from) % window
    }

    /// Whether `b` lies on the way from `a` to `c`.
    fn between(&self, a: u16, b: u16, c: u16) -> bool {
        self.distance(a, b) <= self.distance(a, c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::time::Duration;

    fn config(window: u16) -> ReliableConfig {
        ReliableConfig::new(window, Duration::from_millis(100)).unwrap()
    }

    #[derive(Default)]
    struct Tally {
        delivered: Vec<Bytes>,
        acked: Vec<Ticket>,
        failed: Vec<(Ticket, ReliableError)>,
        ups: usize,
        downs: usize,
        closed: Option<ReliableError>,
    }

    impl Tally {
        fn record(&mut self, ev: SessionEvent) {
            match ev {
                SessionEvent::Transmit(_) => {}
                SessionEvent::Deliver(data) => self.delivered.push(data),
                SessionEvent::Acked(t) => self.acked.push(t),
                SessionEvent::Failed(t, e) => self.failed.push((t, e)),
                SessionEvent::Up => self.ups += 1,
                SessionEvent::Down => self.downs += 1,
                SessionEvent::Closed(e) => self.closed = Some(e),
            }
        }
    }

    struct End {
        session: Session,
        inbox: VecDeque<WireMessage>,
        /// Held back until both inboxes are empty.
        late: VecDeque<WireMessage>,
        tally: Tally,
    }

    impl End {
        fn fresh(config: ReliableConfig, id: u32, now: Instant) -> Self {
            Self {
                session: Session::new(config, id, now),
                inbox: VecDeque::new(),
                late: VecDeque::new(),
                tally: Tally::default(),
            }
        }
    }

    /// Two sessions joined by a lossy link.
    ///
    /// Reset messages may also be duplicated or delayed past later traffic.
    struct Sim {
        now: Instant,
        rng: StdRng,
        loss: f64,
        dup: f64,
        delay: f64,
        ends: [End; 2],
    }

    impl Sim {
        fn new(a: ReliableConfig, b: ReliableConfig, loss: f64, seed: u64) -> Self {
            let now = Instant::now();
            let mut sim = Self {
                now,
                rng: StdRng::seed_from_u64(seed),
                loss,
                dup: 0.0,
                delay: 0.0,
                ends: [End::fresh(a, 100, now), End::fresh(b, 200, now)],
            };
            sim.ends[0].session.open(now);
            sim.ends[1].session.open(now);
            sim
        }

        fn drain(&mut self) {
            for i in 0..2 {
                while let Some(ev) = self.ends[i].session.poll_event() {
                    match ev {
                        SessionEvent::Transmit(msg) => {
                            if self.rng.gen_bool(self.loss) {
                                continue;
                            }
                            let peer = &mut self.ends[1 - i];
                            if msg.is_reset() {
                                if self.dup > 0.0 && self.rng.gen_bool(self.dup) {
                                    peer.inbox.push_back(msg.clone());
                                }
                                if self.delay > 0.0 && self.rng.gen_bool(self.delay) {
                                    peer.late.push_back(msg);
                                    continue;
                                }
                            }
                            peer.inbox.push_back(msg);
                        }
                        other => self.ends[i].tally.record(other),
                    }
                }
            }
        }

        /// One delivery per direction, then delayed messages, or a jump
        /// to the next deadline.
        fn step(&mut self) -> bool {
            self.drain();
            let mut moved = false;
            for i in 0..2 {
                if let Some(msg) = self.ends[i].inbox.pop_front() {
                    self.ends[i].session.handle(msg, self.now);
                    moved = true;
                }
            }
            if !moved {
                for i in 0..2 {
                    if let Some(msg) = self.ends[i].late.pop_front() {
                        self.ends[i].session.handle(msg, self.now);
                        moved = true;
                    }
                }
            }
            if !moved {
                let next = self
                    .ends
                    .iter_mut()
                    .filter_map(|e| e.session.next_deadline())
                    .min();
                let Some(next) = next else { return false };
                self.now = self.now.max(next);
                for end in &mut self.ends {
                    end.session.poll_timers(self.now);
                }
            }
            self.drain();
            for end in &self.ends {
                let s = &end.session;
                assert!(s.in_flight() <= s.config().in_flight_limit());
            }
            true
        }

        fn run_until(&mut self, done: impl Fn(&Sim) -> bool) {
            for _ in 0..200_000 {
                if done(self) {
                    return;
                }
                if !self.step() {
                    break;
                }
            }
            assert!(done(self), "simulation stalled");
        }

        fn up(&mut self) {
            self.run_until(|s| s.ends.iter().all(|e| e.session.is_up()));
        }

        fn submit(&mut self, i: usize, payload: &'static [u8]) -> Ticket {
            let now = self.now;
            self.ends[i].session.submit(Bytes::from_static(payload), now)
        }
    }

    #[test]
    fn handshake_negotiates_parameters() {
        let mut sim = Sim::new(
            config(8),
            ReliableConfig::new(32, Duration::from_millis(250)).unwrap(),
            0.0,
            1,
        );
        sim.up();
        for end in &sim.ends {
            assert_eq!(end.session.config().window, 8);
            assert_eq!(end.session.config().timeout, Duration::from_millis(250));
            assert_eq!(end.tally.ups, 1);
        }
    }

    #[test]
    fn lossy_transfer_is_exactly_once_in_order() {
        for (seed, window) in [(7, 4), (8, 8), (9, 64)] {
            let mut sim = Sim::new(config(window), config(window), 0.3, seed);
            let payloads: Vec<Bytes> = (0..40u8).map(|i| Bytes::from(vec![i, i])).collect();
            let now = sim.now;
            for p in &payloads {
                sim.ends[0].session.submit(p.clone(), now);
            }
            sim.run_until(|s| s.ends[0].tally.acked.len() == 40 && s.ends[1].tally.delivered.len() == 40);
            assert_eq!(sim.ends[1].tally.delivered, payloads);
            assert!(sim.ends[0].tally.failed.is_empty());
            assert!(sim.ends[0].session.stats().retransmitted > 0);
        }
    }

    #[test]
    fn late_handshake_duplicate_is_ignored() {
        let mut sim = Sim::new(config(8), config(8), 0.0, 2);
        let stale = WireMessage::reset(
            1,
            Some(config(8).params(100)),
            None,
        );
        sim.up();
        let now = sim.now;
        sim.ends[1].session.handle(stale, now);
        sim.drain();
        assert!(sim.ends[1].session.is_up());
        assert_eq!(sim.ends[1].tally.downs, 0);
    }

    #[test]
    fn peer_restart_fails_in_flight_but_keeps_queue() {
        let mut sim = Sim::new(config(8), config(8), 0.0, 3);
        sim.up();
        for _ in 0..6 {
            sim.submit(0, b"x");
        }
        assert_eq!(sim.ends[0].session.in_flight(), 4);
        assert_eq!(sim.ends[0].session.queued(), 2);

        let now = sim.now;
        let restart = WireMessage::reset(1, Some(config(8).params(999)), None);
        sim.ends[0].session.handle(restart, now);
        sim.ends[1].inbox.clear();
        sim.drain();

        let a = &sim.ends[0];
        assert_eq!(a.session.reset_level(), 2);
        assert_eq!(a.tally.downs, 1);
        assert_eq!(a.tally.failed.len(), 4);
        assert!(a
            .tally
            .failed
            .iter()
            .all(|(_, e)| matches!(e, ReliableError::Reset(_))));
        assert_eq!(a.session.queued(), 2);
    }

    #[test]
    fn data_at_level_two_completes_handshake() {
        let now = Instant::now();
        let mut s = Session::new(config(8), 5, now);
        s.handle(WireMessage::reset(1, Some(config(8).params(9)), None), now);
        assert_eq!(s.reset_level(), 2);
        s.handle(WireMessage::data(0, 0, vec![], b"hi".to_vec()), now);
        assert!(s.is_up());
        let events: Vec<_> = std::iter::from_fn(|| s.poll_event()).collect();
        assert!(events.contains(&SessionEvent::Up));
        assert!(events.contains(&SessionEvent::Deliver(Bytes::from_static(b"hi"))));
    }

    #[test]
    fn data_at_level_one_repeats_request() {
        let now = Instant::now();
        let mut s = Session::new(config(8), 5, now);
        s.handle(WireMessage::data(0, 0, vec![], b"hi".to_vec()), now);
        assert!(!s.is_up());
        match s.poll_event() {
            Some(SessionEvent::Transmit(msg)) => {
                assert!(msg.is_reset());
                assert_eq!(msg.reset_level(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(s.poll_event().is_none());
    }

    #[test]
    fn out_of_bounds_sequence_resets() {
        let mut sim = Sim::new(config(8), config(8), 0.0, 4);
        sim.up();
        let now = sim.now;
        let a = &mut sim.ends[0].session;
        a.handle(WireMessage::ack(200, 0, vec![]), now);
        assert!(!a.is_up());
        assert_eq!(a.reset_level(), 1);
        let sent: Vec<_> = std::iter::from_fn(|| a.poll_event()).collect();
        assert!(sent.iter().any(|ev| matches!(
            ev,
            SessionEvent::Transmit(m) if m.is_reset() && m.error.as_deref() == Some("R/S out of bounds")
        )));
        // Recovers with a fresh handshake.
        sim.up();
    }

    #[test]
    fn stale_cumulative_ack_releases_nothing() {
        let mut sim = Sim::new(config(8), config(8), 0.0, 5);
        sim.up();
        for _ in 0..3 {
            sim.submit(0, b"y");
        }
        sim.ends[1].inbox.clear();
        sim.drain();
        let now = sim.now;
        let a = &mut sim.ends[0].session;
        a.handle(WireMessage::ack(0, 6, vec![]), now);
        let events: Vec<_> = std::iter::from_fn(|| a.poll_event()).collect();
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Acked(_))));
        assert_eq!(a.in_flight(), 3);
    }

    #[test]
    fn selective_ack_completes_and_stops_retransmit() {
        let mut sim = Sim::new(config(8), config(8), 0.0, 6);
        sim.up();
        let first = sim.submit(0, b"a");
        let second = sim.submit(0, b"b");
        sim.ends[1].inbox.clear();
        sim.drain();
        let now = sim.now;
        let a = &mut sim.ends[0].session;
        a.handle(WireMessage::ack(0, 0, vec![1]), now);
        let events: Vec<_> = std::iter::from_fn(|| a.poll_event()).collect();
        assert!(events.contains(&SessionEvent::Acked(second)));
        assert!(!events.contains(&SessionEvent::Acked(first)));

        let later = now + Duration::from_millis(150);
        a.poll_timers(later);
        let resent: Vec<u16> = std::iter::from_fn(|| a.poll_event())
            .filter_map(|e| match e {
                SessionEvent::Transmit(m) if m.data.is_some() => m.seq,
                _ => None,
            })
            .collect();
        assert_eq!(resent, vec![0]);
    }

    #[test]
    fn close_reaches_peer_with_reason() {
        let mut sim = Sim::new(config(8), config(8), 0.0, 7);
        sim.up();
        sim.submit(1, b"z");
        sim.ends[0].inbox.clear();
        sim.ends[0].session.close(Some("bye".into()));
        sim.run_until(|s| s.ends[1].tally.closed.is_some());
        assert_eq!(
            sim.ends[1].tally.closed,
            Some(ReliableError::PeerClosed(Some("bye".into())))
        );
        assert_eq!(sim.ends[0].tally.closed, Some(ReliableError::Closed));
        assert!(sim.ends[1]
            .tally
            .failed
            .iter()
            .all(|(_, e)| matches!(e, ReliableError::PeerClosed(_))));

        let late = sim.submit(0, b"late");
        sim.drain();
        assert_eq!(sim.ends[0].tally.failed.last(), Some(&(late, ReliableError::Closed)));
    }

    #[test]
    fn closed_session_answers_traffic_with_terminal_reset() {
        let now = Instant::now();
        let mut s = Session::new(config(8), 1, now);
        s.close(None);
        while s.poll_event().is_some() {}
        s.handle(WireMessage::ack(0, 0, vec![]), now);
        match s.poll_event() {
            Some(SessionEvent::Transmit(m)) => assert_eq!(m.reset_level(), 0),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn repeated_reset_requests_are_idempotent() {
        let now = Instant::now();
        let mut s = Session::new(config(8), 1, now);
        let req = WireMessage::reset(1, Some(config(8).params(50)), None);
        s.handle(req.clone(), now);
        s.handle(req, now);
        assert_eq!(s.reset_level(), 2);
        let replies: Vec<u8> = std::iter::from_fn(|| s.poll_event())
            .filter_map(|e| match e {
                SessionEvent::Transmit(m) => Some(m.reset_level()),
                _ => None,
            })
            .collect();
        assert_eq!(replies, vec![2, 2]);
    }

    fn sent_levels(s: &mut Session) -> Vec<u8> {
        std::iter::from_fn(|| s.poll_event())
            .filter_map(|e| match e {
                SessionEvent::Transmit(m) if m.is_reset() => Some(m.reset_level()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn ack2_while_requesting_restarts_the_request() {
        let now = Instant::now();
        let mut s = Session::new(config(8), 1, now);
        s.open(now);
        assert_eq!(sent_levels(&mut s), vec![1]);

        s.handle(WireMessage::reset(3, Some(config(8).params(50)), None), now);
        assert!(!s.is_up());
        assert_eq!(s.reset_level(), 1);
        assert_eq!(sent_levels(&mut s), vec![1]);

        // data from the peer's old session is not accepted either
        s.handle(WireMessage::data(3, 0, vec![], b"old".to_vec()), now);
        assert!(!s.is_up());
        let events: Vec<_> = std::iter::from_fn(|| s.poll_event()).collect();
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::Deliver(_) | SessionEvent::Up)));
    }

    #[test]
    fn ack2_interleaved_with_peer_request_converges() {
        let now = Instant::now();
        let mut s = Session::new(config(8), 1, now);
        s.open(now);
        let peer = Some(config(8).params(50));

        s.handle(WireMessage::reset(3, peer, None), now);
        s.handle(WireMessage::reset(1, peer, None), now);
        assert_eq!(s.reset_level(), 2);
        assert!(!s.is_up());

        s.handle(WireMessage::reset(3, peer, None), now);
        assert!(s.is_up());
        let events: Vec<_> = std::iter::from_fn(|| s.poll_event()).collect();
        assert_eq!(
            events.iter().filter(|e| **e == SessionEvent::Up).count(),
            1
        );
    }

    #[test]
    fn restarted_end_ignores_stale_ack2_and_recovers() {
        let mut sim = Sim::new(config(8), config(8), 0.0, 11);
        sim.up();
        for p in [&b"a"[..], b"b", b"c"] {
            sim.submit(1, p);
        }
        sim.run_until(|s| s.ends[0].tally.delivered.len() == 3);

        // end 0 restarts while a leftover ack2 from end 1 is in flight
        let now = sim.now;
        sim.ends[0] = End::fresh(config(8), 300, now);
        sim.ends[0].session.open(now);
        sim.ends[1].inbox.clear();
        let stale = WireMessage::reset(3, Some(config(8).params(200)), None);
        sim.ends[0].session.handle(stale, now);
        assert!(!sim.ends[0].session.is_up());

        sim.up();
        let before = sim.ends[1].tally.delivered.len();
        sim.submit(0, b"after");
        sim.submit(1, b"back");
        sim.run_until(|s| {
            s.ends[1].tally.delivered.len() == before + 1 && s.ends[0].tally.delivered.len() == 1
        });
        assert_eq!(
            sim.ends[1].tally.delivered.last(),
            Some(&Bytes::from_static(b"after"))
        );
        assert_eq!(sim.ends[0].tally.delivered, vec![Bytes::from_static(b"back")]);
        assert_eq!(sim.ends[1].tally.downs, 1);
    }

    #[test]
    fn duplicated_and_delayed_handshake_converges() {
        for seed in 20..40 {
            let mut sim = Sim::new(config(8), config(8), 0.1, seed);
            sim.dup = 0.4;
            sim.delay = 0.4;
            let payloads: Vec<Bytes> = (0..12u8).map(|i| Bytes::from(vec![i])).collect();
            let now = sim.now;
            for p in &payloads {
                sim.ends[0].session.submit(p.clone(), now);
            }
            sim.run_until(|s| {
                s.ends[0].tally.acked.len() == 12
                    && s.ends[1].tally.delivered.len() == 12
                    && s.ends.iter().all(|e| e.late.is_empty())
            });
            assert_eq!(sim.ends[1].tally.delivered, payloads, "seed {seed}");
            for end in &sim.ends {
                assert!(end.session.is_up(), "seed {seed}");
                assert_eq!(end.tally.ups, 1, "seed {seed}");
                assert_eq!(end.tally.downs, 0, "seed {seed}");
            }
        }
    }
}
