//! # State Snapshot
//!
//! Deterministic binary image of a topic's registration set, used for
//! diagnostics and for replaying recorded states in compatibility tests.
//!
//! ## Layout (big-endian)
//!
//! ```text
//! i32 sender count
//!   per sender:   bool local, i64 connection, i64 user, bool source,
//!                 bool request_supported, i32 state, i32 link
//! i32 receiver count
//!   per receiver: bool local, i64 connection, i64 user, bool drain,
//!                 bool delta, bool delayed, i32 state, i32 link
//! i32 candidate count
//!   per candidate: i64 distributor, bool has_connection
//!                  [i64 connection, i32 route weight, i64 remote user]
//! ```
//!
//! Booleans are one byte (0 or 1).

use shared_types::{ConnectionId, DistributorId, UserId};

use super::errors::SubscriptionError;
use super::value_objects::{LinkState, ReceiverState, SenderState};

/// Snapshot entry of a sending role object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderSnapshot {
    pub local: bool,
    pub connection: ConnectionId,
    pub user: UserId,
    pub source: bool,
    pub request_supported: bool,
    pub state: SenderState,
    pub link: LinkState,
}

/// Snapshot entry of a receiving role object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverSnapshot {
    pub local: bool,
    pub connection: ConnectionId,
    pub user: UserId,
    pub drain: bool,
    pub delta: bool,
    pub delayed: bool,
    pub state: ReceiverState,
    pub link: LinkState,
}

/// Currently selected connection toward a candidate distributor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSnapshot {
    pub connection: ConnectionId,
    pub weight: i32,
    pub remote_user: UserId,
}

/// Candidate authoritative distributor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSnapshot {
    pub distributor: DistributorId,
    pub route: Option<RouteSnapshot>,
}

/// Binary snapshot of one topic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionSnapshot {
    pub senders: Vec<SenderSnapshot>,
    pub receivers: Vec<ReceiverSnapshot>,
    pub candidates: Vec<CandidateSnapshot>,
}

impl SubscriptionSnapshot {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            12 + self.senders.len() * 27 + self.receivers.len() * 28 + self.candidates.len() * 29,
        );

        put_count(&mut out, self.senders.len());
        for s in &self.senders {
            put_bool(&mut out, s.local);
            out.extend_from_slice(&s.connection.0.to_be_bytes());
            out.extend_from_slice(&s.user.0.to_be_bytes());
            put_bool(&mut out, s.source);
            put_bool(&mut out, s.request_supported);
            out.extend_from_slice(&s.state.ordinal().to_be_bytes());
            out.extend_from_slice(&s.link.ordinal().to_be_bytes());
        }

        put_count(&mut out, self.receivers.len());
        for r in &self.receivers {
            put_bool(&mut out, r.local);
            out.extend_from_slice(&r.connection.0.to_be_bytes());
            out.extend_from_slice(&r.user.0.to_be_bytes());
            put_bool(&mut out, r.drain);
            put_bool(&mut out, r.delta);
            put_bool(&mut out, r.delayed);
            out.extend_from_slice(&r.state.ordinal().to_be_bytes());
            out.extend_from_slice(&r.link.ordinal().to_be_bytes());
        }

        put_count(&mut out, self.candidates.len());
        for c in &self.candidates {
            out.extend_from_slice(&c.distributor.0.to_be_bytes());
            match &c.route {
                Some(route) => {
                    put_bool(&mut out, true);
                    out.extend_from_slice(&route.connection.0.to_be_bytes());
                    out.extend_from_slice(&route.weight.to_be_bytes());
                    out.extend_from_slice(&route.remote_user.0.to_be_bytes());
                }
                None => put_bool(&mut out, false),
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SubscriptionError> {
        let mut reader = Reader { bytes, offset: 0 };
        let mut snapshot = SubscriptionSnapshot::default();

        for _ in 0..reader.count()? {
            snapshot.senders.push(SenderSnapshot {
                local: reader.bool()?,
                connection: ConnectionId(reader.u64()?),
                user: UserId(reader.u64()?),
                source: reader.bool()?,
                request_supported: reader.bool()?,
                state: reader.ordinal("sender state", SenderState::from_ordinal)?,
                link: reader.ordinal("link state", LinkState::from_ordinal)?,
            });
        }

        for _ in 0..reader.count()? {
            snapshot.receivers.push(ReceiverSnapshot {
                local: reader.bool()?,
                connection: ConnectionId(reader.u64()?),
                user: UserId(reader.u64()?),
                drain: reader.bool()?,
                delta: reader.bool()?,
                delayed: reader.bool()?,
                state: reader.ordinal("receiver state", ReceiverState::from_ordinal)?,
                link: reader.ordinal("link state", LinkState::from_ordinal)?,
            });
        }

        for _ in 0..reader.count()? {
            let distributor = DistributorId(reader.u64()?);
            let route = if reader.bool()? {
                Some(RouteSnapshot {
                    connection: ConnectionId(reader.u64()?),
                    weight: reader.i32()?,
                    remote_user: UserId(reader.u64()?),
                })
            } else {
                None
            };
            snapshot.candidates.push(CandidateSnapshot { distributor, route });
        }

        Ok(snapshot)
    }
}

fn put_bool(out: &mut Vec<u8>, value: bool) {
    out.push(u8::from(value));
}

fn put_count(out: &mut Vec<u8>, count: usize) {
    let count = i32::try_from(count).unwrap_or(i32::MAX);
    out.extend_from_slice(&count.to_be_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], SubscriptionError> {
        let end = self.offset + N;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or(SubscriptionError::TruncatedSnapshot {
                offset: self.offset,
                needed: N,
            })?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(slice);
        self.offset = end;
        Ok(buf)
    }

    fn bool(&mut self) -> Result<bool, SubscriptionError> {
        Ok(self.take::<1>()?[0] != 0)
    }

    fn i32(&mut self) -> Result<i32, SubscriptionError> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    fn u64(&mut self) -> Result<u64, SubscriptionError> {
        Ok(u64::from_be_bytes(self.take()?))
    }

    fn count(&mut self) -> Result<usize, SubscriptionError> {
        let value = self.i32()?;
        usize::try_from(value).map_err(|_| SubscriptionError::InvalidOrdinal {
            field: "count",
            value,
        })
    }

    fn ordinal<T>(
        &mut self,
        field: &'static str,
        parse: fn(i32) -> Option<T>,
    ) -> Result<T, SubscriptionError> {
        let value = self.i32()?;
        parse(value).ok_or(SubscriptionError::InvalidOrdinal { field, value })
    }
}
