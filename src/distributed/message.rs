//! Wire encoding of the per-round messages exchanged between ranks.
//!
//! All integers and floats are big-endian. Vectors carry a `u32` length
//! prefix.

use crate::error::{AnnealError, Result};
use crate::sa::{BestState, Energy};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;

const TAG_START: u8 = 0;
const TAG_DONE: u8 = 1;

/// Rank 0's instruction at the top of every round.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundCommand {
    /// Anneal one round starting from these counters.
    Start {
        iterations: u64,
        perturbs: u64,
        worse_kept: u64,
        elapsed: Duration,
        /// Completed fraction of the top-level criteria, if it can tell.
        fraction: Option<f64>,
    },
    /// The top-level criteria is satisfied; leave the round loop.
    Done,
}

impl RoundCommand {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + 8 * 5);
        match *self {
            RoundCommand::Start {
                iterations,
                perturbs,
                worse_kept,
                elapsed,
                fraction,
            } => {
                buf.put_u8(TAG_START);
                buf.put_u64(iterations);
                buf.put_u64(perturbs);
                buf.put_u64(worse_kept);
                buf.put_u64(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
                // NaN marks an unknown fraction
                buf.put_f64(fraction.unwrap_or(f64::NAN));
            }
            RoundCommand::Done => buf.put_u8(TAG_DONE),
        }
        buf.freeze()
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        need(data, 1, "round command")?;
        match data.get_u8() {
            TAG_START => {
                need(data, 8 * 5, "round start")?;
                let iterations = data.get_u64();
                let perturbs = data.get_u64();
                let worse_kept = data.get_u64();
                let elapsed = Duration::from_micros(data.get_u64());
                let fraction = Some(data.get_f64()).filter(|f| !f.is_nan());
                Ok(RoundCommand::Start {
                    iterations,
                    perturbs,
                    worse_kept,
                    elapsed,
                    fraction,
                })
            }
            TAG_DONE => Ok(RoundCommand::Done),
            tag => Err(AnnealError::Comm(format!("unknown round command tag {tag}"))),
        }
    }
}

/// What each rank reports to rank 0 after a round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundReport {
    pub energy: f64,
    pub iterations: u64,
    pub perturbs: u64,
    pub worse_kept: u64,
}

impl RoundReport {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 * 4);
        buf.put_f64(self.energy);
        buf.put_u64(self.iterations);
        buf.put_u64(self.perturbs);
        buf.put_u64(self.worse_kept);
        buf.freeze()
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        need(data, 8 * 4, "round report")?;
        Ok(Self {
            energy: data.get_f64(),
            iterations: data.get_u64(),
            perturbs: data.get_u64(),
            worse_kept: data.get_u64(),
        })
    }
}

pub fn encode_rank(rank: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(rank as u32);
    buf.freeze()
}

pub fn decode_rank(mut data: &[u8]) -> Result<usize> {
    need(data, 4, "rank")?;
    Ok(data.get_u32() as usize)
}

/// Energy, solution, misfits and non-zero count of a best state.
pub fn encode_best(best: &BestState) -> Bytes {
    let ineq_len = best.misfit_ineq.as_ref().map_or(0, Vec::len);
    let cap = 4 * 4 + 1 + 8 + 8 * (best.energy.len() + best.solution.len() + best.misfit.len() + ineq_len);
    let mut buf = BytesMut::with_capacity(cap);
    put_vec(&mut buf, best.energy.as_slice());
    put_vec(&mut buf, &best.solution);
    put_vec(&mut buf, &best.misfit);
    match &best.misfit_ineq {
        Some(m) => {
            buf.put_u8(1);
            put_vec(&mut buf, m);
        }
        None => buf.put_u8(0),
    }
    buf.put_u64(best.num_non_zero as u64);
    buf.freeze()
}

pub fn decode_best(mut data: &[u8]) -> Result<BestState> {
    let energy = Energy::from_vec(get_vec(&mut data)?)?;
    let solution = get_vec(&mut data)?;
    let misfit = get_vec(&mut data)?;
    need(data, 1, "inequality flag")?;
    let misfit_ineq = match data.get_u8() {
        0 => None,
        1 => Some(get_vec(&mut data)?),
        flag => return Err(AnnealError::Comm(format!("bad inequality flag {flag}"))),
    };
    need(data, 8, "non-zero count")?;
    let num_non_zero = data.get_u64() as usize;
    if data.has_remaining() {
        return Err(AnnealError::Comm(format!(
            "{} trailing bytes after best state",
            data.remaining()
        )));
    }
    Ok(BestState {
        energy,
        solution,
        misfit,
        misfit_ineq,
        num_non_zero,
    })
}

fn put_vec(buf: &mut BytesMut, values: &[f64]) {
    buf.put_u32(values.len() as u32);
    for &v in values {
        buf.put_f64(v);
    }
}

fn get_vec(data: &mut &[u8]) -> Result<Vec<f64>> {
    need(data, 4, "vector length")?;
    let len = data.get_u32() as usize;
    need(data, len * 8, "vector body")?;
    Ok((0..len).map(|_| data.get_f64()).collect())
}

fn need(data: &[u8], n: usize, what: &str) -> Result<()> {
    if data.remaining() < n {
        return Err(AnnealError::Comm(format!(
            "truncated {what}: need {n} bytes, have {}",
            data.remaining()
        )));
    }
    Ok(())
}
