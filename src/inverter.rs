use std::time::Duration;

use thiserror::Error;

use crate::csvlog::RecordSink;
use crate::record::{BusAddress, InverterRecord, ParseError, RawResponse, FIELD_NAMES};

/// Attempts per address before it is skipped for this run.
pub const MAX_ATTEMPTS: u32 = 5;

/// Pause before every attempt so inverters are not hammered back to back.
const PACING: Duration = Duration::from_secs(1);

/// One request/response round trip on the bus. Failures surface as an
/// empty or malformed response, never as an error.
pub trait Exchange {
    fn exchange(&mut self, address: BusAddress) -> RawResponse;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("no valid frame from {address} after {attempts} attempts (last: {last})")]
    RetriesExhausted {
        address: BusAddress,
        attempts: u32,
        last: ParseError,
    },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub recorded: usize,
    pub skipped: usize,
}

pub struct Poller<E> {
    link: E,
    pacing: Duration,
    discovery: bool,
}

impl<E: Exchange> Poller<E> {
    pub fn new(link: E, discovery: bool) -> Self {
        Poller {
            link,
            pacing: PACING,
            discovery,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn into_inner(self) -> E {
        self.link
    }

    /// Queries one inverter until a frame parses or attempts run out.
    /// Every kind of parse failure is retried.
    pub fn poll(&mut self, address: BusAddress) -> Result<InverterRecord, PollError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            std::thread::sleep(self.pacing);
            let response = self.link.exchange(address);
            match InverterRecord::parse(&response, address) {
                Ok(record) => {
                    log::debug!("[{address}] Decoded on attempt {attempt}: {record:?}");
                    return Ok(record);
                }
                Err(e) => {
                    match &e {
                        ParseError::AddressMismatch { .. } => {
                            log::warn!("[{address}] Line seems to be corrupted ({e})")
                        }
                        _ => log::debug!("[{address}] Attempt {attempt}/{MAX_ATTEMPTS} failed ({e})"),
                    }
                    if attempt >= MAX_ATTEMPTS {
                        return Err(PollError::RetriesExhausted {
                            address,
                            attempts: attempt,
                            last: e,
                        });
                    }
                }
            }
        }
    }

    /// Polls every address in order, handing each record to `sink`.
    /// Neither a silent inverter nor a failed write stops the run.
    pub fn poll_all<S: RecordSink>(&mut self, addresses: &[BusAddress], sink: &mut S) -> PollSummary {
        let mut summary = PollSummary::default();
        for &address in addresses {
            let record = match self.poll(address) {
                Ok(record) => record,
                Err(e) => {
                    log::debug!("{e}");
                    summary.skipped += 1;
                    continue;
                }
            };
            if self.discovery {
                log_discovery(&record);
            }
            match sink.append(&record, chrono::Local::now()) {
                Ok(()) => summary.recorded += 1,
                Err(e) => {
                    log::error!("[{address}] Failed to store record ({e:#})");
                    summary.skipped += 1;
                }
            }
        }
        summary
    }
}

fn log_discovery(record: &InverterRecord) {
    log::info!("Address: {}", record.address);
    for (name, value) in FIELD_NAMES.iter().zip(record.fields()) {
        log::info!("\t{name:<20} {value:>20}");
    }
}
